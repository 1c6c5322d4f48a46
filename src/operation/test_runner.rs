//! Operations executing against the test-runner context: fail point
//! installation, session and event-log assertions, and concurrent
//! execution control.

use futures::{future::BoxFuture, FutureExt};
use serde::Deserialize;

use crate::{
    context::TestContext,
    entity::TransactionState,
    error::{Error, Result},
    events::last_two_lsids,
    fail_point::{single_server_criteria, FailPoint},
    operation::TestOperation,
    results::ResultValue,
    test_file::OperationDescription,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct FailPointCommand {
    fail_point: FailPoint,
    client: String,
}

impl TestOperation for FailPointCommand {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let client = ctx.registry.read().await.client(&self.client)?.clone();
            let guard = self.fail_point.enable(&client, None).await?;
            ctx.fail_point_guards.write().await.push(guard);
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

/// Installs a fail point on the specific server the given session is pinned
/// to. Errors before any network call when the session is unpinned.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct TargetedFailPoint {
    fail_point: FailPoint,
    session: String,
}

impl TestOperation for TargetedFailPoint {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let address = {
                let registry = ctx.registry.read().await;
                let session = registry.session(&self.session)?;
                session
                    .pinned_server()
                    .cloned()
                    .ok_or_else(|| Error::UnpinnedSession {
                        id: self.session.clone(),
                    })?
            };
            let guard = self
                .fail_point
                .enable(ctx.internal_client(), single_server_criteria(address))
                .await?;
            ctx.fail_point_guards.write().await.push(guard);
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertSessionPinned {
    session: String,
}

impl TestOperation for AssertSessionPinned {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let registry = ctx.registry.read().await;
            let session = registry.session(&self.session)?;
            if session.pinned_server().is_none() {
                return Err(Error::test_failure(
                    format!("session {:?} unexpectedly unpinned", self.session),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertSessionUnpinned {
    session: String,
}

impl TestOperation for AssertSessionUnpinned {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let registry = ctx.registry.read().await;
            let session = registry.session(&self.session)?;
            if let Some(address) = session.pinned_server() {
                return Err(Error::test_failure(
                    format!(
                        "session {:?} unexpectedly pinned to {}",
                        self.session, address
                    ),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertSessionDirty {
    session: String,
}

impl TestOperation for AssertSessionDirty {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let registry = ctx.registry.read().await;
            let session = registry.session(&self.session)?;
            if !session.is_dirty() {
                return Err(Error::test_failure(
                    format!("session {:?} should be dirty", self.session),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertSessionNotDirty {
    session: String,
}

impl TestOperation for AssertSessionNotDirty {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let registry = ctx.registry.read().await;
            let session = registry.session(&self.session)?;
            if session.is_dirty() {
                return Err(Error::test_failure(
                    format!("session {:?} should not be dirty", self.session),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertSessionTransactionState {
    session: String,
    state: TransactionState,
}

impl TestOperation for AssertSessionTransactionState {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let registry = ctx.registry.read().await;
            let session = registry.session(&self.session)?;
            let actual = session.transaction_state();
            if actual != self.state {
                return Err(Error::test_failure(
                    format!(
                        "session {:?} in transaction state {}, expected {}",
                        self.session, actual, self.state
                    ),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertSameLsidOnLastTwoCommands {
    client: String,
}

impl TestOperation for AssertSameLsidOnLastTwoCommands {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let events = ctx
                .registry
                .read()
                .await
                .client(&self.client)?
                .events()
                .clone();
            let (previous, newest) =
                last_two_lsids(&events).map_err(|message| Error::test_failure(message, ctx.path()))?;
            if previous != newest {
                return Err(Error::test_failure(
                    "lsids for last two commands did not match",
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertDifferentLsidOnLastTwoCommands {
    client: String,
}

impl TestOperation for AssertDifferentLsidOnLastTwoCommands {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let events = ctx
                .registry
                .read()
                .await
                .client(&self.client)?
                .events()
                .clone();
            let (previous, newest) =
                last_two_lsids(&events).map_err(|message| Error::test_failure(message, ctx.path()))?;
            if previous == newest {
                return Err(Error::test_failure(
                    "lsids for last two commands unexpectedly matched",
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertCollectionExists {
    collection_name: String,
    database_name: String,
}

impl TestOperation for AssertCollectionExists {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let names = ctx
                .internal_client()
                .database(&self.database_name)
                .list_collection_names(None)
                .await?;
            if !names.contains(&self.collection_name) {
                return Err(Error::test_failure(
                    format!(
                        "expected database {:?} to contain collection {:?}",
                        self.database_name, self.collection_name
                    ),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertCollectionNotExists {
    collection_name: String,
    database_name: String,
}

impl TestOperation for AssertCollectionNotExists {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let names = ctx
                .internal_client()
                .database(&self.database_name)
                .list_collection_names(None)
                .await?;
            if names.contains(&self.collection_name) {
                return Err(Error::test_failure(
                    format!(
                        "expected database {:?} to not contain collection {:?}",
                        self.database_name, self.collection_name
                    ),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertIndexExists {
    collection_name: String,
    database_name: String,
    index_name: String,
}

impl TestOperation for AssertIndexExists {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let names = ctx
                .internal_client()
                .database(&self.database_name)
                .collection::<mongodb::bson::Document>(&self.collection_name)
                .list_index_names()
                .await?;
            if !names.contains(&self.index_name) {
                return Err(Error::test_failure(
                    format!(
                        "expected collection {:?} to have index {:?}",
                        self.collection_name, self.index_name
                    ),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AssertIndexNotExists {
    collection_name: String,
    database_name: String,
    index_name: String,
}

impl TestOperation for AssertIndexNotExists {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let names = ctx
                .internal_client()
                .database(&self.database_name)
                .collection::<mongodb::bson::Document>(&self.collection_name)
                .list_index_names()
                .await?;
            if names.contains(&self.index_name) {
                return Err(Error::test_failure(
                    format!(
                        "expected collection {:?} to not have index {:?}",
                        self.collection_name, self.index_name
                    ),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

/// Queues an operation for execution on a thread entity. The submitted
/// operation's outcome is recorded by the executor and surfaced when the
/// thread is joined.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct RunOnThread {
    thread: String,
    operation: Box<OperationDescription>,
}

impl TestOperation for RunOnThread {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let thread = ctx.registry.read().await.thread(&self.thread)?.clone();
            if !thread.run_operation((*self.operation).clone()) {
                return Err(Error::test_failure(
                    format!("thread {:?} has already stopped", self.thread),
                    ctx.path(),
                ));
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct WaitForThread {
    thread: String,
}

impl TestOperation for WaitForThread {
    fn execute_on_test_runner<'a>(
        &'a self,
        ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let thread = ctx.registry.read().await.thread(&self.thread)?.clone();
            match thread.wait().await {
                Ok(failures) if failures.is_empty() => Ok(ResultValue::None),
                Ok(failures) => Err(Error::test_failure(
                    format!("thread {:?} failed: {}", self.thread, failures.join("; ")),
                    ctx.path(),
                )),
                Err(message) => Err(Error::test_failure(
                    format!("thread {:?}: {}", self.thread, message),
                    ctx.path(),
                )),
            }
        }
        .boxed()
    }
}
