//! Transaction lifecycle operations executing against session entities.

use std::time::Duration;

use futures::{future::BoxFuture, FutureExt};
use mongodb::options::{
    ReadConcern,
    ReadPreference,
    SelectionCriteria,
    TransactionOptions,
    WriteConcern,
};
use serde::Deserialize;

use crate::{
    entity::{SessionEntity, TransactionState},
    error::Result,
    operation::TestOperation,
    results::ResultValue,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct StartTransaction {
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
    read_preference: Option<ReadPreference>,
    #[serde(rename = "maxCommitTimeMS")]
    max_commit_time_ms: Option<u64>,
}

impl TestOperation for StartTransaction {
    fn execute_on_session<'a>(
        &'a self,
        entity: &'a mut SessionEntity,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = TransactionOptions::builder()
                .read_concern(self.read_concern.clone())
                .write_concern(self.write_concern.clone())
                .selection_criteria(
                    self.read_preference
                        .clone()
                        .map(SelectionCriteria::ReadPreference),
                )
                .max_commit_time(self.max_commit_time_ms.map(Duration::from_millis))
                .build();
            entity.session_mut(id)?.start_transaction(options).await?;
            entity.transaction_state = TransactionState::Starting;
            entity.pinned_server = None;
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct CommitTransaction {}

impl TestOperation for CommitTransaction {
    fn execute_on_session<'a>(
        &'a self,
        entity: &'a mut SessionEntity,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            entity.session_mut(id)?.commit_transaction().await?;
            // The session stays pinned after commit; a subsequent
            // non-transaction operation or abort releases it.
            entity.transaction_state = TransactionState::Committed;
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct AbortTransaction {}

impl TestOperation for AbortTransaction {
    fn execute_on_session<'a>(
        &'a self,
        entity: &'a mut SessionEntity,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            entity.session_mut(id)?.abort_transaction().await?;
            entity.transaction_state = TransactionState::Aborted;
            entity.pinned_server = None;
            Ok(ResultValue::None)
        }
        .boxed()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct EndSession {}

impl TestOperation for EndSession {
    fn execute_on_session<'a>(
        &'a self,
        entity: &'a mut SessionEntity,
        id: &'a str,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            entity.end(id)?;
            entity.pinned_server = None;
            Ok(ResultValue::None)
        }
        .boxed()
    }
}
