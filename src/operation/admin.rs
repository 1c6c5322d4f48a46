//! Database administration operations.

use futures::{future::BoxFuture, FutureExt};
use mongodb::{
    bson::Document,
    options::{IndexOptions, ReadPreference, SelectionCriteria},
    ClientSession,
    Collection,
    Database,
    IndexModel,
};
use serde::Deserialize;

use crate::{error::Result, operation::TestOperation, results::ResultValue};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct RunCommand {
    command: Document,
    session: Option<String>,
    read_preference: Option<ReadPreference>,
}

impl TestOperation for RunCommand {
    fn execute_on_database<'a>(
        &'a self,
        database: &'a Database,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let selection_criteria = self
                .read_preference
                .clone()
                .map(SelectionCriteria::ReadPreference);
            let result = match session {
                Some(session) => {
                    database
                        .run_command_with_session(
                            self.command.clone(),
                            selection_criteria,
                            session,
                        )
                        .await?
                }
                None => {
                    database
                        .run_command(self.command.clone(), selection_criteria)
                        .await?
                }
            };
            Ok(ResultValue::Document(result))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct CreateCollection {
    collection: String,
    session: Option<String>,
}

impl TestOperation for CreateCollection {
    fn execute_on_database<'a>(
        &'a self,
        database: &'a Database,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            match session {
                Some(session) => {
                    database
                        .create_collection_with_session(&self.collection, None, session)
                        .await?
                }
                None => database.create_collection(&self.collection, None).await?,
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct DropCollection {
    collection: String,
    session: Option<String>,
}

impl TestOperation for DropCollection {
    fn execute_on_database<'a>(
        &'a self,
        database: &'a Database,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let collection = database.collection::<Document>(&self.collection);
            match session {
                Some(session) => collection.drop_with_session(None, session).await?,
                None => collection.drop(None).await?,
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct CreateIndex {
    keys: Document,
    name: Option<String>,
    session: Option<String>,
}

impl TestOperation for CreateIndex {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = IndexOptions::builder().name(self.name.clone()).build();
            let index = IndexModel::builder()
                .keys(self.keys.clone())
                .options(options)
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .create_index_with_session(index, None, session)
                        .await?
                }
                None => collection.create_index(index, None).await?,
            };
            Ok(ResultValue::Scalar(result.index_name.into()))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

/// The argument-free `drop` operation on a collection entity.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct Drop {
    session: Option<String>,
}

impl TestOperation for Drop {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            match session {
                Some(session) => collection.drop_with_session(None, session).await?,
                None => collection.drop(None).await?,
            }
            Ok(ResultValue::None)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}
