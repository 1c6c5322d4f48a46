//! Listing operations for databases, collections, and indexes.

use futures::{future::BoxFuture, FutureExt, TryStreamExt};
use mongodb::{
    bson::{to_bson, Bson, Document},
    error::Error as DriverError,
    options::{ListCollectionsOptions, ListDatabasesOptions, ListIndexesOptions},
    ClientSession,
    Collection,
    Database,
};
use serde::Deserialize;

use crate::{
    entity::ClientEntity,
    error::Result,
    operation::TestOperation,
    results::ResultValue,
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ListDatabases {
    filter: Option<Document>,
}

impl TestOperation for ListDatabases {
    fn execute_on_client<'a>(
        &'a self,
        client: &'a ClientEntity,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = ListDatabasesOptions::builder().build();
            let result = client.list_databases(self.filter.clone(), options).await?;
            let value = to_bson(&result).map_err(DriverError::from)?;
            Ok(ResultValue::from_bson(value))
        }
        .boxed()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ListDatabaseNames {
    filter: Option<Document>,
}

impl TestOperation for ListDatabaseNames {
    fn execute_on_client<'a>(
        &'a self,
        client: &'a ClientEntity,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = ListDatabasesOptions::builder().build();
            let result = client
                .list_database_names(self.filter.clone(), options)
                .await?;
            Ok(ResultValue::Array(
                result.into_iter().map(Bson::String).collect(),
            ))
        }
        .boxed()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ListCollections {
    filter: Option<Document>,
    session: Option<String>,
    batch_size: Option<u32>,
}

impl TestOperation for ListCollections {
    fn execute_on_database<'a>(
        &'a self,
        database: &'a Database,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = ListCollectionsOptions::builder()
                .batch_size(self.batch_size)
                .build();
            let result = match session {
                Some(session) => {
                    let mut cursor = database
                        .list_collections_with_session(self.filter.clone(), options, session)
                        .await?;
                    cursor.stream(session).try_collect::<Vec<_>>().await?
                }
                None => {
                    let cursor = database
                        .list_collections(self.filter.clone(), options)
                        .await?;
                    cursor.try_collect::<Vec<_>>().await?
                }
            };
            let value = to_bson(&result).map_err(DriverError::from)?;
            Ok(ResultValue::from_bson(value))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ListCollectionNames {
    filter: Option<Document>,
    session: Option<String>,
}

impl TestOperation for ListCollectionNames {
    fn execute_on_database<'a>(
        &'a self,
        database: &'a Database,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let result = match session {
                Some(session) => {
                    database
                        .list_collection_names_with_session(self.filter.clone(), session)
                        .await?
                }
                None => database.list_collection_names(self.filter.clone()).await?,
            };
            Ok(ResultValue::Array(
                result.into_iter().map(Bson::String).collect(),
            ))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ListIndexes {
    session: Option<String>,
}

impl TestOperation for ListIndexes {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = ListIndexesOptions::builder().build();
            let result = match session {
                Some(session) => {
                    let mut cursor = collection
                        .list_indexes_with_session(options, session)
                        .await?;
                    cursor.stream(session).try_collect::<Vec<_>>().await?
                }
                None => {
                    let cursor = collection.list_indexes(options).await?;
                    cursor.try_collect::<Vec<_>>().await?
                }
            };
            let value = to_bson(&result).map_err(DriverError::from)?;
            Ok(ResultValue::from_bson(value))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ListIndexNames {
    session: Option<String>,
}

impl TestOperation for ListIndexNames {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let result = match session {
                Some(session) => collection.list_index_names_with_session(session).await?,
                None => collection.list_index_names().await?,
            };
            Ok(ResultValue::Array(
                result.into_iter().map(Bson::String).collect(),
            ))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}
