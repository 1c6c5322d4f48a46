//! Read operations: queries, aggregations, and counts.

use futures::{future::BoxFuture, FutureExt, TryStreamExt};
use mongodb::{
    bson::Document,
    options::{
        AggregateOptions,
        CountOptions,
        DistinctOptions,
        EstimatedDocumentCountOptions,
        FindOneOptions,
        FindOptions,
    },
    ClientSession,
    Collection,
    Database,
};
use serde::Deserialize;

use crate::{error::Result, operation::TestOperation, results::ResultValue};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct Find {
    filter: Option<Document>,
    session: Option<String>,
    sort: Option<Document>,
    projection: Option<Document>,
    limit: Option<i64>,
    skip: Option<u64>,
    batch_size: Option<u32>,
}

impl TestOperation for Find {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = FindOptions::builder()
                .sort(self.sort.clone())
                .projection(self.projection.clone())
                .limit(self.limit)
                .skip(self.skip)
                .batch_size(self.batch_size)
                .build();
            let result = match session {
                Some(session) => {
                    let mut cursor = collection
                        .find_with_session(self.filter.clone(), options, session)
                        .await?;
                    cursor
                        .stream(session)
                        .try_collect::<Vec<Document>>()
                        .await?
                }
                None => {
                    let cursor = collection.find(self.filter.clone(), options).await?;
                    cursor.try_collect::<Vec<Document>>().await?
                }
            };
            Ok(ResultValue::from(result))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct FindOne {
    filter: Option<Document>,
    session: Option<String>,
    sort: Option<Document>,
    projection: Option<Document>,
}

impl TestOperation for FindOne {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = FindOneOptions::builder()
                .sort(self.sort.clone())
                .projection(self.projection.clone())
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .find_one_with_session(self.filter.clone(), options, session)
                        .await?
                }
                None => collection.find_one(self.filter.clone(), options).await?,
            };
            Ok(ResultValue::from(result))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct Aggregate {
    pipeline: Vec<Document>,
    session: Option<String>,
    batch_size: Option<u32>,
    allow_disk_use: Option<bool>,
}

impl Aggregate {
    fn options(&self) -> AggregateOptions {
        AggregateOptions::builder()
            .batch_size(self.batch_size)
            .allow_disk_use(self.allow_disk_use)
            .build()
    }
}

impl TestOperation for Aggregate {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let result = match session {
                Some(session) => {
                    let mut cursor = collection
                        .aggregate_with_session(self.pipeline.clone(), self.options(), session)
                        .await?;
                    cursor
                        .stream(session)
                        .try_collect::<Vec<Document>>()
                        .await?
                }
                None => {
                    let cursor = collection
                        .aggregate(self.pipeline.clone(), self.options())
                        .await?;
                    cursor.try_collect::<Vec<Document>>().await?
                }
            };
            Ok(ResultValue::from(result))
        }
        .boxed()
    }

    fn execute_on_database<'a>(
        &'a self,
        database: &'a Database,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let result = match session {
                Some(session) => {
                    let mut cursor = database
                        .aggregate_with_session(self.pipeline.clone(), self.options(), session)
                        .await?;
                    cursor
                        .stream(session)
                        .try_collect::<Vec<Document>>()
                        .await?
                }
                None => {
                    let cursor = database
                        .aggregate(self.pipeline.clone(), self.options())
                        .await?;
                    cursor.try_collect::<Vec<Document>>().await?
                }
            };
            Ok(ResultValue::from(result))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct Distinct {
    field_name: String,
    filter: Option<Document>,
    session: Option<String>,
}

impl TestOperation for Distinct {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = DistinctOptions::builder().build();
            let result = match session {
                Some(session) => {
                    collection
                        .distinct_with_session(
                            &self.field_name,
                            self.filter.clone(),
                            options,
                            session,
                        )
                        .await?
                }
                None => {
                    collection
                        .distinct(&self.field_name, self.filter.clone(), options)
                        .await?
                }
            };
            Ok(ResultValue::Array(result))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct CountDocuments {
    filter: Option<Document>,
    session: Option<String>,
    skip: Option<u64>,
    limit: Option<u64>,
}

impl TestOperation for CountDocuments {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = CountOptions::builder()
                .skip(self.skip)
                .limit(self.limit)
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .count_documents_with_session(self.filter.clone(), options, session)
                        .await?
                }
                None => {
                    collection
                        .count_documents(self.filter.clone(), options)
                        .await?
                }
            };
            Ok(ResultValue::from(result))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct EstimatedDocumentCount {
    #[serde(rename = "maxTimeMS")]
    max_time_ms: Option<u64>,
}

impl TestOperation for EstimatedDocumentCount {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        _session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = EstimatedDocumentCountOptions::builder()
                .max_time(self.max_time_ms.map(std::time::Duration::from_millis))
                .build();
            let result = collection.estimated_document_count(options).await?;
            Ok(ResultValue::from(result))
        }
        .boxed()
    }
}
