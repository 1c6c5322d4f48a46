//! Write operations executing against collection entities.

use std::collections::HashMap;

use futures::{future::BoxFuture, FutureExt};
use mongodb::{
    bson::{doc, to_bson, Bson, Document},
    error::Error as DriverError,
    options::{
        Acknowledgment,
        DeleteOptions,
        FindOneAndDeleteOptions,
        FindOneAndReplaceOptions,
        FindOneAndUpdateOptions,
        InsertManyOptions,
        InsertOneOptions,
        ReplaceOptions,
        ReturnDocument,
        UpdateModifications,
        UpdateOptions,
    },
    ClientSession,
    Collection,
};
use serde::Deserialize;

use crate::{
    error::{Error, Result},
    operation::TestOperation,
    results::ResultValue,
};

fn acknowledged(collection: &Collection<Document>) -> bool {
    collection
        .write_concern()
        .map_or(true, |wc| !matches!(wc.w, Some(Acknowledgment::Nodes(0))))
}

/// Serializes a driver write summary into a result value, or reports the
/// write as unacknowledged when the collection's write concern is w:0.
fn write_result<T: serde::Serialize>(
    collection: &Collection<Document>,
    result: T,
) -> Result<ResultValue> {
    if !acknowledged(collection) {
        return Ok(ResultValue::Unacknowledged);
    }
    let value = to_bson(&result).map_err(DriverError::from)?;
    Ok(ResultValue::from_bson(value))
}

fn return_document(value: Option<&str>, operation: &str) -> Result<Option<ReturnDocument>> {
    match value {
        None => Ok(None),
        Some("Before") | Some("before") => Ok(Some(ReturnDocument::Before)),
        Some("After") | Some("after") => Ok(Some(ReturnDocument::After)),
        Some(other) => Err(Error::unsupported_argument(
            operation,
            format!("invalid returnDocument value {:?}", other),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct InsertOne {
    document: Document,
    session: Option<String>,
    bypass_document_validation: Option<bool>,
}

impl TestOperation for InsertOne {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = InsertOneOptions::builder()
                .bypass_document_validation(self.bypass_document_validation)
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .insert_one_with_session(self.document.clone(), options, session)
                        .await?
                }
                None => {
                    collection
                        .insert_one(self.document.clone(), options)
                        .await?
                }
            };
            write_result(collection, result)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct InsertMany {
    documents: Vec<Document>,
    session: Option<String>,
    ordered: Option<bool>,
}

impl TestOperation for InsertMany {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = InsertManyOptions::builder().ordered(self.ordered).build();
            let result = match session {
                Some(session) => {
                    collection
                        .insert_many_with_session(self.documents.clone(), options, session)
                        .await?
                }
                None => {
                    collection
                        .insert_many(self.documents.clone(), options)
                        .await?
                }
            };
            if !acknowledged(collection) {
                return Ok(ResultValue::Unacknowledged);
            }
            let ids: HashMap<String, Bson> = result
                .inserted_ids
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
            let ids = to_bson(&ids).map_err(DriverError::from)?;
            Ok(ResultValue::Document(doc! { "insertedIds": ids }))
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct UpdateOne {
    filter: Document,
    update: UpdateModifications,
    session: Option<String>,
    upsert: Option<bool>,
    array_filters: Option<Vec<Document>>,
}

impl TestOperation for UpdateOne {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = UpdateOptions::builder()
                .upsert(self.upsert)
                .array_filters(self.array_filters.clone())
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .update_one_with_session(
                            self.filter.clone(),
                            self.update.clone(),
                            options,
                            session,
                        )
                        .await?
                }
                None => {
                    collection
                        .update_one(self.filter.clone(), self.update.clone(), options)
                        .await?
                }
            };
            write_result(collection, result)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct UpdateMany {
    filter: Document,
    update: UpdateModifications,
    session: Option<String>,
    upsert: Option<bool>,
    array_filters: Option<Vec<Document>>,
}

impl TestOperation for UpdateMany {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = UpdateOptions::builder()
                .upsert(self.upsert)
                .array_filters(self.array_filters.clone())
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .update_many_with_session(
                            self.filter.clone(),
                            self.update.clone(),
                            options,
                            session,
                        )
                        .await?
                }
                None => {
                    collection
                        .update_many(self.filter.clone(), self.update.clone(), options)
                        .await?
                }
            };
            write_result(collection, result)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct DeleteOne {
    filter: Document,
    session: Option<String>,
}

impl TestOperation for DeleteOne {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = DeleteOptions::builder().build();
            let result = match session {
                Some(session) => {
                    collection
                        .delete_one_with_session(self.filter.clone(), options, session)
                        .await?
                }
                None => collection.delete_one(self.filter.clone(), options).await?,
            };
            write_result(collection, result)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct DeleteMany {
    filter: Document,
    session: Option<String>,
}

impl TestOperation for DeleteMany {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = DeleteOptions::builder().build();
            let result = match session {
                Some(session) => {
                    collection
                        .delete_many_with_session(self.filter.clone(), options, session)
                        .await?
                }
                None => collection.delete_many(self.filter.clone(), options).await?,
            };
            write_result(collection, result)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct ReplaceOne {
    filter: Document,
    replacement: Document,
    session: Option<String>,
    upsert: Option<bool>,
}

impl TestOperation for ReplaceOne {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = ReplaceOptions::builder().upsert(self.upsert).build();
            let result = match session {
                Some(session) => {
                    collection
                        .replace_one_with_session(
                            self.filter.clone(),
                            self.replacement.clone(),
                            options,
                            session,
                        )
                        .await?
                }
                None => {
                    collection
                        .replace_one(self.filter.clone(), self.replacement.clone(), options)
                        .await?
                }
            };
            write_result(collection, result)
        }
        .boxed()
    }

    fn session_argument(&self) -> Option<&str> {
        self.session.as_deref()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct FindOneAndUpdate {
    filter: Document,
    update: UpdateModifications,
    session: Option<String>,
    upsert: Option<bool>,
    return_document: Option<String>,
    sort: Option<Document>,
    projection: Option<Document>,
}

impl TestOperation for FindOneAndUpdate {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = FindOneAndUpdateOptions::builder()
                .upsert(self.upsert)
                .return_document(return_document(
                    self.return_document.as_deref(),
                    "findOneAndUpdate",
                )?)
                .sort(self.sort.clone())
                .projection(self.projection.clone())
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .find_one_and_update_with_session(
                            self.filter.clone(),
                            self.update.clone(),
                            options,
                            session,
                        )
                        .await?
                }
                None => {
                    collection
                        .find_one_and_update(self.filter.clone(), self.update.clone(), options)
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct FindOneAndReplace {
    filter: Document,
    replacement: Document,
    session: Option<String>,
    upsert: Option<bool>,
    return_document: Option<String>,
}

impl TestOperation for FindOneAndReplace {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = FindOneAndReplaceOptions::builder()
                .upsert(self.upsert)
                .return_document(return_document(
                    self.return_document.as_deref(),
                    "findOneAndReplace",
                )?)
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .find_one_and_replace_with_session(
                            self.filter.clone(),
                            self.replacement.clone(),
                            options,
                            session,
                        )
                        .await?
                }
                None => {
                    collection
                        .find_one_and_replace(
                            self.filter.clone(),
                            self.replacement.clone(),
                            options,
                        )
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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(super) struct FindOneAndDelete {
    filter: Document,
    session: Option<String>,
    sort: Option<Document>,
}

impl TestOperation for FindOneAndDelete {
    fn execute_on_collection<'a>(
        &'a self,
        collection: &'a Collection<Document>,
        session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        async move {
            let options = FindOneAndDeleteOptions::builder()
                .sort(self.sort.clone())
                .build();
            let result = match session {
                Some(session) => {
                    collection
                        .find_one_and_delete_with_session(self.filter.clone(), options, session)
                        .await?
                }
                None => {
                    collection
                        .find_one_and_delete(self.filter.clone(), options)
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
