//! Operation decoding and dispatch.
//!
//! Each operation variant is a plain struct declaring exactly the argument
//! keys it accepts (`deny_unknown_fields` turns anything else into an
//! `UnsupportedArgument` error at decode time) and implementing the
//! execution methods for the entity kinds it supports. The dispatcher looks
//! the variant up by name, resolves the target entity and the optional
//! session, runs the matching method, and converts driver failures into an
//! error-valued result for the verification step.

mod admin;
mod crud;
mod list;
mod query;
mod session;
mod test_runner;

use futures::{future::BoxFuture, FutureExt};
use mongodb::{
    bson::{Bson, Deserializer as BsonDeserializer, Document},
    error::{Error as DriverError, ErrorKind},
    ClientSession,
    Collection,
    Database,
};
use serde::de::DeserializeOwned;

use crate::{
    context::TestContext,
    entity::{ClientEntity, EntityKind, SessionEntity, TransactionState},
    error::{Error, Result},
    events::CommandEventBuffer,
    matcher::verify_outcome,
    registry::EntityRegistry,
    results::ResultValue,
    test_file::{ExpectedOutcome, OperationDescription, OperationTarget},
};

use admin::{CreateCollection, CreateIndex, Drop, DropCollection, RunCommand};
use crud::{
    DeleteMany,
    DeleteOne,
    FindOneAndDelete,
    FindOneAndReplace,
    FindOneAndUpdate,
    InsertMany,
    InsertOne,
    ReplaceOne,
    UpdateMany,
    UpdateOne,
};
use list::{
    ListCollectionNames,
    ListCollections,
    ListDatabaseNames,
    ListDatabases,
    ListIndexNames,
    ListIndexes,
};
use query::{Aggregate, CountDocuments, Distinct, EstimatedDocumentCount, Find, FindOne};
use session::{AbortTransaction, CommitTransaction, EndSession, StartTransaction};
use test_runner::{
    AssertCollectionExists,
    AssertCollectionNotExists,
    AssertDifferentLsidOnLastTwoCommands,
    AssertIndexExists,
    AssertIndexNotExists,
    AssertSameLsidOnLastTwoCommands,
    AssertSessionDirty,
    AssertSessionNotDirty,
    AssertSessionPinned,
    AssertSessionTransactionState,
    AssertSessionUnpinned,
    FailPointCommand,
    RunOnThread,
    TargetedFailPoint,
    WaitForThread,
};

/// Behavior shared by every operation variant. Default methods report the
/// enumerated "not supported for this target" outcome; the dispatcher fills
/// in the operation name before surfacing it.
pub(crate) trait TestOperation: std::fmt::Debug + Send + Sync {
    fn execute_on_collection<'a>(
        &'a self,
        _collection: &'a Collection<Document>,
        _session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        unsupported(EntityKind::Collection)
    }

    fn execute_on_database<'a>(
        &'a self,
        _database: &'a Database,
        _session: Option<&'a mut ClientSession>,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        unsupported(EntityKind::Database)
    }

    fn execute_on_client<'a>(
        &'a self,
        _client: &'a ClientEntity,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        unsupported(EntityKind::Client)
    }

    fn execute_on_session<'a>(
        &'a self,
        _session: &'a mut SessionEntity,
        _id: &'a str,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        unsupported(EntityKind::Session)
    }

    fn execute_on_test_runner<'a>(
        &'a self,
        _ctx: &'a TestContext,
    ) -> BoxFuture<'a, Result<ResultValue>> {
        unsupported(EntityKind::TestRunner)
    }

    /// The session entity named by this operation's `session` argument.
    fn session_argument(&self) -> Option<&str> {
        None
    }
}

fn unsupported<'a>(target: EntityKind) -> BoxFuture<'a, Result<ResultValue>> {
    futures::future::ready(Err(Error::unsupported_target(String::new(), target))).boxed()
}

/// A decoded operation plus its expectations.
#[derive(Debug)]
pub struct Operation {
    operation: Box<dyn TestOperation>,
    pub name: String,
    pub object: OperationTarget,
    pub expected_result: Option<ExpectedOutcome>,
    pub declared_error: Option<bool>,
}

fn decode_arguments<T>(name: &str, arguments: Document) -> Result<Box<dyn TestOperation>>
where
    T: TestOperation + DeserializeOwned + 'static,
{
    T::deserialize(BsonDeserializer::new(Bson::Document(arguments)))
        .map(|op| Box::new(op) as Box<dyn TestOperation>)
        .map_err(|e| Error::unsupported_argument(name, e))
}

impl Operation {
    /// Decodes a declarative description into an executable operation.
    /// Unknown names and undeclared arguments fail here, before anything
    /// touches the server.
    pub fn decode(description: &OperationDescription) -> Result<Operation> {
        let name = description.name.as_str();
        let arguments = description.arguments.clone();
        let operation = match name {
            "insertOne" => decode_arguments::<InsertOne>(name, arguments),
            "insertMany" => decode_arguments::<InsertMany>(name, arguments),
            "updateOne" => decode_arguments::<UpdateOne>(name, arguments),
            "updateMany" => decode_arguments::<UpdateMany>(name, arguments),
            "deleteOne" => decode_arguments::<DeleteOne>(name, arguments),
            "deleteMany" => decode_arguments::<DeleteMany>(name, arguments),
            "replaceOne" => decode_arguments::<ReplaceOne>(name, arguments),
            "findOneAndUpdate" => decode_arguments::<FindOneAndUpdate>(name, arguments),
            "findOneAndReplace" => decode_arguments::<FindOneAndReplace>(name, arguments),
            "findOneAndDelete" => decode_arguments::<FindOneAndDelete>(name, arguments),
            "find" => decode_arguments::<Find>(name, arguments),
            "findOne" => decode_arguments::<FindOne>(name, arguments),
            "aggregate" => decode_arguments::<Aggregate>(name, arguments),
            "distinct" => decode_arguments::<Distinct>(name, arguments),
            "countDocuments" => decode_arguments::<CountDocuments>(name, arguments),
            "estimatedDocumentCount" => decode_arguments::<EstimatedDocumentCount>(name, arguments),
            "listDatabases" => decode_arguments::<ListDatabases>(name, arguments),
            "listDatabaseNames" => decode_arguments::<ListDatabaseNames>(name, arguments),
            "listCollections" => decode_arguments::<ListCollections>(name, arguments),
            "listCollectionNames" => decode_arguments::<ListCollectionNames>(name, arguments),
            "listIndexes" => decode_arguments::<ListIndexes>(name, arguments),
            "listIndexNames" => decode_arguments::<ListIndexNames>(name, arguments),
            "runCommand" => decode_arguments::<RunCommand>(name, arguments),
            "createCollection" => decode_arguments::<CreateCollection>(name, arguments),
            "dropCollection" => decode_arguments::<DropCollection>(name, arguments),
            "createIndex" => decode_arguments::<CreateIndex>(name, arguments),
            "drop" => decode_arguments::<Drop>(name, arguments),
            "startTransaction" => decode_arguments::<StartTransaction>(name, arguments),
            "commitTransaction" => decode_arguments::<CommitTransaction>(name, arguments),
            "abortTransaction" => decode_arguments::<AbortTransaction>(name, arguments),
            "endSession" => decode_arguments::<EndSession>(name, arguments),
            "failPoint" => decode_arguments::<FailPointCommand>(name, arguments),
            "targetedFailPoint" => decode_arguments::<TargetedFailPoint>(name, arguments),
            "assertSessionPinned" => decode_arguments::<AssertSessionPinned>(name, arguments),
            "assertSessionUnpinned" => decode_arguments::<AssertSessionUnpinned>(name, arguments),
            "assertSessionDirty" => decode_arguments::<AssertSessionDirty>(name, arguments),
            "assertSessionNotDirty" => decode_arguments::<AssertSessionNotDirty>(name, arguments),
            "assertSessionTransactionState" => {
                decode_arguments::<AssertSessionTransactionState>(name, arguments)
            }
            "assertSameLsidOnLastTwoCommands" => {
                decode_arguments::<AssertSameLsidOnLastTwoCommands>(name, arguments)
            }
            "assertDifferentLsidOnLastTwoCommands" => {
                decode_arguments::<AssertDifferentLsidOnLastTwoCommands>(name, arguments)
            }
            "assertCollectionExists" => decode_arguments::<AssertCollectionExists>(name, arguments),
            "assertCollectionNotExists" => {
                decode_arguments::<AssertCollectionNotExists>(name, arguments)
            }
            "assertIndexExists" => decode_arguments::<AssertIndexExists>(name, arguments),
            "assertIndexNotExists" => decode_arguments::<AssertIndexNotExists>(name, arguments),
            "runOnThread" => decode_arguments::<RunOnThread>(name, arguments),
            "waitForThread" => decode_arguments::<WaitForThread>(name, arguments),
            _ => Err(Error::UnknownOperation {
                name: name.to_string(),
            }),
        }?;

        Ok(Operation {
            operation,
            name: description.name.clone(),
            object: description.object.clone(),
            expected_result: description.result.clone(),
            declared_error: description.error,
        })
    }

    /// Executes the operation against its resolved target and returns the
    /// outcome as a value. Driver failures land in the `Error` arm of the
    /// result; interpreter-integrity failures abort with `Err`.
    pub async fn execute(&self, ctx: &TestContext) -> Result<ResultValue> {
        let outcome = self.dispatch(ctx).await;
        match outcome {
            Ok(value) => Ok(value),
            Err(Error::Driver(error)) => Ok(ResultValue::from(error)),
            Err(other) => Err(other.with_operation_name(&self.name)),
        }
    }

    async fn dispatch(&self, ctx: &TestContext) -> Result<ResultValue> {
        let entity_id = match &self.object {
            OperationTarget::TestRunner => {
                return self.operation.execute_on_test_runner(ctx).await;
            }
            OperationTarget::Entity(id) => id.as_str(),
        };

        let kind = ctx.registry.read().await.resolve(entity_id)?.kind();
        match kind {
            EntityKind::Collection => {
                let collection = ctx.registry.read().await.collection(entity_id)?.clone();
                match self.operation.session_argument().map(str::to_string) {
                    None => {
                        self.operation
                            .execute_on_collection(&collection, None)
                            .await
                    }
                    Some(session_id) => {
                        let mut registry = ctx.registry.write().await;
                        let events = session_client_events(&registry, &session_id)?;
                        let entity = registry.session_mut(&session_id)?;
                        let result = self
                            .operation
                            .execute_on_collection(
                                &collection,
                                Some(entity.session_mut(&session_id)?),
                            )
                            .await;
                        note_session_operation(entity, &events, &result);
                        result
                    }
                }
            }
            EntityKind::Database => {
                let database = ctx.registry.read().await.database(entity_id)?.clone();
                match self.operation.session_argument().map(str::to_string) {
                    None => self.operation.execute_on_database(&database, None).await,
                    Some(session_id) => {
                        let mut registry = ctx.registry.write().await;
                        let events = session_client_events(&registry, &session_id)?;
                        let entity = registry.session_mut(&session_id)?;
                        let result = self
                            .operation
                            .execute_on_database(&database, Some(entity.session_mut(&session_id)?))
                            .await;
                        note_session_operation(entity, &events, &result);
                        result
                    }
                }
            }
            EntityKind::Client => {
                let client = ctx.registry.read().await.client(entity_id)?.clone();
                self.operation.execute_on_client(&client).await
            }
            EntityKind::Session => {
                let mut registry = ctx.registry.write().await;
                let session = registry.session_mut(entity_id)?;
                self.operation.execute_on_session(session, entity_id).await
            }
            other => Err(Error::unsupported_target(self.name.clone(), other)),
        }
    }

    /// Compares the outcome against this operation's expectations.
    pub fn verify(
        &self,
        value: &ResultValue,
        entities: Option<&EntityRegistry>,
    ) -> std::result::Result<(), String> {
        verify_outcome(
            value,
            self.declared_error,
            self.expected_result.as_ref(),
            entities,
        )
    }
}

fn session_client_events(
    registry: &EntityRegistry,
    session_id: &str,
) -> Result<CommandEventBuffer> {
    let client_id = registry.session(session_id)?.client_id.clone();
    Ok(registry.client(&client_id)?.events().clone())
}

/// Cross-cutting session-state bookkeeping: a transaction moves from
/// starting to in-progress on the first operation that completes through
/// the session (pinning the session to the server that saw the command),
/// and a network failure marks the session dirty.
fn note_session_operation(
    entity: &mut SessionEntity,
    events: &CommandEventBuffer,
    result: &Result<ResultValue>,
) {
    match result {
        Ok(_) => {
            if entity.transaction_state == TransactionState::Starting {
                entity.transaction_state = TransactionState::InProgress;
                entity.pinned_server = events.last_started_address();
            }
        }
        Err(Error::Driver(error)) => {
            if is_network_error(error) {
                entity.dirty = true;
            }
        }
        Err(_) => {}
    }
}

fn is_network_error(error: &DriverError) -> bool {
    matches!(*error.kind, ErrorKind::Io(_))
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{doc, from_document, Document};

    use super::Operation;
    use crate::{error::Error, test_file::OperationDescription};

    fn description(doc: Document) -> OperationDescription {
        from_document(doc).unwrap()
    }

    #[test]
    fn unknown_operation_name_is_rejected() {
        let result = Operation::decode(&description(doc! {
            "name": "mapReduce",
            "object": "coll0",
        }));
        match result {
            Err(Error::UnknownOperation { name }) => assert_eq!(name, "mapReduce"),
            other => panic!("expected UnknownOperation, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn undeclared_argument_is_rejected_at_decode_time() {
        let result = Operation::decode(&description(doc! {
            "name": "insertOne",
            "object": "coll0",
            "arguments": { "document": { "x": 1 }, "bogusOption": true },
        }));
        match result {
            Err(Error::UnsupportedArgument { operation, message }) => {
                assert_eq!(operation, "insertOne");
                assert!(message.contains("bogusOption"), "message: {}", message);
            }
            other => panic!("expected UnsupportedArgument, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn declared_arguments_decode() {
        let operation = Operation::decode(&description(doc! {
            "name": "find",
            "object": "coll0",
            "arguments": {
                "filter": { "x": { "$gt": 1 } },
                "sort": { "x": 1 },
                "limit": 2_i64,
                "session": "session0",
            },
        }))
        .unwrap();
        assert_eq!(operation.name, "find");
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let result = Operation::decode(&description(doc! {
            "name": "insertOne",
            "object": "coll0",
        }));
        assert!(matches!(result, Err(Error::UnsupportedArgument { .. })));
    }

    #[test]
    fn thread_operations_nest_a_full_description() {
        let operation = Operation::decode(&description(doc! {
            "name": "runOnThread",
            "object": "testRunner",
            "arguments": {
                "thread": "thread0",
                "operation": {
                    "name": "insertOne",
                    "object": "coll0",
                    "arguments": { "document": { "x": 1 } },
                },
            },
        }))
        .unwrap();
        assert_eq!(operation.name, "runOnThread");
    }

    #[test]
    fn transaction_state_argument_decodes() {
        let operation = Operation::decode(&description(doc! {
            "name": "assertSessionTransactionState",
            "object": "testRunner",
            "arguments": { "session": "session0", "state": "in_progress" },
        }))
        .unwrap();
        assert_eq!(operation.name, "assertSessionTransactionState");
    }
}
