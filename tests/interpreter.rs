//! Interpreter-level tests that exercise the declarative vocabulary without
//! a live deployment: test-file parsing, operation decoding, and outcome
//! verification.

use mongodb::bson::{doc, from_document};
use mongodb_conformance::{
    results_match,
    test_file::{EntitySpec, ExpectedOutcome, OperationDescription, TestFile},
    Error,
    ErrorOutcome,
    Operation,
    ResultValue,
};
use pretty_assertions::assert_eq;

fn sample_test_file() -> TestFile {
    let json = serde_json::json!({
        "schemaVersion": "1.0.0",
        "description": "insert and verify",
        "runOn": [
            { "minServerVersion": "4.0", "topology": ["replicaset"] }
        ],
        "createEntities": [
            { "client": { "id": "client0" } },
            { "database": { "id": "db0", "client": "client0", "databaseName": "conformance" } },
            {
                "collection": {
                    "id": "coll0",
                    "database": "db0",
                    "collectionName": "coll",
                    "collectionOptions": { "writeConcern": { "w": "majority" } }
                }
            },
            { "session": { "id": "session0", "client": "client0" } }
        ],
        "initialData": [
            {
                "databaseName": "conformance",
                "collectionName": "coll",
                "documents": [{ "_id": 1, "x": 11 }]
            }
        ],
        "tests": [
            {
                "description": "insertOne returns the inserted id",
                "operations": [
                    {
                        "name": "insertOne",
                        "object": "coll0",
                        "arguments": { "document": { "x": 1 }, "session": "session0" },
                        "result": { "insertedId": { "$$exists": true } }
                    },
                    {
                        "name": "assertSessionNotDirty",
                        "object": "testRunner",
                        "arguments": { "session": "session0" }
                    }
                ]
            }
        ]
    });
    serde_json::from_value(json).unwrap()
}

#[test]
fn full_test_file_parses_and_decodes() {
    let file = sample_test_file();
    assert_eq!(file.schema_version, semver::Version::new(1, 0, 0));
    assert_eq!(file.create_entities.as_ref().unwrap().len(), 4);
    assert!(matches!(
        file.create_entities.as_ref().unwrap()[0],
        EntitySpec::Client(_)
    ));

    let test = &file.tests[0];
    assert_eq!(test.operations.len(), 2);
    for description in &test.operations {
        Operation::decode(description).unwrap();
    }
}

#[test]
fn run_on_requirements_evaluate_against_deployment() {
    let file = sample_test_file();
    let requirements = file.run_on.unwrap();
    let version = semver::Version::new(4, 4, 0);
    assert!(requirements.iter().any(|r| r.can_run_on(&version, "replicaset")));
    assert!(!requirements.iter().any(|r| r.can_run_on(&version, "single")));
}

#[test]
fn declared_error_flag_drives_verification() {
    let description: OperationDescription = from_document(doc! {
        "name": "insertOne",
        "object": "coll0",
        "arguments": { "document": { "x": 1 } },
        "error": true,
    })
    .unwrap();
    let operation = Operation::decode(&description).unwrap();

    let success = ResultValue::Document(doc! { "insertedId": 1 });
    assert!(operation.verify(&success, None).is_err());

    let failure = ResultValue::Error(ErrorOutcome {
        message: "duplicate key".to_string(),
        code: Some(11000),
        code_name: Some("DuplicateKey".to_string()),
        labels: vec![],
        server_side: true,
    });
    assert!(operation.verify(&failure, None).is_ok());
}

#[test]
fn error_shape_expectations_check_each_criterion() {
    let description: OperationDescription = from_document(doc! {
        "name": "commitTransaction",
        "object": "session0",
        "result": {
            "errorLabelsContain": ["RetryableWriteError"],
            "errorLabelsOmit": ["TransientTransactionError"],
        },
    })
    .unwrap();
    let operation = Operation::decode(&description).unwrap();

    let failure = ResultValue::Error(ErrorOutcome {
        message: "commit failed".to_string(),
        code: Some(91),
        code_name: Some("ShutdownInProgress".to_string()),
        labels: vec!["RetryableWriteError".to_string()],
        server_side: true,
    });
    assert!(operation.verify(&failure, None).is_ok());

    let wrong_labels = ResultValue::Error(ErrorOutcome {
        message: "commit failed".to_string(),
        code: Some(251),
        code_name: Some("NoSuchTransaction".to_string()),
        labels: vec!["TransientTransactionError".to_string()],
        server_side: true,
    });
    assert!(operation.verify(&wrong_labels, None).is_err());
}

#[test]
fn open_world_documents_and_closed_world_arrays() {
    let actual = mongodb::bson::bson!({ "ok": 1, "n": 3 });
    assert!(results_match(Some(&actual), &mongodb::bson::bson!({ "ok": 1 }), None).is_ok());

    let actual = mongodb::bson::bson!([{ "x": 1 }, { "x": 2 }]);
    let short = mongodb::bson::bson!([{ "x": 1 }]);
    assert!(results_match(Some(&actual), &short, None).is_err());
}

#[test]
fn expected_outcome_arms_are_distinguished() {
    let description: OperationDescription = from_document(doc! {
        "name": "countDocuments",
        "object": "coll0",
        "arguments": { "filter": {} },
        "result": 2_i64,
    })
    .unwrap();
    assert!(matches!(description.result, Some(ExpectedOutcome::Value(_))));
    let operation = Operation::decode(&description).unwrap();

    // Width-insensitive: the driver returns a u64 count surfaced as Int64.
    assert!(operation.verify(&ResultValue::Scalar(2_i32.into()), None).is_ok());
    assert!(operation
        .verify(&ResultValue::Scalar(3_i32.into()), None)
        .is_err());
}

#[test]
fn integrity_errors_are_not_expectable() {
    let unknown = Error::UnknownOperation {
        name: "mapReduce".to_string(),
    };
    assert!(!unknown.is_expectable());
}

#[tokio::test]
async fn integrity_errors_abort_the_step() {
    let options = mongodb::options::ClientOptions::parse("mongodb://localhost:27017")
        .await
        .unwrap();
    let ctx = mongodb_conformance::TestContext::new(options, "integrity").unwrap();

    let unknown_op: OperationDescription = from_document(doc! {
        "name": "mapReduce",
        "object": "coll0",
    })
    .unwrap();
    assert!(matches!(
        ctx.run_operation(&unknown_op).await,
        Err(Error::UnknownOperation { .. })
    ));

    let unknown_entity: OperationDescription = from_document(doc! {
        "name": "insertOne",
        "object": "coll0",
        "arguments": { "document": { "x": 1 } },
    })
    .unwrap();
    assert!(matches!(
        ctx.run_operation(&unknown_entity).await,
        Err(Error::UnknownEntity { .. })
    ));

    ctx.teardown().await;
}

#[tokio::test]
async fn unsupported_targets_name_the_operation_and_kind() {
    let options = mongodb::options::ClientOptions::parse("mongodb://localhost:27017")
        .await
        .unwrap();
    let ctx = mongodb_conformance::TestContext::new(options, "dispatch").unwrap();
    let specs = vec![serde_json::from_value::<EntitySpec>(serde_json::json!({
        "thread": { "id": "thread0" }
    }))
    .unwrap()];
    ctx.load_entities(&specs).await.unwrap();

    // insertOne has no execution method for a thread entity.
    let description: OperationDescription = from_document(doc! {
        "name": "insertOne",
        "object": "thread0",
        "arguments": { "document": { "x": 1 } },
    })
    .unwrap();
    match ctx.run_operation(&description).await {
        Err(Error::UnsupportedTarget { operation, target }) => {
            assert_eq!(operation, "insertOne");
            assert_eq!(target, mongodb_conformance::EntityKind::Thread);
        }
        other => panic!("expected UnsupportedTarget, got {:?}", other.map(|_| ())),
    }

    ctx.teardown().await;
}
