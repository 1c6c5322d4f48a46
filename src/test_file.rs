//! The declarative test vocabulary.
//!
//! These types are the parsed form of a conformance test file: entity
//! specifications, operation descriptions, and expectations. File discovery
//! and deserialization format (JSON/YAML) are the caller's concern; the
//! interpreter only consumes the structures.

use mongodb::{
    bson::{Bson, Document},
    options::{
        ClientOptions,
        CollectionOptions,
        DatabaseOptions,
        ReadConcern,
        ReadPreference,
        SelectionCriteria,
        SessionOptions,
        WriteConcern,
    },
};
use semver::{Version, VersionReq};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestFile {
    #[serde(deserialize_with = "deserialize_schema_version")]
    pub schema_version: Version,
    pub description: Option<String>,
    pub run_on: Option<Vec<RunOn>>,
    pub create_entities: Option<Vec<EntitySpec>>,
    pub initial_data: Option<Vec<CollectionData>>,
    pub tests: Vec<TestCase>,
}

fn deserialize_schema_version<'de, D>(deserializer: D) -> std::result::Result<Version, D::Error>
where
    D: Deserializer<'de>,
{
    let schema_version = String::deserialize(deserializer)?;
    Version::parse(&schema_version).map_err(|e| serde::de::Error::custom(format!("{}", e)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub description: String,
    pub run_on: Option<Vec<RunOn>>,
    pub skip_reason: Option<String>,
    pub operations: Vec<OperationDescription>,
}

/// A precondition on the deployment a test may run against.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOn {
    pub min_server_version: Option<String>,
    pub max_server_version: Option<String>,
    pub topology: Option<Vec<String>>,
}

impl RunOn {
    pub fn can_run_on(&self, server_version: &Version, topology: &str) -> bool {
        if let Some(ref min_version) = self.min_server_version {
            let req = VersionReq::parse(&format!(">= {}", &min_version)).unwrap();
            if !req.matches(server_version) {
                return false;
            }
        }
        if let Some(ref max_version) = self.max_server_version {
            let req = VersionReq::parse(&format!("<= {}", &max_version)).unwrap();
            if !req.matches(server_version) {
                return false;
            }
        }
        if let Some(ref topologies) = self.topology {
            if !topologies.iter().any(|t| t == topology) {
                return false;
            }
        }
        true
    }
}

/// A declarative entity to create during test setup.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntitySpec {
    Client(ClientSpec),
    Database(DatabaseSpec),
    Collection(CollectionSpec),
    Session(SessionSpec),
    Bucket(BucketSpec),
    Thread(ThreadSpec),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSpec {
    pub id: String,
    /// Connection string overriding the harness-level URI.
    pub uri: Option<String>,
    /// Options layered over the parsed connection string.
    pub uri_options: Option<ClientOptions>,
    pub ignore_command_monitoring_events: Option<Vec<String>>,
    pub use_multiple_mongoses: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    pub id: String,
    pub client: String,
    pub database_name: String,
    pub database_options: Option<CollectionOrDatabaseOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSpec {
    pub id: String,
    pub database: String,
    pub collection_name: String,
    pub collection_options: Option<CollectionOrDatabaseOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpec {
    pub id: String,
    pub client: String,
    pub session_options: Option<SessionOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    pub id: String,
    pub database: String,
    pub bucket_options: Option<Document>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSpec {
    pub id: String,
}

/// The read/write configuration a database or collection entity may carry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionOrDatabaseOptions {
    pub read_concern: Option<ReadConcern>,
    pub read_preference: Option<ReadPreference>,
    pub write_concern: Option<WriteConcern>,
}

impl CollectionOrDatabaseOptions {
    pub fn as_database_options(&self) -> DatabaseOptions {
        let selection_criteria = self
            .read_preference
            .clone()
            .map(SelectionCriteria::ReadPreference);
        DatabaseOptions::builder()
            .read_concern(self.read_concern.clone())
            .selection_criteria(selection_criteria)
            .write_concern(self.write_concern.clone())
            .build()
    }

    pub fn as_collection_options(&self) -> CollectionOptions {
        let selection_criteria = self
            .read_preference
            .clone()
            .map(SelectionCriteria::ReadPreference);
        CollectionOptions::builder()
            .read_concern(self.read_concern.clone())
            .selection_criteria(selection_criteria)
            .write_concern(self.write_concern.clone())
            .build()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionData {
    pub collection_name: String,
    pub database_name: String,
    pub documents: Vec<Document>,
}

/// One step of a test: an operation, its target, and what to expect back.
/// Immutable once parsed.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescription {
    pub name: String,
    pub object: OperationTarget,
    #[serde(default)]
    pub arguments: Document,
    pub result: Option<ExpectedOutcome>,
    pub error: Option<bool>,
}

/// What an operation runs against: a registered entity, or the test-runner
/// context itself.
#[derive(Clone, Debug)]
pub enum OperationTarget {
    TestRunner,
    Entity(String),
}

impl<'de> Deserialize<'de> for OperationTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let object = String::deserialize(deserializer)?;
        if object.as_str() == "testRunner" {
            Ok(OperationTarget::TestRunner)
        } else {
            Ok(OperationTarget::Entity(object))
        }
    }
}

/// An expected outcome: either an error shape or a success pattern. The
/// error arm is tried first and rejects documents with any other keys, so a
/// plain result pattern always lands in `Value`.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ExpectedOutcome {
    Error(ExpectedError),
    Value(Bson),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExpectedError {
    pub error_contains: Option<String>,
    pub error_code_name: Option<String>,
    pub error_labels_contain: Option<Vec<String>>,
    pub error_labels_omit: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use mongodb::bson::from_document;

    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn error_shape_and_value_patterns_disambiguate() {
        let description: OperationDescription = from_document(doc! {
            "name": "insertOne",
            "object": "coll0",
            "arguments": { "document": { "x": 1 } },
            "result": { "errorContains": "duplicate" },
        })
        .unwrap();
        assert!(matches!(
            description.result,
            Some(ExpectedOutcome::Error(_))
        ));

        let description: OperationDescription = from_document(doc! {
            "name": "insertOne",
            "object": "coll0",
            "arguments": { "document": { "x": 1 } },
            "result": { "insertedId": { "$$exists": true } },
        })
        .unwrap();
        assert!(matches!(
            description.result,
            Some(ExpectedOutcome::Value(_))
        ));
    }

    #[test]
    fn test_runner_target_is_distinguished_from_entity_ids() {
        let description: OperationDescription = from_document(doc! {
            "name": "assertSessionPinned",
            "object": "testRunner",
            "arguments": { "session": "session0" },
        })
        .unwrap();
        assert!(matches!(description.object, OperationTarget::TestRunner));

        let description: OperationDescription = from_document(doc! {
            "name": "find",
            "object": "coll0",
        })
        .unwrap();
        match description.object {
            OperationTarget::Entity(id) => assert_eq!(id, "coll0"),
            OperationTarget::TestRunner => panic!("expected entity target"),
        }
    }

    #[test]
    fn run_on_requirements_gate_version_and_topology() {
        let run_on = RunOn {
            min_server_version: Some("4.0".to_string()),
            max_server_version: None,
            topology: Some(vec!["replicaset".to_string(), "sharded".to_string()]),
        };
        let version = Version::new(4, 2, 0);
        assert!(run_on.can_run_on(&version, "sharded"));
        assert!(!run_on.can_run_on(&version, "single"));
        assert!(!run_on.can_run_on(&Version::new(3, 6, 0), "sharded"));

        let bounded = RunOn {
            min_server_version: None,
            max_server_version: Some("4.0".to_string()),
            topology: None,
        };
        assert!(bounded.can_run_on(&Version::new(3, 6, 0), "single"));
        assert!(!bounded.can_run_on(&Version::new(4, 2, 0), "single"));
    }
}
