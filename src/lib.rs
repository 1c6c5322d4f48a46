//! An interpreter for declarative MongoDB driver conformance tests.
//!
//! A conformance test describes a sequence of driver operations, the
//! results they should produce, and the side effects they should have:
//! command-monitoring events, session and transaction state, and
//! server-side fail points. This crate executes those descriptions against
//! a live deployment through the [`mongodb`] driver and verifies observed
//! behavior against the declared expectations.
//!
//! The pieces:
//!
//! * [`registry::EntityRegistry`] resolves string identifiers to live
//!   handles (clients, databases, collections, sessions, buckets).
//! * [`operation`] decodes an operation name plus argument bag into one of
//!   the typed operation variants and dispatches it to the right kind of
//!   target.
//! * [`matcher`] structurally compares outcomes against expected patterns,
//!   including placeholders and error shapes.
//! * [`fail_point`] installs server-side fault injection and guarantees
//!   best-effort cleanup at teardown.
//! * [`context::TestContext`] threads the shared per-test state through
//!   every step and owns teardown.
//!
//! ```no_run
//! use mongodb::bson::doc;
//! use mongodb::options::ClientOptions;
//! use mongodb_conformance::{test_file::OperationDescription, TestContext};
//!
//! # async fn example() -> mongodb_conformance::Result<()> {
//! let options = ClientOptions::parse("mongodb://localhost:27017").await?;
//! let ctx = TestContext::new(options, "crud/insertOne")?;
//!
//! let step: OperationDescription = mongodb::bson::from_document(doc! {
//!     "name": "insertOne",
//!     "object": "coll0",
//!     "arguments": { "document": { "x": 1 } },
//!     "result": { "insertedId": { "$$exists": true } },
//! })
//! .unwrap();
//!
//! let outcome = ctx.run_operation(&step).await?;
//! assert!(outcome.is_match());
//! ctx.teardown().await;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod entity;
pub mod error;
pub mod events;
pub mod fail_point;
pub mod matcher;
pub mod operation;
pub mod registry;
pub mod results;
pub mod test_file;

pub use context::{OperationOutcome, TestContext};
pub use entity::{ClientEntity, Entity, EntityKind, SessionEntity, TransactionState};
pub use error::{Error, Result};
pub use fail_point::{FailCommandOptions, FailPoint, FailPointGuard, FailPointMode};
pub use matcher::results_match;
pub use operation::Operation;
pub use results::{ErrorOutcome, ResultValue};
