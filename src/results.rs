//! The value model for operation outcomes.
//!
//! Every operation execution produces exactly one [`ResultValue`], built
//! fresh and never mutated afterwards. The matcher consumes these uniformly,
//! whether the operation returned a document, a batch, a count, nothing at
//! all, or an error.

use mongodb::{
    bson::{Bson, Document},
    error::{Error as DriverError, ErrorKind, WriteFailure},
};

/// The outcome of a single operation execution.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ResultValue {
    /// A single-document result, e.g. a write summary or a command reply.
    Document(Document),
    /// A multi-valued result, e.g. a drained cursor or a list of names.
    Array(Vec<Bson>),
    /// A primitive result, e.g. a count.
    Scalar(Bson),
    /// The operation completed without producing a value.
    None,
    /// The operation was a write performed with an unacknowledged write
    /// concern, so no meaningful result document exists.
    Unacknowledged,
    /// The operation failed with a driver error.
    Error(ErrorOutcome),
}

impl ResultValue {
    /// Folds an arbitrary BSON value into the appropriate variant.
    pub fn from_bson(value: Bson) -> Self {
        match value {
            Bson::Document(doc) => Self::Document(doc),
            Bson::Array(values) => Self::Array(values),
            Bson::Null => Self::None,
            other => Self::Scalar(other),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn as_error(&self) -> Option<&ErrorOutcome> {
        match self {
            Self::Error(outcome) => Some(outcome),
            _ => None,
        }
    }

    /// A BSON view of the value for structural matching. `None`,
    /// `Unacknowledged`, and `Error` have no such view; patterns can only
    /// match them through absence-tolerant placeholders.
    pub fn as_bson(&self) -> Option<Bson> {
        match self {
            Self::Document(doc) => Some(Bson::Document(doc.clone())),
            Self::Array(values) => Some(Bson::Array(values.clone())),
            Self::Scalar(value) => Some(value.clone()),
            Self::None | Self::Unacknowledged | Self::Error(_) => None,
        }
    }
}

impl From<Document> for ResultValue {
    fn from(doc: Document) -> Self {
        Self::Document(doc)
    }
}

impl From<Vec<Document>> for ResultValue {
    fn from(docs: Vec<Document>) -> Self {
        Self::Array(docs.into_iter().map(Bson::Document).collect())
    }
}

impl From<Option<Document>> for ResultValue {
    fn from(doc: Option<Document>) -> Self {
        match doc {
            Some(doc) => Self::Document(doc),
            None => Self::None,
        }
    }
}

impl From<u64> for ResultValue {
    fn from(count: u64) -> Self {
        Self::Scalar(Bson::Int64(count as i64))
    }
}

/// The error-shaped arm of [`ResultValue`]: the fields of a driver error
/// that expected-error declarations can assert on.
#[derive(Clone, Debug)]
pub struct ErrorOutcome {
    pub message: String,
    pub code: Option<i32>,
    pub code_name: Option<String>,
    pub labels: Vec<String>,
    /// Whether the failure was produced by the server (command or write
    /// error) as opposed to client-side validation or I/O.
    pub server_side: bool,
}

impl ErrorOutcome {
    pub fn contains_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

impl From<&DriverError> for ErrorOutcome {
    fn from(error: &DriverError) -> Self {
        let labels: Vec<String> = error.labels().iter().cloned().collect();
        let (code, code_name, message, server_side) = match *error.kind {
            ErrorKind::Command(ref command_error) => (
                Some(command_error.code),
                Some(command_error.code_name.clone()),
                command_error.message.clone(),
                true,
            ),
            ErrorKind::Write(WriteFailure::WriteError(ref write_error)) => (
                Some(write_error.code),
                write_error.code_name.clone(),
                write_error.message.clone(),
                true,
            ),
            ErrorKind::Write(WriteFailure::WriteConcernError(ref wc_error)) => (
                Some(wc_error.code),
                Some(wc_error.code_name.clone()),
                wc_error.message.clone(),
                true,
            ),
            ErrorKind::BulkWrite(ref failure) => {
                let first = failure
                    .write_errors
                    .as_ref()
                    .and_then(|errors| errors.first());
                match (first, failure.write_concern_error.as_ref()) {
                    (Some(write_error), _) => (
                        Some(write_error.code),
                        write_error.code_name.clone(),
                        write_error.message.clone(),
                        true,
                    ),
                    (None, Some(wc_error)) => (
                        Some(wc_error.code),
                        Some(wc_error.code_name.clone()),
                        wc_error.message.clone(),
                        true,
                    ),
                    (None, None) => (None, None, error.to_string(), true),
                }
            }
            _ => (None, None, error.to_string(), false),
        };
        Self {
            message,
            code,
            code_name,
            labels,
            server_side,
        }
    }
}

impl From<DriverError> for ResultValue {
    fn from(error: DriverError) -> Self {
        Self::Error(ErrorOutcome::from(&error))
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{bson, doc};

    use super::*;

    #[test]
    fn bson_values_fold_into_tagged_variants() {
        assert!(matches!(
            ResultValue::from_bson(bson!({ "ok": 1 })),
            ResultValue::Document(_)
        ));
        assert!(matches!(
            ResultValue::from_bson(bson!([1, 2])),
            ResultValue::Array(_)
        ));
        assert!(matches!(
            ResultValue::from_bson(bson!(3_i64)),
            ResultValue::Scalar(_)
        ));
        assert!(matches!(
            ResultValue::from_bson(Bson::Null),
            ResultValue::None
        ));
    }

    #[test]
    fn error_and_none_values_have_no_bson_view() {
        assert!(ResultValue::None.as_bson().is_none());
        assert!(ResultValue::Unacknowledged.as_bson().is_none());
        let doc_value = ResultValue::Document(doc! { "n": 1 });
        assert_eq!(doc_value.as_bson(), Some(bson!({ "n": 1 })));
    }
}
