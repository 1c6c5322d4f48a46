//! Structural matching of actual results against expected patterns.
//!
//! Documents match open-world: every key in the pattern must be present and
//! match, keys only present in the actual value are ignored, and a pattern
//! forbids a key explicitly with `{"$$exists": false}`. Arrays are
//! closed-world: lengths must be equal and elements match in order. The
//! asymmetry is intentional; conformance test files depend on it.

use mongodb::bson::{spec::ElementType, Bson};

use crate::{
    registry::EntityRegistry,
    results::{ErrorOutcome, ResultValue},
    test_file::{ExpectedError, ExpectedOutcome},
};

/// Compares an actual value against an expected pattern. `None` for the
/// actual value means the operation produced no matchable result; only
/// absence-tolerant patterns accept it.
pub fn results_match(
    actual: Option<&Bson>,
    expected: &Bson,
    entities: Option<&EntityRegistry>,
) -> Result<(), String> {
    match expected {
        Bson::Document(expected_doc) => {
            if let Some((key, value)) = expected_doc.iter().next() {
                if key.starts_with("$$") && expected_doc.len() == 1 {
                    return special_operator_matches((key, value), actual, entities)
                        .map_err(|e| format!("{}: {}", key, e));
                }
            }

            let actual_doc = match actual {
                Some(Bson::Document(actual)) => actual,
                _ => return Err(format!("expected document, found {:?}", actual)),
            };

            for (key, value) in expected_doc {
                results_match(actual_doc.get(key), value, entities)
                    .map_err(|e| format!("{:?}: {}", key, e))?;
            }

            Ok(())
        }
        Bson::Array(expected_array) => {
            let actual_array = match actual {
                Some(Bson::Array(arr)) => arr,
                _ => return Err(format!("expected array, got {:?}", actual)),
            };
            if expected_array.len() != actual_array.len() {
                return Err(format!(
                    "expected array len = {}, got len = {}",
                    expected_array.len(),
                    actual_array.len()
                ));
            }
            for (actual, expected) in actual_array.iter().zip(expected_array) {
                results_match(Some(actual), expected, entities)?;
            }
            Ok(())
        }
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => match actual {
            Some(actual) => numbers_match(actual, expected),
            None => Err("expected number, got None".to_string()),
        },
        _ => match actual {
            Some(actual) => match_eq(actual, expected),
            None => Err(format!("expected {:?}, got None", expected)),
        },
    }
}

fn match_eq<V: PartialEq + std::fmt::Debug>(actual: &V, expected: &V) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {:?}, got {:?}", expected, actual))
    }
}

/// Coerces numeric BSON into an `i64` when lossless; numeric comparisons
/// ignore type width, so an Int32 actual matches an equal Int64 or
/// integral Double pattern.
fn get_int(value: &Bson) -> Option<i64> {
    match *value {
        Bson::Int32(i) => Some(i64::from(i)),
        Bson::Int64(i) => Some(i),
        Bson::Double(f) if (f - (f as i64 as f64)).abs() <= f64::EPSILON => Some(f as i64),
        _ => None,
    }
}

fn numbers_match(actual: &Bson, expected: &Bson) -> Result<(), String> {
    if actual.element_type() == expected.element_type() {
        return match_eq(actual, expected);
    }

    match (get_int(actual), get_int(expected)) {
        (Some(actual), Some(expected)) => match_eq(&actual, &expected),
        _ => Err(format!("expected {:?}, got {:?}", expected, actual)),
    }
}

fn special_operator_matches(
    (key, value): (&String, &Bson),
    actual: Option<&Bson>,
    entities: Option<&EntityRegistry>,
) -> Result<(), String> {
    match key.as_ref() {
        "$$exists" => {
            let expected_to_exist = value
                .as_bool()
                .ok_or_else(|| format!("operand must be a boolean, got {:?}", value))?;
            match_eq(&actual.is_some(), &expected_to_exist)
        }
        "$$type" => match actual {
            Some(actual) => type_matches(value, actual),
            None => Err("expected a value to check the type of, got None".to_string()),
        },
        "$$unsetOrMatches" => {
            if actual.is_some() {
                results_match(actual, value, entities)
            } else {
                Ok(())
            }
        }
        "$$sessionLsid" => {
            let entities =
                entities.ok_or_else(|| "no entities available for lsid lookup".to_string())?;
            let id = value
                .as_str()
                .ok_or_else(|| format!("operand must be a session id, got {:?}", value))?;
            let session = entities.session(id).map_err(|e| e.to_string())?;
            results_match(actual, &Bson::Document(session.lsid.clone()), Some(entities))
        }
        other => Err(format!("unknown special operator {:?}", other)),
    }
}

fn type_matches(types: &Bson, actual: &Bson) -> Result<(), String> {
    match types {
        Bson::Array(types) => {
            if types.iter().any(|t| type_matches(t, actual).is_ok()) {
                Ok(())
            } else {
                Err(format!("expected any of {:?}, got {:?}", types, actual))
            }
        }
        Bson::String(name) => {
            let expected = element_type_from_name(name)?;
            match_eq(&actual.element_type(), &expected)
        }
        other => Err(format!("malformed type operand: {:?}", other)),
    }
}

fn element_type_from_name(name: &str) -> Result<ElementType, String> {
    let element_type = match name {
        "double" => ElementType::Double,
        "string" => ElementType::String,
        "object" => ElementType::EmbeddedDocument,
        "array" => ElementType::Array,
        "binData" => ElementType::Binary,
        "undefined" => ElementType::Undefined,
        "objectId" => ElementType::ObjectId,
        "bool" => ElementType::Boolean,
        "date" => ElementType::DateTime,
        "null" => ElementType::Null,
        "regex" => ElementType::RegularExpression,
        "dbPointer" => ElementType::DbPointer,
        "javascript" => ElementType::JavaScriptCode,
        "symbol" => ElementType::Symbol,
        "javascriptWithScope" => ElementType::JavaScriptCodeWithScope,
        "int" => ElementType::Int32,
        "timestamp" => ElementType::Timestamp,
        "long" => ElementType::Int64,
        "decimal" => ElementType::Decimal128,
        "minKey" => ElementType::MinKey,
        "maxKey" => ElementType::MaxKey,
        other => return Err(format!("unrecognized type name {:?}", other)),
    };
    Ok(element_type)
}

/// Checks an actual error against an error-shape pattern. Each specified
/// criterion is checked independently; all must hold.
pub(crate) fn error_matches(actual: &ErrorOutcome, expected: &ExpectedError) -> Result<(), String> {
    if let Some(ref substring) = expected.error_contains {
        if !actual.message.contains(substring.as_str()) {
            return Err(format!(
                "error message {:?} does not contain {:?}",
                actual.message, substring
            ));
        }
    }
    if let Some(ref code_name) = expected.error_code_name {
        match actual.code_name {
            Some(ref actual_name) if actual_name == code_name => {}
            _ => {
                return Err(format!(
                    "expected error code name {:?}, got {:?}",
                    code_name, actual.code_name
                ))
            }
        }
    }
    if let Some(ref labels) = expected.error_labels_contain {
        for label in labels {
            if !actual.contains_label(label) {
                return Err(format!(
                    "error is missing label {:?} (has {:?})",
                    label, actual.labels
                ));
            }
        }
    }
    if let Some(ref labels) = expected.error_labels_omit {
        for label in labels {
            if actual.contains_label(label) {
                return Err(format!("error unexpectedly carries label {:?}", label));
            }
        }
    }
    Ok(())
}

/// Applies the verification tie-break rules to a finished operation:
/// a declared `error: true` requires an error outcome no matter what the
/// pattern says, an undeclared failure is a mismatch carrying the failure
/// for diagnostics, and otherwise the pattern decides.
pub(crate) fn verify_outcome(
    value: &ResultValue,
    declared_error: Option<bool>,
    expected: Option<&ExpectedOutcome>,
    entities: Option<&EntityRegistry>,
) -> Result<(), String> {
    match value {
        ResultValue::Error(outcome) => {
            let error_expected = declared_error.unwrap_or(false)
                || matches!(expected, Some(ExpectedOutcome::Error(_)));
            if !error_expected {
                return Err(format!(
                    "operation failed but no error was expected: {}",
                    outcome.message
                ));
            }
            if let Some(ExpectedOutcome::Error(pattern)) = expected {
                error_matches(outcome, pattern)?;
            }
            Ok(())
        }
        _ => {
            if declared_error == Some(true) {
                return Err("expected the operation to fail, but it succeeded".to_string());
            }
            match expected {
                Some(ExpectedOutcome::Error(_)) => {
                    Err("expected an error result, but the operation succeeded".to_string())
                }
                Some(ExpectedOutcome::Value(pattern)) => {
                    results_match(value.as_bson().as_ref(), pattern, entities)
                }
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mongodb::bson::{bson, doc, oid::ObjectId, Bson};

    use super::*;

    #[test]
    fn basic_matching() {
        let actual = doc! { "x": 1, "y": 1 };
        let expected = doc! { "x": 1 };
        assert!(results_match(Some(&Bson::Document(actual)), &Bson::Document(expected), None).is_ok());

        let actual = doc! { "x": 1 };
        let expected = doc! { "x": 1, "y": 1 };
        assert!(
            results_match(Some(&Bson::Document(actual)), &Bson::Document(expected), None).is_err()
        );
    }

    #[test]
    fn extra_fields_are_ignored_at_any_depth() {
        let actual = bson!({ "doc": { "x": 1, "y": 2 } });
        let expected = bson!({ "doc": { "x": 1 } });
        assert!(results_match(Some(&actual), &expected, None).is_ok());
    }

    #[test]
    fn array_matching_is_closed_world() {
        let actual = bson!([1, 2, 3]);
        let expected = bson!([1, 2]);
        assert!(results_match(Some(&actual), &expected, None).is_err());

        let actual = bson!([{ "x": 1, "y": 1 }, { "x": 2, "y": 2 }]);
        let expected = bson!([{ "x": 1 }, { "x": 2 }]);
        assert!(results_match(Some(&actual), &expected, None).is_ok());
    }

    #[test]
    fn special_operators() {
        let actual = bson!({ "x": 1 });
        assert!(results_match(Some(&actual), &bson!({ "x": { "$$exists": true } }), None).is_ok());
        assert!(results_match(Some(&actual), &bson!({ "x": { "$$exists": false } }), None).is_err());
        assert!(results_match(Some(&actual), &bson!({ "y": { "$$exists": false } }), None).is_ok());
        assert!(results_match(Some(&actual), &bson!({ "y": { "$$exists": true } }), None).is_err());

        assert!(
            results_match(Some(&actual), &bson!({ "x": { "$$type": ["int", "long"] } }), None)
                .is_ok()
        );
        assert!(results_match(Some(&actual), &bson!({ "x": { "$$type": "string" } }), None).is_err());

        let empty = bson!({});
        assert!(results_match(Some(&empty), &bson!({ "x": { "$$unsetOrMatches": 1 } }), None).is_ok());
        assert!(results_match(Some(&actual), &bson!({ "x": { "$$unsetOrMatches": 1 } }), None).is_ok());
        let wrong = bson!({ "x": 2 });
        assert!(results_match(Some(&wrong), &bson!({ "x": { "$$unsetOrMatches": 1 } }), None).is_err());
    }

    #[test]
    fn numbers_compare_by_value_not_width() {
        assert!(results_match(Some(&Bson::Int32(2)), &Bson::Int64(2), None).is_ok());
        assert!(results_match(Some(&Bson::Double(2.0)), &Bson::Int64(2), None).is_ok());
        assert!(results_match(Some(&Bson::Double(2.5)), &Bson::Int32(2), None).is_err());
    }

    #[test]
    fn literal_pattern_restricts_to_its_own_keys() {
        let actual = bson!({ "ok": 1, "n": 3 });
        assert!(results_match(Some(&actual), &bson!({ "ok": 1 }), None).is_ok());
        assert!(results_match(Some(&actual), &bson!({ "ok": 0 }), None).is_err());
    }

    fn server_error(message: &str, code_name: &str, labels: &[&str]) -> ErrorOutcome {
        ErrorOutcome {
            message: message.to_string(),
            code: Some(11000),
            code_name: Some(code_name.to_string()),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            server_side: true,
        }
    }

    #[test]
    fn error_criteria_are_independent_and_conjunctive() {
        let outcome = server_error("E11000 duplicate key", "DuplicateKey", &["RetryableWriteError"]);

        let pattern = ExpectedError {
            error_contains: Some("duplicate key".to_string()),
            error_code_name: Some("DuplicateKey".to_string()),
            error_labels_contain: Some(vec!["RetryableWriteError".to_string()]),
            error_labels_omit: Some(vec!["TransientTransactionError".to_string()]),
        };
        assert!(error_matches(&outcome, &pattern).is_ok());

        let pattern = ExpectedError {
            error_contains: Some("not in the message".to_string()),
            ..Default::default()
        };
        assert!(error_matches(&outcome, &pattern).is_err());

        let pattern = ExpectedError {
            error_labels_omit: Some(vec!["RetryableWriteError".to_string()]),
            ..Default::default()
        };
        assert!(error_matches(&outcome, &pattern).is_err());
    }

    #[test]
    fn declared_error_requires_an_error_outcome() {
        let success = ResultValue::Document(doc! { "ok": 1 });
        assert!(verify_outcome(&success, Some(true), None, None).is_err());
        assert!(verify_outcome(&success, Some(false), None, None).is_ok());
        assert!(verify_outcome(&success, None, None, None).is_ok());
    }

    #[test]
    fn undeclared_failure_is_a_mismatch_with_diagnostics() {
        let failure = ResultValue::Error(server_error("boom", "InternalError", &[]));
        let verdict = verify_outcome(&failure, None, None, None);
        assert!(verdict.unwrap_err().contains("boom"));

        let failure = ResultValue::Error(server_error("boom", "InternalError", &[]));
        assert!(verify_outcome(&failure, Some(true), None, None).is_ok());
    }

    #[test]
    fn error_pattern_against_success_is_a_mismatch() {
        let success = ResultValue::Document(doc! { "ok": 1 });
        let pattern = ExpectedOutcome::Error(ExpectedError {
            error_contains: Some("anything".to_string()),
            ..Default::default()
        });
        assert!(verify_outcome(&success, None, Some(&pattern), None).is_err());
    }

    #[test]
    fn insert_result_matches_any_value_placeholder() {
        let value = ResultValue::Document(doc! { "insertedId": ObjectId::new() });
        let pattern = ExpectedOutcome::Value(bson!({ "insertedId": { "$$exists": true } }));
        assert!(verify_outcome(&value, None, Some(&pattern), None).is_ok());
    }

    #[test]
    fn unacknowledged_writes_match_only_absence_tolerant_patterns() {
        let value = ResultValue::Unacknowledged;
        let tolerant =
            ExpectedOutcome::Value(bson!({ "$$unsetOrMatches": { "insertedId": { "$$exists": true } } }));
        assert!(verify_outcome(&value, None, Some(&tolerant), None).is_ok());

        let strict = ExpectedOutcome::Value(bson!({ "insertedId": { "$$exists": true } }));
        assert!(verify_outcome(&value, None, Some(&strict), None).is_err());
    }
}
