//! Normalization of array-valued work item fields.
//!
//! Historically a field could hold a native JSON array, a JSON-encoded
//! string, or nothing at all depending on which code path produced it.
//! `coerce_array` folds those shapes into one ordered sequence per target
//! element type, or reports the field as unreadable.

use serde_json::Value;

use crate::error::WorkerError;

/// The shapes an array-valued field can legitimately take on the wire.
#[derive(Debug)]
pub enum FieldRepr<'a> {
    Absent,
    Sequence(&'a [Value]),
    RawText(&'a str),
    Scalar(&'a Value),
}

impl<'a> FieldRepr<'a> {
    pub fn of(value: Option<&'a Value>) -> Self {
        match value {
            None | Some(Value::Null) => FieldRepr::Absent,
            Some(Value::Array(items)) => FieldRepr::Sequence(items),
            Some(Value::String(text)) => FieldRepr::RawText(text),
            Some(other) => FieldRepr::Scalar(other),
        }
    }
}

/// Element types an array field can be normalized to.
pub trait Element: Sized {
    fn from_value(value: &Value) -> Option<Self>;
}

impl Element for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl Element for i64 {
    // Integer literals must stay integers: `as_i64` refuses values that
    // only exist as floats, so `[1.5]` fails instead of truncating.
    fn from_value(value: &Value) -> Option<Self> {
        value.as_i64()
    }
}

impl Element for f64 {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl Element for bool {
    fn from_value(value: &Value) -> Option<Self> {
        value.as_bool()
    }
}

/// Reads `value` as an ordered sequence of `T`.
///
/// Absent and explicit-null fields read as `None`; an empty array literal
/// reads as `Some(vec![])`, which is a different answer. Any shape other
/// than a native array or a JSON-encoded array literal is an error naming
/// the field and the offending value.
pub fn coerce_array<T: Element>(
    field: &str,
    value: Option<&Value>,
) -> Result<Option<Vec<T>>, WorkerError> {
    match FieldRepr::of(value) {
        FieldRepr::Absent => Ok(None),
        FieldRepr::Sequence(items) => decode(field, items).map(Some),
        FieldRepr::RawText(text) => {
            let parsed: Value =
                serde_json::from_str(text).map_err(|_| shape_error(field, value))?;
            match parsed {
                Value::Array(items) => decode(field, &items).map(Some),
                _ => Err(shape_error(field, value)),
            }
        }
        FieldRepr::Scalar(_) => Err(shape_error(field, value)),
    }
}

fn decode<T: Element>(field: &str, items: &[Value]) -> Result<Vec<T>, WorkerError> {
    items
        .iter()
        .map(|item| {
            T::from_value(item).ok_or_else(|| WorkerError::UnsupportedFieldShape {
                field: field.to_string(),
                value: item.clone(),
            })
        })
        .collect()
}

fn shape_error(field: &str, value: Option<&Value>) -> WorkerError {
    WorkerError::UnsupportedFieldShape {
        field: field.to_string(),
        value: value.cloned().unwrap_or(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_and_null_read_as_no_value() {
        assert_eq!(coerce_array::<String>("f", None).unwrap(), None);
        assert_eq!(
            coerce_array::<String>("f", Some(&Value::Null)).unwrap(),
            None
        );
    }

    #[test]
    fn empty_literal_is_an_empty_sequence_not_absence() {
        let value = json!("[]");
        assert_eq!(
            coerce_array::<String>("f", Some(&value)).unwrap(),
            Some(vec![])
        );
    }

    #[test]
    fn string_literal_parses() {
        let value = json!("[\"a\", \"b\", \"c\"]");
        assert_eq!(
            coerce_array::<String>("f", Some(&value)).unwrap(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn native_array_passes_through() {
        let value = json!(["a", "b"]);
        assert_eq!(
            coerce_array::<String>("f", Some(&value)).unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn integer_literals_stay_integers() {
        let value = json!("[1, 2, 3]");
        assert_eq!(
            coerce_array::<i64>("f", Some(&value)).unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn float_literals_decode_as_floats() {
        let value = json!("[1.0, 2.0, 3.0]");
        assert_eq!(
            coerce_array::<f64>("f", Some(&value)).unwrap(),
            Some(vec![1.0, 2.0, 3.0])
        );
    }

    #[test]
    fn integer_target_rejects_fractional_values() {
        let value = json!([1.5]);
        assert!(matches!(
            coerce_array::<i64>("f", Some(&value)),
            Err(WorkerError::UnsupportedFieldShape { .. })
        ));
    }

    #[test]
    fn unsupported_shape_names_field_and_value() {
        let value = json!({ "not": "an array" });
        let err = coerce_array::<String>("deps", Some(&value)).unwrap_err();
        match err {
            WorkerError::UnsupportedFieldShape { field, value } => {
                assert_eq!(field, "deps");
                assert_eq!(value, json!({ "not": "an array" }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_array_text_is_an_error() {
        let value = json!("definitely not json");
        assert!(coerce_array::<String>("f", Some(&value)).is_err());
        let value = json!("{\"a\": 1}");
        assert!(coerce_array::<String>("f", Some(&value)).is_err());
    }
}
