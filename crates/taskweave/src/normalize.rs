//! Folding a task's completion values into a single result slot

use serde_json::Value;

/// Collapse the values a task completed with into one stored result.
///
/// Exactly one value is stored as-is, no values become `Null`, and two or
/// more values become an array in the order they were reported.
pub fn normalize(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Null,
        1 => values.pop().unwrap_or(Value::Null),
        _ => Value::Array(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_value_is_scalar() {
        assert_eq!(normalize(vec![json!(3)]), json!(3));
        assert_eq!(normalize(vec![json!([1, 2])]), json!([1, 2]));
    }

    #[test]
    fn test_no_values_is_null() {
        assert_eq!(normalize(vec![]), Value::Null);
    }

    #[test]
    fn test_many_values_keep_order() {
        assert_eq!(normalize(vec![json!(2), json!(8)]), json!([2, 8]));
        assert_eq!(
            normalize(vec![json!("a"), Value::Null, json!({"k": 1})]),
            json!(["a", null, {"k": 1}])
        );
    }
}
