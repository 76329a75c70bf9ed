use serde_json::Value;

/// Returns `true` if `a` and `b` are the same value.
///
/// This is structural equality, relaxed for numbers: an integer and a float holding the same
/// numeric value are considered equal. Encoding a document can turn `3` into `3.0` (or the
/// other way round), which is not a change of the property.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    a == b || equal_numbers(a, b)
}

/// Returns `true` if both values are numbers with the same numeric value.
///
/// Numbers of the same representation (both integers or both floats) are compared exactly.
/// Mixed representations are compared after coercing both sides to `f64`. Non-numeric values
/// never compare equal here.
pub fn equal_numbers(a: &Value, b: &Value) -> bool {
    let (Value::Number(a), Value::Number(b)) = (a, b) else {
        return false;
    };

    if a.is_f64() == b.is_f64() {
        return a == b;
    }

    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
