//! Recursive JSON-schema content matcher used to filter events against a
//! destination's optional `filter`.
//!
//! `matches` never panics and never propagates an error: any internal
//! type mismatch or malformed operand simply evaluates to `false`. It is
//! pure and deterministic — the same `(input, schema)` pair always
//! produces the same result, and it never reaches outside the values
//! it's handed.

use std::cmp::Ordering;

use serde_json::Value;

/// Evaluate `schema` against `input`. Never panics.
pub fn matches(input: &Value, schema: &Value) -> bool {
    eval(Some(input), schema)
}

fn eval(input: Option<&Value>, schema: &Value) -> bool {
    match schema {
        Value::Object(map) => eval_object(input, map),
        scalar => eval_scalar(input, scalar),
    }
}

/// Scalar schema position: direct equality, or array-contains if the
/// input itself is an array.
fn eval_scalar(input: Option<&Value>, schema: &Value) -> bool {
    let Some(input) = input else { return false };
    match input {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, schema)),
        _ => loose_eq(input, schema),
    }
}

fn eval_object(input: Option<&Value>, schema_obj: &serde_json::Map<String, Value>) -> bool {
    if let Some(Value::Array(items)) = input {
        let has_field_key = schema_obj.keys().any(|k| !k.starts_with('$'));
        if has_field_key {
            return items.iter().any(|item| eval_object(Some(item), schema_obj));
        }
    }

    for (key, subschema) in schema_obj {
        let ok = match key.as_str() {
            "$or" => eval_any(input, subschema),
            "$and" => eval_all(input, subschema),
            "$not" => !eval(input, subschema),
            // Reserved for future use. Must not crash; any schema
            // containing it is treated as non-matching.
            "$ref" => false,
            "$exist" => {
                let expected = subschema.as_bool().unwrap_or(false);
                input.is_some() == expected
            }
            "$eq" | "$neq" | "$gt" | "$gte" | "$lt" | "$lte" | "$in" | "$nin" | "$startsWith"
            | "$endsWith" => eval_operator(key, input, subschema),
            field => eval_field(input, field, subschema),
        };
        if !ok {
            return false;
        }
    }
    true
}

fn eval_field(input: Option<&Value>, field: &str, subschema: &Value) -> bool {
    match input.and_then(Value::as_object).and_then(|obj| obj.get(field)) {
        Some(value) => eval(Some(value), subschema),
        None => eval(None, subschema),
    }
}

fn eval_any(input: Option<&Value>, subschema: &Value) -> bool {
    subschema
        .as_array()
        .map(|arr| arr.iter().any(|s| eval(input, s)))
        .unwrap_or(false)
}

fn eval_all(input: Option<&Value>, subschema: &Value) -> bool {
    subschema
        .as_array()
        .map(|arr| arr.iter().all(|s| eval(input, s)))
        .unwrap_or(false)
}

fn eval_operator(op: &str, input: Option<&Value>, operand: &Value) -> bool {
    let Some(input) = input else { return false };
    match op {
        "$eq" => loose_eq(input, operand),
        "$neq" => !loose_eq(input, operand),
        "$gt" => compare(input, operand) == Some(Ordering::Greater),
        "$gte" => matches!(compare(input, operand), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => compare(input, operand) == Some(Ordering::Less),
        "$lte" => matches!(compare(input, operand), Some(Ordering::Less | Ordering::Equal)),
        "$in" => eval_in(input, operand),
        "$nin" => !eval_in(input, operand),
        "$startsWith" => eval_affix(input, operand, true),
        "$endsWith" => eval_affix(input, operand, false),
        _ => false,
    }
}

/// Numeric comparison across the numeric tower, or lexicographic string
/// comparison (RFC3339 timestamps sort correctly as strings). Anything
/// else has no ordering.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.as_str().cmp(y.as_str())),
        _ => None,
    }
}

/// Deep equality, loose across the numeric tower (`1` equals `1.0`).
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| loose_eq(p, q))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|v2| loose_eq(v, v2)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// `$in`: substring if input is a string, membership if input is an
/// array, or membership in the compare array if the compare value is an
/// array.
fn eval_in(input: &Value, operand: &Value) -> bool {
    match (input, operand) {
        (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
        (Value::Array(items), _) => items.iter().any(|item| loose_eq(item, operand)),
        (_, Value::Array(candidates)) => candidates.iter().any(|c| loose_eq(c, input)),
        _ => false,
    }
}

fn as_string_list(v: &Value) -> Option<Vec<&str>> {
    match v {
        Value::String(s) => Some(vec![s.as_str()]),
        Value::Array(items) => items.iter().map(Value::as_str).collect(),
        _ => None,
    }
}

/// `$startsWith`/`$endsWith`: either side may be a string or an
/// array-of-strings; matches if any input candidate satisfies the
/// prefix/suffix against any operand candidate.
fn eval_affix(input: &Value, operand: &Value, prefix: bool) -> bool {
    let (Some(inputs), Some(operands)) = (as_string_list(input), as_string_list(operand)) else {
        return false;
    };
    inputs.iter().any(|i| {
        operands
            .iter()
            .any(|o| if prefix { i.starts_with(o) } else { i.ends_with(o) })
    })
}
