//! Filter evaluation and value ordering
//!
//! Supported filter syntax:
//! - `{path: value}`: equality (an array field matches if any element equals)
//! - `{path: {$eq|$ne|$gt|$gte|$lt|$lte: value}}`
//! - `{path: {$in|$nin: [values]}}`
//! - `{path: {$exists: bool}}`
//! - `{path: {$regex: pattern, $options: "i"}}`
//! - `{$and: [filters]}`, `{$or: [filters]}`
//!
//! Anything else is a permanent (malformed filter) error.

use std::cmp::Ordering;

use regex::RegexBuilder;
use runstore_core::{get_path, BackendError, BackendResult, Document, Value};

/// Check whether `doc` satisfies `filter`
pub fn matches(doc: &Document, filter: &Document) -> BackendResult<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(doc, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(doc, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            op if op.starts_with('$') => {
                return Err(BackendError::permanent(format!(
                    "unknown top-level operator {}",
                    op
                )))
            }
            path => field_matches(get_path(doc, path), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn clauses<'a>(op: &str, condition: &'a Value) -> BackendResult<Vec<&'a Document>> {
    let items = condition
        .as_array()
        .ok_or_else(|| BackendError::permanent(format!("{} expects an array", op)))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| BackendError::permanent(format!("{} clauses must be objects", op)))
        })
        .collect()
}

fn is_operator_object(condition: &Value) -> bool {
    condition
        .as_object()
        .map(|obj| !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')))
        .unwrap_or(false)
}

fn field_matches(field: Option<&Value>, condition: &Value) -> BackendResult<bool> {
    if !is_operator_object(condition) {
        return Ok(equals(field, condition));
    }

    let Some(ops) = condition.as_object() else {
        return Ok(false);
    };
    let options = condition.get("$options").and_then(Value::as_str).unwrap_or("");
    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(field, operand),
            "$ne" => !equals(field, operand),
            "$gt" => compare(field, operand, |o| o == Ordering::Greater),
            "$gte" => compare(field, operand, |o| o != Ordering::Less),
            "$lt" => compare(field, operand, |o| o == Ordering::Less),
            "$lte" => compare(field, operand, |o| o != Ordering::Greater),
            "$in" => in_list(field, operand)?,
            "$nin" => !in_list(field, operand)?,
            "$exists" => {
                let want = operand
                    .as_bool()
                    .ok_or_else(|| BackendError::permanent("$exists expects a boolean"))?;
                field.is_some() == want
            }
            "$regex" => regex_matches(field, operand, options)?,
            "$options" => true,
            other => {
                return Err(BackendError::permanent(format!("unknown operator {}", other)));
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Missing fields compare equal to null; arrays match on any element
fn equals(field: Option<&Value>, expected: &Value) -> bool {
    match field {
        None => expected.is_null(),
        Some(value) if values_equal(value, expected) => true,
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, expected)),
        Some(_) => false,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Range comparisons only succeed between values of the same type class
fn compare(field: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |value: &Value| {
        type_rank(value) == type_rank(operand) && accept(compare_values(value, operand))
    };
    match field {
        None => false,
        Some(Value::Array(items)) if !operand.is_array() => items.iter().any(|v| check(v)),
        Some(value) => check(value),
    }
}

fn in_list(field: Option<&Value>, operand: &Value) -> BackendResult<bool> {
    let candidates = operand
        .as_array()
        .ok_or_else(|| BackendError::permanent("$in/$nin expects an array"))?;
    Ok(candidates.iter().any(|c| equals(field, c)))
}

fn regex_matches(field: Option<&Value>, operand: &Value, options: &str) -> BackendResult<bool> {
    let pattern = operand
        .as_str()
        .ok_or_else(|| BackendError::permanent("$regex expects a string"))?;
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .build()
        .map_err(|e| BackendError::permanent(format!("invalid $regex: {}", e)))?;
    Ok(match field {
        Some(Value::String(s)) => regex.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| regex.is_match(s)),
        _ => false,
    })
}

/// Cross-type ordering: null < numbers < strings < objects < arrays < booleans
fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values, used for sorting and range operators
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Sort-key comparison where a missing field sorts like null
pub fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let null = Value::Null;
    compare_values(a.unwrap_or(&null), b.unwrap_or(&null))
}
