//! Applying update operators to a document
//!
//! Operators run in a fixed order: `$set`, `$unset`, `$inc`, `$push`.
//! Validation happens before any mutation so a rejected update leaves the
//! document untouched.

use runstore_core::{
    get_path, remove_path, set_path, BackendError, BackendResult, Document, Update, Value, ID_FIELD,
};

/// Reject updates that could never apply to any document
pub fn validate(update: &Update) -> BackendResult<()> {
    if update.is_empty() {
        return Err(BackendError::permanent("update has no operators"));
    }
    let touches_id = update.set.keys().any(|p| p == ID_FIELD)
        || update.unset.iter().any(|p| p == ID_FIELD)
        || update.inc.iter().any(|(p, _)| p == ID_FIELD)
        || update.push.iter().any(|(p, _)| p == ID_FIELD);
    if touches_id {
        return Err(BackendError::permanent("the _id field is immutable"));
    }
    Ok(())
}

/// Apply `update` to `doc`. Returns whether the document changed.
pub fn apply(doc: &mut Document, update: &Update) -> BackendResult<bool> {
    validate(update)?;

    // Type checks first so a bad $inc/$push cannot leave a half-applied $set.
    for (path, _) in &update.inc {
        match get_path(doc, path) {
            None | Some(Value::Number(_)) => {}
            Some(other) => {
                return Err(BackendError::permanent(format!(
                    "cannot $inc non-numeric field '{}' ({})",
                    path, other
                )))
            }
        }
    }
    for (path, _) in &update.push {
        match get_path(doc, path) {
            None | Some(Value::Array(_)) => {}
            Some(_) => {
                return Err(BackendError::permanent(format!(
                    "cannot $push to non-array field '{}'",
                    path
                )))
            }
        }
    }

    let before = doc.clone();

    for (path, value) in &update.set {
        set_path(doc, path, value.clone()).map_err(|e| BackendError::permanent(e.to_string()))?;
    }
    for path in &update.unset {
        remove_path(doc, path);
    }
    for (path, delta) in &update.inc {
        let next = match get_path(doc, path) {
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {
                Value::from(n.as_i64().unwrap_or(i64::MAX).saturating_add(*delta))
            }
            Some(Value::Number(n)) => Value::from(n.as_f64().unwrap_or(0.0) + *delta as f64),
            _ => Value::from(*delta),
        };
        set_path(doc, path, next).map_err(|e| BackendError::permanent(e.to_string()))?;
    }
    for (path, value) in &update.push {
        let mut items = match get_path(doc, path) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        items.push(value.clone());
        set_path(doc, path, Value::Array(items))
            .map_err(|e| BackendError::permanent(e.to_string()))?;
    }

    Ok(*doc != before)
}

/// Seed a new document for an upsert from the filter's equality fields
pub fn seed_from_filter(filter: &Document) -> BackendResult<Document> {
    let mut doc = Document::new();
    for (key, condition) in filter {
        if key.starts_with('$') {
            continue;
        }
        let is_operator = condition
            .as_object()
            .map(|o| o.keys().any(|k| k.starts_with('$')))
            .unwrap_or(false);
        let value = match (is_operator, condition.get("$eq")) {
            (false, _) => condition.clone(),
            (true, Some(eq)) => eq.clone(),
            (true, None) => continue,
        };
        set_path(&mut doc, key, value).map_err(|e| BackendError::permanent(e.to_string()))?;
    }
    Ok(doc)
}
