//! Projection and ordering of query results

use std::cmp::Ordering;

use runstore_core::{
    get_path, remove_path, set_path, BackendError, BackendResult, Document, SortOrder, Value,
    ID_FIELD,
};

use crate::matcher::compare_fields;

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => true,
    }
}

/// Check that a projection is all-inclusion or all-exclusion (`_id` excepted)
pub fn validate(projection: &Document) -> BackendResult<()> {
    let mut modes = projection
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .map(|(_, v)| is_truthy(v));
    if let Some(first) = modes.next() {
        if modes.any(|m| m != first) {
            return Err(BackendError::permanent(
                "projection cannot mix inclusion and exclusion",
            ));
        }
    }
    Ok(())
}

/// Apply a projection to one document
pub fn project(doc: &Document, projection: &Document) -> BackendResult<Document> {
    validate(projection)?;

    let include_id = projection.get(ID_FIELD).map(is_truthy).unwrap_or(true);
    let fields: Vec<(&String, bool)> = projection
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .map(|(k, v)| (k, is_truthy(v)))
        .collect();
    let inclusion = fields.first().map(|(_, m)| *m).unwrap_or(false);

    let mut out = if inclusion {
        let mut out = Document::new();
        if include_id {
            if let Some(id) = doc.get(ID_FIELD) {
                out.insert(ID_FIELD.to_string(), id.clone());
            }
        }
        for (path, _) in &fields {
            if let Some(value) = get_path(doc, path) {
                set_path(&mut out, path, value.clone())
                    .map_err(|e| BackendError::permanent(e.to_string()))?;
            }
        }
        out
    } else {
        let mut out = doc.clone();
        for (path, _) in &fields {
            remove_path(&mut out, path);
        }
        out
    };

    if !include_id {
        out.remove(ID_FIELD);
    }
    Ok(out)
}

/// Order two documents by a list of sort keys
pub fn compare_by(a: &Document, b: &Document, sort: &[(String, SortOrder)]) -> Ordering {
    for (path, order) in sort {
        let ord = compare_fields(get_path(a, path), get_path(b, path));
        let ord = match order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}
