use serde_json::json;

use crate::error::StoreError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps a storage failure onto the wire error taxonomy.
pub fn store_err(id: &str, e: &StoreError) -> serde_json::Value {
    let code = match e {
        StoreError::Schema { .. } | StoreError::Ddl { .. } => "schema_failed",
        StoreError::Merge { .. } => "ingest_failed",
        StoreError::Query { .. } => "query_failed",
        StoreError::UnknownTable(_) => "bad_params",
    };
    err(id, code, e.to_string(), None)
}
