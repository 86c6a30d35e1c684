use std::path::PathBuf;

use serde_json::json;

use crate::ingest;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::schema;
use crate::store;

fn handle_rebuild(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let report = schema::rebuild_all(conn, &state.registry);
    ok(
        &req.id,
        json!({ "rebuilt": report.rebuilt, "failed": report.failed }),
    )
}

fn handle_ingest(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let files: Option<Vec<PathBuf>> = req.params.get("files").and_then(|v| v.as_array()).map(|a| {
        a.iter()
            .filter_map(|v| v.as_str())
            .map(PathBuf::from)
            .collect()
    });
    let Some(files) = files else {
        return err(&req.id, "bad_params", "missing params.files", None);
    };
    if files.is_empty() {
        return err(&req.id, "bad_params", "params.files must not be empty", None);
    }

    let report = ingest::ingest_files(conn, &state.registry, &files);
    ok(
        &req.id,
        json!({
            "runId": report.run_id,
            "tables": report.tables,
            "unmatched": report.unmatched
        }),
    )
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match store::table_status(conn, &state.registry) {
        Ok(tables) => ok(&req.id, json!({ "tables": tables })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_page(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(table) = req.params.get("table").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.table", None);
    };
    let offset = req
        .params
        .get("offset")
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
        .max(0);
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(100)
        .max(1);

    match store::table_page(conn, &state.registry, table, offset, limit) {
        Ok((rows, total)) => ok(&req.id, json!({ "rows": rows, "total": total })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "tables.rebuild" => Some(handle_rebuild(state, req)),
        "tables.ingest" => Some(handle_ingest(state, req)),
        "tables.status" => Some(handle_status(state, req)),
        "tables.page" => Some(handle_page(state, req)),
        _ => None,
    }
}
