use std::path::Path;

use serde_json::json;

use crate::decision;
use crate::feed;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_for_term(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(term) = req.params.get("term").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.term", None);
    };
    let unit = req
        .params
        .get("unit")
        .and_then(|v| v.as_str())
        .unwrap_or(store::DEFAULT_UNIT);

    // The term arrives split ({term, year}) or as one full code ("F24").
    let (term, year) = match req.params.get("year").and_then(|v| v.as_str()) {
        Some(year) => (term.to_string(), year.to_string()),
        None => match decision::split_full_term(term) {
            Ok(parts) => parts,
            Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
        },
    };

    match decision::decisions_for_term(conn, &term, &year, unit) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_from_file(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let store_number = req
        .params
        .get("store")
        .and_then(|v| v.as_str())
        .unwrap_or(&state.store_number)
        .to_string();
    let unit = req
        .params
        .get("unit")
        .and_then(|v| v.as_str())
        .unwrap_or(store::DEFAULT_UNIT);

    let (headers, rows) = match feed::read_keyed(Path::new(path)) {
        Ok(parsed) => parsed,
        Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
    };
    let file = match decision::parse_decision_file(&headers, &rows, &store_number) {
        Ok(f) => f,
        Err(e) => return err(&req.id, "bad_decision_file", e.to_string(), None),
    };

    // Term preference: explicit request param, then the file's own Term
    // column.
    let (term, year) = match req.params.get("fullTerm").and_then(|v| v.as_str()) {
        Some(full) => match decision::split_full_term(full) {
            Ok(parts) => parts,
            Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
        },
        None => match file.term.as_deref() {
            Some(full) => match decision::split_full_term(full) {
                Ok(parts) => parts,
                Err(e) => return err(&req.id, "bad_decision_file", e.to_string(), None),
            },
            None => {
                return err(
                    &req.id,
                    "bad_decision_file",
                    "file has no Term column; pass params.fullTerm",
                    None,
                )
            }
        },
    };

    match decision::decisions_from_file(conn, &term, &year, unit, &file) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "decision.forTerm" => Some(handle_for_term(state, req)),
        "decision.fromFile" => Some(handle_from_file(state, req)),
        _ => None,
    }
}
