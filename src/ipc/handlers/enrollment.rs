use std::path::Path;

use serde_json::json;

use crate::decision;
use crate::enrollment;
use crate::feed;
use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_format(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(path) = req.params.get("path").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };
    let path = Path::new(path);
    let Some(stem) = feed::file_stem(path) else {
        return err(&req.id, "bad_params", "path has no file name", None);
    };

    // Term preference: explicit request param, then the report's file
    // name ("F24 Enrollment.csv").
    let (term, year) = match req.params.get("fullTerm").and_then(|v| v.as_str()) {
        Some(full) => match decision::split_full_term(full) {
            Ok(parts) => parts,
            Err(e) => return err(&req.id, "bad_params", e.to_string(), None),
        },
        None => match enrollment::term_from_file_name(stem) {
            Some(parts) => parts,
            None => {
                return err(
                    &req.id,
                    "bad_enrollment_file",
                    "file name has no term code; pass params.fullTerm",
                    None,
                )
            }
        },
    };

    let (headers, rows) = match feed::read_keyed(path) {
        Ok(parsed) => parsed,
        Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
    };
    let sections = match store::sections_for_term(conn, &term, &year) {
        Ok(s) => s,
        Err(e) => return store_err(&req.id, &e),
    };
    let outcome = match enrollment::match_report(&headers, &rows, &sections) {
        Ok(o) => o,
        Err(e) => return err(&req.id, "bad_enrollment_file", e.to_string(), None),
    };
    let csv = match enrollment::format_courses(&outcome.matched, &term, &year) {
        Ok(c) => c,
        Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
    };

    ok(
        &req.id,
        json!({
            "fileName": enrollment::formatted_file_name(stem),
            "csv": csv,
            "matched": outcome.matched.len(),
            "skipped": outcome.skipped
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollment.format" => Some(handle_format(state, req)),
        _ => None,
    }
}
