use serde_json::json;

use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_book_history(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let isbn = req.params.get("isbn").and_then(|v| v.as_str());
    let title = req.params.get("title").and_then(|v| v.as_str());
    let term = req.params.get("term").and_then(|v| v.as_str());
    let exclude_year = req.params.get("excludeYear").and_then(|v| v.as_str());
    let (Some(isbn), Some(title), Some(term), Some(exclude_year)) =
        (isbn, title, term, exclude_year)
    else {
        return err(
            &req.id,
            "bad_params",
            "missing params.isbn/title/term/excludeYear",
            None,
        );
    };
    let unit = req
        .params
        .get("unit")
        .and_then(|v| v.as_str())
        .unwrap_or(store::DEFAULT_UNIT);

    match store::prev_sales_by_book(conn, isbn, title, term, exclude_year, unit) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_term_features(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = req.params.get("term").and_then(|v| v.as_str());
    let year = req.params.get("year").and_then(|v| v.as_str());
    let (Some(term), Some(year)) = (term, year) else {
        return err(&req.id, "bad_params", "missing params.term/year", None);
    };
    let unit = req
        .params
        .get("unit")
        .and_then(|v| v.as_str())
        .unwrap_or(store::DEFAULT_UNIT);

    match store::term_features(conn, term, year, unit) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sales.bookHistory" => Some(handle_book_history(state, req)),
        "sales.termFeatures" => Some(handle_term_features(state, req)),
        _ => None,
    }
}
