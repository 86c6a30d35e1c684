use serde_json::json;

use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store;

fn handle_books_for_term(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match store::books_for_term(conn, term, year, unit) {
        Ok(books) => ok(&req.id, json!({ "books": books })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_books_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(isbn) = req.params.get("isbn").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.isbn", None);
    };
    let isbn = isbn.trim();
    if isbn.is_empty() {
        return err(&req.id, "bad_params", "params.isbn must not be empty", None);
    }

    match store::search_books_by_isbn(conn, isbn, store::DEFAULT_UNIT) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_books_for_course(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(course_id) = req.params.get("courseId").and_then(|v| v.as_i64()) else {
        return err(&req.id, "bad_params", "missing params.courseId", None);
    };

    match store::books_for_course(conn, course_id) {
        Ok(Some((books, course))) => ok(&req.id, json!({ "books": books, "course": course })),
        Ok(None) => err(&req.id, "not_found", "course not found", None),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "books.forTerm" => Some(handle_books_for_term(state, req)),
        "books.search" => Some(handle_books_search(state, req)),
        "books.forCourse" => Some(handle_books_for_course(state, req)),
        _ => None,
    }
}
