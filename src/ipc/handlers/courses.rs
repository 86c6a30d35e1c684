use serde_json::json;

use crate::ipc::error::{err, ok, store_err};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, CourseCursor, CoursePageQuery, Direction};

fn handle_terms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match store::all_terms(conn) {
        Ok(terms) => ok(&req.id, json!({ "terms": terms })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn cursor_field(params: &serde_json::Value, name: &str) -> Option<String> {
    params
        .get("cursor")
        .and_then(|c| c.get(name))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn handle_courses_page(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let Some(term) = req.params.get("term").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.term", None);
    };
    let Some(year) = req.params.get("year").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing params.year", None);
    };
    let unit = req
        .params
        .get("unit")
        .and_then(|v| v.as_str())
        .unwrap_or(store::DEFAULT_UNIT);
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(50)
        .max(1);
    let direction = match req.params.get("direction").and_then(|v| v.as_str()) {
        None | Some("next") => Direction::Next,
        Some("prev") => Direction::Prev,
        Some(other) => {
            return err(
                &req.id,
                "bad_params",
                format!("unknown direction: {other}"),
                None,
            )
        }
    };
    let seek = req
        .params
        .get("seek")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let cursor = CourseCursor {
        dept: cursor_field(&req.params, "dept"),
        course: cursor_field(&req.params, "course"),
        section: cursor_field(&req.params, "section"),
    };
    let full = cursor.dept.is_some() && cursor.course.is_some() && cursor.section.is_some();
    let empty = cursor.dept.is_none() && cursor.course.is_none() && cursor.section.is_none();
    if !seek && !full && !empty {
        return err(
            &req.id,
            "bad_params",
            "cursor must be complete unless seek is set",
            None,
        );
    }

    let query = CoursePageQuery {
        term: term.to_string(),
        year: year.to_string(),
        unit: unit.to_string(),
        limit,
        direction,
        cursor,
        seek,
    };
    match store::courses_page(conn, &query) {
        Ok((rows, total)) => ok(&req.id, json!({ "rows": rows, "total": total })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_courses_for_book(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let isbn = req.params.get("isbn").and_then(|v| v.as_str());
    let title = req.params.get("title").and_then(|v| v.as_str());
    let term = req.params.get("term").and_then(|v| v.as_str());
    let year = req.params.get("year").and_then(|v| v.as_str());
    let (Some(isbn), Some(title), Some(term), Some(year)) = (isbn, title, term, year) else {
        return err(
            &req.id,
            "bad_params",
            "missing params.isbn/title/term/year",
            None,
        );
    };

    match store::courses_for_book(conn, isbn, title, term, year) {
        Ok(rows) => ok(&req.id, json!({ "rows": rows })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_courses_sections(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let term = req.params.get("term").and_then(|v| v.as_str());
    let year = req.params.get("year").and_then(|v| v.as_str());
    let (Some(term), Some(year)) = (term, year) else {
        return err(&req.id, "bad_params", "missing params.term/year", None);
    };

    match store::sections_for_term(conn, term, year) {
        Ok(sections) => ok(&req.id, json!({ "sections": sections })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "terms.list" => Some(handle_terms_list(state, req)),
        "courses.page" => Some(handle_courses_page(state, req)),
        "courses.forBook" => Some(handle_courses_for_book(state, req)),
        "courses.sections" => Some(handle_courses_sections(state, req)),
        _ => None,
    }
}
