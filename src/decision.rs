use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::error::{DecisionError, StoreError};
use crate::store::{self, DecisionInput};

/// Ratio applied when a book has no usable sales history.
const FALLBACK_RATIO: f64 = 0.2;

/// Store number the buyers work under unless a request overrides it.
pub const DEFAULT_STORE: &str = "620";

const REQUIRED_FILE_FIELDS: [&str; 4] = ["Store", "EAN-13", "Title", "Decision"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRow {
    pub isbn: String,
    pub title: String,
    pub est_enrl: i64,
    /// Current actual enrollment, projected from the estimate when no
    /// actual figure has posted yet.
    pub act_enrl: i64,
    /// Manual override when one was uploaded, else the store estimate.
    pub est_sales: f64,
    /// Recommended order quantity.
    pub decision: i64,
    /// Disagreement between the baseline and the recommendation.
    pub diff: f64,
}

/// Splits a full term code like "F24" into its letter and year parts.
pub fn split_full_term(full: &str) -> Result<(String, String), DecisionError> {
    let full = full.trim();
    let digits_at = full
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i);
    match digits_at {
        Some(i) if i > 0 && full[i..].chars().all(|c| c.is_ascii_digit()) => {
            Ok((full[..i].to_string(), full[i..].to_string()))
        }
        _ => Err(DecisionError::BadTerm(full.to_string())),
    }
}

/// The reorder recommendation for one book.
///
/// Enrollment drives everything: prior sales per prior actual student
/// gives the ratio, and when the current term has not posted actuals
/// yet the estimate is scaled by the prior term's estimate-to-actual
/// drift. A missing or zero sales history falls back to the
/// conservative fixed ratio.
pub fn calculate(input: &DecisionInput, manual: Option<f64>) -> DecisionRow {
    let ratio = match input.total_sales {
        Some(total) if total != 0 && input.prev_act_enrl != 0 => {
            total as f64 / input.prev_act_enrl as f64
        }
        _ => FALLBACK_RATIO,
    };

    let mut act_enrl = input.curr_act_enrl as f64;
    if input.curr_act_enrl == 0 && input.curr_est_enrl != 0 {
        let drift = if input.prev_est_enrl == 0 {
            0.0
        } else {
            (input.prev_act_enrl - input.prev_est_enrl) as f64 / input.prev_est_enrl as f64
        };
        act_enrl = (input.curr_est_enrl as f64 * (1.0 + drift)).round();
    }

    let decision = (act_enrl * ratio).round() as i64;
    let est_sales = manual.unwrap_or(input.curr_est_sales as f64);
    DecisionRow {
        isbn: input.isbn.clone(),
        title: input.title.clone(),
        est_enrl: input.curr_est_enrl,
        act_enrl: act_enrl as i64,
        est_sales,
        decision,
        diff: (est_sales - decision as f64).abs(),
    }
}

/// Recommendations for every book sold in a (term, year).
pub fn decisions_for_term(
    conn: &Connection,
    term: &str,
    year: &str,
    unit: &str,
) -> Result<Vec<DecisionRow>, StoreError> {
    let inputs = store::decision_inputs_for_term(conn, term, year, unit)?;
    Ok(inputs.iter().map(|i| calculate(i, None)).collect())
}

/// One aggregated manual decision from an uploaded file.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualOverride {
    pub isbn: String,
    pub title: String,
    pub decision: f64,
}

/// A validated, store-filtered decision file.
#[derive(Debug)]
pub struct DecisionFile {
    /// Full term code from the file's Term column, when one is carried.
    pub term: Option<String>,
    pub overrides: Vec<ManualOverride>,
}

fn same_store(a: &str, b: &str) -> bool {
    match (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
        (Ok(x), Ok(y)) => x == y,
        _ => a.trim() == b.trim(),
    }
}

/// Validates an uploaded decision file and aggregates its rows.
///
/// Rows for other stores are dropped, the rest sum their Decision
/// column per ISBN. Validation happens up front: a missing required
/// column or an empty store selection fails the whole file before any
/// calculation runs.
pub fn parse_decision_file(
    headers: &[String],
    rows: &[HashMap<String, String>],
    store: &str,
) -> Result<DecisionFile, DecisionError> {
    for field in REQUIRED_FILE_FIELDS {
        if !headers.iter().any(|h| h == field) {
            return Err(DecisionError::MissingField(field.to_string()));
        }
    }

    let mut term: Option<String> = None;
    let mut overrides: Vec<ManualOverride> = Vec::new();
    for row in rows {
        let row_store = row.get("Store").map(String::as_str).unwrap_or("");
        if !same_store(row_store, store) {
            continue;
        }
        if term.is_none() {
            if let Some(t) = row.get("Term").map(|t| t.trim()) {
                if !t.is_empty() {
                    term = Some(t.to_string());
                }
            }
        }
        let isbn = row
            .get("EAN-13")
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        let decision = row
            .get("Decision")
            .and_then(|d| d.trim().parse::<f64>().ok())
            .unwrap_or(0.0);
        match overrides.iter_mut().find(|o| o.isbn == isbn) {
            Some(existing) => existing.decision += decision,
            None => overrides.push(ManualOverride {
                isbn,
                title: row
                    .get("Title")
                    .map(|s| s.trim().to_string())
                    .unwrap_or_default(),
                decision,
            }),
        }
    }

    if overrides.is_empty() {
        return Err(DecisionError::NoStoreRows(store.trim().to_string()));
    }
    Ok(DecisionFile { term, overrides })
}

/// Recommendations restricted to an uploaded file's books, with the
/// file's aggregated figures attached as the manual baseline.
pub fn decisions_from_file(
    conn: &Connection,
    term: &str,
    year: &str,
    unit: &str,
    file: &DecisionFile,
) -> Result<Vec<DecisionRow>, StoreError> {
    let books: Vec<(String, String)> = file
        .overrides
        .iter()
        .map(|o| (o.isbn.clone(), o.title.clone()))
        .collect();
    let inputs = store::decision_inputs_for_books(conn, term, year, unit, &books)?;
    Ok(inputs
        .iter()
        .map(|input| {
            let manual = file
                .overrides
                .iter()
                .find(|o| o.isbn == input.isbn)
                .map(|o| o.decision);
            calculate(input, manual)
        })
        .collect())
}
