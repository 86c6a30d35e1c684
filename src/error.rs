use thiserror::Error;

/// Failures from the schema, merge, and query layers.
///
/// Row-level staging problems never reach this type; the pipeline logs
/// them and reports a skipped count instead.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table {table}: {reason}")]
    Schema { table: String, reason: String },

    #[error("ddl for {table} failed: {source}")]
    Ddl {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("merge into {table} failed: {source}")]
    Merge {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("{op} on {table} failed: {source}")]
    Query {
        table: String,
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("unknown table: {0}")]
    UnknownTable(String),
}

impl StoreError {
    pub fn schema(table: &str, reason: impl Into<String>) -> Self {
        StoreError::Schema {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    pub fn ddl(table: &str, source: rusqlite::Error) -> Self {
        StoreError::Ddl {
            table: table.to_string(),
            source,
        }
    }

    pub fn merge(table: &str, source: rusqlite::Error) -> Self {
        StoreError::Merge {
            table: table.to_string(),
            source,
        }
    }

    pub fn query(table: &str, op: &'static str, source: rusqlite::Error) -> Self {
        StoreError::Query {
            table: table.to_string(),
            op,
            source,
        }
    }
}

/// Validation failures for an uploaded buying-decision file. All are
/// raised before any calculation runs.
#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("decision file is missing required column: {0}")]
    MissingField(String),

    #[error("no buying decisions found for store {0}")]
    NoStoreRows(String),

    #[error("cannot parse term: {0:?}")]
    BadTerm(String),
}

/// Validation failures for an uploaded enrollment report.
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("enrollment report is missing required column: {0}")]
    MissingField(String),

    #[error("enrollment report has no usable rows")]
    Empty,
}
