use std::collections::HashMap;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::feed;
use crate::merge;
use crate::meta::{ColumnType, RefPolicy, Registry, Source, TableSpec};
use crate::schema::{self, Mode};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub run_id: String,
    pub tables: Vec<TableReport>,
    /// Files whose stem matched no registry table.
    pub unmatched: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReport {
    pub table: String,
    pub staged: usize,
    pub skipped: usize,
    pub merged: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One full pipeline run. Tables are visited in registry merge order so
/// reference targets land before the rows that point at them; each
/// table is staged and merged inside its own transaction, and one
/// table's failure leaves the others untouched.
pub fn ingest_files(conn: &Connection, registry: &Registry, paths: &[PathBuf]) -> IngestReport {
    let run_id = Uuid::new_v4().to_string();
    let mut by_table: HashMap<&str, &Path> = HashMap::new();
    let mut unmatched = Vec::new();

    for path in paths {
        let stem = feed::file_stem(path).unwrap_or("");
        match registry.match_feed(stem) {
            // First file wins when two stems name the same table.
            Some(spec) => {
                by_table.entry(spec.name).or_insert(path.as_path());
            }
            None => {
                warn!(file = %path.display(), "no table matches file");
                unmatched.push(path.display().to_string());
            }
        }
    }

    let mut tables = Vec::new();
    for spec in registry.merge_order() {
        let Some(path) = by_table.get(spec.name) else {
            continue;
        };
        let report = match run_table(conn, registry, spec, path, &run_id) {
            Ok(r) => r,
            Err(e) => {
                warn!(table = spec.name, error = %e, "table ingest failed");
                TableReport {
                    table: spec.name.to_string(),
                    staged: 0,
                    skipped: 0,
                    merged: 0,
                    error: Some(e.to_string()),
                }
            }
        };
        tables.push(report);
    }

    IngestReport {
        run_id,
        tables,
        unmatched,
    }
}

fn run_table(
    conn: &Connection,
    registry: &Registry,
    spec: &TableSpec,
    path: &Path,
    run_id: &str,
) -> Result<TableReport, StoreError> {
    let records = feed::read_snapshot(path)
        .map_err(|e| StoreError::schema(spec.name, format!("cannot read feed file: {e:#}")))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| StoreError::merge(spec.name, e))?;

    tx.execute(
        &format!("DROP TABLE IF EXISTS {}", spec.staging_name()),
        [],
    )
    .map_err(|e| StoreError::ddl(spec.name, e))?;
    tx.execute(&schema::create_table_sql(spec, Mode::Staging), [])
        .map_err(|e| StoreError::ddl(spec.name, e))?;

    let cols: Vec<&str> = spec.columns.iter().map(|c| c.name).collect();
    let placeholders: Vec<&str> = spec.columns.iter().map(|_| "?").collect();
    let mut insert = tx
        .prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            spec.staging_name(),
            cols.join(", "),
            placeholders.join(", ")
        ))
        .map_err(|e| StoreError::ddl(spec.name, e))?;

    let mut staged = 0usize;
    let mut skipped = 0usize;
    for (i, record) in records.iter().enumerate() {
        let values = match project_row(spec, record) {
            Ok(v) => v,
            Err(reason) => {
                warn!(table = spec.name, row = i + 1, %reason, "row skipped");
                skipped += 1;
                continue;
            }
        };
        match insert.execute(params_from_iter(values)) {
            Ok(_) => staged += 1,
            Err(e) => {
                warn!(table = spec.name, row = i + 1, error = %e, "staging insert failed, row skipped");
                skipped += 1;
            }
        }
    }
    drop(insert);

    let merged = merge::run(&tx, spec, registry)?;

    tx.execute(
        "INSERT INTO ingest_log (table_name, run_id, finished_at, staged, skipped, merged)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(table_name) DO UPDATE SET
           run_id = excluded.run_id,
           finished_at = excluded.finished_at,
           staged = excluded.staged,
           skipped = excluded.skipped,
           merged = excluded.merged",
        rusqlite::params![
            spec.name,
            run_id,
            chrono::Utc::now().to_rfc3339(),
            staged as i64,
            skipped as i64,
            merged as i64,
        ],
    )
    .map_err(|e| StoreError::merge(spec.name, e))?;

    tx.commit().map_err(|e| StoreError::merge(spec.name, e))?;

    info!(table = spec.name, staged, skipped, merged, "table merged");
    Ok(TableReport {
        table: spec.name.to_string(),
        staged,
        skipped,
        merged,
        error: None,
    })
}

/// Project one feed record onto the table's SQL columns. Key columns
/// must produce a value unless their reference is NULL-repairable;
/// everything else degrades to NULL when the source field is blank.
fn project_row(spec: &TableSpec, record: &StringRecord) -> Result<Vec<Value>, String> {
    let index_of = |field: &str| -> usize {
        spec.source_headers
            .iter()
            .position(|h| *h == field)
            .expect("validated source field")
    };

    let mut values = Vec::with_capacity(spec.columns.len());
    for col in spec.columns {
        let raw: Option<String> = match col.source {
            Source::Field(f) => record.get(index_of(f)).map(str::to_string),
            Source::Concat(fields) => {
                let joined: String = fields
                    .iter()
                    .map(|f| record.get(index_of(*f)).unwrap_or(""))
                    .collect();
                Some(joined)
            }
        };

        let trimmed = raw.as_deref().map(str::trim).unwrap_or("");
        let value = if trimmed.is_empty() {
            Value::Null
        } else {
            match col.ty {
                ColumnType::Integer => trimmed
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|_| format!("column {}: not an integer: {trimmed:?}", col.name))?,
                ColumnType::Real => trimmed
                    .parse::<f64>()
                    .map(Value::Real)
                    .map_err(|_| format!("column {}: not a number: {trimmed:?}", col.name))?,
                ColumnType::Text => Value::Text(trimmed.to_string()),
            }
        };

        let repairable = matches!(
            col.reference.map(|r| r.policy),
            Some(RefPolicy::SetNull)
        );
        if value == Value::Null && spec.is_key(col.name) && !repairable {
            return Err(format!("column {}: missing key value", col.name));
        }
        values.push(value);
    }
    Ok(values)
}
