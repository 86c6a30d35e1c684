use std::path::Path;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::meta::{RefPolicy, Registry, TableSpec};

pub const DB_FILE: &str = "bookstore.sqlite3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Constraint-free shadow table for freshly parsed rows.
    Staging,
    /// The real table, with keys and references.
    Final,
}

/// Compile one CREATE statement from a table's metadata. Deterministic:
/// the same spec always yields the same text.
pub fn create_table_sql(spec: &TableSpec, mode: Mode) -> String {
    let mut parts: Vec<String> = Vec::new();

    for col in spec.columns {
        let mut rendered = format!("{} {}", col.name, col.ty.sql());
        let nullable_ref = matches!(
            col.reference,
            Some(r) if r.policy == RefPolicy::SetNull
        );
        if mode == Mode::Final && spec.is_key(col.name) && !nullable_ref {
            rendered.push_str(" NOT NULL");
        }
        parts.push(rendered);
    }

    if mode == Mode::Final {
        for col in spec.columns {
            if let Some(r) = col.reference {
                parts.push(format!("FOREIGN KEY ({}) REFERENCES {}", col.name, r.table));
            }
        }
        parts.push(format!("PRIMARY KEY ({})", spec.key.join(", ")));
    }

    match mode {
        Mode::Staging => format!(
            "CREATE TEMP TABLE {} ({})",
            spec.staging_name(),
            parts.join(", ")
        ),
        Mode::Final => format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            spec.name,
            parts.join(", ")
        ),
    }
}

pub fn index_sql(spec: &TableSpec) -> Vec<String> {
    spec.indexes
        .iter()
        .map(|cols| {
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
                spec.name,
                cols.join("_"),
                spec.name,
                cols.join(", ")
            )
        })
        .collect()
}

/// Open (or create) the workspace database and make sure every table
/// exists. Existing data is left alone; `rebuild_all` is the destructive
/// path.
pub fn open_db(workspace: &Path, registry: &Registry) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_all(&conn, registry)?;
    Ok(conn)
}

pub fn create_all(conn: &Connection, registry: &Registry) -> Result<(), StoreError> {
    for spec in registry.merge_order() {
        create_one(conn, spec)?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ingest_log(
            table_name TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            staged INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            merged INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| StoreError::ddl("ingest_log", e))?;

    Ok(())
}

fn create_one(conn: &Connection, spec: &TableSpec) -> Result<(), StoreError> {
    conn.execute(&create_table_sql(spec, Mode::Final), [])
        .map_err(|e| StoreError::ddl(spec.name, e))?;
    for stmt in index_sql(spec) {
        conn.execute(&stmt, [])
            .map_err(|e| StoreError::ddl(spec.name, e))?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub rebuilt: Vec<String>,
    pub failed: Vec<RebuildFailure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildFailure {
    pub table: String,
    pub error: String,
}

/// Drop and recreate every registry table. Per-table fail-soft: one bad
/// table is reported and the rest still rebuild.
pub fn rebuild_all(conn: &Connection, registry: &Registry) -> RebuildReport {
    let mut report = RebuildReport {
        rebuilt: Vec::new(),
        failed: Vec::new(),
    };

    // Children first, so referenced tables can drop cleanly.
    for spec in registry.merge_order().iter().rev() {
        if let Err(e) = conn
            .execute(&format!("DROP TABLE IF EXISTS {}", spec.name), [])
            .map_err(|e| StoreError::ddl(spec.name, e))
        {
            warn!(table = spec.name, error = %e, "drop failed");
            report.failed.push(RebuildFailure {
                table: spec.name.to_string(),
                error: e.to_string(),
            });
        }
    }

    for spec in registry.merge_order() {
        if report.failed.iter().any(|f| f.table == spec.name) {
            continue;
        }
        match create_one(conn, spec) {
            Ok(()) => report.rebuilt.push(spec.name.to_string()),
            Err(e) => {
                warn!(table = spec.name, error = %e, "rebuild failed");
                report.failed.push(RebuildFailure {
                    table: spec.name.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    if let Err(e) = conn.execute("DELETE FROM ingest_log", []) {
        warn!(error = %e, "could not reset ingest log");
    }

    info!(
        rebuilt = report.rebuilt.len(),
        failed = report.failed.len(),
        "schema rebuilt"
    );
    report
}
