use rusqlite::Connection;

use crate::error::StoreError;
use crate::meta::{ColumnSpec, RefPolicy, Registry, TableSpec};

/// SELECT expression for one staged column. Optional references come
/// back repaired: the staged value when the referenced row exists, NULL
/// when it does not.
fn select_expr(c: &ColumnSpec, registry: &Registry) -> String {
    match c.reference {
        Some(r) if r.policy == RefPolicy::SetNull => format!(
            "CASE WHEN EXISTS (SELECT 1 FROM {t} WHERE {t}.{k} = s.{col}) \
             THEN s.{col} ELSE NULL END",
            t = r.table,
            k = registry.target_key(r.table),
            col = c.name,
        ),
        _ => format!("s.{}", c.name),
    }
}

/// Compile the staged-to-final upsert for one table.
///
/// Two shapes come out of here. The common one inserts every staged row
/// whose required references resolve and relies on ON CONFLICT against
/// the natural key for last-snapshot-wins updates. Tables with a
/// NULL-repairable reference in their key (the adoption join) get a
/// dedup shape instead, because NULL key components never conflict:
/// DISTINCT collapses repaired duplicates within the batch and a
/// null-safe NOT EXISTS keeps re-runs idempotent.
pub fn upsert_sql(spec: &TableSpec, registry: &Registry) -> String {
    let staging = spec.staging_name();
    let cols: Vec<&str> = spec.columns.iter().map(|c| c.name).collect();
    let exprs: Vec<String> = spec
        .columns
        .iter()
        .map(|c| select_expr(c, registry))
        .collect();

    let mut filters: Vec<String> = Vec::new();
    for c in spec.columns {
        if let Some(r) = c.reference {
            if r.policy == RefPolicy::Require {
                filters.push(format!(
                    "s.{} IN (SELECT {} FROM {})",
                    c.name,
                    registry.target_key(r.table),
                    r.table
                ));
            }
        }
    }

    let dedup = spec.nullable_key_refs().next().is_some();
    if dedup {
        let matches: Vec<String> = spec
            .columns
            .iter()
            .filter(|c| spec.is_key(c.name))
            .map(|c| format!("f.{} IS {}", c.name, select_expr(c, registry)))
            .collect();
        filters.push(format!(
            "NOT EXISTS (SELECT 1 FROM {} f WHERE {})",
            spec.name,
            matches.join(" AND ")
        ));
    }

    // The upsert grammar needs a WHERE on the SELECT even when there is
    // nothing to filter, or ON CONFLICT parses as a join constraint.
    let where_clause = if filters.is_empty() {
        "true".to_string()
    } else {
        filters.join(" AND ")
    };

    let conflict = {
        let sets: Vec<String> = spec
            .non_key_columns()
            .map(|c| format!("{n} = excluded.{n}", n = c.name))
            .collect();
        if dedup || sets.is_empty() {
            format!("ON CONFLICT({}) DO NOTHING", spec.key.join(", "))
        } else {
            format!(
                "ON CONFLICT({}) DO UPDATE SET {}",
                spec.key.join(", "),
                sets.join(", ")
            )
        }
    };

    format!(
        "INSERT INTO {name} ({cols}) SELECT {distinct}{exprs} FROM {staging} s \
         WHERE {where_clause} {conflict}",
        name = spec.name,
        cols = cols.join(", "),
        distinct = if dedup { "DISTINCT " } else { "" },
        exprs = exprs.join(", "),
    )
}

/// Execute the merge for one table inside the caller's transaction.
/// Returns the number of rows inserted or updated.
pub fn run(conn: &Connection, spec: &TableSpec, registry: &Registry) -> Result<usize, StoreError> {
    conn.execute(&upsert_sql(spec, registry), [])
        .map_err(|e| StoreError::merge(spec.name, e))
}
