use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};

/// Read a headerless feed snapshot. Field order is declared in table
/// metadata; the file carries data rows only.
pub fn read_snapshot(path: &Path) -> Result<Vec<StringRecord>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(file);

    let mut records = Vec::new();
    for rec in rdr.records() {
        records.push(rec.with_context(|| format!("read {}", path.display()))?);
    }
    Ok(records)
}

/// Read an uploaded file that carries its own header row (decision
/// overrides, enrollment reports). Rows come back as field→value maps
/// keyed by the trimmed header names.
pub fn read_keyed(path: &Path) -> Result<(Vec<String>, Vec<HashMap<String, String>>)> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers: Vec<String> = rdr
        .headers()
        .with_context(|| format!("read header of {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|| format!("read {}", path.display()))?;
        let mut row = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            if let Some(v) = rec.get(i) {
                row.insert(h.clone(), v.trim().to_string());
            }
        }
        rows.push(row);
    }
    Ok((headers, rows))
}

pub fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}
