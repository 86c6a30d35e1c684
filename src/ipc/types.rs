use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::decision;
use crate::meta::Registry;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub registry: Registry,
    /// Store number applied to uploaded decision files unless the
    /// request names another one.
    pub store_number: String,
}

impl AppState {
    pub fn new(registry: Registry) -> Self {
        AppState {
            workspace: None,
            db: None,
            registry,
            store_number: decision::DEFAULT_STORE.to_string(),
        }
    }
}
