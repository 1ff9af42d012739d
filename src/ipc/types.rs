use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One JSON line on stdin. `params` defaults to `null` so bare methods
/// like `health` need no params object.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything is scoped to the selected workspace; both fields stay `None`
/// until the first successful `workspace.select`.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
