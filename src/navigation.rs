//! Where the browser is looking.
//!
//! The current directory survives restarts two ways: as the `path` query
//! parameter of a shareable location URL, and as the `currentPath` entry
//! of a small JSON key-value file. The query parameter wins on load.

use std::path::PathBuf;
use serde_json::{Map, Value};
use tracing::warn;
use url::Url;
use crate::api::normalize_path;
use crate::errors::Result;

const PATH_QUERY_KEY: &str = "path";
const PATH_STORE_KEY: &str = "currentPath";

pub const ROOT: &str = "/";

#[derive(Debug, Clone, Default)]
pub struct Location {
    url: Option<Url>,
    state_file: Option<PathBuf>,
}

impl Location {
    pub fn new(url: Option<Url>, state_file: Option<PathBuf>) -> Self {
        Self { url, state_file }
    }

    /// Query parameter, then stored value, then `/`.
    pub async fn initial_path(&self) -> String {
        if let Some(path) = self.query_path() {
            return path;
        }

        match self.read_store().await {
            Ok(store) => store
                .get(PATH_STORE_KEY)
                .and_then(Value::as_str)
                .filter(|path| !path.is_empty())
                .map(normalize_path)
                .unwrap_or_else(|| ROOT.to_string()),
            Err(err) => {
                warn!(error = %err, "Could not read the path store");
                ROOT.to_string()
            }
        }
    }

    /// Record `path` in both places. A failing store only logs.
    pub async fn remember(&mut self, path: &str) {
        let path = normalize_path(path);

        if let Some(url) = self.url.as_mut() {
            let others: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| key != PATH_QUERY_KEY)
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();

            let mut query = url.query_pairs_mut();
            query.clear();
            query.extend_pairs(others);
            query.append_pair(PATH_QUERY_KEY, &path);
        }

        if let Err(err) = self.write_store(&path).await {
            warn!(error = %err, "Could not persist the current path");
        }
    }

    /// Shareable location carrying the current path.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    fn query_path(&self) -> Option<String> {
        self.url
            .as_ref()?
            .query_pairs()
            .find(|(key, value)| key == PATH_QUERY_KEY && !value.is_empty())
            .map(|(_, value)| normalize_path(&value))
    }

    async fn read_store(&self) -> Result<Map<String, Value>> {
        let Some(state_file) = &self.state_file else {
            return Ok(Map::new());
        };

        match tokio::fs::read_to_string(state_file).await {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_store(&self, path: &str) -> Result<()> {
        let Some(state_file) = &self.state_file else {
            return Ok(());
        };

        // keep whatever else lives in the file
        let mut store = self.read_store().await.unwrap_or_default();
        store.insert(PATH_STORE_KEY.to_string(), Value::String(path.to_string()));

        let data = serde_json::to_string_pretty(&store)?;
        tokio::fs::write(state_file, data).await?;

        Ok(())
    }
}
