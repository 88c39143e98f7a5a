use anyhow::{Result, Context};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::crawler::TestParam;

/// JSON file handing test params from the crawl to the smoke run
pub struct ParamsFile {
    path: PathBuf,
}

impl ParamsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the params as pretty printed JSON, replacing any previous file
    pub async fn write(&self, params: &[TestParam]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let contents = serde_json::to_string_pretty(params)
            .context("Failed to serialize test params")?;

        fs::write(&self.path, contents).await
            .context(format!("Failed to write test params: {}", self.path.display()))?;

        debug!(path = %self.path.display(), count = params.len(), "Test params written");

        Ok(())
    }

    pub async fn read(&self) -> Result<Vec<TestParam>> {
        let contents = fs::read_to_string(&self.path).await
            .context(format!("Failed to read test params: {}", self.path.display()))?;

        let params = serde_json::from_str(&contents)
            .context(format!("Failed to parse test params: {}", self.path.display()))?;

        Ok(params)
    }
}
