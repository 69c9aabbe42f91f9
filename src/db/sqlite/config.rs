use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{expandenv, CommonConfig, PathSet};

use super::SqliteConnection;

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct SqliteConfig {
    #[serde(default)]
    pub memory: bool,

    /// Database file, defaults to `svngate.db` under the data directory.
    #[serde(default)]
    pub path: String,
}

impl CommonConfig for SqliteConfig {
    fn complete(&mut self, ps: &PathSet) -> Result<()> {
        if self.memory {
            return Ok(());
        }

        self.path = expandenv("path", &self.path)?;
        if self.path.is_empty() {
            let path = ps.data_dir.join("svngate.db");
            self.path = format!("{}", path.display());
        }

        Ok(())
    }
}

impl SqliteConfig {
    pub fn build(&self) -> Result<SqliteConnection> {
        if self.memory {
            warn!("Using in-memory sqlite database, no permission will ever be loaded");
            return SqliteConnection::memory();
        }

        info!("Using sqlite database: {}", self.path);
        SqliteConnection::open(self.path.as_ref())
            .with_context(|| format!("open sqlite database '{}'", self.path))
    }
}
