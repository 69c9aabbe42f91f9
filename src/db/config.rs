use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{CommonConfig, PathSet};

use super::sqlite::config::SqliteConfig;
use super::{Database, UnionConnection};

/// Backing store holding repositories, paths, users and grants.
#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct DbConfig {
    #[serde(default)]
    pub name: DbType,

    /// Only used when `name` is sqlite.
    #[serde(default)]
    pub sqlite: SqliteConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy)]
pub enum DbType {
    #[default]
    #[serde(rename = "sqlite")]
    Sqlite,
}

impl CommonConfig for DbConfig {
    fn complete(&mut self, ps: &PathSet) -> Result<()> {
        self.sqlite.complete(ps).context("sqlite")?;
        Ok(())
    }
}

impl DbConfig {
    pub fn build(&self) -> Result<Arc<Database>> {
        let conn = match self.name {
            DbType::Sqlite => UnionConnection::Sqlite(self.sqlite.build()?),
        };
        Ok(Arc::new(Database::new(conn)))
    }
}
