mod repos;
mod user;

pub mod config;

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use rusqlite::Connection as RawConnection;
use rusqlite::Transaction as RawTransaction;

use super::types::{Connection, PathRecord, RepoRecord, Transaction, UserRecord};

/// SQLite-backed permission store. The tables are owned by the administration
/// side; the gateway only creates them when missing and then reads.
pub struct SqliteConnection {
    conn: RawConnection,
}

pub struct SqliteTransaction<'a> {
    tx: RawTransaction<'a>,
}

impl SqliteConnection {
    /// Opens a SQLite database file. Creates one if it doesn't exist.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = RawConnection::open(path)?;
        Self::init_tables(&conn)?;
        Ok(Self { conn })
    }

    /// Creates a new in-memory database, for testing.
    pub fn memory() -> Result<Self> {
        let conn = RawConnection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn init_tables(conn: &RawConnection) -> Result<()> {
        repos::create_tables(conn)?;
        user::create_tables(conn)?;
        Ok(())
    }
}

impl<'a> Connection<'a, SqliteTransaction<'a>> for SqliteConnection {
    fn transaction(&'a mut self) -> Result<SqliteTransaction<'a>> {
        let tx = self.conn.transaction()?;
        Ok(SqliteTransaction { tx })
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn modified_repositories(&self, since: u64) -> Result<Vec<RepoRecord>> {
        repos::list_modified(&self.tx, since, false)
    }

    fn removed_repositories(&self, since: u64) -> Result<Vec<RepoRecord>> {
        repos::list_modified(&self.tx, since, true)
    }

    fn repository_paths(&self, rid: u64) -> Result<Vec<PathRecord>> {
        repos::list_paths(&self.tx, rid)
    }

    fn modified_users(&self, since: u64) -> Result<Vec<UserRecord>> {
        user::list_modified(&self.tx, since, false)
    }

    fn removed_users(&self, since: u64) -> Result<Vec<UserRecord>> {
        user::list_modified(&self.tx, since, true)
    }

    fn user_grants(&self, uid: u64) -> Result<HashMap<u64, u32>> {
        user::list_grants(&self.tx, uid)
    }

    fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self) -> Result<()> {
        self.tx.rollback()?;
        Ok(())
    }
}
