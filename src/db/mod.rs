mod sqlite;

pub mod config;
pub mod types;

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use sqlite::{SqliteConnection, SqliteTransaction};
use types::{Connection, PathRecord, RepoRecord, Transaction, UserRecord};

pub struct Database {
    conn: Mutex<UnionConnection>,
}

impl Database {
    pub fn new(conn: UnionConnection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    #[cfg(test)]
    pub fn new_test() -> Self {
        let conn = SqliteConnection::memory().unwrap();
        Self::new(UnionConnection::Sqlite(conn))
    }

    /// Runs raw statements against the underlying connection. Tests use this
    /// to play the part of the administration tool that owns the tables.
    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(e) => bail!("failed to lock connection: {:#}", e),
        };
        match &*conn {
            UnionConnection::Sqlite(conn) => conn.execute_batch(sql),
        }
    }

    pub fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Transaction) -> Result<T>,
    {
        let mut conn = match self.conn.lock() {
            Ok(conn) => conn,
            Err(e) => bail!("failed to lock connection: {:#}", e),
        };
        let tx = conn.transaction()?;

        let result = f(&tx);

        if result.is_ok() {
            tx.commit()
        } else {
            tx.rollback()
        }?;

        result
    }
}

pub enum UnionConnection {
    Sqlite(SqliteConnection),
}

pub enum UnionTransaction<'a> {
    Sqlite(SqliteTransaction<'a>),
}

impl<'a> Connection<'a, UnionTransaction<'a>> for UnionConnection {
    fn transaction(&'a mut self) -> Result<UnionTransaction<'a>> {
        match self {
            UnionConnection::Sqlite(conn) => conn.transaction().map(UnionTransaction::Sqlite),
        }
    }
}

impl Transaction for UnionTransaction<'_> {
    fn modified_repositories(&self, since: u64) -> Result<Vec<RepoRecord>> {
        match self {
            UnionTransaction::Sqlite(tx) => tx.modified_repositories(since),
        }
    }

    fn removed_repositories(&self, since: u64) -> Result<Vec<RepoRecord>> {
        match self {
            UnionTransaction::Sqlite(tx) => tx.removed_repositories(since),
        }
    }

    fn repository_paths(&self, rid: u64) -> Result<Vec<PathRecord>> {
        match self {
            UnionTransaction::Sqlite(tx) => tx.repository_paths(rid),
        }
    }

    fn modified_users(&self, since: u64) -> Result<Vec<UserRecord>> {
        match self {
            UnionTransaction::Sqlite(tx) => tx.modified_users(since),
        }
    }

    fn removed_users(&self, since: u64) -> Result<Vec<UserRecord>> {
        match self {
            UnionTransaction::Sqlite(tx) => tx.removed_users(since),
        }
    }

    fn user_grants(&self, uid: u64) -> Result<HashMap<u64, u32>> {
        match self {
            UnionTransaction::Sqlite(tx) => tx.user_grants(uid),
        }
    }

    fn commit(self) -> Result<()> {
        match self {
            UnionTransaction::Sqlite(tx) => tx.commit(),
        }
    }

    fn rollback(self) -> Result<()> {
        match self {
            UnionTransaction::Sqlite(tx) => tx.rollback(),
        }
    }
}
