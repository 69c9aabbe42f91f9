use std::collections::HashMap;

use anyhow::Result;

pub trait Connection<'a, T>
where
    T: Transaction + 'a,
{
    fn transaction(&'a mut self) -> Result<T>;
}

/// Read access to the permission tables. Every query skips logically deleted
/// rows unless its name says otherwise, and time filters are strict
/// (`modify_time > since`).
pub trait Transaction {
    fn modified_repositories(&self, since: u64) -> Result<Vec<RepoRecord>>;
    fn removed_repositories(&self, since: u64) -> Result<Vec<RepoRecord>>;
    fn repository_paths(&self, rid: u64) -> Result<Vec<PathRecord>>;

    fn modified_users(&self, since: u64) -> Result<Vec<UserRecord>>;
    fn removed_users(&self, since: u64) -> Result<Vec<UserRecord>>;
    fn user_grants(&self, uid: u64) -> Result<HashMap<u64, u32>>;

    fn commit(self) -> Result<()>;
    fn rollback(self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRecord {
    pub id: u64,
    pub name: String,
    pub modify_time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    pub pid: u64,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: u64,
    pub name: String,
    pub modify_time: u64,
}
