use anyhow::Result;
use log::debug;
use rusqlite::{params, Connection, Transaction};

use crate::db::types::{PathRecord, RepoRecord};

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS svn_repos (
    rid INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    last_modify_time INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_svn_repos_modify ON svn_repos (last_modify_time);

CREATE TABLE IF NOT EXISTS svn_path (
    pid INTEGER PRIMARY KEY NOT NULL,
    rid INTEGER NOT NULL,
    path TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_svn_path_rid ON svn_path (rid);
"#;

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES_SQL)?;
    Ok(())
}

/// With `removed`, returns the logically deleted repositories instead of the
/// active ones.
pub fn list_modified(tx: &Transaction, since: u64, removed: bool) -> Result<Vec<RepoRecord>> {
    let sql = if removed {
        r#"
        SELECT rid, name, last_modify_time FROM svn_repos
        WHERE last_modify_time > ? AND status != 0
        ORDER BY last_modify_time ASC
        "#
    } else {
        r#"
        SELECT rid, name, last_modify_time FROM svn_repos
        WHERE last_modify_time > ? AND status = 0
        ORDER BY last_modify_time ASC
        "#
    };
    debug!("Database list_modified_repos: {sql}, {since}, removed={removed}");

    let mut stmt = tx.prepare(sql)?;
    let repos = stmt
        .query_map(params![since], |row| {
            Ok(RepoRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                modify_time: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(repos)
}

pub fn list_paths(tx: &Transaction, rid: u64) -> Result<Vec<PathRecord>> {
    let sql = "SELECT pid, path FROM svn_path WHERE rid = ? AND status = 0 ORDER BY pid ASC";
    debug!("Database list_paths: {sql}, {rid}");

    let mut stmt = tx.prepare(sql)?;
    let paths = stmt
        .query_map(params![rid], |row| {
            Ok(PathRecord {
                pid: row.get(0)?,
                path: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(paths)
}
