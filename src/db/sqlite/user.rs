use std::collections::HashMap;

use anyhow::Result;
use log::debug;
use rusqlite::{params, Connection, Transaction};

use crate::db::types::UserRecord;

const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS svn_user (
    uid INTEGER PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    last_modify_time INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_svn_user_modify ON svn_user (last_modify_time);

CREATE TABLE IF NOT EXISTS svn_perm_path (
    uid INTEGER NOT NULL,
    pid INTEGER NOT NULL,
    perm INTEGER NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (uid, pid)
);
"#;

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES_SQL)?;
    Ok(())
}

pub fn list_modified(tx: &Transaction, since: u64, removed: bool) -> Result<Vec<UserRecord>> {
    let sql = if removed {
        r#"
        SELECT uid, name, last_modify_time FROM svn_user
        WHERE last_modify_time > ? AND status != 0
        ORDER BY last_modify_time ASC
        "#
    } else {
        r#"
        SELECT uid, name, last_modify_time FROM svn_user
        WHERE last_modify_time > ? AND status = 0
        ORDER BY last_modify_time ASC
        "#
    };
    debug!("Database list_modified_users: {sql}, {since}, removed={removed}");

    let mut stmt = tx.prepare(sql)?;
    let users = stmt
        .query_map(params![since], |row| {
            Ok(UserRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                modify_time: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(users)
}

pub fn list_grants(tx: &Transaction, uid: u64) -> Result<HashMap<u64, u32>> {
    let sql = "SELECT pid, perm FROM svn_perm_path WHERE uid = ? AND status = 0";
    debug!("Database list_grants: {sql}, {uid}");

    let mut stmt = tx.prepare(sql)?;
    let grants = stmt
        .query_map(params![uid], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<HashMap<u64, u32>, _>>()?;

    Ok(grants)
}
