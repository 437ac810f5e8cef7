use rusqlite::Connection;
use tracing::info;

use crate::StoreError;

pub fn run(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key     TEXT PRIMARY KEY,
            value   TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS set_members (
            key     TEXT NOT NULL,
            member  TEXT NOT NULL,
            PRIMARY KEY (key, member)
        );

        CREATE INDEX IF NOT EXISTS idx_set_members_key
            ON set_members(key);

        CREATE TABLE IF NOT EXISTS list_entries (
            seq     INTEGER PRIMARY KEY AUTOINCREMENT,
            key     TEXT NOT NULL,
            value   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_list_entries_key
            ON list_entries(key, seq);

        -- One expiry row per key regardless of which table holds the data.
        CREATE TABLE IF NOT EXISTS expiry (
            key         TEXT PRIMARY KEY,
            expires_at  INTEGER NOT NULL
        );
        ",
    )?;

    info!("Store migrations complete");
    Ok(())
}
