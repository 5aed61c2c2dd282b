use rusqlite::{Connection, OptionalExtension};

pub const SCHEMA_VERSION: i32 = 1;

/// Create all tables (drops existing tables first to ensure clean state)
pub fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS regions;
        DROP TABLE IF EXISTS meta;

        -- Run metadata (configuration, KDF parameters, timing)
        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- One row per closed region; times are ns since the trace epoch
        CREATE TABLE regions (
            id INTEGER PRIMARY KEY,
            task INTEGER NOT NULL,
            origin TEXT NOT NULL,
            name TEXT NOT NULL,
            thread TEXT,
            start_ns INTEGER NOT NULL,
            end_ns INTEGER NOT NULL,
            heap_live_start INTEGER NOT NULL DEFAULT 0,
            heap_live_end INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_regions_name ON regions(name);
        CREATE INDEX idx_regions_task ON regions(task);
        "#,
    )
}

/// Set a metadata key
pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        [key, value],
    )?;
    Ok(())
}

/// Get a metadata key
pub fn get_meta(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
        row.get(0)
    })
    .optional()
}
