//! Database schema migrations for osdi-sync.
//!
//! Migrations are versioned and applied automatically when opening the database.
//! The `schema_version` table tracks the current migration version.

use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 3;

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    let version = conn
        .query_row("SELECT version FROM schema_version", [], |row| {
            row.get::<_, i32>(0)
        })
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: settings and the sync link table.
///
/// The two unique indexes enforce the 1:1 mapping per profile and entity type.
/// Multiple NULL ids are allowed so half-linked rows never collide.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            id                            INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type                   TEXT NOT NULL,
            sync_profile_id               INTEGER NOT NULL,
            local_id                      TEXT,
            remote_id                     TEXT,
            sync_origin                   TEXT,
            sync_status                   TEXT,
            sync_time                     TEXT,
            local_pre_sync_modified_time  TEXT,
            local_post_sync_modified_time TEXT,
            remote_pre_sync_modified_time TEXT,
            remote_post_sync_modified_time TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_state_local
            ON sync_state(entity_type, local_id, sync_profile_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_state_remote
            ON sync_state(entity_type, remote_id, sync_profile_id);",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: local CRM tables.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS contact (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name     TEXT,
            last_name      TEXT,
            email          TEXT COLLATE NOCASE,
            phone          TEXT,
            street_address TEXT,
            city           TEXT,
            state_province TEXT,
            postal_code    TEXT,
            country        TEXT,
            is_opt_out     INTEGER NOT NULL DEFAULT 0,
            do_not_email   INTEGER NOT NULL DEFAULT 0,
            is_deleted     INTEGER NOT NULL DEFAULT 0,
            modified_date  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tag (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            name          TEXT NOT NULL UNIQUE,
            description   TEXT,
            modified_date TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entity_tag (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_id    TEXT NOT NULL,
            tag_id        TEXT NOT NULL,
            modified_date TEXT NOT NULL,
            UNIQUE (contact_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS contribution (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            contact_id     TEXT NOT NULL,
            total_amount   TEXT NOT NULL,
            currency       TEXT NOT NULL DEFAULT 'USD',
            receive_date   TEXT NOT NULL,
            financial_type TEXT NOT NULL DEFAULT 'Donation',
            status         TEXT NOT NULL DEFAULT 'Completed',
            modified_date  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_contact_email ON contact(email);
        CREATE INDEX IF NOT EXISTS idx_contact_modified ON contact(modified_date);
        CREATE INDEX IF NOT EXISTS idx_tag_modified ON tag(modified_date);
        CREATE INDEX IF NOT EXISTS idx_entity_tag_modified ON entity_tag(modified_date);
        CREATE INDEX IF NOT EXISTS idx_contribution_modified ON contribution(modified_date);",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}

/// Migration v3: reactive sync queue.
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS sync_queue (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            local_id    TEXT NOT NULL,
            operation   TEXT NOT NULL,
            status      TEXT NOT NULL DEFAULT 'pending',
            attempts    INTEGER NOT NULL DEFAULT 0,
            last_error  TEXT,
            ready_at    TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sync_queue_ready ON sync_queue(status, ready_at);",
    )?;
    set_schema_version(&tx, 3)?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_fresh_database_reaches_current_version() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn sync_state_allows_many_unlinked_rows() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        for local in ["1", "2"] {
            conn.execute(
                "INSERT INTO sync_state (entity_type, sync_profile_id, local_id) VALUES ('person', 1, ?1)",
                [local],
            )
            .unwrap();
        }
        let dup = conn.execute(
            "INSERT INTO sync_state (entity_type, sync_profile_id, local_id) VALUES ('person', 1, '1')",
            [],
        );
        assert!(dup.is_err());
    }
}
