use anyhow::{Context, Result};
use log::debug;
use rusqlite::Connection;

/// Create the database schema
pub fn create_schema(conn: &mut Connection) -> Result<()> {
    debug!("Creating database schema");

    // All tables or none
    let tx = conn.transaction().context("Failed to start transaction for schema creation")?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            national_id TEXT UNIQUE NOT NULL,
            phone TEXT,
            address TEXT,
            credential_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            descriptor TEXT,
            face_capture BLOB,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create identities table")?;

    // Disabling keeps the row; only the flag changes
    tx.execute(
        "CREATE TABLE IF NOT EXISTS two_factor_auth (
            identity_id TEXT PRIMARY KEY,
            sealed_secret TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 0,
            enabled_at TEXT,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (identity_id) REFERENCES identities(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("Failed to create two_factor_auth table")?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS login_attempts (
            key TEXT PRIMARY KEY,
            count INTEGER NOT NULL,
            last_attempt TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create login_attempts table")?;

    // Append-only
    tx.execute(
        "CREATE TABLE IF NOT EXISTS audit_logs (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            identity_id TEXT,
            details TEXT,
            timestamp TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create audit_logs table")?;

    tx.execute("CREATE INDEX IF NOT EXISTS idx_identities_active ON identities(active)", [])
        .context("Failed to create identities index")?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_identity_id ON audit_logs(identity_id)",
        [],
    )
    .context("Failed to create audit_logs identity index")?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_logs_timestamp ON audit_logs(timestamp)",
        [],
    )
    .context("Failed to create audit_logs timestamp index")?;

    tx.commit().context("Failed to commit schema creation")?;

    debug!("Database schema created");
    Ok(())
}
