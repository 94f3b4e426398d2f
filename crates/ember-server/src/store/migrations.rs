//! Forward-only schema migrations
//!
//! Each entry runs once, in order, inside its own transaction; the
//! applied count lives in `schema_version`. Entries are append-only;
//! never edit a shipped migration.

use super::{Result, StoreError};
use sqlx::{Row, SqlitePool};

const MIGRATIONS: &[&str] = &[
    // 1: initial schema
    r#"
    CREATE TABLE IF NOT EXISTS images (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        name          TEXT NOT NULL,
        description   TEXT NOT NULL DEFAULT '',
        boot_flavor   TEXT NOT NULL DEFAULT 'linux',
        file_list     TEXT NOT NULL DEFAULT '',
        cmdline       TEXT NOT NULL DEFAULT '',
        ipxe_script   TEXT NOT NULL DEFAULT '',
        status        TEXT NOT NULL DEFAULT 'ready',
        status_detail TEXT NOT NULL DEFAULT '',
        catalog_id    TEXT NOT NULL DEFAULT '',
        catalog_hash  TEXT NOT NULL DEFAULT '',
        created_at    DATETIME NOT NULL DEFAULT (datetime('now')),
        updated_at    DATETIME NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS systems (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        mac              TEXT NOT NULL UNIQUE,
        hostname         TEXT NOT NULL DEFAULT '',
        image_id         INTEGER REFERENCES images(id) ON DELETE SET NULL,
        vars             TEXT NOT NULL DEFAULT '{}',
        ip_addr          TEXT NOT NULL DEFAULT '',
        last_seen_at     DATETIME,
        state            TEXT NOT NULL DEFAULT 'discovered',
        state_changed_at DATETIME,
        created_at       DATETIME NOT NULL DEFAULT (datetime('now')),
        updated_at       DATETIME NOT NULL DEFAULT (datetime('now'))
    );

    CREATE TABLE IF NOT EXISTS settings (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    INSERT OR IGNORE INTO settings (key, value) VALUES ('confirm_reimage', '1');
    "#,
    // 2: profiles and per-system variables
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL,
        description     TEXT NOT NULL DEFAULT '',
        os_family       TEXT NOT NULL DEFAULT 'custom',
        config_template TEXT NOT NULL DEFAULT '',
        kernel_params   TEXT NOT NULL DEFAULT '',
        default_vars    TEXT NOT NULL DEFAULT '{}',
        overlay_file    TEXT NOT NULL DEFAULT '',
        var_schema      TEXT NOT NULL DEFAULT '',
        catalog_id      TEXT NOT NULL DEFAULT '',
        created_at      DATETIME NOT NULL DEFAULT (datetime('now')),
        updated_at      DATETIME NOT NULL DEFAULT (datetime('now'))
    );

    ALTER TABLE systems ADD COLUMN profile_id INTEGER REFERENCES profiles(id) ON DELETE SET NULL;
    "#,
    // 3: webhook sinks
    r#"
    CREATE TABLE IF NOT EXISTS webhooks (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        url        TEXT NOT NULL,
        secret     TEXT NOT NULL DEFAULT '',
        events     TEXT NOT NULL DEFAULT '*',
        enabled    INTEGER NOT NULL DEFAULT 1,
        created_at DATETIME NOT NULL DEFAULT (datetime('now')),
        updated_at DATETIME NOT NULL DEFAULT (datetime('now'))
    );
    "#,
    // 4: catalog icon metadata
    r#"
    ALTER TABLE images ADD COLUMN icon TEXT NOT NULL DEFAULT '';
    ALTER TABLE images ADD COLUMN icon_color TEXT NOT NULL DEFAULT '';
    "#,
    // 5: one local record per catalog entry
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_images_catalog_id
        ON images(catalog_id) WHERE catalog_id != '';
    CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_catalog_id
        ON profiles(catalog_id) WHERE catalog_id != '';
    "#,
];

/// Apply all unapplied migrations
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .execute(pool)
        .await?;

    let row = sqlx::query("SELECT COALESCE(MAX(version), 0) AS version FROM schema_version")
        .fetch_one(pool)
        .await?;
    let current: i64 = row.get("version");
    let current = current as usize;

    for (i, migration) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = i as i64 + 1;
        let mut tx = pool.begin().await?;

        // SQLite executes one statement per call; split on blank-line-free
        // statement boundaries the migrations are written with
        for statement in migration.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(format!("migration {}: {}", version, e)))?;
        }

        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
    }

    Ok(())
}
