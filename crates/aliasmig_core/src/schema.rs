use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;

use crate::config::TableNames;
use crate::error::MigrationError;

/// Content tree and per-language names read by the pipeline.
pub const CONTENT_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS content (
    id INTEGER PRIMARY KEY,
    main_language_code TEXT NOT NULL,
    always_available INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS content_name (
    content_id INTEGER NOT NULL,
    language_code TEXT NOT NULL,
    name TEXT NOT NULL,
    PRIMARY KEY (content_id, language_code),
    FOREIGN KEY (content_id) REFERENCES content(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS location (
    node_id INTEGER PRIMARY KEY,
    parent_node_id INTEGER NOT NULL,
    content_id INTEGER NOT NULL,
    depth INTEGER NOT NULL,
    FOREIGN KEY (content_id) REFERENCES content(id)
);
CREATE INDEX IF NOT EXISTS idx_location_depth ON location(depth, node_id);
"#;

pub fn alias_table_sql(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent INTEGER NOT NULL,
    link INTEGER NOT NULL,
    text TEXT NOT NULL,
    lang_code TEXT NOT NULL,
    action TEXT NOT NULL,
    is_original INTEGER NOT NULL,
    is_alias INTEGER NOT NULL,
    always_available INTEGER NOT NULL,
    forward INTEGER NOT NULL,
    UNIQUE (parent, text, lang_code)
);
CREATE INDEX IF NOT EXISTS idx_{table}_action ON {table}(action);
CREATE INDEX IF NOT EXISTS idx_{table}_link ON {table}(link);"
    ))
}

pub fn custom_backup_table_sql(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    location_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    language_code TEXT NOT NULL,
    always_available INTEGER NOT NULL,
    forwarding INTEGER NOT NULL
);"
    ))
}

pub fn global_backup_table_sql(table: &str) -> Result<String> {
    validate_identifier(table)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    resource TEXT NOT NULL,
    path TEXT NOT NULL,
    language_code TEXT NOT NULL,
    always_available INTEGER NOT NULL,
    forwarding INTEGER NOT NULL
);"
    ))
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    if valid_start && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Ok(());
    }
    Err(MigrationError::InvalidArgument(format!("invalid table name: {name:?}")).into())
}

pub fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .busy_timeout(Duration::from_secs(5))
        .context("failed to set sqlite busy timeout")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    Ok(connection)
}

pub fn ensure_db_parent(db_path: &Path) -> Result<()> {
    let parent = db_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", db_path.display()))?;
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create database parent directory {}",
            parent.display()
        )
    })
}

pub fn table_exists(connection: &Connection, table_name: &str) -> Result<bool> {
    let exists: i64 = connection
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table_name],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to check sqlite_master for table {table_name}"))?;
    Ok(exists == 1)
}

pub fn row_count(connection: &Connection, table_name: &str) -> Result<usize> {
    validate_identifier(table_name)?;
    let count: i64 = connection
        .query_row(&format!("SELECT COUNT(*) FROM {table_name}"), [], |row| {
            row.get(0)
        })
        .with_context(|| format!("failed to count rows in {table_name}"))?;
    usize::try_from(count).context("count does not fit into usize")
}

/// Fails unless the content tree tables the pipeline reads are present.
pub fn ensure_content_storage(connection: &Connection) -> Result<()> {
    for table in ["content", "content_name", "location"] {
        if !table_exists(connection, table)? {
            return Err(MigrationError::PreconditionFailed(format!(
                "content storage table `{table}` is missing; run `aliasmig init` or point --data-dir at a content database"
            ))
            .into());
        }
    }
    Ok(())
}

/// Creates the content tables and both alias tables when absent.
pub fn initialize_storage(connection: &Connection, tables: &TableNames) -> Result<()> {
    connection
        .execute_batch(CONTENT_SCHEMA_SQL)
        .context("failed to initialize content schema")?;
    for table in [&tables.live, &tables.migration] {
        connection
            .execute_batch(&alias_table_sql(table)?)
            .with_context(|| format!("failed to create alias table {table}"))?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct TableStatus {
    pub role: &'static str,
    pub name: String,
    pub rows: Option<usize>,
}

/// Row counts for every table the pipeline touches; `None` when absent.
pub fn inspect_tables(connection: &Connection, tables: &TableNames) -> Result<Vec<TableStatus>> {
    let roles = [
        ("live", &tables.live),
        ("migration", &tables.migration),
        ("backup_custom", &tables.backup_custom),
        ("backup_global", &tables.backup_global),
    ];
    let mut out = Vec::with_capacity(roles.len());
    for (role, name) in roles {
        let rows = if table_exists(connection, name)? {
            Some(row_count(connection, name)?)
        } else {
            None
        };
        out.push(TableStatus {
            role,
            name: name.clone(),
            rows,
        });
    }
    Ok(out)
}
