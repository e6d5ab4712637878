use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::combinator::combine;
use crate::error::MigrationError;
use crate::scanner::{location_scanner, read_location};
use crate::schema::{custom_backup_table_sql, global_backup_table_sql, row_count, table_exists};
use crate::services::{AliasDestination, AliasService, MODULE_SCHEME, UrlAlias};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BackupReport {
    pub table: String,
    pub locations: usize,
    pub aliases: usize,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomBackupRow {
    pub id: i64,
    pub location_id: i64,
    pub path: String,
    pub language_code: String,
    pub always_available: bool,
    pub forwarding: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalBackupRow {
    pub id: i64,
    pub resource: String,
    pub path: String,
    pub language_code: String,
    pub always_available: bool,
    pub forwarding: bool,
}

/// Snapshot every custom location alias, one row per resolved path.
///
/// Reads go to whatever table `aliases` is bound to, which is the live table
/// outside of a `TableScope`.
pub fn backup_custom_location_aliases(
    connection: &Connection,
    aliases: &mut dyn AliasService,
    table: &str,
    page_size: usize,
) -> Result<BackupReport> {
    prepare_backup_table(connection, table, &custom_backup_table_sql(table)?)?;
    let scanner = location_scanner(page_size)?;
    let total = scanner.total_rows(connection)?;
    let pages = scanner.page_count(total);
    info!(table, total_locations = total, pages, "backing up custom location aliases");

    let mut report = BackupReport {
        table: table.to_string(),
        ..BackupReport::default()
    };
    let insert_sql = format!(
        "INSERT INTO {table} (id, location_id, path, language_code, always_available, forwarding)
         VALUES (NULL, ?1, ?2, ?3, ?4, ?5)"
    );
    for pass in 0..pages {
        for location in scanner.fetch_page(connection, pass, read_location)? {
            report.locations += 1;
            for alias in aliases.list_location_aliases(location.node_id, true)? {
                report.aliases += 1;
                let language_code = primary_language(&alias)?;
                for path in combine(&alias.path_data)
                    .with_context(|| format!("bad path data on location {}", location.node_id))?
                {
                    connection
                        .execute(
                            &insert_sql,
                            params![
                                location.node_id,
                                path,
                                language_code,
                                alias.always_available,
                                alias.forward,
                            ],
                        )
                        .with_context(|| format!("failed to back up {path:?} into {table}"))?;
                    debug!(location_id = location.node_id, path = %path, "backed up custom alias");
                    report.rows += 1;
                }
            }
        }
        info!(
            pass = pass + 1,
            pages,
            aliases = report.aliases,
            rows = report.rows,
            "custom alias backup progress"
        );
    }
    Ok(report)
}

/// Snapshot every global alias in one read; global aliases are few.
pub fn backup_global_aliases(
    connection: &Connection,
    aliases: &mut dyn AliasService,
    table: &str,
) -> Result<BackupReport> {
    prepare_backup_table(connection, table, &global_backup_table_sql(table)?)?;
    let globals = aliases.list_global_aliases()?;
    info!(table, aliases = globals.len(), "backing up global aliases");

    let mut report = BackupReport {
        table: table.to_string(),
        ..BackupReport::default()
    };
    let insert_sql = format!(
        "INSERT INTO {table} (id, resource, path, language_code, always_available, forwarding)
         VALUES (NULL, ?1, ?2, ?3, ?4, ?5)"
    );
    for alias in &globals {
        report.aliases += 1;
        let resource = match &alias.destination {
            AliasDestination::Resource(resource) => format!("{MODULE_SCHEME}{resource}"),
            AliasDestination::Location(id) => {
                return Err(MigrationError::InvalidArgument(format!(
                    "global alias listing returned location {id}"
                ))
                .into());
            }
        };
        let language_code = primary_language(alias)?;
        for path in combine(&alias.path_data)
            .with_context(|| format!("bad path data on global alias {resource}"))?
        {
            connection
                .execute(
                    &insert_sql,
                    params![
                        resource,
                        path,
                        language_code,
                        alias.always_available,
                        alias.forward
                    ],
                )
                .with_context(|| format!("failed to back up {path:?} into {table}"))?;
            report.rows += 1;
        }
    }
    Ok(report)
}

pub fn read_custom_backup_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CustomBackupRow> {
    Ok(CustomBackupRow {
        id: row.get(0)?,
        location_id: row.get(1)?,
        path: row.get(2)?,
        language_code: row.get(3)?,
        always_available: row.get(4)?,
        forwarding: row.get(5)?,
    })
}

pub fn read_global_backup_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GlobalBackupRow> {
    Ok(GlobalBackupRow {
        id: row.get(0)?,
        resource: row.get(1)?,
        path: row.get(2)?,
        language_code: row.get(3)?,
        always_available: row.get(4)?,
        forwarding: row.get(5)?,
    })
}

fn prepare_backup_table(connection: &Connection, table: &str, create_sql: &str) -> Result<()> {
    if table_exists(connection, table)? {
        let rows = row_count(connection, table)?;
        if rows > 0 {
            return Err(MigrationError::PreconditionFailed(format!(
                "backup table {table} contains data ({rows} rows); clear it before running the backup again"
            ))
            .into());
        }
        return Ok(());
    }
    connection
        .execute_batch(create_sql)
        .with_context(|| format!("failed to create backup table {table}"))?;
    info!(table, "created backup table");
    Ok(())
}

fn primary_language(alias: &UrlAlias) -> Result<&str> {
    alias.primary_language_code().ok_or_else(|| {
        MigrationError::InvalidArgument(format!(
            "alias for {:?} has no language codes",
            alias.destination
        ))
        .into()
    })
}
