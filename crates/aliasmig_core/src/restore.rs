use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::backup::{read_custom_backup_row, read_global_backup_row};
use crate::binding::{CreateOutcome, MigrationAliases};
use crate::config::TableNames;
use crate::error::MigrationError;
use crate::scanner::BulkScanner;
use crate::schema::table_exists;
use crate::services::{AliasService, AliasTable};

const BACKUP_COLUMNS_CUSTOM: &str =
    "id, location_id, path, language_code, always_available, forwarding";
const BACKUP_COLUMNS_GLOBAL: &str =
    "id, resource, path, language_code, always_available, forwarding";

/// Outcome of replaying one backup table. `created + conflicts == total_rows`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RestoreReport {
    pub table: String,
    pub total_rows: usize,
    pub created: usize,
    pub conflicts: usize,
}

impl RestoreReport {
    fn record(&mut self, outcome: CreateOutcome) {
        match outcome {
            CreateOutcome::Created => self.created += 1,
            CreateOutcome::Conflict => self.conflicts += 1,
        }
    }
}

pub fn restore_custom_location_aliases(
    connection: &Connection,
    aliases: &mut dyn AliasService,
    tables: &TableNames,
    page_size: usize,
) -> Result<RestoreReport> {
    let backup_table = tables.backup_custom.as_str();
    ensure_restore_tables(connection, tables, backup_table, "backup-custom")?;
    let scanner = BulkScanner::new(backup_table, BACKUP_COLUMNS_CUSTOM, "id ASC", page_size)?;
    let total = scanner.total_rows(connection)?;
    let pages = scanner.page_count(total);
    info!(backup_table, total_rows = total, pages, "restoring custom location aliases");

    let mut report = RestoreReport {
        table: backup_table.to_string(),
        ..RestoreReport::default()
    };
    let mut targeted = MigrationAliases::new(aliases);
    for pass in 0..pages {
        for row in scanner.fetch_page(connection, pass, read_custom_backup_row)? {
            let outcome = targeted
                .create_custom(
                    AliasTable::Migration,
                    row.location_id,
                    &row.path,
                    row.forwarding,
                    &row.language_code,
                    row.always_available,
                )
                .with_context(|| {
                    format!(
                        "failed to restore custom alias {:?} for location {} (backup row {})",
                        row.path, row.location_id, row.id
                    )
                })?;
            if outcome == CreateOutcome::Conflict {
                warn!(
                    backup_row = row.id,
                    location_id = row.location_id,
                    path = %row.path,
                    "custom alias conflicts with an existing path"
                );
            }
            report.total_rows += 1;
            report.record(outcome);
        }
        info!(
            pass = pass + 1,
            pages,
            created = report.created,
            conflicts = report.conflicts,
            "custom alias restore progress"
        );
    }
    Ok(report)
}

pub fn restore_global_aliases(
    connection: &Connection,
    aliases: &mut dyn AliasService,
    tables: &TableNames,
    page_size: usize,
) -> Result<RestoreReport> {
    let backup_table = tables.backup_global.as_str();
    ensure_restore_tables(connection, tables, backup_table, "backup-global")?;
    let scanner = BulkScanner::new(backup_table, BACKUP_COLUMNS_GLOBAL, "id ASC", page_size)?;
    let total = scanner.total_rows(connection)?;
    let pages = scanner.page_count(total);
    info!(backup_table, total_rows = total, pages, "restoring global aliases");

    let mut report = RestoreReport {
        table: backup_table.to_string(),
        ..RestoreReport::default()
    };
    let mut targeted = MigrationAliases::new(aliases);
    for pass in 0..pages {
        for row in scanner.fetch_page(connection, pass, read_global_backup_row)? {
            let outcome = targeted
                .create_global(
                    AliasTable::Migration,
                    &row.resource,
                    &row.path,
                    row.forwarding,
                    &row.language_code,
                    row.always_available,
                )
                .with_context(|| {
                    format!(
                        "failed to restore global alias {:?} -> {} (backup row {})",
                        row.path, row.resource, row.id
                    )
                })?;
            if outcome == CreateOutcome::Conflict {
                warn!(
                    backup_row = row.id,
                    resource = %row.resource,
                    path = %row.path,
                    "global alias conflicts with an existing path"
                );
            }
            report.total_rows += 1;
            report.record(outcome);
        }
        info!(
            pass = pass + 1,
            pages,
            created = report.created,
            conflicts = report.conflicts,
            "global alias restore progress"
        );
    }
    Ok(report)
}

fn ensure_restore_tables(
    connection: &Connection,
    tables: &TableNames,
    backup_table: &str,
    creating_action: &str,
) -> Result<()> {
    if !table_exists(connection, &tables.migration)? {
        return Err(MigrationError::PreconditionFailed(format!(
            "migration table {} does not exist; create it with `aliasmig init` and run `autogenerate`",
            tables.migration
        ))
        .into());
    }
    if !table_exists(connection, backup_table)? {
        return Err(MigrationError::PreconditionFailed(format!(
            "backup table {backup_table} does not exist; it is created by the `{creating_action}` action"
        ))
        .into());
    }
    Ok(())
}
