use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info};

use crate::binding::MigrationAliases;
use crate::config::MigrationSettings;
use crate::error::MigrationError;
use crate::scanner::{location_scanner, read_location};
use crate::schema::{row_count, table_exists};
use crate::services::{AliasService, AliasTable, ContentService, NameSchemaResolver};

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RegenerateReport {
    pub table: String,
    pub locations: usize,
    pub published: usize,
    pub skipped_languages: usize,
    /// Locations with no accepted language, published in a fallback language.
    pub fallback_locations: usize,
}

/// Fails unless the migration table exists and holds no rows.
pub fn ensure_empty_migration_table(connection: &Connection, table: &str) -> Result<()> {
    if !table_exists(connection, table)? {
        return Err(MigrationError::PreconditionFailed(format!(
            "migration table {table} does not exist; create it with `aliasmig init`"
        ))
        .into());
    }
    let rows = row_count(connection, table)?;
    if rows > 0 {
        return Err(MigrationError::PreconditionFailed(format!(
            "migration table {table} contains data ({rows} rows); \
             it must be empty before autogenerate"
        ))
        .into());
    }
    Ok(())
}

/// Publish the autogenerated alias of every non-root location, for every
/// language, into the migration table.
///
/// Locations are visited by depth then id so each parent's element exists
/// before its children are named. Any failure aborts the run.
pub fn generate_location_aliases(
    connection: &Connection,
    content: &mut dyn ContentService,
    names: &dyn NameSchemaResolver,
    aliases: &mut dyn AliasService,
    settings: &MigrationSettings,
) -> Result<RegenerateReport> {
    let table = settings.tables.migration.as_str();
    ensure_empty_migration_table(connection, table)?;

    let scanner = location_scanner(settings.bulk_count)?;
    let total = scanner.total_rows(connection)?;
    let pages = scanner.page_count(total);
    info!(table, total_locations = total, pages, "regenerating location aliases");

    let mut report = RegenerateReport {
        table: table.to_string(),
        ..RegenerateReport::default()
    };
    let mut targeted = MigrationAliases::new(aliases);
    for pass in 0..pages {
        for location in scanner.fetch_page(connection, pass, read_location)? {
            let loaded = content.load_content(location.content_id).with_context(|| {
                format!("failed to load content of location {}", location.node_id)
            })?;
            let schema_names = names.resolve_url_alias_schema(&loaded)?;
            let mut selected: Vec<(String, String)> = schema_names
                .iter()
                .filter(|(language_code, _)| settings.accepts_language(language_code))
                .map(|(language_code, name)| (language_code.clone(), name.clone()))
                .collect();
            if selected.is_empty() {
                // Children are published under this element, so it needs one row.
                selected.push(fallback_name(&loaded.main_language_code, &schema_names));
                report.fallback_locations += 1;
                debug!(
                    location_id = location.node_id,
                    language_code = %selected[0].0,
                    "no accepted language; publishing fallback element"
                );
            }
            report.skipped_languages += schema_names.len().saturating_sub(selected.len());

            for (language_code, name) in &selected {
                targeted
                    .publish(
                        AliasTable::Migration,
                        location.node_id,
                        location.parent_node_id,
                        name,
                        language_code,
                        loaded.always_available,
                    )
                    .with_context(|| {
                        format!(
                            "failed to publish {language_code} alias for location {}",
                            location.node_id
                        )
                    })?;
                debug!(
                    location_id = location.node_id,
                    language_code = %language_code,
                    "published alias"
                );
                report.published += 1;
            }
            report.locations += 1;
        }
        info!(
            pass = pass + 1,
            pages,
            locations = report.locations,
            published = report.published,
            "autogenerate progress"
        );
    }
    Ok(report)
}

/// Main-language name, else the first resolved name, else an empty name that
/// the alias service turns into `node-<id>`.
fn fallback_name(
    main_language_code: &str,
    schema_names: &BTreeMap<String, String>,
) -> (String, String) {
    schema_names
        .get_key_value(main_language_code)
        .or_else(|| schema_names.iter().next())
        .map(|(language_code, name)| (language_code.clone(), name.clone()))
        .unwrap_or_else(|| (main_language_code.to_string(), String::new()))
}
