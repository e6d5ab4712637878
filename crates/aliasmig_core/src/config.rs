use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::MigrationError;
use crate::schema::validate_identifier;

pub const DEFAULT_BULK_COUNT: usize = 50;
pub const DEFAULT_LIVE_TABLE: &str = "url_alias";
pub const DEFAULT_MIGRATION_TABLE: &str = "url_alias_migration";
pub const DEFAULT_BACKUP_CUSTOM_TABLE: &str = "url_alias_backup_custom";
pub const DEFAULT_BACKUP_GLOBAL_TABLE: &str = "url_alias_backup_global";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AliasmigConfig {
    #[serde(default)]
    pub migration: MigrationSection,
    #[serde(default)]
    pub tables: TableNames,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    pub bulk_count: Option<usize>,
    #[serde(default)]
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TableNames {
    pub live: String,
    pub migration: String,
    pub backup_custom: String,
    pub backup_global: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            live: DEFAULT_LIVE_TABLE.to_string(),
            migration: DEFAULT_MIGRATION_TABLE.to_string(),
            backup_custom: DEFAULT_BACKUP_CUSTOM_TABLE.to_string(),
            backup_global: DEFAULT_BACKUP_GLOBAL_TABLE.to_string(),
        }
    }
}

impl TableNames {
    pub fn validate(&self) -> Result<()> {
        let names = [
            &self.live,
            &self.migration,
            &self.backup_custom,
            &self.backup_global,
        ];
        for name in names {
            validate_identifier(name)?;
        }
        for (index, name) in names.iter().enumerate() {
            if names[index + 1..].contains(name) {
                return Err(MigrationError::InvalidArgument(format!(
                    "table name {name} is configured for more than one role"
                ))
                .into());
            }
        }
        Ok(())
    }
}

/// Effective settings for one migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationSettings {
    pub bulk_count: usize,
    /// Empty means every language the name resolver yields.
    pub languages: Vec<String>,
    pub tables: TableNames,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            bulk_count: DEFAULT_BULK_COUNT,
            languages: Vec::new(),
            tables: TableNames::default(),
        }
    }
}

impl MigrationSettings {
    pub fn accepts_language(&self, language_code: &str) -> bool {
        self.languages.is_empty() || self.languages.iter().any(|code| code == language_code)
    }
}

impl AliasmigConfig {
    /// Resolve settings: flag > env ALIASMIG_* > config file > defaults.
    pub fn settings(&self, bulk_count_flag: Option<usize>) -> Result<MigrationSettings> {
        self.settings_with_lookup(bulk_count_flag, |key| env::var(key).ok())
    }

    fn settings_with_lookup<F>(
        &self,
        bulk_count_flag: Option<usize>,
        lookup_env: F,
    ) -> Result<MigrationSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bulk_count = match bulk_count_flag {
            Some(value) => value,
            None => match non_empty(lookup_env("ALIASMIG_BULK_COUNT")) {
                Some(value) => value.parse::<usize>().map_err(|_| {
                    MigrationError::InvalidArgument(format!(
                        "ALIASMIG_BULK_COUNT must be a positive integer, got {value:?}"
                    ))
                })?,
                None => self.migration.bulk_count.unwrap_or(DEFAULT_BULK_COUNT),
            },
        };
        if bulk_count == 0 {
            return Err(
                MigrationError::InvalidArgument("bulk count must be positive".to_string()).into(),
            );
        }

        let languages = match non_empty(lookup_env("ALIASMIG_LANGUAGES")) {
            Some(value) => value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(ToString::to_string)
                .collect(),
            None => self.migration.languages.clone(),
        };

        self.tables.validate()?;
        Ok(MigrationSettings {
            bulk_count,
            languages,
            tables: self.tables.clone(),
        })
    }
}

/// Load and parse the config file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<AliasmigConfig> {
    if !config_path.exists() {
        return Ok(AliasmigConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: AliasmigConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# aliasmig configuration (materialized by `aliasmig init`)\n\n[migration]\nbulk_count = {DEFAULT_BULK_COUNT}\n# Restrict regeneration to these languages; empty means all.\nlanguages = []\n\n[tables]\nlive = \"{DEFAULT_LIVE_TABLE}\"\nmigration = \"{DEFAULT_MIGRATION_TABLE}\"\nbackup_custom = \"{DEFAULT_BACKUP_CUSTOM_TABLE}\"\nbackup_global = \"{DEFAULT_BACKUP_GLOBAL_TABLE}\"\n"
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
