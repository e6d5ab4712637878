//! Collaborator contracts consumed by the migration pipeline.
//!
//! The pipeline only talks to content and alias storage through these traits.
//! `crate::sqlite` provides the SQLite-backed implementations used by the CLI;
//! tests substitute in-memory mocks.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

/// Language key marking a NOP level: a placeholder without per-language data.
pub const ALWAYS_AVAILABLE_KEY: &str = "always-available";

/// Resource scheme prefix stored with backed-up global aliases.
pub const MODULE_SCHEME: &str = "module:";

/// Node id of the tree root. The root never carries an alias of its own.
pub const ROOT_LOCATION_ID: i64 = 1;

/// One level of an alias path: language code (or [`ALWAYS_AVAILABLE_KEY`]) to element.
pub type PathLevel = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub node_id: i64,
    pub parent_node_id: i64,
    pub content_id: i64,
    pub depth: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub id: i64,
    pub main_language_code: String,
    pub always_available: bool,
    pub names: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasDestination {
    Location(i64),
    Resource(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlAlias {
    pub destination: AliasDestination,
    pub path_data: Vec<PathLevel>,
    pub language_codes: Vec<String>,
    pub always_available: bool,
    pub forward: bool,
    pub is_custom: bool,
}

impl UrlAlias {
    pub fn primary_language_code(&self) -> Option<&str> {
        self.language_codes.first().map(String::as_str)
    }
}

/// Physical alias store an [`AliasService`] writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AliasTable {
    #[default]
    Live,
    Migration,
}

impl AliasTable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Migration => "migration",
        }
    }
}

pub trait ContentService {
    /// Fails with `MigrationError::NotFound` when the content does not exist.
    fn load_content(&mut self, content_id: i64) -> Result<Content>;
}

pub trait NameSchemaResolver {
    /// Language code to the name used for that language's URL alias element.
    fn resolve_url_alias_schema(&self, content: &Content) -> Result<BTreeMap<String, String>>;
}

/// URL alias persistence with a process-wide active table.
///
/// Reads and writes go to [`AliasService::active_table`]. Pipeline code never
/// flips the table directly; it goes through `crate::binding`.
pub trait AliasService {
    fn list_location_aliases(&mut self, location_id: i64, custom_only: bool)
    -> Result<Vec<UrlAlias>>;
    fn list_global_aliases(&mut self) -> Result<Vec<UrlAlias>>;
    fn publish_location_alias(
        &mut self,
        location_id: i64,
        parent_location_id: i64,
        name: &str,
        language_code: &str,
        always_available: bool,
    ) -> Result<()>;
    /// Fails with `MigrationError::Forbidden` when `path` already resolves elsewhere.
    fn create_custom_alias(
        &mut self,
        location_id: i64,
        path: &str,
        forwarding: bool,
        language_code: &str,
        always_available: bool,
    ) -> Result<()>;
    /// Fails with `MigrationError::Forbidden` when `path` already resolves elsewhere.
    fn create_global_alias(
        &mut self,
        resource: &str,
        path: &str,
        forwarding: bool,
        language_code: &str,
        always_available: bool,
    ) -> Result<()>;
    fn set_active_table(&mut self, table: AliasTable);
    fn active_table(&self) -> AliasTable;
}
