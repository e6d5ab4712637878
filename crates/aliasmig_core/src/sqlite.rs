//! SQLite-backed content and alias collaborators.
//!
//! Alias tables store one row per path element per language. Rows that are
//! translations of the same element share a `link`; children point at their
//! parent element through `parent` (0 at the top level). Intermediate levels of
//! a custom path that do not exist yet are stored as NOP rows under the
//! [`ALWAYS_AVAILABLE_KEY`] language and can later be taken over by a real
//! alias with the same text.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use tracing::debug;

use crate::config::TableNames;
use crate::error::MigrationError;
use crate::services::{
    ALWAYS_AVAILABLE_KEY, AliasDestination, AliasService, AliasTable, Content, ContentService,
    MODULE_SCHEME, NameSchemaResolver, PathLevel, ROOT_LOCATION_ID, UrlAlias,
};

const NODE_SCHEME: &str = "eznode:";
const NOP_ACTION: &str = "nop:";
const MAX_TREE_DEPTH: usize = 256;
const ROW_COLUMNS: &str =
    "id, parent, link, text, lang_code, action, is_original, is_alias, always_available, forward";

pub struct SqliteContentService<'c> {
    connection: &'c Connection,
}

impl<'c> SqliteContentService<'c> {
    pub fn new(connection: &'c Connection) -> Self {
        Self { connection }
    }
}

impl ContentService for SqliteContentService<'_> {
    fn load_content(&mut self, content_id: i64) -> Result<Content> {
        let header = self
            .connection
            .query_row(
                "SELECT main_language_code, always_available FROM content WHERE id = ?1",
                [content_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()
            .with_context(|| format!("failed to load content {content_id}"))?;
        let Some((main_language_code, always_available)) = header else {
            return Err(MigrationError::NotFound(format!("content {content_id}")).into());
        };

        let mut statement = self
            .connection
            .prepare(
                "SELECT language_code, name FROM content_name
                 WHERE content_id = ?1
                 ORDER BY language_code ASC",
            )
            .context("failed to prepare content name query")?;
        let rows = statement
            .query_map([content_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .with_context(|| format!("failed to load names of content {content_id}"))?;
        let mut names = BTreeMap::new();
        for row in rows {
            let (language_code, name) = row.context("failed to read content name row")?;
            names.insert(language_code, name);
        }

        Ok(Content {
            id: content_id,
            main_language_code,
            always_available: always_available != 0,
            names,
        })
    }
}

/// Uses each translated content name as that language's alias source.
///
/// Blank translations are dropped, except for the main language, which is
/// always present (possibly empty) so every location gets an element.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentNameResolver;

impl NameSchemaResolver for ContentNameResolver {
    fn resolve_url_alias_schema(&self, content: &Content) -> Result<BTreeMap<String, String>> {
        let mut names: BTreeMap<String, String> = content
            .names
            .iter()
            .filter(|(_, name)| !name.trim().is_empty())
            .map(|(language_code, name)| (language_code.clone(), name.trim().to_string()))
            .collect();
        names
            .entry(content.main_language_code.clone())
            .or_default();
        Ok(names)
    }
}

#[derive(Debug, Clone)]
struct AliasRow {
    id: i64,
    parent: i64,
    link: i64,
    text: String,
    lang_code: String,
    action: String,
    is_alias: bool,
    always_available: bool,
    forward: bool,
}

impl AliasRow {
    fn is_nop(&self) -> bool {
        self.action == NOP_ACTION
    }
}

fn read_alias_row(row: &Row<'_>) -> rusqlite::Result<AliasRow> {
    Ok(AliasRow {
        id: row.get(0)?,
        parent: row.get(1)?,
        link: row.get(2)?,
        text: row.get(3)?,
        lang_code: row.get(4)?,
        action: row.get(5)?,
        is_alias: row.get::<_, i64>(7)? != 0,
        always_available: row.get::<_, i64>(8)? != 0,
        forward: row.get::<_, i64>(9)? != 0,
    })
}

struct NewEntry<'a> {
    parent: i64,
    link: i64,
    text: &'a str,
    lang_code: &'a str,
    action: &'a str,
    is_alias: bool,
    always_available: bool,
    forward: bool,
}

pub struct SqliteAliasService<'c> {
    connection: &'c Connection,
    tables: TableNames,
    active: AliasTable,
}

impl<'c> SqliteAliasService<'c> {
    pub fn new(connection: &'c Connection, tables: TableNames) -> Self {
        Self {
            connection,
            tables,
            active: AliasTable::Live,
        }
    }

    fn table(&self) -> &str {
        match self.active {
            AliasTable::Live => &self.tables.live,
            AliasTable::Migration => &self.tables.migration,
        }
    }

    fn query_rows<P: Params>(&self, filter: &str, params: P) -> Result<Vec<AliasRow>> {
        let sql = format!(
            "SELECT {ROW_COLUMNS} FROM {} WHERE {filter} ORDER BY id ASC",
            self.table()
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .with_context(|| format!("failed to prepare alias query on {}", self.table()))?;
        let rows = statement
            .query_map(params, read_alias_row)
            .with_context(|| format!("failed to query {}", self.table()))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read alias row")?);
        }
        Ok(out)
    }

    fn rows_at(&self, parent: i64, text: &str) -> Result<Vec<AliasRow>> {
        self.query_rows(
            "parent = ?1 AND text = ?2 COLLATE NOCASE AND is_original = 1",
            params![parent, text],
        )
    }

    fn next_link(&self) -> Result<i64> {
        self.connection
            .query_row(
                &format!("SELECT COALESCE(MAX(link), 0) + 1 FROM {}", self.table()),
                [],
                |row| row.get(0),
            )
            .with_context(|| format!("failed to allocate link id in {}", self.table()))
    }

    fn insert_row(&self, entry: &NewEntry<'_>) -> Result<()> {
        self.connection
            .execute(
                &format!(
                    "INSERT INTO {} (parent, link, text, lang_code, action, is_original, is_alias, always_available, forward)
                     VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8)",
                    self.table()
                ),
                params![
                    entry.parent,
                    entry.link,
                    entry.text,
                    entry.lang_code,
                    entry.action,
                    entry.is_alias,
                    entry.always_available,
                    entry.forward,
                ],
            )
            .with_context(|| {
                format!(
                    "failed to insert alias element {:?} into {}",
                    entry.text,
                    self.table()
                )
            })?;
        Ok(())
    }

    /// Replaces the NOP rows at one path position with a real entry, keeping
    /// their link so children stay attached.
    fn take_over(&self, nop_rows: &[AliasRow], entry: &NewEntry<'_>) -> Result<i64> {
        let link = nop_rows[0].link;
        for row in nop_rows {
            self.connection
                .execute(
                    &format!("DELETE FROM {} WHERE id = ?1", self.table()),
                    [row.id],
                )
                .with_context(|| format!("failed to remove placeholder {}", row.id))?;
        }
        self.insert_row(&NewEntry { link, ..*entry })?;
        debug!(table = self.table(), link, text = entry.text, "took over placeholder");
        Ok(link)
    }

    /// Levels of the element chain ending at `link`, outermost first.
    fn path_levels(&self, mut link: i64) -> Result<Vec<PathLevel>> {
        let mut levels = Vec::new();
        while link != 0 {
            if levels.len() >= MAX_TREE_DEPTH {
                bail!("alias tree in {} is deeper than {MAX_TREE_DEPTH} levels", self.table());
            }
            let rows = self.query_rows("link = ?1 AND is_original = 1", [link])?;
            let Some(first) = rows.first() else {
                bail!("alias tree in {} references missing link {link}", self.table());
            };
            let parent = first.parent;
            levels.push(
                rows.into_iter()
                    .map(|row| (row.lang_code, row.text))
                    .collect::<PathLevel>(),
            );
            link = parent;
        }
        levels.reverse();
        Ok(levels)
    }

    fn group_aliases(&self, rows: Vec<AliasRow>) -> Result<Vec<UrlAlias>> {
        let mut groups: Vec<(i64, Vec<AliasRow>)> = Vec::new();
        for row in rows {
            match groups.iter_mut().find(|(link, _)| *link == row.link) {
                Some((_, members)) => members.push(row),
                None => groups.push((row.link, vec![row])),
            }
        }

        let mut out = Vec::with_capacity(groups.len());
        for (_, members) in groups {
            let first = &members[0];
            let mut path_data = self.path_levels(first.parent)?;
            path_data.push(
                members
                    .iter()
                    .map(|row| (row.lang_code.clone(), row.text.clone()))
                    .collect(),
            );
            out.push(UrlAlias {
                destination: parse_action(&first.action)?,
                path_data,
                language_codes: members.iter().map(|row| row.lang_code.clone()).collect(),
                always_available: first.always_available,
                forward: first.forward,
                is_custom: first.is_alias,
            });
        }
        Ok(out)
    }

    fn create_alias_entry(
        &self,
        path: &str,
        action: &str,
        language_code: &str,
        always_available: bool,
        forward: bool,
    ) -> Result<()> {
        let elements: Vec<&str> = path
            .split('/')
            .map(str::trim)
            .filter(|element| !element.is_empty())
            .collect();
        let Some((last, prefix)) = elements.split_last() else {
            return Err(
                MigrationError::InvalidArgument(format!("alias path {path:?} is empty")).into(),
            );
        };

        let mut parent = 0;
        for element in prefix {
            parent = match self.rows_at(parent, element)?.first() {
                Some(row) => row.link,
                None => {
                    let link = self.next_link()?;
                    self.insert_row(&NewEntry {
                        parent,
                        link,
                        text: element,
                        lang_code: ALWAYS_AVAILABLE_KEY,
                        action: NOP_ACTION,
                        is_alias: false,
                        always_available: true,
                        forward: false,
                    })?;
                    link
                }
            };
        }

        let existing = self.rows_at(parent, last)?;
        let entry = NewEntry {
            parent,
            link: 0,
            text: last,
            lang_code: language_code,
            action,
            is_alias: true,
            always_available,
            forward,
        };
        if existing.is_empty() {
            let link = self.next_link()?;
            return self.insert_row(&NewEntry { link, ..entry });
        }
        if existing.iter().all(AliasRow::is_nop) {
            self.take_over(&existing, &entry)?;
            return Ok(());
        }
        Err(MigrationError::Forbidden(format!(
            "path {path:?} already resolves to {} in {}",
            existing[0].action,
            self.table()
        ))
        .into())
    }

    fn location_link(&self, location_id: i64) -> Result<Option<i64>> {
        Ok(self
            .query_rows(
                "action = ?1 AND is_alias = 0 AND is_original = 1",
                [node_action(location_id)],
            )?
            .first()
            .map(|row| row.link))
    }
}

impl AliasService for SqliteAliasService<'_> {
    fn list_location_aliases(
        &mut self,
        location_id: i64,
        custom_only: bool,
    ) -> Result<Vec<UrlAlias>> {
        let rows = self.query_rows(
            "action = ?1 AND is_alias = ?2 AND is_original = 1",
            params![node_action(location_id), custom_only],
        )?;
        self.group_aliases(rows)
    }

    fn list_global_aliases(&mut self) -> Result<Vec<UrlAlias>> {
        let rows = self.query_rows(
            "action LIKE 'module:%' AND is_alias = 1 AND is_original = 1",
            [],
        )?;
        self.group_aliases(rows)
    }

    fn publish_location_alias(
        &mut self,
        location_id: i64,
        parent_location_id: i64,
        name: &str,
        language_code: &str,
        always_available: bool,
    ) -> Result<()> {
        let action = node_action(location_id);
        let parent = if parent_location_id == ROOT_LOCATION_ID {
            0
        } else {
            self.location_link(parent_location_id)?.ok_or_else(|| {
                MigrationError::NotFound(format!(
                    "alias of parent location {parent_location_id} in {}",
                    self.table()
                ))
            })?
        };
        let own_link = self.location_link(location_id)?;

        let mut text = slugify(name);
        if text.is_empty() {
            text = format!("node-{location_id}");
        }

        let current = self.query_rows(
            "action = ?1 AND lang_code = ?2 AND is_alias = 0 AND is_original = 1",
            params![action, language_code],
        )?;
        if current
            .iter()
            .any(|row| row.parent == parent && row.text.eq_ignore_ascii_case(&text))
        {
            return Ok(());
        }
        for row in &current {
            self.connection
                .execute(
                    &format!("DELETE FROM {} WHERE id = ?1", self.table()),
                    [row.id],
                )
                .with_context(|| format!("failed to replace alias row {}", row.id))?;
        }

        let mut suffix = 1usize;
        loop {
            let candidate = if suffix == 1 {
                text.clone()
            } else {
                format!("{text}{suffix}")
            };
            let existing = self.rows_at(parent, &candidate)?;
            let entry = NewEntry {
                parent,
                link: 0,
                text: &candidate,
                lang_code: language_code,
                action: &action,
                is_alias: false,
                always_available,
                forward: false,
            };

            if existing.is_empty() {
                let link = match own_link {
                    Some(link) => link,
                    None => self.next_link()?,
                };
                return self.insert_row(&NewEntry { link, ..entry });
            }
            if let Some(sibling) = existing
                .iter()
                .find(|row| row.action == action && !row.is_alias)
            {
                if existing.iter().all(|row| row.lang_code != language_code) {
                    return self.insert_row(&NewEntry {
                        link: sibling.link,
                        ..entry
                    });
                }
            }
            if own_link.is_none() && existing.iter().all(AliasRow::is_nop) {
                self.take_over(&existing, &entry)?;
                return Ok(());
            }
            suffix += 1;
        }
    }

    fn create_custom_alias(
        &mut self,
        location_id: i64,
        path: &str,
        forwarding: bool,
        language_code: &str,
        always_available: bool,
    ) -> Result<()> {
        self.create_alias_entry(
            path,
            &node_action(location_id),
            language_code,
            always_available,
            forwarding,
        )
    }

    fn create_global_alias(
        &mut self,
        resource: &str,
        path: &str,
        forwarding: bool,
        language_code: &str,
        always_available: bool,
    ) -> Result<()> {
        if !resource.starts_with(MODULE_SCHEME) || resource.len() == MODULE_SCHEME.len() {
            return Err(MigrationError::InvalidArgument(format!(
                "global alias resource must look like {MODULE_SCHEME}<module>, got {resource:?}"
            ))
            .into());
        }
        self.create_alias_entry(path, resource, language_code, always_available, forwarding)
    }

    fn set_active_table(&mut self, table: AliasTable) {
        self.active = table;
    }

    fn active_table(&self) -> AliasTable {
        self.active
    }
}

fn node_action(location_id: i64) -> String {
    format!("{NODE_SCHEME}{location_id}")
}

fn parse_action(action: &str) -> Result<AliasDestination> {
    if let Some(id) = action.strip_prefix(NODE_SCHEME) {
        let id = id
            .parse::<i64>()
            .with_context(|| format!("invalid node action {action:?}"))?;
        return Ok(AliasDestination::Location(id));
    }
    if let Some(resource) = action.strip_prefix(MODULE_SCHEME) {
        return Ok(AliasDestination::Resource(resource.to_string()));
    }
    bail!("unsupported alias action {action:?}")
}

/// Lowercased alias element: alphanumeric runs joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::{ContentNameResolver, SqliteAliasService, SqliteContentService, slugify};
    use crate::combinator::combine;
    use crate::config::TableNames;
    use crate::error::{MigrationError, migration_error};
    use crate::schema::initialize_storage;
    use crate::services::{
        ALWAYS_AVAILABLE_KEY, AliasDestination, AliasService, AliasTable, ContentService,
        NameSchemaResolver,
    };

    fn storage() -> Connection {
        let connection = Connection::open_in_memory().expect("open");
        initialize_storage(&connection, &TableNames::default()).expect("init");
        connection
    }

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Über  Uns "), "über-uns");
        assert_eq!(slugify("snake_case name"), "snake_case-name");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn content_service_loads_names_and_reports_missing() {
        let connection = storage();
        connection
            .execute_batch(
                "INSERT INTO content (id, main_language_code, always_available) VALUES (10, 'eng-GB', 1);
                 INSERT INTO content_name (content_id, language_code, name) VALUES
                    (10, 'eng-GB', 'News'), (10, 'ger-DE', ' Nachrichten '), (10, 'fre-FR', '  ');",
            )
            .expect("seed");
        let mut service = SqliteContentService::new(&connection);

        let content = service.load_content(10).expect("load");
        assert!(content.always_available);
        assert_eq!(content.names.len(), 3);

        let names = ContentNameResolver
            .resolve_url_alias_schema(&content)
            .expect("resolve");
        assert_eq!(names.len(), 2);
        assert_eq!(names["ger-DE"], "Nachrichten");

        let error = service.load_content(99).expect_err("must fail");
        assert!(matches!(
            migration_error(&error),
            Some(MigrationError::NotFound(_))
        ));
    }

    #[test]
    fn resolver_keeps_blank_main_language() {
        let connection = storage();
        connection
            .execute_batch(
                "INSERT INTO content (id, main_language_code, always_available) VALUES
                    (11, 'eng-GB', 0), (12, 'nor-NO', 0);
                 INSERT INTO content_name (content_id, language_code, name) VALUES
                    (11, 'eng-GB', '   '), (11, 'ger-DE', '  ');",
            )
            .expect("seed");
        let mut service = SqliteContentService::new(&connection);

        let blank = service.load_content(11).expect("load");
        let names = ContentNameResolver
            .resolve_url_alias_schema(&blank)
            .expect("resolve");
        assert_eq!(names.len(), 1);
        assert_eq!(names["eng-GB"], "");

        let unnamed = service.load_content(12).expect("load");
        let names = ContentNameResolver
            .resolve_url_alias_schema(&unnamed)
            .expect("resolve");
        assert_eq!(names.len(), 1);
        assert_eq!(names["nor-NO"], "");
    }

    #[test]
    fn published_translations_share_one_element() {
        let connection = storage();
        let mut aliases = SqliteAliasService::new(&connection, TableNames::default());
        aliases
            .publish_location_alias(2, 1, "News", "eng-GB", true)
            .expect("publish");
        aliases
            .publish_location_alias(2, 1, "Nachrichten", "ger-DE", true)
            .expect("publish");
        aliases
            .publish_location_alias(5, 2, "Sport", "eng-GB", false)
            .expect("publish");

        let listed = aliases.list_location_aliases(5, false).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].destination, AliasDestination::Location(5));
        assert_eq!(listed[0].path_data.len(), 2);
        let paths = combine(&listed[0].path_data).expect("combine");
        assert_eq!(paths.len(), 2);
        assert!(paths.contains("news/sport"));
        assert!(paths.contains("nachrichten/sport"));

        assert!(aliases.list_location_aliases(5, true).expect("list").is_empty());
    }

    #[test]
    fn publishing_twice_is_idempotent_and_collisions_get_suffixes() {
        let connection = storage();
        let mut aliases = SqliteAliasService::new(&connection, TableNames::default());
        aliases
            .publish_location_alias(2, 1, "Home", "eng-GB", true)
            .expect("publish");
        aliases
            .publish_location_alias(2, 1, "Home", "eng-GB", true)
            .expect("publish again");
        aliases
            .publish_location_alias(3, 1, "Home", "eng-GB", true)
            .expect("publish sibling");

        let first = aliases.list_location_aliases(2, false).expect("list");
        let second = aliases.list_location_aliases(3, false).expect("list");
        assert_eq!(first[0].path_data[0]["eng-GB"], "home");
        assert_eq!(second[0].path_data[0]["eng-GB"], "home2");
    }

    #[test]
    fn publish_requires_parent_alias() {
        let connection = storage();
        let mut aliases = SqliteAliasService::new(&connection, TableNames::default());
        let error = aliases
            .publish_location_alias(8, 4, "Orphan", "eng-GB", false)
            .expect_err("must fail");
        assert!(matches!(
            migration_error(&error),
            Some(MigrationError::NotFound(_))
        ));
    }

    #[test]
    fn custom_alias_creates_placeholders_and_conflicts_on_taken_path() {
        let connection = storage();
        let mut aliases = SqliteAliasService::new(&connection, TableNames::default());
        aliases
            .publish_location_alias(2, 1, "Shop", "eng-GB", true)
            .expect("publish");

        aliases
            .create_custom_alias(2, "deals/summer", true, "eng-GB", false)
            .expect("create");
        let custom = aliases.list_location_aliases(2, true).expect("list");
        assert_eq!(custom.len(), 1);
        assert!(custom[0].forward);
        assert!(custom[0].is_custom);
        assert_eq!(
            custom[0].path_data[0]
                .get(ALWAYS_AVAILABLE_KEY)
                .map(String::as_str),
            Some("deals")
        );

        let error = aliases
            .create_custom_alias(7, "shop", false, "eng-GB", false)
            .expect_err("must conflict");
        assert!(matches!(
            migration_error(&error),
            Some(MigrationError::Forbidden(_))
        ));
    }

    #[test]
    fn custom_alias_takes_over_placeholder() {
        let connection = storage();
        let mut aliases = SqliteAliasService::new(&connection, TableNames::default());
        aliases
            .create_custom_alias(3, "campaign/spring", false, "eng-GB", false)
            .expect("create nested");
        aliases
            .create_custom_alias(4, "campaign", false, "eng-GB", true)
            .expect("take over placeholder");

        let nested = aliases.list_location_aliases(3, true).expect("list");
        assert_eq!(nested[0].path_data[0]["eng-GB"], "campaign");
        let owner = aliases.list_location_aliases(4, true).expect("list");
        assert_eq!(owner.len(), 1);
    }

    #[test]
    fn global_aliases_are_listed_by_resource() {
        let connection = storage();
        let mut aliases = SqliteAliasService::new(&connection, TableNames::default());
        aliases
            .create_global_alias("module:content/search", "find", false, "eng-GB", true)
            .expect("create");
        assert!(
            aliases
                .create_global_alias("content/search", "lookup", false, "eng-GB", true)
                .is_err()
        );

        let globals = aliases.list_global_aliases().expect("list");
        assert_eq!(globals.len(), 1);
        assert_eq!(
            globals[0].destination,
            AliasDestination::Resource("content/search".to_string())
        );
    }

    #[test]
    fn active_table_selects_physical_table() {
        let connection = storage();
        let mut aliases = SqliteAliasService::new(&connection, TableNames::default());
        aliases.set_active_table(AliasTable::Migration);
        aliases
            .publish_location_alias(2, 1, "Fresh", "eng-GB", true)
            .expect("publish");
        aliases.set_active_table(AliasTable::Live);

        assert!(aliases.list_location_aliases(2, false).expect("list").is_empty());
        let migrated: i64 = connection
            .query_row("SELECT COUNT(*) FROM url_alias_migration", [], |row| row.get(0))
            .expect("count");
        assert_eq!(migrated, 1);
    }
}
