use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::backup::{BackupReport, backup_custom_location_aliases, backup_global_aliases};
use crate::config::MigrationSettings;
use crate::error::MigrationError;
use crate::regenerate::{RegenerateReport, generate_location_aliases};
use crate::restore::{RestoreReport, restore_custom_location_aliases, restore_global_aliases};
use crate::schema::ensure_content_storage;
use crate::services::{AliasService, ContentService, NameSchemaResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationAction {
    Full,
    Autogenerate,
    BackupCustom,
    RestoreCustom,
    BackupGlobal,
    RestoreGlobal,
}

pub const ALL_ACTIONS: [MigrationAction; 6] = [
    MigrationAction::Full,
    MigrationAction::Autogenerate,
    MigrationAction::BackupCustom,
    MigrationAction::RestoreCustom,
    MigrationAction::BackupGlobal,
    MigrationAction::RestoreGlobal,
];

/// Phase order of the `full` action.
const FULL_SEQUENCE: [MigrationAction; 5] = [
    MigrationAction::BackupCustom,
    MigrationAction::BackupGlobal,
    MigrationAction::Autogenerate,
    MigrationAction::RestoreCustom,
    MigrationAction::RestoreGlobal,
];

impl MigrationAction {
    pub fn parse(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        ALL_ACTIONS
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| {
                MigrationError::InvalidArgument(format!(
                    "unknown action {value:?}; expected one of: {}",
                    ALL_ACTIONS
                        .iter()
                        .map(|action| action.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
                .into()
            })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Autogenerate => "autogenerate",
            Self::BackupCustom => "backup-custom",
            Self::RestoreCustom => "restore-custom",
            Self::BackupGlobal => "backup-global",
            Self::RestoreGlobal => "restore-global",
        }
    }

    /// Single phases this action runs, in order.
    pub fn phases(self) -> Vec<MigrationAction> {
        match self {
            Self::Full => FULL_SEQUENCE.to_vec(),
            single => vec![single],
        }
    }
}

/// Collaborators one run works against.
pub struct MigrationContext<'a> {
    pub connection: &'a Connection,
    pub content: &'a mut dyn ContentService,
    pub names: &'a dyn NameSchemaResolver,
    pub aliases: &'a mut dyn AliasService,
    pub settings: &'a MigrationSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub action: MigrationAction,
    pub phases: Vec<MigrationAction>,
    pub backup_custom: Option<BackupReport>,
    pub backup_global: Option<BackupReport>,
    pub autogenerate: Option<RegenerateReport>,
    pub restore_custom: Option<RestoreReport>,
    pub restore_global: Option<RestoreReport>,
}

impl MigrationReport {
    fn new(action: MigrationAction) -> Self {
        Self {
            action,
            phases: Vec::new(),
            backup_custom: None,
            backup_global: None,
            autogenerate: None,
            restore_custom: None,
            restore_global: None,
        }
    }
}

pub fn run_action(
    context: &mut MigrationContext<'_>,
    action: MigrationAction,
) -> Result<MigrationReport> {
    ensure_content_storage(context.connection)?;
    let mut report = MigrationReport::new(action);
    for phase in action.phases() {
        info!(action = action.as_str(), phase = phase.as_str(), "starting phase");
        run_phase(context, phase, &mut report)
            .with_context(|| format!("phase {} failed", phase.as_str()))?;
        report.phases.push(phase);
    }
    Ok(report)
}

fn run_phase(
    context: &mut MigrationContext<'_>,
    phase: MigrationAction,
    report: &mut MigrationReport,
) -> Result<()> {
    let tables = &context.settings.tables;
    let page_size = context.settings.bulk_count;
    match phase {
        MigrationAction::BackupCustom => {
            report.backup_custom = Some(backup_custom_location_aliases(
                context.connection,
                context.aliases,
                &tables.backup_custom,
                page_size,
            )?);
        }
        MigrationAction::BackupGlobal => {
            report.backup_global = Some(backup_global_aliases(
                context.connection,
                context.aliases,
                &tables.backup_global,
            )?);
        }
        MigrationAction::Autogenerate => {
            report.autogenerate = Some(generate_location_aliases(
                context.connection,
                context.content,
                context.names,
                context.aliases,
                context.settings,
            )?);
        }
        MigrationAction::RestoreCustom => {
            report.restore_custom = Some(restore_custom_location_aliases(
                context.connection,
                context.aliases,
                tables,
                page_size,
            )?);
        }
        MigrationAction::RestoreGlobal => {
            report.restore_global = Some(restore_global_aliases(
                context.connection,
                context.aliases,
                tables,
                page_size,
            )?);
        }
        MigrationAction::Full => {
            return Err(MigrationError::InvalidArgument(
                "full is not a single phase".to_string(),
            )
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::{MigrationAction, MigrationContext, run_action};
    use crate::config::{MigrationSettings, TableNames};
    use crate::error::{MigrationError, migration_error};
    use crate::schema::{initialize_storage, row_count};
    use crate::services::{AliasService, AliasTable};
    use crate::sqlite::{ContentNameResolver, SqliteAliasService, SqliteContentService};

    fn seeded_site() -> Connection {
        let connection = Connection::open_in_memory().expect("open");
        initialize_storage(&connection, &TableNames::default()).expect("init");
        connection
            .execute_batch(
                "INSERT INTO content (id, main_language_code, always_available) VALUES
                    (1, 'eng-GB', 1), (20, 'eng-GB', 1), (30, 'eng-GB', 0);
                 INSERT INTO content_name (content_id, language_code, name) VALUES
                    (1, 'eng-GB', 'Root'),
                    (20, 'eng-GB', 'News'), (20, 'ger-DE', 'Nachrichten'),
                    (30, 'eng-GB', 'Weather');
                 INSERT INTO location (node_id, parent_node_id, content_id, depth) VALUES
                    (1, 0, 1, 0), (2, 1, 20, 1), (3, 2, 30, 2);",
            )
            .expect("seed");
        connection
    }

    #[test]
    fn parse_accepts_every_action_and_rejects_unknown() {
        for name in [
            "full",
            "autogenerate",
            "backup-custom",
            "restore-custom",
            "backup-global",
            "restore-global",
        ] {
            assert_eq!(MigrationAction::parse(name).expect("parse").as_str(), name);
        }
        assert_eq!(
            MigrationAction::parse(" Full ").expect("parse"),
            MigrationAction::Full
        );

        let error = MigrationAction::parse("restore-everything").expect_err("must fail");
        assert!(matches!(
            migration_error(&error),
            Some(MigrationError::InvalidArgument(_))
        ));
    }

    #[test]
    fn full_runs_phases_in_fixed_order() {
        assert_eq!(
            MigrationAction::Full.phases(),
            vec![
                MigrationAction::BackupCustom,
                MigrationAction::BackupGlobal,
                MigrationAction::Autogenerate,
                MigrationAction::RestoreCustom,
                MigrationAction::RestoreGlobal,
            ]
        );
        assert_eq!(
            MigrationAction::RestoreGlobal.phases(),
            vec![MigrationAction::RestoreGlobal]
        );
    }

    #[test]
    fn full_pipeline_rebuilds_aliases_into_migration_table() {
        let connection = seeded_site();
        let settings = MigrationSettings {
            bulk_count: 1,
            ..MigrationSettings::default()
        };
        let mut content = SqliteContentService::new(&connection);
        let mut aliases = SqliteAliasService::new(&connection, settings.tables.clone());

        // Live data: autogenerated aliases plus one custom and one global alias.
        aliases
            .publish_location_alias(2, 1, "News", "eng-GB", true)
            .expect("live publish");
        aliases
            .publish_location_alias(2, 1, "Nachrichten", "ger-DE", true)
            .expect("live publish");
        aliases
            .publish_location_alias(3, 2, "Weather", "eng-GB", false)
            .expect("live publish");
        aliases
            .create_custom_alias(3, "news/forecast", false, "eng-GB", false)
            .expect("live custom");
        aliases
            .create_custom_alias(2, "news", false, "eng-GB", false)
            .expect_err("custom alias shadowing autogenerated path is refused");
        aliases
            .create_global_alias("module:content/search", "search", false, "eng-GB", true)
            .expect("live global");
        let live_rows = row_count(&connection, "url_alias").expect("count");

        let mut context = MigrationContext {
            connection: &connection,
            content: &mut content,
            names: &ContentNameResolver,
            aliases: &mut aliases,
            settings: &settings,
        };
        let report = run_action(&mut context, MigrationAction::Full).expect("full run");

        assert_eq!(report.phases, MigrationAction::Full.phases());
        let backup_custom = report.backup_custom.expect("backup custom report");
        assert_eq!(backup_custom.aliases, 1);
        assert_eq!(backup_custom.rows, 2);
        assert_eq!(report.backup_global.expect("backup global report").rows, 1);
        assert_eq!(report.autogenerate.expect("autogenerate report").published, 3);

        let restore_custom = report.restore_custom.expect("restore custom report");
        assert_eq!(restore_custom.total_rows, 2);
        assert_eq!(restore_custom.created + restore_custom.conflicts, 2);
        // Both backed-up translations end in the same `forecast` element.
        assert_eq!(restore_custom.created, 1);
        assert_eq!(restore_custom.conflicts, 1);
        let restore_global = report.restore_global.expect("restore global report");
        assert_eq!(restore_global.created, 1);

        assert_eq!(aliases.active_table(), AliasTable::Live);
        assert_eq!(row_count(&connection, "url_alias").expect("count"), live_rows);
    }

    #[test]
    fn rerunning_backup_phase_is_refused() {
        let connection = seeded_site();
        let settings = MigrationSettings::default();
        let mut content = SqliteContentService::new(&connection);
        let mut aliases = SqliteAliasService::new(&connection, settings.tables.clone());
        aliases
            .create_custom_alias(2, "promo", false, "eng-GB", false)
            .expect("live custom");

        let mut context = MigrationContext {
            connection: &connection,
            content: &mut content,
            names: &ContentNameResolver,
            aliases: &mut aliases,
            settings: &settings,
        };
        run_action(&mut context, MigrationAction::BackupCustom).expect("first backup");
        let error =
            run_action(&mut context, MigrationAction::BackupCustom).expect_err("second backup");
        assert!(matches!(
            migration_error(&error),
            Some(MigrationError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn missing_content_storage_fails_before_any_phase() {
        let connection = Connection::open_in_memory().expect("open");
        let settings = MigrationSettings::default();
        let mut content = SqliteContentService::new(&connection);
        let mut aliases = SqliteAliasService::new(&connection, settings.tables.clone());
        let mut context = MigrationContext {
            connection: &connection,
            content: &mut content,
            names: &ContentNameResolver,
            aliases: &mut aliases,
            settings: &settings,
        };

        let error = run_action(&mut context, MigrationAction::Full).expect_err("must fail");
        assert!(matches!(
            migration_error(&error),
            Some(MigrationError::PreconditionFailed(_))
        ));
    }
}
