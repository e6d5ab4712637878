use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aliasmig_core::backup::BackupReport;
use aliasmig_core::config::{MigrationSettings, load_config};
use aliasmig_core::error::MigrationError;
use aliasmig_core::orchestrator::{MigrationAction, MigrationContext, MigrationReport, run_action};
use aliasmig_core::regenerate::RegenerateReport;
use aliasmig_core::restore::RestoreReport;
use aliasmig_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    normalize_for_display, resolve_paths,
};
use aliasmig_core::schema::{inspect_tables, open_connection};
use aliasmig_core::sqlite::{ContentNameResolver, SqliteAliasService, SqliteContentService};

const DEFAULT_LOG_FILTER: &str = "aliasmig=info,aliasmig_core=info";

#[derive(Debug, Parser)]
#[command(
    name = "aliasmig",
    version,
    about = "Back up, regenerate and restore URL aliases into a migration table"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            data_dir: cli.data_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the state layout, config file and database schema")]
    Init(InitArgs),
    #[command(about = "Run one migration action (or `full` for all of them)")]
    Migrate(MigrateArgs),
    #[command(about = "Show runtime paths and alias table row counts")]
    Status,
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(
        value_name = "ACTION",
        help = "full, autogenerate, backup-custom, restore-custom, backup-global or restore-global"
    )]
    action: String,
    #[arg(long, value_name = "N", help = "Rows per page (overrides config)")]
    bulk_count: Option<usize>,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Migrate(args)) => run_migrate(&runtime, args),
        Some(Commands::Status) => run_status(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized aliasmig runtime layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("data_dir: {}", normalize_for_display(&paths.data_dir));
    println!("db_path: {}", normalize_for_display(&report.db_path));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_migrate(runtime: &RuntimeOptions, args: MigrateArgs) -> Result<()> {
    let action = MigrationAction::parse(&args.action)?;
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;
    if !status.db_exists {
        return Err(MigrationError::PreconditionFailed(format!(
            "database {} does not exist; run `aliasmig init` first",
            normalize_for_display(&paths.db_path)
        ))
        .into());
    }
    let settings = load_settings(&paths, args.bulk_count)?;
    let connection = open_connection(&paths.db_path)?;
    info!(
        action = action.as_str(),
        bulk_count = settings.bulk_count,
        db_path = %normalize_for_display(&paths.db_path),
        "running migration"
    );

    let mut content = SqliteContentService::new(&connection);
    let mut aliases = SqliteAliasService::new(&connection, settings.tables.clone());
    let mut context = MigrationContext {
        connection: &connection,
        content: &mut content,
        names: &ContentNameResolver,
        aliases: &mut aliases,
        settings: &settings,
    };
    let report = run_action(&mut context, action)
        .with_context(|| format!("migration action {} failed", action.as_str()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_migration_report(&report, &settings);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_status(runtime: &RuntimeOptions) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let status = inspect_runtime(&paths)?;

    println!("runtime status");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir_exists: {}", format_flag(status.state_dir_exists));
    println!("data_dir_exists: {}", format_flag(status.data_dir_exists));
    println!("db_exists: {}", format_flag(status.db_exists));
    println!(
        "db_size_bytes: {}",
        status
            .db_size_bytes
            .map(|size| size.to_string())
            .unwrap_or_else(|| "n/a".to_string())
    );
    println!("config_exists: {}", format_flag(status.config_exists));

    if status.db_exists {
        let settings = load_settings(&paths, None)?;
        let connection = open_connection(&paths.db_path)?;
        for table in inspect_tables(&connection, &settings.tables)? {
            println!(
                "table.{}: {} ({})",
                table.role,
                table.name,
                table
                    .rows
                    .map(|rows| format!("{rows} rows"))
                    .unwrap_or_else(|| "missing".to_string())
            );
        }
    }
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn print_migration_report(report: &MigrationReport, settings: &MigrationSettings) {
    println!("migration {}", report.action.as_str());
    println!("bulk_count: {}", settings.bulk_count);
    println!(
        "languages: {}",
        if settings.languages.is_empty() {
            "<all>".to_string()
        } else {
            settings.languages.join(",")
        }
    );
    if let Some(backup) = &report.backup_custom {
        print_backup("backup_custom", backup);
    }
    if let Some(backup) = &report.backup_global {
        print_backup("backup_global", backup);
    }
    if let Some(regenerate) = &report.autogenerate {
        print_regenerate(regenerate);
    }
    if let Some(restore) = &report.restore_custom {
        print_restore("restore_custom", restore);
    }
    if let Some(restore) = &report.restore_global {
        print_restore("restore_global", restore);
    }
}

fn print_backup(prefix: &str, report: &BackupReport) {
    println!("{prefix}.table: {}", report.table);
    println!("{prefix}.locations: {}", report.locations);
    println!("{prefix}.aliases: {}", report.aliases);
    println!("{prefix}.rows: {}", report.rows);
}

fn print_regenerate(report: &RegenerateReport) {
    println!("autogenerate.table: {}", report.table);
    println!("autogenerate.locations: {}", report.locations);
    println!("autogenerate.published: {}", report.published);
    println!("autogenerate.skipped_languages: {}", report.skipped_languages);
    println!("autogenerate.fallback_locations: {}", report.fallback_locations);
}

fn print_restore(prefix: &str, report: &RestoreReport) {
    println!("{prefix}.table: {}", report.table);
    println!("{prefix}.total_rows: {}", report.total_rows);
    println!("{prefix}.created: {}", report.created);
    println!("{prefix}.conflicts: {}", report.conflicts);
}

fn load_settings(paths: &ResolvedPaths, bulk_count: Option<usize>) -> Result<MigrationSettings> {
    load_config(&paths.config_path)?.settings(bulk_count)
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        data_dir: runtime.data_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
