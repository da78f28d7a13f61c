//! tracker-migrate CLI - referentially consistent bug-tracker migration.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracker_migrate::error::EXIT_ROW_ERRORS;
use tracker_migrate::{migration_plan, Config, MigrateError, MigrationPlan, MigrationResult, Orchestrator};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "tracker-migrate")]
#[command(about = "Migrate bug-tracker data between MySQL databases, keeping references consistent")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run {
        /// Override the output project name
        #[arg(long)]
        project: Option<String>,

        /// Only migrate this source project (repeatable)
        #[arg(long = "only-project", value_name = "NAME")]
        only_projects: Vec<String>,

        /// Clean destination tables before migrating
        #[arg(long)]
        clean: bool,

        /// Allow cleaning a destination that already holds issues
        #[arg(long)]
        force: bool,

        /// Allow migrating into a destination that already holds issues
        #[arg(long)]
        append: bool,

        /// Dry run: validate and show plan without touching any database
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the migration order and deferred references
    Plan,

    /// Test database connections and count existing issues
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            project,
            only_projects,
            clean,
            force,
            append,
            dry_run,
        } => {
            // Apply overrides
            if let Some(name) = project {
                config.migration.output_project = name;
            }
            config.migration.projects.extend(only_projects);
            config.migration.clean |= clean;
            config.migration.force |= force;
            config.migration.append |= append;
            config.validate()?;

            if dry_run {
                let plan = migration_plan(&config)?;
                print_plan(&plan, cli.output_json)?;
                println!("\nDry run completed, no data was changed.");
                return Ok(ExitCode::SUCCESS);
            }

            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.run(Some(cancel_token)).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result);
            }

            if !result.errors.is_empty() {
                return Ok(ExitCode::from(EXIT_ROW_ERRORS));
            }
        }

        Commands::Plan => {
            let plan = migration_plan(&config)?;
            print_plan(&plan, cli.output_json)?;
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!("  Source: {} OK", result.source);
                println!("  Destination: {} OK", result.destination);
                for (table, rows) in &result.guard_rows {
                    println!("  {}: {} rows", table, rows);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_plan(plan: &MigrationPlan, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
        return Ok(());
    }

    println!("Migration order:");
    for (i, step) in plan.steps.iter().enumerate() {
        println!("  {:>2}. {} ({})", i + 1, step.kind, step.table);
        if !step.depends_on.is_empty() {
            println!("        after: {}", step.depends_on.join(", "));
        }
        for deferred in &step.deferred {
            println!("        second pass: {}", deferred);
        }
    }
    Ok(())
}

fn print_summary(result: &MigrationResult) {
    println!("\nMigration {}!", result.status.replace('_', " "));
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    for kind in &result.kinds {
        println!(
            "  {:<20} migrated {:>6}  merged {:>6}  skipped {:>4}  filtered {:>4}",
            kind.kind, kind.migrated, kind.merged, kind.skipped, kind.filtered
        );
    }
    let pass = &result.second_pass;
    println!(
        "  Second pass: {} resolved, {} defaulted, {} attached, {} groups created",
        pass.resolved, pass.defaulted, pass.attached, pass.groups_created
    );
    if !result.warnings.is_empty() {
        println!("  Warnings: {}", result.warnings.len());
    }
    if !result.errors.is_empty() {
        println!("  Skipped rows:");
        for e in &result.errors {
            match e.source_key {
                Some(key) => println!("    {} #{}: {}", e.kind, key, e.message),
                None => println!("    {}: {}", e.kind, e.message),
            }
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current row...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Could not install {} handler: {}", name, e),
        }
    }

    cancel_token
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current row...");
            token.cancel();
        }
    });

    cancel_token
}
