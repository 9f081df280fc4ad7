//! container-migrate CLI - export and import containers and views.

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use container_migrate::{
    Config, MigrateError, Mode, Orchestrator, RunOptions, RunResult, Severity, TargetType,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "container-migrate")]
#[command(about = "Export and import containers and views between a cluster and an archive")]
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

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by export and import.
#[derive(Args)]
struct RunArgs {
    /// Dry run: report what would happen without changing anything
    #[arg(long)]
    test: bool,

    /// Use the configured external data source instead of the file archive
    #[arg(long)]
    datasource: bool,

    /// Override number of parallel workers
    #[arg(long)]
    workers: Option<usize>,

    /// Restrict the run to one database
    #[arg(long)]
    db: Option<String>,

    /// Container to include (repeatable)
    #[arg(long = "container", value_name = "NAME")]
    containers: Vec<String>,

    /// Transfer metadata only, no rows
    #[arg(long)]
    schema_only: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export containers and views from the cluster
    Export {
        #[command(flatten)]
        run: RunArgs,

        /// Archive directory to write (overrides archive.path)
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Import containers and views into the cluster
    Import {
        #[command(flatten)]
        run: RunArgs,

        /// Archive directory to read (overrides archive.path)
        #[arg(long = "in", value_name = "DIR")]
        input: Option<PathBuf>,

        /// Append rows to existing compatible containers
        #[arg(long, conflicts_with_all = ["replace", "list"])]
        append: bool,

        /// Drop and recreate existing containers
        #[arg(long, conflicts_with = "list")]
        replace: bool,

        /// List the archive contents without importing
        #[arg(long)]
        list: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

/// Run one invocation. `Ok(false)` means the run finished with failures.
async fn run(cli: Cli) -> Result<bool, MigrateError> {
    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    let (args, mode) = match cli.command {
        Commands::Export { run, out } => {
            if let Some(dir) = out {
                config.archive.path = dir;
            }
            (run, None)
        }
        Commands::Import {
            run,
            input,
            append,
            replace,
            list,
        } => {
            if let Some(dir) = input {
                config.archive.path = dir;
            }
            let mode = match (append, replace, list) {
                (true, _, _) => Mode::Append,
                (_, true, _) => Mode::Replace,
                (_, _, true) => Mode::List,
                _ => Mode::Normal,
            };
            (run, Some(mode))
        }
    };

    // Apply overrides
    if let Some(w) = args.workers {
        config.migration.workers = Some(w);
    }
    if let Some(db) = args.db {
        config.cluster.database = Some(db);
    }
    config.migration.containers.extend(args.containers);
    if args.schema_only {
        config.migration.schema_only = true;
    }
    config.validate()?;

    let options = match mode {
        None => RunOptions::export(&config)?,
        Some(mode) => RunOptions::import(&config, mode)?,
    }
    .with_test_mode(args.test)
    .with_target_type(if args.datasource {
        TargetType::DataSource
    } else {
        TargetType::ExportFile
    });
    let listing = options.mode == Mode::List;

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;

    let orchestrator = Orchestrator::new(&config, options)
        .await?
        .with_cancel(cancel_token);
    let ledger = orchestrator.ledger();

    match orchestrator.run().await {
        Ok(result) => {
            print_result(&result, cli.output_json)?;
            Ok(result.success)
        }
        Err(e) => {
            if e.severity() == Severity::Structural && !listing {
                println!("\nRun aborted. Results so far:");
                ledger.print_summary();
            }
            Err(e)
        }
    }
}

fn print_result(result: &RunResult, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", result.to_json()?);
        return Ok(());
    }

    // Listing is itself the output; no summary.
    if let Some(inventory) = &result.inventory {
        println!("{}", inventory);
        return Ok(());
    }

    let status_msg = match (result.test_mode, result.success) {
        (true, true) => "Test run completed!",
        (true, false) => "Test run completed with failures.",
        (false, true) => "Run completed!",
        (false, false) => "Run completed with failures.",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("{}", result.counts);
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

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

/// Force the process down if in-flight work outlives the shutdown timeout.
fn spawn_shutdown_deadline(shutdown_timeout: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        eprintln!("Shutdown timeout of {}s exceeded, exiting.", shutdown_timeout);
        std::process::exit(1);
    });
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing in-flight containers (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
        spawn_shutdown_deadline(shutdown_timeout);
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight containers...");
            token.cancel();
            spawn_shutdown_deadline(shutdown_timeout);
        }
    });

    Ok(cancel_token)
}
