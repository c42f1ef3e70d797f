use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use dashsync_config::{DashboardConfig, HumanDuration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "dashsync", version, about = "Live dashboard state over reconnecting push channels")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the snapshot, open every channel and print changes until interrupted
    Watch {
        /// Stop after this long (e.g. 30s, 5m)
        #[arg(short, long)]
        duration: Option<HumanDuration>,
        /// How often to print the view model when it changed
        #[arg(short, long, default_value = "2s")]
        interval: HumanDuration,
        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },
    /// Fetch the snapshot endpoints once and print the seeded view model
    Snapshot {
        /// Pretty-print output
        #[arg(short, long)]
        pretty: bool,
    },
    /// Validate configuration file
    Validate,
    /// Show effective configuration
    Config,
}

fn find_config() -> Option<PathBuf> {
    // 1. DASHSYNC_CONFIG environment variable
    if let Ok(path) = std::env::var("DASHSYNC_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. dashsync.yaml in current directory
    let cwd_config = PathBuf::from("dashsync.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    None
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = cli.config.or_else(find_config).ok_or(
        "No configuration file found. Use --config, set DASHSYNC_CONFIG, or create dashsync.yaml",
    )?;

    // Validate works on the raw file so parse errors are reported the same way.
    if let Commands::Validate = cli.command {
        return commands::validate::run(&config_path);
    }

    let config = DashboardConfig::from_file(&config_path)?;

    match cli.command {
        Commands::Watch {
            duration,
            interval,
            json,
        } => {
            let args = commands::watch::WatchArgs {
                duration: duration.map(|d| d.as_duration()),
                interval: interval.as_duration(),
                json,
            };
            commands::watch::run(&config, args).await?;
        }
        Commands::Snapshot { pretty } => {
            commands::snapshot::run(&config, pretty).await?;
        }
        Commands::Config => {
            commands::config::run(&config)?;
        }
        Commands::Validate => {
            return Err("Internal error: command should have been handled earlier".into());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            let code = err.exit_code().clamp(1, 255) as u8;
            return ExitCode::from(code);
        }
    };

    init_logging();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
