//! schemasync CLI - keep database tables in sync with model manifests.

mod app;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use schemasync_config::{ConfigLoader, LogFormat};
use tracing::info;

use crate::app::App;

#[derive(Parser)]
#[command(name = "schemasync")]
#[command(about = "Keep database tables in sync with model definitions")]
#[command(version)]
struct Cli {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long, env = "SCHEMASYNC_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file, overrides `database.path`
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Log level, e.g. debug or warn
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List configured models and whether they need migrating
    Status,

    /// Migrate every configured model
    Migrate,

    /// Print the stored migration record of a model
    Show {
        /// Model identity, e.g. app::models::User
        identity: String,
    },

    /// Print the extracted schema of a model and its hash
    Hash {
        /// Model identity, e.g. app::models::User
        identity: String,
    },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let path = cli.config.unwrap_or_else(ConfigLoader::default_path);
    let mut config = ConfigLoader::load(&path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;

    if let Some(database) = cli.database {
        config.database.path = database;
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    if let Some(format) = cli.log_format {
        config.log.format = format.into();
    }

    logging::init(&config.log);
    info!(database = %config.database.path.display(), "starting schemasync");

    let app = App::new(&config)?;
    match cli.command {
        Commands::Status => print!("{}", app.status()),
        Commands::Migrate => {
            let (out, ok) = app.migrate();
            print!("{out}");
            if !ok {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Show { identity } => println!("{}", app.show(&identity)?),
        Commands::Hash { identity } => println!("{}", app.hash(&identity)?),
    }

    Ok(ExitCode::SUCCESS)
}
