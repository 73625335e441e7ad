//! Metacat CLI - Command line interface for the metadata catalog

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod output;

use commands::{completions, config as config_cmd, entity};
use config::{config_file_path, Backend, CatalogConfig};
use metacat_cache::EntityCache;
use metacat_repository::{EntityRepository, LoggingSink, TypeRegistry};
use metacat_storage::{MemoryStorage, RedbStorage, StorageBackend};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "metacat")]
#[command(author, version, about = "Versioned metadata catalog")]
pub struct Cli {
    /// Config file
    #[arg(short, long, global = true, env = "METACAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, global = true, env = "METACAT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// User recorded as the author of changes
    #[arg(short, long, global = true, default_value = "admin", env = "METACAT_USER")]
    pub user: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    pub format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config_file_path)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage entities
    Entity(entity::EntityArgs),
    /// Manage the config file
    Config(config_cmd::ConfigArgs),
    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Application context with the repository
pub struct AppContext {
    pub repo: EntityRepository,
    pub storage: Arc<dyn StorageBackend>,
}

impl AppContext {
    pub async fn new(cli: &Cli, config: &CatalogConfig) -> anyhow::Result<Self> {
        let storage: Arc<dyn StorageBackend> = match config.storage.backend {
            Backend::Redb => {
                let data_dir = config.data_dir(cli.data_dir.as_deref());
                std::fs::create_dir_all(&data_dir)?;
                let db_path = data_dir.join("metacat.redb");
                tracing::debug!("Using database at: {:?}", db_path);
                Arc::new(RedbStorage::open(&db_path)?)
            }
            Backend::Memory => {
                tracing::debug!("Using in-memory storage");
                Arc::new(MemoryStorage::new())
            }
        };
        storage.initialize().await?;

        let repo = EntityRepository::new(
            storage.clone(),
            Arc::new(TypeRegistry::with_builtin_types()),
            Arc::new(EntityCache::from_config(&config.cache)),
            Arc::new(LoggingSink),
            config.repository_config(),
        );
        Ok(Self { repo, storage })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    tracing::debug!("Starting metacat CLI");

    match &cli.command {
        Commands::Config(args) => config_cmd::run(args, &cli)?,
        Commands::Completions(args) => completions::run(args)?,
        Commands::Entity(args) => {
            let config = CatalogConfig::load(&cli.config_path())?;
            let ctx = AppContext::new(&cli, &config).await?;
            let result = entity::run(args, &cli, &ctx).await;
            ctx.storage.close().await?;
            result?;
        }
    }

    Ok(())
}
