use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "statweb")]
#[command(
    author,
    version,
    about = "Harvester for the structural indicators of the Provincia Autonoma di Trento"
)]
#[command(after_help = "Examples:
  statweb harvest
  statweb harvest --source subpro
  statweb info")]
pub struct Config {
    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run gather, fetch and import over the configured index sources
    #[command(after_help = "Examples:
  statweb harvest                              # Harvest all enabled sources from config
  statweb harvest --source subpro              # Harvest one source by name
  statweb harvest --config ~/custom.toml       # Use custom config file
  statweb harvest --scratch-dir /var/tmp/stat  # Keep downloaded tables elsewhere")]
    Harvest {
        /// PostgreSQL connection URL of the harvest ledger
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,

        /// Base URL of the catalog API
        #[arg(long, env = "CKAN_URL")]
        ckan_url: String,

        /// API key of the harvest service user
        #[arg(long, env = "CKAN_API_KEY")]
        ckan_api_key: Option<String>,

        /// Public URL of the catalog, used for hosted file links
        #[arg(long, env = "CKAN_SITE_URL")]
        site_url: Option<String>,

        /// Custom path to harvest.toml
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Harvest only the named sources (repeatable)
        #[arg(short, long, value_name = "NAME")]
        source: Vec<String>,

        /// Directory for downloaded tables
        #[arg(long, value_name = "DIR", env = "STATWEB_SCRATCH_DIR")]
        scratch_dir: Option<PathBuf>,
    },
    /// Print the harvester descriptor
    Info,
}
