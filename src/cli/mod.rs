pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging for this crate
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every command that talks to the site
#[derive(clap::Args, Debug, Clone)]
pub struct SiteArgs {
    /// Configuration profile to use
    #[arg(short, long, default_value = "default")]
    pub profile: String,

    /// Base URL of the running site
    #[arg(short, long)]
    pub base_url: Option<String>,

    /// Page driver ("webdriver" or "http")
    #[arg(long)]
    pub driver: Option<String>,

    /// Browser to drive ("chrome" or "firefox")
    #[arg(long)]
    pub browser: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the site and write the visual test parameters
    Crawl {
        #[command(flatten)]
        site: SiteArgs,

        /// Output file for the test parameters
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Screenshot every crawled page and compare it with its baseline
    Smoke {
        #[command(flatten)]
        site: SiteArgs,

        /// Test parameters file produced by `crawl`
        #[arg(long)]
        params: Option<PathBuf>,

        /// Directory holding the baseline screenshots
        #[arg(long)]
        baselines: Option<PathBuf>,

        /// Overwrite baselines with the current screenshots
        #[arg(short, long)]
        update: bool,
    },

    /// Manage configuration profiles
    Config {
        /// Profile name to manage
        #[arg(required = false)]
        profile: Option<String>,

        /// List all available profiles
        #[arg(short, long)]
        list: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Crawl { site, output } => {
            info!("Crawling with profile {}", site.profile);
            commands::crawl(site, output).await
        },
        Commands::Smoke { site, params, baselines, update } => {
            info!("Running smoke tests with profile {}", site.profile);
            commands::smoke(site, params, baselines, update).await
        },
        Commands::Config { profile, list } => {
            if list {
                info!("Listing all configuration profiles");
                commands::list_profiles()
            } else if let Some(profile_name) = profile {
                info!("Managing configuration profile: {}", profile_name);
                commands::manage_profile(profile_name)
            } else {
                info!("Showing current configuration");
                commands::show_config()
            }
        },
    }
}
