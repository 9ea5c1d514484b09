pub mod commands;
pub mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the JSON-RPC server
    Serve {
        /// Address to listen on, overriding the configuration
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Crawl comments of the given apps in the foreground
    Crawl {
        /// App ids from the app registry
        #[arg(required = true)]
        app_ids: Vec<i64>,
    },

    /// Analyze sentiment of the given apps' pending comments in the foreground
    Analyze {
        /// App ids from the app registry
        #[arg(required = true)]
        app_ids: Vec<i64>,
    },

    /// Call a method on a running server
    Call {
        /// Method name, e.g. crawl_comment
        #[arg(required = true)]
        method: String,

        /// Params as JSON, e.g. '{"app_ids": [9, 10]}'
        #[arg(short, long, default_value = "[]")]
        params: String,

        /// Server URL
        #[arg(short, long, default_value = "http://localhost:5000")]
        url: String,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let config_path = cli.config;

    match cli.command {
        Commands::Serve { bind } => {
            info!("Starting JSON-RPC server");
            commands::serve(config_path, bind).await
        },
        Commands::Crawl { app_ids } => {
            info!("Crawling comments for apps {:?}", app_ids);
            commands::crawl(config_path, app_ids).await
        },
        Commands::Analyze { app_ids } => {
            info!("Analyzing sentiment for apps {:?}", app_ids);
            commands::analyze(config_path, app_ids).await
        },
        Commands::Call { method, params, url } => {
            info!("Calling {} on {}", method, url);
            commands::call(method, params, url).await
        },
        Commands::Config { init } => {
            if init {
                info!("Writing default configuration");
                commands::init_config(config_path).await
            } else {
                info!("Showing current configuration");
                commands::show_config(config_path).await
            }
        },
    }
}
