//! prflow CLI - MCP server for Gitee pull-request workflows.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use prflow_core::{Config, Upstream};
use prflow_gitee::GiteeClient;
use prflow_mcp::{McpServer, ToolHandler};
use prflow_storage::{OperationLog, TokenCache, DEFAULT_LOG_CAPACITY};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prflow")]
#[command(author, version, about = "prflow - pull-request workflows for AI assistants", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdin/stdout
    Serve {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List configured instances
    Instances {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the default config file path
    Path,

    /// Show current configuration with secrets redacted
    Show {
        /// Path to the config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol, so logs go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Serve { config }) => {
            let config = load_config(config.as_deref())?;
            serve(config).await?;
        }
        Some(Commands::Instances { config }) => {
            let config = load_config(config.as_deref())?;
            print!("{}", format_instances(&config)?);
        }
        Some(Commands::Config { command }) => match command {
            ConfigCommands::Path => {
                println!("{}", Config::config_path()?.display());
            }
            ConfigCommands::Show { config } => {
                let config = load_config(config.as_deref())?;
                let rendered = toml::to_string_pretty(&config.redacted())
                    .context("Failed to render configuration")?;
                print!("{}", rendered);
            }
        },
        None => {
            println!("prflow - pull-request workflows for AI assistants");
            println!("Run with --help for usage information");
        }
    }

    Ok(())
}

/// Load configuration from `path`, or from the default location.
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let instances = config.registry()?;
    tracing::info!(
        "Loaded {} instance(s), active: {}",
        instances.len(),
        instances.default_instance().key
    );

    let upstream: Arc<dyn Upstream> = Arc::new(GiteeClient::with_base_url(
        config.api_url.clone(),
        Duration::from_secs(config.timeout_secs),
    )?);
    let tokens = Arc::new(TokenCache::new(upstream.clone()));
    let oplog = Arc::new(match &config.log_dir {
        Some(dir) => OperationLog::with_log_dir(DEFAULT_LOG_CAPACITY, dir)?,
        None => OperationLog::new(DEFAULT_LOG_CAPACITY),
    });

    let handler = ToolHandler::new(instances, upstream, tokens, oplog)?;
    let mut server = McpServer::new(handler);
    server.run().await?;
    Ok(())
}

/// One line per instance: key, repository, branches and workflow flags.
fn format_instances(config: &Config) -> anyhow::Result<String> {
    let registry = config.registry()?;
    let mut out = String::new();

    for (idx, instance) in registry.iter().enumerate() {
        let mut steps = Vec::new();
        if instance.auto_review {
            steps.push("review");
        }
        if instance.auto_test {
            steps.push("test");
        }
        if instance.auto_merge {
            steps.push("merge");
        }

        out.push_str(&format!(
            "{}{}\t{}\t{} -> {}\t{}\n",
            instance.key,
            if idx == 0 { " (active)" } else { "" },
            instance.full_name(),
            instance.head,
            instance.base,
            if steps.is_empty() {
                "create only".to_string()
            } else {
                steps.join(",")
            }
        ));
    }

    Ok(out)
}
