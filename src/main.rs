use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

use veo_studio::config::{LogFormat, StudioConfig};

mod cmd;

#[derive(Parser)]
#[command(name = "veo-studio")]
#[command(version, about = "Batch video generation studio")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to studio.toml. Defaults to .veo/studio.toml in the project directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Log output format: text or json. Overrides studio.toml
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the web studio
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Enable dev mode (permissive CORS, binds 0.0.0.0)
        #[arg(long)]
        dev: bool,

        /// Open the studio in the default browser once listening
        #[arg(long)]
        open: bool,
    },
    /// Generate one video per prompt without the web UI
    Batch {
        /// Cookie file (.txt key=value lines or .json export)
        #[arg(long)]
        cookies: PathBuf,

        /// Prompt file, one prompt per line
        #[arg(long)]
        prompts: PathBuf,

        /// Aspect ratio: 16:9, 9:16, 1:1, 4:3 or 3:4
        #[arg(long, default_value = "16:9")]
        aspect_ratio: String,

        /// Clip duration in seconds (1-60)
        #[arg(long, default_value = "5")]
        duration: i64,

        /// Resolution: 720p, 1080p or 4K
        #[arg(long, default_value = "1080p")]
        resolution: String,

        /// Use the cookies without checking them against the service first
        #[arg(long)]
        skip_verify: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default studio.toml
    Init,
}

/// Resolve configuration (file, env, CLI) and install logging.
fn init_studio(
    project_dir: &Path,
    config_path: Option<&Path>,
    log_format: Option<LogFormat>,
    verbose: bool,
) -> Result<(StudioConfig, Option<WorkerGuard>)> {
    let mut studio = StudioConfig::resolve(project_dir, config_path)?;
    if let Some(format) = log_format {
        studio.logging.format = format;
    }
    let guard = veo_studio::logging::init(verbose, studio.logging.format, studio.logging.dir.as_deref())?;
    Ok((studio, guard))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config_path = cli.config.clone();

    match cli.command {
        Commands::Serve {
            port,
            host,
            dev,
            open,
        } => {
            let (studio, _log_guard) =
                init_studio(&project_dir, config_path.as_deref(), cli.log_format, cli.verbose)?;
            cmd::cmd_serve(studio, port, host, dev, open).await?;
        }
        Commands::Batch {
            cookies,
            prompts,
            aspect_ratio,
            duration,
            resolution,
            skip_verify,
        } => {
            let (studio, _log_guard) =
                init_studio(&project_dir, config_path.as_deref(), cli.log_format, cli.verbose)?;
            cmd::cmd_batch(
                studio,
                cmd::BatchArgs {
                    cookies,
                    prompts,
                    aspect_ratio,
                    duration,
                    resolution,
                    skip_verify,
                    verbose: cli.verbose,
                },
            )
            .await?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, config_path.as_deref(), command)?;
        }
    }

    Ok(())
}
