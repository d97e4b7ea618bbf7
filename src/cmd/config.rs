//! Configuration view and validation commands: `veo-studio config`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::super::ConfigCommands;
use veo_studio::config::{CONFIG_DIR, CONFIG_FILE, StudioConfig};

fn config_path(project_dir: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| project_dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

pub fn cmd_config(
    project_dir: &Path,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let path = config_path(project_dir, explicit);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Veo Studio Configuration");
            println!("========================");
            println!();
            if path.exists() {
                println!("Config file: {}", path.display());
            } else {
                println!("No studio.toml found at {}; showing defaults.", path.display());
            }
            println!();

            // Effective values include .env and VEO_* overrides.
            let config = StudioConfig::resolve(project_dir, path.exists().then_some(path.as_path()))?;
            let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !path.exists() {
                println!("No studio.toml found. Using defaults (valid).");
                return Ok(());
            }

            let config = StudioConfig::load(&path)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if path.exists() {
                println!("studio.toml already exists at {}", path.display());
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            StudioConfig::default().save(&path)?;
            println!("Created {}", path.display());
        }
    }

    Ok(())
}
