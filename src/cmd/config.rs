//! Configuration commands: `omniqc config`.

use anyhow::Result;
use omniqc::omniqc_config::OmniqcToml;
use std::path::Path;

use super::load_config;
use crate::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let config = load_config(cli, project_dir)?;
            println!();
            println!("OmniQC Configuration");
            println!("====================");
            println!();
            if config.config_file.exists() {
                println!("Config file: {}", config.config_file.display());
            } else {
                println!("No config file at {} (using defaults)", config.config_file.display());
            }
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!();
            print!("{}", config.to_toml().to_toml_string()?);
        }
        Some(ConfigCommands::Init) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| OmniqcToml::path_for(project_dir));
            if OmniqcToml::write_template(&path)? {
                println!("Created {}", path.display());
            } else {
                println!("{} already exists", path.display());
            }
        }
    }
    Ok(())
}
