use crate::output::print_json;
use clap::Subcommand;
use anyhow::Context;
use kya_core::config::{TrayConfig, WarnLevel};
use kya_core::paths;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Print the effective configuration
    Show,

    /// Check the configuration for common mistakes
    Validate,

    /// Write the effective configuration to the config file if none exists
    Init,
}

pub fn run(
    config: &TrayConfig,
    explicit: Option<&Path>,
    subcmd: ConfigSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Show => show(config, json),
        ConfigSubcommand::Validate => validate(config, json),
        ConfigSubcommand::Init => init(config, explicit),
    }
}

fn show(config: &TrayConfig, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(config);
    }
    print!("{}", serde_yaml::to_string(config)?);
    if config.state_file.is_none() {
        if let Ok(p) = config.state_path() {
            println!("# state_file resolves to {}", p.display());
        }
    }
    Ok(())
}

fn validate(config: &TrayConfig, json: bool) -> anyhow::Result<()> {
    let warnings = config.validate();
    if json {
        print_json(&warnings)?;
    } else if warnings.is_empty() {
        println!("Config OK");
    } else {
        for w in &warnings {
            let tag = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("{tag}: {}", w.message);
        }
    }
    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config has errors");
    }
    Ok(())
}

fn init(config: &TrayConfig, explicit: Option<&Path>) -> anyhow::Result<()> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => paths::default_config_path()?,
    };
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    config
        .save(&path)
        .with_context(|| format!("failed to write config to {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}
