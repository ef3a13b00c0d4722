//! Config command implementation.

use anyhow::{Context, Result};

use driftbox_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            let config = super::load_config();
            let content = config
                .to_toml_string()
                .context("failed to render configuration")?;
            println!("# {}", Config::config_path().display());
            println!();
            print!("{content}");
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }
        ConfigAction::Reset => {
            Config::default()
                .save()
                .context("failed to write default configuration")?;
            println!("  Configuration reset: {}", Config::config_path().display());
        }
    }
    Ok(())
}
