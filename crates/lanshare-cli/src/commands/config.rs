//! Config command implementation.

use anyhow::{bail, Result};

use lanshare_core::config::Config;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let config = Config::load()?;
            println!();
            println!("Lanshare Configuration");
            println!("{}", "─".repeat(50));
            println!();
            print!("{}", config.to_toml()?);
            println!();
            println!("  staging_dir (effective) = {}", config.storage.staging_dir().display());
            println!("  ledger_dir (effective)  = {}", config.storage.ledger_dir().display());
            if config.server.auth_token.is_some() {
                println!("  auth_token              = (set)");
            }
            println!();
        }

        ConfigAction::Path => {
            println!("{}", Config::config_path().display());
        }

        ConfigAction::Init { force } => {
            let path = Config::config_path();
            if path.exists() && !force {
                bail!(
                    "Configuration already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            Config::default().save()?;
            println!("Wrote default configuration to {}", path.display());
        }
    }

    Ok(())
}
