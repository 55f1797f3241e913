//! CLI command definitions and handlers.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// A missing file yields defaults. A file that cannot be parsed is reported
/// and defaults are used instead, so the server still comes up.
pub fn load_config() -> lanshare_core::config::Config {
    match lanshare_core::config::Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable configuration");
            lanshare_core::config::Config::default()
        }
    }
}

/// Apply a `--dir` override to the storage section.
///
/// Staging and ledger directories follow the upload directory unless they
/// were configured explicitly.
pub fn apply_dir(config: &mut lanshare_core::config::Config, dir: Option<PathBuf>) {
    if let Some(dir) = dir {
        config.storage.upload_dir = dir;
    }
}

pub mod config;
pub mod serve;
pub mod sessions;
pub mod sweep;

/// Lanshare - Local network file drop with resumable uploads
#[derive(Parser)]
#[command(name = "lanshare")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Start the upload server
    Serve(ServeArgs),

    /// List uploads that are still in flight
    Sessions(SessionsArgs),

    /// Remove expired uploads and orphaned partial files
    ///
    /// Refuses to run while a server is using the same directory.
    Sweep(SweepArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Port to listen on (default from config, 5000)
    #[arg(short, long, env = "LANSHARE_PORT")]
    pub port: Option<u16>,

    /// Directory to store uploaded files in
    #[arg(short, long, env = "LANSHARE_DIR")]
    pub dir: Option<PathBuf>,

    /// Bind to localhost only
    #[arg(long)]
    pub localhost_only: bool,

    /// Require a bearer token (generated unless configured)
    #[arg(long)]
    pub auth: bool,
}

/// Arguments for the sessions command
#[derive(Parser)]
pub struct SessionsArgs {
    /// Upload directory whose sessions to list
    #[arg(short, long, env = "LANSHARE_DIR")]
    pub dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the sweep command
#[derive(Parser)]
pub struct SweepArgs {
    /// Upload directory to sweep
    #[arg(short, long, env = "LANSHARE_DIR")]
    pub dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::parse_from(["lanshare", "serve", "--port", "9000", "--auth"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, Some(9000));
        assert!(args.auth);
        assert!(!args.localhost_only);
    }

    #[test]
    fn test_apply_dir_moves_derived_dirs() {
        let mut config = lanshare_core::config::Config::default();
        apply_dir(&mut config, Some(PathBuf::from("/srv/drop")));

        assert_eq!(config.storage.upload_dir, PathBuf::from("/srv/drop"));
        assert_eq!(
            config.storage.staging_dir(),
            PathBuf::from("/srv/drop/.partial")
        );
    }
}
