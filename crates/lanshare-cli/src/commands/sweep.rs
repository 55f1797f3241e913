//! Sweep command implementation.
//!
//! The sweep needs exclusive ownership of the storage directories. While
//! `lanshare serve` runs on the same directory the command refuses to
//! start; the server's own background sweep covers that case.

use std::sync::Arc;

use anyhow::{Context, Result};

use lanshare_core::events::NullSink;
use lanshare_core::upload::UploadManager;
use lanshare_core::Error;

use super::SweepArgs;

/// Run the sweep command.
pub async fn run(args: SweepArgs) -> Result<()> {
    let mut config = super::load_config();
    super::apply_dir(&mut config, args.dir);

    let manager = match UploadManager::open(&config.storage, &config.upload, Arc::new(NullSink))
        .await
    {
        Ok(manager) => manager,
        Err(e @ Error::StorageLocked(_)) => {
            let hint = e.suggestion().unwrap_or_default();
            anyhow::bail!("{e}\n{hint}");
        }
        Err(e) => return Err(e).context("Failed to open upload storage"),
    };

    let report = manager
        .sweep_expired()
        .await
        .context("Expiry sweep failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("Removed {} expired session(s)", report.expired_sessions);
        println!(
            "Removed {} orphaned partial file(s)",
            report.orphaned_artifacts
        );
        println!();
    }

    Ok(())
}
