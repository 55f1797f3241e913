//! Sessions command implementation.

use anyhow::{Context, Result};
use chrono::Utc;

use lanshare_core::upload::{SessionLedger, UploadSession};

use super::SessionsArgs;

/// Run the sessions command.
pub async fn run(args: SessionsArgs) -> Result<()> {
    let mut config = super::load_config();
    super::apply_dir(&mut config, args.dir);

    let sessions = SessionLedger::snapshot(&config.storage.ledger_dir())
        .await
        .context("Failed to read session ledger")?;

    let ttl = chrono::Duration::from_std(config.upload.session_ttl)
        .unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(ttl)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    if args.json {
        output_json(&sessions, cutoff)?;
    } else {
        display_sessions(&sessions, cutoff);
    }

    Ok(())
}

/// Output sessions as JSON.
fn output_json(sessions: &[UploadSession], cutoff: chrono::DateTime<Utc>) -> Result<()> {
    let output = serde_json::json!({
        "sessions": sessions.iter().map(|s| serde_json::json!({
            "session_id": s.id,
            "filename": s.filename,
            "uploaded": s.uploaded(),
            "total_chunks": s.total_chunks,
            "chunk_size": s.chunk_size,
            "missing_chunks": s.missing_chunks(),
            "created_at": s.created_at,
            "expired": s.is_expired(cutoff),
        })).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Display sessions as a text table.
fn display_sessions(sessions: &[UploadSession], cutoff: chrono::DateTime<Utc>) {
    println!();
    if sessions.is_empty() {
        println!("No uploads in flight.");
        println!();
        return;
    }

    println!("Uploads in flight:");
    println!("{}", "─".repeat(72));
    println!(
        "  {:32}  {:>11}  {:>6}  {:19}",
        "File", "Chunks", "Done", "Started"
    );
    println!("{}", "─".repeat(72));

    for session in sessions {
        let name = truncate(&session.filename, 32);
        let chunks = format!("{}/{}", session.uploaded(), session.total_chunks);
        let started = session
            .created_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S");
        let marker = if session.is_expired(cutoff) {
            "  (expired)"
        } else {
            ""
        };

        println!(
            "  {:32}  {:>11}  {:>5.1}%  {}{}",
            name,
            chunks,
            session.progress_percentage(),
            started,
            marker
        );
    }

    println!("{}", "─".repeat(72));
    println!("  {} session(s)", sessions.len());
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short.txt", 32), "short.txt");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }
}
