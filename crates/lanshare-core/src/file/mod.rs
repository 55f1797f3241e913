//! Visible file set operations.
//!
//! This module handles:
//! - Reducing client-supplied names to a bare file name
//! - Collision-free naming (`name(1).ext`, `name(2).ext`, ...)
//! - Listing the finished files in the upload directory

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// A finished file in the upload directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleFile {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

/// Reduce a client-supplied name to its final path component.
///
/// Both `/` and `\` count as separators so that names coming from any
/// browser platform are handled alike. Returns `None` for names that are
/// empty or consist only of `.` / `..`.
#[must_use]
pub fn file_name_only(name: &str) -> Option<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

/// Split a file name into stem and extension (extension keeps its dot).
///
/// Only the last extension is split off and a leading dot does not start
/// an extension, so `archive.tar.gz` gives `("archive.tar", ".gz")` and
/// `.bashrc` gives `(".bashrc", "")`.
#[must_use]
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if name[..idx].chars().any(|c| c != '.') => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Candidate name for the `n`-th collision, `n >= 1`.
#[must_use]
pub fn numbered_name(name: &str, n: u32) -> String {
    let (stem, ext) = split_extension(name);
    format!("{stem}({n}){ext}")
}

/// Find the first name in `dir` that is not yet taken.
///
/// Tries `name` itself, then `stem(1).ext`, `stem(2).ext` and so on.
/// Callers that rename into the result must serialize among themselves.
///
/// # Errors
///
/// Returns an error if the directory cannot be probed.
pub async fn resolve_unique_name(dir: &Path, name: &str) -> Result<(String, PathBuf)> {
    let mut candidate = name.to_string();
    let mut counter = 1;

    loop {
        let path = dir.join(&candidate);
        if !tokio::fs::try_exists(&path).await? {
            return Ok((candidate, path));
        }
        candidate = numbered_name(name, counter);
        counter += 1;
    }
}

/// List regular files in `dir`, newest first.
///
/// Subdirectories (including the staging and ledger directories) are skipped.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub async fn list_visible(dir: &Path) -> Result<Vec<VisibleFile>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }

        let modified = meta
            .modified()
            .map_or_else(|_| DateTime::<Utc>::UNIX_EPOCH, DateTime::<Utc>::from);

        files.push(VisibleFile {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: meta.len(),
            modified,
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_file_name_only() {
        assert_eq!(file_name_only("report.pdf"), Some("report.pdf".into()));
        assert_eq!(file_name_only("../../etc/passwd"), Some("passwd".into()));
        assert_eq!(file_name_only("C:\\Users\\me\\a.txt"), Some("a.txt".into()));
        assert_eq!(file_name_only("dir/"), None);
        assert_eq!(file_name_only(".."), None);
        assert_eq!(file_name_only("  "), None);
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("report.pdf"), ("report", ".pdf"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension(".bashrc"), (".bashrc", ""));
        assert_eq!(split_extension("README"), ("README", ""));
    }

    #[test]
    fn test_numbered_name() {
        assert_eq!(numbered_name("report.pdf", 1), "report(1).pdf");
        assert_eq!(numbered_name("README", 3), "README(3)");
    }

    #[tokio::test]
    async fn test_resolve_unique_name_skips_taken() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        let (name, _) = resolve_unique_name(dir, "report.pdf").await.unwrap();
        assert_eq!(name, "report.pdf");

        std::fs::write(dir.join("report.pdf"), "v1").unwrap();
        std::fs::write(dir.join("report(1).pdf"), "v2").unwrap();

        let (name, path) = resolve_unique_name(dir, "report.pdf").await.unwrap();
        assert_eq!(name, "report(2).pdf");
        assert_eq!(path, dir.join("report(2).pdf"));
    }

    #[tokio::test]
    async fn test_list_visible_skips_directories() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        std::fs::create_dir(dir.join(".partial")).unwrap();
        std::fs::write(dir.join("a.txt"), "aaa").unwrap();

        let files = list_visible(dir).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a.txt");
        assert_eq!(files[0].size, 3);
    }
}
