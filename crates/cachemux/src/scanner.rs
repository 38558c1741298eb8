//! Segment scanner: walks a cache root and pairs audio/video segments.
//!
//! Naming conventions are fixed and live only here: a session directory is
//! any directory that directly contains `video.m4s` and/or `audio.m4s`.
//! Metadata (`entry.json`) and the comment stream (`danmaku.xml`) may sit in
//! the session directory itself or any ancestor up to the cache root, which
//! matches how the streaming client nests one title's quality variants.
//! The scan is read-only and its order is deterministic (name-sorted,
//! breadth-first), which fixes the batch report order.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::filename::sanitize_title;
use crate::{Error, Result};

pub const VIDEO_SEGMENT: &str = "video.m4s";
pub const AUDIO_SEGMENT: &str = "audio.m4s";
const METADATA_FILE: &str = "entry.json";
const DANMAKU_FILE: &str = "danmaku.xml";

/// One mergeable title discovered in the cache tree.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Session directory holding the segment pair.
    pub dir: PathBuf,
    /// Sanitized title, the output filename stem.
    pub title: String,
    pub video: PathBuf,
    pub audio: PathBuf,
    /// Comment-stream XML, when the cache has one.
    pub danmaku: Option<PathBuf>,
}

/// A folder that looked like a session but is missing a segment.
#[derive(Debug, Clone)]
pub struct ScanSkip {
    pub dir: PathBuf,
    pub reason: String,
}

/// Full outcome of one scan pass, in traversal order.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub entries: Vec<CacheEntry>,
    pub skipped: Vec<ScanSkip>,
}

#[derive(Deserialize)]
struct EntryMetadata {
    title: Option<String>,
}

/// Scan a cache root for segment pairs.
///
/// An unreadable cache root is a configuration error; unreadable inner
/// directories are skipped with a warning and never abort the scan.
pub async fn scan(cache_root: &Path) -> Result<ScanReport> {
    let meta = tokio::fs::metadata(cache_root)
        .await
        .map_err(|e| Error::config(format!("cache root {}: {e}", cache_root.display())))?;
    if !meta.is_dir() {
        return Err(Error::config(format!(
            "cache root {} is not a directory",
            cache_root.display()
        )));
    }

    let mut report = ScanReport::default();
    let mut queue = VecDeque::from([cache_root.to_path_buf()]);
    let mut top_level_dirs: Vec<PathBuf> = Vec::new();

    while let Some(dir) = queue.pop_front() {
        let listing = match read_sorted(&dir).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!("Skipping unreadable directory {}: {e}", dir.display());
                continue;
            }
        };

        let video = listing.file(VIDEO_SEGMENT);
        let audio = listing.file(AUDIO_SEGMENT);

        match (video, audio) {
            (Some(video), Some(audio)) => {
                let title = resolve_title(cache_root, &dir).await;
                let danmaku = find_upward(cache_root, &dir, DANMAKU_FILE).await;
                debug!("Found segment pair for '{title}' in {}", dir.display());
                report.entries.push(CacheEntry {
                    dir,
                    title,
                    video,
                    audio,
                    danmaku,
                });
            }
            (Some(_), None) => report.skipped.push(skip(&dir, "missing audio segment")),
            (None, Some(_)) => report.skipped.push(skip(&dir, "missing video segment")),
            (None, None) => {
                if dir == cache_root {
                    top_level_dirs = listing.dirs.clone();
                }
                queue.extend(listing.dirs);
            }
        }
    }

    // A per-title folder with no segments anywhere below it is still worth
    // reporting, not silently dropping.
    for top in top_level_dirs {
        let touched = report.entries.iter().any(|e| e.dir.starts_with(&top))
            || report.skipped.iter().any(|s| s.dir.starts_with(&top));
        if !touched {
            report.skipped.push(skip(&top, "no recognizable segments"));
        }
    }

    Ok(report)
}

fn skip(dir: &Path, reason: &str) -> ScanSkip {
    warn!("Skipping {}: {reason}", dir.display());
    ScanSkip {
        dir: dir.to_path_buf(),
        reason: reason.to_string(),
    }
}

struct Listing {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Listing {
    fn file(&self, name: &str) -> Option<PathBuf> {
        self.files
            .iter()
            .find(|p| p.file_name().is_some_and(|n| n == name))
            .cloned()
    }
}

async fn read_sorted(dir: &Path) -> std::io::Result<Listing> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let ty = entry.file_type().await?;
        if ty.is_dir() {
            dirs.push(entry.path());
        } else if ty.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    dirs.sort();
    Ok(Listing { files, dirs })
}

/// Title for a session directory: metadata first, folder name second.
async fn resolve_title(cache_root: &Path, session_dir: &Path) -> String {
    if let Some(meta_path) = find_upward(cache_root, session_dir, METADATA_FILE).await
        && let Ok(text) = tokio::fs::read_to_string(&meta_path).await
        && let Ok(meta) = serde_json::from_str::<EntryMetadata>(&text)
        && let Some(title) = meta.title.filter(|t| !t.trim().is_empty())
    {
        return sanitize_title(&title);
    }

    // Fall back to the per-title folder: the first path component under the
    // cache root (or the session dir itself when it sits at the top level).
    let fallback = session_dir
        .strip_prefix(cache_root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .unwrap_or_else(|| session_dir.file_name().unwrap_or_default().to_string_lossy().to_string());
    sanitize_title(&fallback)
}

/// Look for `name` in `start` and each ancestor up to and including the
/// cache root.
async fn find_upward(cache_root: &Path, start: &Path, name: &str) -> Option<PathBuf> {
    let mut dir = start;
    loop {
        let candidate = dir.join(name);
        if tokio::fs::metadata(&candidate)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
        {
            return Some(candidate);
        }
        if dir == cache_root {
            return None;
        }
        dir = dir.parent()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn mkdirs(root: &Path, rel: &str) -> PathBuf {
        let dir = root.join(rel);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        dir
    }

    async fn touch(dir: &Path, name: &str) {
        tokio::fs::write(dir.join(name), b"x").await.unwrap();
    }

    #[tokio::test]
    async fn pairs_complete_sessions_and_skips_partial_ones() {
        let tmp = TempDir::new().unwrap();
        let complete = mkdirs(tmp.path(), "1001/c_2001/64").await;
        touch(&complete, VIDEO_SEGMENT).await;
        touch(&complete, AUDIO_SEGMENT).await;

        let partial = mkdirs(tmp.path(), "1002/c_2002/64").await;
        touch(&partial, VIDEO_SEGMENT).await;

        let report = scan(tmp.path()).await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.entries[0].video, complete.join(VIDEO_SEGMENT));
        assert!(report.skipped[0].reason.contains("audio"));
    }

    #[tokio::test]
    async fn title_prefers_metadata_over_folder_name() {
        let tmp = TempDir::new().unwrap();
        let session = mkdirs(tmp.path(), "1001/c_2001/64").await;
        touch(&session, VIDEO_SEGMENT).await;
        touch(&session, AUDIO_SEGMENT).await;
        tokio::fs::write(
            tmp.path().join("1001/c_2001/entry.json"),
            br#"{"title": "My Show: Episode 1?"}"#,
        )
        .await
        .unwrap();

        let report = scan(tmp.path()).await.unwrap();
        assert_eq!(report.entries[0].title, "My Show_ Episode 1_");
    }

    #[tokio::test]
    async fn title_falls_back_to_top_level_folder() {
        let tmp = TempDir::new().unwrap();
        let session = mkdirs(tmp.path(), "my-title/64").await;
        touch(&session, VIDEO_SEGMENT).await;
        touch(&session, AUDIO_SEGMENT).await;

        let report = scan(tmp.path()).await.unwrap();
        assert_eq!(report.entries[0].title, "my-title");
    }

    #[tokio::test]
    async fn danmaku_found_in_ancestor() {
        let tmp = TempDir::new().unwrap();
        let session = mkdirs(tmp.path(), "1001/c_2001/64").await;
        touch(&session, VIDEO_SEGMENT).await;
        touch(&session, AUDIO_SEGMENT).await;
        touch(&tmp.path().join("1001/c_2001"), DANMAKU_FILE).await;

        let report = scan(tmp.path()).await.unwrap();
        assert_eq!(
            report.entries[0].danmaku.as_deref(),
            Some(tmp.path().join("1001/c_2001").join(DANMAKU_FILE).as_path())
        );
    }

    #[tokio::test]
    async fn scan_order_is_name_sorted() {
        let tmp = TempDir::new().unwrap();
        for name in ["b-title", "a-title", "c-title"] {
            let session = mkdirs(tmp.path(), &format!("{name}/64")).await;
            touch(&session, VIDEO_SEGMENT).await;
            touch(&session, AUDIO_SEGMENT).await;
        }

        let report = scan(tmp.path()).await.unwrap();
        let titles: Vec<&str> = report.entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["a-title", "b-title", "c-title"]);
    }

    #[tokio::test]
    async fn missing_root_is_configuration_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        let err = scan(&missing).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn empty_root_yields_empty_report() {
        let tmp = TempDir::new().unwrap();
        let report = scan(tmp.path()).await.unwrap();
        assert!(report.entries.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn segmentless_title_folder_is_reported() {
        let tmp = TempDir::new().unwrap();
        mkdirs(tmp.path(), "empty-title/64").await;
        let session = mkdirs(tmp.path(), "full-title/64").await;
        touch(&session, VIDEO_SEGMENT).await;
        touch(&session, AUDIO_SEGMENT).await;

        let report = scan(tmp.path()).await.unwrap();
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].dir, tmp.path().join("empty-title"));
        assert!(report.skipped[0].reason.contains("no recognizable segments"));
    }
}
