//! Output path resolver: the skip / overlay / rename decision table.
//!
//! This table is the most behaviorally sensitive part of the engine, so the
//! decision itself is a pure function over three inputs: whether anything
//! sits at the candidate path, the duplicate classifier's verdict, and the
//! two policy flags. Skip always takes precedence over overlay.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::dedup::Verdict;

/// Collision policy flags, straight from the CLI.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Keep any existing non-identical file, skipping the title.
    pub skip: bool,
    /// Replace any existing non-identical file.
    pub overlay: bool,
}

/// What to do with one candidate output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing at the candidate path; mux straight to it.
    Fresh,
    /// An identical merge already exists; no process is invoked.
    AbortDuplicate,
    /// `skip` is set and a different file is in the way.
    Skip,
    /// `overlay` is set; the existing file will be replaced.
    Overwrite,
    /// Neither flag set; mux to a suffixed sibling path.
    Rename,
}

/// Resolve one candidate against the decision table.
pub fn decide(exists: bool, verdict: Verdict, policy: MergePolicy) -> Decision {
    if verdict == Verdict::Identical {
        return Decision::AbortDuplicate;
    }
    if !exists {
        return Decision::Fresh;
    }
    if policy.skip {
        Decision::Skip
    } else if policy.overlay {
        Decision::Overwrite
    } else {
        Decision::Rename
    }
}

const MAX_RENAME_SUFFIX: u32 = 10_000;

/// First `{stem}_{n}{ext}` sibling of `candidate` that does not exist yet.
pub async fn next_free_path(candidate: &Path) -> Result<PathBuf> {
    let stem = candidate
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = candidate
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = candidate.parent().unwrap_or_else(|| Path::new("."));

    for n in 1..=MAX_RENAME_SUFFIX {
        let sibling = parent.join(format!("{stem}_{n}{ext}"));
        if !tokio::fs::try_exists(&sibling).await? {
            return Ok(sibling);
        }
    }
    Err(crate::Error::other(format!(
        "no free rename suffix for {} after {MAX_RENAME_SUFFIX} attempts",
        candidate.display()
    )))
}
