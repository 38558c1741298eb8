//! Duplicate classifier: content identity for merged outputs.
//!
//! Identity is the strongest practical check: SHA-256 over file contents.
//! A candidate counts as "the same merge" only when a ledger record for the
//! identical input pair exists and the file it recorded is still on disk
//! with the recorded size and hash. Anything weaker (no record, size
//! mismatch) is `Distinct` and defers to the skip/overlay policy.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::Result;
use crate::ledger::MergeRecord;

/// Classifier verdict for a candidate output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// A file produced from this exact input pair already exists.
    Identical,
    /// No cheap proof of identity; policy flags decide.
    Distinct,
}

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Streaming SHA-256 of one file.
pub async fn file_sha256(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Content identity of a segment pair. Video and audio hashes are kept
/// positional so swapped tracks never collide.
pub async fn input_pair_key(video: &Path, audio: &Path) -> Result<String> {
    let video_hash = file_sha256(video).await?;
    let audio_hash = file_sha256(audio).await?;
    Ok(format!("{video_hash}:{audio_hash}"))
}

/// Compare the file a record points at (inside `output_dir`) against the
/// recorded size and hash. The size check short-circuits before hashing.
pub async fn classify(output_dir: &Path, record: Option<&MergeRecord>) -> Result<Verdict> {
    let Some(record) = record else {
        return Ok(Verdict::Distinct);
    };

    let recorded = output_dir.join(&record.output_name);
    let meta = match tokio::fs::metadata(&recorded).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return Ok(Verdict::Distinct),
    };

    if meta.len() != record.output_size {
        return Ok(Verdict::Distinct);
    }

    if file_sha256(&recorded).await? == record.output_sha256 {
        Ok(Verdict::Identical)
    } else {
        Ok(Verdict::Distinct)
    }
}
