//! Subtitle attacher boundary.
//!
//! Converting the comment-stream XML into a subtitle track is a collaborator
//! concern, delegated to an external converter process. The engine only asks
//! the attacher for an optional subtitle path to hand to the muxer; any
//! conversion trouble degrades to "no subtitle" with a warning, never a
//! failed title.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;
use crate::process;
use crate::scanner::CacheEntry;

#[async_trait]
pub trait SubtitleAttacher: Send + Sync {
    /// Produce the subtitle file for one entry, if any.
    async fn prepare(&self, entry: &CacheEntry, cancel: &CancellationToken)
    -> Result<Option<PathBuf>>;

    fn name(&self) -> &'static str;
}

/// Attacher used when subtitles are disabled.
pub struct NoSubtitles;

#[async_trait]
impl SubtitleAttacher for NoSubtitles {
    async fn prepare(
        &self,
        _entry: &CacheEntry,
        _cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

const ENV_PATH: &str = "DANMAKU_FACTORY_PATH";
const DEFAULT_COMMAND: &str = "DanmakuFactory";
const CONVERT_TIMEOUT: Duration = Duration::from_secs(120);

/// External danmaku → ASS converter.
pub struct DanmakuConverter {
    binary: String,
    /// Argument template; `{input}` and `{output}` are substituted per file.
    args: Vec<String>,
}

impl DanmakuConverter {
    pub fn new(binary: Option<String>) -> Self {
        Self {
            binary: binary
                .filter(|p| !p.is_empty())
                .or_else(|| std::env::var(ENV_PATH).ok().filter(|p| !p.is_empty()))
                .unwrap_or_else(|| DEFAULT_COMMAND.to_string()),
            args: vec![
                "-i".to_string(),
                "{input}".to_string(),
                "-o".to_string(),
                "{output}".to_string(),
            ],
        }
    }

    fn substitute_args(&self, input: &str, output: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", input).replace("{output}", output))
            .collect()
    }

    fn ass_output_for(xml: &Path) -> PathBuf {
        let stem = xml.file_stem().unwrap_or_default().to_string_lossy();
        xml.with_file_name(format!("{stem}.ass"))
    }

    async fn convert(&self, xml: &Path, cancel: &CancellationToken) -> Option<PathBuf> {
        let ass = Self::ass_output_for(xml);

        // A previous run (or the user) may already have converted this one.
        if tokio::fs::try_exists(&ass).await.unwrap_or(false) {
            debug!("Reusing existing subtitle {}", ass.display());
            return Some(ass);
        }

        let mut cmd = process::command(&self.binary);
        cmd.args(self.substitute_args(
            &xml.to_string_lossy(),
            &ass.to_string_lossy(),
        ));

        let run = tokio::time::timeout(CONVERT_TIMEOUT, process::run(&mut cmd, cancel)).await;
        match run {
            Ok(Ok(output)) if output.status.success() => {
                if tokio::fs::try_exists(&ass).await.unwrap_or(false) {
                    Some(ass)
                } else {
                    warn!(
                        "{} reported success but wrote no {}",
                        self.binary,
                        ass.display()
                    );
                    None
                }
            }
            Ok(Ok(output)) => {
                warn!(
                    "Subtitle conversion failed for {}: {}",
                    xml.display(),
                    output.diagnostic()
                );
                None
            }
            Ok(Err(e)) => {
                warn!("Subtitle converter did not run for {}: {e}", xml.display());
                None
            }
            Err(_) => {
                warn!(
                    "Subtitle conversion timed out after {}s for {}",
                    CONVERT_TIMEOUT.as_secs(),
                    xml.display()
                );
                None
            }
        }
    }
}

#[async_trait]
impl SubtitleAttacher for DanmakuConverter {
    async fn prepare(
        &self,
        entry: &CacheEntry,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>> {
        let Some(xml) = &entry.danmaku else {
            return Ok(None);
        };
        Ok(self.convert(xml, cancel).await)
    }

    fn name(&self) -> &'static str {
        "danmaku"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_with_danmaku(dir: &Path, danmaku: Option<PathBuf>) -> CacheEntry {
        CacheEntry {
            dir: dir.to_path_buf(),
            title: "t".to_string(),
            video: dir.join("video.m4s"),
            audio: dir.join("audio.m4s"),
            danmaku,
        }
    }

    #[test]
    fn ass_path_sits_beside_the_xml() {
        assert_eq!(
            DanmakuConverter::ass_output_for(Path::new("/cache/1/danmaku.xml")),
            PathBuf::from("/cache/1/danmaku.ass")
        );
    }

    #[test]
    fn template_substitution() {
        let converter = DanmakuConverter::new(Some("conv".into()));
        assert_eq!(
            converter.substitute_args("in.xml", "out.ass"),
            vec!["-i", "in.xml", "-o", "out.ass"]
        );
    }

    #[tokio::test]
    async fn no_danmaku_means_no_subtitle() {
        let tmp = TempDir::new().unwrap();
        let converter = DanmakuConverter::new(Some("conv".into()));
        let entry = entry_with_danmaku(tmp.path(), None);
        let result = converter
            .prepare(&entry, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn missing_converter_degrades_to_none() {
        let tmp = TempDir::new().unwrap();
        let xml = tmp.path().join("danmaku.xml");
        tokio::fs::write(&xml, "<i></i>").await.unwrap();

        let converter = DanmakuConverter::new(Some("definitely-not-a-converter".into()));
        let entry = entry_with_danmaku(tmp.path(), Some(xml));
        let result = converter
            .prepare(&entry, &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn reuses_existing_subtitle() {
        let tmp = TempDir::new().unwrap();
        let xml = tmp.path().join("danmaku.xml");
        let ass = tmp.path().join("danmaku.ass");
        tokio::fs::write(&xml, "<i></i>").await.unwrap();
        tokio::fs::write(&ass, "[Script Info]").await.unwrap();

        // Converter binary does not exist, but it is never invoked.
        let converter = DanmakuConverter::new(Some("definitely-not-a-converter".into()));
        let entry = entry_with_danmaku(tmp.path(), Some(xml));
        let result = converter
            .prepare(&entry, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, Some(ass));
    }
}
