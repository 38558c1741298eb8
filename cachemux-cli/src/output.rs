//! Human-readable batch report rendering.

use cachemux::BatchReport;
use cachemux::report::SkipReason;
use colored::Colorize;

const KIB: f64 = 1024.0;

fn human_bytes(bytes: u64) -> String {
    let bytes = bytes as f64;
    if bytes >= KIB * KIB * KIB {
        format!("{:.2} GiB", bytes / (KIB * KIB * KIB))
    } else if bytes >= KIB * KIB {
        format!("{:.1} MiB", bytes / (KIB * KIB))
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes / KIB)
    } else {
        format!("{bytes:.0} B")
    }
}

/// Render the end-of-run summary: every produced output, every skip, every
/// failure with its reason, then totals — all in scan order.
pub fn render(report: &BatchReport) -> String {
    let mut out = String::new();

    if !report.successes.is_empty() {
        out.push_str(&format!("Merged {} title(s):\n", report.successes.len()));
        for success in &report.successes {
            out.push_str(&format!(
                "  {} {} ({}, {}, {:.1}s)\n",
                "✓".green(),
                success.output.display(),
                success.backend,
                human_bytes(success.size_bytes),
                success.elapsed_secs,
            ));
        }
    }

    if !report.skipped.is_empty() {
        out.push_str(&format!("Skipped {} title(s):\n", report.skipped.len()));
        for skip in &report.skipped {
            let marker = match skip.reason {
                SkipReason::AlreadyMerged => "=".cyan(),
                SkipReason::ExistingKept => "-".yellow(),
            };
            out.push_str(&format!(
                "  {} {} — {} ({})\n",
                marker,
                skip.title,
                skip.reason,
                skip.output.display(),
            ));
        }
    }

    if !report.failures.is_empty() {
        out.push_str(&format!("Failed {} title(s):\n", report.failures.len()));
        for failure in &report.failures {
            out.push_str(&format!(
                "  {} {} — {}\n",
                "✗".red(),
                failure.title,
                failure.reason,
            ));
        }
    }

    if report.systemic_failure() {
        out.push_str(&format!(
            "{}\n",
            "Every title failed — check disk space and output directory permissions."
                .red()
                .bold()
        ));
    }

    if report.cancelled > 0 {
        out.push_str(&format!(
            "{} title(s) not attempted (interrupted).\n",
            report.cancelled
        ));
    }

    out.push_str(&format!(
        "{} merged, {} skipped, {} failed in {:.1}s\n",
        report.successes.len(),
        report.skipped.len(),
        report.failures.len(),
        report.elapsed_secs,
    ));

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachemux::BackendKind;
    use cachemux::report::{MergeFailure, MergeSkip, MergeSuccess};
    use std::path::PathBuf;

    fn sample_report() -> BatchReport {
        BatchReport {
            successes: vec![MergeSuccess {
                title: "a".into(),
                output: PathBuf::from("/out/a.mp4"),
                backend: BackendKind::Mp4box,
                size_bytes: 3 * 1024 * 1024,
                elapsed_secs: 1.25,
            }],
            skipped: vec![MergeSkip {
                title: "b".into(),
                output: PathBuf::from("/out/b.mp4"),
                reason: SkipReason::AlreadyMerged,
            }],
            failures: vec![MergeFailure {
                title: "c".into(),
                dir: PathBuf::from("/cache/c"),
                reason: "missing audio segment".into(),
            }],
            cancelled: 0,
            elapsed_secs: 2.5,
        }
    }

    #[test]
    fn lists_every_outcome_with_totals() {
        colored::control::set_override(false);
        let rendered = render(&sample_report());
        assert!(rendered.contains("/out/a.mp4"));
        assert!(rendered.contains("3.0 MiB"));
        assert!(rendered.contains("already merged"));
        assert!(rendered.contains("missing audio segment"));
        assert!(rendered.contains("1 merged, 1 skipped, 1 failed"));
    }

    #[test]
    fn flags_systemic_failures() {
        colored::control::set_override(false);
        let report = BatchReport {
            failures: vec![
                MergeFailure {
                    title: "a".into(),
                    dir: PathBuf::from("/cache/a"),
                    reason: "No space left on device".into(),
                },
                MergeFailure {
                    title: "b".into(),
                    dir: PathBuf::from("/cache/b"),
                    reason: "No space left on device".into(),
                },
            ],
            ..Default::default()
        };
        assert!(render(&report).contains("Every title failed"));
    }

    #[test]
    fn human_bytes_scales() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
        assert_eq!(human_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }
}
