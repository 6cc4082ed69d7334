//! Progress reporting through the tracing subscriber.
//!
//! Keeps the output line-oriented and greppable, matching the rest of the
//! CLI's logging rather than drawing a live display.

use qsdk_core::Reporter;
use tracing::{info, warn};

/// Renders lifecycle events as log lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn section(&self, title: &str) {
        info!("== {title}");
    }

    fn downloading(&self, archive: &str, current: u64, total: Option<u64>) {
        match total {
            Some(total) if current == total => {
                info!(archive, bytes = total, "downloaded");
            }
            _ => info!(archive, "downloading"),
        }
    }

    fn verified(&self, archive: &str) {
        info!(archive, "checksum ok");
    }

    fn extracting(&self, archive: &str) {
        info!(archive, "extracting");
    }

    fn installed(&self, archive: &str) {
        info!(archive, "installed");
    }

    fn failed(&self, archive: &str, reason: &str) {
        warn!(archive, reason, "failed");
    }

    fn info(&self, msg: &str) {
        info!("{msg}");
    }

    fn warning(&self, msg: &str) {
        warn!("{msg}");
    }
}
