//! Reporter trait for progress reporting without UI coupling.
//!
//! The pipeline and installer report lifecycle events through this trait so
//! frontends can render them however they like. The default wiring uses
//! [`NullReporter`]; the CLI installs a logging implementation.

/// Receives install lifecycle events.
pub trait Reporter: Send + Sync + std::fmt::Debug {
    /// A new phase has started (e.g. "resolving", "downloading").
    fn section(&self, title: &str);

    /// Progress of one archive's download. Called with `(0, None)` when the
    /// download starts and with `(n, Some(n))` once `n` bytes are complete.
    fn downloading(&self, archive: &str, current: u64, total: Option<u64>);

    /// An archive's bytes matched the trusted digest.
    fn verified(&self, archive: &str);

    /// An archive is being expanded into the destination.
    fn extracting(&self, archive: &str);

    /// An archive finished the full download/verify/extract sequence.
    fn installed(&self, archive: &str);

    /// An archive failed; the plan is about to be cancelled.
    fn failed(&self, archive: &str, reason: &str);

    /// Informational message.
    fn info(&self, msg: &str);

    /// Warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn downloading(&self, archive: &str, current: u64, total: Option<u64>) {
        (**self).downloading(archive, current, total);
    }
    fn verified(&self, archive: &str) {
        (**self).verified(archive);
    }
    fn extracting(&self, archive: &str) {
        (**self).extracting(archive);
    }
    fn installed(&self, archive: &str) {
        (**self).installed(archive);
    }
    fn failed(&self, archive: &str, reason: &str) {
        (**self).failed(archive, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations and tests.
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn downloading(&self, _: &str, _: u64, _: Option<u64>) {}
    fn verified(&self, _: &str) {}
    fn extracting(&self, _: &str) {}
    fn installed(&self, _: &str) {}
    fn failed(&self, _: &str, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
}

#[cfg(test)]
pub(crate) mod recording {
    use super::Reporter;
    use std::sync::Mutex;

    /// Captures events in order for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingReporter {
        pub(crate) events: Mutex<Vec<String>>,
    }

    impl RecordingReporter {
        fn push(&self, event: String) {
            self.events.lock().expect("event log lock").push(event);
        }

        pub(crate) fn snapshot(&self) -> Vec<String> {
            self.events.lock().expect("event log lock").clone()
        }
    }

    impl Reporter for RecordingReporter {
        fn section(&self, title: &str) {
            self.push(format!("section:{title}"));
        }
        fn downloading(&self, archive: &str, current: u64, _total: Option<u64>) {
            if current == 0 {
                self.push(format!("downloading:{archive}"));
            }
        }
        fn verified(&self, archive: &str) {
            self.push(format!("verified:{archive}"));
        }
        fn extracting(&self, archive: &str) {
            self.push(format!("extracting:{archive}"));
        }
        fn installed(&self, archive: &str) {
            self.push(format!("installed:{archive}"));
        }
        fn failed(&self, archive: &str, reason: &str) {
            self.push(format!("failed:{archive}:{reason}"));
        }
        fn info(&self, msg: &str) {
            self.push(format!("info:{msg}"));
        }
        fn warning(&self, msg: &str) {
            self.push(format!("warning:{msg}"));
        }
    }
}
