//! Archive expansion, abstract over implementations.
//!
//! The upstream repository publishes 7-zip archives. The default extractor
//! runs in-process; configuring `external_extractor` shells out to a 7z-style
//! command instead, which some CI images prefer for speed. Both preserve
//! relative layout and file modes and create the output directory
//! idempotently.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

use crate::settings::Settings;

/// Expansion failures, classified for the error taxonomy.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// The archive is truncated or not a valid 7z stream.
    #[error("corrupt archive {path}: {message}")]
    CorruptArchive {
        /// The archive file.
        path: PathBuf,
        /// Decoder detail.
        message: String,
    },

    /// The destination filesystem is full.
    #[error("disk full extracting {path}")]
    DiskFull {
        /// The archive file.
        path: PathBuf,
    },

    /// The destination is not writable.
    #[error("permission denied extracting {path}")]
    PermissionDenied {
        /// The archive file.
        path: PathBuf,
    },

    /// Two archives of one plan wrote the same path.
    #[error("archives '{first}' and '{second}' both write {path}")]
    ConflictingEntry {
        /// The contested install-relative path.
        path: PathBuf,
        /// Archive that claimed the path first.
        first: String,
        /// Archive that collided.
        second: String,
    },

    /// The configured external extractor is not on PATH.
    #[error("extractor command '{command}' not found on PATH")]
    ToolMissing {
        /// The configured command.
        command: String,
    },

    /// Any other io failure during expansion.
    #[error("io error extracting {path}: {source}")]
    Io {
        /// The archive file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Expands one archive into a directory.
pub trait Extractor: Send + Sync + fmt::Debug {
    /// Expand `archive` under `out_dir`, preserving relative structure and
    /// file modes.
    ///
    /// # Errors
    ///
    /// Returns an [`ExtractError`] classifying the failure.
    fn extract(&self, archive: &Path, out_dir: &Path) -> Result<(), ExtractError>;
}

/// Pick the extractor the settings ask for.
pub fn from_settings(settings: &Settings) -> std::sync::Arc<dyn Extractor> {
    match &settings.external_extractor {
        Some(command) => std::sync::Arc::new(CommandExtractor {
            command: command.clone(),
        }),
        None => std::sync::Arc::new(SevenzExtractor),
    }
}

/// In-process 7z decoder.
#[derive(Debug, Clone, Copy)]
pub struct SevenzExtractor;

impl Extractor for SevenzExtractor {
    fn extract(&self, archive: &Path, out_dir: &Path) -> Result<(), ExtractError> {
        std::fs::create_dir_all(out_dir).map_err(|source| ExtractError::Io {
            path: archive.to_path_buf(),
            source,
        })?;
        debug!(archive = %archive.display(), out = %out_dir.display(), "extracting in-process");
        sevenz_rust::decompress_file(archive, out_dir).map_err(|e| classify_message(archive, &e.to_string()))
    }
}

/// Out-of-process extractor: `{command} x -y -o{out_dir} {archive}`.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    /// The command to invoke (e.g. `7z`).
    pub command: String,
}

impl Extractor for CommandExtractor {
    fn extract(&self, archive: &Path, out_dir: &Path) -> Result<(), ExtractError> {
        if which::which(&self.command).is_err() {
            return Err(ExtractError::ToolMissing {
                command: self.command.clone(),
            });
        }
        std::fs::create_dir_all(out_dir).map_err(|source| ExtractError::Io {
            path: archive.to_path_buf(),
            source,
        })?;

        debug!(
            archive = %archive.display(),
            out = %out_dir.display(),
            command = self.command.as_str(),
            "extracting via external command"
        );
        let output = Command::new(&self.command)
            .arg("x")
            .arg("-y")
            .arg(format!("-o{}", out_dir.display()))
            .arg(archive)
            .output()
            .map_err(|source| ExtractError::Io {
                path: archive.to_path_buf(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(classify_message(archive, &stderr))
        }
    }
}

fn classify_message(archive: &Path, message: &str) -> ExtractError {
    let lowered = message.to_lowercase();
    if lowered.contains("no space") {
        ExtractError::DiskFull {
            path: archive.to_path_buf(),
        }
    } else if lowered.contains("permission denied") {
        ExtractError::PermissionDenied {
            path: archive.to_path_buf(),
        }
    } else {
        ExtractError::CorruptArchive {
            path: archive.to_path_buf(),
            message: message.trim().to_string(),
        }
    }
}
