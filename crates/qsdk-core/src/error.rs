//! The single error sum type of the install engine.
//!
//! Every component failure converges here so callers decide retry/abort by
//! pattern match rather than by catching classes. Variants carry enough
//! identity (archive, mirror, suggestions) to produce actionable messages.

use qsdk_schema::hash::ChecksumError;
use qsdk_schema::target::{Target, TargetError};
use qsdk_schema::version::VersionError;
use qsdk_schema::Version;
use thiserror::Error;

use crate::extract::ExtractError;
use crate::http::HttpError;
use crate::patcher::PatchError;
use crate::settings::SettingsError;

/// Coarse failure classes, used by the CLI for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or contradictory user input.
    Input,
    /// Transport, DNS, timeout, or HTTP status failure.
    Network,
    /// Digest mismatch or no trusted digest available.
    Checksum,
    /// Archive expansion failure.
    Extract,
    /// Post-install patching failure.
    Patch,
    /// User-requested abort.
    Cancelled,
}

/// Top-level error of all install operations.
#[derive(Error, Debug)]
pub enum InstallError {
    /// No available version satisfied the specifier.
    #[error("no Qt version matches '{spec}' (found: {})", format_list(.available))]
    NoVersion {
        /// The requested specifier.
        spec: String,
        /// The versions that were available.
        available: Vec<String>,
    },

    /// The folder layout needs an arch qualifier that was not given.
    #[error(
        "an architecture is required for {target} Qt {version}; accepted: {}",
        format_list(.available)
    )]
    ArchRequired {
        /// The requested target.
        target: Target,
        /// The resolved version.
        version: Version,
        /// Arches the repository publishes for this folder.
        available: Vec<String>,
    },

    /// A requested module short name does not exist for this target/version.
    #[error("module '{requested}' not found; available: {}", format_list(.available))]
    NoModule {
        /// The short name the user asked for.
        requested: String,
        /// Module short names the descriptor offers.
        available: Vec<String>,
    },

    /// The folder's descriptor has no base package for the requested arch.
    #[error("no package for arch '{arch}' in {folder}; available: {}", format_list(.available))]
    NoPackage {
        /// The remote folder consulted.
        folder: String,
        /// The requested arch.
        arch: String,
        /// Arches the descriptor does offer.
        available: Vec<String>,
    },

    /// A requested tool variant does not exist.
    #[error("tool variant '{requested}' not found; available: {}", format_list(.available))]
    NoToolVariant {
        /// The variant the user asked for.
        requested: String,
        /// Variants the tool folder offers.
        available: Vec<String>,
    },

    /// Invalid host/target combination or folder derivation failure.
    #[error(transparent)]
    Target(#[from] TargetError),

    /// The settings file could not be read or parsed.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Malformed version or specifier input.
    #[error(transparent)]
    Version(#[from] VersionError),

    /// Transport-level failure after retries and mirror fallback.
    #[error(transparent)]
    Network(#[from] HttpError),

    /// Downloaded bytes did not match the trusted digest.
    #[error("checksum mismatch for {archive} (last mirror: {mirror})")]
    Checksum {
        /// Identity of the failing archive.
        archive: String,
        /// The last mirror bytes were fetched from.
        mirror: String,
    },

    /// No trusted mirror served a digest.
    #[error("no trusted mirror served a digest for {url}")]
    HashUnavailable {
        /// Sidecar URL that was requested.
        url: String,
    },

    /// A digest string from a trusted mirror was malformed.
    #[error(transparent)]
    BadDigest(#[from] ChecksumError),

    /// `Updates.xml` could not be parsed.
    #[error("malformed Updates.xml at {folder} (line {line}, column {column}): {message}")]
    UpdatesParse {
        /// The folder whose descriptor failed.
        folder: String,
        /// 1-based line of the failure.
        line: usize,
        /// 1-based column of the failure.
        column: usize,
        /// Parser detail.
        message: String,
    },

    /// Archive expansion failed.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Post-install patching failed.
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Filesystem failure outside extraction.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was aborted.
    #[error("operation cancelled")]
    Cancelled,
}

impl InstallError {
    /// Classify for exit-code mapping.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NoVersion { .. }
            | Self::ArchRequired { .. }
            | Self::NoModule { .. }
            | Self::NoPackage { .. }
            | Self::NoToolVariant { .. }
            | Self::Target(_)
            | Self::Settings(_)
            | Self::Version(_)
            | Self::UpdatesParse { .. } => ErrorClass::Input,
            Self::Network(_) | Self::Io(_) => ErrorClass::Network,
            Self::Checksum { .. } | Self::HashUnavailable { .. } | Self::BadDigest(_) => {
                ErrorClass::Checksum
            }
            Self::Extract(_) => ErrorClass::Extract,
            Self::Patch(_) => ErrorClass::Patch,
            Self::Cancelled => ErrorClass::Cancelled,
        }
    }
}

fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        "none".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_mapping() {
        let err = InstallError::NoModule {
            requested: "qtcharts".into(),
            available: vec![],
        };
        assert_eq!(err.class(), ErrorClass::Input);
        assert_eq!(InstallError::Cancelled.class(), ErrorClass::Cancelled);
    }

    #[test]
    fn suggestions_render_in_message() {
        let err = InstallError::NoModule {
            requested: "qtchart".into(),
            available: vec!["qtcharts".into(), "qtnetworkauth".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("qtcharts"));
        assert!(msg.contains("qtnetworkauth"));
    }
}
