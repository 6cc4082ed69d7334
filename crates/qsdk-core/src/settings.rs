//! Process-wide tunables, read once at startup and immutable afterwards.
//!
//! There is deliberately no global instance: components receive a
//! [`Settings`] (usually behind an `Arc`) through their constructors, and
//! test suites build a fresh value per test.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use qsdk_schema::HashAlgorithm;

/// The upstream origin. Also the default (and only default-trusted) mirror.
pub const UPSTREAM_BASE_URL: &str = "https://download.qt.io";

/// Errors from loading the settings file.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("cannot read settings file {path}: {source}")]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying io error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or has mistyped keys.
    #[error("malformed settings file {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },
}

/// Immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Archives processed in parallel.
    pub concurrency: usize,
    /// TCP connect timeout per HTTP attempt.
    pub connection_timeout: Duration,
    /// Whole-response timeout per HTTP attempt.
    pub response_timeout: Duration,
    /// Transient-failure retries per HTTP operation, and the mirror budget
    /// for transport failures in the pipeline.
    pub max_retries_on_connection_error: u32,
    /// Mirror budget for digest mismatches per archive.
    pub max_retries_on_checksum_error: u32,
    /// Attempts across trusted mirrors to obtain one digest.
    pub max_retries_to_retrieve_hash: u32,
    /// Base of the exponential retry backoff, in seconds.
    pub retry_backoff: f64,
    /// Digest algorithm for sidecar files.
    pub hash_algorithm: HashAlgorithm,
    /// Skip digest verification entirely. Only honored from the settings
    /// file; the CLI defines no flag for it, and the key name is long and
    /// alarming on purpose.
    pub insecure_not_for_production_ignore_hash: bool,
    /// Primary download base URL.
    pub base_url: String,
    /// Out-of-process extractor command; `None` selects the in-process one.
    pub external_extractor: Option<String>,
    /// Mirrors authorized to serve digests. Order matters.
    pub trusted_mirrors: Vec<String>,
    /// URL prefixes never to download from, redirects included.
    pub blacklist_mirrors: Vec<String>,
    /// Mirrors tried for archive bytes after `base_url`. Order matters.
    pub fallback_mirrors: Vec<String>,
    /// Keep verified archives instead of deleting after extraction.
    pub always_keep_archives: bool,
    /// Where staged archives are written; `None` means a temp dir per run.
    pub archive_download_location: Option<PathBuf>,
    /// `modules=all` excludes packages whose uncompressed size is below this
    /// (placeholder packages in the upstream repo).
    pub min_module_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            connection_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(30),
            max_retries_on_connection_error: 3,
            max_retries_on_checksum_error: 2,
            max_retries_to_retrieve_hash: 5,
            retry_backoff: 2.0,
            hash_algorithm: HashAlgorithm::Sha256,
            insecure_not_for_production_ignore_hash: false,
            base_url: UPSTREAM_BASE_URL.to_string(),
            external_extractor: None,
            trusted_mirrors: vec![UPSTREAM_BASE_URL.to_string()],
            blacklist_mirrors: Vec::new(),
            fallback_mirrors: Vec::new(),
            always_keep_archives: false,
            archive_download_location: None,
            min_module_size: 41,
        }
    }
}

impl Settings {
    /// Load settings from the user's file, falling back to defaults for the
    /// whole file or any missing key.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when the file exists but cannot be read or
    /// parsed. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: SettingsFile = toml::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(file.into_settings())
    }
}

/// On-disk shape: sections `[aqt]`, `[requests]`, `[mirrors]`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsFile {
    #[serde(default)]
    aqt: AqtSection,
    #[serde(default)]
    requests: RequestsSection,
    #[serde(default)]
    mirrors: MirrorsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AqtSection {
    concurrency: Option<usize>,
    always_keep_archives: Option<bool>,
    archive_download_location: Option<PathBuf>,
    min_module_size: Option<u64>,
    external_extractor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequestsSection {
    connection_timeout: Option<f64>,
    response_timeout: Option<f64>,
    max_retries_on_connection_error: Option<u32>,
    max_retries_on_checksum_error: Option<u32>,
    max_retries_to_retrieve_hash: Option<u32>,
    retry_backoff: Option<f64>,
    hash_algorithm: Option<HashAlgorithm>,
    #[serde(rename = "INSECURE_NOT_FOR_PRODUCTION_ignore_hash")]
    insecure_not_for_production_ignore_hash: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MirrorsSection {
    base_url: Option<String>,
    trusted: Option<Vec<String>>,
    fallback: Option<Vec<String>>,
    blacklist: Option<Vec<String>>,
}

impl SettingsFile {
    fn into_settings(self) -> Settings {
        let mut s = Settings::default();
        let SettingsFile {
            aqt,
            requests,
            mirrors,
        } = self;

        if let Some(v) = aqt.concurrency {
            s.concurrency = v.max(1);
        }
        if let Some(v) = aqt.always_keep_archives {
            s.always_keep_archives = v;
        }
        if let Some(v) = aqt.archive_download_location {
            s.archive_download_location = Some(v);
        }
        if let Some(v) = aqt.min_module_size {
            s.min_module_size = v;
        }
        if let Some(v) = aqt.external_extractor {
            s.external_extractor = Some(v);
        }

        if let Some(v) = requests.connection_timeout {
            s.connection_timeout = Duration::from_secs_f64(v);
        }
        if let Some(v) = requests.response_timeout {
            s.response_timeout = Duration::from_secs_f64(v);
        }
        if let Some(v) = requests.max_retries_on_connection_error {
            s.max_retries_on_connection_error = v;
        }
        if let Some(v) = requests.max_retries_on_checksum_error {
            s.max_retries_on_checksum_error = v;
        }
        if let Some(v) = requests.max_retries_to_retrieve_hash {
            s.max_retries_to_retrieve_hash = v;
        }
        if let Some(v) = requests.retry_backoff {
            s.retry_backoff = v;
        }
        if let Some(v) = requests.hash_algorithm {
            s.hash_algorithm = v;
        }
        if let Some(v) = requests.insecure_not_for_production_ignore_hash {
            s.insecure_not_for_production_ignore_hash = v;
        }

        if let Some(v) = mirrors.base_url {
            s.base_url = v;
        }
        // Trusted mirrors default to the upstream origin; overriding them is
        // a security decision the user makes explicitly in the file.
        if let Some(v) = mirrors.trusted {
            s.trusted_mirrors = v;
        }
        if let Some(v) = mirrors.fallback {
            s.fallback_mirrors = v;
        }
        if let Some(v) = mirrors.blacklist {
            s.blacklist_mirrors = v;
        }

        s
    }
}
