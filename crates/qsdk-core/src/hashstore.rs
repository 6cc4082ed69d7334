//! Authoritative digests, fetched only from trusted mirrors.
//!
//! Archive bytes may come from any mirror, but their digests must come from a
//! trusted one -- this separation is what stops a hostile mirror substituting
//! content. Records are cached for the run, and concurrent requests for the
//! same archive coalesce into a single fetch.

use std::collections::HashMap;
use std::sync::Arc;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use qsdk_schema::{Checksum, HashAlgorithm};

use crate::error::InstallError;
use crate::http::HttpClient;
use crate::mirrors::join_url;
use crate::settings::Settings;

/// Streaming digest over the configured algorithm.
#[derive(Debug)]
pub(crate) enum Hasher {
    /// SHA-256 state.
    Sha256(Sha256),
    /// SHA-1 state.
    Sha1(Sha1),
    /// MD5 state.
    Md5(Md5),
}

impl Hasher {
    pub(crate) fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    pub(crate) fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hash a byte slice with the given algorithm.
pub(crate) fn digest_bytes(algorithm: HashAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finalize_hex()
}

/// Per-run cache of authoritative digests.
#[derive(Debug)]
pub struct HashStore {
    client: Arc<HttpClient>,
    trusted: Vec<String>,
    base_url: String,
    algorithm: HashAlgorithm,
    max_retries: u32,
    cache: Mutex<HashMap<String, Arc<OnceCell<Checksum>>>>,
}

impl HashStore {
    /// Build a store over the trusted mirror list.
    pub fn new(settings: &Settings, client: Arc<HttpClient>) -> Self {
        Self {
            client,
            trusted: settings.trusted_mirrors.clone(),
            base_url: settings.base_url.clone(),
            algorithm: settings.hash_algorithm,
            max_retries: settings.max_retries_to_retrieve_hash,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The algorithm digests are fetched for.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Obtain the authoritative digest for an archive URL.
    ///
    /// The sidecar (`<archive>.sha256`) is requested from trusted mirrors
    /// only, up to `max_retries_to_retrieve_hash` attempts across them.
    /// Results are cached; concurrent calls for one URL share a single fetch.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::HashUnavailable`] when no trusted mirror
    /// served a well-formed digest within the attempt budget.
    pub async fn digest(&self, archive_url: &str) -> Result<Checksum, InstallError> {
        let cell = {
            let mut cache = self.cache.lock().await;
            cache
                .entry(archive_url.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        cell.get_or_try_init(|| self.fetch_digest(archive_url))
            .await
            .cloned()
    }

    async fn fetch_digest(&self, archive_url: &str) -> Result<Checksum, InstallError> {
        let rel = self.relative_path(archive_url);
        let sidecar_rel = format!("{rel}.{}", self.algorithm.ext());

        let candidates: Vec<String> = self
            .trusted
            .iter()
            .map(|base| join_url(base, &sidecar_rel))
            .collect();

        if candidates.is_empty() {
            return Err(InstallError::HashUnavailable { url: sidecar_rel });
        }

        for attempt in 0..self.max_retries.max(1) {
            let candidate = &candidates[attempt as usize % candidates.len()];
            match self.client.get_text(candidate).await {
                Ok(body) => {
                    // Sidecars read `<hex>  <filename>`; only the digest counts.
                    let token = body.split_whitespace().next().unwrap_or("");
                    match Checksum::parse(self.algorithm, token) {
                        Ok(sum) => {
                            debug!(url = candidate.as_str(), "digest obtained");
                            return Ok(sum);
                        }
                        Err(e) => {
                            warn!(url = candidate.as_str(), error = %e, "malformed digest from trusted mirror");
                        }
                    }
                }
                Err(e) => {
                    warn!(url = candidate.as_str(), error = %e, "trusted mirror failed to serve digest");
                }
            }
        }

        Err(InstallError::HashUnavailable { url: sidecar_rel })
    }

    /// Repository-relative path of an archive URL, so the sidecar can be
    /// requested from a different (trusted) base.
    fn relative_path(&self, archive_url: &str) -> String {
        if let Some(rest) = archive_url.strip_prefix(&self.base_url) {
            return rest.trim_start_matches('/').to_string();
        }
        if let Ok(parsed) = url::Url::parse(archive_url) {
            return parsed.path().trim_start_matches('/').to_string();
        }
        archive_url.trim_start_matches('/').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn sha256_of(data: &[u8]) -> String {
        digest_bytes(HashAlgorithm::Sha256, data)
    }

    fn store_with(settings: &Settings) -> HashStore {
        let client = Arc::new(HttpClient::new(settings).unwrap());
        HashStore::new(settings, client)
    }

    #[test]
    fn hasher_matches_known_vectors() {
        assert_eq!(
            sha256_of(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            digest_bytes(HashAlgorithm::Md5, b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            digest_bytes(HashAlgorithm::Sha1, b"hello world"),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[tokio::test]
    async fn digest_only_from_trusted_mirror() {
        let mut trusted = Server::new_async().await;
        let mut untrusted = Server::new_async().await;

        let digest = "a".repeat(64);
        let _t = trusted
            .mock("GET", "/online/repo/qtbase.7z.sha256")
            .with_status(200)
            .with_body(format!("{digest}  qtbase.7z"))
            .create_async()
            .await;
        let never = untrusted
            .mock("GET", "/online/repo/qtbase.7z.sha256")
            .expect(0)
            .create_async()
            .await;

        let settings = Settings {
            base_url: untrusted.url(),
            trusted_mirrors: vec![trusted.url()],
            retry_backoff: 0.01,
            ..Settings::default()
        };
        let store = store_with(&settings);

        let sum = store
            .digest(&format!("{}/online/repo/qtbase.7z", untrusted.url()))
            .await
            .unwrap();
        assert_eq!(sum.as_str(), digest);
        never.assert_async().await;
    }

    #[tokio::test]
    async fn digest_is_cached_per_run() {
        let mut trusted = Server::new_async().await;
        let digest = "b".repeat(64);
        let m = trusted
            .mock("GET", "/x.7z.sha256")
            .with_status(200)
            .with_body(digest.clone())
            .expect(1)
            .create_async()
            .await;

        let settings = Settings {
            base_url: trusted.url(),
            trusted_mirrors: vec![trusted.url()],
            retry_backoff: 0.01,
            ..Settings::default()
        };
        let store = store_with(&settings);
        let url = format!("{}/x.7z", trusted.url());

        let first = store.digest(&url).await.unwrap();
        let second = store.digest(&url).await.unwrap();
        assert_eq!(first, second);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn malformed_digest_exhausts_to_hash_unavailable() {
        let mut trusted = Server::new_async().await;
        let _m = trusted
            .mock("GET", "/x.7z.sha256")
            .with_status(200)
            .with_body("not-a-digest")
            .create_async()
            .await;

        let settings = Settings {
            base_url: trusted.url(),
            trusted_mirrors: vec![trusted.url()],
            max_retries_to_retrieve_hash: 2,
            retry_backoff: 0.01,
            ..Settings::default()
        };
        let store = store_with(&settings);
        let err = store
            .digest(&format!("{}/x.7z", trusted.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::HashUnavailable { .. }));
    }

    #[tokio::test]
    async fn falls_through_to_second_trusted_mirror() {
        let mut dead = Server::new_async().await;
        let mut live = Server::new_async().await;
        let digest = "c".repeat(64);

        let _d = dead
            .mock("GET", "/x.7z.sha256")
            .with_status(503)
            .create_async()
            .await;
        let _l = live
            .mock("GET", "/x.7z.sha256")
            .with_status(200)
            .with_body(digest.clone())
            .create_async()
            .await;

        let settings = Settings {
            base_url: dead.url(),
            trusted_mirrors: vec![dead.url(), live.url()],
            max_retries_on_connection_error: 0,
            max_retries_to_retrieve_hash: 4,
            retry_backoff: 0.01,
            ..Settings::default()
        };
        let store = store_with(&settings);
        let sum = store
            .digest(&format!("{}/x.7z", dead.url()))
            .await
            .unwrap();
        assert_eq!(sum.as_str(), digest);
    }
}
