//! HTTP transport with per-attempt retries.
//!
//! One [`HttpClient`] wraps a single `reqwest::Client` configured from
//! [`Settings`]: connect/response timeouts and a redirect policy that treats
//! the mirror blacklist as authoritative -- a redirect whose `Location` lands
//! on a blacklisted prefix fails the attempt instead of being followed, so
//! the mirror selector can move on to the next base.
//!
//! Transient failures (connect, timeout, 5xx) retry with exponential backoff
//! and jitter up to `max_retries_on_connection_error`; 4xx is terminal.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use qsdk_schema::HashAlgorithm;

use crate::hashstore::Hasher;
use crate::settings::Settings;

/// Transport-level failures, classified so callers can decide on retry.
#[derive(Error, Debug)]
pub enum HttpError {
    /// The client itself could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(reqwest::Error),

    /// Connection-level failure (refused, DNS, TLS).
    #[error("transport error fetching {url}: {message}")]
    Transport {
        /// The request URL.
        url: String,
        /// Underlying detail.
        message: String,
    },

    /// Connect or read timeout.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The request URL.
        url: String,
    },

    /// Non-success HTTP status (after redirects).
    #[error("HTTP {status} fetching {url}")]
    Status {
        /// The request URL.
        url: String,
        /// The status code.
        status: u16,
    },

    /// A redirect was refused (blacklisted target or too many hops).
    #[error("redirect refused fetching {url}: {message}")]
    Redirect {
        /// The request URL.
        url: String,
        /// Why the redirect was refused.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("decode error fetching {url}: {message}")]
    Decode {
        /// The request URL.
        url: String,
        /// Underlying detail.
        message: String,
    },

    /// Local write failure while streaming a download.
    #[error("io error writing download: {0}")]
    Io(#[from] std::io::Error),

    /// Every candidate mirror failed for a path.
    #[error("all mirrors failed for {path}: {message}")]
    AllMirrorsFailed {
        /// The repository-relative path.
        path: String,
        /// The last failure observed.
        message: String,
    },
}

impl HttpError {
    /// Whether another attempt against the same URL may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// A retrying HTTP GET client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    max_retries: u32,
    backoff_base: f64,
}

impl HttpClient {
    /// Build a client from settings. The blacklist is baked into the redirect
    /// policy here; there is no code path that follows a redirect onto a
    /// blacklisted host.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Build`] when the underlying client cannot be
    /// constructed.
    pub fn new(settings: &Settings) -> Result<Self, HttpError> {
        let blacklist = settings.blacklist_mirrors.clone();
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > 5 {
                return attempt.error("too many redirects");
            }
            let target = attempt.url().as_str();
            if blacklist.iter().any(|prefix| target.starts_with(prefix)) {
                return attempt.error("redirect target is blacklisted");
            }
            attempt.follow()
        });

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connection_timeout)
            .timeout(settings.response_timeout)
            .redirect(policy)
            .user_agent(crate::USER_AGENT)
            .build()
            .map_err(HttpError::Build)?;

        Ok(Self {
            client,
            max_retries: settings.max_retries_on_connection_error,
            backoff_base: settings.retry_backoff,
        })
    }

    /// GET a URL into memory.
    ///
    /// # Errors
    ///
    /// Returns the classified [`HttpError`] of the last attempt.
    pub async fn get_bytes(&self, url: &str) -> Result<Bytes, HttpError> {
        let mut attempt = 0;
        loop {
            match self.try_get_bytes(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(url, error = %e, ?delay, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// GET a URL as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns the classified [`HttpError`] of the last attempt, or
    /// [`HttpError::Decode`] for non-UTF-8 bodies.
    pub async fn get_text(&self, url: &str) -> Result<String, HttpError> {
        let bytes = self.get_bytes(url).await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| HttpError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Stream a URL into `dest`, hashing on the fly.
    ///
    /// Returns the byte count and, when an algorithm was requested, the hex
    /// digest of the streamed body. A retry restarts the file from scratch.
    ///
    /// # Errors
    ///
    /// Returns the classified [`HttpError`] of the last attempt.
    pub async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        algorithm: Option<HashAlgorithm>,
    ) -> Result<(u64, Option<String>), HttpError> {
        let mut attempt = 0;
        loop {
            match self.try_download_to(url, dest, algorithm).await {
                Ok(out) => return Ok(out),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(url, error = %e, ?delay, "transient failure, retrying download");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_get_bytes(&self, url: &str) -> Result<Bytes, HttpError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, &e))?;
        let response = check_status(url, response)?;
        response.bytes().await.map_err(|e| classify(url, &e))
    }

    async fn try_download_to(
        &self,
        url: &str,
        dest: &Path,
        algorithm: Option<HashAlgorithm>,
    ) -> Result<(u64, Option<String>), HttpError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, &e))?;
        let response = check_status(url, response)?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut hasher = algorithm.map(Hasher::new);
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| classify(url, &e))?;
            file.write_all(&chunk).await?;
            if let Some(h) = hasher.as_mut() {
                h.update(&chunk);
            }
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url, bytes = written, "download complete");
        Ok((written, hasher.map(Hasher::finalize_hex)))
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.backoff_base * f64::from(1 << attempt.min(16));
        let jitter = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64((base * jitter).clamp(0.0, 120.0))
    }
}

fn check_status(url: &str, response: reqwest::Response) -> Result<reqwest::Response, HttpError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(HttpError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        })
    }
}

fn classify(url: &str, err: &reqwest::Error) -> HttpError {
    let url = url.to_string();
    if err.is_timeout() {
        HttpError::Timeout { url }
    } else if err.is_redirect() {
        HttpError::Redirect {
            url,
            message: err.to_string(),
        }
    } else if err.is_decode() {
        HttpError::Decode {
            url,
            message: err.to_string(),
        }
    } else if let Some(status) = err.status() {
        HttpError::Status {
            url,
            status: status.as_u16(),
        }
    } else {
        HttpError::Transport {
            url,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn client_for(settings: &Settings) -> HttpClient {
        HttpClient::new(settings).unwrap()
    }

    fn fast_settings() -> Settings {
        Settings {
            retry_backoff: 0.01,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn get_bytes_ok() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/hello")
            .with_status(200)
            .with_body("payload")
            .create_async()
            .await;

        let client = client_for(&fast_settings());
        let body = client
            .get_bytes(&format!("{}/hello", server.url()))
            .await
            .unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn status_4xx_is_terminal() {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&fast_settings());
        let err = client
            .get_bytes(&format!("{}/missing", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 404, .. }));
        assert!(!err.is_transient());
        m.assert_async().await;
    }

    #[tokio::test]
    async fn status_5xx_is_retried_up_to_the_budget() {
        let mut server = Server::new_async().await;
        let flaky = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(3) // initial attempt + two retries
            .create_async()
            .await;

        let settings = Settings {
            max_retries_on_connection_error: 2,
            retry_backoff: 0.01,
            ..Settings::default()
        };
        let client = client_for(&settings);
        let err = client
            .get_bytes(&format!("{}/flaky", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 503, .. }));
        assert!(err.is_transient());
        flaky.assert_async().await;
    }

    #[tokio::test]
    async fn redirect_to_blacklisted_host_fails() {
        let mut evil = Server::new_async().await;
        let never = evil
            .mock("GET", "/payload")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let mut server = Server::new_async().await;
        let _redir = server
            .mock("GET", "/archive")
            .with_status(302)
            .with_header("location", &format!("{}/payload", evil.url()))
            .create_async()
            .await;

        let settings = Settings {
            blacklist_mirrors: vec![evil.url()],
            ..fast_settings()
        };
        let client = client_for(&settings);
        let err = client
            .get_bytes(&format!("{}/archive", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Redirect { .. }));
        never.assert_async().await;
    }

    #[tokio::test]
    async fn download_streams_and_hashes() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/blob")
            .with_status(200)
            .with_body("hello world")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("blob.bin");
        let client = client_for(&fast_settings());
        let (size, digest) = client
            .download_to(
                &format!("{}/blob", server.url()),
                &dest,
                Some(HashAlgorithm::Sha256),
            )
            .await
            .unwrap();

        assert_eq!(size, 11);
        assert_eq!(
            digest.as_deref(),
            // sha256("hello world")
            Some("b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9")
        );
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
    }
}
