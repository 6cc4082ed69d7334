//! Mirror selection: ordered candidate bases per request.
//!
//! The selector is stateless. For a repository-relative path it yields the
//! configured base URL first, then the fallbacks in order, always skipping
//! blacklisted prefixes. Checksum sidecars never use this list -- the
//! [`crate::hashstore::HashStore`] has its own, trusted-only view.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::http::{HttpClient, HttpError};
use crate::settings::Settings;

/// Join a base URL and a relative path without doubling slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Chooses download bases for repository paths.
#[derive(Debug, Clone)]
pub struct MirrorSelector {
    base_url: String,
    fallbacks: Vec<String>,
    blacklist: Vec<String>,
}

impl MirrorSelector {
    /// Build a selector from settings.
    pub fn new(settings: &Settings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            fallbacks: settings.fallback_mirrors.clone(),
            blacklist: settings.blacklist_mirrors.clone(),
        }
    }

    /// The configured primary base.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn allowed(&self, base: &str) -> bool {
        !self.blacklist.iter().any(|prefix| base.starts_with(prefix))
    }

    /// Ordered absolute candidate URLs for a repository-relative path.
    pub fn candidates(&self, path: &str) -> Vec<String> {
        std::iter::once(&self.base_url)
            .chain(self.fallbacks.iter())
            .filter(|base| self.allowed(base))
            .map(|base| join_url(base, path))
            .collect()
    }

    /// Candidate URLs for an already-absolute URL: the URL itself (when its
    /// base is the configured one, or otherwise verbatim) rebased onto each
    /// allowed mirror.
    pub fn candidates_for_url(&self, url: &str) -> Vec<String> {
        match url.strip_prefix(&self.base_url) {
            Some(rest) => self.candidates(rest),
            None if self.allowed(url) => vec![url.to_string()],
            None => Vec::new(),
        }
    }

    /// Fetch a repository path, trying candidates in order.
    ///
    /// Returns the winning base together with the body so callers can keep
    /// sibling requests on the same mirror if they choose to.
    ///
    /// # Errors
    ///
    /// Returns the last candidate's error, or
    /// [`HttpError::AllMirrorsFailed`] when no candidate exists at all.
    pub async fn fetch(
        &self,
        client: &HttpClient,
        path: &str,
    ) -> Result<(String, Bytes), HttpError> {
        let mut last: Option<HttpError> = None;
        for base in std::iter::once(&self.base_url)
            .chain(self.fallbacks.iter())
            .filter(|b| self.allowed(b))
        {
            let url = join_url(base, path);
            match client.get_bytes(&url).await {
                Ok(bytes) => {
                    debug!(base = base.as_str(), path, "mirror fetch ok");
                    return Ok((base.clone(), bytes));
                }
                Err(e) => {
                    warn!(base = base.as_str(), path, error = %e, "mirror failed, trying next");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| HttpError::AllMirrorsFailed {
            path: path.to_string(),
            message: "no mirrors configured after blacklist".to_string(),
        }))
    }
}
