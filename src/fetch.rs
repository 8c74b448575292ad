//! HTTP fetching for signing material and artifact bytes.
//!
//! Provides a trait-based abstraction over plain GET requests so the
//! pipeline can be driven offline in tests, plus the production
//! implementation backed by a shared `ureq` agent.

use std::sync::OnceLock;
use std::time::Duration;

/// Network timeout for all downloads.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single response body. Release artifacts are
/// expected to be binaries, not archives of arbitrary size.
const MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

/// Errors arising from fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// HTTP request failed.
    #[error("fetch failed for {url}: {reason}")]
    Http {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The requested resource was not found (HTTP 404).
    #[error("resource not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// I/O error reading a local override file.
    #[error("I/O error reading local file: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for fetching resources by URL.
///
/// The pipeline only ever needs raw bytes or UTF-8 text; tests inject a
/// mock implementation so no network access is required.
pub trait Fetch {
    /// Fetch the resource at `url` and return its raw bytes.
    fn bytes(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Fetch the resource at `url` and return it as a string.
    fn text(&self, url: &str) -> Result<String, FetchError> {
        let raw = self.bytes(url)?;
        String::from_utf8(raw).map_err(|e| FetchError::Http {
            url: url.to_owned(),
            reason: format!("response is not valid UTF-8: {}", e),
        })
    }
}

/// HTTP-based fetcher using `ureq`.
pub struct HttpFetcher;

impl Fetch for HttpFetcher {
    fn bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = http_agent()
            .get(url)
            .call()
            .map_err(|e| map_ureq_error(url, &e))?;
        response
            .into_body()
            .with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_vec()
            .map_err(|e| FetchError::Http {
                url: url.to_owned(),
                reason: e.to_string(),
            })
    }
}

/// Shared `ureq` agent with request timeout configuration.
pub(crate) fn http_agent() -> &'static ureq::Agent {
    static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(FETCH_TIMEOUT))
            .build();
        ureq::Agent::new_with_config(config)
    })
}

/// Map a ureq error to a [`FetchError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> FetchError {
    match err {
        ureq::Error::StatusCode(404) => FetchError::NotFound {
            url: url.to_owned(),
        },
        other => FetchError::Http {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}
