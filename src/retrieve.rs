//! Attachment retrieval pipeline
//!
//! Brings a received attachment onto the device: normalize the stored URL,
//! download under an explicit deadline race, land the bytes under a
//! collision-resistant local name, then hand the copy to the platform's
//! open/share facility. Failures classify into a small set of user-facing
//! categories and retries re-run the whole sequence from scratch.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::platform::PlatformDelivery;
use crate::transfer::TransferController;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::RegexSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error as ThisError;
use tokio::time;
use tracing::{debug, warn};
use url::Url;

/// Hosts that indicate a URL was generated in the backend's own network
/// context and must be rewritten to the configured base address.
const DEV_HOSTS: &[&str] = &["localhost", "127.0.0.1", "0.0.0.0", "10.0.2.2"];

/// User-facing category of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    Network,
    NotFound,
    Auth,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::Timeout => write!(f, "timed out"),
            FailureClass::Network => write!(f, "connection problem"),
            FailureClass::NotFound => write!(f, "file no longer available"),
            FailureClass::Auth => write!(f, "not authorized"),
        }
    }
}

#[derive(Debug, ThisError)]
#[error("attachment fetch failed ({class}) after {attempts} attempt(s)")]
pub struct RetrievalError {
    pub class: FailureClass,
    pub attempts: u32,
    #[source]
    pub source: Error,
}

static TIMEOUT_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([r"(?i)timed?\s?out", r"(?i)deadline"]).expect("invalid timeout regex")
});

static NOT_FOUND_PATTERNS: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new([r"(?i)not\s?found", r"\b404\b"]).expect("invalid not-found regex"));

static AUTH_PATTERNS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([r"(?i)unauthorized", r"(?i)forbidden", r"(?i)token"])
        .expect("invalid auth regex")
});

/// Fold a transfer failure into the category offered with the retry action
pub fn classify_fetch_failure(err: &Error) -> FailureClass {
    match err {
        Error::Timeout | Error::Cancelled => FailureClass::Timeout,
        Error::Http { status: 404, .. } => FailureClass::NotFound,
        Error::Http {
            status: 408 | 504, ..
        } => FailureClass::Timeout,
        e if e.is_session_invalid() || e.is_access_pending() => FailureClass::Auth,
        Error::Network(message) => {
            if TIMEOUT_PATTERNS.is_match(message) {
                FailureClass::Timeout
            } else if NOT_FOUND_PATTERNS.is_match(message) {
                FailureClass::NotFound
            } else if AUTH_PATTERNS.is_match(message) {
                FailureClass::Auth
            } else {
                FailureClass::Network
            }
        }
        _ => FailureClass::Network,
    }
}

/// Downloads an attachment and delivers it through the platform seam
pub struct RetrievalPipeline<D: PlatformDelivery> {
    controller: TransferController,
    base: Url,
    token: Option<String>,
    download_dir: PathBuf,
    deadline: Duration,
    delivery: D,
}

impl<D: PlatformDelivery> RetrievalPipeline<D> {
    pub fn new(config: &Config, delivery: D) -> Result<Self> {
        let base = crate::api::parse_base(&config.base_url)?;
        Ok(Self {
            controller: TransferController::new(),
            base,
            token: config.auth_token.clone(),
            download_dir: config.download_dir.clone(),
            deadline: config.download_deadline,
            delivery,
        })
    }

    /// Fetch `raw_url` to local storage, retrying up to `attempts` times.
    ///
    /// Every attempt restarts from URL normalization with the same
    /// arguments; nothing carries over between attempts.
    pub async fn download(
        &self,
        raw_url: &str,
        filename: &str,
        attempts: u32,
    ) -> std::result::Result<PathBuf, RetrievalError> {
        let attempts = attempts.max(1);
        let mut source = match self.fetch_attempt(raw_url, filename).await {
            Ok(path) => return Ok(path),
            Err(err) => err,
        };
        for attempt in 2..=attempts {
            warn!(attempt, attempts, error = %source, "attachment fetch failed, retrying");
            match self.fetch_attempt(raw_url, filename).await {
                Ok(path) => return Ok(path),
                Err(err) => source = err,
            }
        }
        Err(RetrievalError {
            class: classify_fetch_failure(&source),
            attempts,
            source,
        })
    }

    /// Hand a downloaded copy to the platform's open/share facility.
    ///
    /// Images and documents take the same path; in-place remote viewing is
    /// not attempted.
    pub fn share(&self, path: &Path, mime: &str) -> Result<()> {
        self.delivery.share(path, mime)
    }

    async fn fetch_attempt(&self, raw_url: &str, filename: &str) -> Result<PathBuf> {
        let url = self.normalize_url(raw_url)?;
        debug!(url = %url, "fetching attachment");

        let mut request = self.controller.client().get(url.clone());
        // the bearer token belongs to our backend only
        if let (Some(token), true) = (&self.token, url.host_str() == self.base.host_str()) {
            request = request.bearer_auth(token);
        }

        // race the whole transfer against the deadline so a transport hang
        // can never stall the caller
        let payload = match time::timeout(
            self.deadline,
            self.controller.run(request, self.deadline, None),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout),
        };

        std::fs::create_dir_all(&self.download_dir)?;
        let target = self.download_dir.join(local_name(filename));
        let mut temp = NamedTempFile::new_in(&self.download_dir)?;
        temp.write_all(&payload.body)?;
        temp.persist(&target).map_err(|e| Error::Io(e.error))?;

        Ok(target)
    }

    /// Resolve a stored attachment URL against the configured base address
    fn normalize_url(&self, raw: &str) -> Result<Url> {
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base
                .join(raw)
                .map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?,
            Err(e) => return Err(Error::InvalidUrl(format!("{}: {}", raw, e))),
        };

        // URLs minted inside the backend's network carry its loopback host
        if let Some(host) = url.host_str() {
            if DEV_HOSTS.contains(&host) && url.host_str() != self.base.host_str() {
                let mut rewritten = self.base.clone();
                rewritten.set_path(url.path());
                rewritten.set_query(url.query());
                return Ok(rewritten);
            }
        }
        Ok(url)
    }
}

/// Local names carry a timestamp and a sequence number so repeated or
/// concurrent opens of identically named attachments never overwrite each
/// other.
fn local_name(filename: &str) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let millis = Utc::now().timestamp_millis();
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);

    let filename = if filename.is_empty() {
        "attachment"
    } else {
        filename
    };
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            format!("{}-{}-{}.{}", stem, millis, seq, ext)
        }
        _ => format!("{}-{}-{}", filename, millis, seq),
    }
}
