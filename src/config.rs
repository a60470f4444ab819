//! Configuration and tunables

use std::path::PathBuf;
use std::time::Duration;

/// All configurable endpoints, deadlines and cadences
#[derive(Debug, Clone)]
pub struct Config {
    /// Base address of the clinic API, e.g. `https://api.clinic.example`
    pub base_url: String,
    /// Bearer token for authenticated calls; `None` sends no header
    pub auth_token: Option<String>,
    /// Where retrieved attachments are written before open/share
    pub download_dir: PathBuf,
    /// Cadence of the conversation poll loop
    pub poll_interval: Duration,
    /// Hard deadline for file uploads
    pub file_deadline: Duration,
    /// Hard deadline for metadata calls (poll, send)
    pub metadata_deadline: Duration,
    /// Hard deadline for attachment downloads
    pub download_deadline: Duration,
    /// Attempt cap for the retrieval retry loop
    pub max_open_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        let download_dir = std::env::var("CARELINE_DOWNLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::cache_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("careline/attachments")
            });

        Self {
            base_url: std::env::var("CARELINE_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            auth_token: std::env::var("CARELINE_TOKEN").ok(),
            download_dir,
            poll_interval: Duration::from_millis(POLL_INTERVAL_MS),
            file_deadline: Duration::from_secs(FILE_DEADLINE_SECS),
            metadata_deadline: Duration::from_secs(METADATA_DEADLINE_SECS),
            download_deadline: Duration::from_secs(DOWNLOAD_DEADLINE_SECS),
            max_open_attempts: 3,
        }
    }
}

impl Config {
    /// Create config for testing with sandboxed paths and short deadlines
    pub fn for_test(temp_dir: &std::path::Path) -> Self {
        Self {
            base_url: "http://127.0.0.1:9".to_string(),
            auth_token: None,
            download_dir: temp_dir.join("attachments"),
            poll_interval: Duration::from_millis(10),
            file_deadline: Duration::from_millis(500),
            metadata_deadline: Duration::from_millis(500),
            download_deadline: Duration::from_millis(500),
            max_open_attempts: 3,
        }
    }
}

/// Poll cadence while a conversation screen is active
pub const POLL_INTERVAL_MS: u64 = 2_500;

/// Hard deadline for moving a file in either direction
pub const FILE_DEADLINE_SECS: u64 = 60;

/// Hard deadline for list fetches and text sends
pub const METADATA_DEADLINE_SECS: u64 = 30;

/// Hard deadline for fetching an attachment before open/share
pub const DOWNLOAD_DEADLINE_SECS: u64 = 30;
