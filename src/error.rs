//! Error types for careline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("transfer deadline expired")]
    Timeout,

    #[error("transfer cancelled")]
    Cancelled,

    #[error("HTTP {status}: {}", .code.as_deref().unwrap_or("no error code"))]
    Http {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("platform delivery failed: {0}")]
    Delivery(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Server error codes that mean the session token is no longer usable.
const SESSION_CODES: &[&str] = &["bad_token", "missing_token"];

/// Server error codes that mean the account is not yet cleared to chat.
const ACCESS_CODES: &[&str] = &["CHAT_LOCKED", "access_denied"];

impl Error {
    /// True when re-authentication is the only way forward.
    ///
    /// The HTTP status class and the body code carry independent meaning,
    /// so both are checked: any 401 qualifies, as does a recognized
    /// session code on any status.
    pub fn is_session_invalid(&self) -> bool {
        match self {
            Error::Http { status, code, .. } => {
                *status == 401
                    || code
                        .as_deref()
                        .map(|c| SESSION_CODES.contains(&c))
                        .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// True when the account is gated behind clinic approval (403 or a
    /// recognized access code). Session-level problems take precedence.
    pub fn is_access_pending(&self) -> bool {
        if self.is_session_invalid() {
            return false;
        }
        match self {
            Error::Http { status, code, .. } => {
                *status == 403
                    || code
                        .as_deref()
                        .map(|c| ACCESS_CODES.contains(&c))
                        .unwrap_or(false)
            }
            _ => false,
        }
    }

    /// The machine code from the server error envelope, if any.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            Error::Http { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Network(e.to_string())
        }
    }
}
