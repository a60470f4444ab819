//! Attachment upload pipeline
//!
//! Validates a local file, posts it as one multipart transfer and maps the
//! server's answer onto user-facing categories. The authoritative refresh
//! after a successful upload is driven by the sync engine.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transfer::TransferController;
use crate::validate::{validate, AttachmentKind, FileCandidate, RejectReason};
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::{debug, info};
use url::Url;

/// User-facing upload failure categories
#[derive(Debug, ThisError)]
pub enum UploadError {
    /// Refused locally or by the server's own file checks; nothing to retry
    #[error("attachment rejected: {0}")]
    Rejected(RejectReason),

    /// The session token is no longer valid; re-authentication required
    #[error("session is no longer valid")]
    SessionInvalid,

    /// The account is not yet cleared to chat
    #[error("chat access pending approval")]
    AccessPending,

    /// Transient server fault; the user may retry later
    #[error("server error, try again later")]
    Server,

    /// Timeout or connection failure; retry is a fresh user action
    #[error("connection problem, try again")]
    Connectivity,

    #[error(transparent)]
    Other(Error),
}

/// One validated multipart upload per user action
pub struct UploadPipeline {
    controller: TransferController,
    base: Url,
    token: Option<String>,
    deadline: Duration,
}

impl UploadPipeline {
    pub fn new(config: &Config) -> Result<Self> {
        let base = crate::api::parse_base(&config.base_url)?;
        Ok(Self {
            controller: TransferController::new(),
            base,
            token: config.auth_token.clone(),
            deadline: config.file_deadline,
        })
    }

    /// Validate `path` and post it to the conversation.
    ///
    /// A local reject returns before any network traffic. Concurrent
    /// uploads are not coalesced; the caller keeps its trigger disabled
    /// while one is in flight.
    pub async fn upload(
        &self,
        conversation_id: &str,
        path: &Path,
        mime: Option<&str>,
    ) -> std::result::Result<AttachmentKind, UploadError> {
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::Other(e.into()))?
            .len();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let kind = validate(&FileCandidate {
            extension,
            mime,
            size_bytes,
        })
        .map_err(UploadError::Rejected)?;

        debug!(
            file = %path.display(),
            size_bytes,
            ?kind,
            "attachment passed validation, uploading"
        );

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::Other(e.into()))?;

        // mime is present here, validation rejects candidates without one
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime.unwrap_or("application/octet-stream"))
            .map_err(|e| UploadError::Other(Error::Network(e.to_string())))?;

        let mut form = Form::new()
            .part("files", part)
            .text("conversationId", conversation_id.to_string());
        if kind == AttachmentKind::Image {
            form = form.text("isImage", "true");
        }

        let url = self
            .base
            .join("attachments")
            .map_err(|e| UploadError::Other(Error::InvalidUrl(e.to_string())))?;
        let mut request = self.controller.client().post(url).multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match self.controller.run(request, self.deadline, None).await {
            Ok(_) => {
                info!(conversation = conversation_id, "attachment uploaded");
                Ok(kind)
            }
            Err(err) => Err(classify_upload_failure(err)),
        }
    }
}

/// Fold a transfer failure into the category shown to the user.
///
/// The server's own file checks land in the same bucket as the local
/// validator so a single surface handles both.
fn classify_upload_failure(err: Error) -> UploadError {
    if err.is_session_invalid() {
        return UploadError::SessionInvalid;
    }
    if err.is_access_pending() {
        return UploadError::AccessPending;
    }
    match err.server_code() {
        Some("INVALID_FILE_TYPE") => return UploadError::Rejected(RejectReason::FormatUnsupported),
        Some("FILE_TOO_LARGE") => return UploadError::Rejected(RejectReason::FileTooLarge),
        _ => {}
    }
    match err {
        Error::Http { status, .. } if status >= 500 => UploadError::Server,
        Error::Timeout | Error::Network(_) => UploadError::Connectivity,
        other => UploadError::Other(other),
    }
}
