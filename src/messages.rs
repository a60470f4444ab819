//! Conversation message model
//!
//! Domain types for the chat view, plus the compatibility mapping that
//! collapses the server's legacy role labels into the two roles the client
//! actually distinguishes.

use crate::validate::{AttachmentKind, IMAGE_EXTENSIONS};
use chrono::{DateTime, Utc};

/// Who authored a message, relative to this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    /// The clinic side of the conversation
    Counterparty,
    /// The signed-in patient
    Myself,
}

impl Sender {
    /// Map a wire role label onto the two client-side roles.
    ///
    /// The backend has accumulated several labels over time; anything that
    /// is not recognizably the patient is treated as the counterpart so a
    /// foreign message is never misattributed to the local user.
    pub fn from_wire(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "patient" | "self" | "me" => Sender::Myself,
            _ => Sender::Counterparty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Document,
}

impl From<AttachmentKind> for MessageKind {
    fn from(kind: AttachmentKind) -> Self {
        match kind {
            AttachmentKind::Image => MessageKind::Image,
            AttachmentKind::Document => MessageKind::Document,
        }
    }
}

/// A file carried by a message; owned by exactly one message
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub size_bytes: u64,
    /// Absolute or conversation-relative address of the stored file
    pub url: String,
    pub mime_type: String,
    pub kind: AttachmentKind,
}

/// One message as received from the server; immutable once constructed
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Server-assigned, unique and stable within the conversation
    pub id: String,
    pub sender: Sender,
    pub body: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_from_counterparty(&self) -> bool {
        self.sender == Sender::Counterparty
    }
}

/// Categorize an attachment when the server omits its file type.
///
/// Mime prefix first, extension as fallback, document as the conservative
/// default.
pub fn derive_kind(mime: Option<&str>, name: &str) -> AttachmentKind {
    if let Some(mime) = mime {
        if mime.to_ascii_lowercase().starts_with("image/") {
            return AttachmentKind::Image;
        }
    }
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        AttachmentKind::Image
    } else {
        AttachmentKind::Document
    }
}
