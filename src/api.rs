//! Clinic conversation API
//!
//! Wire DTOs for the conversation endpoints and the HTTP-backed client.
//! The sync engine talks to the trait so tests can script a server.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::messages::{derive_kind, Attachment, Message, MessageKind, Sender};
use crate::transfer::TransferController;
use crate::validate::AttachmentKind;
use chrono::{DateTime, Utc};
use reqwest::RequestBuilder;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use url::Url;

/// What the engine needs from the conversation backend
#[allow(async_fn_in_trait)]
pub trait ChatApi {
    /// Fetch the canonical, server-ordered message list
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Post one text message
    async fn send_text(&self, conversation_id: &str, text: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct MessageListDto {
    messages: Vec<MessageDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub attachment: Option<AttachmentDto>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDto {
    pub name: String,
    pub size: u64,
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendTextBody<'a> {
    text: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
}

/// Message ids arrive as strings from newer backends and as numbers from
/// older ones; both become the same stable string key.
fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

impl AttachmentDto {
    fn into_attachment(self) -> Attachment {
        let kind = match self.file_type.as_deref() {
            Some(t) if t.eq_ignore_ascii_case("image") => AttachmentKind::Image,
            Some(t) if t.eq_ignore_ascii_case("document") => AttachmentKind::Document,
            _ => derive_kind(self.mime_type.as_deref(), &self.name),
        };
        Attachment {
            kind,
            mime_type: self
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            name: self.name,
            size_bytes: self.size,
            url: self.url,
        }
    }
}

impl MessageDto {
    pub fn into_message(self) -> Message {
        let attachment = self.attachment.map(AttachmentDto::into_attachment);
        let kind = match self.kind.as_deref() {
            Some("text") => MessageKind::Text,
            Some("image") => MessageKind::Image,
            Some("document") | Some("file") => MessageKind::Document,
            // unlabelled: infer from the attachment, text otherwise
            _ => attachment
                .as_ref()
                .map(|a| a.kind.into())
                .unwrap_or(MessageKind::Text),
        };
        Message {
            id: self.id,
            sender: Sender::from_wire(&self.from),
            body: self.text.unwrap_or_default(),
            kind,
            attachment,
            created_at: self.created_at,
        }
    }
}

/// Parse the configured base address, guaranteeing a trailing slash so
/// endpoint joins never clobber a path prefix.
pub(crate) fn parse_base(raw: &str) -> Result<Url> {
    let mut base =
        Url::parse(raw).map_err(|e| Error::InvalidUrl(format!("{}: {}", raw, e)))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base)
}

/// HTTP client for the conversation endpoints
pub struct HttpChatApi {
    controller: TransferController,
    base: Url,
    token: Option<String>,
    deadline: Duration,
}

impl HttpChatApi {
    pub fn new(config: &Config) -> Result<Self> {
        let base = parse_base(&config.base_url)?;
        Ok(Self {
            controller: TransferController::new(),
            base,
            token: config.auth_token.clone(),
            deadline: config.metadata_deadline,
        })
    }

    pub fn controller(&self) -> &TransferController {
        &self.controller
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::InvalidUrl(format!("{}: {}", path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl ChatApi for HttpChatApi {
    async fn fetch_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let url = self.endpoint(&format!("conversations/{}/messages", conversation_id))?;
        let request = self.authorize(self.controller.client().get(url));
        let payload = self.controller.run(request, self.deadline, None).await?;

        let list: MessageListDto = serde_json::from_slice(&payload.body)?;
        Ok(list
            .messages
            .into_iter()
            .map(MessageDto::into_message)
            .collect())
    }

    async fn send_text(&self, conversation_id: &str, text: &str) -> Result<()> {
        let url = self.endpoint(&format!("conversations/{}/messages", conversation_id))?;
        let request = self
            .authorize(self.controller.client().post(url))
            .json(&SendTextBody { text, kind: "text" });
        self.controller.run(request, self.deadline, None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_list() {
        let json = r#"{
            "messages": [
                {"id": 1, "from": "clinic", "text": "hello", "type": "text",
                 "createdAt": "2024-05-01T10:00:00Z"},
                {"id": "m-2", "from": "patient", "text": "",
                 "type": "image",
                 "attachment": {"name": "scan.jpg", "size": 2048,
                                "url": "/files/scan.jpg", "mimeType": "image/jpeg"},
                 "createdAt": "2024-05-01T10:01:00Z"}
            ]
        }"#;

        let list: MessageListDto = serde_json::from_str(json).unwrap();
        let messages: Vec<Message> = list
            .messages
            .into_iter()
            .map(MessageDto::into_message)
            .collect();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "1");
        assert_eq!(messages[0].sender, Sender::Counterparty);
        assert_eq!(messages[0].kind, MessageKind::Text);
        assert_eq!(messages[0].body, "hello");

        assert_eq!(messages[1].id, "m-2");
        assert_eq!(messages[1].sender, Sender::Myself);
        assert_eq!(messages[1].kind, MessageKind::Image);
        let attachment = messages[1].attachment.as_ref().unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert_eq!(attachment.size_bytes, 2048);
    }

    #[test]
    fn test_unlabelled_message_infers_kind_from_attachment() {
        let json = r#"{"id": 7, "from": "clinic",
                       "attachment": {"name": "plan.pdf", "size": 10,
                                      "url": "/files/plan.pdf",
                                      "mimeType": "application/pdf"},
                       "createdAt": "2024-05-01T10:00:00Z"}"#;
        let dto: MessageDto = serde_json::from_str(json).unwrap();
        let message = dto.into_message();
        assert_eq!(message.kind, MessageKind::Document);
        assert_eq!(message.body, "");
    }

    #[test]
    fn test_attachment_file_type_overrides_derivation() {
        let json = r#"{"name": "weird.bin", "size": 10, "url": "/f/weird.bin",
                       "mimeType": "application/octet-stream", "fileType": "image"}"#;
        let dto: AttachmentDto = serde_json::from_str(json).unwrap();
        assert_eq!(dto.into_attachment().kind, AttachmentKind::Image);
    }

    #[test]
    fn test_missing_mime_defaults_to_octet_stream() {
        let json = r#"{"name": "blob", "size": 1, "url": "/f/blob"}"#;
        let dto: AttachmentDto = serde_json::from_str(json).unwrap();
        let attachment = dto.into_attachment();
        assert_eq!(attachment.mime_type, "application/octet-stream");
        assert_eq!(attachment.kind, AttachmentKind::Document);
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let mut config = Config::for_test(&std::env::temp_dir());
        config.base_url = "not a url".to_string();
        assert!(matches!(
            HttpChatApi::new(&config),
            Err(Error::InvalidUrl(_))
        ));
    }
}
