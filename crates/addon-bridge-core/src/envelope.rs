//! Wire envelope and payload shapes.
//!
//! Every frame on the peer connection is one JSON object
//! `{"id": ..., "type": ..., "data": ...}`. The `type` decides routing and
//! `data` is opaque to the broker apart from the reply status discriminant.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Failure text used when the peer reports an error without any detail.
pub const UNKNOWN_REMOTE_ERROR: &str = "Unknown error from addon";

/// The unit exchanged over the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id, echoed by the peer on the matching reply.
    pub id: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: Kind,
    #[serde(rename = "data", alias = "payload")]
    pub payload: Payload,
}

impl Envelope {
    /// Build an outbound request under a freshly generated id.
    pub fn request(payload: impl Into<Payload>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            kind: Kind::Request,
            payload: payload.into(),
        }
    }

    /// Build a reply for the request `id`.
    pub fn reply(id: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            id: id.into(),
            kind: Kind::Reply,
            payload: payload.into(),
        }
    }

    /// Build an uncorrelated control frame (keep-alives and the like).
    pub fn control(id: impl Into<String>, payload: impl Into<Payload>) -> Self {
        Self {
            id: id.into(),
            kind: Kind::Control,
            payload: payload.into(),
        }
    }
}

/// Message kind. Unrecognised kinds decode to [`Kind::Unknown`] so that the
/// receive path can drop them instead of rejecting the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    #[serde(rename = "prompt", alias = "request")]
    Request,
    #[serde(rename = "response", alias = "reply")]
    Reply,
    Control,
    #[serde(other)]
    Unknown,
}

/// Envelope payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// Structured success/error record.
    Reply(ReplyRecord),
    /// Any other JSON object.
    Map(Map<String, Value>),
    /// Plain text.
    Text(String),
}

impl Payload {
    /// Classify a decoded JSON value.
    ///
    /// Objects carrying a valid reply `status` become [`Payload::Reply`],
    /// other objects stay generic, strings are text, and every other JSON
    /// value is kept as its textual rendering.
    pub fn from_value(value: Value) -> Self {
        if value.get("status").is_some() {
            if let Ok(record) = ReplyRecord::deserialize(&value) {
                return Self::Reply(record);
            }
        }
        match value {
            Value::Object(map) => Self::Map(map),
            Value::String(text) => Self::Text(text),
            other => Self::Text(other.to_string()),
        }
    }

    /// The failure reason if this payload reports `status: "error"`.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Reply(record) if record.status == ReplyStatus::Error => Some(
                record
                    .reason
                    .as_deref()
                    .or(record.result.as_deref())
                    .unwrap_or(UNKNOWN_REMOTE_ERROR)
                    .to_string(),
            ),
            Self::Map(map) if str_field(map, "status") == Some("error") => Some(
                str_field(map, "reason")
                    .or_else(|| str_field(map, "response"))
                    .or_else(|| str_field(map, "result"))
                    .unwrap_or(UNKNOWN_REMOTE_ERROR)
                    .to_string(),
            ),
            _ => None,
        }
    }
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

impl From<ReplyRecord> for Payload {
    fn from(record: ReplyRecord) -> Self {
        Self::Reply(record)
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self::Map(map)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Reply status discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// Structured reply sent back by the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub status: ReplyStatus,
    /// Textual result.
    #[serde(
        default,
        rename = "response",
        alias = "result",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<String>,
    /// Failure reason when `status` is `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Generated artifact, if the peer produced one.
    #[serde(
        default,
        rename = "generatedImage",
        alias = "attachment",
        skip_serializing_if = "Option::is_none"
    )]
    pub attachment: Option<GeneratedImage>,
}

impl ReplyRecord {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Success,
            result: Some(result.into()),
            reason: None,
            attachment: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::Error,
            result: None,
            reason: Some(reason.into()),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: GeneratedImage) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Image generated on the peer side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// Where the peer found the image.
    pub url: String,
    /// Base64 encoded image bytes.
    pub base64: String,
    pub alt: String,
}

fn default_true() -> bool {
    true
}

/// Prompt forwarded to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPayload {
    pub prompt: String,
    /// Base64 encoded image to attach to the prompt.
    #[serde(default)]
    pub image: Option<String>,
    /// Open a fresh chat before running the prompt.
    #[serde(default = "default_true")]
    pub start_new_chat: bool,
    /// Run in temporary chat mode. Image generation needs this disabled.
    #[serde(default = "default_true")]
    pub use_temporary_chat: bool,
}

impl PromptPayload {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image: None,
            start_new_chat: true,
            use_temporary_chat: true,
        }
    }
}

impl From<PromptPayload> for Payload {
    fn from(prompt: PromptPayload) -> Self {
        match serde_json::to_value(&prompt) {
            Ok(Value::Object(map)) => Self::Map(map),
            Ok(other) => Self::from_value(other),
            Err(e) => {
                tracing::error!("failed to encode prompt payload: {e}");
                Self::Text(prompt.prompt)
            }
        }
    }
}
