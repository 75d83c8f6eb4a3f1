//! Query endpoints: translate HTTP requests into broker exchanges.

use crate::server::{AppState, SharedState};
use crate::transcode::{TranscodeError, encode_upload};
use addon_bridge_core::{BridgeError, GeneratedImage, Payload, PromptPayload, Reply};
use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::future;

/// Successful query response.
///
/// Keys of a generic map reply other than `response` and `generatedImage`
/// are merged into the body as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySuccess {
    pub status: &'static str,
    pub request_id: String,
    /// Text answer from the addon.
    pub response: String,
    #[serde(rename = "generatedImage", skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<GeneratedImage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<Reply> for QuerySuccess {
    fn from(reply: Reply) -> Self {
        let mut extra = Map::new();
        let (response, generated_image) = match reply.payload {
            Payload::Reply(record) => (record.result.unwrap_or_default(), record.attachment),
            Payload::Map(mut map) => {
                let response = match map.remove("response") {
                    Some(Value::String(text)) => text,
                    Some(other) => other.to_string(),
                    None => Value::Object(map.clone()).to_string(),
                };
                let image = map
                    .remove("generatedImage")
                    .and_then(|raw| match serde_json::from_value(raw.clone()) {
                        Ok(image) => Some(image),
                        Err(_) => {
                            map.insert("generatedImage".to_string(), raw);
                            None
                        }
                    });
                // These are owned by the envelope around the reply.
                map.remove("status");
                map.remove("request_id");
                extra = map;
                (response, image)
            }
            Payload::Text(text) => (text, None),
        };
        Self {
            status: "success",
            request_id: reply.id,
            response,
            generated_image,
            extra,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    detail: String,
}

/// Failure of a query endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),
    #[error("Failed to process uploaded image: {0}")]
    Upload(String),
    #[error("invalid form field {field}: {reason}")]
    Form { field: &'static str, reason: String },
    #[error("invalid request body: {0}")]
    Body(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Bridge(BridgeError::NotConnected)
            | Self::Bridge(BridgeError::Transport(_))
            | Self::Bridge(BridgeError::Cancelled(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Bridge(BridgeError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Bridge(BridgeError::Remote(_)) => StatusCode::BAD_REQUEST,
            Self::Bridge(BridgeError::DuplicateId(_)) | Self::Bridge(BridgeError::Codec(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Upload(_) => StatusCode::BAD_REQUEST,
            Self::Form { .. } | Self::Body(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl From<TranscodeError> for ApiError {
    fn from(err: TranscodeError) -> Self {
        Self::Upload(err.to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::Upload(err.body_text())
        } else {
            Self::Body(err.body_text())
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::Body(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Body(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("query failed: {self}");
        } else {
            tracing::warn!("query rejected: {self}");
        }
        let body = ErrorBody {
            status: "error",
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// POST /query - prompt with an optional base64 image
pub async fn send_query(
    State(state): State<SharedState>,
    body: Result<Json<PromptPayload>, JsonRejection>,
) -> Result<Json<QuerySuccess>, ApiError> {
    let Json(prompt) = body?;
    ensure_connected(&state)?;
    forward(&state, prompt).await
}

/// POST /query/upload - multipart prompt; the image file is base64 encoded here
pub async fn send_query_with_upload(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<QuerySuccess>, ApiError> {
    let multipart = multipart?;
    ensure_connected(&state)?;
    let prompt = read_upload_form(multipart, state.config.max_upload_bytes).await?;
    forward(&state, prompt).await
}

fn ensure_connected(state: &AppState) -> Result<(), ApiError> {
    if state.broker.is_connected() {
        Ok(())
    } else {
        Err(BridgeError::NotConnected.into())
    }
}

async fn forward(state: &AppState, prompt: PromptPayload) -> Result<Json<QuerySuccess>, ApiError> {
    let reply = state.broker.exchange(prompt, None, future::pending()).await?;
    Ok(Json(reply.into()))
}

async fn read_upload_form(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> Result<PromptPayload, ApiError> {
    let mut prompt = None;
    let mut image = None;
    let mut start_new_chat = true;
    let mut use_temporary_chat = true;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => prompt = Some(field.text().await?),
            "image" => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await?;
                // Browsers send an empty part when no file was chosen.
                if !bytes.is_empty() {
                    let encoded = encode_upload(&bytes, max_upload_bytes)?;
                    tracing::info!(
                        "Image uploaded: {} ({} bytes, {} base64 chars)",
                        file_name,
                        bytes.len(),
                        encoded.len()
                    );
                    image = Some(encoded);
                }
            }
            "startNewChat" => start_new_chat = parse_bool("startNewChat", &field.text().await?)?,
            "useTemporaryChat" => {
                use_temporary_chat = parse_bool("useTemporaryChat", &field.text().await?)?;
            }
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    let prompt = prompt.ok_or(ApiError::Form {
        field: "prompt",
        reason: "field is required".to_string(),
    })?;
    Ok(PromptPayload {
        prompt,
        image,
        start_new_chat,
        use_temporary_chat,
    })
}

fn parse_bool(field: &'static str, raw: &str) -> Result<bool, ApiError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ApiError::Form {
            field,
            reason: format!("expected a boolean, got {raw:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addon_bridge_core::{CancelReason, ReplyRecord};
    use serde_json::json;
    use std::time::Duration;

    fn reply(payload: Payload) -> Reply {
        Reply {
            id: "abc".to_string(),
            payload,
        }
    }

    #[test]
    fn structured_reply_keeps_attachment() {
        let image = GeneratedImage {
            url: "https://example.com/a.png".to_string(),
            base64: "aGk=".to_string(),
            alt: "sunset".to_string(),
        };
        let record = ReplyRecord::success("here you go").with_attachment(image.clone());
        let body = QuerySuccess::from(reply(record.into()));
        assert_eq!(body.request_id, "abc");
        assert_eq!(body.response, "here you go");
        assert_eq!(body.generated_image, Some(image));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["generatedImage"]["alt"], "sunset");
    }

    #[test]
    fn text_and_map_replies() {
        let body = QuerySuccess::from(reply(Payload::Text("plain".into())));
        assert_eq!(body.response, "plain");
        assert!(body.generated_image.is_none());

        let Payload::Map(map) = Payload::from_value(json!({"response": "mapped", "extra": 1}))
        else {
            panic!("expected a map payload");
        };
        let body = QuerySuccess::from(reply(Payload::Map(map)));
        assert_eq!(body.response, "mapped");
    }

    #[test]
    fn map_reply_is_merged_into_body() {
        let payload = Payload::from_value(json!({
            "response": "mapped",
            "extra": 1,
            "model": {"name": "fast"},
            "generatedImage": {"url": "u", "base64": "aGk=", "alt": "a"}
        }));
        let body = serde_json::to_value(QuerySuccess::from(reply(payload))).unwrap();
        assert_eq!(
            body,
            json!({
                "status": "success",
                "request_id": "abc",
                "response": "mapped",
                "extra": 1,
                "model": {"name": "fast"},
                "generatedImage": {"url": "u", "base64": "aGk=", "alt": "a"}
            })
        );
    }

    #[test]
    fn map_reply_without_response_keeps_its_text() {
        let payload = Payload::from_value(json!({"answer": 42, "request_id": "spoofed"}));
        let body = serde_json::to_value(QuerySuccess::from(reply(payload))).unwrap();
        assert_eq!(body["request_id"], "abc");
        assert_eq!(body["answer"], 42);
        let text: Value = serde_json::from_str(body["response"].as_str().unwrap()).unwrap();
        assert_eq!(text["answer"], 42);
    }

    #[test]
    fn malformed_body_is_unprocessable() {
        let err = ApiError::Body("missing field `prompt`".into());
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn error_status_codes() {
        let cases = [
            (BridgeError::NotConnected, StatusCode::SERVICE_UNAVAILABLE),
            (
                BridgeError::Cancelled(CancelReason::ConnectionLost),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BridgeError::Timeout(Duration::from_secs(1)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (BridgeError::Remote("rate limited".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn remote_reason_is_the_detail() {
        let err = ApiError::from(BridgeError::Remote("rate limited".into()));
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn form_booleans() {
        assert!(parse_bool("x", "True").unwrap());
        assert!(!parse_bool("x", "0").unwrap());
        assert!(matches!(
            parse_bool("startNewChat", "maybe"),
            Err(ApiError::Form { field: "startNewChat", .. })
        ));
    }
}
