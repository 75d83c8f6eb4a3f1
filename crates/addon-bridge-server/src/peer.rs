//! Stand-in for the browser addon.
//!
//! Connects to the bridge's `/ws` endpoint and answers every prompt by
//! echoing it back. A few prompt prefixes trigger other behaviour:
//!
//! - `!error <reason>` - reply with `status: "error"` and the given reason
//! - `!silent` - never reply
//! - `!hangup` - close the connection

use addon_bridge_core::{
    Envelope, GeneratedImage, Kind, Payload, ReplyRecord, decode, encode,
};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

/// What the echo peer does with one request.
#[derive(Debug, Clone, PartialEq)]
pub enum EchoAction {
    Reply(Envelope),
    Ignore,
    HangUp,
}

/// Decide how to answer `request`.
pub fn echo_action(request: &Envelope) -> EchoAction {
    if request.kind != Kind::Request {
        return EchoAction::Ignore;
    }
    let (prompt, image) = match &request.payload {
        Payload::Map(map) => (
            map.get("prompt").and_then(|v| v.as_str()).unwrap_or_default(),
            map.get("image").and_then(|v| v.as_str()),
        ),
        Payload::Text(text) => (text.as_str(), None),
        Payload::Reply(_) => return EchoAction::Ignore,
    };

    if prompt.starts_with("!silent") {
        return EchoAction::Ignore;
    }
    if prompt.starts_with("!hangup") {
        return EchoAction::HangUp;
    }
    let record = match prompt.strip_prefix("!error") {
        Some(reason) => ReplyRecord::error(reason.trim()),
        None => {
            let record = ReplyRecord::success(format!("echo: {prompt}"));
            match image {
                Some(image) => record.with_attachment(GeneratedImage {
                    url: "echo://image".to_string(),
                    base64: image.to_string(),
                    alt: prompt.to_string(),
                }),
                None => record,
            }
        }
    };
    EchoAction::Reply(Envelope::reply(request.id.clone(), record))
}

/// Connect to `url` and serve prompts until the bridge goes away.
pub async fn run_echo_peer(url: &str) -> anyhow::Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();
    tracing::info!("Connected to bridge at {}", url);

    while let Some(msg) = stream.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };
        let request = match decode(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Invalid message: {}", e);
                continue;
            }
        };
        match echo_action(&request) {
            EchoAction::Reply(reply) => {
                sink.send(Message::Text(encode(&reply)?.into())).await?;
            }
            EchoAction::Ignore => tracing::debug!(id = %request.id, "not answering"),
            EchoAction::HangUp => {
                tracing::info!("Hanging up on request {}", request.id);
                sink.close().await?;
                break;
            }
        }
    }
    Ok(())
}
