//! The addon's WebSocket endpoint.

use crate::redact::redact_base64;
use crate::server::SharedState;
use addon_bridge_core::{BoxError, Broker, Frame, FrameSink, run_receive_loop};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

/// GET /ws - upgrade and hand the socket to the broker
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    let broker = state.broker.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, broker))
}

/// Write half of an addon socket.
struct AddonSink(SplitSink<WebSocket, Message>);

impl FrameSink for AddonSink {
    fn send_frame(&mut self, frame: String) -> BoxFuture<'_, Result<(), BoxError>> {
        Box::pin(async move {
            self.0
                .send(Message::Text(frame.into()))
                .await
                .map_err(BoxError::from)
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.0.close().await;
        })
    }
}

async fn handle_socket(socket: WebSocket, broker: Arc<Broker>) {
    let (sink, stream) = socket.split();
    let connection = broker.attach(AddonSink(sink)).await;

    let frames = stream.map(|message| message.map(into_frame));
    run_receive_loop(&broker, connection, frames).await;
}

fn into_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => {
            let text = text.as_str().to_owned();
            tracing::debug!("received raw message from addon: {}", redact_base64(&text));
            Frame::Text(text)
        }
        Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        Message::Ping(_) => Frame::Ping,
        Message::Pong(_) => Frame::Pong,
        Message::Close(_) => Frame::Close,
    }
}
