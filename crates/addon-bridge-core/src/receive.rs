//! Driver for one connection's inbound side.

use crate::{Broker, ConnectionId};
use futures_util::{Stream, StreamExt};
use std::fmt;

/// Transport-neutral inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// Read `frames` until the peer goes away, feeding each text frame to the
/// broker, then report the disconnect.
///
/// A bad frame never ends the loop; only a close frame, a transport error or
/// the end of the stream does.
pub async fn run_receive_loop<S, E>(broker: &Broker, connection: ConnectionId, mut frames: S)
where
    S: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Frame::Text(text)) => {
                broker.ingest(&text);
            }
            Ok(Frame::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    broker.ingest(&text);
                }
                Err(_) => tracing::error!(%connection, "discarding non-UTF-8 binary frame"),
            },
            Ok(Frame::Ping | Frame::Pong) => {}
            Ok(Frame::Close) => {
                tracing::debug!(%connection, "peer sent close frame");
                break;
            }
            Err(e) => {
                tracing::error!(%connection, "websocket error: {e}");
                break;
            }
        }
    }
    broker.on_disconnect(connection).await;
}
