//! The `axum` endpoint that accepts a WebSocket upgrade, negotiates a hub
//! protocol, and bridges the socket to a [`ConnectionRecord`] minted by the
//! [`ConnectionManager`].
//!
//! Negotiation happens on the already-upgraded socket rather than as a
//! separate HTTP call: the first record-separator-terminated frame must be
//! a JSON object carrying the client's chosen `protocol` name.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::BytesMut;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use rpchub_core::{decode_negotiation, HubError, PipeOptions, ReadResult};
use tracing::{info, warn};

use crate::manager::ConnectionManager;

/// Builds a router exposing a single hub endpoint at `path`, backed by
/// `manager`.
pub fn router(path: &str, manager: Arc<ConnectionManager>) -> Router {
    Router::new().route(path, get(upgrade)).with_state(manager)
}

async fn upgrade(ws: WebSocketUpgrade, State(manager): State<Arc<ConnectionManager>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| bridge(socket, manager))
}

async fn bridge(socket: WebSocket, manager: Arc<ConnectionManager>) {
    let (mut sink, mut stream) = socket.split();

    let protocol = match read_negotiation(&mut stream).await {
        Ok(Some(protocol)) => protocol,
        Ok(None) => {
            warn!("socket closed before negotiation completed");
            let _ = sink.close().await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "malformed negotiation frame; closing connection");
            let _ = sink.close().await;
            return;
        }
    };

    let (id, transport, record) = match manager.create_connection(PipeOptions::default(), PipeOptions::default()) {
        Ok(created) => created,
        Err(e) => {
            warn!(error = %e, "rejecting connection");
            let _ = sink.close().await;
            return;
        }
    };
    info!(connection.id = %id, protocol = %protocol, "connection negotiated");

    let outbound_transport = transport.clone();
    let outbound = tokio::spawn(async move {
        loop {
            match outbound_transport.input.read_available().await {
                Ok(ReadResult::Data(bytes)) => {
                    let len = bytes.len();
                    if sink.send(Message::Binary(bytes.to_vec().into())).await.is_err() {
                        break;
                    }
                    outbound_transport.input.advance(len);
                }
                Ok(ReadResult::Completed) | Err(_) => break,
            }
        }
        let _ = sink.close().await;
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Binary(data)) => {
                record.touch();
                if transport.output.write(&data).await.is_err() {
                    break;
                }
            }
            Ok(Message::Text(text)) => {
                record.touch();
                if transport.output.write(text.as_bytes()).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(connection.id = %id, error = %e, "websocket read error");
                transport.output.complete(Some(HubError::transport(e.to_string())));
                break;
            }
        }
    }

    transport.output.complete(None);
    outbound.abort();
    manager.dispose_and_remove(id).await;
}

/// Reads WebSocket frames until one full record-separator-terminated
/// negotiation record is assembled, and parses it with
/// [`rpchub_core::decode_negotiation`].
///
/// `Ok(None)` means the socket closed or errored before a complete record
/// arrived. A record that *did* arrive but failed to parse is `Err`,
/// distinct from that closed-before-negotiating case.
async fn read_negotiation(stream: &mut SplitStream<WebSocket>) -> Result<Option<String>, HubError> {
    let mut buf = BytesMut::new();
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(m) => m,
            Err(_) => return Ok(None),
        };
        match message {
            Message::Binary(data) => buf.extend_from_slice(&data),
            Message::Text(text) => buf.extend_from_slice(text.as_bytes()),
            Message::Close(_) => return Ok(None),
            _ => continue,
        }
        if let Some(negotiation) = decode_negotiation(&mut buf)? {
            return Ok(Some(negotiation.protocol));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_builds_without_panicking() {
        let manager = ConnectionManager::new(crate::manager::ScavengerConfig::default());
        let _router = router("/hub", manager);
    }

    #[test]
    fn negotiation_framing_round_trips_through_core() {
        let mut out = BytesMut::new();
        rpchub_core::encode_negotiation("json", &mut out);
        out.extend_from_slice(b"x"); // trailing garbage after the frame must not be consumed
        let negotiation = decode_negotiation(&mut out).unwrap().unwrap();
        assert_eq!(negotiation.protocol, "json");
        assert_eq!(&out[..], b"x");
    }

    #[test]
    fn negotiation_framing_rejects_a_malformed_record() {
        let mut out = BytesMut::new();
        rpchub_core::framing::text::encode(br#"{"not-protocol":"json"}"#, &mut out);
        assert!(matches!(decode_negotiation(&mut out), Err(HubError::Protocol(_))));
    }
}
