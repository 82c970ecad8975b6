//! [`StreamTransport`] over a WebSocket carrying JSON text frames, for a Listen
//! gateway or an emulator bridge.
//!
//! Each frame is one object tagged by `type`:
//!
//! ```text
//! {"type":"open","stream":1,"metadata":{"authorization":"Bearer ..."}}
//! {"type":"data","stream":1,"payload":{...ListenRequest or ListenResponse...}}
//! {"type":"close","stream":1}
//! {"type":"error","stream":1,"status":{"code":14,"message":"..."}}
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{FrameKind, RequestMetadata, StreamId, StreamTransport, TransportFrame};
use crate::firestore::error::{internal_error, invalid_argument, unavailable, FirestoreResult};
use crate::firestore::remote::rpc_error::map_status_payload;
use crate::platform::runtime::spawn_detached;

type TcpWebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WebSocketSink = SplitSink<TcpWebSocket, Message>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireFrame {
    Open {
        stream: u32,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    Data {
        stream: u32,
        payload: JsonValue,
    },
    Close {
        stream: u32,
    },
    Error {
        stream: u32,
        status: JsonValue,
    },
}

pub struct WebSocketTransport {
    sink: AsyncMutex<Option<WebSocketSink>>,
    inbound: async_channel::Receiver<FirestoreResult<TransportFrame>>,
}

impl WebSocketTransport {
    /// Connects to `url` (`ws://` or `wss://`) and starts the reader task.
    pub async fn connect(url: &Url) -> FirestoreResult<Arc<Self>> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(invalid_argument(format!(
                "listen endpoint must be a ws:// or wss:// URL, got '{url}'"
            )));
        }
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| unavailable(format!("failed to connect websocket: {err}")))?;
        let (sink, mut reader) = stream.split();
        let (inbound_tx, inbound_rx) = async_channel::unbounded();

        spawn_detached(async move {
            while let Some(message) = reader.next().await {
                let text = match message {
                    Ok(Message::Text(payload)) => payload,
                    Ok(Message::Binary(payload)) => match String::from_utf8(payload) {
                        Ok(text) => text,
                        Err(_) => {
                            log::warn!("received non-UTF8 binary listen frame; dropping");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        log::debug!("websocket read failed: {err}");
                        break;
                    }
                };
                match decode_frame(&text) {
                    Ok(frame) => {
                        if inbound_tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => log::warn!("dropping malformed listen frame: {err}"),
                }
            }
            let _ = inbound_tx
                .send(Err(unavailable("websocket connection closed")))
                .await;
        });

        Ok(Arc::new(Self {
            sink: AsyncMutex::new(Some(sink)),
            inbound: inbound_rx,
        }))
    }

    async fn send_text(&self, text: String, close_after: bool) -> FirestoreResult<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| unavailable("websocket connection closed"))?;
        sink.send(Message::Text(text))
            .await
            .map_err(|err| unavailable(format!("failed to send websocket frame: {err}")))?;
        if close_after {
            let _ = sink.close().await;
            guard.take();
        }
        Ok(())
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn send(&self, frame: TransportFrame) -> FirestoreResult<()> {
        let closing = matches!(frame.kind(), FrameKind::Close);
        let text = encode_frame(frame)?;
        // A closed logical stream ends the socket: each socket carries one listen stream.
        self.send_text(text, closing).await
    }

    async fn next(&self) -> FirestoreResult<TransportFrame> {
        self.inbound
            .recv()
            .await
            .map_err(|_| unavailable("websocket connection closed"))?
    }
}

fn encode_frame(frame: TransportFrame) -> FirestoreResult<String> {
    let stream = frame.stream_id().value();
    let wire = match frame.into_kind() {
        FrameKind::Open(metadata) => WireFrame::Open {
            stream,
            metadata: metadata
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        },
        FrameKind::Data(payload) => WireFrame::Data {
            stream,
            payload: serde_json::from_slice(&payload).map_err(|err| {
                internal_error(format!("listen payload is not JSON: {err}"))
            })?,
        },
        FrameKind::Close => WireFrame::Close { stream },
        FrameKind::Error(error) => WireFrame::Error {
            stream,
            status: json!({ "code": error.code.grpc_code(), "message": error.message() }),
        },
    };
    serde_json::to_string(&wire)
        .map_err(|err| internal_error(format!("failed to encode websocket frame: {err}")))
}

fn decode_frame(text: &str) -> FirestoreResult<TransportFrame> {
    let wire: WireFrame = serde_json::from_str(text)
        .map_err(|err| invalid_argument(format!("invalid websocket frame: {err}")))?;
    let frame = match wire {
        WireFrame::Open { stream, metadata } => TransportFrame::open(
            StreamId::new(stream),
            metadata.into_iter().collect::<RequestMetadata>(),
        ),
        WireFrame::Data { stream, payload } => {
            let bytes = serde_json::to_vec(&payload)
                .map_err(|err| internal_error(format!("failed to re-encode payload: {err}")))?;
            TransportFrame::data(StreamId::new(stream), bytes)
        }
        WireFrame::Close { stream } => TransportFrame::close(StreamId::new(stream)),
        WireFrame::Error { stream, status } => {
            TransportFrame::error(StreamId::new(stream), map_status_payload(&status))
        }
    };
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::error::FirestoreErrorCode;

    #[test]
    fn encodes_open_and_data_frames() {
        let open = TransportFrame::open(
            StreamId::new(3),
            RequestMetadata::new().with("authorization", "Bearer owner"),
        );
        let encoded: JsonValue = serde_json::from_str(&encode_frame(open).unwrap()).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "open",
                "stream": 3,
                "metadata": { "authorization": "Bearer owner" }
            })
        );

        let data = TransportFrame::data(StreamId::new(3), br#"{"database":"d"}"#.to_vec());
        let encoded: JsonValue = serde_json::from_str(&encode_frame(data).unwrap()).unwrap();
        assert_eq!(encoded["payload"], json!({ "database": "d" }));
    }

    #[test]
    fn decodes_server_frames() {
        let data = decode_frame(r#"{"type":"data","stream":1,"payload":{"filter":{"count":2}}}"#)
            .unwrap();
        match data.kind() {
            FrameKind::Data(payload) => {
                let value: JsonValue = serde_json::from_slice(payload).unwrap();
                assert_eq!(value, json!({ "filter": { "count": 2 } }));
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        let error = decode_frame(
            r#"{"type":"error","stream":1,"status":{"code":8,"message":"slow down"}}"#,
        )
        .unwrap();
        match error.kind() {
            FrameKind::Error(err) => assert_eq!(err.code, FirestoreErrorCode::ResourceExhausted),
            other => panic!("unexpected frame: {other:?}"),
        }

        assert!(decode_frame(r#"{"type":"bogus","stream":1}"#).is_err());
    }
}
