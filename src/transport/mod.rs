// src/transport/mod.rs
//! `Link` adapters: a real websocket transport, and an in-memory pair for
//! tests (spec §4.2 "Link abstraction" is deliberately thin — this is an
//! external collaborator, not where the protocol's hard engineering lives).

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::error::ProtocolError;
use crate::session::Link;

/// A `Link` backed by a `tokio-tungstenite` websocket, as spec §6 describes
/// the wire transport ("a bidirectional stream of UTF-8 JSON text frames...
/// over a websocket-like transport"). Generic over the underlying stream so
/// the same adapter covers both a plain `TcpStream` (inbound accept) and a
/// `MaybeTlsStream<TcpStream>` (outbound connect), mirroring the teacher's
/// `Framed<S: AsyncRead + AsyncWrite>` genericity.
pub struct WsLink<S> {
    stream: WebSocketStream<S>,
}

impl<S> WsLink<S> {
    pub fn new(stream: WebSocketStream<S>) -> Self {
        WsLink { stream }
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> Link for WsLink<S> {
    async fn send(&mut self, bytes: Bytes) -> Result<(), ProtocolError> {
        let text = String::from_utf8(bytes.to_vec())
            .map_err(|e| ProtocolError::LinkFailure(format!("non-utf8 frame: {e}")))?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| ProtocolError::LinkFailure(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Bytes, ProtocolError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(Bytes::from(text.into_bytes()))),
                Ok(Message::Binary(data)) => return Some(Ok(Bytes::from(data))),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(ProtocolError::LinkFailure(e.to_string()))),
            }
        }
    }
}

/// An in-process `Link` backed by a paired `tokio::sync::mpsc` channel,
/// used by `tests/protocol.rs` to drive full sessions without real sockets.
pub struct InMemoryLink {
    tx: tokio::sync::mpsc::UnboundedSender<Bytes>,
    rx: tokio::sync::mpsc::UnboundedReceiver<Bytes>,
}

impl InMemoryLink {
    /// Build a connected pair: bytes sent on one end arrive on the other.
    pub fn pair() -> (InMemoryLink, InMemoryLink) {
        let (tx_a, rx_b) = tokio::sync::mpsc::unbounded_channel();
        let (tx_b, rx_a) = tokio::sync::mpsc::unbounded_channel();
        (
            InMemoryLink { tx: tx_a, rx: rx_a },
            InMemoryLink { tx: tx_b, rx: rx_b },
        )
    }
}

#[async_trait]
impl Link for InMemoryLink {
    async fn send(&mut self, bytes: Bytes) -> Result<(), ProtocolError> {
        self.tx
            .send(bytes)
            .map_err(|_| ProtocolError::LinkFailure("peer end dropped".into()))
    }

    async fn recv(&mut self) -> Option<Result<Bytes, ProtocolError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_link_pair_roundtrips() {
        let (mut a, mut b) = InMemoryLink::pair();
        a.send(Bytes::from_static(b"hello")).await.unwrap();
        let received = b.recv().await.unwrap().unwrap();
        assert_eq!(received, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn dropping_one_end_closes_the_other() {
        let (a, mut b) = InMemoryLink::pair();
        drop(a);
        assert!(b.recv().await.is_none());
    }
}
