//! Per-peer identity, head tracking, and the outbound message channel.

use super::message::Message;
use super::types::CloseCode;
use crate::types::{BlockHeader, Hash};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tracing::debug;

/// Remote peer as seen by one agent: connection identity from the
/// handshake plus the chain head it has demonstrated since.
pub struct Peer {
    pub addr: SocketAddr,
    /// Protocol version from the handshake; gates v2 request forms.
    pub version: u32,
    /// Head hash self-reported during the handshake.
    pub head_hash: Option<Hash>,
    /// Most recent head header received from this peer.
    pub head: Option<BlockHeader>,
}

impl Peer {
    pub fn new(addr: SocketAddr, version: u32, head_hash: Option<Hash>) -> Self {
        Self { addr, version, head_hash, head: None }
    }

    /// Record a newer head for this peer.
    pub fn record_head(&mut self, header: BlockHeader) {
        self.head_hash = Some(header.hash());
        self.head = Some(header);
    }

    pub fn head_height(&self) -> Option<u32> {
        self.head.as_ref().map(|head| head.height)
    }
}

/// Outbound half of the peer link.
///
/// Messages go to the connection layer through an unbounded channel; the
/// agent's token bucket queues already bound announcement volume, and
/// request/response traffic must not be silently dropped. `close` emits a
/// final close frame and drops everything after it.
pub struct PeerChannel {
    addr: SocketAddr,
    sink: mpsc::UnboundedSender<Message>,
    closed: bool,
    close_code: Option<CloseCode>,
}

impl PeerChannel {
    pub fn new(addr: SocketAddr, sink: mpsc::UnboundedSender<Message>) -> Self {
        Self { addr, sink, closed: false, close_code: None }
    }

    /// Create a channel plus the receiving end, for tests and in-process
    /// wiring.
    pub fn pair(addr: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (sink, stream) = mpsc::unbounded_channel();
        (Self::new(addr, sink), stream)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn send(&self, msg: Message) {
        if self.closed {
            debug!("{}: dropping {} on closed channel", self.addr, msg.command());
            return;
        }
        if self.sink.send(msg).is_err() {
            debug!("{}: connection layer gone", self.addr);
        }
    }

    /// Close the link with a protocol reason. Idempotent; the first close
    /// code wins.
    pub fn close(&mut self, code: CloseCode, reason: &str) {
        if self.closed {
            return;
        }
        debug!("{}: closing channel ({:?}: {})", self.addr, code, reason);
        let _ = self.sink.send(Message::Close { code, reason: reason.to_string() });
        self.closed = true;
        self.close_code = Some(code);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:8444".parse().unwrap()
    }

    #[tokio::test]
    async fn close_is_idempotent_and_final() {
        let (mut channel, mut stream) = PeerChannel::pair(addr());
        channel.close(CloseCode::InvalidBlockProof, "bad proof");
        channel.close(CloseCode::GetTransactionsProofTimeout, "late");

        match stream.recv().await {
            Some(Message::Close { code, .. }) => {
                assert_eq!(code, CloseCode::InvalidBlockProof);
            }
            other => panic!("expected close frame, got {:?}", other.map(|m| m.command())),
        }
        channel.send(Message::GetHead);
        assert!(stream.try_recv().is_err());
        assert_eq!(channel.close_code(), Some(CloseCode::InvalidBlockProof));
    }

    #[test]
    fn peer_records_head() {
        let mut peer = Peer::new(addr(), 2, None);
        assert_eq!(peer.head_height(), None);
        let header = BlockHeader {
            version: 1,
            prev_hash: [0u8; 32],
            interlink: Vec::new(),
            body_hash: [0u8; 32],
            height: 42,
            timestamp: 1,
        };
        peer.record_head(header.clone());
        assert_eq!(peer.head_height(), Some(42));
        assert_eq!(peer.head_hash, Some(header.hash()));
    }
}
