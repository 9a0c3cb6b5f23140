//! Deterministic in-process transport.
//!
//! [`MemoryTransport`] implements [`Transport`] over plain queues: events
//! are injected synchronously and everything sent is recorded for
//! inspection. The session layer's tests run against it so connection,
//! dispatch and shutdown behaviour can be exercised tick by tick without a
//! network or a runtime; it also backs single-process tooling.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;

use crate::transport::{PeerId, Transport, TransportEvent};

/// In-process [`Transport`] with scripted events and recorded output.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    queued: VecDeque<TransportEvent>,
    open: HashSet<PeerId>,
    transmitted: HashMap<PeerId, Vec<Vec<u8>>>,
    kicked: Vec<PeerId>,
    flushes: usize,
    shut_down: bool,
}

impl MemoryTransport {
    /// Create an empty transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a peer connecting.
    pub fn connect_peer(&mut self, peer: PeerId) {
        self.open.insert(peer);
        self.queued.push_back(TransportEvent::Connected {
            peer,
            addr: Self::loopback(),
        });
    }

    /// Script an inbound message from a peer.
    ///
    /// No liveness check on purpose: tests use this to replay traffic for
    /// peers that are already gone.
    pub fn deliver(&mut self, peer: PeerId, payload: Vec<u8>) {
        self.queued
            .push_back(TransportEvent::Received { peer, payload });
    }

    /// Script a peer-initiated disconnect.
    pub fn drop_peer(&mut self, peer: PeerId) {
        self.open.remove(&peer);
        self.queued.push_back(TransportEvent::Disconnected { peer });
    }

    /// Frames handed to [`Transport::send`] for the given peer, in order.
    pub fn transmitted(&self, peer: PeerId) -> &[Vec<u8>] {
        self.transmitted
            .get(&peer)
            .map(|frames| frames.as_slice())
            .unwrap_or(&[])
    }

    /// Peers closed by [`Transport::disconnect`], in order.
    pub fn kicked_peers(&self) -> &[PeerId] {
        &self.kicked
    }

    /// Number of [`Transport::flush`] calls seen.
    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    /// Whether the peer's connection is currently open.
    pub fn is_open(&self, peer: PeerId) -> bool {
        self.open.contains(&peer)
    }

    /// Whether [`Transport::shutdown`] ran.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }
}

impl Transport for MemoryTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        self.queued.drain(..).collect()
    }

    fn send(&mut self, peer: PeerId, frame: Vec<u8>) {
        if self.shut_down || !self.open.contains(&peer) {
            return;
        }
        self.transmitted.entry(peer).or_default().push(frame);
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }

    fn disconnect(&mut self, peer: PeerId) {
        if self.open.remove(&peer) {
            self.kicked.push(peer);
        }
    }

    fn shutdown(&mut self) {
        self.open.clear();
        self.queued.clear();
        self.shut_down = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_drain_in_arrival_order() {
        let mut transport = MemoryTransport::new();
        transport.connect_peer(PeerId(1));
        transport.deliver(PeerId(1), vec![1, 2]);
        transport.drop_peer(PeerId(1));

        let events = transport.poll();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TransportEvent::Connected { .. }));
        assert!(matches!(events[1], TransportEvent::Received { .. }));
        assert!(matches!(events[2], TransportEvent::Disconnected { .. }));
        assert!(transport.poll().is_empty());
    }

    #[test]
    fn test_send_to_closed_peer_is_dropped() {
        let mut transport = MemoryTransport::new();
        transport.connect_peer(PeerId(1));
        transport.send(PeerId(1), vec![1]);
        transport.drop_peer(PeerId(1));
        transport.send(PeerId(1), vec![2]);
        assert_eq!(transport.transmitted(PeerId(1)), &[vec![1]]);
    }

    #[test]
    fn test_shutdown_discards_queued_events() {
        let mut transport = MemoryTransport::new();
        transport.connect_peer(PeerId(1));
        transport.shutdown();
        assert!(transport.poll().is_empty());
        assert!(transport.is_shut_down());
        assert!(!transport.is_open(PeerId(1)));
    }
}
