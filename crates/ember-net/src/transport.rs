//! Transport binding abstraction.
//!
//! A [`Transport`] owns one bound network endpoint and surfaces its activity
//! as a batch of [`TransportEvent`]s per [`Transport::poll`] call. The
//! session layer ([`crate::server::SessionServer`]) is written once against
//! this trait; [`crate::tcp::TcpTransport`] is the production implementation
//! and [`crate::memory::MemoryTransport`] the deterministic in-process one.

use std::net::SocketAddr;

/// Native identity of a transport peer, assigned by the transport when the
/// peer connects and retired when it disconnects.
///
/// A `PeerId` is only a key. It may be stored across ticks, but after the
/// peer disconnects it resolves to nothing; it is never reused within one
/// transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub u64);

/// One unit of transport activity, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// A new peer completed its connection.
    Connected {
        /// Identity assigned to the new peer.
        peer: PeerId,
        /// Remote address of the peer.
        addr: SocketAddr,
    },
    /// A complete inbound message arrived from a connected peer.
    ///
    /// The transport guarantees that a `Connected` event for the same peer
    /// was surfaced earlier, and that payloads from one peer arrive in the
    /// order the peer sent them.
    Received {
        /// Sender of the payload.
        peer: PeerId,
        /// Raw message bytes, already de-framed.
        payload: Vec<u8>,
    },
    /// A peer's connection ended, either side's initiative.
    Disconnected {
        /// The retired peer identity.
        peer: PeerId,
    },
}

/// Errors raised while establishing a transport endpoint.
///
/// Binding failures are fatal to server startup and are not retried here.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be created on the requested address.
    #[error("failed to bind {addr}: {source}")]
    BindFailure {
        /// Address that could not be bound.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Capability set of a bound network endpoint.
///
/// Binding itself is a constructor on each concrete transport, since the
/// parameters differ per medium. All trait methods are non-blocking: `poll`
/// returns only what is already available, and `send` enqueues without
/// waiting for transmission.
pub trait Transport: Send {
    /// Drain the currently available events, in arrival order.
    ///
    /// Returns an empty batch when nothing happened since the last call.
    fn poll(&mut self) -> Vec<TransportEvent>;

    /// Enqueue one framed message for the given peer.
    ///
    /// Messages for one peer are delivered in the order they were enqueued.
    /// Sending to a retired peer is a silent no-op.
    fn send(&mut self, peer: PeerId, frame: Vec<u8>);

    /// Force transmission of any data queued by [`Transport::send`].
    fn flush(&mut self);

    /// Close one peer's connection, transmitting its queued data first.
    fn disconnect(&mut self, peer: PeerId);

    /// Release the endpoint: gracefully disconnect every peer, flush their
    /// pending data, then stop accepting. After this call the transport
    /// surfaces no further events.
    fn shutdown(&mut self);
}
