//! Per-client sessions and the registry that owns them.
//!
//! A [`Connection`] exists from the transport's connect event to its
//! disconnect event and is owned exclusively by the [`ConnectionRegistry`].
//! Other code addresses it through its stable [`ConnectionId`]; nothing
//! holds a reference to a `Connection` across ticks, so a destroyed session
//! can never be observed through a dangling handle.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::transport::PeerId;
use crate::wire::MessageWriter;

/// Stable identifier of one session, monotonically assigned and never
/// reused within a registry's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

/// One connected client's session.
pub struct Connection {
    id: ConnectionId,
    peer: PeerId,
    addr: SocketAddr,
    identity: Option<u64>,
    /// Outbound messages enqueued since the last flush, oldest first.
    pending: Vec<Vec<u8>>,
    pending_bytes: usize,
}

impl Connection {
    fn new(id: ConnectionId, peer: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            peer,
            addr,
            identity: None,
            pending: Vec::new(),
            pending_bytes: 0,
        }
    }

    /// Stable session identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Native transport identity of this session's peer.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Remote address the peer connected from.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Application identity attached to this session, if any.
    ///
    /// Opaque to this layer; handlers of the owning server set it (an
    /// account id, typically) and read it back on later messages.
    pub fn identity(&self) -> Option<u64> {
        self.identity
    }

    /// Attach or clear the application identity.
    pub fn set_identity(&mut self, identity: Option<u64>) {
        self.identity = identity;
    }

    /// Number of outbound messages waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Bytes of outbound data waiting for the next flush.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub(crate) fn enqueue(&mut self, frame: Vec<u8>) {
        self.pending_bytes += frame.len();
        self.pending.push(frame);
    }

    pub(crate) fn take_pending(&mut self) -> Vec<Vec<u8>> {
        self.pending_bytes = 0;
        std::mem::take(&mut self.pending)
    }
}

/// Owned table of live sessions.
///
/// Keyed two ways: by [`ConnectionId`] for stable handles and by the
/// transport's [`PeerId`] for O(1) event resolution. Touched only by the
/// thread driving the service loop.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    by_peer: HashMap<PeerId, ConnectionId>,
    next_id: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
            by_peer: HashMap::new(),
            next_id: 1,
        }
    }

    /// Create a session for a newly connected peer.
    pub(crate) fn insert(&mut self, peer: PeerId, addr: SocketAddr) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections.insert(id, Connection::new(id, peer, addr));
        self.by_peer.insert(peer, id);
        id
    }

    /// Destroy a session, returning it for any final bookkeeping.
    ///
    /// The peer index entry is retired before the session itself so no
    /// lookup can observe a half-destroyed session.
    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let peer = self.connections.get(&id)?.peer;
        self.by_peer.remove(&peer);
        self.connections.remove(&id)
    }

    /// Resolve a transport peer to its session, if one is live.
    pub fn resolve(&self, peer: PeerId) -> Option<ConnectionId> {
        self.by_peer.get(&peer).copied()
    }

    /// Look up a session by id.
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Look up a session by id, mutably.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of all live sessions, in no particular order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Iterate over all live sessions.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Enqueue a message on one session's outbound channel.
    ///
    /// Delivery is FIFO per connection once flushed. Returns `false` if the
    /// session no longer exists.
    pub fn send_to_one(&mut self, id: ConnectionId, msg: &MessageWriter) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.enqueue(msg.as_bytes().to_vec());
                true
            }
            None => false,
        }
    }

    /// Enqueue a message on every live session's outbound channel.
    ///
    /// The membership at call time is the snapshot; a session destroyed
    /// before the next flush simply never receives the bytes.
    pub fn send_to_all(&mut self, msg: &MessageWriter) {
        for conn in self.connections.values_mut() {
            conn.enqueue(msg.as_bytes().to_vec());
        }
    }

    /// Take every session's pending outbound messages, paired with the peer
    /// they must be transmitted to.
    pub(crate) fn drain_pending(&mut self) -> Vec<(PeerId, Vec<Vec<u8>>)> {
        self.connections
            .values_mut()
            .filter(|conn| !conn.pending.is_empty())
            .map(|conn| (conn.peer, conn.take_pending()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
