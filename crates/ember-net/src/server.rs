//! Single-threaded session service loop.
//!
//! [`SessionServer`] ties the layers together: it drains its [`Transport`]
//! once per game tick, keeps the [`ConnectionRegistry`] in step with the
//! transport's view, decodes each payload and routes it through the
//! [`MessageRouter`], then flushes every session's pending output back to
//! the transport. [`process`](SessionServer::process) never blocks; with no
//! traffic it returns immediately so the owning tick loop keeps its rate.

use tracing::{debug, info, warn};

use crate::bandwidth::{TrafficCounters, TrafficSnapshot};
use crate::connection::{ConnectionId, ConnectionRegistry};
use crate::dispatch::{DispatchError, HandlerContext, HandlerOutcome, MessageHandler, MessageRouter};
use crate::transport::{PeerId, Transport, TransportEvent};
use crate::wire::{MessageReader, MessageWriter, TYPE_ID_LEN};

/// Lifecycle notifications around a session's registry entry.
///
/// `on_connect` runs right after the session is registered and may already
/// send to it; `on_disconnect` runs while the entry is still present, so a
/// farewell broadcast still sees the departing session's state. Neither hook
/// receives the transport; anything they send follows the usual pending
/// queue and goes out at the end of the tick.
pub trait SessionHooks: Send {
    /// A session was just registered.
    fn on_connect(&mut self, _id: ConnectionId, _peers: &mut ConnectionRegistry) {}

    /// A session is about to be removed.
    fn on_disconnect(&mut self, _id: ConnectionId, _peers: &mut ConnectionRegistry) {}
}

/// Default hooks that do nothing.
pub struct NoHooks;

impl SessionHooks for NoHooks {}

/// The session layer over one bound transport endpoint.
pub struct SessionServer<T: Transport> {
    transport: T,
    connections: ConnectionRegistry,
    router: MessageRouter,
    hooks: Box<dyn SessionHooks>,
    stats: TrafficCounters,
    max_pending_bytes: usize,
    shut_down: bool,
}

/// Default cap on one session's un-flushed outbound bytes.
const DEFAULT_MAX_PENDING_BYTES: usize = 1024 * 1024;

impl<T: Transport> SessionServer<T> {
    /// Wrap an already bound transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            connections: ConnectionRegistry::new(),
            router: MessageRouter::new(),
            hooks: Box::new(NoHooks),
            stats: TrafficCounters::new(),
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            shut_down: false,
        }
    }

    /// Install lifecycle hooks, replacing the previous set.
    pub fn set_hooks<H: SessionHooks + 'static>(&mut self, hooks: H) {
        self.hooks = Box::new(hooks);
    }

    /// Cap on one session's un-flushed outbound bytes. A session over the
    /// cap at flush time is forcibly disconnected and its queue discarded.
    pub fn set_max_pending_bytes(&mut self, limit: usize) {
        self.max_pending_bytes = limit;
    }

    /// Register a handler for one message type.
    pub fn register<H: MessageHandler + 'static>(&mut self, type_id: u16, handler: H) {
        self.router.register(type_id, handler);
    }

    /// Run one tick of session work: ingest transport events, dispatch
    /// messages, then flush pending output.
    pub fn process(&mut self) {
        if self.shut_down {
            debug!("process called after shutdown; ignoring");
            return;
        }
        for event in self.transport.poll() {
            match event {
                TransportEvent::Connected { peer, addr } => {
                    let id = self.connections.insert(peer, addr);
                    info!(connection = ?id, %addr, "client connected");
                    self.hooks.on_connect(id, &mut self.connections);
                }
                TransportEvent::Received { peer, payload } => {
                    self.dispatch(peer, payload);
                }
                TransportEvent::Disconnected { peer } => {
                    let Some(id) = self.connections.resolve(peer) else {
                        debug!(?peer, "disconnect event for a peer already torn down");
                        continue;
                    };
                    self.hooks.on_disconnect(id, &mut self.connections);
                    self.connections.remove(id);
                    info!(connection = ?id, "client disconnected");
                }
            }
        }
        self.flush();
    }

    fn dispatch(&mut self, peer: PeerId, payload: Vec<u8>) {
        let Some(id) = self.connections.resolve(peer) else {
            debug!(?peer, bytes = payload.len(), "message from a retired peer; dropped");
            return;
        };
        if payload.len() < TYPE_ID_LEN {
            warn!(connection = ?id, bytes = payload.len(), "message too short to carry a type id; dropped");
            return;
        }
        let mut msg = match MessageReader::parse(&payload) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(connection = ?id, error = %e, "undecodable message; dropped");
                return;
            }
        };
        self.stats.record_receive(msg.type_id(), payload.len());

        let mut ctx = HandlerContext::new(id, &mut self.connections);
        match self.router.route(&mut ctx, &mut msg) {
            Ok(HandlerOutcome::Continue) => {}
            Ok(HandlerOutcome::Disconnect) => {
                debug!(connection = ?id, "handler requested disconnect");
                self.disconnect(id);
            }
            Err(e @ DispatchError::NoHandler(_)) => {
                warn!(connection = ?id, error = %e, "message dropped");
            }
            Err(e) => {
                warn!(connection = ?id, error = %e, "handler failed; connection stays open");
            }
        }
    }

    /// Queue a message for one session. Returns false when the session is
    /// gone.
    pub fn send_to_one(&mut self, id: ConnectionId, msg: &MessageWriter) -> bool {
        self.connections.send_to_one(id, msg)
    }

    /// Queue a message for every currently registered session.
    pub fn send_to_all(&mut self, msg: &MessageWriter) {
        self.connections.send_to_all(msg);
    }

    /// Hand every session's pending output to the transport.
    ///
    /// Runs automatically at the end of [`process`](Self::process); exposed
    /// for callers that queue messages between ticks and want them out now.
    pub fn flush(&mut self) {
        let over_cap: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|conn| conn.pending_bytes() > self.max_pending_bytes)
            .map(|conn| conn.id())
            .collect();
        for id in over_cap {
            warn!(
                connection = ?id,
                limit = self.max_pending_bytes,
                "pending output over cap; dropping connection"
            );
            if let Some(conn) = self.connections.get_mut(id) {
                // Forcible: the over-sized queue is discarded, not sent.
                conn.take_pending();
            }
            self.disconnect(id);
        }
        for (peer, frames) in self.connections.drain_pending() {
            for frame in frames {
                self.stats.record_send(frame.len());
                self.transport.send(peer, frame);
            }
        }
        self.transport.flush();
    }

    /// Close one session from the server side, flushing its pending output
    /// first.
    pub fn disconnect(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(id) else {
            debug!(connection = ?id, "disconnect of an unknown session; ignoring");
            return;
        };
        let peer = conn.peer();
        let pending = conn.take_pending();
        for frame in pending {
            self.stats.record_send(frame.len());
            self.transport.send(peer, frame);
        }
        self.hooks.on_disconnect(id, &mut self.connections);
        self.connections.remove(id);
        self.transport.disconnect(peer);
        info!(connection = ?id, "connection closed by server");
    }

    /// Stop the service: flush everything, tear down every session, release
    /// the transport. Further [`process`](Self::process) calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.flush();
        for id in self.connections.ids() {
            self.hooks.on_disconnect(id, &mut self.connections);
            self.connections.remove(id);
        }
        self.transport.shutdown();
        self.shut_down = true;
        info!("session server shut down");
    }

    /// Traffic totals since the last call, resetting the counters.
    pub fn take_stats(&mut self) -> TrafficSnapshot {
        self.stats.snapshot_and_reset()
    }

    /// Number of live sessions.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Read access to the session registry.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Mutable access to the session registry, for queueing outside dispatch.
    pub fn connections_mut(&mut self) -> &mut ConnectionRegistry {
        &mut self.connections
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::dispatch::{HandlerError, HandlerOutcome};
    use crate::memory::MemoryTransport;
    use crate::transport::PeerId;

    const T_RECORD: u16 = 0x0010;
    const T_FAIL: u16 = 0x0011;
    const T_QUIT: u16 = 0x0012;
    const T_NOTICE: u16 = 0x0020;

    /// Records every invocation it sees.
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<(ConnectionId, Vec<u8>)>>>,
    }

    impl MessageHandler for RecordingHandler {
        fn receive(
            &self,
            ctx: &mut HandlerContext<'_>,
            msg: &mut MessageReader<'_>,
        ) -> Result<HandlerOutcome, HandlerError> {
            self.seen
                .lock()
                .unwrap()
                .push((ctx.connection(), msg.read_remaining().to_vec()));
            Ok(HandlerOutcome::Continue)
        }
    }

    struct FailingHandler;

    impl MessageHandler for FailingHandler {
        fn receive(
            &self,
            _ctx: &mut HandlerContext<'_>,
            _msg: &mut MessageReader<'_>,
        ) -> Result<HandlerOutcome, HandlerError> {
            Err(HandlerError::Rejected("not allowed".into()))
        }
    }

    /// Replies, then asks for the connection to be closed.
    struct QuitHandler;

    impl MessageHandler for QuitHandler {
        fn receive(
            &self,
            ctx: &mut HandlerContext<'_>,
            _msg: &mut MessageReader<'_>,
        ) -> Result<HandlerOutcome, HandlerError> {
            ctx.reply(&MessageWriter::new(T_NOTICE));
            Ok(HandlerOutcome::Disconnect)
        }
    }

    fn server_with_recorder() -> (
        SessionServer<MemoryTransport>,
        Arc<Mutex<Vec<(ConnectionId, Vec<u8>)>>>,
    ) {
        let mut server = SessionServer::new(MemoryTransport::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        server.register(
            T_RECORD,
            RecordingHandler {
                seen: Arc::clone(&seen),
            },
        );
        (server, seen)
    }

    fn message(type_id: u16, body: &[u8]) -> Vec<u8> {
        let mut writer = MessageWriter::new(type_id);
        writer.write_bytes(body);
        writer.into_bytes()
    }

    #[test]
    fn test_message_dispatched_exactly_once_with_payload() {
        let (mut server, seen) = server_with_recorder();
        server.transport_mut().connect_peer(PeerId(1));
        server.transport_mut().deliver(PeerId(1), message(T_RECORD, b"abc"));
        server.process();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, b"abc");
        assert_eq!(server.connection_count(), 1);
    }

    #[test]
    fn test_short_buffer_reaches_neither_handler_nor_registry() {
        let (mut server, seen) = server_with_recorder();
        server.transport_mut().connect_peer(PeerId(1));
        server.process();

        server.transport_mut().deliver(PeerId(1), vec![0x10]);
        server.transport_mut().deliver(PeerId(1), Vec::new());
        server.process();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(server.connection_count(), 1);
    }

    #[test]
    fn test_unhandled_type_leaves_next_tick_unaffected() {
        let (mut server, seen) = server_with_recorder();
        server.transport_mut().connect_peer(PeerId(1));
        server.transport_mut().deliver(PeerId(1), message(0x7fff, b""));
        server.process();
        assert_eq!(server.connection_count(), 1);

        server.transport_mut().deliver(PeerId(1), message(T_RECORD, b"x"));
        server.process();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stale_receive_after_disconnect_is_dropped() {
        let (mut server, seen) = server_with_recorder();
        server.transport_mut().connect_peer(PeerId(1));
        server.transport_mut().drop_peer(PeerId(1));
        server.process();
        assert_eq!(server.connection_count(), 0);

        server.transport_mut().deliver(PeerId(1), message(T_RECORD, b"late"));
        server.process();
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_handler_failure_keeps_connection_open() {
        let (mut server, seen) = server_with_recorder();
        server.register(T_FAIL, FailingHandler);
        server.transport_mut().connect_peer(PeerId(1));
        server.transport_mut().deliver(PeerId(1), message(T_FAIL, b""));
        server.process();
        assert_eq!(server.connection_count(), 1);

        server.transport_mut().deliver(PeerId(1), message(T_RECORD, b"ok"));
        server.process();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_disconnect_outcome_flushes_reply_then_closes() {
        let mut server = SessionServer::new(MemoryTransport::new());
        server.register(T_QUIT, QuitHandler);
        server.transport_mut().connect_peer(PeerId(1));
        server.transport_mut().deliver(PeerId(1), message(T_QUIT, b""));
        server.process();

        assert_eq!(server.connection_count(), 0);
        let transport = server.transport();
        assert_eq!(transport.transmitted(PeerId(1)).len(), 1);
        assert_eq!(transport.kicked_peers(), &[PeerId(1)]);
    }

    #[test]
    fn test_broadcast_skips_session_gone_before_flush() {
        let (mut server, _) = server_with_recorder();
        for n in 1..=3 {
            server.transport_mut().connect_peer(PeerId(n));
        }
        server.process();

        server.send_to_all(&MessageWriter::new(T_NOTICE));
        server.transport_mut().drop_peer(PeerId(3));
        server.process();

        assert_eq!(server.transport().transmitted(PeerId(1)).len(), 1);
        assert_eq!(server.transport().transmitted(PeerId(2)).len(), 1);
        assert!(server.transport().transmitted(PeerId(3)).is_empty());
    }

    #[test]
    fn test_sends_leave_in_queue_order() {
        let (mut server, _) = server_with_recorder();
        server.transport_mut().connect_peer(PeerId(1));
        server.process();

        let id = server.connections().resolve(PeerId(1)).unwrap();
        server.send_to_one(id, MessageWriter::new(T_NOTICE).write_u8(1));
        server.send_to_one(id, MessageWriter::new(T_NOTICE).write_u8(2));
        server.flush();

        let frames = server.transport().transmitted(PeerId(1));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][2], 1);
        assert_eq!(frames[1][2], 2);
    }

    #[test]
    fn test_shutdown_reclaims_sessions_and_transport() {
        let (mut server, _) = server_with_recorder();
        server.transport_mut().connect_peer(PeerId(1));
        server.transport_mut().connect_peer(PeerId(2));
        server.process();
        assert_eq!(server.connection_count(), 2);

        server.shutdown();
        assert_eq!(server.connection_count(), 0);
        assert!(server.transport().is_shut_down());

        // Further ticks are inert.
        server.transport_mut().deliver(PeerId(1), message(T_RECORD, b""));
        server.process();
        assert_eq!(server.connection_count(), 0);
    }

    #[test]
    fn test_session_over_pending_cap_is_dropped_not_served() {
        let (mut server, _) = server_with_recorder();
        server.set_max_pending_bytes(8);
        server.transport_mut().connect_peer(PeerId(1));
        server.process();

        let id = server.connections().resolve(PeerId(1)).unwrap();
        server.send_to_one(id, MessageWriter::new(T_NOTICE).write_bytes(&[0u8; 32]));
        server.flush();

        assert_eq!(server.connection_count(), 0);
        assert!(server.transport().transmitted(PeerId(1)).is_empty());
        assert_eq!(server.transport().kicked_peers(), &[PeerId(1)]);
    }

    struct LoggingHooks {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl SessionHooks for LoggingHooks {
        fn on_connect(&mut self, id: ConnectionId, peers: &mut ConnectionRegistry) {
            let addr = peers.get(id).map(|c| c.addr().to_string());
            self.log
                .lock()
                .unwrap()
                .push(format!("connect {:?} {}", id, addr.as_deref().unwrap_or("?")));
        }

        fn on_disconnect(&mut self, id: ConnectionId, peers: &mut ConnectionRegistry) {
            // The entry must still be present while the hook runs.
            assert!(peers.get(id).is_some());
            self.log.lock().unwrap().push(format!("disconnect {id:?}"));
        }
    }

    #[test]
    fn test_hooks_see_live_registry_entries() {
        let mut server = SessionServer::new(MemoryTransport::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        server.set_hooks(LoggingHooks {
            log: Arc::clone(&log),
        });

        server.transport_mut().connect_peer(PeerId(1));
        server.process();
        server.transport_mut().drop_peer(PeerId(1));
        server.process();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("connect"));
        assert!(log[1].starts_with("disconnect"));
    }

    #[test]
    fn test_stats_count_traffic_both_ways() {
        let (mut server, _) = server_with_recorder();
        server.transport_mut().connect_peer(PeerId(1));
        server.transport_mut().deliver(PeerId(1), message(T_RECORD, b"abcd"));
        server.process();
        server.send_to_all(&MessageWriter::new(T_NOTICE));
        server.flush();

        let snapshot = server.take_stats();
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.bytes_received, 6);
        assert_eq!(snapshot.messages_sent, 1);
        assert_eq!(snapshot.bytes_sent, 2);

        let snapshot = server.take_stats();
        assert_eq!(snapshot.messages_received, 0);
    }
}
