//! TCP implementation of [`Transport`].
//!
//! The transport runs three kinds of tokio tasks behind a synchronous
//! facade: one accept loop per listener, plus a reader and a writer task per
//! client. Every task reports through a single unbounded channel of
//! [`Bridge`] values, which [`TcpTransport::poll`] drains without blocking.
//! Because the accept loop pushes `Connected` onto that channel before it
//! spawns the peer's reader, a `Received` can never surface ahead of its
//! `Connected`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::framing::{self, FrameError};
use crate::socket::{self, SocketOptions};
use crate::transport::{PeerId, Transport, TransportError, TransportEvent};

/// Tuning knobs for a TCP endpoint.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Simultaneous client limit; connections beyond it are refused.
    pub max_connections: usize,
    /// Largest message payload accepted or produced, in bytes.
    pub max_frame_payload: u32,
    /// Per-stream socket options.
    pub socket: SocketOptions,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            max_frame_payload: 64 * 1024,
            socket: SocketOptions::default(),
        }
    }
}

/// Raw reports from the background tasks, translated by `poll`.
enum Bridge {
    Connected {
        peer: PeerId,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        close: watch::Sender<bool>,
    },
    Received {
        peer: PeerId,
        payload: Vec<u8>,
    },
    Disconnected {
        peer: PeerId,
    },
}

/// Handles for steering one live client from the facade side.
struct PeerHandle {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    close: watch::Sender<bool>,
}

/// A bound TCP listener with per-client reader and writer tasks.
pub struct TcpTransport {
    local_addr: SocketAddr,
    bridge: mpsc::UnboundedReceiver<Bridge>,
    peers: HashMap<PeerId, PeerHandle>,
    accept_shutdown: watch::Sender<bool>,
}

impl TcpTransport {
    /// Bind a listener on `addr` and start accepting clients.
    ///
    /// Must be called from within a tokio runtime. A bind failure is fatal
    /// to the caller; no retry happens here.
    pub async fn bind(addr: SocketAddr, config: TcpConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::BindFailure { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| TransportError::BindFailure { addr, source })?;

        let (bridge_tx, bridge_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(listener, bridge_tx, shutdown_rx, config));

        info!(addr = %local_addr, "listening for clients");
        Ok(Self {
            local_addr,
            bridge: bridge_rx,
            peers: HashMap::new(),
            accept_shutdown: shutdown_tx,
        })
    }

    /// The address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of clients currently tracked by the facade.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl Transport for TcpTransport {
    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(report) = self.bridge.try_recv() {
            match report {
                Bridge::Connected {
                    peer,
                    addr,
                    outbound,
                    close,
                } => {
                    self.peers.insert(peer, PeerHandle { outbound, close });
                    events.push(TransportEvent::Connected { peer, addr });
                }
                Bridge::Received { peer, payload } => {
                    events.push(TransportEvent::Received { peer, payload });
                }
                Bridge::Disconnected { peer } => {
                    self.peers.remove(&peer);
                    events.push(TransportEvent::Disconnected { peer });
                }
            }
        }
        events
    }

    fn send(&mut self, peer: PeerId, frame: Vec<u8>) {
        if let Some(handle) = self.peers.get(&peer) {
            // Only fails when the writer task already died; the reader will
            // report the disconnect shortly.
            let _ = handle.outbound.send(frame);
        }
    }

    fn flush(&mut self) {
        // Writer tasks transmit as soon as frames reach them; there is no
        // facade-side buffer to push out.
    }

    fn disconnect(&mut self, peer: PeerId) {
        if let Some(handle) = self.peers.remove(&peer) {
            let _ = handle.close.send(true);
            // Dropping `outbound` lets the writer drain what is queued and
            // then send FIN.
            drop(handle);
        }
    }

    fn shutdown(&mut self) {
        let _ = self.accept_shutdown.send(true);
        for (_, handle) in self.peers.drain() {
            let _ = handle.close.send(true);
        }
        self.bridge.close();
    }
}

async fn accept_loop(
    listener: TcpListener,
    bridge: mpsc::UnboundedSender<Bridge>,
    mut shutdown: watch::Receiver<bool>,
    config: TcpConfig,
) {
    let live = Arc::new(AtomicUsize::new(0));
    let mut next_peer = 1u64;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                if live.load(Ordering::Relaxed) >= config.max_connections {
                    warn!(%addr, limit = config.max_connections, "connection limit reached, refusing client");
                    drop(stream);
                    continue;
                }
                let peer = PeerId(next_peer);
                next_peer += 1;
                live.fetch_add(1, Ordering::Relaxed);
                spawn_client(stream, addr, peer, &bridge, Arc::clone(&live), &config);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("accept loop stopping");
                    return;
                }
            }
        }
    }
}

fn spawn_client(
    stream: TcpStream,
    addr: SocketAddr,
    peer: PeerId,
    bridge: &mpsc::UnboundedSender<Bridge>,
    live: Arc<AtomicUsize>,
    config: &TcpConfig,
) {
    if let Err(e) = socket::configure_stream(&stream, &config.socket) {
        warn!(%addr, error = %e, "failed to configure client socket");
    }

    let (reader, writer) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = watch::channel(false);

    // Surfacing Connected before the reader task exists pins the event
    // order: no payload from this peer can get ahead of it.
    if bridge
        .send(Bridge::Connected {
            peer,
            addr,
            outbound: outbound_tx,
            close: close_tx,
        })
        .is_err()
    {
        live.fetch_sub(1, Ordering::Relaxed);
        return;
    }
    debug!(?peer, %addr, "client connected");

    let max_payload = config.max_frame_payload;
    tokio::spawn(write_loop(writer, outbound_rx, peer, max_payload));

    let bridge = bridge.clone();
    tokio::spawn(async move {
        read_loop(reader, peer, &bridge, close_rx, max_payload).await;
        let _ = bridge.send(Bridge::Disconnected { peer });
        live.fetch_sub(1, Ordering::Relaxed);
        debug!(?peer, "client reader finished");
    });
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    peer: PeerId,
    bridge: &mpsc::UnboundedSender<Bridge>,
    mut close: watch::Receiver<bool>,
    max_payload: u32,
) {
    loop {
        tokio::select! {
            frame = framing::read_frame(&mut reader, max_payload) => {
                match frame {
                    Ok(payload) => {
                        if bridge.send(Bridge::Received { peer, payload }).is_err() {
                            return;
                        }
                    }
                    Err(FrameError::Closed) => return,
                    Err(e) => {
                        warn!(?peer, error = %e, "dropping client on frame error");
                        return;
                    }
                }
            }
            changed = close.changed() => {
                if changed.is_err() || *close.borrow() {
                    return;
                }
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    peer: PeerId,
    max_payload: u32,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = framing::write_frame(&mut writer, &frame, max_payload).await {
            debug!(?peer, error = %e, "write failed, closing client");
            return;
        }
    }
    // Channel closed: everything queued went out, finish with FIN.
    let _ = writer.shutdown().await;
}
