//! Session and transport layer: connection registry, binary message codec,
//! handler dispatch, and the tick-driven service loop over a pluggable
//! transport.

pub mod bandwidth;
pub mod connection;
pub mod dispatch;
pub mod framing;
pub mod memory;
pub mod server;
pub mod socket;
pub mod tcp;
pub mod transport;
pub mod wire;

pub use bandwidth::{MessageTypeStats, TrafficCounters, TrafficSnapshot};
pub use connection::{Connection, ConnectionId, ConnectionRegistry};
pub use dispatch::{
    DispatchError, HandlerContext, HandlerError, HandlerOutcome, MessageHandler, MessageRouter,
};
pub use framing::{FrameError, read_frame, write_frame};
pub use memory::MemoryTransport;
pub use server::{NoHooks, SessionHooks, SessionServer};
pub use socket::SocketOptions;
pub use tcp::{TcpConfig, TcpTransport};
pub use transport::{PeerId, Transport, TransportError, TransportEvent};
pub use wire::{MessageReader, MessageWriter, TYPE_ID_LEN, WireError};
