//! Message dispatch: route each decoded inbound message to one handler.
//!
//! A [`MessageRouter`] maps `u16` type ids to [`MessageHandler`]
//! capabilities. Collaborators register for disjoint id ranges during
//! startup; registration and dispatch share the service-loop thread, so no
//! locking is involved. Exactly one handler runs per inbound message, to
//! completion, before the next event is processed.

use std::collections::HashMap;

use crate::connection::{Connection, ConnectionId, ConnectionRegistry};
use crate::wire::{MessageReader, MessageWriter, WireError};

/// What the handler wants done with the sending connection afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Keep the connection open.
    Continue,
    /// Close the sending connection once the handler returns.
    Disconnect,
}

/// Failure reported by a handler.
///
/// A handler failure never closes the connection and never stops the
/// service loop; it is logged at the dispatch boundary.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The payload did not decode as the handler expected.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Domain-level refusal, described for the log.
    #[error("{0}")]
    Rejected(String),
}

/// Everything a handler may touch while processing one message.
///
/// Lives only for the duration of the dispatch call; handlers that need to
/// refer to a session later store its [`ConnectionId`].
pub struct HandlerContext<'a> {
    connection: ConnectionId,
    /// All live sessions, for replies, broadcasts and identity bookkeeping.
    pub peers: &'a mut ConnectionRegistry,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(connection: ConnectionId, peers: &'a mut ConnectionRegistry) -> Self {
        Self { connection, peers }
    }

    /// Session the message under dispatch arrived on.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Borrow the sending session.
    pub fn sender(&self) -> &Connection {
        // The service loop resolved this id from a live peer one call up.
        self.peers
            .get(self.connection)
            .expect("sender session is live during dispatch")
    }

    /// Application identity of the sending session.
    pub fn identity(&self) -> Option<u64> {
        self.sender().identity()
    }

    /// Attach or clear the sending session's application identity.
    pub fn set_identity(&mut self, identity: Option<u64>) {
        if let Some(conn) = self.peers.get_mut(self.connection) {
            conn.set_identity(identity);
        }
    }

    /// Enqueue a reply to the sending session.
    pub fn reply(&mut self, msg: &MessageWriter) {
        self.peers.send_to_one(self.connection, msg);
    }

    /// Enqueue a message to every live session.
    pub fn broadcast(&mut self, msg: &MessageWriter) {
        self.peers.send_to_all(msg);
    }
}

/// A collaborator that processes messages of one or more registered types.
///
/// May enqueue sends through the context; the actual transmission happens
/// at the end of the tick.
pub trait MessageHandler: Send + Sync {
    /// Process one inbound message.
    fn receive(
        &self,
        ctx: &mut HandlerContext<'_>,
        msg: &mut MessageReader<'_>,
    ) -> Result<HandlerOutcome, HandlerError>;
}

/// Blanket implementation so plain closures can be registered.
impl<F> MessageHandler for F
where
    F: Fn(&mut HandlerContext<'_>, &mut MessageReader<'_>) -> Result<HandlerOutcome, HandlerError>
        + Send
        + Sync,
{
    fn receive(
        &self,
        ctx: &mut HandlerContext<'_>,
        msg: &mut MessageReader<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        self(ctx, msg)
    }
}

/// Dispatch dispositions other than a completed handler run.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Nothing is registered for the message's type id.
    #[error("no handler registered for message type {0:#06x}")]
    NoHandler(u16),

    /// The registered handler reported failure.
    #[error("handler for message type {type_id:#06x} failed: {source}")]
    HandlerFailed {
        /// Type id of the failed message.
        type_id: u16,
        /// The handler's error.
        #[source]
        source: HandlerError,
    },
}

/// Registry of handler capabilities keyed by message type id.
pub struct MessageRouter {
    handlers: HashMap<u16, Box<dyn MessageHandler>>,
}

impl MessageRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for one message type.
    ///
    /// A later registration for the same type id replaces the earlier one.
    /// Must complete before the service loop starts processing traffic for
    /// that type.
    pub fn register<H: MessageHandler + 'static>(&mut self, type_id: u16, handler: H) {
        if self.handlers.insert(type_id, Box::new(handler)).is_some() {
            tracing::debug!(type_id, "handler registration replaced an earlier one");
        }
    }

    /// Route one decoded message to its handler.
    pub fn route(
        &self,
        ctx: &mut HandlerContext<'_>,
        msg: &mut MessageReader<'_>,
    ) -> Result<HandlerOutcome, DispatchError> {
        let type_id = msg.type_id();
        let handler = self
            .handlers
            .get(&type_id)
            .ok_or(DispatchError::NoHandler(type_id))?;
        handler
            .receive(ctx, msg)
            .map_err(|source| DispatchError::HandlerFailed { type_id, source })
    }

    /// Whether a handler is registered for the given type id.
    pub fn is_registered(&self, type_id: u16) -> bool {
        self.handlers.contains_key(&type_id)
    }

    /// Registered type ids, for startup logging.
    pub fn registered_types(&self) -> impl Iterator<Item = u16> + '_ {
        self.handlers.keys().copied()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
