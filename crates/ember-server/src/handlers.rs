//! Message handlers for the lobby and chat services.
//!
//! The lobby service answers pings and performs login, handing each client
//! an account id. The chat service admits clients that present their id,
//! then relays validated chat lines to everyone and announces joins and
//! leaves. Type ids live in disjoint ranges per service so a client talking
//! to the wrong port fails loudly instead of half-working.

use std::sync::atomic::{AtomicU32, Ordering};

use ember_net::{
    ConnectionId, ConnectionRegistry, HandlerContext, HandlerError, HandlerOutcome,
    MessageHandler, MessageReader, MessageWriter, SessionHooks, SessionServer, Transport,
};
use tracing::info;

/// Lobby service message types (client to server on even ids).
pub mod lobby_msg {
    /// Latency probe carrying an opaque `u32` token.
    pub const PING: u16 = 0x0010;
    /// Probe answer echoing the token.
    pub const PONG: u16 = 0x0011;
    /// Login request carrying the account name.
    pub const LOGIN: u16 = 0x0012;
    /// Login answer: `u8` status, then the account id on success.
    pub const LOGIN_RESPONSE: u16 = 0x0013;
}

/// Chat service message types.
pub mod chat_msg {
    /// Admission request carrying the account id from login.
    pub const JOIN: u16 = 0x0400;
    /// Admission answer: `u8` status.
    pub const JOIN_RESPONSE: u16 = 0x0401;
    /// A chat line from a client.
    pub const SAY: u16 = 0x0402;
    /// A relayed chat line: speaker id, then the text.
    pub const MESSAGE: u16 = 0x0403;
    /// Presence announcement: `u8` (1 join, 0 leave), then the account id.
    pub const NOTICE: u16 = 0x0404;
}

/// Response status codes shared by both services.
pub mod status {
    pub const OK: u8 = 0;
    pub const INVALID: u8 = 1;
}

const MAX_CHAT_LEN: usize = 500;

/// Answers pings with a pong echoing the probe token.
struct PingHandler;

impl MessageHandler for PingHandler {
    fn receive(
        &self,
        ctx: &mut HandlerContext<'_>,
        msg: &mut MessageReader<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let token = msg.read_u32()?;
        ctx.reply(MessageWriter::new(lobby_msg::PONG).write_u32(token));
        Ok(HandlerOutcome::Continue)
    }
}

/// Assigns account ids at login.
struct LoginHandler {
    next_account: AtomicU32,
}

impl LoginHandler {
    fn new() -> Self {
        Self {
            next_account: AtomicU32::new(1),
        }
    }
}

impl MessageHandler for LoginHandler {
    fn receive(
        &self,
        ctx: &mut HandlerContext<'_>,
        msg: &mut MessageReader<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        if ctx.identity().is_some() {
            return Err(HandlerError::Rejected("already logged in".into()));
        }
        let name = msg.read_string()?;
        if name.is_empty() {
            ctx.reply(MessageWriter::new(lobby_msg::LOGIN_RESPONSE).write_u8(status::INVALID));
            return Ok(HandlerOutcome::Continue);
        }
        let account = self.next_account.fetch_add(1, Ordering::Relaxed);
        ctx.set_identity(Some(account as u64));
        info!(connection = ?ctx.connection(), account, name = %name, "login");
        ctx.reply(
            MessageWriter::new(lobby_msg::LOGIN_RESPONSE)
                .write_u8(status::OK)
                .write_u32(account),
        );
        Ok(HandlerOutcome::Continue)
    }
}

/// Admits clients to the chat service.
///
/// The id a client presents comes from the lobby login; cross-service
/// validation runs out of band and is not this handler's concern.
struct JoinHandler;

impl MessageHandler for JoinHandler {
    fn receive(
        &self,
        ctx: &mut HandlerContext<'_>,
        msg: &mut MessageReader<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let account = msg.read_u32()?;
        if account == 0 || ctx.identity().is_some() {
            ctx.reply(MessageWriter::new(chat_msg::JOIN_RESPONSE).write_u8(status::INVALID));
            return Ok(HandlerOutcome::Continue);
        }
        ctx.set_identity(Some(account as u64));
        ctx.reply(MessageWriter::new(chat_msg::JOIN_RESPONSE).write_u8(status::OK));
        ctx.broadcast(
            MessageWriter::new(chat_msg::NOTICE)
                .write_u8(1)
                .write_u32(account),
        );
        Ok(HandlerOutcome::Continue)
    }
}

/// Validates and relays chat lines.
struct SayHandler;

impl MessageHandler for SayHandler {
    fn receive(
        &self,
        ctx: &mut HandlerContext<'_>,
        msg: &mut MessageReader<'_>,
    ) -> Result<HandlerOutcome, HandlerError> {
        let Some(account) = ctx.identity() else {
            return Err(HandlerError::Rejected("chat before join".into()));
        };
        let text = msg.read_string()?;
        if text == "/quit" {
            return Ok(HandlerOutcome::Disconnect);
        }
        if text.is_empty() {
            return Err(HandlerError::Rejected("empty chat line".into()));
        }
        if text.chars().count() > MAX_CHAT_LEN {
            return Err(HandlerError::Rejected("chat line too long".into()));
        }
        ctx.broadcast(
            MessageWriter::new(chat_msg::MESSAGE)
                .write_u32(account as u32)
                .write_string(&text),
        );
        Ok(HandlerOutcome::Continue)
    }
}

/// Announces departures to the remaining chatters.
pub struct ChatPresenceHooks;

impl SessionHooks for ChatPresenceHooks {
    fn on_disconnect(
        &mut self,
        id: ConnectionId,
        peers: &mut ConnectionRegistry,
    ) {
        let Some(account) = peers.get(id).and_then(|c| c.identity()) else {
            return;
        };
        peers.send_to_all(
            MessageWriter::new(chat_msg::NOTICE)
                .write_u8(0)
                .write_u32(account as u32),
        );
    }
}

/// Wire up the lobby service.
pub fn register_lobby<T: Transport>(server: &mut SessionServer<T>) {
    server.register(lobby_msg::PING, PingHandler);
    server.register(lobby_msg::LOGIN, LoginHandler::new());
}

/// Wire up the chat service.
pub fn register_chat<T: Transport>(server: &mut SessionServer<T>) {
    server.register(chat_msg::JOIN, JoinHandler);
    server.register(chat_msg::SAY, SayHandler);
    server.set_hooks(ChatPresenceHooks);
}
