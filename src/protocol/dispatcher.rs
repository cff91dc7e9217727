use crate::core::frame::Frame;
use crate::core::opcode::Opcode;
use crate::error::{ProtocolError, Result};
use crate::protocol::session::SessionContext;
use std::collections::HashMap;
use std::fmt;

/// Frames a handler wants sent back, in order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Reply {
    #[default]
    None,
    Single(Frame),
    Multiple(Vec<Frame>),
}

impl Reply {
    pub fn into_frames(self) -> Vec<Frame> {
        match self {
            Reply::None => Vec::new(),
            Reply::Single(frame) => vec![frame],
            Reply::Multiple(frames) => frames,
        }
    }
}

/// Game-side packet handler. Receives the decrypted inner payload.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, ctx: &mut SessionContext, payload: &[u8]) -> Result<Reply>;
}

impl<F> MessageHandler for F
where
    F: Fn(&mut SessionContext, &[u8]) -> Result<Reply> + Send + Sync,
{
    fn handle(&self, ctx: &mut SessionContext, payload: &[u8]) -> Result<Reply> {
        self(ctx, payload)
    }
}

/// Collects handlers at startup; [`build`](Self::build) freezes the table.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<Opcode, Box<dyn MessageHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one opcode.
    ///
    /// Handshake and envelope opcodes belong to the session and cannot be
    /// overridden. Registering the same opcode twice is an error.
    pub fn register<H>(mut self, opcode: Opcode, handler: H) -> Result<Self>
    where
        H: MessageHandler + 'static,
    {
        if opcode.is_handshake() || opcode.is_envelope() {
            return Err(ProtocolError::ConfigError(format!(
                "opcode {opcode} is reserved for the session"
            )));
        }
        if self.handlers.contains_key(&opcode) {
            return Err(ProtocolError::ConfigError(format!(
                "opcode {opcode} registered twice"
            )));
        }
        self.handlers.insert(opcode, Box::new(handler));
        Ok(self)
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Immutable opcode → handler table, shared by every connection.
pub struct Dispatcher {
    handlers: HashMap<Opcode, Box<dyn MessageHandler>>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut opcodes: Vec<_> = self.handlers.keys().copied().collect();
        opcodes.sort_by_key(|op| op.as_u16());
        f.debug_struct("Dispatcher").field("opcodes", &opcodes).finish()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        DispatcherBuilder::new().build()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn handles(&self, opcode: u16) -> bool {
        Opcode::from_u16(opcode).is_some_and(|op| self.handlers.contains_key(&op))
    }

    /// Route one inner frame to its handler.
    ///
    /// # Errors
    /// `UnknownOpcode` when the opcode is outside the known set or has no handler.
    pub fn dispatch(&self, opcode: u16, ctx: &mut SessionContext, payload: &[u8]) -> Result<Reply> {
        Opcode::from_u16(opcode)
            .and_then(|op| self.handlers.get(&op))
            .ok_or(ProtocolError::UnknownOpcode(opcode))
            .and_then(|handler| handler.handle(ctx, payload))
    }
}
