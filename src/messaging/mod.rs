//! Messaging system for localchat.
//!
//! The core publishes every observable change on a [`MessageBus`]; any
//! number of observers (terminal renderer, logger, tests) subscribe:
//!
//! ```text
//!   ModelTracker ───┐
//!   SessionManager ─┼──► MessageBus ──► TerminalRenderer
//!   Coordinator ────┘        │
//!                            └────────► test harness / logger
//! ```
//!
//! ## Key Components
//!
//! - [`Message`]: UI-agnostic change notifications (model state, turns, generation phase)
//! - [`MessageBus`]: Broadcast channel for pub/sub

mod bus;
mod types;

pub use bus::{BusError, MessageBus, MessageReceiver, MessageSender};
pub use types::*;
