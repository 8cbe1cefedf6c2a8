//! Runtime for executing conversation turns
//!
//! One inbound event is one turn: load state, transition, execute effects,
//! persist. Turns of the same session are serialized.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{ConversationRuntime, TurnError};
pub use traits::*;

use crate::backend::{LoggingBackend, StrapiClient};
use crate::transport::TelegramTransport;

/// Runtime wired to the production store, backend and transport
pub type ProductionRuntime =
    ConversationRuntime<DatabaseStorage, LoggingBackend<StrapiClient>, TelegramTransport>;
