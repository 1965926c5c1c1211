//! The document request pipeline.
//!
//! This module provides:
//! - The phase state machine driving a plugin chain
//! - The plugin contract and the handler objects passed to it
//! - Document stores that run chains and publish results

mod engine;
mod handlers;
#[cfg(test)]
mod integration_tests;
mod phase;
mod plugin;
mod store;

pub use handlers::{EnterHandlers, ExitHandlers, Handlers, ThrowHandlers};
pub use phase::{seek, Cursor, Direction, Event, HookSet, Phase, PhaseTable, Position, Step};
pub use plugin::{factory, Plugin, PluginFactory};
pub use store::{DocumentStore, ListenerId, SendParams};
