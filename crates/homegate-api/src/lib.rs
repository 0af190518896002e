//! Protocol types for homegated IPC
//!
//! This crate defines the stable API between homegated and its clients
//! (the presence monitor, the foreground-app monitor, and admin tools):
//! - Commands (requests from clients)
//! - Responses
//! - Events (service -> clients)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
