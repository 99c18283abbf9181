//! Seamloop data models.
//!
//! Commands are a tagged enum so FFI and CLI callers can drive a player
//! with plain JSON. Status is a serializable snapshot, never live state.

pub mod command;
pub mod status;

pub use command::LoopCommand;
pub use status::LoopStatus;
