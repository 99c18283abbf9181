//! seamloop-core — gapless looping over double-buffered playback handles.
//!
//! A backend that cannot loop seamlessly can still start a pre-queued
//! successor the instant a stream ends. [`LoopPlayer`] keeps exactly one
//! such successor primed at all times and recycles handles at every loop
//! boundary.
//!
//! # Architecture
//!
//! ```text
//! Layer 0: MediaBackend (native cpal + symphonia, fake for tests)
//! Layer 1: LoopPlayer (2-slot hand-off state machine, advance worker)
//! Layer 2: Hosts (FFI, CLI — commands in, status out)
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod player;

pub use backend::{CompletionSink, Handle, HandleId, LoopEvent, MediaBackend, Resource};
pub use config::PlayerConfig;
pub use error::{LoopError, Result};
pub use models::*;
pub use player::LoopPlayer;
