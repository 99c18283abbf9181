//! Playback backends.
//!
//! A backend hands out opaque [`Handle`]s, each one a prepared decoder bound
//! to a single resource. The loop player never touches audio itself; it only
//! drives handles through this trait.
//!
//! All methods take `&self`. Backends manage their own concurrency and must
//! never call back into the player while holding an internal lock.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{SyncSender, TrySendError};

use crate::error::Result;

#[cfg(feature = "native")]
pub mod native;

#[cfg(any(test, feature = "testing"))]
pub mod fake;

pub type HandleId = u64;

/// Owned token for one backend playback instance.
///
/// Not `Clone`: [`MediaBackend::release`] consumes it, so a released handle
/// cannot be started or queried again.
#[derive(Debug, PartialEq, Eq)]
pub struct Handle {
    id: HandleId,
}

impl Handle {
    pub fn new(id: HandleId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }
}

/// An audio resource a handle can be bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Resource {
    path: PathBuf,
}

impl Resource {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Events consumed by a loop player's advance worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// The handle reached end of stream.
    Completed(HandleId),
    Shutdown,
}

/// Where a backend reports that a handle finished.
///
/// Delivery never blocks: backends may call `notify` from an audio
/// callback.
#[derive(Clone)]
pub struct CompletionSink {
    tx: SyncSender<LoopEvent>,
}

impl CompletionSink {
    pub fn new(tx: SyncSender<LoopEvent>) -> Self {
        Self { tx }
    }

    pub fn notify(&self, id: HandleId) {
        match self.tx.try_send(LoopEvent::Completed(id)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::warn!("seamloop: event queue full, dropped completion of handle {}", id);
            }
            // Player already closed
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompletionSink")
    }
}

/// Handle-based playback interface the loop player is written against.
pub trait MediaBackend: Send + Sync {
    /// Create a handle bound to `resource` and prepare it for playback.
    fn create(&self, resource: &Resource) -> Result<Handle>;
    fn set_volume(&self, handle: &Handle, volume: f32);
    fn set_speed(&self, handle: &Handle, speed: f32);
    /// Start or resume. Starting a started handle is a no-op.
    fn start(&self, handle: &Handle);
    fn pause(&self, handle: &Handle);
    fn is_playing(&self, handle: &Handle) -> bool;
    /// True once `handle` has played to its end and was not started again.
    fn has_completed(&self, handle: &Handle) -> bool;
    /// Start `next` on the first frame after `handle` reaches end of stream.
    /// If `handle` has already completed, `next` starts right away.
    fn set_next(&self, handle: &Handle, next: &Handle);
    /// Report `handle`'s end of stream to `sink`. Replaces any earlier sink.
    /// If `handle` has already completed, `sink` is notified right away.
    fn on_completion(&self, handle: &Handle, sink: CompletionSink);
    /// Stop and destroy the handle. Pending completion is cancelled.
    fn release(&self, handle: Handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn sink_delivers_completion() {
        let (tx, rx) = mpsc::sync_channel(2);
        let sink = CompletionSink::new(tx);
        sink.notify(7);
        assert_eq!(rx.try_recv(), Ok(LoopEvent::Completed(7)));
    }

    #[test]
    fn sink_drops_when_full() {
        let (tx, rx) = mpsc::sync_channel(1);
        let sink = CompletionSink::new(tx);
        sink.notify(1);
        sink.notify(2);
        assert_eq!(rx.try_recv(), Ok(LoopEvent::Completed(1)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn sink_ignores_closed_receiver() {
        let (tx, rx) = mpsc::sync_channel(1);
        drop(rx);
        CompletionSink::new(tx).notify(3);
    }

    #[test]
    fn resource_displays_path() {
        let r = Resource::from_path("/sounds/loop.ogg");
        assert_eq!(r.to_string(), "/sounds/loop.ogg");
        assert_eq!(r.path(), Path::new("/sounds/loop.ogg"));
    }
}
