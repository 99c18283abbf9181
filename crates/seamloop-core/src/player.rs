//! Gapless loop player — two handles, one hand-off per loop.
//!
//! The current handle plays while the next one sits prepared as its
//! seamless successor. When the backend reports the current handle's end of
//! stream, the advance worker releases it, promotes the successor, and
//! primes a fresh one. Handles live in a 2-slot array indexed by `current`.
//!
//! Every public operation and every advance runs under the same state lock.
//! Lock order: loop state, then backend internals.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{CompletionSink, Handle, HandleId, LoopEvent, MediaBackend, Resource};
use crate::config::PlayerConfig;
use crate::error::{LoopError, Result};
use crate::models::{LoopCommand, LoopStatus};

pub struct LoopPlayer {
    backend: Arc<dyn MediaBackend>,
    shared: Arc<Shared>,
    events: SyncSender<LoopEvent>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    state: Mutex<LoopState>,
    /// Signalled after every processed loop boundary and on close.
    advanced: Condvar,
}

struct LoopState {
    resource: Resource,
    slots: [Option<Handle>; 2],
    current: usize,
    volume: f32,
    speed: f32,
    speed_increment: f32,
    muted: bool,
    loops: u64,
    closed: bool,
    fault: Option<String>,
}

impl LoopState {
    fn next_slot(&self) -> usize {
        1 - self.current
    }

    fn current_handle(&self) -> Option<&Handle> {
        self.slots[self.current].as_ref()
    }

    fn next_handle(&self) -> Option<&Handle> {
        self.slots[self.next_slot()].as_ref()
    }

    fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            return Err(LoopError::Closed);
        }
        if let Some(fault) = &self.fault {
            return Err(LoopError::Faulted(fault.clone()));
        }
        Ok(())
    }
}

impl LoopPlayer {
    /// Loop `resource` on the native audio output.
    #[cfg(feature = "native")]
    pub fn create(resource: Resource) -> Result<Self> {
        let backend = crate::backend::native::NativeBackend::new()?;
        Self::new(Arc::new(backend), resource)
    }

    /// Loop `resource` on a custom backend with default settings.
    pub fn new(backend: Arc<dyn MediaBackend>, resource: Resource) -> Result<Self> {
        Self::with_config(backend, resource, &PlayerConfig::default())
    }

    /// Create both handles and spawn the advance worker.
    ///
    /// The current handle is primed with the configured volume and speed but
    /// not started. Creation failures are returned as-is; nothing is leaked.
    pub fn with_config(
        backend: Arc<dyn MediaBackend>,
        resource: Resource,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::sync_channel(config.event_capacity.max(1));

        let mut state = LoopState {
            resource,
            slots: [None, None],
            current: 0,
            volume: config.volume,
            speed: config.speed,
            speed_increment: config.speed_increment,
            muted: config.muted,
            loops: 0,
            closed: false,
            fault: None,
        };

        let first = backend.create(&state.resource)?;
        backend.set_volume(&first, state.effective_volume());
        backend.set_speed(&first, state.speed);
        state.slots[0] = Some(first);

        if let Err(e) = prime_next(&*backend, &mut state, &tx) {
            if let Some(h) = state.slots[0].take() {
                backend.release(h);
            }
            return Err(e);
        }

        log::debug!("seamloop: created loop player for {}", state.resource);

        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            advanced: Condvar::new(),
        });

        let worker = spawn_worker(Arc::clone(&backend), Arc::clone(&shared), tx.clone(), rx);

        Ok(Self {
            backend,
            shared,
            events: tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Start or resume the current handle. No-op if already playing.
    pub fn start(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_usable()?;
        self.catch_up(&mut state);
        if let Some(h) = state.current_handle() {
            if !self.backend.is_playing(h) {
                self.backend.start(h);
            }
        }
        Ok(())
    }

    /// Pause the audible handle. Also allowed on a faulted player, whose
    /// last loop may still be playing.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(LoopError::Closed);
        }
        self.catch_up(&mut state);
        if let Some(h) = state.current_handle() {
            self.backend.pause(h);
        }
        Ok(())
    }

    /// Set volume on both handles. Persists across loop boundaries.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_usable()?;
        state.volume = volume;
        self.apply_volume(&state);
        Ok(())
    }

    pub fn multiply_volume(&self, ratio: f32) -> Result<()> {
        let volume = self.shared.state.lock().volume * ratio;
        self.set_volume(volume)
    }

    /// Mute or unmute, keeping the stored volume for unmute.
    pub fn set_muted(&self, muted: bool) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_usable()?;
        state.muted = muted;
        self.apply_volume(&state);
        Ok(())
    }

    /// Set the speed used from the next loop boundary on.
    pub fn set_playback_speed(&self, speed: f32) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_usable()?;
        state.speed = speed;
        Ok(())
    }

    /// Add `increment` to the speed at every loop boundary. 0 disables.
    pub fn set_auto_advance_speed_increment(&self, increment: f32) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_usable()?;
        state.speed_increment = increment;
        Ok(())
    }

    /// Add the configured increment to the speed once, right now.
    pub fn increment_speed(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.ensure_usable()?;
        let increment = state.speed_increment;
        state.speed += increment;
        Ok(())
    }

    pub fn is_playing(&self) -> bool {
        let state = self.shared.state.lock();
        state
            .current_handle()
            .map(|h| self.backend.is_playing(h))
            .unwrap_or(false)
    }

    pub fn status(&self) -> LoopStatus {
        let state = self.shared.state.lock();
        LoopStatus {
            resource: state.resource.to_string(),
            playing: state
                .current_handle()
                .map(|h| self.backend.is_playing(h))
                .unwrap_or(false),
            volume: state.volume,
            speed: state.speed,
            speed_increment: state.speed_increment,
            muted: state.muted,
            loops: state.loops,
            closed: state.closed,
            fault: state.fault.clone(),
        }
    }

    /// Run a command. `Close` closes the player.
    pub fn apply(&self, cmd: LoopCommand) -> Result<()> {
        match cmd {
            LoopCommand::Start => self.start(),
            LoopCommand::Pause => self.pause(),
            LoopCommand::SetVolume { volume } => self.set_volume(volume),
            LoopCommand::SetSpeed { speed } => self.set_playback_speed(speed),
            LoopCommand::SetSpeedIncrement { increment } => {
                self.set_auto_advance_speed_increment(increment)
            }
            LoopCommand::SetMuted { muted } => self.set_muted(muted),
            LoopCommand::IncrementSpeed => self.increment_speed(),
            LoopCommand::Close => {
                self.close();
                Ok(())
            }
        }
    }

    /// Block until `loops` boundaries have been crossed in total.
    ///
    /// Returns false on timeout, or early if the player closes or stops
    /// being able to loop.
    pub fn wait_for_loops(&self, loops: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.loops < loops {
            if state.closed || (state.slots[0].is_none() && state.slots[1].is_none()) {
                return false;
            }
            if self.shared.advanced.wait_until(&mut state, deadline).timed_out() {
                return state.loops >= loops;
            }
        }
        true
    }

    /// Release both handles and stop the advance worker. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.closed {
                state.closed = true;
                for slot in state.slots.iter_mut() {
                    if let Some(h) = slot.take() {
                        self.backend.release(h);
                    }
                }
                log::debug!(
                    "seamloop: closed loop player for {} after {} loops",
                    state.resource,
                    state.loops
                );
            }
            self.shared.advanced.notify_all();
        }

        // Blocking send: the worker is draining, so a full queue frees up.
        let _ = self.events.send(LoopEvent::Shutdown);

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                log::error!("seamloop: advance worker panicked");
            }
        }
    }

    /// Process boundaries the backend has crossed but the worker has not
    /// handled yet. Their queued events become stale and are ignored.
    fn catch_up(&self, state: &mut LoopState) {
        loop {
            let finished = match state.current_handle() {
                Some(h) if self.backend.has_completed(h) => h.id(),
                _ => return,
            };
            advance(&*self.backend, state, &self.events, finished);
            self.shared.advanced.notify_all();
        }
    }

    fn apply_volume(&self, state: &LoopState) {
        let volume = state.effective_volume();
        if let Some(h) = state.current_handle() {
            self.backend.set_volume(h, volume);
        }
        if let Some(h) = state.next_handle() {
            self.backend.set_volume(h, volume);
        }
    }
}

impl Drop for LoopPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_worker(
    backend: Arc<dyn MediaBackend>,
    shared: Arc<Shared>,
    tx: SyncSender<LoopEvent>,
    rx: Receiver<LoopEvent>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for event in rx.iter() {
            match event {
                LoopEvent::Completed(id) => {
                    let mut state = shared.state.lock();
                    advance(&*backend, &mut state, &tx, id);
                    shared.advanced.notify_all();
                }
                LoopEvent::Shutdown => break,
            }
        }
    })
}

/// Create the successor, queue it behind current, and watch current.
fn prime_next(backend: &dyn MediaBackend, state: &mut LoopState, tx: &SyncSender<LoopEvent>) -> Result<()> {
    // Watch current first so a failed create still reports its end.
    if let Some(current) = state.current_handle() {
        backend.on_completion(current, CompletionSink::new(tx.clone()));
    }

    let next = backend.create(&state.resource)?;
    backend.set_volume(&next, state.effective_volume());
    if let Some(current) = state.current_handle() {
        backend.set_next(current, &next);
    }

    let slot = state.next_slot();
    state.slots[slot] = Some(next);
    Ok(())
}

/// Hand off from the finished handle `finished` to its successor.
fn advance(backend: &dyn MediaBackend, state: &mut LoopState, tx: &SyncSender<LoopEvent>, finished: HandleId) {
    if state.closed {
        log::debug!("seamloop: ignoring completion of {} after close", finished);
        return;
    }
    if state.current_handle().map(Handle::id) != Some(finished) {
        log::debug!("seamloop: ignoring stale completion of handle {}", finished);
        return;
    }

    let current = state.current;
    if let Some(done) = state.slots[current].take() {
        backend.release(done);
    }
    state.current = state.next_slot();
    state.loops += 1;

    if state.current_handle().is_none() {
        // Priming already failed; nothing left to promote.
        log::warn!("seamloop: {} stopped after {} loops", state.resource, state.loops);
        return;
    }

    if state.speed_increment > 0.0 {
        state.speed += state.speed_increment;
    }
    if let Some(h) = state.current_handle() {
        backend.set_volume(h, state.effective_volume());
        backend.set_speed(h, state.speed);
    }
    log::debug!(
        "seamloop: loop {} of {} at speed {}",
        state.loops,
        state.resource,
        state.speed
    );

    if let Err(e) = prime_next(backend, state, tx) {
        log::error!("seamloop: failed to prime next loop of {}: {}", state.resource, e);
        state.fault = Some(e.to_string());
    }
}
