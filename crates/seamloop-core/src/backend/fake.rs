//! Deterministic backend for tests.
//!
//! Time only moves when [`FakeBackend::advance`] is called. Handles follow
//! the usual media player state diagram: prepared, started, paused,
//! completed, released. A completing handle starts its successor at the same
//! instant, then notifies its completion sink.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{CompletionSink, Handle, HandleId, MediaBackend, Resource};
use crate::error::{LoopError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeState {
    Prepared,
    Started,
    Paused,
    Completed,
    Released,
}

/// Observable state of one fake handle.
#[derive(Debug, Clone)]
pub struct FakePlayer {
    pub resource: Resource,
    pub state: FakeState,
    pub volume: f32,
    pub speed: f32,
    pub next: Option<HandleId>,
    /// Media time left before completion; reset when the handle completes.
    pub remaining_ms: u64,
    /// Clock time at which the current run started.
    pub started_at: Option<u64>,
    sink: Option<CompletionSink>,
}

#[derive(Default)]
struct FakeInner {
    now_ms: u64,
    players: HashMap<HandleId, FakePlayer>,
    missing: HashSet<Resource>,
    created: u64,
    released: u64,
    misuse: u64,
    /// Creations left before every create fails, if limited.
    create_budget: Option<u64>,
}

pub struct FakeBackend {
    duration_ms: u64,
    next_id: AtomicU64,
    inner: Mutex<FakeInner>,
}

impl FakeBackend {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            next_id: AtomicU64::new(1),
            inner: Mutex::new(FakeInner::default()),
        }
    }

    /// Make `create` fail for this resource.
    pub fn mark_missing(&self, resource: &Resource) {
        self.inner.lock().missing.insert(resource.clone());
    }

    /// Allow `n` more successful creations, then fail every create.
    pub fn limit_creations(&self, n: u64) {
        self.inner.lock().create_budget = Some(n);
    }

    /// Move the clock forward, completing handles whose time runs out.
    pub fn advance(&self, ms: u64) {
        let mut notifications = Vec::new();
        {
            let mut inner = self.inner.lock();
            let target = inner.now_ms + ms;

            loop {
                let due = inner
                    .players
                    .iter()
                    .filter(|(_, p)| p.state == FakeState::Started)
                    .filter_map(|(id, p)| p.started_at.map(|t| (*id, t + p.remaining_ms)))
                    .filter(|(_, end)| *end <= target)
                    .min_by_key(|(id, end)| (*end, *id));
                let Some((id, end)) = due else { break };

                inner.now_ms = end;
                let (next, sink) = {
                    let Some(p) = inner.players.get_mut(&id) else { break };
                    p.state = FakeState::Completed;
                    p.started_at = None;
                    p.remaining_ms = self.duration_ms;
                    (p.next, p.sink.clone())
                };

                if let Some(next_id) = next {
                    if let Some(n) = inner.players.get_mut(&next_id) {
                        if matches!(n.state, FakeState::Prepared | FakeState::Paused) {
                            n.state = FakeState::Started;
                            n.started_at = Some(end);
                        }
                    }
                }
                if let Some(sink) = sink {
                    notifications.push((sink, id));
                }
            }

            inner.now_ms = target;
        }

        for (sink, id) in notifications {
            sink.notify(id);
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.lock().now_ms
    }

    pub fn player(&self, id: HandleId) -> Option<FakePlayer> {
        self.inner.lock().players.get(&id).cloned()
    }

    /// Ids of handles currently started.
    pub fn playing(&self) -> Vec<HandleId> {
        let mut ids: Vec<_> = self
            .inner
            .lock()
            .players
            .iter()
            .filter(|(_, p)| p.state == FakeState::Started)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Ids of handles not yet released.
    pub fn live(&self) -> Vec<HandleId> {
        let mut ids: Vec<_> = self
            .inner
            .lock()
            .players
            .iter()
            .filter(|(_, p)| p.state != FakeState::Released)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn created(&self) -> u64 {
        self.inner.lock().created
    }

    pub fn released(&self) -> u64 {
        self.inner.lock().released
    }

    /// Calls made on released or unknown handles.
    pub fn misuse(&self) -> u64 {
        self.inner.lock().misuse
    }

    fn with_player(&self, handle: &Handle, op: &str, f: impl FnOnce(&mut FakePlayer, u64)) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.players.get_mut(&handle.id()) {
            Some(p) if p.state != FakeState::Released => f(p, inner.now_ms),
            _ => {
                log::warn!("seamloop: fake {} on dead handle {}", op, handle.id());
                inner.misuse += 1;
            }
        }
    }
}

impl MediaBackend for FakeBackend {
    fn create(&self, resource: &Resource) -> Result<Handle> {
        let mut inner = self.inner.lock();
        if inner.missing.contains(resource) {
            return Err(LoopError::ResourceNotFound(resource.path().to_path_buf()));
        }
        if let Some(budget) = inner.create_budget.as_mut() {
            if *budget == 0 {
                return Err(LoopError::Decode("decoder exhausted".into()));
            }
            *budget -= 1;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        inner.players.insert(
            id,
            FakePlayer {
                resource: resource.clone(),
                state: FakeState::Prepared,
                volume: 1.0,
                speed: 1.0,
                next: None,
                remaining_ms: self.duration_ms,
                started_at: None,
                sink: None,
            },
        );
        inner.created += 1;
        Ok(Handle::new(id))
    }

    fn set_volume(&self, handle: &Handle, volume: f32) {
        self.with_player(handle, "set_volume", |p, _| p.volume = volume);
    }

    fn set_speed(&self, handle: &Handle, speed: f32) {
        self.with_player(handle, "set_speed", |p, _| p.speed = speed);
    }

    fn start(&self, handle: &Handle) {
        self.with_player(handle, "start", |p, now| {
            if p.state != FakeState::Started {
                p.state = FakeState::Started;
                p.started_at = Some(now);
            }
        });
    }

    fn pause(&self, handle: &Handle) {
        self.with_player(handle, "pause", |p, now| {
            if p.state == FakeState::Started {
                if let Some(t) = p.started_at.take() {
                    p.remaining_ms = p.remaining_ms.saturating_sub(now - t);
                }
                p.state = FakeState::Paused;
            }
        });
    }

    fn is_playing(&self, handle: &Handle) -> bool {
        let mut playing = false;
        self.with_player(handle, "is_playing", |p, _| playing = p.state == FakeState::Started);
        playing
    }

    fn has_completed(&self, handle: &Handle) -> bool {
        let mut completed = false;
        self.with_player(handle, "has_completed", |p, _| completed = p.state == FakeState::Completed);
        completed
    }

    fn set_next(&self, handle: &Handle, next: &Handle) {
        let next_id = next.id();
        let mut late = false;
        self.with_player(handle, "set_next", |p, _| {
            p.next = Some(next_id);
            late = p.state == FakeState::Completed;
        });
        if late {
            self.start(next);
        }
    }

    fn on_completion(&self, handle: &Handle, sink: CompletionSink) {
        let mut late = None;
        self.with_player(handle, "on_completion", |p, _| {
            if p.state == FakeState::Completed {
                late = Some(sink.clone());
            }
            p.sink = Some(sink);
        });
        if let Some(sink) = late {
            sink.notify(handle.id());
        }
    }

    fn release(&self, handle: Handle) {
        let mut released = false;
        self.with_player(&handle, "release", |p, _| {
            p.state = FakeState::Released;
            p.started_at = None;
            p.next = None;
            p.sink = None;
            released = true;
        });
        if released {
            self.inner.lock().released += 1;
        }
    }
}
