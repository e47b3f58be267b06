//! Authoritative breakpoint cache
//!
//! The single source of truth for breakpoints and their recorded hits on the
//! client side. Every mutation is applied synchronously and then published as
//! a [`CacheEvent`] carrying only the delta that was applied.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::bus::{EventBus, SubscriptionId};
use crate::model::{Breakpoint, BreakpointId, Hit};

/// Change notification published after every mutation
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Added(Vec<Breakpoint>),
    Removed(Vec<BreakpointId>),
    Hits(Vec<Hit>),
}

#[derive(Default)]
struct CacheState {
    /// Insertion order is display order
    breakpoints: Vec<Breakpoint>,
    hits: HashMap<BreakpointId, Vec<Hit>>,
}

#[derive(Default)]
pub struct BreakpointCache {
    state: Mutex<CacheState>,
    listeners: EventBus<CacheEvent>,
}

impl BreakpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for cache changes
    pub fn on<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.listeners.subscribe(handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Add breakpoints; ids already held are skipped
    pub fn add_breakpoints(&self, breakpoints: Vec<Breakpoint>) -> Vec<Breakpoint> {
        let added = {
            let mut state = self.state();
            let mut added = Vec::with_capacity(breakpoints.len());
            for breakpoint in breakpoints {
                let held = state.breakpoints.iter().any(|b| b.id == breakpoint.id)
                    || added.iter().any(|b: &Breakpoint| b.id == breakpoint.id);
                if held {
                    debug!(breakpoint = breakpoint.id, "Breakpoint already cached");
                    continue;
                }
                added.push(breakpoint);
            }
            state.breakpoints.extend(added.iter().cloned());
            added
        };

        self.listeners.publish(&CacheEvent::Added(added.clone()));
        added
    }

    /// Remove breakpoints and, with them, every hit they recorded
    pub fn remove_breakpoints(&self, ids: &[BreakpointId]) -> Vec<BreakpointId> {
        let removed = {
            let mut state = self.state();
            let mut removed = Vec::new();
            state.breakpoints.retain(|b| {
                let remove = ids.contains(&b.id);
                if remove {
                    removed.push(b.id);
                }
                !remove
            });
            for id in &removed {
                state.hits.remove(id);
            }
            removed
        };

        self.listeners.publish(&CacheEvent::Removed(removed.clone()));
        removed
    }

    /// Record hits.
    ///
    /// A hit whose breakpoint is not held (it was removed while the hit was
    /// in flight) or whose id is already recorded is dropped.
    pub fn add_hits(&self, hits: Vec<Hit>) -> Vec<Hit> {
        let recorded = {
            let mut state = self.state();
            let mut recorded = Vec::with_capacity(hits.len());
            for hit in hits {
                if !state.breakpoints.iter().any(|b| b.id == hit.breakpoint_id) {
                    debug!(
                        breakpoint = hit.breakpoint_id,
                        hit = hit.id,
                        "Dropping hit for unknown breakpoint"
                    );
                    continue;
                }
                let owned = state.hits.entry(hit.breakpoint_id).or_default();
                if owned.iter().any(|h| h.id == hit.id) {
                    debug!(breakpoint = hit.breakpoint_id, hit = hit.id, "Hit already cached");
                    continue;
                }
                owned.push(hit.clone());
                recorded.push(hit);
            }
            recorded
        };

        self.listeners.publish(&CacheEvent::Hits(recorded.clone()));
        recorded
    }

    /// Remove every breakpoint, through the same path as an explicit removal
    pub fn clear(&self) -> Vec<BreakpointId> {
        let ids: Vec<BreakpointId> = self.state().breakpoints.iter().map(|b| b.id).collect();
        self.remove_breakpoints(&ids)
    }

    /// Breakpoints set in `file`, in insertion order
    pub fn get_breakpoints_in_file(&self, file: &str) -> Vec<Breakpoint> {
        self.state()
            .breakpoints
            .iter()
            .filter(|b| b.file == file)
            .cloned()
            .collect()
    }

    pub fn breakpoint_on_line(&self, file: &str, line: u32) -> Option<Breakpoint> {
        self.state()
            .breakpoints
            .iter()
            .find(|b| b.file == file && b.line == line)
            .cloned()
    }

    pub fn breakpoint(&self, id: BreakpointId) -> Option<Breakpoint> {
        self.state().breakpoints.iter().find(|b| b.id == id).cloned()
    }

    pub fn contains(&self, id: BreakpointId) -> bool {
        self.state().breakpoints.iter().any(|b| b.id == id)
    }

    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.state().breakpoints.clone()
    }

    /// Hits recorded for a breakpoint, in arrival order
    pub fn hits(&self, id: BreakpointId) -> Vec<Hit> {
        self.state().hits.get(&id).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.state().breakpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().breakpoints.is_empty()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
