//! Per-entry refresh state machine and code cache
//!
//! Each visible entry owns one cache slot moving through
//! Idle -> Requesting -> Ready, with Requesting -> Invalid on backend
//! rejection. Regeneration is triggered only by entry mount and by the
//! window-boundary signal; responses are tagged with the window they were
//! issued for and stragglers from an elapsed window are discarded.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::bridge::EntryId;
use crate::error::Error;
use crate::governor::VisibilityState;
use crate::scheduler::clock::EpochTick;

/// Shown before the first code for an entry has arrived.
pub const PENDING_PLACEHOLDER: &str = "------";

/// Fixed sentinel for entries whose secret cannot produce a code.
/// Deliberately non-numeric so it can never collide with a real code.
pub const INVALID_SENTINEL: &str = "!!!!!!";

/// Lifecycle of one entry's cached code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeState {
    /// A regeneration request is issued or queued for a slot
    Pending,
    /// The cached code matches the stamped window
    Ready,
    /// The backend rejected the last request; no retry until the next
    /// window boundary
    Invalid,
}

/// Cached code for a single entry.
#[derive(Debug, Clone)]
pub struct CodeSlot {
    state: CodeState,
    /// Last successfully generated code; retained while re-requesting so
    /// the UI never shows a blank code for a merely queued entry.
    code: Option<String>,
    /// Window the current state was stamped for
    window_id: u64,
}

impl CodeSlot {
    /// Current state of this slot.
    pub fn state(&self) -> CodeState {
        self.state
    }

    /// Window id stamped on the last state change.
    pub fn window_id(&self) -> u64 {
        self.window_id
    }

    /// The string the UI should render for this slot.
    pub fn display_code(&self) -> &str {
        match self.state {
            CodeState::Invalid => INVALID_SENTINEL,
            CodeState::Ready | CodeState::Pending => {
                self.code.as_deref().unwrap_or(PENDING_PLACEHOLDER)
            }
        }
    }

    /// Whether the copy action may use this slot's code.
    pub fn copy_enabled(&self) -> bool {
        self.state != CodeState::Invalid && self.code.is_some()
    }
}

/// A regeneration request the runtime should issue to the backend,
/// tagged with the window it was issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    pub id: EntryId,
    pub window_id: u64,
}

/// Owns the code cache and decides when entries talk to the backend.
#[derive(Default)]
pub struct RefreshCoordinator {
    cache: HashMap<EntryId, CodeSlot>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit newly visible entries.
    ///
    /// Entries without a slot are Idle; while foregrounded they move to
    /// Requesting immediately and the returned batch must be issued.
    /// While backgrounded nothing is admitted; the resume path mounts the
    /// visible set again.
    pub fn mount(
        &mut self,
        visible: &[EntryId],
        tick: EpochTick,
        visibility: VisibilityState,
    ) -> Vec<RefreshRequest> {
        if visibility == VisibilityState::Background {
            return Vec::new();
        }

        let mut requests = Vec::new();
        for id in visible {
            if self.cache.contains_key(id) {
                continue;
            }
            self.cache.insert(
                id.clone(),
                CodeSlot {
                    state: CodeState::Pending,
                    code: None,
                    window_id: tick.window_id,
                },
            );
            requests.push(RefreshRequest {
                id: id.clone(),
                window_id: tick.window_id,
            });
        }

        if !requests.is_empty() {
            debug!("Mounted {} entries for window {}", requests.len(), tick.window_id);
        }
        requests
    }

    /// React to the once-per-window boundary signal.
    ///
    /// All visible entries regenerate together within this one call; no
    /// other tick may produce requests. Slots still Pending for an elapsed
    /// window are re-issued for the new one (their stragglers will be
    /// discarded on arrival).
    pub fn on_boundary(
        &mut self,
        tick: EpochTick,
        visible: &[EntryId],
        visibility: VisibilityState,
    ) -> Vec<RefreshRequest> {
        if visibility == VisibilityState::Background {
            return Vec::new();
        }

        let mut requests = Vec::new();
        for id in visible {
            let request = match self.cache.get_mut(id) {
                Some(slot) => {
                    // Already requested for this window; don't duplicate.
                    if slot.state == CodeState::Pending && slot.window_id == tick.window_id {
                        continue;
                    }
                    slot.state = CodeState::Pending;
                    slot.window_id = tick.window_id;
                    RefreshRequest {
                        id: id.clone(),
                        window_id: tick.window_id,
                    }
                }
                None => {
                    self.cache.insert(
                        id.clone(),
                        CodeSlot {
                            state: CodeState::Pending,
                            code: None,
                            window_id: tick.window_id,
                        },
                    );
                    RefreshRequest {
                        id: id.clone(),
                        window_id: tick.window_id,
                    }
                }
            };
            requests.push(request);
        }

        debug!(
            "Window {} boundary: {} regeneration requests",
            tick.window_id,
            requests.len()
        );
        requests
    }

    /// Record the outcome of a regeneration call.
    ///
    /// Only a response matching the current window may update the cache;
    /// anything else is a straggler and is dropped. Returns whether the
    /// response was accepted.
    pub fn complete(
        &mut self,
        id: &EntryId,
        issued_window: u64,
        current_window: u64,
        outcome: Result<String, Error>,
    ) -> bool {
        if issued_window != current_window {
            debug!(
                "Discarding straggler for {id}: issued for window {issued_window}, now {current_window}"
            );
            return false;
        }

        let Some(slot) = self.cache.get_mut(id) else {
            // Entry vanished (deleted or swept) while the call was in
            // flight; nothing to update.
            debug!("Dropping response for evicted entry {id}");
            return false;
        };

        match outcome {
            Ok(code) => {
                slot.state = CodeState::Ready;
                slot.code = Some(code);
                slot.window_id = issued_window;
            }
            Err(err) => {
                warn!("Code generation failed for {id}: {err}");
                slot.state = CodeState::Invalid;
                slot.window_id = issued_window;
            }
        }
        true
    }

    /// Re-request an entry after a manual edit.
    ///
    /// An Invalid slot normally waits for the next window boundary; an
    /// edit is the other path back to Requesting. Slots in any other
    /// state keep their code, and nothing regenerates while backgrounded.
    pub fn on_edited(
        &mut self,
        id: &EntryId,
        tick: EpochTick,
        visibility: VisibilityState,
    ) -> Option<RefreshRequest> {
        if visibility == VisibilityState::Background {
            return None;
        }

        let slot = self.cache.get_mut(id)?;
        if slot.state != CodeState::Invalid {
            return None;
        }

        slot.state = CodeState::Pending;
        slot.window_id = tick.window_id;
        debug!("Entry {id} edited, retrying within window {}", tick.window_id);
        Some(RefreshRequest {
            id: id.clone(),
            window_id: tick.window_id,
        })
    }

    /// Evict slots whose code is older than one full window. Run once by
    /// the governor when the grace delay elapses in the background.
    pub fn sweep_stale(&mut self, current_window: u64) -> usize {
        let before = self.cache.len();
        self.cache
            .retain(|_, slot| current_window <= slot.window_id + 1);
        let evicted = before - self.cache.len();
        if evicted > 0 {
            debug!("Swept {evicted} stale cache slots");
        }
        evicted
    }

    /// Drop slots for entries no longer in the set, after a full reload.
    pub fn retain_entries(&mut self, ids: &HashSet<EntryId>) {
        self.cache.retain(|id, _| ids.contains(id));
    }

    /// Look up an entry's slot, if one exists.
    pub fn slot(&self, id: &EntryId) -> Option<&CodeSlot> {
        self.cache.get(id)
    }

    /// Number of live cache slots.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
