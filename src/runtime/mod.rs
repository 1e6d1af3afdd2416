//! Runtime assembly
//!
//! One cooperative event loop drives everything: the 1-second interval
//! (gated off while backgrounded), host commands, completed generation
//! calls held in a `FuturesUnordered`, and the grace/debounce deadlines.
//! State never leaves the loop task, so there is no shared-memory race;
//! the only ordering hazard is a straggler backend response, handled by
//! the coordinator's per-window discard rule.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval, sleep_until};

use crate::bridge::{Entry, EntryId, SecretBridge};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::governor::{GovernorEffect, VisibilityGovernor, VisibilityState};
use crate::scheduler::{
    CodeState, ConcurrencyLimiter, EpochClock, EpochTick, PENDING_PLACEHOLDER, RefreshCoordinator,
    RefreshRequest, SystemTimeSource, TimeSource,
};
use crate::view::{ListProjector, SearchDebouncer, Truncation};

/// Depth of the host command channel.
const COMMAND_BUFFER: usize = 64;

/// Countdown threshold below which the UI styles the code as expiring.
const EXPIRING_SECS: u32 = 10;

/// One entry as the UI should render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryView {
    pub id: EntryId,
    pub name: String,
    /// Code, first-render placeholder, or the invalid sentinel
    pub code: String,
    pub state: CodeState,
    /// Whether the copy action is permitted for this entry
    pub copy_enabled: bool,
}

/// Everything the UI needs to render the list, published over a watch
/// channel whenever it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub views: Vec<EntryView>,
    pub truncation: Option<Truncation>,
    pub seconds_remaining: u32,
    pub window_id: u64,
    pub visibility: VisibilityState,
    /// The debounced query currently applied
    pub query: String,
}

impl Snapshot {
    /// Fraction of the current window remaining, for the progress bar.
    pub fn progress(&self) -> f64 {
        f64::from(self.seconds_remaining) / crate::scheduler::WINDOW_SECS as f64
    }

    /// Whether the countdown is in its final stretch.
    pub fn is_expiring(&self) -> bool {
        self.seconds_remaining <= EXPIRING_SECS
    }
}

/// Host commands consumed by the event loop.
enum Command {
    SetVisibility(VisibilityState),
    SearchInput(String),
    Reload(oneshot::Sender<Result<()>>),
    Add {
        name: String,
        secret: String,
        reply: oneshot::Sender<Result<()>>,
    },
    AddFromQr {
        name: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<()>>,
    },
    Rename {
        id: EntryId,
        new_name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Delete {
        id: EntryId,
        reply: oneshot::Sender<Result<()>>,
    },
    CopyCode {
        id: EntryId,
        reply: oneshot::Sender<Option<String>>,
    },
    Shutdown,
}

/// Completed backend generation call, tagged with the window it was
/// issued for.
struct GenerationOutcome {
    id: EntryId,
    window_id: u64,
    result: Result<String>,
}

type GenerationFuture = Pin<Box<dyn Future<Output = GenerationOutcome> + Send>>;

/// Handle to a running OTP runtime.
///
/// Commands go in through the methods here; rendered state comes back on
/// the watch channel from [`snapshots`]. Dropping the handle leaves the
/// loop running until [`shutdown`] or the command channel closes.
///
/// [`snapshots`]: OtpRuntime::snapshots
/// [`shutdown`]: OtpRuntime::shutdown
pub struct OtpRuntime {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Snapshot>,
    task: JoinHandle<()>,
}

impl OtpRuntime {
    /// Start the runtime against a bridge, using the system clock.
    pub fn spawn(bridge: Arc<dyn SecretBridge>, config: RuntimeConfig) -> Self {
        Self::spawn_with_time(bridge, config, Arc::new(SystemTimeSource))
    }

    /// Start the runtime with an explicit time source.
    pub fn spawn_with_time(
        bridge: Arc<dyn SecretBridge>,
        config: RuntimeConfig,
        time: Arc<dyn TimeSource>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        let initial_tick = EpochTick::from_unix(time.now_unix());
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot {
            views: Vec::new(),
            truncation: None,
            seconds_remaining: initial_tick.seconds_remaining,
            window_id: initial_tick.window_id,
            visibility: VisibilityState::Foreground,
            query: String::new(),
        });

        let event_loop = EventLoop {
            limiter: ConcurrencyLimiter::new(config.max_concurrent_generations),
            governor: VisibilityGovernor::new(config.grace_delay()),
            debouncer: SearchDebouncer::new(config.debounce_window()),
            projector: ListProjector::new(
                config.max_visible_foreground,
                config.max_visible_background,
            ),
            clock: EpochClock::new(time),
            coordinator: RefreshCoordinator::new(),
            entries: Vec::new(),
            last_tick: initial_tick,
            generations: FuturesUnordered::new(),
            grace_deadline: None,
            debounce_deadline: None,
            bridge,
            config,
            commands: command_rx,
            snapshots: snapshot_tx,
        };

        let task = tokio::spawn(event_loop.run());

        Self {
            commands: command_tx,
            snapshots: snapshot_rx,
            task,
        }
    }

    /// Subscribe to rendered snapshots.
    pub fn snapshots(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    /// Report a host visibility transition.
    pub async fn set_visibility(&self, visibility: VisibilityState) -> Result<()> {
        self.send(Command::SetVisibility(visibility)).await
    }

    /// Feed a raw search keystroke; the filter applies after the debounce
    /// window.
    pub async fn search(&self, raw: impl Into<String>) -> Result<()> {
        self.send(Command::SearchInput(raw.into())).await
    }

    /// Reload the full entry set from the backend.
    pub async fn reload(&self) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Reload(reply)).await?;
        self.recv(response).await?
    }

    /// Add an entry, then reload.
    pub async fn add_entry(&self, name: impl Into<String>, secret: impl Into<String>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Add {
            name: name.into(),
            secret: secret.into(),
            reply,
        })
        .await?;
        self.recv(response).await?
    }

    /// Decode a QR image into a secret and add an entry with it.
    ///
    /// A decode failure is returned here directly and never touches
    /// scheduler state.
    pub async fn add_entry_from_qr(
        &self,
        name: impl Into<String>,
        image: Vec<u8>,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::AddFromQr {
            name: name.into(),
            image,
            reply,
        })
        .await?;
        self.recv(response).await?
    }

    /// Rename an entry, then reload.
    pub async fn rename_entry(&self, id: EntryId, new_name: impl Into<String>) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Rename {
            id,
            new_name: new_name.into(),
            reply,
        })
        .await?;
        self.recv(response).await?
    }

    /// Delete an entry, then reload.
    pub async fn delete_entry(&self, id: EntryId) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Delete { id, reply }).await?;
        self.recv(response).await?
    }

    /// Fetch an entry's code for the copy action; `None` when copying is
    /// disabled (invalid secret, or no code generated yet).
    pub async fn copy_code(&self, id: EntryId) -> Result<Option<String>> {
        let (reply, response) = oneshot::channel();
        self.send(Command::CopyCode { id, reply }).await?;
        self.recv(response).await
    }

    /// Stop the loop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let _ = self.task.await;
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::RuntimeStopped("command channel closed".to_string()))
    }

    async fn recv<T>(&self, response: oneshot::Receiver<T>) -> Result<T> {
        response
            .await
            .map_err(|_| Error::RuntimeStopped("event loop dropped the reply".to_string()))
    }
}

/// The loop task's private state.
struct EventLoop {
    bridge: Arc<dyn SecretBridge>,
    config: RuntimeConfig,
    clock: EpochClock,
    limiter: ConcurrencyLimiter,
    coordinator: RefreshCoordinator,
    governor: VisibilityGovernor,
    debouncer: SearchDebouncer,
    projector: ListProjector,
    entries: Vec<Entry>,
    last_tick: EpochTick,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<Snapshot>,
    generations: FuturesUnordered<GenerationFuture>,
    grace_deadline: Option<Instant>,
    debounce_deadline: Option<Instant>,
}

impl EventLoop {
    async fn run(mut self) {
        // First observation seeds the boundary detector; mount drives the
        // initial generation, not the clock.
        self.observe_clock();
        if let Err(err) = self.reload_entries().await {
            warn!("Initial entry load failed: {err}");
        }
        self.publish();

        let mut ticker = interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick(), if self.governor.clock_running() => {
                    self.observe_clock();
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(outcome) = self.generations.next(), if !self.generations.is_empty() => {
                    self.coordinator.complete(
                        &outcome.id,
                        outcome.window_id,
                        self.last_tick.window_id,
                        outcome.result,
                    );
                }
                _ = deadline(self.grace_deadline), if self.grace_deadline.is_some() => {
                    self.grace_deadline = None;
                    let effects = self.governor.on_grace_elapsed();
                    self.apply_effects(effects);
                }
                _ = deadline(self.debounce_deadline), if self.debounce_deadline.is_some() => {
                    self.debounce_deadline = None;
                    if self.debouncer.fire().is_some() {
                        // A narrower filter can reveal entries that were
                        // beyond the cap and still need codes.
                        self.mount_visible();
                    }
                }
            }

            self.publish();
        }

        info!("Event loop stopped");
    }

    /// Observe the epoch clock; a window boundary is the sole trigger for
    /// regeneration.
    fn observe_clock(&mut self) {
        let (tick, boundary) = self.clock.observe();
        self.last_tick = tick;

        if boundary {
            let visible = self.visible_ids();
            let requests =
                self.coordinator
                    .on_boundary(tick, &visible, self.governor.visibility());
            self.issue(requests);
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetVisibility(visibility) => {
                let effects = self.governor.on_visibility(visibility);
                self.apply_effects(effects);
            }
            Command::SearchInput(raw) => {
                self.debouncer.input(raw);
                self.debounce_deadline = Some(Instant::now() + self.debouncer.window());
            }
            Command::Reload(reply) => {
                let _ = reply.send(self.reload_entries().await);
            }
            Command::Add {
                name,
                secret,
                reply,
            } => {
                let result = match self.bridge.add_entry(&name, &secret).await {
                    Ok(()) => self.reload_entries().await,
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            Command::AddFromQr { name, image, reply } => {
                let result = match self.bridge.decode_qr_image(&image).await {
                    Ok(secret) => match self.bridge.add_entry(&name, &secret).await {
                        Ok(()) => self.reload_entries().await,
                        Err(err) => Err(err),
                    },
                    // Decode failures belong to the add flow alone.
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            Command::Rename {
                id,
                new_name,
                reply,
            } => {
                let result = match self.bridge.rename_entry(&id, &new_name).await {
                    Ok(()) => {
                        let reloaded = self.reload_entries().await;
                        // An edit is the one path that retries an invalid
                        // entry inside the current window.
                        let retry = self.coordinator.on_edited(
                            &id,
                            self.last_tick,
                            self.governor.visibility(),
                        );
                        self.issue(retry.into_iter().collect());
                        reloaded
                    }
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            Command::Delete { id, reply } => {
                let result = match self.bridge.delete_entry(&id).await {
                    Ok(()) => self.reload_entries().await,
                    Err(err) => Err(err),
                };
                let _ = reply.send(result);
            }
            Command::CopyCode { id, reply } => {
                let code = self
                    .coordinator
                    .slot(&id)
                    .filter(|slot| slot.copy_enabled())
                    .map(|slot| slot.display_code().to_string());
                let _ = reply.send(code);
            }
            Command::Shutdown => {}
        }
    }

    fn apply_effects(&mut self, effects: Vec<GovernorEffect>) {
        for effect in effects {
            match effect {
                GovernorEffect::ArmGrace(delay) => {
                    self.grace_deadline = Some(Instant::now() + delay);
                }
                GovernorEffect::CancelGrace => {
                    self.grace_deadline = None;
                }
                GovernorEffect::EmitSyncTick => {
                    // Resume must not wait for the next interval tick.
                    self.observe_clock();
                    self.mount_visible();
                }
                GovernorEffect::ClearQuery => {
                    self.debouncer.clear();
                    self.debounce_deadline = None;
                }
                GovernorEffect::SweepCache => {
                    self.coordinator.sweep_stale(self.last_tick.window_id);
                }
                GovernorEffect::StopClock => {
                    // The select arm is gated on governor.clock_running().
                }
            }
        }
    }

    /// Replace the entry set wholesale and prune dead cache slots.
    async fn reload_entries(&mut self) -> Result<()> {
        let entries = self.bridge.list_entries().await?;
        info!("Entry set reloaded: {} entries", entries.len());
        self.entries = entries;

        let ids: HashSet<EntryId> = self.entries.iter().map(|e| e.id.clone()).collect();
        self.coordinator.retain_entries(&ids);
        self.mount_visible();
        Ok(())
    }

    /// Admit currently visible entries that have no cache slot yet.
    fn mount_visible(&mut self) {
        let visible = self.visible_ids();
        let requests =
            self.coordinator
                .mount(&visible, self.last_tick, self.governor.visibility());
        self.issue(requests);
    }

    fn visible_ids(&self) -> Vec<EntryId> {
        self.projector
            .project(
                &self.entries,
                self.debouncer.published(),
                self.governor.visibility(),
            )
            .entries
            .into_iter()
            .map(|entry| entry.id)
            .collect()
    }

    /// Turn refresh requests into limiter-gated generation futures.
    fn issue(&mut self, requests: Vec<RefreshRequest>) {
        for RefreshRequest { id, window_id } in requests {
            let limiter = self.limiter.clone();
            let bridge = self.bridge.clone();
            self.generations.push(Box::pin(async move {
                // The slot guard is held across the call and dropped on
                // every exit path, success or failure.
                let result = match limiter.acquire().await {
                    Ok(_slot) => bridge.generate_code(&id).await,
                    Err(err) => Err(err),
                };
                GenerationOutcome {
                    id,
                    window_id,
                    result,
                }
            }));
        }
    }

    fn publish(&self) {
        let projection = self.projector.project(
            &self.entries,
            self.debouncer.published(),
            self.governor.visibility(),
        );

        let views = projection
            .entries
            .iter()
            .map(|entry| match self.coordinator.slot(&entry.id) {
                Some(slot) => EntryView {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    code: slot.display_code().to_string(),
                    state: slot.state(),
                    copy_enabled: slot.copy_enabled(),
                },
                None => EntryView {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    code: PENDING_PLACEHOLDER.to_string(),
                    state: CodeState::Pending,
                    copy_enabled: false,
                },
            })
            .collect();

        let snapshot = Snapshot {
            views,
            truncation: projection.truncation,
            seconds_remaining: self.last_tick.seconds_remaining,
            window_id: self.last_tick.window_id,
            visibility: self.governor.visibility(),
            query: self.debouncer.published().to_string(),
        };

        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Sleep until an optional deadline; pending forever when there is none.
/// Always used behind an `is_some` guard in the select.
async fn deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::MockSecretBridge;
    use crate::scheduler::ManualTimeSource;
    use std::time::Duration;

    fn entry(id: &str, name: &str) -> Entry {
        Entry {
            id: EntryId::new(id),
            name: name.to_string(),
            secret: format!("secret-{id}"),
        }
    }

    async fn wait_for<F>(runtime: &OtpRuntime, predicate: F) -> Snapshot
    where
        F: FnMut(&Snapshot) -> bool,
    {
        let mut snapshots = runtime.snapshots();
        let snapshot = tokio::time::timeout(
            Duration::from_secs(120),
            snapshots.wait_for(predicate),
        )
        .await
        .expect("timed out waiting for snapshot")
        .expect("runtime dropped the snapshot channel");
        snapshot.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_generates_codes_on_mount() {
        let bridge = Arc::new(
            MockSecretBridge::new()
                .with_entries(vec![entry("1", "GitHub"), entry("2", "Discord")])
                .await
                .with_code("1", "111111")
                .await
                .with_code("2", "222222")
                .await,
        );
        let time = Arc::new(ManualTimeSource::new(3000));

        let runtime =
            OtpRuntime::spawn_with_time(bridge.clone(), RuntimeConfig::default(), time);
        runtime.reload().await.unwrap();

        let snapshot = wait_for(&runtime, |s| {
            s.views.len() == 2 && s.views.iter().all(|v| v.state == CodeState::Ready)
        })
        .await;

        assert_eq!(snapshot.views[0].code, "111111");
        assert_eq!(snapshot.views[1].code, "222222");
        assert!(snapshot.views.iter().all(|v| v.copy_enabled));

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_trigger_full_reload() {
        let bridge = Arc::new(
            MockSecretBridge::new()
                .with_entries(vec![entry("1", "GitHub")])
                .await,
        );
        let time = Arc::new(ManualTimeSource::new(3000));

        let runtime =
            OtpRuntime::spawn_with_time(bridge.clone(), RuntimeConfig::default(), time);

        runtime.add_entry("GitLab", "JBSWY3DP").await.unwrap();
        let snapshot = wait_for(&runtime, |s| s.views.len() == 2).await;
        assert_eq!(snapshot.views[1].name, "GitLab");

        runtime
            .rename_entry(EntryId::new("1"), "Codeberg")
            .await
            .unwrap();
        wait_for(&runtime, |s| {
            s.views.first().is_some_and(|v| v.name == "Codeberg")
        })
        .await;

        runtime.delete_entry(EntryId::new("1")).await.unwrap();
        wait_for(&runtime, |s| s.views.len() == 1).await;

        let counts = bridge.call_counts().await;
        // Spawn-time load plus one reload per mutation.
        assert!(counts.list_entries >= 4);

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_decode_failure_never_reaches_scheduler() {
        let bridge = Arc::new(
            MockSecretBridge::new()
                .with_entries(vec![entry("1", "GitHub")])
                .await,
        );
        let time = Arc::new(ManualTimeSource::new(3000));

        let runtime =
            OtpRuntime::spawn_with_time(bridge.clone(), RuntimeConfig::default(), time);
        wait_for(&runtime, |s| s.views.len() == 1).await;

        let result = runtime.add_entry_from_qr("Broken", vec![0u8; 4]).await;
        assert!(result.is_err());

        // No entry was added and the list is untouched.
        let counts = bridge.call_counts().await;
        assert_eq!(counts.add_entry, 0);
        assert_eq!(runtime.current().views.len(), 1);

        runtime.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_copy_code_respects_slot_state() {
        let bridge = Arc::new(
            MockSecretBridge::new()
                .with_entries(vec![entry("1", "GitHub")])
                .await
                .with_code("1", "123456")
                .await,
        );
        let time = Arc::new(ManualTimeSource::new(3000));

        let runtime =
            OtpRuntime::spawn_with_time(bridge.clone(), RuntimeConfig::default(), time);
        wait_for(&runtime, |s| {
            s.views.len() == 1 && s.views[0].state == CodeState::Ready
        })
        .await;

        let code = runtime.copy_code(EntryId::new("1")).await.unwrap();
        assert_eq!(code.as_deref(), Some("123456"));

        let missing = runtime.copy_code(EntryId::new("ghost")).await.unwrap();
        assert!(missing.is_none());

        runtime.shutdown().await;
    }

    #[test]
    fn test_snapshot_view_helpers() {
        let snapshot = Snapshot {
            views: Vec::new(),
            truncation: None,
            seconds_remaining: 30,
            window_id: 0,
            visibility: VisibilityState::Foreground,
            query: String::new(),
        };
        assert!((snapshot.progress() - 1.0).abs() < f64::EPSILON);
        assert!(!snapshot.is_expiring());

        let snapshot = Snapshot {
            seconds_remaining: 10,
            ..snapshot
        };
        assert!(snapshot.is_expiring());
    }
}
