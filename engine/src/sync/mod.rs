//! Sync engine: full two-way passes between the store and the server.
//!
//! # Pass
//!
//! 1. Refuse if another pass is running, or if the device is offline.
//! 2. Push every record that was unsynced when the pass began, owners first.
//!    A record whose owner has no server id is deferred to a later pass.
//! 3. Pull every collection, owners first, and merge with
//!    [`plan_pull`](crate::reconcile::plan_pull).
//!
//! Steps 2 and 3 swap with [`SyncOrder::PullFirst`]. Per-record failures are
//! collected as [`SyncIssue`]s and never abort the pass. If the server turns
//! out to be unreachable, the pass stops talking to it; when that happens
//! before any call got through, the outcome is [`SyncOutcome::Offline`].

mod pull;
mod push;
mod report;

pub use report::{PullCounts, PushCounts, SyncIssue, SyncOutcome, SyncPhase, SyncReport};

pub(crate) use push::{PushFailure, Pushed, Pusher};

use crate::config::{EngineConfig, SyncOrder};
use crate::connectivity::{Connectivity, Transition};
use crate::error::{RemoteError, Result};
use crate::model::{Entity, EntityKind, LocalId};
use crate::remote::Remote;
use crate::store::{Filter, Order, Store};
use crate::with_entity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Where the engine is. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Pushing,
    Pulling,
    /// The last pass finished with issues. The next pass leaves this state.
    Failed,
}

/// Snapshot for a sync indicator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub state: SyncState,
    /// Records waiting to reach the server
    pub pending: u64,
    pub last_finished_at: Option<DateTime<Utc>>,
    pub last_issue_count: usize,
}

/// Engine behaviour, usually taken from [`EngineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    pub order: SyncOrder,
    /// Run a pass as soon as [`SyncEngine::spawn_triggers`] is called
    pub sync_on_start: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            order: SyncOrder::PushFirst,
            sync_on_start: true,
        }
    }
}

impl From<&EngineConfig> for SyncOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            order: config.sync_order,
            sync_on_start: config.sync_on_start,
        }
    }
}

pub(crate) struct Inner {
    pub(crate) store: Store,
    pub(crate) remote: Arc<dyn Remote>,
    pub(crate) connectivity: Arc<dyn Connectivity>,
    pub(crate) pusher: Pusher,
    options: SyncOptions,
    running: AtomicBool,
    state: watch::Sender<SyncState>,
    last: Mutex<Option<(DateTime<Utc>, usize)>>,
}

/// Runs full sync passes. Cheap to clone; clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("options", &self.inner.options)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

/// Clears the running flag however the pass ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(
        store: Store,
        remote: Arc<dyn Remote>,
        connectivity: Arc<dyn Connectivity>,
        options: SyncOptions,
    ) -> Self {
        let pusher = Pusher::new(store.clone(), remote.clone());
        let (state, _) = watch::channel(SyncState::Idle);
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                connectivity,
                pusher,
                options,
                running: AtomicBool::new(false),
                state,
                last: Mutex::new(None),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn options(&self) -> SyncOptions {
        self.inner.options
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub async fn status(&self) -> Result<SyncStatus> {
        let pending = self.inner.store.count_unsynced().await?;
        let last = *self.inner.last.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(SyncStatus {
            state: self.state(),
            pending,
            last_finished_at: last.map(|(at, _)| at),
            last_issue_count: last.map_or(0, |(_, issues)| issues),
        })
    }

    /// Run one full pass.
    ///
    /// Returns `Err` only for a local store fault; remote failures end up in
    /// the report.
    pub async fn sync_all(&self) -> Result<SyncOutcome> {
        let Some(_running) = RunningGuard::acquire(&self.inner.running) else {
            info!("sync already running");
            return Ok(SyncOutcome::AlreadyRunning);
        };
        if !self.inner.connectivity.is_online() {
            info!("offline, sync skipped");
            return Ok(SyncOutcome::Offline);
        }

        let mut pass = Pass::new(&self.inner);
        let result = match self.inner.options.order {
            SyncOrder::PushFirst => pass.run(Direction::Push, Direction::Pull).await,
            SyncOrder::PullFirst => pass.run(Direction::Pull, Direction::Push).await,
        };
        if let Err(err) = result {
            error!(error = %err, "sync pass aborted by store fault");
            self.inner.state.send_replace(SyncState::Failed);
            return Err(err);
        }

        if pass.unreachable && !pass.reached_server {
            info!("server unreachable, sync skipped");
            self.inner.state.send_replace(SyncState::Idle);
            return Ok(SyncOutcome::Offline);
        }

        let mut report = pass.report;
        report.cut_short = pass.unreachable;
        report.finished_at = Utc::now();
        *self.inner.last.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((report.finished_at, report.issues.len()));
        self.inner.state.send_replace(if report.is_clean() {
            SyncState::Idle
        } else {
            SyncState::Failed
        });

        info!(
            pushed = report.pushed_total(),
            deferred = report.deferred_total(),
            pulled = report.pulled_total(),
            issues = report.issues.len(),
            cut_short = report.cut_short,
            "sync pass finished"
        );
        Ok(SyncOutcome::Completed(report))
    }

    /// Start the background task that syncs on start-up (when configured)
    /// and whenever connectivity comes back.
    pub fn spawn_triggers(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let mut events = self.inner.connectivity.subscribe();
        tokio::spawn(async move {
            if engine.inner.options.sync_on_start {
                engine.run_triggered("start").await;
            }
            while let Some(transition) = events.next().await {
                if transition == Transition::BecameOnline {
                    engine.run_triggered("reconnect").await;
                }
            }
        })
    }

    async fn run_triggered(&self, trigger: &'static str) {
        match self.sync_all().await {
            Ok(SyncOutcome::Completed(report)) => {
                info!(trigger, issues = report.issues.len(), "triggered sync done");
            }
            Ok(outcome) => info!(trigger, ?outcome, "triggered sync did not run"),
            Err(err) => error!(trigger, error = %err, "triggered sync failed"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Push,
    Pull,
}

/// Working state of one pass.
pub(crate) struct Pass<'a> {
    inner: &'a Inner,
    report: SyncReport,
    /// At least one remote call got an answer
    reached_server: bool,
    /// A remote call failed at the transport level
    unreachable: bool,
}

impl<'a> Pass<'a> {
    fn new(inner: &'a Inner) -> Self {
        Self {
            inner,
            report: SyncReport::new(),
            reached_server: false,
            unreachable: false,
        }
    }

    async fn run(&mut self, first: Direction, second: Direction) -> Result<()> {
        // Records that turn unsynced after this point wait for the next pass.
        let mut pending = BTreeMap::new();
        for kind in EntityKind::ALL {
            let ids = self
                .inner
                .store
                .local_ids(kind, &Filter::new().unsynced(), Order::Oldest)
                .await?;
            pending.insert(kind, ids);
        }

        for direction in [first, second] {
            if self.unreachable {
                break;
            }
            match direction {
                Direction::Push => {
                    self.inner.state.send_replace(SyncState::Pushing);
                    for kind in EntityKind::ALL {
                        let ids = pending.remove(&kind).unwrap_or_default();
                        with_entity!(kind, E => self.push_kind::<E>(ids).await?);
                    }
                }
                Direction::Pull => {
                    self.inner.state.send_replace(SyncState::Pulling);
                    for kind in EntityKind::ALL {
                        if self.unreachable {
                            break;
                        }
                        with_entity!(kind, E => self.pull_kind::<E>().await?);
                    }
                }
            }
        }
        Ok(())
    }

    fn remote_failed(&mut self, err: &RemoteError) {
        if err.is_network() {
            if !self.unreachable {
                warn!(error = %err, "server unreachable, ending pass");
            }
            self.unreachable = true;
        } else {
            self.reached_server = true;
        }
    }

    async fn push_kind<E: Entity>(&mut self, ids: Vec<LocalId>) -> Result<()> {
        for local_id in ids {
            if self.unreachable {
                break;
            }
            match self.inner.pusher.push_one::<E>(local_id).await {
                Ok(Pushed::Created { .. }) => {
                    self.reached_server = true;
                    self.report.push_counts(E::KIND).created += 1;
                }
                Ok(Pushed::Updated { .. }) => {
                    self.reached_server = true;
                    self.report.push_counts(E::KIND).updated += 1;
                }
                Ok(Pushed::Deferred) => self.report.push_counts(E::KIND).deferred += 1,
                Ok(Pushed::Skipped) => {}
                Err(PushFailure::Remote(err)) => {
                    self.remote_failed(&err);
                    if !err.is_network() {
                        self.report.issue(
                            E::KIND,
                            SyncPhase::Push,
                            Some(local_id),
                            None,
                            err.to_string(),
                        );
                    }
                }
                Err(PushFailure::Local(err)) if err.is_domain() => {
                    self.report.issue(
                        E::KIND,
                        SyncPhase::Push,
                        Some(local_id),
                        None,
                        err.to_string(),
                    );
                }
                Err(PushFailure::Local(err)) => return Err(err),
            }
        }
        Ok(())
    }
}
