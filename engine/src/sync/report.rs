//! What a sync pass did.

use crate::model::{EntityKind, LocalId, ServerId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Push results for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushCounts {
    pub created: usize,
    pub updated: usize,
    /// Waiting for their owner's server id
    pub deferred: usize,
}

impl PushCounts {
    pub fn pushed(&self) -> usize {
        self.created + self.updated
    }
}

/// Pull results for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullCounts {
    pub inserted: usize,
    pub refreshed: usize,
    /// Never-pushed local records that took the server's id for their slot
    pub adopted: usize,
    /// Server versions ignored because the local twin has an unpushed edit
    pub kept_local: usize,
    pub skipped: usize,
}

impl PullCounts {
    pub fn pulled(&self) -> usize {
        self.inserted + self.refreshed + self.adopted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Push,
    Pull,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Push => "push",
            Self::Pull => "pull",
        })
    }
}

/// A per-record problem. The record was left as it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIssue {
    pub kind: EntityKind,
    pub phase: SyncPhase,
    pub local_id: Option<LocalId>,
    pub server_id: Option<ServerId>,
    pub message: String,
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.phase, self.kind)?;
        if let Some(local_id) = self.local_id {
            write!(f, " #{local_id}")?;
        }
        if let Some(server_id) = &self.server_id {
            write!(f, " ({server_id})")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Summary of a completed pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub pushed: BTreeMap<EntityKind, PushCounts>,
    pub pulled: BTreeMap<EntityKind, PullCounts>,
    pub issues: Vec<SyncIssue>,
    /// The server became unreachable part-way; later records were not attempted
    pub cut_short: bool,
}

impl SyncReport {
    pub(crate) fn new() -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            pushed: BTreeMap::new(),
            pulled: BTreeMap::new(),
            issues: Vec::new(),
            cut_short: false,
        }
    }

    pub(crate) fn push_counts(&mut self, kind: EntityKind) -> &mut PushCounts {
        self.pushed.entry(kind).or_default()
    }

    pub(crate) fn pull_counts(&mut self, kind: EntityKind) -> &mut PullCounts {
        self.pulled.entry(kind).or_default()
    }

    pub(crate) fn issue(
        &mut self,
        kind: EntityKind,
        phase: SyncPhase,
        local_id: Option<LocalId>,
        server_id: Option<ServerId>,
        message: impl Into<String>,
    ) {
        let issue = SyncIssue {
            kind,
            phase,
            local_id,
            server_id,
            message: message.into(),
        };
        tracing::warn!(%issue, "sync issue");
        self.issues.push(issue);
    }

    pub fn pushed_total(&self) -> usize {
        self.pushed.values().map(PushCounts::pushed).sum()
    }

    pub fn deferred_total(&self) -> usize {
        self.pushed.values().map(|c| c.deferred).sum()
    }

    pub fn pulled_total(&self) -> usize {
        self.pulled.values().map(PullCounts::pulled).sum()
    }

    /// Nothing was pushed, nothing was pulled and nothing went wrong.
    pub fn is_noop(&self) -> bool {
        self.pushed_total() == 0 && self.pulled_total() == 0 && self.issues.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && !self.cut_short
    }
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

/// How a call to [`SyncEngine::sync_all`](super::SyncEngine::sync_all) ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    /// The device (or the server) was unreachable; nothing was attempted.
    Offline,
    /// Another pass was in flight; this call did nothing.
    AlreadyRunning,
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Offline | Self::AlreadyRunning => None,
        }
    }

    pub fn into_report(self) -> Option<SyncReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::Offline | Self::AlreadyRunning => None,
        }
    }
}
