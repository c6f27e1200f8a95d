//! Activity side channel.
//!
//! Activities are write-only progress records for whoever is watching a
//! run (the CLI, a UI). The loop never reads them back. Sinks may be
//! written from several in-flight searches at once, so every sink is
//! append-only and tolerates interleaving.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

// =============================================================================
// ACTIVITY RECORDS
// =============================================================================
/// Which part of the loop produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    Planning,
    Search,
    Summarize,
    Analyze,
    Report,
}

impl ActivityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityCategory::Planning => "planning",
            ActivityCategory::Search => "search",
            ActivityCategory::Summarize => "summarize",
            ActivityCategory::Analyze => "analyze",
            ActivityCategory::Report => "report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Pending,
    Complete,
    Error,
}

/// One observability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub category: ActivityCategory,
    pub status: ActivityStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        category: ActivityCategory,
        status: ActivityStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn pending(category: ActivityCategory, message: impl Into<String>) -> Self {
        Self::new(category, ActivityStatus::Pending, message)
    }

    pub fn complete(category: ActivityCategory, message: impl Into<String>) -> Self {
        Self::new(category, ActivityStatus::Complete, message)
    }

    pub fn error(category: ActivityCategory, message: impl Into<String>) -> Self {
        Self::new(category, ActivityStatus::Error, message)
    }
}

// =============================================================================
// RUN EVENTS
// =============================================================================
/// What a running research loop emits to its caller.
///
/// Exactly one terminal event (`Report` or `Error`) ends every stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Activity(Activity),
    Report(String),
    Error(String),
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Report(_) | RunEvent::Error(_))
    }
}

// =============================================================================
// SINKS
// =============================================================================
/// One-way append of activity records.
///
/// # Rust Concept: Send + Sync Supertraits
///
/// Concurrent searches record through the same `&dyn ActivitySink`, so
/// every implementation must be shareable across tasks. `record` takes
/// `&self`; sinks that keep state use interior mutability.
pub trait ActivitySink: Send + Sync {
    fn record(&self, activity: Activity);
}

/// Forwards activities to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ActivitySink for TracingSink {
    fn record(&self, activity: Activity) {
        match activity.status {
            ActivityStatus::Error => warn!(
                category = activity.category.as_str(),
                message = %activity.message,
                "activity"
            ),
            _ => info!(
                category = activity.category.as_str(),
                status = ?activity.status,
                message = %activity.message,
                "activity"
            ),
        }
    }
}

/// Pushes activities into a run's event stream.
///
/// A dropped receiver means the caller abandoned the run; records are then
/// discarded silently.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RunEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        Self { tx }
    }
}

impl ActivitySink for ChannelSink {
    fn record(&self, activity: Activity) {
        let _ = self.tx.send(RunEvent::Activity(activity));
    }
}

/// Collects activities in memory; handy for tests and post-run inspection.
///
/// # Rust Concept: Recovering a Poisoned Mutex
///
/// A panic while the lock is held poisons it. The records are still
/// valid, so `into_inner()` takes them back instead of panicking again.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Activity>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Activity> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, category: ActivityCategory, status: ActivityStatus) -> usize {
        self.snapshot()
            .iter()
            .filter(|a| a.category == category && a.status == status)
            .count()
    }
}

impl ActivitySink for MemorySink {
    fn record(&self, activity: Activity) {
        match self.records.lock() {
            Ok(mut records) => records.push(activity),
            Err(poisoned) => poisoned.into_inner().push(activity),
        }
    }
}
