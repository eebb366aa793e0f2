//! Actor metrics and mailbox monitoring.
//!
//! Provides mailbox depth monitoring with per-actor-type thresholds:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Room       | < 100  | 100-500 | > 500    |
//! | Connection | < 50   | 50-200  | > 200    |
//!
//! Prometheus metrics are emitted with the `rc_` prefix.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for room actors.
pub const ROOM_MAILBOX_NORMAL: usize = 100;
pub const ROOM_MAILBOX_WARNING: usize = 500;

/// Mailbox depth thresholds for connection actors.
pub const CONNECTION_MAILBOX_NORMAL: usize = 50;
pub const CONNECTION_MAILBOX_WARNING: usize = 200;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `RoomDirectoryActor` (singleton).
    Directory,
    /// `RoomActor` (one per room).
    Room,
    /// `ConnectionActor` (one per client connection).
    Connection,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Directory => "directory",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    /// Returns the warning threshold for this actor type.
    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            // The directory mailbox uses room thresholds
            ActorType::Directory | ActorType::Room => ROOM_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }

    /// Returns the normal threshold for this actor type.
    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Directory | ActorType::Room => ROOM_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Actor type for labeling.
    actor_type: ActorType,
    /// Actor identifier (room id, connection id, controller id).
    actor_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Peak mailbox depth.
    peak_depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    /// Create a new mailbox monitor for the given actor.
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && new_depth == self.actor_type.normal_threshold()
        {
            // Log once when crossing the warning threshold
            debug!(
                target: "rc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current mailbox depth.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Get the peak mailbox depth.
    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    /// Get the total messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth >= self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Point-in-time counts for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rooms: u64,
    pub connections: u64,
    pub producers: u64,
    pub consumers: u64,
}

/// Shared counters across the actor hierarchy.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    rooms_active: AtomicU64,
    connections_active: AtomicU64,
    producers_active: AtomicU64,
    consumers_active: AtomicU64,
    messages_processed: AtomicU64,
    panics: AtomicU64,
}

impl ActorMetrics {
    /// Create new shared metrics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        self.rooms_active.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("rc_rooms_active").increment(1.0);
        metrics::counter!("rc_rooms_created_total").increment(1);
    }

    pub fn room_removed(&self) {
        self.rooms_active.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("rc_rooms_active").decrement(1.0);
    }

    pub fn connection_created(&self) {
        self.connections_active.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!("rc_connections_active").increment(1.0);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!("rc_connections_active").decrement(1.0);
    }

    pub fn producer_created(&self) {
        self.producers_active.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rc_producers_created_total").increment(1);
    }

    pub fn producer_closed(&self) {
        self.producers_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn consumer_created(&self) {
        self.consumers_active.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rc_consumers_created_total").increment(1);
    }

    pub fn consumer_closed(&self) {
        self.consumers_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_message_processed(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rc_actor_messages_total").increment(1);
    }

    /// Record an actor panic (detected via its `JoinHandle`).
    pub fn record_panic(&self, actor_type: ActorType) {
        self.panics.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("rc_actor_panics_total", "actor_type" => actor_type.as_str())
            .increment(1);
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        usize::try_from(self.connections_active.load(Ordering::Relaxed)).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    /// Current counts for heartbeat/status reporting.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rooms: self.rooms_active.load(Ordering::Relaxed),
            connections: self.connections_active.load(Ordering::Relaxed),
            producers: self.producers_active.load(Ordering::Relaxed),
            consumers: self.consumers_active.load(Ordering::Relaxed),
        }
    }
}
