//! Security event monitoring
//!
//! [`SecurityMonitor`] keeps a bounded, in-memory ledger of security events
//! and a per-identifier record of suspicious activity. Emission is throttled
//! per `(identifier, event type)` so a single noisy client cannot flood the
//! ledger or the logs. High and critical events are forwarded to an
//! [`AlertDispatcher`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use catalog_admin_core::{
    AlertDispatcher, SecurityEvent, SecurityEventSink, SecurityEventType, Severity,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::rate_limit::{RateLimitConfig, RateLimiter};
use crate::observability::metrics::SecurityMetrics;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Ring buffer capacity; the oldest event is evicted first
    pub max_events: usize,
    /// Events and idle actors older than this are purged
    pub retention_secs: u64,
    /// Per `(identifier, type)` emission cap
    pub throttle: RateLimitConfig,
    /// Occurrences at which an actor is reported as suspicious
    pub suspicious_threshold: u64,
    /// Most recent event types kept per actor
    pub max_recent_types: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_events: 10_000,
            retention_secs: 24 * 60 * 60,
            throttle: RateLimitConfig::new(10, Duration::from_secs(60)),
            suspicious_threshold: 5,
            max_recent_types: 100,
        }
    }
}

impl MonitorConfig {
    pub fn retention(&self) -> chrono::Duration {
        // Capped at roughly a century to keep date arithmetic in range
        chrono::Duration::seconds(self.retention_secs.min(3_155_760_000) as i64)
    }
}

/// Accumulated activity for one source identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuspiciousActor {
    pub identifier: String,
    pub occurrence_count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Distinct types, least recently seen first
    pub recent_event_types: VecDeque<SecurityEventType>,
}

impl SuspiciousActor {
    fn new(identifier: &str, at: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            occurrence_count: 0,
            first_seen: at,
            last_seen: at,
            recent_event_types: VecDeque::new(),
        }
    }

    fn observe(&mut self, event_type: SecurityEventType, at: DateTime<Utc>, max_types: usize) {
        self.occurrence_count += 1;
        if at > self.last_seen {
            self.last_seen = at;
        }

        if let Some(pos) = self.recent_event_types.iter().position(|t| *t == event_type) {
            self.recent_event_types.remove(pos);
        }
        self.recent_event_types.push_back(event_type);
        while self.recent_event_types.len() > max_types {
            self.recent_event_types.pop_front();
        }
    }
}

/// Aggregate view returned by [`SecurityMonitor::metrics`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorMetrics {
    pub total_events: usize,
    pub by_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub last_hour: usize,
    pub dropped_events: u64,
    pub tracked_actors: usize,
    pub suspicious_actors: usize,
}

/// What a purge pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub events_removed: usize,
    pub actors_removed: usize,
    pub throttle_buckets_removed: usize,
}

/// Default alert dispatcher: writes alerts to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertDispatcher;

impl AlertDispatcher for LogAlertDispatcher {
    fn dispatch(&self, event: &SecurityEvent) {
        match event.severity {
            Severity::Critical => error!(
                event_type = %event.event_type,
                client = %event.source_identifier,
                method = %event.method,
                path = %event.url,
                details = ?event.details,
                "SECURITY ALERT"
            ),
            _ => warn!(
                event_type = %event.event_type,
                client = %event.source_identifier,
                method = %event.method,
                path = %event.url,
                details = ?event.details,
                "Security alert"
            ),
        }
    }
}

/// In-memory security event ledger and suspicious-actor tracker
pub struct SecurityMonitor {
    config: MonitorConfig,
    events: Mutex<VecDeque<SecurityEvent>>,
    actors: DashMap<String, SuspiciousActor>,
    throttle: RateLimiter,
    alerts: Arc<dyn AlertDispatcher>,
    dropped: AtomicU64,
}

impl std::fmt::Debug for SecurityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityMonitor")
            .field("config", &self.config)
            .field("tracked_actors", &self.actors.len())
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for SecurityMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl SecurityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_dispatcher(config, Arc::new(LogAlertDispatcher))
    }

    pub fn with_dispatcher(config: MonitorConfig, alerts: Arc<dyn AlertDispatcher>) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(config.max_events.min(1024))),
            config,
            actors: DashMap::new(),
            throttle: RateLimiter::new(),
            alerts,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Record an event. Returns `false` when the event was throttled.
    pub fn record(&self, event: SecurityEvent) -> bool {
        let throttle_key = format!("{}:{}", event.source_identifier, event.event_type);
        let throttled = self
            .throttle
            .check_at(
                &throttle_key,
                self.config.throttle.max_requests,
                self.config.throttle.window_ms,
                event.timestamp.timestamp_millis(),
            )
            .is_err();

        if throttled {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            SecurityMetrics::event_throttled(event.event_type);
            debug!(
                event_type = %event.event_type,
                client = %event.source_identifier,
                "Security event throttled"
            );
            return false;
        }

        SecurityMetrics::event_recorded(event.event_type, event.severity);
        self.track_actor(&event);
        self.evict_idle_actors(event.timestamp - self.config.retention());

        if event.severity.is_alerting() {
            self.alerts.dispatch(&event);
            SecurityMetrics::alert_dispatched(event.severity);
        }

        let mut events = self.lock_events();
        while self.config.max_events > 0 && events.len() >= self.config.max_events {
            events.pop_front();
        }
        if self.config.max_events > 0 {
            events.push_back(event);
        }

        true
    }

    fn track_actor(&self, event: &SecurityEvent) {
        let mut actor = self
            .actors
            .entry(event.source_identifier.clone())
            .or_insert_with(|| SuspiciousActor::new(&event.source_identifier, event.timestamp));
        actor.observe(event.event_type, event.timestamp, self.config.max_recent_types);
    }

    fn evict_idle_actors(&self, horizon: DateTime<Utc>) -> usize {
        let before = self.actors.len();
        self.actors.retain(|_, actor| actor.last_seen >= horizon);
        before.saturating_sub(self.actors.len())
    }

    fn lock_events(&self) -> MutexGuard<'_, VecDeque<SecurityEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Newest-first events, optionally filtered by severity and type
    pub fn recent_events(
        &self,
        limit: usize,
        severity: Option<Severity>,
        event_type: Option<SecurityEventType>,
    ) -> Vec<SecurityEvent> {
        self.lock_events()
            .iter()
            .rev()
            .filter(|e| severity.map_or(true, |s| e.severity == s))
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Actors at or above the suspicious threshold, most active first
    pub fn suspicious_identifiers(&self) -> Vec<SuspiciousActor> {
        let mut actors: Vec<SuspiciousActor> = self
            .actors
            .iter()
            .filter(|entry| entry.occurrence_count >= self.config.suspicious_threshold)
            .map(|entry| entry.value().clone())
            .collect();

        actors.sort_by(|a, b| {
            b.occurrence_count
                .cmp(&a.occurrence_count)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        actors
    }

    pub fn actor(&self, identifier: &str) -> Option<SuspiciousActor> {
        self.actors.get(identifier).map(|entry| entry.value().clone())
    }

    pub fn metrics(&self) -> MonitorMetrics {
        self.metrics_at(Utc::now())
    }

    pub fn metrics_at(&self, now: DateTime<Utc>) -> MonitorMetrics {
        let hour_ago = now - chrono::Duration::hours(1);
        let mut by_type = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        let mut last_hour = 0;

        let events = self.lock_events();
        for event in events.iter() {
            *by_type.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
            *by_severity.entry(event.severity.as_str().to_string()).or_insert(0) += 1;
            if event.timestamp >= hour_ago {
                last_hour += 1;
            }
        }
        let total_events = events.len();
        drop(events);

        let suspicious_actors = self
            .actors
            .iter()
            .filter(|entry| entry.occurrence_count >= self.config.suspicious_threshold)
            .count();
        SecurityMetrics::set_suspicious_actors(suspicious_actors);

        MonitorMetrics {
            total_events,
            by_type,
            by_severity,
            last_hour,
            dropped_events: self.dropped.load(Ordering::Relaxed),
            tracked_actors: self.actors.len(),
            suspicious_actors,
        }
    }

    /// Drop events and idle actors beyond the retention horizon
    pub fn purge_expired(&self) -> PurgeReport {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> PurgeReport {
        let horizon = now - self.config.retention();

        let events_removed = {
            let mut events = self.lock_events();
            let before = events.len();
            events.retain(|e| e.timestamp >= horizon);
            before - events.len()
        };
        let actors_removed = self.evict_idle_actors(horizon);
        let throttle_buckets_removed = self.throttle.sweep_expired_at(now.timestamp_millis());

        debug!(
            events_removed,
            actors_removed, throttle_buckets_removed, "Security monitor purge complete"
        );

        PurgeReport {
            events_removed,
            actors_removed,
            throttle_buckets_removed,
        }
    }
}

impl SecurityEventSink for SecurityMonitor {
    fn record(&self, event: SecurityEvent) {
        SecurityMonitor::record(self, event);
    }
}
