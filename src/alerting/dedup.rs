use super::AlertSeverity;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DedupRecord {
    pub alert_key: String,
    pub severity: AlertSeverity,
    pub first_seen_at: Instant,
    pub expires_at: Instant,
}

impl DedupRecord {
    fn new(alert_key: &str, severity: AlertSeverity, now: Instant, window: Duration) -> Self {
        Self {
            alert_key: alert_key.to_string(),
            severity,
            first_seen_at: now,
            expires_at: now + window,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Why a signal was let through (or not).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    /// No record for the key.
    New,
    /// A record existed but its window had elapsed.
    Expired,
    /// Severity strictly above the stored one.
    SeverityIncreased { previous: AlertSeverity },
    /// Same or lower severity inside the window.
    Suppressed { stored: AlertSeverity },
    /// Re-raise of an unresolved alert; never suppressed.
    Escalation { previous: Option<AlertSeverity> },
}

impl DedupDecision {
    pub fn should_dispatch(&self) -> bool {
        !matches!(self, DedupDecision::Suppressed { .. })
    }
}

/// Suppresses repeated same-or-lower-severity signals within a window.
///
/// Each key is checked and updated under the map's entry lock, so two
/// concurrent producers cannot both see a duplicate as new.
#[derive(Debug)]
pub struct AlertDeduplicator {
    window: Duration,
    records: DashMap<String, DedupRecord>,
}

impl AlertDeduplicator {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: DashMap::new(),
        }
    }

    pub fn should_dispatch(&self, key: &str, severity: AlertSeverity) -> bool {
        self.evaluate(key, severity).should_dispatch()
    }

    pub fn evaluate(&self, key: &str, severity: AlertSeverity) -> DedupDecision {
        let now = Instant::now();

        match self.records.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(DedupRecord::new(key, severity, now, self.window));
                DedupDecision::New
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    *record = DedupRecord::new(key, severity, now, self.window);
                    DedupDecision::Expired
                } else if severity > record.severity {
                    let previous = record.severity;
                    record.severity = severity;
                    record.expires_at = now + self.window;
                    DedupDecision::SeverityIncreased { previous }
                } else {
                    debug!(alert_key = %key, %severity, stored = %record.severity, "Suppressing duplicate alert");
                    DedupDecision::Suppressed {
                        stored: record.severity,
                    }
                }
            }
        }
    }

    /// Record an escalated re-raise of `key`. Escalations are not subject to
    /// same-tier suppression, but they refresh the record so ordinary repeats
    /// that follow are still deduplicated against the escalated severity.
    pub fn record_escalation(&self, key: &str, severity: AlertSeverity) -> DedupDecision {
        let now = Instant::now();

        match self.records.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(DedupRecord::new(key, severity, now, self.window));
                DedupDecision::Escalation { previous: None }
            }
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                if record.is_expired(now) {
                    *record = DedupRecord::new(key, severity, now, self.window);
                    return DedupDecision::Escalation { previous: None };
                }
                let previous = record.severity;
                record.severity = previous.max(severity);
                record.expires_at = now + self.window;
                DedupDecision::Escalation {
                    previous: Some(previous),
                }
            }
        }
    }

    /// Drop the record for a resolved condition so a recurrence alerts at once.
    pub fn clear(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.records.len())
    }

    /// Live (unexpired) records grouped by stored severity.
    pub fn counts_by_severity(&self) -> BTreeMap<AlertSeverity, usize> {
        let now = Instant::now();
        let mut counts: BTreeMap<AlertSeverity, usize> =
            AlertSeverity::ALL.iter().map(|s| (*s, 0)).collect();
        for record in self.records.iter() {
            if !record.is_expired(now) {
                *counts.entry(record.severity).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn record(&self, key: &str) -> Option<DedupRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
