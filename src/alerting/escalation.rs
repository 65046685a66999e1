use super::{AlertDispatcher, AlertSignal};
use crate::monitoring::SentinelMetrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Whether an already-escalated alert may be escalated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationPolicy {
    /// One re-fire per unresolved alert.
    #[default]
    Once,
    /// Re-fire every escalation delay until resolved.
    Repeat,
}

#[derive(Debug)]
struct EscalationTimer {
    scheduled_fire_at: Instant,
    generation: u64,
    cancel: CancellationToken,
}

/// Re-raises unresolved Error/Critical alerts one severity level higher.
///
/// At most one live timer exists per alert key.
#[derive(Debug)]
pub struct EscalationScheduler {
    delay: Duration,
    policy: EscalationPolicy,
    timers: Arc<DashMap<String, EscalationTimer>>,
    generation: AtomicU64,
    metrics: Arc<SentinelMetrics>,
}

impl EscalationScheduler {
    pub fn new(delay: Duration, policy: EscalationPolicy, metrics: Arc<SentinelMetrics>) -> Self {
        Self {
            delay,
            policy,
            timers: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            metrics,
        }
    }

    /// Schedule a delayed re-check for `signal`. Returns false when the signal
    /// is not escalatable or a timer for its key is already live.
    pub fn schedule(&self, signal: &AlertSignal, dispatcher: Weak<AlertDispatcher>) -> bool {
        if !signal.severity.is_escalatable() {
            return false;
        }
        if signal.escalated && self.policy == EscalationPolicy::Once {
            debug!(alert_key = %signal.key, "Alert already escalated once, not rescheduling");
            return false;
        }

        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        match self.timers.entry(signal.key.clone()) {
            Entry::Occupied(_) => {
                debug!(alert_key = %signal.key, "Escalation already scheduled");
                return false;
            }
            Entry::Vacant(vacant) => {
                vacant.insert(EscalationTimer {
                    scheduled_fire_at: Instant::now() + self.delay,
                    generation,
                    cancel: cancel.clone(),
                });
            }
        }
        self.metrics.escalations_pending.set(self.timers.len() as i64);

        let timers = self.timers.clone();
        let metrics = self.metrics.clone();
        let delay = self.delay;
        let signal = signal.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(alert_key = %signal.key, "Escalation timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    // Remove our own entry first so a Repeat policy can reschedule.
                    timers.remove_if(&signal.key, |_, timer| timer.generation == generation);
                    metrics.escalations_pending.set(timers.len() as i64);

                    let Some(dispatcher) = dispatcher.upgrade() else {
                        debug!(alert_key = %signal.key, "Dispatcher gone, dropping escalation");
                        return;
                    };

                    let escalated = signal.escalate(delay.as_millis() as u64);
                    warn!(
                        alert_key = %escalated.key,
                        from = %signal.severity,
                        to = %escalated.severity,
                        "Escalating unresolved alert"
                    );

                    match AssertUnwindSafe(dispatcher.dispatch(escalated))
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) if outcome.is_dispatched() => {
                            metrics.escalations_fired_total.inc();
                        }
                        Ok(_) => {
                            warn!(alert_key = %signal.key, "Escalated alert was not dispatched");
                        }
                        Err(_) => {
                            error!(alert_key = %signal.key, "Escalated dispatch panicked");
                        }
                    }
                }
            }
        });

        true
    }

    /// Cancel the pending escalation for `key`. Safe no-op if none exists.
    pub fn cancel_escalation(&self, key: &str) -> bool {
        match self.timers.remove(key) {
            Some((_, timer)) => {
                timer.cancel.cancel();
                self.metrics.escalations_pending.set(self.timers.len() as i64);
                info!(alert_key = %key, "Cancelled pending escalation");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let keys: Vec<String> = self.timers.iter().map(|t| t.key().clone()).collect();
        keys.iter().filter(|key| self.cancel_escalation(key)).count()
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.timers.contains_key(key)
    }

    pub fn fire_at(&self, key: &str) -> Option<Instant> {
        self.timers.get(key).map(|t| t.scheduled_fire_at)
    }

    pub fn pending_count(&self) -> usize {
        self.timers.len()
    }

    pub fn policy(&self) -> EscalationPolicy {
        self.policy
    }
}
