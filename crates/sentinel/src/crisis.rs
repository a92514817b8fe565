//! Crisis broadcast.
//!
//! Publishing is fire-and-forget over a tokio broadcast channel: no lock on
//! the commit path is held, nothing awaits, and an event with no subscribed
//! observer is simply dropped.

use sovledger_core::config::CrisisConfig;
use sovledger_core::event::{CrisisEvent, CrisisStatus};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// Cloneable handle onto the shared crisis channel
#[derive(Debug, Clone)]
pub struct CrisisBroadcaster {
    tx: broadcast::Sender<CrisisEvent>,
    topic: Arc<str>,
    lockdown_severity: f64,
    max_severity: f64,
}

impl CrisisBroadcaster {
    pub fn new(config: &CrisisConfig) -> Self {
        let (tx, _) = broadcast::channel(config.capacity.max(1));
        Self {
            tx,
            topic: Arc::from(config.topic.as_str()),
            lockdown_severity: config.lockdown_severity,
            max_severity: config.max_severity,
        }
    }

    /// Publish a crisis event.
    ///
    /// Severity is capped at the configured maximum; events at or above the
    /// lockdown severity carry `LOCKDOWN`, everything else `CRITICAL`.
    pub fn publish(&self, reason: &str, severity: f64, source: &str) -> CrisisEvent {
        let threat_level = if severity.is_nan() {
            self.max_severity
        } else {
            severity.clamp(0.0, self.max_severity)
        };
        let status = if threat_level >= self.lockdown_severity {
            CrisisStatus::Lockdown
        } else {
            CrisisStatus::Critical
        };

        let event = CrisisEvent::new(status, threat_level, reason, source);
        self.broadcast(event.clone());
        event
    }

    /// Publish at maximum severity
    pub fn emergency_lockdown(&self, reason: &str, source: &str) -> CrisisEvent {
        self.publish(reason, self.max_severity, source)
    }

    /// Send a prepared event to every current observer
    pub fn broadcast(&self, event: CrisisEvent) {
        match event.status {
            CrisisStatus::Lockdown => error!(
                topic = %self.topic,
                cause = %event.cause,
                source = %event.source,
                threat_level = event.threat_level,
                "LOCKDOWN broadcast"
            ),
            CrisisStatus::Critical => warn!(
                topic = %self.topic,
                cause = %event.cause,
                source = %event.source,
                threat_level = event.threat_level,
                "CRITICAL broadcast"
            ),
        }

        if self.tx.send(event).is_err() {
            debug!(topic = %self.topic, "Crisis event dropped, no observers subscribed");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrisisEvent> {
        self.tx.subscribe()
    }

    /// Channel name used by external relays
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for CrisisBroadcaster {
    fn default() -> Self {
        Self::new(&CrisisConfig::default())
    }
}
