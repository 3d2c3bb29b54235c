//! Rate limiting of accepted fall alerts.

use std::time::{Duration, Instant};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// True when no alert has been accepted yet, or the last one is at least
/// `cooldown` old.
pub fn should_alert(now: Instant, last_alert_time: Option<Instant>, cooldown: Duration) -> bool {
    match last_alert_time {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= cooldown,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Accept,
    Suppress { remaining: Duration },
}

impl GateDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, GateDecision::Accept)
    }
}

/// Holds `last_alert_time`. Checking is side-effect free; the caller commits
/// with `record` once the alert has actually been emitted.
#[derive(Clone, Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    last_alert_time: Option<Instant>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_alert_time: None,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_alert_time(&self) -> Option<Instant> {
        self.last_alert_time
    }

    pub fn check(&self, now: Instant) -> GateDecision {
        if should_alert(now, self.last_alert_time, self.cooldown) {
            return GateDecision::Accept;
        }
        let elapsed = self
            .last_alert_time
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or_default();
        GateDecision::Suppress {
            remaining: self.cooldown.saturating_sub(elapsed),
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_alert_time = Some(now);
    }
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
