//! Alarm events and per-alert runtime state

use historian_model::AlarmRecord;
use serde::{Deserialize, Serialize};

/// Alarm transition kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmEventKind {
    On,
    Acked,
    Off,
}

impl AlarmEventKind {
    /// Bus action announcing the transition
    pub fn action(&self) -> &'static str {
        match self {
            AlarmEventKind::On => "alerts.alarmOn",
            AlarmEventKind::Acked => "alerts.alarmAcked",
            AlarmEventKind::Off => "alerts.alarmOff",
        }
    }
}

/// One transition of one alert at time `x`
///
/// Serializes to the bus payload `{alertId, x}`; the kind travels as the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEvent {
    #[serde(skip)]
    pub kind: AlarmEventKind,
    pub alert_id: String,
    pub x: i64,
}

impl AlarmEvent {
    pub fn new(kind: AlarmEventKind, alert_id: impl Into<String>, x: i64) -> Self {
        Self {
            kind,
            alert_id: alert_id.into(),
            x,
        }
    }
}

/// Lifecycle phase derived from `AlertState`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertPhase {
    Idle,
    Fired,
    Acked,
}

/// Mutable alert state
///
/// `acked` is only set while `fired` is. `off` remembers the last clearance
/// so replayed points older than it are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertState {
    pub fired: Option<i64>,
    pub acked: Option<i64>,
    pub off: Option<i64>,
}

impl AlertState {
    pub fn phase(&self) -> AlertPhase {
        match (self.fired, self.acked) {
            (None, _) => AlertPhase::Idle,
            (Some(_), None) => AlertPhase::Fired,
            (Some(_), Some(_)) => AlertPhase::Acked,
        }
    }

    /// Seed from the last persisted alarm record
    pub fn from_record(record: Option<&AlarmRecord>) -> Self {
        match record {
            Some(r) if r.is_open() => Self {
                fired: Some(r.fired),
                acked: r.acked,
                off: None,
            },
            Some(r) => Self {
                fired: None,
                acked: None,
                off: r.off,
            },
            None => Self::default(),
        }
    }

    /// Points at or before any recorded transition were already accounted for
    pub fn is_stale(&self, timestamp: i64) -> bool {
        [self.fired, self.acked, self.off]
            .into_iter()
            .flatten()
            .any(|t| timestamp <= t)
    }
}
