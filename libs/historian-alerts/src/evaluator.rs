//! Threshold alert state machine
//!
//! Alerts are held per id behind their own lock, indexed by parent tag.
//! Points for one tag are evaluated in timestamp order; different tags
//! never share a lock.

use dashmap::DashMap;
use historian_model::{Alert, DataPoint};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::types::{AlarmEvent, AlarmEventKind, AlertState};

struct AlertEntry {
    alert: Alert,
    state: AlertState,
}

/// Bound alerts and their fired/acked state
#[derive(Default)]
pub struct AlertEvaluator {
    alerts: DashMap<String, Arc<Mutex<AlertEntry>>>,
    /// tag id -> alert ids
    by_tag: DashMap<String, Vec<String>>,
}

impl AlertEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, alert_id: &str) -> Option<Arc<Mutex<AlertEntry>>> {
        self.alerts.get(alert_id).map(|e| Arc::clone(e.value()))
    }

    // ========== Binding ==========

    /// Start tracking an alert with a seeded state (replaces a previous binding)
    pub fn bind(&self, alert: Alert, state: AlertState) {
        if let Some(previous) = self.unbind(&alert.id) {
            debug!(alert_id = %previous.id, "Rebinding alert");
        }
        self.by_tag
            .entry(alert.tag_id.clone())
            .or_default()
            .push(alert.id.clone());
        self.alerts.insert(
            alert.id.clone(),
            Arc::new(Mutex::new(AlertEntry { alert, state })),
        );
    }

    /// Stop tracking an alert, returning its metadata
    pub fn unbind(&self, alert_id: &str) -> Option<Alert> {
        let (_, entry) = self.alerts.remove(alert_id)?;
        let alert = entry.lock().alert.clone();

        let now_empty = match self.by_tag.get_mut(&alert.tag_id) {
            Some(mut ids) => {
                ids.retain(|id| id != alert_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_tag.remove_if(&alert.tag_id, |_, ids| ids.is_empty());
        }
        Some(alert)
    }

    /// Refresh alert metadata, keeping runtime state; false if unknown
    pub fn update(&self, alert: Alert) -> bool {
        match self.entry(&alert.id) {
            Some(entry) => {
                entry.lock().alert = alert;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, alert_id: &str) -> bool {
        self.alerts.contains_key(alert_id)
    }

    pub fn alert(&self, alert_id: &str) -> Option<Alert> {
        self.entry(alert_id).map(|e| e.lock().alert.clone())
    }

    pub fn state(&self, alert_id: &str) -> Option<AlertState> {
        self.entry(alert_id).map(|e| e.lock().state)
    }

    pub fn alerts_for_tag(&self, tag_id: &str) -> Vec<String> {
        self.by_tag
            .get(tag_id)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Whether the tag has at least one active alert bound
    pub fn has_active_alerts(&self, tag_id: &str) -> bool {
        self.alerts_for_tag(tag_id)
            .iter()
            .filter_map(|id| self.entry(id))
            .any(|e| e.lock().alert.active)
    }

    // ========== Evaluation ==========

    /// Feed a batch of points for a tag to all of its active alerts
    pub fn evaluate(&self, tag_id: &str, points: &[DataPoint]) -> Vec<AlarmEvent> {
        let ids = self.alerts_for_tag(tag_id);
        if ids.is_empty() || points.is_empty() {
            return Vec::new();
        }
        let sorted = sorted_by_time(points);
        ids.iter()
            .flat_map(|id| self.evaluate_sorted(id, &sorted))
            .collect()
    }

    /// Feed points to a single alert (used right after binding)
    pub fn evaluate_alert(&self, alert_id: &str, points: &[DataPoint]) -> Vec<AlarmEvent> {
        self.evaluate_sorted(alert_id, &sorted_by_time(points))
    }

    fn evaluate_sorted(&self, alert_id: &str, points: &[DataPoint]) -> Vec<AlarmEvent> {
        let Some(entry) = self.entry(alert_id) else {
            return Vec::new();
        };
        let mut guard = entry.lock();
        let AlertEntry { alert, state } = &mut *guard;
        if !alert.active {
            return Vec::new();
        }

        let mut events = Vec::new();
        for point in points {
            step(alert, state, point, &mut events);
        }
        events
    }

    /// Explicit acknowledge; only legal while fired and not yet acked
    pub fn acknowledge(&self, alert_id: &str, x: i64) -> Option<AlarmEvent> {
        let Some(entry) = self.entry(alert_id) else {
            warn!(alert_id, "Ack for unknown alert ignored");
            return None;
        };
        let mut guard = entry.lock();
        match (guard.state.fired, guard.state.acked) {
            (Some(_), None) => {
                guard.state.acked = Some(x);
                Some(AlarmEvent::new(AlarmEventKind::Acked, alert_id, x))
            }
            (None, _) => {
                warn!(alert_id, "Ack for alert that is not fired ignored");
                None
            }
            (Some(_), Some(acked)) => {
                warn!(alert_id, acked, "Alert already acknowledged");
                None
            }
        }
    }
}

fn sorted_by_time(points: &[DataPoint]) -> Vec<DataPoint> {
    let mut sorted = points.to_vec();
    sorted.sort_by_key(|p| p.timestamp);
    sorted
}

fn step(alert: &Alert, state: &mut AlertState, point: &DataPoint, events: &mut Vec<AlarmEvent>) {
    let ts = point.timestamp;
    if state.is_stale(ts) {
        return;
    }
    let Some(in_alarm) = point.value.as_ref().and_then(|v| alert.in_alarm(v)) else {
        return;
    };

    match (in_alarm, state.fired) {
        (true, None) => {
            state.fired = Some(ts);
            events.push(AlarmEvent::new(AlarmEventKind::On, &alert.id, ts));
            if alert.auto_ack {
                state.acked = Some(ts);
                events.push(AlarmEvent::new(AlarmEventKind::Acked, &alert.id, ts));
            }
        }
        (false, Some(_)) => {
            state.fired = None;
            state.acked = None;
            state.off = Some(ts);
            events.push(AlarmEvent::new(AlarmEventKind::Off, &alert.id, ts));
        }
        _ => {}
    }
}
