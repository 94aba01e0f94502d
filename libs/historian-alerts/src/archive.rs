//! Alarm history persistence
//!
//! Applies alarm transitions to every alert-history location an alert is
//! bound to. Each location holds at most one open record.

use dashmap::DashMap;
use futures::future::join_all;
use historian_model::{AlarmRecord, Location};
use historian_store::BackendRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{AlertError, Result};
use crate::types::{AlarmEvent, AlarmEventKind, AlertState};

pub struct AlarmArchive {
    registry: Arc<BackendRegistry>,
    /// alert id -> (backend id, location), in bind order
    locations: DashMap<String, Vec<(String, Location)>>,
}

impl AlarmArchive {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            locations: DashMap::new(),
        }
    }

    /// Record an alert-history location; rebinding a backend replaces it
    pub fn bind(&self, alert_id: &str, backend_id: &str, location: Location) {
        let mut bound = self.locations.entry(alert_id.to_string()).or_default();
        match bound.iter_mut().find(|(id, _)| id == backend_id) {
            Some(slot) => slot.1 = location,
            None => bound.push((backend_id.to_string(), location)),
        }
    }

    /// Forget one backend's location for an alert
    pub fn unbind(&self, alert_id: &str, backend_id: &str) -> Option<Location> {
        let removed = {
            let mut bound = self.locations.get_mut(alert_id)?;
            let index = bound.iter().position(|(id, _)| id == backend_id)?;
            bound.remove(index).1
        };
        self.locations
            .remove_if(alert_id, |_, bound| bound.is_empty());
        Some(removed)
    }

    pub fn locations(&self, alert_id: &str) -> Vec<(String, Location)> {
        self.locations
            .get(alert_id)
            .map(|bound| bound.clone())
            .unwrap_or_default()
    }

    pub fn is_bound(&self, alert_id: &str) -> bool {
        self.locations.contains_key(alert_id)
    }

    /// Persist one transition to all bound locations
    ///
    /// Returns the first backend error after attempting every location.
    pub async fn apply(&self, event: &AlarmEvent) -> Result<()> {
        let bound = self.locations(&event.alert_id);
        if bound.is_empty() {
            debug!(alert_id = %event.alert_id, "Alert has no history location");
            return Ok(());
        }

        let writes = bound.iter().map(|(backend_id, location)| async move {
            let backend = self.registry.get(backend_id)?;
            let applied = match event.kind {
                AlarmEventKind::On => backend.open_alarm(location, event.x).await?,
                AlarmEventKind::Acked => backend.ack_alarm(location, event.x).await?,
                AlarmEventKind::Off => backend.close_alarm(location, event.x).await?,
            };
            if !applied {
                debug!(
                    alert_id = %event.alert_id,
                    location = %location,
                    kind = ?event.kind,
                    "Alarm record unchanged"
                );
            }
            Ok::<_, AlertError>(())
        });

        let mut first_error = None;
        for result in join_all(writes).await {
            if let Err(e) = result {
                warn!(alert_id = %event.alert_id, error = %e, "Alarm history write failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Latest persisted record from the first bound location
    pub async fn last_record(&self, alert_id: &str) -> Result<Option<AlarmRecord>> {
        let (backend_id, location) = self
            .locations(alert_id)
            .into_iter()
            .next()
            .ok_or_else(|| AlertError::NotBound(alert_id.to_string()))?;
        let backend = self.registry.get(&backend_id)?;
        Ok(backend.last_alarm(&location).await?)
    }

    /// Seed runtime state from persisted history (idle when unbound)
    pub async fn recover_state(&self, alert_id: &str) -> Result<AlertState> {
        if !self.is_bound(alert_id) {
            return Ok(AlertState::default());
        }
        let record = self.last_record(alert_id).await?;
        Ok(AlertState::from_record(record.as_ref()))
    }
}
