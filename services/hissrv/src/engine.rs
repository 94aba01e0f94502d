//! Request handling
//!
//! `EngineState` owns every runtime cache (backends, write buffer, alert
//! state, alarm archive, interest set). `Engine` wires it to the directory
//! and the bus and serves the actions below:
//!
//! | action | reply |
//! |--------|-------|
//! | `tags.downloadData` | `{data: [{tagId, data, excess?}]}` |
//! | `tags.uploadData` | none |
//! | `alerts.ackAlarm` | `{alertId, acked}` |
//! | `alerts.getAlarms` | `{alertId, alarm}` |
//! | `dataStorages.linkTag` / `linkAlert` | `{id, dataStorageId, location}` |
//! | `dataStorages.unlinkTag` / `unlinkAlert` | `{id, unlinked}` |

use historian_alerts::{AlarmArchive, AlarmEvent, AlertEvaluator};
use historian_model::{parse_timestamp, Alert, Location, Tag, UploadPoint};
use historian_query::{DataRequest, TimeSeriesReader};
use historian_store::{
    AppendOutcome, BackendRegistry, StorageBackend, StoreError, TimeProvider, WriteBuffer,
    WriteBufferConfig,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::bus::{Delivery, Envelope, InterestSet, RpcTable, Transport};
use crate::directory::Directory;
use crate::error::{HissrvError, Result};

// ============================================================================
// Actions
// ============================================================================

pub const DOWNLOAD_DATA: &str = "tags.downloadData";
pub const UPLOAD_DATA: &str = "tags.uploadData";
pub const ACK_ALARM: &str = "alerts.ackAlarm";
pub const GET_ALARMS: &str = "alerts.getAlarms";
pub const LINK_TAG: &str = "dataStorages.linkTag";
pub const UNLINK_TAG: &str = "dataStorages.unlinkTag";
pub const LINK_ALERT: &str = "dataStorages.linkAlert";
pub const UNLINK_ALERT: &str = "dataStorages.unlinkAlert";

// ============================================================================
// Request bodies
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadItem {
    tag_id: String,
    #[serde(default)]
    data: Vec<UploadPoint>,
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    data: Vec<UploadItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkTagRequest {
    tag_id: String,
    data_storage_id: String,
    /// Explicit location name instead of `t_{tagId}`
    #[serde(default)]
    store: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnlinkTagRequest {
    tag_id: String,
    /// All bindings when absent
    #[serde(default)]
    data_storage_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkAlertRequest {
    alert_id: String,
    data_storage_id: String,
    #[serde(default)]
    store: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnlinkAlertRequest {
    alert_id: String,
    #[serde(default)]
    data_storage_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AckRequest {
    alert_id: String,
    /// Defaults to now
    #[serde(default)]
    x: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertRef {
    alert_id: String,
}

fn parse_body<T: DeserializeOwned>(action: &str, data: &Value) -> Result<T> {
    T::deserialize(data).map_err(|e| HissrvError::invalid(format!("{action}: {e}")))
}

// ============================================================================
// Engine state
// ============================================================================

/// Runtime caches, created once and shared by handle
pub struct EngineState {
    pub registry: Arc<BackendRegistry>,
    pub buffer: Arc<WriteBuffer>,
    pub reader: TimeSeriesReader,
    pub evaluator: AlertEvaluator,
    pub archive: AlarmArchive,
    pub interest: InterestSet,
    pub clock: Arc<dyn TimeProvider>,
}

impl EngineState {
    pub fn new(
        registry: Arc<BackendRegistry>,
        buffer_config: WriteBufferConfig,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        let buffer = Arc::new(WriteBuffer::new(buffer_config));
        let reader = TimeSeriesReader::new(
            Arc::clone(&buffer),
            Arc::clone(&registry),
            Arc::clone(&clock),
        );
        Self {
            archive: AlarmArchive::new(Arc::clone(&registry)),
            registry,
            buffer,
            reader,
            evaluator: AlertEvaluator::new(),
            interest: InterestSet::new(),
            clock,
        }
    }

    /// Periodic flush until `shutdown` fires, then a final flush
    pub async fn run_flush_loop(&self, shutdown: Arc<Notify>) {
        self.buffer
            .flush_loop_with_shutdown(&self.registry, shutdown)
            .await;
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    state: EngineState,
    directory: Arc<dyn Directory>,
    transport: Arc<dyn Transport>,
    rpc: Arc<RpcTable>,
}

impl Engine {
    pub fn new(
        state: EngineState,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        rpc: Arc<RpcTable>,
    ) -> Self {
        Self {
            state,
            directory,
            transport,
            rpc,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    // ========== Delivery loop ==========

    /// Serve deliveries until the inbox closes
    ///
    /// Uploads are handled in arrival order so a tag's points reach the
    /// alert evaluator in the order they were sent; other requests run
    /// concurrently.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Delivery>) {
        while let Some(delivery) = inbox.recv().await {
            if delivery.envelope.action == UPLOAD_DATA {
                self.handle(delivery).await;
            } else {
                let engine = Arc::clone(&self);
                tokio::spawn(async move { engine.handle(delivery).await });
            }
        }
        debug!("Engine inbox closed");
    }

    /// Route one delivery: replies complete pending RPCs, requests are
    /// dispatched and answered when they carry `replyTo`
    pub async fn handle(&self, delivery: Delivery) {
        let Delivery {
            routing_key,
            envelope,
        } = delivery;

        if let (Some(correlation_id), None) = (&envelope.correlation_id, &envelope.reply_to) {
            self.rpc.complete(correlation_id, envelope.clone());
            return;
        }

        let result = self.dispatch(&envelope).await;
        let reply = match (&result, &envelope.reply_to) {
            (Ok(body), Some(_)) => Some(envelope.reply(body.clone())),
            (Err(e), Some(_)) => {
                warn!(action = %envelope.action, routing_key = %routing_key, error = %e, "Request failed");
                Some(envelope.error_reply(e))
            }
            (Err(e), None) => {
                warn!(action = %envelope.action, routing_key = %routing_key, error = %e, "Message failed");
                None
            }
            (Ok(_), None) => None,
        };

        if let (Some(reply), Some(reply_to)) = (reply, &envelope.reply_to) {
            if let Err(e) = self.transport.publish(reply_to, reply).await {
                warn!(reply_to = %reply_to, error = %e, "Failed to send reply");
            }
        }
    }

    /// Execute one action, returning the reply body (`null` when none)
    pub async fn dispatch(&self, envelope: &Envelope) -> Result<Value> {
        let action = envelope.action.as_str();
        let data = &envelope.data;
        match action {
            DOWNLOAD_DATA => self.download(parse_body(action, data)?).await,
            UPLOAD_DATA => {
                self.upload(parse_body(action, data)?).await;
                Ok(Value::Null)
            }
            ACK_ALARM => self.ack_alarm(parse_body(action, data)?).await,
            GET_ALARMS => self.get_alarms(parse_body(action, data)?).await,
            LINK_TAG => self.link_tag(parse_body(action, data)?).await,
            UNLINK_TAG => self.unlink_tag(parse_body(action, data)?).await,
            LINK_ALERT => self.link_alert(parse_body(action, data)?).await,
            UNLINK_ALERT => self.unlink_alert(parse_body(action, data)?).await,
            other => Err(HissrvError::UnknownAction(other.to_string())),
        }
    }

    // ========== Data ==========

    async fn download(&self, request: DataRequest) -> Result<Value> {
        if request.tag_id.is_empty() {
            return Err(HissrvError::invalid("tagId is required"));
        }
        let response = self.state.reader.read(&request).await;
        Ok(response.to_json(request.format)?)
    }

    async fn upload(&self, request: UploadRequest) {
        let now = self.state.clock.now_micros();
        for item in request.data {
            let tag_id = item.tag_id.clone();
            if let Err(e) = self.upload_tag(item, now).await {
                warn!(tag_id = %tag_id, error = %e, "Upload skipped");
            }
        }
    }

    async fn upload_tag(&self, item: UploadItem, now: i64) -> Result<()> {
        let tag = self.tag_meta(&item.tag_id).await?;
        if !tag.active {
            debug!(tag_id = %tag.id, "Tag inactive, upload dropped");
            return Ok(());
        }

        let mut points = Vec::with_capacity(item.data.len());
        for raw in &item.data {
            match raw.resolve(tag.value_type, now) {
                Ok(point) => points.push(point),
                Err(e) => warn!(tag_id = %tag.id, error = %e, "Point skipped"),
            }
        }
        if points.is_empty() {
            return Ok(());
        }

        match self.state.buffer.append(&tag.id, points.clone()) {
            AppendOutcome::Buffered(count) => debug!(tag_id = %tag.id, count, "Points buffered"),
            AppendOutcome::Inactive => return Ok(()),
            AppendOutcome::Unknown => debug!(tag_id = %tag.id, "Tag has no storage, alerts only"),
        }

        let events = self.state.evaluator.evaluate(&tag.id, &points);
        self.emit(events).await;
        Ok(())
    }

    /// Cached metadata for bound tags, the directory otherwise
    async fn tag_meta(&self, tag_id: &str) -> Result<Tag> {
        if let Some(tag) = self.state.buffer.tag(tag_id) {
            return Ok(tag);
        }
        self.directory
            .lookup_tag(tag_id)
            .await?
            .ok_or_else(|| HissrvError::UnknownTag(tag_id.to_string()))
    }

    // ========== Alerts ==========

    async fn ack_alarm(&self, request: AckRequest) -> Result<Value> {
        let x = match &request.x {
            Some(raw) if !raw.is_null() => parse_timestamp(raw)?,
            _ => self.state.clock.now_micros(),
        };
        let event = self.state.evaluator.acknowledge(&request.alert_id, x);
        let acked = event.is_some();
        self.emit(event.into_iter().collect()).await;
        Ok(json!({ "alertId": request.alert_id, "acked": acked }))
    }

    async fn get_alarms(&self, request: AlertRef) -> Result<Value> {
        let record = self.state.archive.last_record(&request.alert_id).await?;
        Ok(json!({ "alertId": request.alert_id, "alarm": record }))
    }

    /// Persist alarm transitions and announce them on the alert's key
    async fn emit(&self, events: Vec<AlarmEvent>) {
        for event in events {
            if let Err(e) = self.state.archive.apply(&event).await {
                warn!(alert_id = %event.alert_id, error = %e, "Alarm not archived");
            }
            let data = match serde_json::to_value(&event) {
                Ok(data) => data,
                Err(e) => {
                    warn!(alert_id = %event.alert_id, error = %e, "Alarm event not serializable");
                    continue;
                }
            };
            info!(alert_id = %event.alert_id, action = event.kind.action(), x = event.x, "Alarm transition");
            if let Err(e) = self
                .transport
                .publish(&event.alert_id, Envelope::new(event.kind.action(), data))
                .await
            {
                warn!(alert_id = %event.alert_id, error = %e, "Alarm notification not sent");
            }
        }
    }

    /// Start (or refresh) evaluation of an alert and run it against the
    /// parent tag's current value
    async fn activate_alert(&self, alert: Alert) {
        let alert_id = alert.id.clone();
        let tag_id = alert.tag_id.clone();
        let active = alert.active;

        if !self.state.evaluator.update(alert.clone()) {
            let seed = match self.state.archive.recover_state(&alert_id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(alert_id = %alert_id, error = %e, "Alarm history unreadable, starting idle");
                    Default::default()
                }
            };
            self.state.evaluator.bind(alert, seed);
        }
        self.reconcile_interest(&tag_id).await;

        if active {
            self.evaluate_snapshot(&alert_id, &tag_id).await;
        }
    }

    async fn evaluate_snapshot(&self, alert_id: &str, tag_id: &str) {
        if !self.state.buffer.contains(tag_id) {
            debug!(alert_id, tag_id, "Parent tag has no history yet");
            return;
        }
        let response = self
            .state
            .reader
            .read(&DataRequest::for_tags([tag_id]))
            .await;
        let points = response
            .data
            .into_iter()
            .next()
            .map(|tag| tag.data)
            .unwrap_or_default();
        let events = self.state.evaluator.evaluate_alert(alert_id, &points);
        self.emit(events).await;
    }

    /// Consume a tag's key while it is stored or has an active alert
    async fn reconcile_interest(&self, tag_id: &str) {
        let wanted =
            self.state.buffer.contains(tag_id) || self.state.evaluator.has_active_alerts(tag_id);
        if let Err(e) = self
            .state
            .interest
            .reconcile(tag_id, wanted, self.transport.as_ref())
            .await
        {
            warn!(tag_id, error = %e, "Subscription change failed");
        }
    }

    // ========== Storage bindings ==========

    async fn link_tag(&self, request: LinkTagRequest) -> Result<Value> {
        let backend_id = request.data_storage_id.as_str();
        let backend = self.state.registry.get(backend_id)?;
        let tag = self
            .directory
            .lookup_tag(&request.tag_id)
            .await?
            .ok_or_else(|| HissrvError::UnknownTag(request.tag_id.clone()))?;
        if !tag.active {
            return Err(HissrvError::invalid(format!("tag {} is inactive", tag.id)));
        }
        let location = match &request.store {
            Some(name) => Location::new(name.as_str())?,
            None => backend.default_location(&tag.id)?,
        };

        let existing = self.directory.lookup_binding(&tag.id, backend_id).await?;
        if existing.as_ref() == Some(&location) {
            warn!(tag_id = %tag.id, backend_id, location = %location, "Tag already linked");
            self.state.buffer.register(tag.clone(), backend_id, location.clone());
            self.reconcile_interest(&tag.id).await;
            return Ok(link_reply(&tag.id, backend_id, &location));
        }

        // The old binding stays in place until the new location exists
        let created = backend.create_location(&tag, &location).await?;
        if let Some(existing) = existing {
            if let Err(e) = self
                .state
                .buffer
                .unbind(&tag.id, backend_id, &self.state.registry)
                .await
            {
                if let Err(drop_err) = backend.drop_location(&created).await {
                    warn!(tag_id = %tag.id, location = %created, error = %drop_err, "New location left behind");
                }
                return Err(e.into());
            }
            backend.drop_location(&existing).await?;
            self.directory.remove_binding(&tag.id, backend_id).await?;
            info!(tag_id = %tag.id, backend_id, old = %existing, "Dropped previous tag location");
        }

        self.state.buffer.register(tag.clone(), backend_id, created.clone());
        self.directory
            .record_binding(&tag.id, backend_id, &created)
            .await?;
        self.reconcile_interest(&tag.id).await;

        info!(tag_id = %tag.id, backend_id, location = %created, "Tag linked");
        Ok(link_reply(&tag.id, backend_id, &created))
    }

    async fn unlink_tag(&self, request: UnlinkTagRequest) -> Result<Value> {
        let tag_id = request.tag_id.as_str();
        let bindings = self
            .bindings_to_remove(tag_id, request.data_storage_id.as_deref())
            .await?;
        if bindings.is_empty() {
            warn!(tag_id, "Tag is not linked");
        }

        let mut unlinked = 0;
        for (backend_id, location) in bindings {
            self.state
                .buffer
                .unbind(tag_id, &backend_id, &self.state.registry)
                .await?;
            self.state.registry.get(&backend_id)?.drop_location(&location).await?;
            self.directory.remove_binding(tag_id, &backend_id).await?;
            unlinked += 1;
            info!(tag_id, backend_id = %backend_id, location = %location, "Tag unlinked");
        }
        self.reconcile_interest(tag_id).await;
        Ok(json!({ "id": tag_id, "unlinked": unlinked }))
    }

    async fn link_alert(&self, request: LinkAlertRequest) -> Result<Value> {
        let backend_id = request.data_storage_id.as_str();
        let backend = self.state.registry.get(backend_id)?;
        let alert = self
            .directory
            .lookup_alert(&request.alert_id)
            .await?
            .ok_or_else(|| HissrvError::UnknownAlert(request.alert_id.clone()))?;
        let location = match &request.store {
            Some(name) => Location::new(name.as_str())?,
            None => backend.default_alert_location(&alert.id)?,
        };

        let existing = self.directory.lookup_binding(&alert.id, backend_id).await?;
        if existing.as_ref() == Some(&location) {
            warn!(alert_id = %alert.id, backend_id, location = %location, "Alert already linked");
            self.state.archive.bind(&alert.id, backend_id, location.clone());
            self.activate_alert(alert.clone()).await;
            return Ok(link_reply(&alert.id, backend_id, &location));
        }

        backend.create_alert_location(&location).await?;
        if let Some(existing) = existing {
            self.state.archive.unbind(&alert.id, backend_id);
            backend.drop_location(&existing).await?;
            self.directory.remove_binding(&alert.id, backend_id).await?;
            info!(alert_id = %alert.id, backend_id, old = %existing, "Dropped previous alarm history");
        }

        self.state.archive.bind(&alert.id, backend_id, location.clone());
        self.directory
            .record_binding(&alert.id, backend_id, &location)
            .await?;
        info!(alert_id = %alert.id, backend_id, location = %location, "Alert linked");

        let reply = link_reply(&alert.id, backend_id, &location);
        self.activate_alert(alert).await;
        Ok(reply)
    }

    async fn unlink_alert(&self, request: UnlinkAlertRequest) -> Result<Value> {
        let alert_id = request.alert_id.as_str();
        let bindings = self
            .bindings_to_remove(alert_id, request.data_storage_id.as_deref())
            .await?;
        if bindings.is_empty() {
            warn!(alert_id, "Alert is not linked");
        }

        let mut unlinked = 0;
        for (backend_id, location) in bindings {
            self.state.registry.get(&backend_id)?.drop_location(&location).await?;
            self.state.archive.unbind(alert_id, &backend_id);
            self.directory.remove_binding(alert_id, &backend_id).await?;
            unlinked += 1;
            info!(alert_id, backend_id = %backend_id, location = %location, "Alert unlinked");
        }

        if !self.state.archive.is_bound(alert_id) {
            if let Some(alert) = self.state.evaluator.unbind(alert_id) {
                self.reconcile_interest(&alert.tag_id).await;
            }
        }
        Ok(json!({ "id": alert_id, "unlinked": unlinked }))
    }

    async fn bindings_to_remove(
        &self,
        entity_id: &str,
        backend_id: Option<&str>,
    ) -> Result<Vec<(String, Location)>> {
        Ok(match backend_id {
            Some(backend_id) => self
                .directory
                .lookup_binding(entity_id, backend_id)
                .await?
                .map(|location| (backend_id.to_string(), location))
                .into_iter()
                .collect(),
            None => self.directory.bindings_for(entity_id).await?,
        })
    }

    // ========== Startup ==========

    /// Rebuild runtime state from the directory
    ///
    /// Registers stored tags with the write buffer, binds alarm histories
    /// and seeds every bound alert from its last persisted record before
    /// re-evaluating it against the tag's current value. Missing locations
    /// are created; entities on unknown backends are skipped.
    pub async fn restore(&self) -> Result<()> {
        let tags = self.directory.list_tags().await?;
        for tag in &tags {
            for (backend_id, location) in self.directory.bindings_for(&tag.id).await? {
                let Some(backend) = self.backend_for(&tag.id, &backend_id) else {
                    continue;
                };
                match backend.create_location(tag, &location).await {
                    Ok(_) | Err(StoreError::LocationExists(_)) => {
                        self.state.buffer.register(tag.clone(), &backend_id, location);
                    }
                    Err(e) => warn!(tag_id = %tag.id, backend_id = %backend_id, error = %e, "Tag location unavailable"),
                }
            }
            self.reconcile_interest(&tag.id).await;
        }

        let alerts = self.directory.list_alerts().await?;
        let mut restored = 0;
        for alert in alerts {
            let mut bound = false;
            for (backend_id, location) in self.directory.bindings_for(&alert.id).await? {
                let Some(backend) = self.backend_for(&alert.id, &backend_id) else {
                    continue;
                };
                match backend.create_alert_location(&location).await {
                    Ok(()) | Err(StoreError::LocationExists(_)) => {
                        self.state.archive.bind(&alert.id, &backend_id, location);
                        bound = true;
                    }
                    Err(e) => warn!(alert_id = %alert.id, backend_id = %backend_id, error = %e, "Alarm history unavailable"),
                }
            }
            if bound {
                self.activate_alert(alert).await;
                restored += 1;
            }
        }

        info!(
            tags = self.state.buffer.cached_tags(),
            alerts = restored,
            "Engine state restored"
        );
        Ok(())
    }

    fn backend_for(&self, entity_id: &str, backend_id: &str) -> Option<Arc<dyn StorageBackend>> {
        match self.state.registry.get(backend_id) {
            Ok(backend) => Some(backend),
            Err(e) => {
                warn!(entity_id, backend_id, error = %e, "Binding skipped");
                None
            }
        }
    }
}

fn link_reply(id: &str, backend_id: &str, location: &Location) -> Value {
    json!({ "id": id, "dataStorageId": backend_id, "location": location })
}
