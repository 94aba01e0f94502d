//! Per-tag write buffer
//!
//! Incoming points are appended in memory per tag and per bound backend,
//! then written in batches either on the periodic cycle or when a read for
//! the tag forces a flush.
//!
//! # Guarantees
//! - Different tags never wait on each other: each tag has its own lock
//! - Flushes of one tag are serialized ("take, clear, write" runs under a
//!   per-tag async lock)
//! - A failed backend write puts its batch back in front of newer points,
//!   so nothing is dropped while the process is alive
//!
//! # Usage
//! ```ignore
//! let buffer = Arc::new(WriteBuffer::new(WriteBufferConfig::default()));
//! buffer.register(tag, "sqlite-main", location);
//! buffer.append("pump-1", points);
//!
//! let shutdown = Arc::new(Notify::new());
//! tokio::spawn({
//!     let buffer = buffer.clone();
//!     let registry = registry.clone();
//!     let shutdown = shutdown.clone();
//!     async move { buffer.flush_loop_with_shutdown(&registry, shutdown).await }
//! });
//! ```

use dashmap::DashMap;
use futures::future::join_all;
use historian_model::{DataPoint, Location, Tag};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{Result, StoreError};
use crate::registry::BackendRegistry;

/// Write buffer configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteBufferConfig {
    /// Periodic flush interval in milliseconds (default: 30s)
    pub cache_data_period_ms: u64,
    /// Pending points per tag and backend before an early flush (default: 10000)
    pub max_points_per_tag: usize,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        Self {
            cache_data_period_ms: 30_000,
            max_points_per_tag: 10_000,
        }
    }
}

impl WriteBufferConfig {
    /// Create config optimized for low latency
    pub fn low_latency() -> Self {
        Self {
            cache_data_period_ms: 1_000,
            max_points_per_tag: 1_000,
        }
    }

    /// Create config optimized for high throughput
    pub fn high_throughput() -> Self {
        Self {
            cache_data_period_ms: 60_000,
            max_points_per_tag: 50_000,
        }
    }
}

/// Statistics for monitoring write buffer behavior
#[derive(Debug, Default)]
pub struct WriteBufferStats {
    /// Points accepted into the buffer
    pub buffered_points: AtomicU64,
    /// Points discarded because their tag is inactive
    pub dropped_points: AtomicU64,
    /// Flush cycles that wrote at least one point
    pub flush_count: AtomicU64,
    /// Points handed to backends successfully
    pub points_flushed: AtomicU64,
    /// Early flushes triggered by `max_points_per_tag`
    pub forced_flushes: AtomicU64,
    /// Failed backend writes
    pub flush_errors: AtomicU64,
}

impl WriteBufferStats {
    /// Get a snapshot of current stats
    pub fn snapshot(&self) -> WriteBufferStatsSnapshot {
        WriteBufferStatsSnapshot {
            buffered_points: self.buffered_points.load(Ordering::Relaxed),
            dropped_points: self.dropped_points.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            points_flushed: self.points_flushed.load(Ordering::Relaxed),
            forced_flushes: self.forced_flushes.load(Ordering::Relaxed),
            flush_errors: self.flush_errors.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of write buffer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBufferStatsSnapshot {
    pub buffered_points: u64,
    pub dropped_points: u64,
    pub flush_count: u64,
    pub points_flushed: u64,
    pub forced_flushes: u64,
    pub flush_errors: u64,
}

/// Result of `WriteBuffer::append`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Points queued for every bound backend
    Buffered(usize),
    /// Tag is inactive, points dropped
    Inactive,
    /// No cache entry: the caller should build one from the directory
    Unknown,
}

struct Binding {
    backend_id: String,
    location: Location,
    pending: Vec<DataPoint>,
}

struct TagState {
    tag: Tag,
    bindings: Vec<Binding>,
}

struct TagEntry {
    state: Mutex<TagState>,
    flush_lock: tokio::sync::Mutex<()>,
}

type PendingBatch = (String, Location, Vec<DataPoint>);

/// Per-tag cache of points waiting to be written
pub struct WriteBuffer {
    tags: DashMap<String, Arc<TagEntry>>,
    /// Notification for forced flush
    flush_notify: Arc<Notify>,
    config: WriteBufferConfig,
    stats: WriteBufferStats,
}

impl WriteBuffer {
    pub fn new(config: WriteBufferConfig) -> Self {
        Self {
            tags: DashMap::new(),
            flush_notify: Arc::new(Notify::new()),
            config,
            stats: WriteBufferStats::default(),
        }
    }

    pub fn config(&self) -> &WriteBufferConfig {
        &self.config
    }

    pub fn stats(&self) -> &WriteBufferStats {
        &self.stats
    }

    fn entry(&self, tag_id: &str) -> Option<Arc<TagEntry>> {
        self.tags.get(tag_id).map(|e| Arc::clone(e.value()))
    }

    // ========== Cache entries ==========

    /// Add a backend to a tag's fan-out set, creating the cache entry if needed
    ///
    /// Re-registering the same backend replaces its location and keeps
    /// pending points.
    pub fn register(&self, tag: Tag, backend_id: &str, location: Location) {
        let entry = self
            .tags
            .entry(tag.id.clone())
            .or_insert_with(|| {
                Arc::new(TagEntry {
                    state: Mutex::new(TagState {
                        tag: tag.clone(),
                        bindings: Vec::new(),
                    }),
                    flush_lock: tokio::sync::Mutex::new(()),
                })
            })
            .value()
            .clone();

        let mut state = entry.state.lock();
        state.tag = tag;
        match state
            .bindings
            .iter_mut()
            .find(|b| b.backend_id == backend_id)
        {
            Some(binding) => binding.location = location,
            None => state.bindings.push(Binding {
                backend_id: backend_id.to_string(),
                location,
                pending: Vec::new(),
            }),
        }
    }

    /// Refresh tag metadata (active/update/step flags); false if not cached
    pub fn update_tag(&self, tag: Tag) -> bool {
        match self.entry(&tag.id) {
            Some(entry) => {
                entry.state.lock().tag = tag;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, tag_id: &str) -> bool {
        self.tags.contains_key(tag_id)
    }

    pub fn tag(&self, tag_id: &str) -> Option<Tag> {
        self.entry(tag_id).map(|e| e.state.lock().tag.clone())
    }

    /// Bound backends in binding order
    pub fn bindings(&self, tag_id: &str) -> Vec<(String, Location)> {
        self.entry(tag_id)
            .map(|e| {
                e.state
                    .lock()
                    .bindings
                    .iter()
                    .map(|b| (b.backend_id.clone(), b.location.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Flush, then drop one backend from the tag's fan-out set
    ///
    /// The cache entry goes away with its last binding. A failed flush
    /// leaves the binding in place and returns the error.
    pub async fn unbind(
        &self,
        tag_id: &str,
        backend_id: &str,
        registry: &BackendRegistry,
    ) -> Result<Option<Location>> {
        let Some(entry) = self.entry(tag_id) else {
            return Ok(None);
        };
        self.flush_tag(tag_id, registry).await?;

        let _guard = entry.flush_lock.lock().await;
        let (removed, now_empty) = {
            let mut state = entry.state.lock();
            let removed = state
                .bindings
                .iter()
                .position(|b| b.backend_id == backend_id)
                .map(|idx| state.bindings.remove(idx));
            (removed, state.bindings.is_empty())
        };
        if now_empty {
            self.tags.remove(tag_id);
        }
        if let Some(binding) = &removed {
            if !binding.pending.is_empty() {
                self.stats
                    .dropped_points
                    .fetch_add(binding.pending.len() as u64, Ordering::Relaxed);
            }
        }
        Ok(removed.map(|b| b.location))
    }

    // ========== Writes ==========

    /// Queue points for every backend bound to the tag (returns immediately)
    pub fn append(&self, tag_id: &str, points: Vec<DataPoint>) -> AppendOutcome {
        let Some(entry) = self.entry(tag_id) else {
            return AppendOutcome::Unknown;
        };
        let count = points.len();
        let mut state = entry.state.lock();
        if state.bindings.is_empty() {
            return AppendOutcome::Unknown;
        }
        if !state.tag.active {
            self.stats
                .dropped_points
                .fetch_add(count as u64, Ordering::Relaxed);
            tracing::debug!(tag_id, points = count, "Tag inactive, dropping points");
            return AppendOutcome::Inactive;
        }

        let mut longest = 0;
        for binding in state.bindings.iter_mut() {
            binding.pending.extend(points.iter().cloned());
            longest = longest.max(binding.pending.len());
        }
        drop(state);

        self.stats
            .buffered_points
            .fetch_add(count as u64, Ordering::Relaxed);

        if longest >= self.config.max_points_per_tag {
            self.stats.forced_flushes.fetch_add(1, Ordering::Relaxed);
            self.flush_notify.notify_one();
        }
        AppendOutcome::Buffered(count)
    }

    /// Number of tags with a cache entry
    pub fn cached_tags(&self) -> usize {
        self.tags.len()
    }

    /// Total points waiting across tags and backends
    pub fn pending_points(&self) -> usize {
        self.tags
            .iter()
            .map(|e| {
                e.value()
                    .state
                    .lock()
                    .bindings
                    .iter()
                    .map(|b| b.pending.len())
                    .sum::<usize>()
            })
            .sum()
    }

    // ========== Flush ==========

    fn take_pending(entry: &TagEntry) -> (Tag, Vec<PendingBatch>) {
        let mut state = entry.state.lock();
        let tag = state.tag.clone();
        let batches = state
            .bindings
            .iter_mut()
            .filter(|b| !b.pending.is_empty())
            .map(|b| {
                (
                    b.backend_id.clone(),
                    b.location.clone(),
                    std::mem::take(&mut b.pending),
                )
            })
            .collect();
        (tag, batches)
    }

    fn requeue(entry: &TagEntry, backend_id: &str, batch: Vec<DataPoint>) {
        let mut state = entry.state.lock();
        if let Some(binding) = state
            .bindings
            .iter_mut()
            .find(|b| b.backend_id == backend_id)
        {
            binding.pending.splice(0..0, batch);
        }
    }

    /// Write one tag's pending points to all of its backends
    ///
    /// Returns the number of points written. On failure the failed
    /// backends' batches are re-queued and the first error is returned.
    pub async fn flush_tag(&self, tag_id: &str, registry: &BackendRegistry) -> Result<usize> {
        let Some(entry) = self.entry(tag_id) else {
            return Ok(0);
        };
        let _guard = entry.flush_lock.lock().await;

        let (tag, batches) = Self::take_pending(&entry);
        if batches.is_empty() {
            return Ok(0);
        }

        let writes = batches.into_iter().map(|(backend_id, location, mut batch)| {
            let value_type = tag.value_type;
            let update = tag.update;
            async move {
                batch.sort_by_key(|p| p.timestamp);
                let result = match registry.get(&backend_id) {
                    Ok(backend) => backend.write(&location, value_type, &batch, update).await,
                    Err(e) => Err(e),
                };
                (backend_id, batch, result)
            }
        });

        let mut flushed = 0;
        let mut first_error: Option<StoreError> = None;
        for (backend_id, batch, result) in join_all(writes).await {
            match result {
                Ok(_) => {
                    flushed += batch.len();
                }
                Err(e) => {
                    tracing::warn!(
                        tag_id,
                        backend_id = %backend_id,
                        points = batch.len(),
                        error = %e,
                        "Flush failed, points kept for next cycle"
                    );
                    self.stats.flush_errors.fetch_add(1, Ordering::Relaxed);
                    Self::requeue(&entry, &backend_id, batch);
                    first_error.get_or_insert(e);
                }
            }
        }

        self.stats
            .points_flushed
            .fetch_add(flushed as u64, Ordering::Relaxed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Flush a set of tags concurrently (read-your-writes path)
    ///
    /// Failures are logged; the caller proceeds with whatever is stored.
    pub async fn flush_tags(&self, tag_ids: &[String], registry: &BackendRegistry) -> usize {
        let results = join_all(tag_ids.iter().map(|id| self.flush_tag(id, registry))).await;
        results.into_iter().filter_map(|r| r.ok()).sum()
    }

    /// Flush every tag; all tags are attempted even when some fail
    pub async fn flush(&self, registry: &BackendRegistry) -> Result<usize> {
        let tag_ids: Vec<String> = self.tags.iter().map(|e| e.key().clone()).collect();
        let results = join_all(tag_ids.iter().map(|id| self.flush_tag(id, registry))).await;

        let mut total = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(n) => total += n,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if total > 0 {
            self.stats.flush_count.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(points = total, "WriteBuffer flushed");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(total),
        }
    }

    /// Force flush all pending data (for graceful shutdown)
    pub async fn flush_now(&self, registry: &BackendRegistry) -> Result<usize> {
        self.flush(registry).await
    }

    /// Background flush loop with shutdown support - runs until shutdown signal
    ///
    /// Performs a final flush before exiting.
    pub async fn flush_loop_with_shutdown(&self, registry: &BackendRegistry, shutdown: Arc<Notify>) {
        let interval = Duration::from_millis(self.config.cache_data_period_ms);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    tracing::debug!("WriteBuffer received shutdown signal");
                    if let Err(e) = self.flush(registry).await {
                        tracing::warn!(error = %e, "WriteBuffer final flush failed");
                    }
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
                _ = self.flush_notify.notified() => {}
            }

            if let Err(e) = self.flush(registry).await {
                tracing::warn!(error = %e, "WriteBuffer flush cycle had failures");
            }
        }

        tracing::debug!("WriteBuffer flush loop stopped");
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::traits::{BackendKind, RangeQuery, StorageBackend};
    use crate::MemoryBackend;
    use async_trait::async_trait;
    use historian_model::{AlarmRecord, ValueType};
    use std::sync::atomic::AtomicBool;

    /// Memory backend whose writes can be switched to fail
    struct FlakyBackend {
        inner: MemoryBackend,
        failing: AtomicBool,
    }

    impl FlakyBackend {
        fn new() -> Self {
            Self {
                inner: MemoryBackend::new(),
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl StorageBackend for FlakyBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Memory
        }
        async fn create_location(&self, tag: &Tag, location: &Location) -> Result<Location> {
            self.inner.create_location(tag, location).await
        }
        async fn drop_location(&self, location: &Location) -> Result<()> {
            self.inner.drop_location(location).await
        }
        async fn write(
            &self,
            location: &Location,
            value_type: ValueType,
            points: &[DataPoint],
            update: bool,
        ) -> Result<usize> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Connection("backend down".into()));
            }
            self.inner.write(location, value_type, points, update).await
        }
        async fn read_range(
            &self,
            location: &Location,
            value_type: ValueType,
            query: &RangeQuery,
        ) -> Result<Vec<DataPoint>> {
            self.inner.read_range(location, value_type, query).await
        }
        async fn create_alert_location(&self, location: &Location) -> Result<()> {
            self.inner.create_alert_location(location).await
        }
        async fn open_alarm(&self, location: &Location, fired: i64) -> Result<bool> {
            self.inner.open_alarm(location, fired).await
        }
        async fn ack_alarm(&self, location: &Location, acked: i64) -> Result<bool> {
            self.inner.ack_alarm(location, acked).await
        }
        async fn close_alarm(&self, location: &Location, off: i64) -> Result<bool> {
            self.inner.close_alarm(location, off).await
        }
        async fn last_alarm(&self, location: &Location) -> Result<Option<AlarmRecord>> {
            self.inner.last_alarm(location).await
        }
    }

    fn tag(id: &str, active: bool, update: bool) -> Tag {
        Tag {
            id: id.into(),
            value_type: ValueType::Int,
            step: false,
            update,
            active,
        }
    }

    async fn setup(
        tag: &Tag,
        backends: &[(&str, Arc<dyn StorageBackend>)],
    ) -> (WriteBuffer, BackendRegistry) {
        let buffer = WriteBuffer::new(WriteBufferConfig::default());
        let registry = BackendRegistry::new();
        let location = Location::default_for_tag(&tag.id).unwrap();
        for (id, backend) in backends {
            backend.create_location(tag, &location).await.unwrap();
            registry.insert(*id, Arc::clone(backend));
            buffer.register(tag.clone(), id, location.clone());
        }
        (buffer, registry)
    }

    async fn stored(backend: &dyn StorageBackend, tag_id: &str) -> Vec<DataPoint> {
        backend
            .read_range(
                &Location::default_for_tag(tag_id).unwrap(),
                ValueType::Int,
                &RangeQuery::default(),
            )
            .await
            .unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = WriteBufferConfig::default();
        assert_eq!(config.cache_data_period_ms, 30_000);
        assert_eq!(config.max_points_per_tag, 10_000);
    }

    #[test]
    fn test_config_presets() {
        assert_eq!(WriteBufferConfig::low_latency().cache_data_period_ms, 1_000);
        assert_eq!(
            WriteBufferConfig::high_throughput().cache_data_period_ms,
            60_000
        );
    }

    #[test]
    fn test_append_unknown_tag() {
        let buffer = WriteBuffer::new(WriteBufferConfig::default());
        assert_eq!(
            buffer.append("nope", vec![DataPoint::good(1_i64, 1)]),
            AppendOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn test_inactive_tag_drops_points() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let (buffer, _registry) = setup(&tag("t1", false, false), &[("mem", backend)]).await;

        let outcome = buffer.append("t1", vec![DataPoint::good(1_i64, 1)]);
        assert_eq!(outcome, AppendOutcome::Inactive);
        assert_eq!(buffer.pending_points(), 0);
        assert_eq!(buffer.stats().snapshot().dropped_points, 1);
    }

    #[tokio::test]
    async fn test_flush_writes_sorted_batch() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let (buffer, registry) =
            setup(&tag("t1", true, false), &[("mem", Arc::clone(&backend))]).await;

        buffer.append(
            "t1",
            vec![DataPoint::good(2_i64, 200), DataPoint::good(1_i64, 100)],
        );
        assert_eq!(buffer.pending_points(), 2);

        let flushed = buffer.flush(&registry).await.unwrap();
        assert_eq!(flushed, 2);
        assert_eq!(buffer.pending_points(), 0);

        let rows = stored(backend.as_ref(), "t1").await;
        assert_eq!(rows[0].timestamp, 100);
        assert_eq!(rows[1].timestamp, 200);

        let snapshot = buffer.stats().snapshot();
        assert_eq!(snapshot.flush_count, 1);
        assert_eq!(snapshot.points_flushed, 2);
    }

    #[tokio::test]
    async fn test_update_tag_keeps_latest_in_batch() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let (buffer, registry) =
            setup(&tag("t1", true, true), &[("mem", Arc::clone(&backend))]).await;

        buffer.append("t1", vec![DataPoint::good(1_i64, 100)]);
        buffer.append("t1", vec![DataPoint::good(9_i64, 100)]);
        buffer.flush(&registry).await.unwrap();

        assert_eq!(stored(backend.as_ref(), "t1").await, vec![DataPoint::good(9_i64, 100)]);
    }

    #[tokio::test]
    async fn test_fan_out_to_all_backends() {
        let a: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let b: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let (buffer, registry) = setup(
            &tag("t1", true, false),
            &[("a", Arc::clone(&a)), ("b", Arc::clone(&b))],
        )
        .await;

        buffer.append("t1", vec![DataPoint::good(5_i64, 50)]);
        assert_eq!(buffer.pending_points(), 2);
        buffer.flush_tag("t1", &registry).await.unwrap();

        assert_eq!(stored(a.as_ref(), "t1").await.len(), 1);
        assert_eq!(stored(b.as_ref(), "t1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_ahead_of_new_points() {
        let flaky = Arc::new(FlakyBackend::new());
        let backend: Arc<dyn StorageBackend> = flaky.clone();
        let (buffer, registry) =
            setup(&tag("t1", true, false), &[("flaky", Arc::clone(&backend))]).await;

        buffer.append("t1", vec![DataPoint::good(1_i64, 100)]);
        flaky.failing.store(true, Ordering::SeqCst);
        assert!(buffer.flush_tag("t1", &registry).await.is_err());
        assert_eq!(buffer.pending_points(), 1);
        assert_eq!(buffer.stats().snapshot().flush_errors, 1);

        buffer.append("t1", vec![DataPoint::good(2_i64, 200)]);
        flaky.failing.store(false, Ordering::SeqCst);
        assert_eq!(buffer.flush_tag("t1", &registry).await.unwrap(), 2);

        let ts: Vec<i64> = stored(backend.as_ref(), "t1")
            .await
            .iter()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(ts, vec![100, 200]);
    }

    #[tokio::test]
    async fn test_failure_on_one_backend_does_not_resend_to_other() {
        let good: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let flaky = Arc::new(FlakyBackend::new());
        flaky.failing.store(true, Ordering::SeqCst);
        let bad: Arc<dyn StorageBackend> = flaky.clone();
        let (buffer, registry) = setup(
            &tag("t1", true, false),
            &[("good", Arc::clone(&good)), ("bad", bad)],
        )
        .await;

        buffer.append("t1", vec![DataPoint::good(1_i64, 100)]);
        assert!(buffer.flush(&registry).await.is_err());
        flaky.failing.store(false, Ordering::SeqCst);
        buffer.flush(&registry).await.unwrap();

        assert_eq!(stored(good.as_ref(), "t1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unbind_flushes_first() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let (buffer, registry) =
            setup(&tag("t1", true, false), &[("mem", Arc::clone(&backend))]).await;

        buffer.append("t1", vec![DataPoint::good(1_i64, 100)]);
        let removed = buffer.unbind("t1", "mem", &registry).await.unwrap();

        assert_eq!(removed, Some(Location::default_for_tag("t1").unwrap()));
        assert!(!buffer.contains("t1"));
        assert_eq!(stored(backend.as_ref(), "t1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unbind_keeps_binding_when_flush_fails() {
        let flaky = Arc::new(FlakyBackend::new());
        let backend: Arc<dyn StorageBackend> = flaky.clone();
        let (buffer, registry) = setup(&tag("t1", true, false), &[("flaky", backend)]).await;

        buffer.append("t1", vec![DataPoint::good(1_i64, 100)]);
        flaky.failing.store(true, Ordering::SeqCst);
        assert!(buffer.unbind("t1", "flaky", &registry).await.is_err());
        assert_eq!(buffer.bindings("t1").len(), 1);
    }

    #[tokio::test]
    async fn test_forced_flush_trigger() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let (mut buffer, _registry) = setup(&tag("t1", true, false), &[("mem", backend)]).await;
        buffer.config.max_points_per_tag = 3;

        buffer.append("t1", vec![DataPoint::good(1_i64, 1), DataPoint::good(2_i64, 2)]);
        assert_eq!(buffer.stats().snapshot().forced_flushes, 0);
        buffer.append("t1", vec![DataPoint::good(3_i64, 3)]);
        assert_eq!(buffer.stats().snapshot().forced_flushes, 1);
    }

    #[tokio::test]
    async fn test_flush_loop_final_flush_on_shutdown() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let (buffer, registry) =
            setup(&tag("t1", true, false), &[("mem", Arc::clone(&backend))]).await;
        let buffer = Arc::new(buffer);
        let registry = Arc::new(registry);
        let shutdown = Arc::new(Notify::new());

        buffer.append("t1", vec![DataPoint::good(1_i64, 100)]);

        let handle = tokio::spawn({
            let buffer = Arc::clone(&buffer);
            let registry = Arc::clone(&registry);
            let shutdown = Arc::clone(&shutdown);
            async move { buffer.flush_loop_with_shutdown(&registry, shutdown).await }
        });
        shutdown.notify_one();
        handle.await.unwrap();

        assert_eq!(stored(backend.as_ref(), "t1").await.len(), 1);
    }
}
