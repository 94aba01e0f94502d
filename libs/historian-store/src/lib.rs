//! Historian Storage Abstraction
//!
//! Provides a unified interface for time-series storage,
//! supporting multiple backends (SQLite, HTTP metrics, in-memory)
//!
//! # Key Components
//!
//! - **StorageBackend trait**: per-location point and alarm-history operations
//! - **BackendRegistry**: backend id to connected backend
//! - **WriteBuffer**: per-tag cache with periodic and forced flushes

pub mod traits;

#[cfg(feature = "sqlite-backend")]
pub mod sqlite_impl;

#[cfg(feature = "metrics-backend")]
pub mod metrics_impl;

pub mod memory_impl;

pub mod error;

pub mod registry;

pub mod time;

pub mod write_buffer;

// Re-exports
pub use traits::{latest_per_timestamp, select_range, BackendKind, RangeQuery, StorageBackend};

#[cfg(feature = "sqlite-backend")]
pub use sqlite_impl::SqliteBackend;

#[cfg(feature = "metrics-backend")]
pub use metrics_impl::{MetricsBackend, MetricsConfig};

pub use memory_impl::{MemoryBackend, MemoryStats};

pub use error::{Result, StoreError};

pub use registry::BackendRegistry;

pub use time::{FixedTimeProvider, SystemTimeProvider, TimeProvider};

pub use write_buffer::{
    AppendOutcome, WriteBuffer, WriteBufferConfig, WriteBufferStats, WriteBufferStatsSnapshot,
};
