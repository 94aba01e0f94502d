//! Historian Alerts Library
//!
//! Threshold alerts over tag values and the history of their alarms.
//!
//! - `evaluator`: per-alert IDLE / FIRED / ACKED state machine
//! - `archive`: applies alarm transitions to alert-history locations

pub mod archive;
pub mod error;
pub mod evaluator;
pub mod types;

pub use archive::AlarmArchive;
pub use error::{AlertError, Result};
pub use evaluator::AlertEvaluator;
pub use types::{AlarmEvent, AlarmEventKind, AlertPhase, AlertState};
