//! Historian Model Library
//!
//! Value objects shared by every historian crate. No IO, no behavior beyond
//! conversions and validation.
//!
//! # Modules
//!
//! - `types`: the closed `ValueType` union, typed `TagValue`, read `Order`
//! - `point`: `DataPoint` and the upload wire form `UploadPoint`
//! - `entity`: `Tag`, `Alert`, `Location`, `AlarmRecord`
//! - `time`: microsecond timestamp parsing and formatting
//! - `validation`: location name rules

pub mod entity;
pub mod error;
pub mod point;
pub mod time;
pub mod types;
pub mod validation;

pub use entity::{AlarmRecord, Alert, AlertId, BackendId, Location, Tag, TagId};
pub use error::{ModelError, Result};
pub use point::{DataPoint, UploadPoint};
pub use time::{format_timestamp, parse_timestamp};
pub use types::{Order, TagValue, ValueSet, ValueType};
pub use validation::validate_location_name;
