//! Historian Query Library
//!
//! Retrieval algorithms over stored tag history.
//!
//! # Modules
//!
//! - `reader`: `TimeSeriesReader` with actual, snapshot, ranged and grid reads
//! - `interpolate`: linear / step-hold value synthesis
//! - `resample`: fixed-step grids
//! - `filter`: value matches and crossings
//! - `decimate`: `maxCount` truncation
//! - `request`: `tags.downloadData` request and reply

pub mod decimate;
pub mod error;
pub mod filter;
pub mod interpolate;
pub mod reader;
pub mod request;
pub mod resample;

pub use decimate::{decimate, Decimated};
pub use error::{QueryError, Result};
pub use filter::ValueFilter;
pub use interpolate::Interpolator;
pub use reader::{TagSource, TimeSeriesReader};
pub use request::{DataRequest, DataResponse, ReadMode, TagData};
pub use resample::{GridResampler, MAX_GRID_POINTS};
