//! hissrv - historian service
//!
//! Buffers tag values into storage backends, serves history reads and
//! evaluates threshold alerts, driven by messages from a bus.

pub mod backends;
pub mod bus;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use engine::{Engine, EngineState};
pub use error::{HissrvError, Result};

/// Service info
pub const SERVICE_NAME: &str = "hissrv";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
