//! # mxtools
//!
//! Device and scan-setup library for a macromolecular crystallography
//! beamline: an Eiger detector that correlates hardware frames with
//! Resource/Datum documents, and plans that program the zebra
//! position-compare box, the goniometer vector program and the detector
//! in a fixed register order.
//!
//! ## Crate Structure
//!
//! - **`registers`**: typed `Signal<T>` over a `RegisterBackend`, plus an
//!   in-memory backend with fault injection for tests.
//! - **`eiger`**: detector register map, file plugin (Resource/Datum
//!   correlation), trigger and read strategies, and the detector itself.
//! - **`zebra`** / **`vector`**: explicit register maps for the zebra and
//!   the goniometer vector program.
//! - **`plans`**: the `Plan` trait and `PlanBuilder` for ordered register
//!   programs.
//! - **`scans`**: the scan-setup procedures.
//! - **`run_engine`**: `PlanRunner`, the sequential executor.
//! - **`beamline`**: explicit construction of every device from config.
//! - **`config`** / **`logging`**: figment configuration and tracing setup.
//! - **`document`**, **`capabilities`**, **`clock`**, **`error`**: shared
//!   data model, device traits, time source and error types.

pub mod beamline;
pub mod capabilities;
pub mod clock;
pub mod config;
pub mod document;
pub mod eiger;
pub mod error;
pub mod logging;
pub mod plans;
pub mod registers;
pub mod run_engine;
pub mod scans;
pub mod vector;
pub mod zebra;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports for driving the beamline.
pub mod prelude {
    pub use crate::beamline::Beamline;
    pub use crate::capabilities::{Readable, Stageable, Triggerable};
    pub use crate::config::BeamlineConfig;
    pub use crate::document::{AssetDocument, Datum, Resource};
    pub use crate::eiger::EigerDetector;
    pub use crate::error::{MxError, MxResult};
    pub use crate::plans::Plan;
    pub use crate::registers::{MemoryBackend, RegisterBackend, RegisterValue, Signal};
    pub use crate::run_engine::PlanRunner;
}
