//! Eiger area detector.
//!
//! - [`cam`]: driver register map
//! - [`file_plugin`]: stage-time Resource and per-trigger Datum generation
//! - [`strategies`]: trigger and read behaviour
//! - [`detector`]: the assembled device implementing the capability traits

pub mod cam;
pub mod detector;
pub mod file_plugin;
pub mod strategies;

pub use cam::{EigerCam, EigerStageSettings};
pub use detector::{EigerDetector, EigerParts};
pub use file_plugin::{
    normalize_dir, render_write_path, EigerFilePlugin, FilePluginSettings, FILESTORE_SPEC,
    SEQUENCE_ID_OFFSET,
};
pub use strategies::{FullRead, ReadStrategy, SingleTrigger, StreamingRead, TriggerStrategy};
