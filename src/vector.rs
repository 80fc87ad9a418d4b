//! Vector motion program register map.
//!
//! The vector program drives the goniometer through a rotation while the
//! zebra counts encoder positions.

use crate::registers::{DeviceSignals, Signal};

/// Per-axis endpoint of the vector program.
#[derive(Debug, Clone)]
pub struct VectorEndpoint {
    /// Omega position, degrees
    pub omega: Signal<f64>,
}

/// Goniometer vector motion program.
#[derive(Debug, Clone)]
pub struct VectorProgram {
    name: String,
    /// Frames in the program
    pub num_frames: Signal<i64>,
    /// Where the program starts
    pub start: VectorEndpoint,
    /// Where the program ends
    pub end: VectorEndpoint,
    /// Per-frame exposure in milliseconds
    pub frame_exptime: Signal<f64>,
    /// 1 holds the program, 0 releases it
    pub hold: Signal<i64>,
}

impl VectorProgram {
    /// Build the register map from `signals`.
    pub fn new(signals: &DeviceSignals) -> Self {
        Self {
            name: signals.device().to_string(),
            num_frames: signals.plain("num_frames", "NumFrames"),
            start: VectorEndpoint {
                omega: signals.child("start").plain("omega", "Start:Omega"),
            },
            end: VectorEndpoint {
                omega: signals.child("end").plain("omega", "End:Omega"),
            },
            frame_exptime: signals.plain("frame_exptime", "FrameExptime"),
            hold: signals.plain("hold", "Hold"),
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }
}
