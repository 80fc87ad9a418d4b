//! Zebra position-compare / pulse generator register map.
//!
//! The zebra turns encoder positions into detector trigger pulses: a gate
//! opens over the angular range of the scan and a pulse train inside it
//! fires one trigger per image.
//!
//! ```text
//! Zebra
//!  ├─ reset, out1, m1/m2/m3_set_pos
//!  └─ pc (position compare)
//!      ├─ arm_sel, encoder, direction
//!      ├─ gate   (sel, start, width, step, num_gates)
//!      └─ pulse  (sel, start, width, step, delay, max)
//! ```

use crate::registers::{DeviceSignals, Signal};

/// Gate of the position-compare block.
#[derive(Debug, Clone)]
pub struct PcGate {
    /// Gate source select
    pub sel: Signal<i64>,
    /// Gate start, degrees
    pub start: Signal<f64>,
    /// Gate width, degrees
    pub width: Signal<f64>,
    /// Gate step, degrees
    pub step: Signal<f64>,
    /// Number of gates
    pub num_gates: Signal<i64>,
}

/// Pulse train inside the gate.
#[derive(Debug, Clone)]
pub struct PcPulse {
    /// Pulse source select
    pub sel: Signal<i64>,
    /// Pulse start, ms
    pub start: Signal<f64>,
    /// Pulse width, ms
    pub width: Signal<f64>,
    /// Pulse step, ms
    pub step: Signal<f64>,
    /// Pulse delay, ms
    pub delay: Signal<f64>,
    /// Maximum number of pulses
    pub max: Signal<i64>,
}

/// Position-compare block.
#[derive(Debug, Clone)]
pub struct PositionCompare {
    /// Arm source select
    pub arm_sel: Signal<i64>,
    /// Encoder compared against
    pub encoder: Signal<i64>,
    /// 0 = positive
    pub direction: Signal<i64>,
    /// Gate settings
    pub gate: PcGate,
    /// Pulse settings
    pub pulse: PcPulse,
}

/// Zebra trigger box.
#[derive(Debug, Clone)]
pub struct Zebra {
    name: String,
    /// System reset
    pub reset: Signal<i64>,
    /// TTL output 1 source
    pub out1: Signal<i64>,
    /// Copy motor 1 position to the encoder
    pub m1_set_pos: Signal<i64>,
    /// Copy motor 2 position to the encoder
    pub m2_set_pos: Signal<i64>,
    /// Copy motor 3 position to the encoder
    pub m3_set_pos: Signal<i64>,
    /// Position-compare block
    pub pc: PositionCompare,
}

impl Zebra {
    /// Build the register map from `signals`.
    pub fn new(signals: &DeviceSignals) -> Self {
        let pc = signals.child("pc");
        let gate = pc.child("gate");
        let pulse = pc.child("pulse");
        Self {
            name: signals.device().to_string(),
            reset: signals.plain("reset", "SYS_RESET.PROC"),
            out1: signals.plain("out1", "OUT1_TTL"),
            m1_set_pos: signals.plain("m1_set_pos", "M1:SETPOS.PROC"),
            m2_set_pos: signals.plain("m2_set_pos", "M2:SETPOS.PROC"),
            m3_set_pos: signals.plain("m3_set_pos", "M3:SETPOS.PROC"),
            pc: PositionCompare {
                arm_sel: pc.plain("arm_sel", "PC_ARM_SEL"),
                encoder: pc.plain("encoder", "PC_ENC"),
                direction: pc.plain("direction", "PC_DIR"),
                gate: PcGate {
                    sel: gate.plain("sel", "PC_GATE_SEL"),
                    start: gate.plain("start", "PC_GATE_START"),
                    width: gate.plain("width", "PC_GATE_WID"),
                    step: gate.plain("step", "PC_GATE_STEP"),
                    num_gates: gate.plain("num_gates", "PC_GATE_NGATE"),
                },
                pulse: PcPulse {
                    sel: pulse.plain("sel", "PC_PULSE_SEL"),
                    start: pulse.plain("start", "PC_PULSE_START"),
                    width: pulse.plain("width", "PC_PULSE_WID"),
                    step: pulse.plain("step", "PC_PULSE_STEP"),
                    delay: pulse.plain("delay", "PC_PULSE_DLY"),
                    max: pulse.plain("max", "PC_PULSE_MAX"),
                },
            },
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }
}
