//! Eiger detector driver register map (`cam1:`).

use std::sync::Arc;

use crate::registers::{DeviceSignals, RegisterValue, Signal, SignalHandle};

/// `ImageMode` value for "Multiple".
pub const IMAGE_MODE_MULTIPLE: i64 = 1;

/// Values applied on stage and restored on unstage.
///
/// `Acquire` is always forced to 0 before any of these, so staging never
/// starts from a busy detector.
#[derive(Debug, Clone, PartialEq)]
pub struct EigerStageSettings {
    /// `ImageMode` while staged
    pub image_mode: i64,
    /// `TriggerMode` while staged
    pub trigger_mode: i64,
    /// `NumTriggers` while staged
    pub num_triggers: i64,
    /// `CompressionAlgo` while staged
    pub compression_algo: String,
}

impl Default for EigerStageSettings {
    fn default() -> Self {
        Self {
            image_mode: IMAGE_MODE_MULTIPLE,
            trigger_mode: 0,
            num_triggers: 1,
            compression_algo: "BS LZ4".to_string(),
        }
    }
}

/// Registers of the Eiger driver.
///
/// Setpoints with a readback channel read from `<PV>_RBV`.
#[derive(Debug, Clone)]
pub struct EigerCam {
    name: String,
    prefix: String,

    /// Start or stop acquisition
    pub acquire: Signal<bool>,
    /// Exposure time, seconds
    pub acquire_time: Signal<f64>,
    /// Exposure period, seconds
    pub acquire_period: Signal<f64>,
    /// `ImageMode` (0 Single, 1 Multiple, 2 Continuous)
    pub image_mode: Signal<i64>,
    /// Images per trigger
    pub num_images: Signal<i64>,
    /// Triggers per series
    pub num_triggers: Signal<i64>,
    /// `TriggerMode`
    pub trigger_mode: Signal<i64>,
    /// Exposure per trigger, seconds
    pub trigger_exposure: Signal<f64>,
    /// Enable software triggers
    pub manual_trigger: Signal<bool>,
    /// Software trigger
    pub special_trigger_button: Signal<bool>,
    /// Stream compression
    pub compression_algo: Signal<String>,

    // File writer
    /// Write HDF5 files
    pub save_files: Signal<bool>,
    /// File owner user name
    pub file_owner: Signal<String>,
    /// File owner group name
    pub file_owner_grp: Signal<String>,
    /// File mode bits
    pub file_perms: Signal<i64>,
    /// Write directory
    pub file_path: Signal<String>,
    /// File name pattern, `<prefix>_$id`
    pub fw_name_pattern: Signal<String>,
    /// Series counter, incremented by the detector on arm
    pub sequence_id: Signal<i64>,

    // Header metadata
    /// Beam center x, pixels
    pub beam_center_x: Signal<f64>,
    /// Beam center y, pixels
    pub beam_center_y: Signal<f64>,
    /// Omega increment, degrees
    pub omega_incr: Signal<f64>,
    /// Omega start, degrees
    pub omega_start: Signal<f64>,
    /// Wavelength, angstrom
    pub wavelength: Signal<f64>,
    /// Detector distance, metres
    pub det_distance: Signal<f64>,
}

impl EigerCam {
    /// Build the register map from `signals` (prefix including the `cam1:` suffix).
    pub fn new(signals: &DeviceSignals) -> Self {
        Self {
            acquire: signals.with_readback("acquire", "Acquire"),
            acquire_time: signals.with_readback("acquire_time", "AcquireTime"),
            acquire_period: signals.with_readback("acquire_period", "AcquirePeriod"),
            image_mode: signals.with_readback("image_mode", "ImageMode"),
            num_images: signals.with_readback("num_images", "NumImages"),
            num_triggers: signals.with_readback("num_triggers", "NumTriggers"),
            trigger_mode: signals.with_readback("trigger_mode", "TriggerMode"),
            trigger_exposure: signals.with_readback("trigger_exposure", "TriggerExposure"),
            manual_trigger: signals.with_readback("manual_trigger", "ManualTrigger"),
            special_trigger_button: signals.plain("special_trigger_button", "SpecialTriggerButton"),
            compression_algo: signals.with_readback("compression_algo", "CompressionAlgo"),
            save_files: signals.with_readback("save_files", "SaveFiles"),
            file_owner: signals.with_readback("file_owner", "FileOwner"),
            file_owner_grp: signals.with_readback("file_owner_grp", "FileOwnerGrp"),
            file_perms: signals.with_readback("file_perms", "FilePerms"),
            file_path: signals.with_readback("file_path", "FilePath"),
            fw_name_pattern: signals.with_readback("fw_name_pattern", "FWNamePattern"),
            sequence_id: signals.plain("sequence_id", "SequenceId"),
            beam_center_x: signals.with_readback("beam_center_x", "BeamX"),
            beam_center_y: signals.with_readback("beam_center_y", "BeamY"),
            omega_incr: signals.with_readback("omega_incr", "OmegaIncr"),
            omega_start: signals.with_readback("omega_start", "OmegaStart"),
            wavelength: signals.with_readback("wavelength", "Wavelength"),
            det_distance: signals.with_readback("det_distance", "DetDist"),
            name: signals.device().to_string(),
            prefix: signals.prefix().to_string(),
        }
    }

    /// Device name, e.g. `eiger_single_cam`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// PV prefix including `cam1:`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Look up a register by attribute name (`acquire_time`, `num_images`, ...).
    pub fn signal(&self, attr: &str) -> Option<Arc<dyn SignalHandle>> {
        let handle = match attr {
            "acquire" => self.acquire.handle(),
            "acquire_time" => self.acquire_time.handle(),
            "acquire_period" => self.acquire_period.handle(),
            "image_mode" => self.image_mode.handle(),
            "num_images" => self.num_images.handle(),
            "num_triggers" => self.num_triggers.handle(),
            "trigger_mode" => self.trigger_mode.handle(),
            "trigger_exposure" => self.trigger_exposure.handle(),
            "manual_trigger" => self.manual_trigger.handle(),
            "special_trigger_button" => self.special_trigger_button.handle(),
            "compression_algo" => self.compression_algo.handle(),
            "save_files" => self.save_files.handle(),
            "file_owner" => self.file_owner.handle(),
            "file_owner_grp" => self.file_owner_grp.handle(),
            "file_perms" => self.file_perms.handle(),
            "file_path" => self.file_path.handle(),
            "fw_name_pattern" => self.fw_name_pattern.handle(),
            "sequence_id" => self.sequence_id.handle(),
            "beam_center_x" => self.beam_center_x.handle(),
            "beam_center_y" => self.beam_center_y.handle(),
            "omega_incr" => self.omega_incr.handle(),
            "omega_start" => self.omega_start.handle(),
            "wavelength" => self.wavelength.handle(),
            "det_distance" => self.det_distance.handle(),
            _ => return None,
        };
        Some(handle)
    }

    /// Stage signals in application order, starting with `Acquire = 0`.
    pub fn stage_signals(
        &self,
        settings: &EigerStageSettings,
    ) -> Vec<(Arc<dyn SignalHandle>, RegisterValue)> {
        vec![
            (self.acquire.handle(), RegisterValue::Int(0)),
            (
                self.image_mode.handle(),
                RegisterValue::Int(settings.image_mode),
            ),
            (
                self.trigger_mode.handle(),
                RegisterValue::Int(settings.trigger_mode),
            ),
            (
                self.num_triggers.handle(),
                RegisterValue::Int(settings.num_triggers),
            ),
            (
                self.compression_algo.handle(),
                RegisterValue::Str(settings.compression_algo.clone()),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{MemoryBackend, SettleConfig};

    fn cam() -> EigerCam {
        EigerCam::new(&DeviceSignals::new(
            Arc::new(MemoryBackend::new()),
            "eiger_single_cam",
            "XF:17IDC-ES:FMX{Det:Eig16M}cam1:",
            SettleConfig::default(),
        ))
    }

    #[test]
    fn test_register_names() {
        let cam = cam();
        assert_eq!(cam.acquire.write_pv(), "XF:17IDC-ES:FMX{Det:Eig16M}cam1:Acquire");
        assert_eq!(cam.acquire.read_pv(), "XF:17IDC-ES:FMX{Det:Eig16M}cam1:Acquire_RBV");
        assert_eq!(cam.det_distance.write_pv(), "XF:17IDC-ES:FMX{Det:Eig16M}cam1:DetDist");
        assert_eq!(cam.acquire_time.name(), "eiger_single_cam_acquire_time");
    }

    #[test]
    fn test_signal_lookup() {
        let cam = cam();
        let handle = cam.signal("wavelength").unwrap();
        assert_eq!(handle.pv(), "XF:17IDC-ES:FMX{Det:Eig16M}cam1:Wavelength");
        assert!(cam.signal("stats1").is_none());
    }

    #[test]
    fn test_default_stage_signals() {
        let sigs = cam().stage_signals(&EigerStageSettings::default());
        let names: Vec<_> = sigs.iter().map(|(s, _)| s.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "eiger_single_cam_acquire",
                "eiger_single_cam_image_mode",
                "eiger_single_cam_trigger_mode",
                "eiger_single_cam_num_triggers",
                "eiger_single_cam_compression_algo"
            ]
        );
        assert_eq!(sigs[0].1, RegisterValue::Int(0));
        assert_eq!(sigs[1].1, RegisterValue::Int(IMAGE_MODE_MULTIPLE));
        assert_eq!(sigs[4].1, RegisterValue::Str("BS LZ4".into()));
    }
}
