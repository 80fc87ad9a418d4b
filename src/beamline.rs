//! Beamline assembly.
//!
//! The owning application builds the devices once at startup from
//! configuration and a register backend, then hands them to plans:
//!
//! ```rust,ignore
//! let config = BeamlineConfig::load()?;
//! config.validate()?;
//! let beamline = Beamline::from_config(&config, backend)?;
//!
//! let mut plan = scans::zebra_daq_prep(&beamline.zebra);
//! PlanRunner::new().run(&mut plan).await?;
//! ```

use std::sync::Arc;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::BeamlineConfig;
use crate::eiger::{
    EigerCam, EigerDetector, EigerFilePlugin, EigerParts, EigerStageSettings, FullRead,
    ReadStrategy, SingleTrigger, StreamingRead,
};
use crate::error::{MxError, MxResult};
use crate::registers::{DeviceSignals, RegisterBackend};
use crate::scans::FileOwnership;
use crate::vector::VectorProgram;
use crate::zebra::Zebra;

/// Every device of the beamline.
#[derive(Debug)]
pub struct Beamline {
    /// The detector, shared with whoever runs the plans
    pub eiger: Arc<EigerDetector>,
    /// Position-compare trigger source
    pub zebra: Zebra,
    /// Goniometer vector program
    pub vector: VectorProgram,
    file_owner_group: Option<String>,
}

impl Beamline {
    /// Build all devices on the host clock.
    pub fn from_config(config: &BeamlineConfig, backend: Arc<dyn RegisterBackend>) -> MxResult<Self> {
        Self::with_clock(config, backend, Arc::new(SystemClock))
    }

    /// Build all devices with an explicit clock.
    pub fn with_clock(
        config: &BeamlineConfig,
        backend: Arc<dyn RegisterBackend>,
        clock: Arc<dyn Clock>,
    ) -> MxResult<Self> {
        let settle = config.timing.settle();
        let eiger_cfg = &config.eiger;
        let cam_prefix = eiger_cfg.cam_prefix();

        let cam = Arc::new(EigerCam::new(&DeviceSignals::new(
            backend.clone(),
            format!("{}_cam", eiger_cfg.name),
            cam_prefix.clone(),
            settle,
        )));
        let file = Arc::new(EigerFilePlugin::new(
            &DeviceSignals::new(
                backend.clone(),
                format!("{}_file", eiger_cfg.name),
                cam_prefix,
                settle,
            ),
            eiger_cfg.file_plugin_settings(),
            clock.clone(),
        ));

        let read_strategy: Box<dyn ReadStrategy> = if eiger_cfg.streaming {
            Box::new(StreamingRead)
        } else {
            let attrs = eiger_cfg
                .read_attrs
                .iter()
                .map(|attr| {
                    cam.signal(attr).ok_or_else(|| {
                        MxError::Configuration(format!("unknown eiger read attribute '{}'", attr))
                    })
                })
                .collect::<MxResult<Vec<_>>>()?;
            Box::new(FullRead::new(attrs))
        };

        let parts = EigerParts {
            cam,
            file,
            image_name: eiger_cfg.image_name(),
            image_source: format!("PV:{}image1:ArrayData", eiger_cfg.prefix),
            clock,
        };
        let eiger = Arc::new(EigerDetector::new(
            eiger_cfg.name.clone(),
            parts,
            &EigerStageSettings::from(&eiger_cfg.stage),
            Box::new(
                SingleTrigger::new(config.timing.acquire_timeout())
                    .with_poll_interval(settle.poll_interval),
            ),
            read_strategy,
        ));

        let zebra = Zebra::new(&DeviceSignals::new(
            backend.clone(),
            config.zebra.name.clone(),
            config.zebra.prefix.clone(),
            settle,
        ));
        let vector = VectorProgram::new(&DeviceSignals::new(
            backend,
            config.vector.name.clone(),
            config.vector.prefix.clone(),
            settle,
        ));

        info!(
            eiger = %eiger_cfg.prefix,
            zebra = %config.zebra.prefix,
            vector = %config.vector.prefix,
            "beamline assembled"
        );

        Ok(Self {
            eiger,
            zebra,
            vector,
            file_owner_group: eiger_cfg.file_owner_group.clone(),
        })
    }

    /// Ownership of files the detector writes for the current user.
    pub fn file_ownership(&self) -> FileOwnership {
        FileOwnership::current_user(self.file_owner_group.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::MemoryBackend;

    #[test]
    fn test_from_config_names_devices() {
        let config = BeamlineConfig::fmx_defaults();
        let beamline = Beamline::from_config(&config, Arc::new(MemoryBackend::new())).unwrap();

        assert_eq!(beamline.eiger.name(), "eiger_single");
        assert_eq!(beamline.eiger.image_name(), "eiger_single_image");
        assert_eq!(
            beamline.eiger.file().sequence_id.read_pv(),
            "XF:17IDC-ES:FMX{Det:Eig16M}cam1:SequenceId"
        );
        assert_eq!(beamline.zebra.name(), "zebra");
        assert_eq!(
            beamline.vector.num_frames.write_pv(),
            "XF:17IDC-ES:FMX{Gon:1-Vec}NumFrames"
        );
    }

    #[test]
    fn test_unknown_read_attr_is_rejected() {
        let mut config = BeamlineConfig::fmx_defaults();
        config.eiger.read_attrs = vec!["stats1_total".to_string()];
        let err = Beamline::from_config(&config, Arc::new(MemoryBackend::new())).unwrap_err();
        assert!(matches!(err, MxError::Configuration(_)));
    }

    #[test]
    fn test_file_ownership_uses_configured_group() {
        let mut config = BeamlineConfig::fmx_defaults();
        config.eiger.file_owner_group = Some("fmx".to_string());
        let beamline = Beamline::from_config(&config, Arc::new(MemoryBackend::new())).unwrap();
        assert_eq!(beamline.file_ownership().group, "fmx");
    }
}
