//! Scan-setup plans.
//!
//! Each function returns a [`RegisterPlan`] that prepares zebra, vector
//! program or detector for one acquisition. The order of writes inside a
//! plan is fixed; select and arm registers come after the geometry they
//! depend on.

use nix::unistd::{getgid, getuid, Group, User};
use std::time::Duration;

use crate::eiger::EigerCam;
use crate::plans::{PlanBuilder, RegisterPlan};
use crate::vector::VectorProgram;
use crate::zebra::Zebra;

/// `rw-r--r--`
pub const DEFAULT_FILE_PERMS: i64 = 0o644;

/// Zebra encoder used by raster scans unless told otherwise.
pub const DEFAULT_SCAN_ENCODER: i64 = 3;

const ZEBRA_RESET_SETTLE: Duration = Duration::from_secs(2);
const ENCODER_SETTLE: Duration = Duration::from_secs(1);

/// Seconds to milliseconds, as the zebra and vector registers expect.
fn ms(seconds: f64) -> f64 {
    seconds * 1000.0
}

/// Reset the zebra and route its outputs for data collection.
pub fn zebra_daq_prep(zebra: &Zebra) -> RegisterPlan {
    PlanBuilder::new("zebra_daq_prep", "Zebra DAQ Prep")
        .set(&zebra.reset, 1)
        .sleep(ZEBRA_RESET_SETTLE)
        .set(&zebra.out1, 31)
        .set(&zebra.m1_set_pos, 1)
        .set(&zebra.m2_set_pos, 1)
        .set(&zebra.m3_set_pos, 1)
        .set(&zebra.pc.arm_sel, 1)
        .build()
}

/// Parameters of a rotation (or still) vector scan.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorScanParams {
    /// Degrees
    pub angle_start: f64,
    /// Degrees
    pub gate_width: f64,
    /// Degrees
    pub scan_width: f64,
    /// Milliseconds
    pub pulse_width: f64,
    /// Milliseconds
    pub pulse_step: f64,
    /// Seconds
    pub exposure_period_per_image: f64,
    /// Images in the scan
    pub num_images: i64,
    /// Still shots leave the gate geometry untouched
    pub is_still: bool,
}

/// Program the zebra gate and pulse train for a vector scan.
///
/// `angle_start` is written to the gate start register (`PC_GATE_START`).
/// The gate source select (`PC_GATE_SEL`) is an enum and is not touched
/// here; an angle written there would select an arbitrary gate source.
pub fn setup_zebra_vector_scan(zebra: &Zebra, p: &VectorScanParams) -> RegisterPlan {
    let gate = &zebra.pc.gate;
    let pulse = &zebra.pc.pulse;
    PlanBuilder::new("setup_zebra_vector_scan", "Setup Zebra Vector Scan")
        .arg("angle_start", p.angle_start)
        .arg("num_images", p.num_images)
        .arg("is_still", p.is_still)
        .set(&gate.start, p.angle_start)
        .set_if(!p.is_still, &gate.width, p.gate_width)
        .set_if(!p.is_still, &gate.step, p.scan_width)
        .set(&gate.num_gates, 1)
        .set(&pulse.start, 0.0)
        .set(&pulse.width, p.pulse_width)
        .set(&pulse.step, p.pulse_step)
        .set(&pulse.delay, ms(p.exposure_period_per_image / 2.0))
        .set(&pulse.max, p.num_images)
        .build()
}

/// Parameters of one raster line.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterScanParams {
    /// Degrees
    pub angle_start: f64,
    /// Degrees per image; 0 leaves the gate geometry untouched
    pub image_width: f64,
    /// Seconds
    pub exposure_time_per_image: f64,
    /// Seconds
    pub exposure_period_per_image: f64,
    /// Seconds
    pub detector_dead_time: f64,
    /// Images in the line
    pub num_images: i64,
    /// Zebra encoder the gate follows
    pub scan_encoder: i64,
}

/// Program the zebra for one raster line.
pub fn setup_zebra_vector_scan_for_raster(zebra: &Zebra, p: &RasterScanParams) -> RegisterPlan {
    let pc = &zebra.pc;
    let total_width = p.num_images as f64 * p.image_width;
    PlanBuilder::new(
        "setup_zebra_vector_scan_for_raster",
        "Setup Zebra Vector Scan For Raster",
    )
    .arg("angle_start", p.angle_start)
    .arg("image_width", p.image_width)
    .arg("num_images", p.num_images)
    .arg("scan_encoder", p.scan_encoder)
    .set(&pc.encoder, p.scan_encoder)
    .sleep(ENCODER_SETTLE)
    .set(&pc.direction, 0)
    .set(&pc.gate.sel, 0)
    .set(&pc.gate.start, p.angle_start)
    .set_if(p.image_width != 0.0, &pc.gate.width, total_width)
    .set_if(p.image_width != 0.0, &pc.gate.step, total_width + 0.01)
    .set(&pc.gate.num_gates, 1)
    .set(&pc.pulse.sel, 1)
    .set(&pc.pulse.start, 0.0)
    .set(
        &pc.pulse.width,
        ms(p.exposure_time_per_image - p.detector_dead_time),
    )
    .set(&pc.pulse.step, ms(p.exposure_period_per_image))
    .set(&pc.pulse.delay, ms(p.exposure_period_per_image / 2.0))
    .build()
}

/// Load the goniometer vector program.
pub fn setup_vector_program(
    vector: &VectorProgram,
    num_images: i64,
    angle_start: f64,
    angle_end: f64,
    exposure_period_per_image: f64,
) -> RegisterPlan {
    PlanBuilder::new("setup_vector_program", "Setup Vector Program")
        .arg("num_images", num_images)
        .arg("angle_start", angle_start)
        .arg("angle_end", angle_end)
        .set(&vector.num_frames, num_images)
        .set(&vector.start.omega, angle_start)
        .set(&vector.end.omega, angle_end)
        .set(&vector.frame_exptime, ms(exposure_period_per_image))
        .set(&vector.hold, 0)
        .build()
}

/// Set detector exposure time and period (seconds).
pub fn setup_eiger_exposure(cam: &EigerCam, exposure_time: f64, exposure_period: f64) -> RegisterPlan {
    PlanBuilder::new("setup_eiger_exposure", "Setup Eiger Exposure")
        .arg("exposure_time", exposure_time)
        .arg("exposure_period", exposure_period)
        .set(&cam.acquire_time, exposure_time)
        .set(&cam.acquire_period, exposure_period)
        .build()
}

/// Set detector trigger mode, trigger count and per-trigger exposure.
pub fn setup_eiger_triggers(
    cam: &EigerCam,
    mode: i64,
    num_triggers: i64,
    exposure_per_image: f64,
) -> RegisterPlan {
    PlanBuilder::new("setup_eiger_triggers", "Setup Eiger Triggers")
        .arg("mode", mode)
        .arg("num_triggers", num_triggers)
        .set(&cam.trigger_mode, mode)
        .set(&cam.num_triggers, num_triggers)
        .set(&cam.trigger_exposure, exposure_per_image)
        .build()
}

/// Owner, group and mode of files the detector writes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOwnership {
    /// User name written to `FileOwner`
    pub owner: String,
    /// Group name written to `FileOwnerGrp`
    pub group: String,
    /// Mode bits written to `FilePerms`, e.g. `0o644`
    pub perms: i64,
}

impl FileOwnership {
    /// The user running this process and its primary group.
    ///
    /// The owner is the login name from `LOGNAME`, `USER`, `LNAME` or
    /// `USERNAME`, falling back to the password database entry of the real
    /// uid. `group` overrides the process's primary group when given.
    /// Ids without a database entry are written as numbers.
    pub fn current_user(group: Option<String>) -> Self {
        let uid = getuid();
        let owner = ["LOGNAME", "USER", "LNAME", "USERNAME"]
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|name| !name.is_empty()))
            .or_else(|| User::from_uid(uid).ok().flatten().map(|user| user.name))
            .unwrap_or_else(|| uid.to_string());

        let group = group.unwrap_or_else(|| {
            let gid = getgid();
            Group::from_gid(gid)
                .ok()
                .flatten()
                .map(|group| group.name)
                .unwrap_or_else(|| gid.to_string())
        });

        Self {
            owner,
            group,
            perms: DEFAULT_FILE_PERMS,
        }
    }
}

/// Everything the detector needs to arm for one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmingParams {
    /// Omega start, degrees
    pub start: f64,
    /// Omega increment per image, degrees
    pub width: f64,
    /// Images in the collection
    pub num_images: i64,
    /// Seconds
    pub exposure_per_image: f64,
    /// Path whose last component becomes the file name prefix
    pub file_prefix: String,
    /// Directory the detector writes to
    pub data_directory_name: String,
    /// First value of `SequenceId`
    pub file_number_start: i64,
    /// Pixels
    pub x_beam: f64,
    /// Pixels
    pub y_beam: f64,
    /// Angstrom
    pub wavelength: f64,
    /// Metres
    pub det_distance_m: f64,
    /// Owner, group and mode of written files
    pub ownership: FileOwnership,
}

impl ArmingParams {
    /// `<last component of file_prefix>_$id`
    pub fn name_pattern(&self) -> String {
        let base = self.file_prefix.rsplit('/').next().unwrap_or_default();
        format!("{}_$id", base)
    }
}

/// Configure file writing and header metadata, then arm the detector.
///
/// The final `Acquire = 1` is timed and logged as the arm time.
pub fn setup_eiger_arming(cam: &EigerCam, p: &ArmingParams) -> RegisterPlan {
    PlanBuilder::new("setup_eiger_arming", "Setup Eiger Arming")
        .arg("start", p.start)
        .arg("width", p.width)
        .arg("num_images", p.num_images)
        .arg("file_prefix", &p.file_prefix)
        .arg("data_directory_name", &p.data_directory_name)
        .set(&cam.save_files, true)
        .set(&cam.file_owner, p.ownership.owner.clone())
        .set(&cam.file_owner_grp, p.ownership.group.clone())
        .set(&cam.file_perms, p.ownership.perms)
        .set(&cam.acquire_time, p.exposure_per_image)
        .set(&cam.acquire_period, p.exposure_per_image)
        .set(&cam.num_images, p.num_images)
        .set(&cam.file_path, p.data_directory_name.clone())
        .set(&cam.fw_name_pattern, p.name_pattern())
        .set(&cam.sequence_id, p.file_number_start)
        .set(&cam.beam_center_x, p.x_beam)
        .set(&cam.beam_center_y, p.y_beam)
        .set(&cam.omega_incr, p.width)
        .set(&cam.omega_start, p.start)
        .set(&cam.wavelength, p.wavelength)
        .set(&cam.det_distance, p.det_distance_m)
        .timed_set(&cam.acquire, true, "arm")
        .build()
}

/// Stop acquiring and wait until the detector reports idle.
pub fn setup_eiger_stop_acquire_and_wait(cam: &EigerCam, timeout: Duration) -> RegisterPlan {
    PlanBuilder::new(
        "setup_eiger_stop_acquire_and_wait",
        "Setup Eiger Stop Acquire And Wait",
    )
    .set(&cam.acquire, false)
    .wait_for(&cam.acquire, false, timeout)
    .build()
}
