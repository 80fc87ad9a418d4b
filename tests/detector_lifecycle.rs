//! Stage, trigger, read and unstage of the Eiger built from configuration.

use std::sync::Arc;
use std::time::Duration;

use mxtools::beamline::Beamline;
use mxtools::capabilities::{Readable, Stageable, Triggerable};
use mxtools::clock::FixedClock;
use mxtools::config::BeamlineConfig;
use mxtools::document::AssetDocument;
use mxtools::error::MxError;
use mxtools::registers::{FaultScenario, MemoryBackend, RegisterValue};
use serde_json::Value;

const CAM: &str = "XF:17IDC-ES:FMX{Det:Eig16M}cam1:";

async fn beamline_with(config: BeamlineConfig) -> (Arc<MemoryBackend>, Beamline) {
    let backend = Arc::new(MemoryBackend::new());
    for (pv, value) in [
        ("Acquire", RegisterValue::Int(0)),
        ("ImageMode", RegisterValue::Int(0)),
        ("TriggerMode", RegisterValue::Int(3)),
        ("NumTriggers", RegisterValue::Int(10)),
        ("CompressionAlgo", RegisterValue::Str("LZ4".into())),
        ("FWNImagesPerFile", RegisterValue::Int(1000)),
        ("SequenceId", RegisterValue::Int(0)),
        ("AcquireTime", RegisterValue::Float(0.02)),
    ] {
        backend.seed(&format!("{CAM}{pv}"), value).await;
    }
    // an idle detector: Acquire_RBV only moves when a test moves it
    backend.hold_readback(&format!("{CAM}Acquire")).await;

    let beamline = Beamline::with_clock(
        &config,
        backend.clone(),
        Arc::new(FixedClock::at_date(2024, 1, 1).unwrap()),
    )
    .unwrap();
    (backend, beamline)
}

async fn beamline() -> (Arc<MemoryBackend>, Beamline) {
    beamline_with(BeamlineConfig::fmx_defaults()).await
}

#[tokio::test]
async fn full_cycle_correlates_frames() {
    let (backend, beamline) = beamline().await;
    let eiger = &beamline.eiger;

    eiger.stage().await.unwrap();
    let resource = eiger.file().resource().await.unwrap();
    assert_eq!(resource.resource_path, "/GPFS/CENTRAL/xf17id2/20240101/");
    assert_eq!(
        backend.value(&format!("{CAM}ManualTrigger")).await,
        Some(RegisterValue::Int(1))
    );

    for counter in 0..3_i64 {
        backend.seed(&format!("{CAM}SequenceId"), counter).await;
        eiger.trigger().await.unwrap();
    }

    let readings = eiger.read().await.unwrap();
    let image = &readings["eiger_single_image"];
    assert_eq!(image.value, Value::from(format!("{}/2", resource.uid)));

    let docs = eiger.file().collect_asset_docs().await;
    let seq_ids: Vec<_> = docs
        .iter()
        .filter_map(|doc| match doc {
            AssetDocument::Datum(datum) => datum.seq_id(),
            AssetDocument::Resource(_) => None,
        })
        .collect();
    assert_eq!(seq_ids, vec![1, 2, 3]);

    eiger.unstage().await.unwrap();
    assert!(!eiger.is_staged().await.unwrap());
    assert_eq!(
        backend.value(&format!("{CAM}TriggerMode")).await,
        Some(RegisterValue::Int(3))
    );
    assert_eq!(
        backend.value(&format!("{CAM}CompressionAlgo")).await,
        Some(RegisterValue::Str("LZ4".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn trigger_completes_only_after_acquisition_ends() {
    let (backend, beamline) = beamline().await;
    let eiger = &beamline.eiger;
    eiger.stage().await.unwrap();
    assert_eq!(
        backend.value(&format!("{CAM}ImageMode")).await,
        Some(RegisterValue::Int(1))
    );

    backend.seed(&format!("{CAM}Acquire_RBV"), 1_i64).await;
    let trigger = eiger.trigger();
    tokio::pin!(trigger);

    // still acquiring: the trigger must not resolve
    assert!(tokio::time::timeout(Duration::from_secs(5), &mut trigger)
        .await
        .is_err());

    backend.seed(&format!("{CAM}Acquire_RBV"), 0_i64).await;
    trigger.await.unwrap();
    assert!(eiger.read().await.unwrap().contains_key("eiger_single_image"));
}

#[tokio::test(start_paused = true)]
async fn trigger_gives_up_after_acquire_timeout() {
    let mut config = BeamlineConfig::fmx_defaults();
    config.timing.acquire_timeout_ms = 500;
    let (backend, beamline) = beamline_with(config).await;
    beamline.eiger.stage().await.unwrap();
    backend.seed(&format!("{CAM}Acquire_RBV"), 1_i64).await;

    let err = beamline.eiger.trigger().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MxError>(),
        Some(MxError::WaitTimeout { timeout_ms: 500, .. })
    ));
}

#[tokio::test]
async fn trigger_before_stage_is_rejected() {
    let (backend, beamline) = beamline().await;

    let err = beamline.eiger.trigger().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MxError>(),
        Some(MxError::NotStaged(_))
    ));
    assert!(backend.writes().await.is_empty());
}

#[tokio::test]
async fn unstage_twice_leaves_manual_trigger_off() {
    let (backend, beamline) = beamline().await;
    let eiger = &beamline.eiger;

    eiger.stage().await.unwrap();
    eiger.unstage().await.unwrap();
    eiger.unstage().await.unwrap();

    assert_eq!(
        backend.value(&format!("{CAM}ManualTrigger")).await,
        Some(RegisterValue::Int(0))
    );
    let manual_trigger_writes = backend
        .written_pvs()
        .await
        .into_iter()
        .filter(|pv| pv.ends_with("ManualTrigger"))
        .count();
    assert_eq!(manual_trigger_writes, 3);
}

#[tokio::test]
async fn stage_signal_fault_restores_earlier_signals() {
    let (backend, beamline) = beamline().await;
    backend
        .inject(FaultScenario::FailPv {
            pv: format!("{CAM}CompressionAlgo"),
        })
        .await;

    assert!(beamline.eiger.stage().await.is_err());
    assert!(!beamline.eiger.is_staged().await.unwrap());
    assert!(beamline.eiger.file().resource().await.is_none());
    assert_eq!(
        backend.value(&format!("{CAM}TriggerMode")).await,
        Some(RegisterValue::Int(3))
    );
    assert_eq!(
        backend.value(&format!("{CAM}NumTriggers")).await,
        Some(RegisterValue::Int(10))
    );
}

#[tokio::test]
async fn streaming_read_reports_only_the_image() {
    let mut config = BeamlineConfig::fmx_defaults();
    config.eiger.streaming = true;
    config.eiger.read_attrs = vec!["acquire_time".to_string()];
    let (_backend, beamline) = beamline_with(config).await;

    let keys = beamline.eiger.describe().await.unwrap();
    assert_eq!(keys.len(), 1);
    let image = &keys["eiger_single_image"];
    assert_eq!(image.external.as_deref(), Some("FILESTORE:"));
    assert_eq!(image.source, "PV:XF:17IDC-ES:FMX{Det:Eig16M}image1:ArrayData");
}

#[tokio::test]
async fn full_read_reports_configured_attributes() {
    let mut config = BeamlineConfig::fmx_defaults();
    config.eiger.read_attrs = vec!["acquire_time".to_string()];
    let (_backend, beamline) = beamline_with(config).await;
    let eiger = &beamline.eiger;

    let keys = eiger.describe().await.unwrap();
    assert_eq!(keys["eiger_single_cam_acquire_time"].dtype, "number");

    // no trigger yet, so only the register reading
    let readings = eiger.read().await.unwrap();
    assert_eq!(readings.len(), 1);
    assert_eq!(
        readings["eiger_single_cam_acquire_time"].value,
        Value::from(0.02)
    );
}
