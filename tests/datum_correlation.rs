//! Resource/Datum correlation against the detector's SequenceId counter.

use std::sync::Arc;

use mxtools::capabilities::Stageable;
use mxtools::clock::FixedClock;
use mxtools::document::AssetDocument;
use mxtools::eiger::{EigerFilePlugin, FilePluginSettings};
use mxtools::error::MxError;
use mxtools::registers::{DeviceSignals, MemoryBackend, SettleConfig};
use serde_json::{Map, Value};

const CAM: &str = "XF:17IDC-ES:FMX{Det:Eig16M}cam1:";

async fn file_plugin(template: &str, root: &str) -> (Arc<MemoryBackend>, EigerFilePlugin) {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(&format!("{CAM}FWNImagesPerFile"), 100_i64).await;
    backend.seed(&format!("{CAM}SequenceId"), 0_i64).await;

    let plugin = EigerFilePlugin::new(
        &DeviceSignals::new(backend.clone(), "eiger_single_file", CAM, SettleConfig::default()),
        FilePluginSettings::new(template, root),
        Arc::new(FixedClock::at_date(2024, 1, 1).unwrap()),
    );
    (backend, plugin)
}

#[tokio::test]
async fn seq_id_is_hardware_counter_plus_one() {
    let (backend, plugin) = file_plugin("/data/{date}/", "/data").await;
    plugin.stage().await.unwrap();

    for counter in [0_i64, 1, 2, 41, 999, i64::MAX - 1] {
        backend.seed(&format!("{CAM}SequenceId"), counter).await;
        let datum = plugin
            .generate_datum("eiger_single_image", 0.0, Map::new())
            .await
            .unwrap();
        assert_eq!(datum.seq_id(), Some(counter + 1), "counter {counter}");
    }
}

#[tokio::test]
async fn counter_at_max_overflows() {
    let (backend, plugin) = file_plugin("/data/{date}/", "/data").await;
    plugin.stage().await.unwrap();
    backend.seed(&format!("{CAM}SequenceId"), i64::MAX).await;

    let err = plugin
        .generate_datum("eiger_single_image", 0.0, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MxError::SequenceOverflow(i64::MAX)));
}

#[tokio::test]
async fn datum_before_stage_touches_nothing() {
    let (backend, plugin) = file_plugin("/data/{date}/", "/data").await;

    let err = plugin
        .generate_datum("eiger_single_image", 0.0, Map::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MxError::NoOpenResource));
    assert!(backend.writes().await.is_empty());
    assert!(plugin.collect_asset_docs().await.is_empty());
}

#[tokio::test]
async fn stage_resolves_dated_path_and_name_pattern() {
    let (backend, plugin) = file_plugin("/data/{date}/", "/data").await;
    plugin.stage().await.unwrap();

    let resource = plugin.resource().await.unwrap();
    assert_eq!(resource.resource_path, "/data/2024-01-01/");
    assert_eq!(resource.root, "/data");
    assert_eq!(resource.prefix.len(), 18);
    assert_eq!(resource.name_pattern, format!("{}_$id", resource.prefix));

    assert_eq!(
        backend.value(&format!("{CAM}FilePath")).await,
        Some("/data/2024-01-01/".into())
    );
    assert_eq!(
        backend.value(&format!("{CAM}FWNamePattern")).await,
        Some(resource.name_pattern.clone().into())
    );
}

#[tokio::test]
async fn datums_reference_the_open_resource_in_order() {
    let (backend, plugin) = file_plugin("/data/{date}/", "/data").await;
    plugin.set_run_start(Some("run-1".to_string())).await;
    plugin.stage().await.unwrap();

    let mut extra = Map::new();
    extra.insert("point_number".to_string(), Value::from(4));
    backend.seed(&format!("{CAM}SequenceId"), 6_i64).await;
    plugin
        .generate_datum("eiger_single_image", 1.5, extra)
        .await
        .unwrap();
    backend.seed(&format!("{CAM}SequenceId"), 7_i64).await;
    plugin
        .generate_datum("eiger_single_image", 2.5, Map::new())
        .await
        .unwrap();

    let docs = plugin.collect_asset_docs().await;
    assert_eq!(docs.len(), 3);

    let resource = match &docs[0] {
        AssetDocument::Resource(resource) => resource.clone(),
        other => panic!("expected resource first, got {other:?}"),
    };
    assert_eq!(resource.run_start.as_deref(), Some("run-1"));
    assert!(docs.iter().all(|doc| doc.resource_uid() == resource.uid));

    let datums: Vec<_> = docs[1..]
        .iter()
        .map(|doc| match doc {
            AssetDocument::Datum(datum) => datum.clone(),
            other => panic!("expected datum, got {other:?}"),
        })
        .collect();
    assert_eq!(datums[0].datum_id, format!("{}/0", resource.uid));
    assert_eq!(datums[1].datum_id, format!("{}/1", resource.uid));
    assert_eq!(datums[0].seq_id(), Some(7));
    assert_eq!(datums[1].seq_id(), Some(8));
    assert_eq!(datums[0].datum_kwargs.get("point_number"), Some(&Value::from(4)));

    let (latest, timestamp) = plugin.latest_datum("eiger_single_image").await.unwrap();
    assert_eq!(latest, datums[1]);
    assert_eq!(timestamp, 2.5);
}

#[tokio::test]
async fn restage_opens_a_fresh_resource() {
    let (_backend, plugin) = file_plugin("/data/{date}/", "/data").await;
    plugin.stage().await.unwrap();
    let first = plugin.resource().await.unwrap();
    plugin.unstage().await.unwrap();
    assert!(plugin.resource().await.is_none());

    plugin.stage().await.unwrap();
    let second = plugin.resource().await.unwrap();
    assert_ne!(first.uid, second.uid);
    assert_ne!(first.prefix, second.prefix);

    let datum = plugin
        .generate_datum("eiger_single_image", 0.0, Map::new())
        .await
        .unwrap();
    assert_eq!(datum.datum_id, format!("{}/0", second.uid));
}
