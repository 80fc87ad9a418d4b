//! Eiger file-writer plugin: Resource/Datum correlation.
//!
//! The detector writes frames into HDF5 sub-files named `<prefix>_data_<seq>`
//! and keeps its own counter of the sub-file it writes *next*. On stage the
//! plugin picks a fresh prefix and write directory and opens a [`Resource`];
//! on every trigger it reads that counter and records a [`Datum`] whose
//! `seq_id` is the counter plus [`SEQUENCE_ID_OFFSET`], i.e. the sub-file the
//! frame actually lands in.
//!
//! # Lifecycle
//!
//! ```text
//! stage()           FilePath <- /data/2024-01-01/
//!                   FWNamePattern <- 3f2a9c1e-1d2b-4c3d_$id
//!                   Resource { images_per_file: FWNImagesPerFile }
//! generate_datum()  Datum { seq_id: SequenceId + 1 }   (per trigger)
//! unstage()         resource closed
//! ```

use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use strfmt::strfmt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::capabilities::Stageable;
use crate::clock::Clock;
use crate::document::{new_short_uid, new_uid, now_ns, AssetDocument, Datum, Resource};
use crate::error::{MxError, MxResult};
use crate::registers::{DeviceSignals, Signal};

/// The hardware counter names the next sub-file, not the current one.
pub const SEQUENCE_ID_OFFSET: i64 = 1;

/// Handler spec recorded in every Resource.
pub const FILESTORE_SPEC: &str = "AD_EIGER2";

/// Static settings of a file plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePluginSettings {
    /// Write directory template, e.g. `/data/{date}/` or `/data/%Y%m%d/`
    pub write_path_template: String,
    /// Every resolved write path must live under this root
    pub root: String,
    /// Added to `SequenceId` to get the `seq_id` of the next datum
    pub sequence_id_offset: i64,
    /// `spec` of every Resource
    pub filestore_spec: String,
}

impl FilePluginSettings {
    /// Settings with the default sequence offset and filestore spec.
    pub fn new(write_path_template: impl Into<String>, root: impl Into<String>) -> Self {
        Self {
            write_path_template: write_path_template.into(),
            root: root.into(),
            sequence_id_offset: SEQUENCE_ID_OFFSET,
            filestore_spec: FILESTORE_SPEC.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct FilePluginState {
    resource: Option<Resource>,
    datum_counter: u64,
    frame_num: Option<i64>,
    run_start: Option<String>,
    /// Latest datum per data key with its timestamp
    latest: HashMap<String, (Datum, f64)>,
    asset_docs: Vec<AssetDocument>,
}

/// File-writer plugin of an Eiger detector.
#[derive(Debug)]
pub struct EigerFilePlugin {
    name: String,
    /// `SequenceId`: index of the next sub-file the detector writes
    pub sequence_id: Signal<i64>,
    /// `FilePath`
    pub file_path: Signal<String>,
    /// `FWNamePattern`
    pub file_write_name_pattern: Signal<String>,
    /// `FWNImagesPerFile`
    pub file_write_images_per_file: Signal<i64>,
    settings: FilePluginSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<FilePluginState>,
}

impl EigerFilePlugin {
    /// Build the plugin for registers under `signals` (e.g. prefix `XF:17IDC-ES:FMX{Det:Eig16M}cam1:`).
    pub fn new(signals: &DeviceSignals, settings: FilePluginSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: signals.device().to_string(),
            sequence_id: signals.read_only("sequence_id", "SequenceId"),
            file_path: signals.with_readback("file_path", "FilePath"),
            file_write_name_pattern: signals.with_readback("file_write_name_pattern", "FWNamePattern"),
            file_write_images_per_file: signals
                .with_readback("file_write_images_per_file", "FWNImagesPerFile"),
            settings,
            clock,
            state: Mutex::new(FilePluginState::default()),
        }
    }

    /// Device name, e.g. `eiger_single_file`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write path and resource settings.
    pub fn settings(&self) -> &FilePluginSettings {
        &self.settings
    }

    /// Resolve the write directory for the current clock date.
    pub fn resolve_write_path(&self) -> MxResult<String> {
        let path = render_write_path(&self.settings.write_path_template, &self.clock.now())?;
        if !Path::new(&path).starts_with(&self.settings.root) {
            return Err(MxError::PathOutsideRoot {
                path,
                root: self.settings.root.clone(),
            });
        }
        Ok(path)
    }

    /// Record a datum for `key` under the open resource.
    ///
    /// `seq_id` is the current hardware `SequenceId` plus the offset. The
    /// frame number set with [`set_frame_num`](Self::set_frame_num) is added
    /// when present. Fails with [`MxError::NoOpenResource`] before stage,
    /// without touching hardware.
    #[instrument(skip(self, datum_kwargs), fields(plugin = %self.name))]
    pub async fn generate_datum(
        &self,
        key: &str,
        timestamp: f64,
        mut datum_kwargs: Map<String, Value>,
    ) -> MxResult<Datum> {
        let mut state = self.state.lock().await;
        let resource_uid = match &state.resource {
            Some(resource) => resource.uid.clone(),
            None => return Err(MxError::NoOpenResource),
        };

        let counter = self.sequence_id.get().await?;
        let seq_id = counter
            .checked_add(self.settings.sequence_id_offset)
            .ok_or(MxError::SequenceOverflow(counter))?;

        datum_kwargs.insert("seq_id".to_string(), Value::from(seq_id));
        if let Some(frame_num) = state.frame_num {
            datum_kwargs.insert("frame_num".to_string(), Value::from(frame_num));
        }

        let datum = Datum {
            datum_id: format!("{}/{}", resource_uid, state.datum_counter),
            resource: resource_uid,
            datum_kwargs,
        };
        state.datum_counter += 1;
        state
            .latest
            .insert(key.to_string(), (datum.clone(), timestamp));
        state.asset_docs.push(AssetDocument::Datum(datum.clone()));

        debug!(datum_id = %datum.datum_id, counter, seq_id, "datum generated");
        Ok(datum)
    }

    /// Drain buffered Resource and Datum documents, oldest first.
    pub async fn collect_asset_docs(&self) -> Vec<AssetDocument> {
        std::mem::take(&mut self.state.lock().await.asset_docs)
    }

    /// The open resource, if staged.
    pub async fn resource(&self) -> Option<Resource> {
        self.state.lock().await.resource.clone()
    }

    /// Latest datum generated for `key` and its timestamp.
    pub async fn latest_datum(&self, key: &str) -> Option<(Datum, f64)> {
        self.state.lock().await.latest.get(key).cloned()
    }

    /// Frame number attached to following datums; `None` for whole-file datums.
    pub async fn set_frame_num(&self, frame_num: Option<i64>) {
        self.state.lock().await.frame_num = frame_num;
    }

    /// Run uid recorded in the next resource.
    pub async fn set_run_start(&self, run_start: Option<String>) {
        self.state.lock().await.run_start = run_start;
    }
}

#[async_trait]
impl Stageable for EigerFilePlugin {
    #[instrument(skip(self), fields(plugin = %self.name))]
    async fn stage(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.resource.is_some() {
            return Err(MxError::AlreadyStaged(self.name.clone()).into());
        }

        let prefix = new_short_uid();
        let write_path = self.resolve_write_path()?;
        let name_pattern = format!("{}_$id", prefix);

        self.file_path.set(write_path).await?;
        self.file_write_name_pattern
            .set(name_pattern.clone())
            .await?;

        let resource_path = normalize_dir(&self.file_path.get().await?);
        let images_per_file = self.file_write_images_per_file.get().await?;

        let mut resource_kwargs = Map::new();
        resource_kwargs.insert("images_per_file".to_string(), Value::from(images_per_file));

        let resource = Resource {
            uid: new_uid(),
            spec: self.settings.filestore_spec.clone(),
            root: self.settings.root.clone(),
            resource_path,
            prefix,
            name_pattern,
            resource_kwargs,
            path_semantics: "posix".to_string(),
            run_start: state.run_start.clone(),
            time_ns: now_ns(),
        };

        info!(
            resource = %resource.uid,
            path = %resource.file_prefix(),
            images_per_file,
            "resource opened"
        );
        state.datum_counter = 0;
        state.latest.clear();
        state
            .asset_docs
            .push(AssetDocument::Resource(resource.clone()));
        state.resource = Some(resource);
        Ok(())
    }

    async fn unstage(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if let Some(resource) = state.resource.take() {
            info!(resource = %resource.uid, datums = state.datum_counter, "resource closed");
        }
        state.latest.clear();
        Ok(())
    }

    async fn is_staged(&self) -> anyhow::Result<bool> {
        Ok(self.state.lock().await.resource.is_some())
    }
}

/// Render a write-path template at `at`.
///
/// `{date}`, `{year}`, `{month}` and `{day}` are substituted first, then any
/// chrono `strftime` specifiers. The result always ends in exactly one `/`.
pub fn render_write_path(template: &str, at: &DateTime<Local>) -> MxResult<String> {
    let mut vars = HashMap::new();
    vars.insert("date".to_string(), at.format("%Y-%m-%d").to_string());
    vars.insert("year".to_string(), at.format("%Y").to_string());
    vars.insert("month".to_string(), at.format("%m").to_string());
    vars.insert("day".to_string(), at.format("%d").to_string());

    let rendered = if template.contains('{') {
        strfmt(template, &vars).map_err(|e| MxError::Template(format!("'{}': {}", template, e)))?
    } else {
        template.to_string()
    };

    let rendered = if rendered.contains('%') {
        let items: Vec<Item<'_>> = StrftimeItems::new(&rendered).collect();
        if items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(MxError::Template(format!(
                "'{}': invalid strftime specifier",
                template
            )));
        }
        let mut out = String::new();
        write!(out, "{}", at.format_with_items(items.iter()))
            .map_err(|e| MxError::Template(format!("'{}': {}", template, e)))?;
        out
    } else {
        rendered
    };

    Ok(normalize_dir(&rendered))
}

/// Collapse trailing slashes to exactly one.
pub fn normalize_dir(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::registers::{MemoryBackend, SettleConfig};

    const PREFIX: &str = "XF:17IDC-ES:FMX{Det:Eig16M}cam1:";

    fn jan_first() -> DateTime<Local> {
        FixedClock::at_date(2024, 1, 1).unwrap().now()
    }

    async fn plugin(template: &str, root: &str) -> (Arc<MemoryBackend>, EigerFilePlugin) {
        let backend = Arc::new(MemoryBackend::new());
        backend.seed(&format!("{}FWNImagesPerFile", PREFIX), 100_i64).await;
        backend.seed(&format!("{}SequenceId", PREFIX), 0_i64).await;
        let plugin = EigerFilePlugin::new(
            &DeviceSignals::new(backend.clone(), "eiger_single_file", PREFIX, SettleConfig::default()),
            FilePluginSettings::new(template, root),
            Arc::new(FixedClock::at_date(2024, 1, 1).unwrap()),
        );
        (backend, plugin)
    }

    #[test]
    fn test_render_date_placeholders() {
        assert_eq!(
            render_write_path("/data/{date}/", &jan_first()).unwrap(),
            "/data/2024-01-01/"
        );
        assert_eq!(
            render_write_path("/data/{year}/{month}/{day}", &jan_first()).unwrap(),
            "/data/2024/01/01/"
        );
    }

    #[test]
    fn test_render_strftime() {
        assert_eq!(
            render_write_path("/GPFS/xf17id2/%Y%m%d//", &jan_first()).unwrap(),
            "/GPFS/xf17id2/20240101/"
        );
    }

    #[test]
    fn test_render_rejects_unknown_placeholder() {
        assert!(matches!(
            render_write_path("/data/{proposal}/", &jan_first()),
            Err(MxError::Template(_))
        ));
    }

    #[test]
    fn test_normalize_dir() {
        assert_eq!(normalize_dir("/data"), "/data/");
        assert_eq!(normalize_dir("/data///"), "/data/");
        assert_eq!(normalize_dir("/"), "/");
    }

    #[tokio::test]
    async fn test_stage_opens_resource() {
        let (backend, plugin) = plugin("/data/{date}/", "/data").await;
        plugin.stage().await.unwrap();

        let resource = plugin.resource().await.unwrap();
        assert_eq!(resource.resource_path, "/data/2024-01-01/");
        assert_eq!(resource.name_pattern, format!("{}_$id", resource.prefix));
        assert_eq!(resource.images_per_file(), Some(100));
        assert_eq!(resource.spec, "AD_EIGER2");
        assert_eq!(
            backend.written_pvs().await,
            vec![format!("{}FilePath", PREFIX), format!("{}FWNamePattern", PREFIX)]
        );
    }

    #[tokio::test]
    async fn test_stage_twice_fails() {
        let (_backend, plugin) = plugin("/data/{date}/", "/").await;
        plugin.stage().await.unwrap();
        let err = plugin.stage().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MxError>(),
            Some(MxError::AlreadyStaged(_))
        ));
    }

    #[tokio::test]
    async fn test_path_outside_root_is_rejected() {
        let (backend, plugin) = plugin("/tmp/{date}/", "/data").await;
        let err = plugin.stage().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MxError>(),
            Some(MxError::PathOutsideRoot { .. })
        ));
        assert!(backend.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_generate_datum_before_stage_fails() {
        let (_backend, plugin) = plugin("/data/{date}/", "/").await;
        let err = plugin
            .generate_datum("eiger_single_image", 0.0, Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MxError::NoOpenResource));
    }

    #[tokio::test]
    async fn test_datum_carries_frame_num_and_extras() {
        let (backend, plugin) = plugin("/data/{date}/", "/").await;
        plugin.stage().await.unwrap();
        plugin.set_frame_num(Some(7)).await;
        backend.seed(&format!("{}SequenceId", PREFIX), 3_i64).await;

        let mut extra = Map::new();
        extra.insert("point_number".into(), Value::from(2));
        let datum = plugin
            .generate_datum("eiger_single_image", 1.5, extra)
            .await
            .unwrap();

        assert_eq!(datum.seq_id(), Some(4));
        assert_eq!(datum.frame_num(), Some(7));
        assert_eq!(datum.datum_kwargs["point_number"], 2);

        let resource = plugin.resource().await.unwrap();
        assert_eq!(datum.datum_id, format!("{}/0", resource.uid));
        assert_eq!(
            plugin.latest_datum("eiger_single_image").await,
            Some((datum, 1.5))
        );
    }

    #[tokio::test]
    async fn test_sequence_overflow() {
        let (backend, plugin) = plugin("/data/{date}/", "/").await;
        plugin.stage().await.unwrap();
        backend.seed(&format!("{}SequenceId", PREFIX), i64::MAX).await;
        assert!(matches!(
            plugin.generate_datum("img", 0.0, Map::new()).await,
            Err(MxError::SequenceOverflow(i64::MAX))
        ));
    }

    #[tokio::test]
    async fn test_asset_docs_drain_in_order() {
        let (_backend, plugin) = plugin("/data/{date}/", "/").await;
        plugin.set_run_start(Some("run-1".into())).await;
        plugin.stage().await.unwrap();
        plugin.generate_datum("img", 0.0, Map::new()).await.unwrap();
        plugin.generate_datum("img", 0.1, Map::new()).await.unwrap();

        let docs = plugin.collect_asset_docs().await;
        assert_eq!(docs.len(), 3);
        match &docs[0] {
            AssetDocument::Resource(r) => assert_eq!(r.run_start.as_deref(), Some("run-1")),
            other => panic!("expected resource first, got {other:?}"),
        }
        assert!(docs.iter().all(|d| d.resource_uid() == docs[0].resource_uid()));
        assert!(plugin.collect_asset_docs().await.is_empty());
    }

    #[tokio::test]
    async fn test_unstage_is_idempotent() {
        let (_backend, plugin) = plugin("/data/{date}/", "/").await;
        plugin.stage().await.unwrap();
        plugin.unstage().await.unwrap();
        plugin.unstage().await.unwrap();
        assert!(!plugin.is_staged().await.unwrap());
        assert!(plugin.resource().await.is_none());
    }
}
