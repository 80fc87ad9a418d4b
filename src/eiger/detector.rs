//! Eiger detector: cam + file plugin + strategies.

use anyhow::Context;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::cam::{EigerCam, EigerStageSettings};
use super::file_plugin::EigerFilePlugin;
use super::strategies::{ReadStrategy, TriggerStrategy};
use crate::capabilities::{DataKey, Readable, Reading, Stageable, Triggerable};
use crate::clock::Clock;
use crate::error::MxError;
use crate::registers::{RegisterValue, SignalHandle};

type StageSignals = Vec<(Arc<dyn SignalHandle>, RegisterValue)>;

/// What the strategies operate on.
#[derive(Debug, Clone)]
pub struct EigerParts {
    /// Driver registers
    pub cam: Arc<EigerCam>,
    /// Resource/Datum bookkeeping
    pub file: Arc<EigerFilePlugin>,
    /// Data key of the image, e.g. `eiger_single_image`
    pub image_name: String,
    /// `source` reported for the image key
    pub image_source: String,
    /// Timestamps for datums and readings
    pub clock: Arc<dyn Clock>,
}

/// An Eiger area detector.
///
/// # Lifecycle
///
/// ```text
/// stage()    Acquire <- 0, then ImageMode, TriggerMode, NumTriggers,
///            CompressionAlgo <- stage values (originals kept)
///            file plugin stage (Resource opened)
///            ManualTrigger <- 1
/// trigger()  TriggerStrategy, returns once the exposure is finished
/// read()     ReadStrategy
/// unstage()  ManualTrigger <- 0 (always)
///            file plugin unstage, stage values restored in reverse order
/// ```
#[derive(Debug)]
pub struct EigerDetector {
    name: String,
    parts: EigerParts,
    stage_sigs: StageSignals,
    trigger_strategy: Box<dyn TriggerStrategy>,
    read_strategy: Box<dyn ReadStrategy>,
    /// Original values of applied stage signals; `Some` while staged
    staged: Mutex<Option<StageSignals>>,
}

impl EigerDetector {
    /// Assemble a detector; stage signals are derived from `stage_settings`.
    pub fn new(
        name: impl Into<String>,
        parts: EigerParts,
        stage_settings: &EigerStageSettings,
        trigger_strategy: Box<dyn TriggerStrategy>,
        read_strategy: Box<dyn ReadStrategy>,
    ) -> Self {
        let stage_sigs = parts.cam.stage_signals(stage_settings);
        Self {
            name: name.into(),
            parts,
            stage_sigs,
            trigger_strategy,
            read_strategy,
            staged: Mutex::new(None),
        }
    }

    /// Detector name, e.g. `eiger_single`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver registers.
    pub fn cam(&self) -> &EigerCam {
        &self.parts.cam
    }

    /// Resource/Datum bookkeeping.
    pub fn file(&self) -> &EigerFilePlugin {
        &self.parts.file
    }

    /// Data key of the image.
    pub fn image_name(&self) -> &str {
        &self.parts.image_name
    }

    /// Signals applied on stage, in order.
    pub fn stage_signals(&self) -> &[(Arc<dyn SignalHandle>, RegisterValue)] {
        &self.stage_sigs
    }

    /// Restore originals in reverse order. Every signal is attempted; the
    /// first failure is returned.
    async fn restore(&self, originals: StageSignals) -> anyhow::Result<()> {
        let mut first_error = None;
        for (signal, original) in originals.into_iter().rev() {
            if let Err(e) = signal.set_value(original).await {
                warn!(signal = signal.name(), error = %e, "failed to restore stage signal");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Stageable for EigerDetector {
    #[instrument(skip(self), fields(detector = %self.name))]
    async fn stage(&self) -> anyhow::Result<()> {
        let mut staged = self.staged.lock().await;
        if staged.is_some() {
            return Err(MxError::AlreadyStaged(self.name.clone()).into());
        }

        let mut originals: StageSignals = Vec::with_capacity(self.stage_sigs.len());
        for (signal, value) in &self.stage_sigs {
            let applied = async {
                let original = signal.get_value().await?;
                signal.set_value(value.clone()).await?;
                Ok::<_, MxError>(original)
            }
            .await;
            match applied {
                Ok(original) => originals.push((signal.clone(), original)),
                Err(e) => {
                    self.restore(originals).await.ok();
                    return Err(e).with_context(|| format!("staging {}", signal.name()));
                }
            }
        }

        if let Err(e) = self.parts.file.stage().await {
            self.restore(originals).await.ok();
            return Err(e);
        }

        *staged = Some(originals);
        self.parts.cam.manual_trigger.set(true).await?;
        info!("staged");
        Ok(())
    }

    #[instrument(skip(self), fields(detector = %self.name))]
    async fn unstage(&self) -> anyhow::Result<()> {
        self.parts.cam.manual_trigger.set(false).await?;

        let mut staged = self.staged.lock().await;
        if let Some(originals) = staged.take() {
            self.parts.file.unstage().await?;
            self.restore(originals).await?;
            info!("unstaged");
        }
        Ok(())
    }

    async fn is_staged(&self) -> anyhow::Result<bool> {
        Ok(self.staged.lock().await.is_some())
    }
}

#[async_trait]
impl Triggerable for EigerDetector {
    async fn trigger(&self) -> anyhow::Result<()> {
        if self.staged.lock().await.is_none() {
            return Err(MxError::NotStaged(self.name.clone()).into());
        }
        self.trigger_strategy.trigger(&self.parts).await?;
        Ok(())
    }
}

#[async_trait]
impl Readable for EigerDetector {
    async fn read(&self) -> anyhow::Result<BTreeMap<String, Reading>> {
        Ok(self.read_strategy.read(&self.parts).await?)
    }

    async fn describe(&self) -> anyhow::Result<BTreeMap<String, DataKey>> {
        Ok(self.read_strategy.describe(&self.parts).await?)
    }
}
