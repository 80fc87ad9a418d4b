//! Trigger and read behaviour of an [`EigerDetector`](super::EigerDetector).
//!
//! A detector is assembled from one [`TriggerStrategy`] and one
//! [`ReadStrategy`]; swapping either changes how it acquires or what it
//! reports without touching the register map.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::detector::EigerParts;
use crate::capabilities::{DataKey, Reading};
use crate::clock::unix_timestamp;
use crate::error::MxResult;
use crate::registers::{wait_for_value, RegisterValue, SignalHandle};

/// How one `trigger()` acquires an exposure.
#[async_trait]
pub trait TriggerStrategy: Send + Sync + Debug {
    /// Acquire one exposure; returns once the detector has finished it.
    async fn trigger(&self, parts: &EigerParts) -> MxResult<()>;
}

/// What `read()` and `describe()` report.
#[async_trait]
pub trait ReadStrategy: Send + Sync + Debug {
    /// Current readings keyed by data key name.
    async fn read(&self, parts: &EigerParts) -> MxResult<BTreeMap<String, Reading>>;
    /// Data keys matching `read()`.
    async fn describe(&self, parts: &EigerParts) -> MxResult<BTreeMap<String, DataKey>>;
}

/// One software-started acquisition per trigger.
///
/// Starts `Acquire` without waiting on its readback, records a datum for
/// the image key, presses the special trigger button, then waits for
/// `Acquire_RBV` to fall back to 0. A detector still busy after
/// `acquire_timeout` fails the trigger with [`MxError::WaitTimeout`].
///
/// [`MxError::WaitTimeout`]: crate::error::MxError::WaitTimeout
#[derive(Debug, Clone, Copy)]
pub struct SingleTrigger {
    acquire_timeout: Duration,
    poll_interval: Duration,
}

impl Default for SingleTrigger {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl SingleTrigger {
    /// Trigger that gives each exposure up to `acquire_timeout`.
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            acquire_timeout,
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Interval between polls of `Acquire_RBV`.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Longest wait for one exposure.
    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }
}

#[async_trait]
impl TriggerStrategy for SingleTrigger {
    async fn trigger(&self, parts: &EigerParts) -> MxResult<()> {
        parts.cam.acquire.put(true).await?;

        let timestamp = unix_timestamp(&parts.clock.now());
        let datum = parts
            .file
            .generate_datum(&parts.image_name, timestamp, Map::new())
            .await?;
        debug!(datum_id = %datum.datum_id, seq_id = ?datum.seq_id(), "triggered");

        parts.cam.special_trigger_button.set(true).await?;

        wait_for_value(
            &parts.cam.acquire,
            &RegisterValue::Int(0),
            self.acquire_timeout,
            self.poll_interval,
        )
        .await?;
        debug!(datum_id = %datum.datum_id, "acquisition complete");
        Ok(())
    }
}

/// The image datum plus a configurable set of cam registers.
#[derive(Debug, Clone, Default)]
pub struct FullRead {
    read_attrs: Vec<Arc<dyn SignalHandle>>,
}

impl FullRead {
    /// Report the image plus `read_attrs`, in that order.
    pub fn new(read_attrs: Vec<Arc<dyn SignalHandle>>) -> Self {
        Self { read_attrs }
    }
}

#[async_trait]
impl ReadStrategy for FullRead {
    async fn read(&self, parts: &EigerParts) -> MxResult<BTreeMap<String, Reading>> {
        let mut readings = image_reading(parts).await;
        let timestamp = unix_timestamp(&parts.clock.now());
        for signal in &self.read_attrs {
            let value = signal.get_value().await?;
            readings.insert(
                signal.name().to_string(),
                Reading {
                    value: value.to_json(),
                    timestamp,
                },
            );
        }
        Ok(readings)
    }

    async fn describe(&self, parts: &EigerParts) -> MxResult<BTreeMap<String, DataKey>> {
        let mut keys = image_data_key(parts);
        for signal in &self.read_attrs {
            let value = signal.get_value().await?;
            keys.insert(
                signal.name().to_string(),
                DataKey {
                    source: format!("PV:{}", signal.pv()),
                    dtype: value.dtype().to_string(),
                    shape: vec![],
                    external: None,
                },
            );
        }
        Ok(keys)
    }
}

/// Only the image key, for streaming consumers.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingRead;

#[async_trait]
impl ReadStrategy for StreamingRead {
    async fn read(&self, parts: &EigerParts) -> MxResult<BTreeMap<String, Reading>> {
        Ok(image_reading(parts).await)
    }

    async fn describe(&self, parts: &EigerParts) -> MxResult<BTreeMap<String, DataKey>> {
        Ok(image_data_key(parts))
    }
}

/// The latest image datum id, if a trigger has produced one.
async fn image_reading(parts: &EigerParts) -> BTreeMap<String, Reading> {
    let mut readings = BTreeMap::new();
    if let Some((datum, timestamp)) = parts.file.latest_datum(&parts.image_name).await {
        readings.insert(
            parts.image_name.clone(),
            Reading {
                value: Value::from(datum.datum_id),
                timestamp,
            },
        );
    }
    readings
}

fn image_data_key(parts: &EigerParts) -> BTreeMap<String, DataKey> {
    let mut keys = BTreeMap::new();
    keys.insert(
        parts.image_name.clone(),
        DataKey {
            source: parts.image_source.clone(),
            dtype: "array".to_string(),
            shape: vec![],
            external: Some("FILESTORE:".to_string()),
        },
    );
    keys
}
