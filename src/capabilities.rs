//! Device lifecycle capabilities
//!
//! Small traits describing the hooks an orchestration runtime drives on a
//! detector during an acquisition:
//!
//! - `Stageable`: bracket one acquisition's setup and teardown
//! - `Triggerable`: acquire one exposure
//! - `Readable`: report what the last trigger produced, and its schema
//!
//! Each trait is async, requires `Send + Sync` and returns `anyhow::Result`.
//! Errors raised inside a device are [`MxError`](crate::error::MxError)s and
//! can be recovered with `downcast_ref`.
//!
//! # Example
//!
//! ```rust,ignore
//! detector.stage().await?;
//! for _ in 0..num_frames {
//!     detector.trigger().await?;
//!     let reading = detector.read().await?;
//! }
//! detector.unstage().await?;
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One value reported by `read()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// JSON value of the reading.
    pub value: Value,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

/// Schema of one key reported by `describe()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataKey {
    /// Where the value comes from (`PV:<name>` or `SIM:<name>`)
    pub source: String,
    /// `number`, `integer`, `string` or `array`
    pub dtype: String,
    /// Array shape; empty for scalars and external arrays of unknown size
    pub shape: Vec<usize>,
    /// `FILESTORE:` when the value is a datum id pointing at external data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external: Option<String>,
}

/// Capability: Staging
///
/// # Contract
/// - `stage()` is called once before an acquisition; staging twice without
///   an `unstage()` in between is an error
/// - `unstage()` is called once after it and must tolerate being called again
///
/// # Example
///
/// ```rust,ignore
/// device.stage().await?;
/// // ... triggers ...
/// device.unstage().await?;
/// ```
#[async_trait]
pub trait Stageable: Send + Sync {
    /// Prepare device for acquisition sequence
    async fn stage(&self) -> Result<()>;

    /// Clean up after acquisition sequence
    async fn unstage(&self) -> Result<()>;

    /// Query staging state
    ///
    /// # Default Implementation
    /// Returns an error indicating state query is not supported.
    async fn is_staged(&self) -> Result<bool> {
        anyhow::bail!("Staged state query not supported by this device")
    }
}

/// Capability: Software trigger
///
/// # Contract
/// - The device must be staged
/// - Returns once the exposure has finished and its datum is recorded
#[async_trait]
pub trait Triggerable: Send + Sync {
    /// Acquire one exposure.
    async fn trigger(&self) -> Result<()>;
}

/// Capability: Reading and describing
#[async_trait]
pub trait Readable: Send + Sync {
    /// Current values keyed by data key
    async fn read(&self) -> Result<BTreeMap<String, Reading>>;

    /// Schema for every key `read()` returns
    async fn describe(&self) -> Result<BTreeMap<String, DataKey>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    #[async_trait]
    impl Stageable for Plain {
        async fn stage(&self) -> Result<()> {
            Ok(())
        }

        async fn unstage(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_is_staged_default_is_unsupported() {
        assert!(Plain.is_staged().await.is_err());
    }

    #[test]
    fn test_data_key_skips_missing_external() {
        let key = DataKey {
            source: "PV:cam1:AcquireTime".into(),
            dtype: "number".into(),
            shape: vec![],
            external: None,
        };
        let json = serde_json::to_value(&key).unwrap();
        assert!(json.get("external").is_none());
    }
}
