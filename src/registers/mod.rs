//! Typed hardware registers
//!
//! Every device in this crate is an explicit register map: a struct whose
//! fields are [`Signal<T>`] handles, one per process variable (PV). Signals
//! talk to hardware through a [`RegisterBackend`], so the register maps do
//! not depend on any particular control-system binding. A production
//! deployment plugs in an EPICS client; tests and the simulator use
//! [`MemoryBackend`].
//!
//! # Architecture
//!
//! ```text
//! EigerCam / Zebra / VectorProgram    (register maps)
//!   └─ Signal<T>                      (typed get / put / set)
//!        └─ Arc<dyn RegisterBackend>  (untyped put / get by PV name)
//! ```
//!
//! # Write semantics
//!
//! - [`Signal::put`] writes and returns immediately.
//! - [`Signal::set`] writes, then polls the readback PV until it matches
//!   the requested value or the settle timeout expires. This is the
//!   "set and wait" used by every scan-setup plan.
//!
//! # Example
//!
//! ```rust,ignore
//! let backend: Arc<dyn RegisterBackend> = Arc::new(MemoryBackend::new());
//! let exposure = Signal::<f64>::with_readback(backend, "eiger_cam_acquire_time", "cam1:AcquireTime");
//!
//! exposure.set(0.05).await?;           // writes cam1:AcquireTime, waits on cam1:AcquireTime_RBV
//! assert_eq!(exposure.get().await?, 0.05);
//! ```

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::error::{MxError, MxResult};

pub use memory::{FaultScenario, MemoryBackend, WriteRecord};

/// Suffix appended to a PV name to address its readback channel.
pub const READBACK_SUFFIX: &str = "_RBV";

// =============================================================================
// RegisterValue
// =============================================================================

/// Untyped value carried to and from a register backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    /// Integer and enum registers.
    Int(i64),
    /// Analog registers.
    Float(f64),
    /// String and waveform-as-string registers.
    Str(String),
}

impl RegisterValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RegisterValue::Int(v) => Some(*v as f64),
            RegisterValue::Float(v) => Some(*v),
            RegisterValue::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Compare against a requested value.
    ///
    /// Numbers compare across `Int`/`Float` within `tolerance`; strings
    /// compare exactly.
    pub fn matches(&self, requested: &RegisterValue, tolerance: f64) -> bool {
        match (self, requested) {
            (RegisterValue::Str(a), RegisterValue::Str(b)) => a == b,
            (RegisterValue::Int(a), RegisterValue::Int(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => (a - b).abs() <= tolerance,
                _ => false,
            },
        }
    }

    /// Data type label used in `describe()` output.
    pub fn dtype(&self) -> &'static str {
        match self {
            RegisterValue::Int(_) => "integer",
            RegisterValue::Float(_) => "number",
            RegisterValue::Str(_) => "string",
        }
    }

    /// JSON form of the value for readings and document kwargs.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RegisterValue::Int(v) => serde_json::Value::from(*v),
            RegisterValue::Float(v) => serde_json::Value::from(*v),
            RegisterValue::Str(s) => serde_json::Value::from(s.clone()),
        }
    }
}

impl std::fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterValue::Int(v) => write!(f, "{}", v),
            RegisterValue::Float(v) => write!(f, "{}", v),
            RegisterValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for RegisterValue {
    fn from(value: i64) -> Self {
        RegisterValue::Int(value)
    }
}

impl From<f64> for RegisterValue {
    fn from(value: f64) -> Self {
        RegisterValue::Float(value)
    }
}

impl From<bool> for RegisterValue {
    fn from(value: bool) -> Self {
        RegisterValue::Int(i64::from(value))
    }
}

impl From<&str> for RegisterValue {
    fn from(value: &str) -> Self {
        RegisterValue::Str(value.to_string())
    }
}

impl From<String> for RegisterValue {
    fn from(value: String) -> Self {
        RegisterValue::Str(value)
    }
}

// =============================================================================
// RegisterType - conversions for Signal<T>
// =============================================================================

/// Rust types a [`Signal`] can carry.
pub trait RegisterType: Clone + Debug + Send + Sync + 'static {
    /// Type name used in error messages.
    const TYPE_NAME: &'static str;

    /// Convert into the wire representation.
    fn into_value(self) -> RegisterValue;

    /// Convert from the wire representation, if compatible.
    fn from_value(value: &RegisterValue) -> Option<Self>;
}

impl RegisterType for i64 {
    const TYPE_NAME: &'static str = "i64";

    fn into_value(self) -> RegisterValue {
        RegisterValue::Int(self)
    }

    fn from_value(value: &RegisterValue) -> Option<Self> {
        match value {
            RegisterValue::Int(v) => Some(*v),
            RegisterValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            RegisterValue::Float(_) => None,
            RegisterValue::Str(s) => s.trim().parse().ok(),
        }
    }
}

impl RegisterType for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn into_value(self) -> RegisterValue {
        RegisterValue::Float(self)
    }

    fn from_value(value: &RegisterValue) -> Option<Self> {
        value.as_f64()
    }
}

impl RegisterType for bool {
    const TYPE_NAME: &'static str = "bool";

    fn into_value(self) -> RegisterValue {
        RegisterValue::from(self)
    }

    fn from_value(value: &RegisterValue) -> Option<Self> {
        match value {
            RegisterValue::Int(v) => Some(*v != 0),
            RegisterValue::Float(v) => Some(*v != 0.0),
            RegisterValue::Str(s) => match s.trim() {
                "1" | "true" | "On" | "Yes" => Some(true),
                "0" | "false" | "Off" | "No" => Some(false),
                _ => None,
            },
        }
    }
}

impl RegisterType for String {
    const TYPE_NAME: &'static str = "String";

    fn into_value(self) -> RegisterValue {
        RegisterValue::Str(self)
    }

    fn from_value(value: &RegisterValue) -> Option<Self> {
        match value {
            RegisterValue::Str(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

// =============================================================================
// RegisterBackend
// =============================================================================

/// Transport that moves untyped values to and from named PVs.
///
/// # Contract
/// - `put` returns once the backend accepted the write; it does not wait for
///   the hardware readback.
/// - `get` returns the most recent value of the PV.
/// - Errors are reported as [`MxError::Register`] and are never retried by
///   callers in this crate.
#[async_trait]
pub trait RegisterBackend: Send + Sync {
    /// Write a value to a PV.
    async fn put(&self, pv: &str, value: RegisterValue) -> MxResult<()>;

    /// Read the current value of a PV.
    async fn get(&self, pv: &str) -> MxResult<RegisterValue>;
}

// =============================================================================
// Signal<T>
// =============================================================================

/// How long `set()` waits for a readback to match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SettleConfig {
    /// Give up after this long.
    pub timeout: Duration,
    /// Delay between readback polls.
    pub poll_interval: Duration,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Typed handle to one hardware register.
///
/// A signal has a write PV and a read PV. For plain registers they are the
/// same; registers with readback read from `<pv>_RBV`.
pub struct Signal<T: RegisterType> {
    name: String,
    write_pv: String,
    read_pv: String,
    read_only: bool,
    tolerance: f64,
    settle: SettleConfig,
    backend: Arc<dyn RegisterBackend>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: RegisterType> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            write_pv: self.write_pv.clone(),
            read_pv: self.read_pv.clone(),
            read_only: self.read_only,
            tolerance: self.tolerance,
            settle: self.settle,
            backend: self.backend.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: RegisterType> std::fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("write_pv", &self.write_pv)
            .field("read_pv", &self.read_pv)
            .field("read_only", &self.read_only)
            .field("type", &T::TYPE_NAME)
            .finish()
    }
}

impl<T: RegisterType> Signal<T> {
    /// Signal whose reads and writes go to the same PV.
    pub fn new(
        backend: Arc<dyn RegisterBackend>,
        name: impl Into<String>,
        pv: impl Into<String>,
    ) -> Self {
        let pv = pv.into();
        Self {
            name: name.into(),
            write_pv: pv.clone(),
            read_pv: pv,
            read_only: false,
            tolerance: 1e-9,
            settle: SettleConfig::default(),
            backend,
            _marker: PhantomData,
        }
    }

    /// Signal that writes `pv` and reads back from `pv_RBV`.
    pub fn with_readback(
        backend: Arc<dyn RegisterBackend>,
        name: impl Into<String>,
        pv: impl Into<String>,
    ) -> Self {
        let mut signal = Self::new(backend, name, pv);
        signal.read_pv = format!("{}{}", signal.write_pv, READBACK_SUFFIX);
        signal
    }

    /// Read-only signal.
    pub fn read_only(
        backend: Arc<dyn RegisterBackend>,
        name: impl Into<String>,
        pv: impl Into<String>,
    ) -> Self {
        let mut signal = Self::new(backend, name, pv);
        signal.read_only = true;
        signal
    }

    /// Override the readback settle behaviour.
    pub fn with_settle(mut self, settle: SettleConfig) -> Self {
        self.settle = settle;
        self
    }

    /// Numeric tolerance used when comparing readbacks.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Attribute name, e.g. `eiger_single_cam_acquire_time`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// PV written by `put`/`set`.
    pub fn write_pv(&self) -> &str {
        &self.write_pv
    }

    /// PV read by `get`.
    pub fn read_pv(&self) -> &str {
        &self.read_pv
    }

    /// Whether writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Read the current value.
    pub async fn get(&self) -> MxResult<T> {
        let raw = self.backend.get(&self.read_pv).await?;
        T::from_value(&raw).ok_or_else(|| MxError::TypeMismatch {
            pv: self.read_pv.clone(),
            expected: T::TYPE_NAME,
            actual: raw,
        })
    }

    /// Write without waiting for the readback.
    pub async fn put(&self, value: T) -> MxResult<()> {
        self.put_raw(value.into_value()).await
    }

    /// Write and wait until the readback matches.
    pub async fn set(&self, value: T) -> MxResult<()> {
        self.set_raw(value.into_value()).await
    }

    /// Type-erased handle for use in plans and stage signal lists.
    pub fn handle(&self) -> Arc<dyn SignalHandle> {
        Arc::new(self.clone())
    }

    async fn put_raw(&self, value: RegisterValue) -> MxResult<()> {
        if self.read_only {
            return Err(MxError::ReadOnly(self.name.clone()));
        }
        debug!(signal = %self.name, pv = %self.write_pv, value = %value, "put");
        self.backend.put(&self.write_pv, value).await
    }

    async fn set_raw(&self, value: RegisterValue) -> MxResult<()> {
        self.put_raw(value.clone()).await?;

        let deadline = Instant::now() + self.settle.timeout;
        loop {
            let readback = self.backend.get(&self.read_pv).await?;
            if readback.matches(&value, self.tolerance) {
                trace!(signal = %self.name, readback = %readback, "set complete");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MxError::ReadbackTimeout {
                    pv: self.read_pv.clone(),
                    expected: value,
                    actual: readback,
                    timeout_ms: self.settle.timeout.as_millis() as u64,
                });
            }
            sleep(self.settle.poll_interval).await;
        }
    }
}

// =============================================================================
// SignalHandle - type-erased access
// =============================================================================

/// Type-erased view of a [`Signal`].
///
/// Plans carry writes to heterogeneous registers in one command list, and
/// devices keep lists of signals to apply on stage; both use this trait.
/// Values are converted to the signal's type on the way in, so a plan can
/// never write a string into a numeric register.
#[async_trait]
pub trait SignalHandle: Send + Sync + Debug {
    /// Attribute name.
    fn name(&self) -> &str;

    /// PV written by `put_value`/`set_value`.
    fn pv(&self) -> &str;

    /// Write without waiting for the readback.
    async fn put_value(&self, value: RegisterValue) -> MxResult<()>;

    /// Write and wait until the readback matches.
    async fn set_value(&self, value: RegisterValue) -> MxResult<()>;

    /// Read the current value.
    async fn get_value(&self) -> MxResult<RegisterValue>;
}

/// Poll `signal` until it reads `expected` or `timeout` elapses.
///
/// Unlike [`Signal::set`] nothing is written; this waits on a state the
/// hardware reaches by itself, such as a detector dropping `Acquire`.
pub async fn wait_for_value(
    signal: &dyn SignalHandle,
    expected: &RegisterValue,
    timeout: Duration,
    poll_interval: Duration,
) -> MxResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if signal.get_value().await?.matches(expected, 1e-9) {
            trace!(signal = signal.name(), expected = %expected, "wait complete");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(MxError::WaitTimeout {
                pv: signal.pv().to_string(),
                expected: expected.clone(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        sleep(poll_interval).await;
    }
}

impl<T: RegisterType> Signal<T> {
    fn coerce(&self, value: RegisterValue) -> MxResult<RegisterValue> {
        T::from_value(&value)
            .map(RegisterType::into_value)
            .ok_or_else(|| MxError::TypeMismatch {
                pv: self.write_pv.clone(),
                expected: T::TYPE_NAME,
                actual: value,
            })
    }
}

#[async_trait]
impl<T: RegisterType> SignalHandle for Signal<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn pv(&self) -> &str {
        &self.write_pv
    }

    async fn put_value(&self, value: RegisterValue) -> MxResult<()> {
        let value = self.coerce(value)?;
        self.put_raw(value).await
    }

    async fn set_value(&self, value: RegisterValue) -> MxResult<()> {
        let value = self.coerce(value)?;
        self.set_raw(value).await
    }

    async fn get_value(&self) -> MxResult<RegisterValue> {
        Ok(self.get().await?.into_value())
    }
}

// =============================================================================
// DeviceSignals - per-device signal construction
// =============================================================================

/// Builds the signals of one device.
///
/// Attribute names are `<device>_<attr>` and PVs are `<prefix><suffix>`, so
/// `DeviceSignals::new(b, "zebra", "XF:17IDB-ES:FMX{Zeb:3}:", s).plain::<i64>("pc_arm_sel", "PC_ARM_SEL")`
/// is `zebra_pc_arm_sel` at `XF:17IDB-ES:FMX{Zeb:3}:PC_ARM_SEL`.
#[derive(Clone)]
pub struct DeviceSignals {
    backend: Arc<dyn RegisterBackend>,
    device: String,
    prefix: String,
    settle: SettleConfig,
}

impl DeviceSignals {
    /// Builder for `device` at PV prefix `prefix`.
    pub fn new(
        backend: Arc<dyn RegisterBackend>,
        device: impl Into<String>,
        prefix: impl Into<String>,
        settle: SettleConfig,
    ) -> Self {
        Self {
            backend,
            device: device.into(),
            prefix: prefix.into(),
            settle,
        }
    }

    /// Builder for a child device, e.g. `zebra` -> `zebra_pc`.
    pub fn child(&self, attr: &str) -> Self {
        Self {
            backend: self.backend.clone(),
            device: self.attr_name(attr),
            prefix: self.prefix.clone(),
            settle: self.settle,
        }
    }

    /// Device name.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// PV prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn attr_name(&self, attr: &str) -> String {
        format!("{}_{}", self.device, attr)
    }

    fn pv(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    /// Register read and written at the same PV.
    pub fn plain<T: RegisterType>(&self, attr: &str, suffix: &str) -> Signal<T> {
        Signal::new(self.backend.clone(), self.attr_name(attr), self.pv(suffix))
            .with_settle(self.settle)
    }

    /// Register with a `_RBV` readback channel.
    pub fn with_readback<T: RegisterType>(&self, attr: &str, suffix: &str) -> Signal<T> {
        Signal::with_readback(self.backend.clone(), self.attr_name(attr), self.pv(suffix))
            .with_settle(self.settle)
    }

    /// Register that rejects writes.
    pub fn read_only<T: RegisterType>(&self, attr: &str, suffix: &str) -> Signal<T> {
        Signal::read_only(self.backend.clone(), self.attr_name(attr), self.pv(suffix))
    }
}

impl std::fmt::Debug for DeviceSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSignals")
            .field("device", &self.device)
            .field("prefix", &self.prefix)
            .finish()
    }
}
