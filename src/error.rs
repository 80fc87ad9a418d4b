//! Error types for beamline device access and scan setup.
//!
//! `MxError` is the single error type for the crate. It is built with
//! `thiserror` and covers three broad groups:
//!
//! - **Register I/O**: `Register`, `ReadOnly`, `TypeMismatch`,
//!   `ReadbackTimeout`, `WaitTimeout`. These come from the register backend
//!   and are propagated unchanged; nothing in this crate retries them.
//! - **Lifecycle**: `NoOpenResource`, `AlreadyStaged`, `NotStaged`. Raised
//!   when the stage/trigger/unstage contract is violated by the caller.
//! - **Configuration**: `Config`, `Configuration`, `Template`,
//!   `PathOutsideRoot`. Raised at startup or while resolving write paths.
//!
//! Capability traits and plan execution return `anyhow::Result`; an
//! `MxError` inside can be recovered with `downcast_ref::<MxError>()`.

use thiserror::Error;

use crate::registers::RegisterValue;

// =============================================================================
// Register Errors
// =============================================================================

/// Failure category reported by a register backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterErrorKind {
    /// The channel could not be reached or the connection dropped.
    Communication,
    /// No register exists under this name.
    Disconnected,
    /// The hardware did not answer in time.
    Timeout,
    /// The hardware rejected the value.
    InvalidValue,
    /// The device reported a fault.
    Hardware,
}

impl std::fmt::Display for RegisterErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RegisterErrorKind::Communication => "communication",
            RegisterErrorKind::Disconnected => "disconnected",
            RegisterErrorKind::Timeout => "timeout",
            RegisterErrorKind::InvalidValue => "invalid_value",
            RegisterErrorKind::Hardware => "hardware",
        };
        write!(f, "{}", label)
    }
}

/// Error raised by a [`RegisterBackend`](crate::registers::RegisterBackend)
/// for a single PV.
#[derive(Error, Debug, Clone)]
#[error("Register '{pv}' {kind} error: {message}")]
pub struct RegisterError {
    /// Process variable that failed.
    pub pv: String,
    /// Failure category.
    pub kind: RegisterErrorKind,
    /// Backend-specific detail.
    pub message: String,
}

impl RegisterError {
    /// Create a new register error.
    pub fn new(pv: impl Into<String>, kind: RegisterErrorKind, message: impl Into<String>) -> Self {
        Self {
            pv: pv.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Convenience alias for results using the crate error type.
pub type MxResult<T> = std::result::Result<T, MxError>;

/// Primary error type for the crate.
#[derive(Error, Debug)]
pub enum MxError {
    /// A datum was requested while no resource was open.
    ///
    /// `generate_datum` must only run between `stage()` and `unstage()`.
    #[error("No resource is open; stage the file plugin before generating datums")]
    NoOpenResource,

    /// `stage()` was called on a device that is already staged.
    #[error("Device '{0}' is already staged")]
    AlreadyStaged(String),

    /// An operation that needs a staged device ran before `stage()`.
    #[error("Device '{0}' is not staged")]
    NotStaged(String),

    /// A write was attempted through a read-only signal.
    #[error("Signal '{0}' is read-only")]
    ReadOnly(String),

    /// A register held a value that cannot be converted to the signal type.
    #[error("Register '{pv}' holds {actual}, which is not a valid {expected}")]
    TypeMismatch {
        /// Process variable that was read.
        pv: String,
        /// Expected Rust type name.
        expected: &'static str,
        /// Value actually found.
        actual: RegisterValue,
    },

    /// Error reported by the register backend.
    #[error(transparent)]
    Register(#[from] RegisterError),

    /// A write completed but the readback never matched the requested value.
    #[error("Readback of '{pv}' did not reach {expected} within {timeout_ms} ms (last: {actual})")]
    ReadbackTimeout {
        /// Readback process variable.
        pv: String,
        /// Value that was written.
        expected: RegisterValue,
        /// Last value read back.
        actual: RegisterValue,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// A plan waited for a register to reach a value and gave up.
    #[error("Timed out after {timeout_ms} ms waiting for '{pv}' to become {expected}")]
    WaitTimeout {
        /// Process variable being polled.
        pv: String,
        /// Value being waited for.
        expected: RegisterValue,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The hardware sequence counter is too large to offset.
    #[error("Sequence counter {0} overflows when offset")]
    SequenceOverflow(i64),

    /// A resolved write path does not live under the configured root.
    #[error("Write path '{path}' is outside the configured root '{root}'")]
    PathOutsideRoot {
        /// Resolved write path.
        path: String,
        /// Configured root.
        root: String,
    },

    /// The write path template could not be rendered.
    #[error("Path template error: {0}")]
    Template(String),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MxError::NotStaged("eiger_single".to_string());
        assert_eq!(err.to_string(), "Device 'eiger_single' is not staged");
    }

    #[test]
    fn test_register_error_conversion() {
        let err: MxError = RegisterError::new(
            "XF:17IDC-ES:FMX{Det:Eig16M}cam1:Acquire",
            RegisterErrorKind::Timeout,
            "no response",
        )
        .into();
        assert!(matches!(err, MxError::Register(_)));
        assert_eq!(
            err.to_string(),
            "Register 'XF:17IDC-ES:FMX{Det:Eig16M}cam1:Acquire' timeout error: no response"
        );
    }

    #[test]
    fn test_type_mismatch_mentions_value() {
        let err = MxError::TypeMismatch {
            pv: "cam1:NumImages".into(),
            expected: "i64",
            actual: RegisterValue::Str("many".into()),
        };
        assert!(err.to_string().contains("\"many\""));
    }
}
