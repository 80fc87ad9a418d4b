//! In-memory register backend with a write journal and fault injection.
//!
//! `MemoryBackend` stands in for the control system in tests and in the
//! simulator. Every `put` is recorded in order so a test can assert the exact
//! sequence of register writes a plan produced. Writes to `PV` are mirrored to
//! `PV_RBV` so signals with readback settle immediately, unless the readback
//! is held with [`MemoryBackend::hold_readback`].
//!
//! The journal is unbounded by default so tests can inspect every write. A
//! long-running simulator should cap it with
//! [`MemoryBackend::with_journal_limit`].
//!
//! Faults are injected with [`FaultScenario`]:
//!
//! ```
//! use mxtools::registers::{FaultScenario, MemoryBackend, RegisterBackend, RegisterValue};
//!
//! # tokio_test::block_on(async {
//! let backend = MemoryBackend::new();
//! backend.inject(FaultScenario::FailPv { pv: "PC_GATE_START".into() }).await;
//! assert!(backend.put("PC_GATE_START", RegisterValue::Float(1.0)).await.is_err());
//! assert!(backend.put("PC_GATE_WID", RegisterValue::Float(1.0)).await.is_ok());
//! # });
//! ```

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::trace;

use super::{RegisterBackend, RegisterValue, READBACK_SUFFIX};
use crate::error::{MxResult, RegisterError, RegisterErrorKind};

const BACKEND_NAME: &str = "memory";

/// One journaled write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    /// PV that was written.
    pub pv: String,
    /// Value that was written.
    pub value: RegisterValue,
}

/// Failure injected into the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultScenario {
    /// Allow `count` successful puts, then fail every following put.
    FailAfterN {
        /// Number of puts that still succeed.
        count: usize,
    },
    /// Fail every put and get on one PV.
    FailPv {
        /// PV that fails.
        pv: String,
    },
    /// Fail every operation.
    CommunicationLoss,
}

#[derive(Debug, Default)]
struct MemoryState {
    registers: HashMap<String, RegisterValue>,
    journal: VecDeque<WriteRecord>,
    held_readbacks: HashSet<String>,
    faults: Vec<FaultScenario>,
    puts_accepted: usize,
}

/// Register backend backed by a `HashMap`.
#[derive(Debug)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    mirror_readback: bool,
    journal_limit: Option<usize>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty backend that mirrors writes to `_RBV` registers.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            mirror_readback: true,
            journal_limit: None,
        }
    }

    /// Keep at most `limit` journaled writes, dropping the oldest.
    pub fn with_journal_limit(mut self, limit: usize) -> Self {
        self.journal_limit = Some(limit);
        self
    }

    /// Stop mirroring writes to readback registers.
    ///
    /// Used to model hardware whose readback does not follow the setpoint.
    pub fn without_readback_mirroring(mut self) -> Self {
        self.mirror_readback = false;
        self
    }

    /// Stop mirroring writes of `pv` to its readback.
    ///
    /// The readback keeps whatever was last seeded, modelling a register the
    /// hardware drives itself (a detector still acquiring after `Acquire=1`).
    pub async fn hold_readback(&self, pv: &str) {
        self.state.write().await.held_readbacks.insert(pv.to_string());
    }

    /// Set a register without journaling it.
    ///
    /// Also seeds the readback register when mirroring is enabled.
    pub async fn seed(&self, pv: &str, value: impl Into<RegisterValue>) {
        let value = value.into();
        let mut state = self.state.write().await;
        if self.mirror_readback && !pv.ends_with(READBACK_SUFFIX) {
            state
                .registers
                .insert(format!("{}{}", pv, READBACK_SUFFIX), value.clone());
        }
        state.registers.insert(pv.to_string(), value);
    }

    /// Current value of a register.
    pub async fn value(&self, pv: &str) -> Option<RegisterValue> {
        self.state.read().await.registers.get(pv).cloned()
    }

    /// All journaled writes, oldest first.
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.read().await.journal.iter().cloned().collect()
    }

    /// PVs of all journaled writes, oldest first.
    pub async fn written_pvs(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .journal
            .iter()
            .map(|record| record.pv.clone())
            .collect()
    }

    /// Forget all journaled writes.
    pub async fn clear_journal(&self) {
        self.state.write().await.journal.clear();
    }

    /// Add a fault scenario.
    pub async fn inject(&self, fault: FaultScenario) {
        let mut state = self.state.write().await;
        state.puts_accepted = 0;
        state.faults.push(fault);
    }

    /// Remove all injected faults.
    pub async fn restore_communication(&self) {
        let mut state = self.state.write().await;
        state.faults.clear();
        state.puts_accepted = 0;
    }

    fn check_fault(state: &MemoryState, pv: &str, is_put: bool) -> MxResult<()> {
        for fault in &state.faults {
            match fault {
                FaultScenario::CommunicationLoss => {
                    return Err(RegisterError::new(
                        pv,
                        RegisterErrorKind::Communication,
                        format!("{} backend lost communication", BACKEND_NAME),
                    )
                    .into());
                }
                FaultScenario::FailPv { pv: failing } if failing == pv => {
                    return Err(RegisterError::new(
                        pv,
                        RegisterErrorKind::Hardware,
                        "injected fault",
                    )
                    .into());
                }
                FaultScenario::FailAfterN { count } if is_put && state.puts_accepted >= *count => {
                    return Err(RegisterError::new(
                        pv,
                        RegisterErrorKind::Hardware,
                        format!("injected failure after {} writes", count),
                    )
                    .into());
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RegisterBackend for MemoryBackend {
    async fn put(&self, pv: &str, value: RegisterValue) -> MxResult<()> {
        let mut state = self.state.write().await;
        Self::check_fault(&state, pv, true)?;
        state.puts_accepted += 1;

        trace!(pv, value = %value, "memory put");
        if self.mirror_readback && !state.held_readbacks.contains(pv) {
            state
                .registers
                .insert(format!("{}{}", pv, READBACK_SUFFIX), value.clone());
        }
        state.registers.insert(pv.to_string(), value.clone());
        state.journal.push_back(WriteRecord {
            pv: pv.to_string(),
            value,
        });
        if let Some(limit) = self.journal_limit {
            while state.journal.len() > limit {
                state.journal.pop_front();
            }
        }
        Ok(())
    }

    async fn get(&self, pv: &str) -> MxResult<RegisterValue> {
        let state = self.state.read().await;
        Self::check_fault(&state, pv, false)?;
        state.registers.get(pv).cloned().ok_or_else(|| {
            RegisterError::new(pv, RegisterErrorKind::Disconnected, "no such register").into()
        })
    }
}
