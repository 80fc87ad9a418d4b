//! Plan system for register sequencing
//!
//! Plans are declarative: they don't touch hardware, they yield commands for
//! the [`PlanRunner`](crate::run_engine::PlanRunner) to execute in order.
//! Every scan-setup routine in [`scans`](crate::scans) builds one.
//!
//! # Plan Commands
//!
//! - `Set` - write a register and wait for its readback
//! - `TimedSet` - `Set`, logging how long it took
//! - `Sleep` - wait for a duration
//! - `WaitFor` - poll a register until it reaches a value
//!
//! # Example Plan
//!
//! ```rust,ignore
//! let plan = PlanBuilder::new("setup_vector_program", "Setup Vector Program")
//!     .set(&vector.num_frames, 100)
//!     .set(&vector.start.omega, 0.0)
//!     .set(&vector.end.omega, 90.0)
//!     .build();
//!
//! // Plan yields:
//! // Set(vector_num_frames, 100)
//! // Set(vector_start_omega, 0.0)
//! // Set(vector_end_omega, 90.0)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::registers::{RegisterType, RegisterValue, Signal, SignalHandle};

/// Commands that plans yield for the runner to execute
#[derive(Debug, Clone)]
pub enum PlanCommand {
    /// Write a register and wait for the readback to match
    Set {
        signal: Arc<dyn SignalHandle>,
        value: RegisterValue,
    },
    /// Like `Set`, and log the elapsed time under `label`
    TimedSet {
        signal: Arc<dyn SignalHandle>,
        value: RegisterValue,
        label: String,
    },
    /// Wait for a duration
    Sleep { duration: Duration },
    /// Poll a register until it reads `value`
    WaitFor {
        signal: Arc<dyn SignalHandle>,
        value: RegisterValue,
        timeout: Duration,
    },
}

impl PlanCommand {
    /// Register written by this command, if any.
    pub fn written_pv(&self) -> Option<&str> {
        match self {
            PlanCommand::Set { signal, .. } | PlanCommand::TimedSet { signal, .. } => {
                Some(signal.pv())
            }
            PlanCommand::Sleep { .. } | PlanCommand::WaitFor { .. } => None,
        }
    }
}

impl std::fmt::Display for PlanCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanCommand::Set { signal, value } => write!(f, "set {} = {}", signal.name(), value),
            PlanCommand::TimedSet {
                signal,
                value,
                label,
            } => write!(f, "set {} = {} ({} timed)", signal.name(), value, label),
            PlanCommand::Sleep { duration } => write!(f, "sleep {:?}", duration),
            PlanCommand::WaitFor {
                signal,
                value,
                timeout,
            } => write!(
                f,
                "wait for {} == {} (timeout {:?})",
                signal.name(),
                value,
                timeout
            ),
        }
    }
}

/// Plan trait - all plans implement this to generate commands
pub trait Plan: Send + Sync {
    /// Plan type identifier (e.g., "setup_vector_program")
    fn plan_type(&self) -> &str;

    /// Human-readable plan name
    fn plan_name(&self) -> &str;

    /// Plan arguments for documentation
    fn plan_args(&self) -> HashMap<String, String>;

    /// Total number of commands
    fn num_commands(&self) -> usize;

    /// Generate the next command, returning None when complete
    fn next_command(&mut self) -> Option<PlanCommand>;

    /// Reset the plan to start from the beginning
    fn reset(&mut self);
}

/// A fixed, ordered list of commands.
#[derive(Debug, Clone)]
pub struct RegisterPlan {
    plan_type: String,
    plan_name: String,
    args: HashMap<String, String>,
    commands: Vec<PlanCommand>,
    cursor: usize,
}

impl RegisterPlan {
    /// Commands in execution order.
    pub fn commands(&self) -> &[PlanCommand] {
        &self.commands
    }
}

impl Plan for RegisterPlan {
    fn plan_type(&self) -> &str {
        &self.plan_type
    }

    fn plan_name(&self) -> &str {
        &self.plan_name
    }

    fn plan_args(&self) -> HashMap<String, String> {
        self.args.clone()
    }

    fn num_commands(&self) -> usize {
        self.commands.len()
    }

    fn next_command(&mut self) -> Option<PlanCommand> {
        let cmd = self.commands.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(cmd)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

/// Builder for [`RegisterPlan`].
///
/// Writes take typed signals, so a value of the wrong type for a register
/// does not compile.
#[derive(Debug)]
pub struct PlanBuilder {
    plan: RegisterPlan,
}

impl PlanBuilder {
    /// Empty plan of type `plan_type`; `plan_name` is for display.
    pub fn new(plan_type: &str, plan_name: &str) -> Self {
        Self {
            plan: RegisterPlan {
                plan_type: plan_type.to_string(),
                plan_name: plan_name.to_string(),
                args: HashMap::new(),
                commands: Vec::new(),
                cursor: 0,
            },
        }
    }

    /// Record a plan argument.
    pub fn arg(mut self, key: &str, value: impl ToString) -> Self {
        self.plan.args.insert(key.to_string(), value.to_string());
        self
    }

    /// Write `signal` and wait for its readback.
    pub fn set<T: RegisterType>(mut self, signal: &Signal<T>, value: T) -> Self {
        self.plan.commands.push(PlanCommand::Set {
            signal: signal.handle(),
            value: value.into_value(),
        });
        self
    }

    /// Write only when `condition` holds.
    pub fn set_if<T: RegisterType>(self, condition: bool, signal: &Signal<T>, value: T) -> Self {
        if condition {
            self.set(signal, value)
        } else {
            self
        }
    }

    /// Like [`set`](Self::set), logging how long it took under `label`.
    pub fn timed_set<T: RegisterType>(mut self, signal: &Signal<T>, value: T, label: &str) -> Self {
        self.plan.commands.push(PlanCommand::TimedSet {
            signal: signal.handle(),
            value: value.into_value(),
            label: label.to_string(),
        });
        self
    }

    /// Pause for `duration`.
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.plan.commands.push(PlanCommand::Sleep { duration });
        self
    }

    /// Poll `signal` until it reads `value`, failing after `timeout`.
    pub fn wait_for<T: RegisterType>(
        mut self,
        signal: &Signal<T>,
        value: T,
        timeout: Duration,
    ) -> Self {
        self.plan.commands.push(PlanCommand::WaitFor {
            signal: signal.handle(),
            value: value.into_value(),
            timeout,
        });
        self
    }

    /// Finish the plan.
    pub fn build(self) -> RegisterPlan {
        self.plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{MemoryBackend, SettleConfig, DeviceSignals};

    fn signals() -> DeviceSignals {
        DeviceSignals::new(
            Arc::new(MemoryBackend::new()),
            "vector",
            "VEC:",
            SettleConfig::default(),
        )
    }

    #[test]
    fn test_plan_yields_in_order_and_resets() {
        let s = signals();
        let frames: Signal<i64> = s.plain("num_frames", "NumFrames");
        let hold: Signal<i64> = s.plain("hold", "Hold");

        let mut plan = PlanBuilder::new("demo", "Demo")
            .arg("num_images", 10)
            .set(&frames, 10)
            .sleep(Duration::from_millis(5))
            .set(&hold, 0)
            .build();

        assert_eq!(plan.num_commands(), 3);
        assert_eq!(plan.plan_args()["num_images"], "10");

        let mut pvs = Vec::new();
        while let Some(cmd) = plan.next_command() {
            pvs.push(cmd.written_pv().map(str::to_string));
        }
        assert_eq!(
            pvs,
            vec![Some("VEC:NumFrames".to_string()), None, Some("VEC:Hold".to_string())]
        );

        assert!(plan.next_command().is_none());
        plan.reset();
        assert!(plan.next_command().is_some());
    }

    #[test]
    fn test_set_if_skips_when_false() {
        let s = signals();
        let hold: Signal<i64> = s.plain("hold", "Hold");
        let plan = PlanBuilder::new("demo", "Demo")
            .set_if(false, &hold, 1)
            .set_if(true, &hold, 0)
            .build();
        assert_eq!(plan.num_commands(), 1);
    }

    #[test]
    fn test_command_display() {
        let s = signals();
        let hold: Signal<i64> = s.plain("hold", "Hold");
        let plan = PlanBuilder::new("demo", "Demo").timed_set(&hold, 1, "arm").build();
        assert_eq!(plan.commands()[0].to_string(), "set vector_hold = 1 (arm timed)");
    }
}
