//! PlanRunner - sequential executor for register plans
//!
//! Executes a plan's commands one at a time in program order. Each `Set`
//! waits for the register readback before the next command starts.
//!
//! # Failure semantics
//!
//! The first failing command aborts the plan. Commands after it are not
//! executed, commands before it are not rolled back, and nothing is retried.
//! The error is returned with the plan type and command attached as context;
//! the register error underneath can be recovered with
//! `downcast_ref::<MxError>()`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let runner = PlanRunner::new();
//! let mut plan = scans::setup_vector_program(&beamline.vector, 100, 0.0, 90.0, 0.02);
//! let summary = runner.run(&mut plan).await?;
//! assert_eq!(summary.commands_executed, 5);
//! ```

use anyhow::Context;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::clock::now_string;
use crate::error::MxError;
use crate::plans::{Plan, PlanCommand};
use crate::registers::wait_for_value;

/// Outcome of a completed plan.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Plan type, e.g. `setup_vector_program`
    pub plan_type: String,
    /// Commands that completed
    pub commands_executed: usize,
    /// Durations of `TimedSet` commands, by label
    pub timings: Vec<(String, Duration)>,
    /// Wall time of the whole plan
    pub elapsed: Duration,
}

/// Executes plans against real registers.
#[derive(Debug, Clone)]
pub struct PlanRunner {
    poll_interval: Duration,
}

impl Default for PlanRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanRunner {
    /// Runner polling `WaitFor` registers every 10 ms.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Interval between polls of a `WaitFor` register.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Run `plan` from its current position to completion.
    pub async fn run(&self, plan: &mut dyn Plan) -> anyhow::Result<RunSummary> {
        let plan_type = plan.plan_type().to_string();
        info!(plan = %plan_type, commands = plan.num_commands(), "Starting plan");

        let started = Instant::now();
        let mut summary = RunSummary {
            plan_type: plan_type.clone(),
            commands_executed: 0,
            timings: Vec::new(),
            elapsed: Duration::ZERO,
        };

        while let Some(cmd) = plan.next_command() {
            let step = summary.commands_executed;
            let description = cmd.to_string();
            match self.process_command(cmd).await {
                Ok(timing) => {
                    summary.timings.extend(timing);
                    summary.commands_executed += 1;
                }
                Err(e) => {
                    warn!(
                        plan = %plan_type,
                        step,
                        command = %description,
                        error = %e,
                        "Plan aborted"
                    );
                    return Err(e)
                        .with_context(|| format!("{} aborted at step {}: {}", plan_type, step, description));
                }
            }
        }

        summary.elapsed = started.elapsed();
        info!(
            plan = %plan_type,
            commands = summary.commands_executed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Plan complete"
        );
        Ok(summary)
    }

    /// Commands the plan would execute, without touching hardware.
    ///
    /// The plan is reset afterwards.
    pub fn dry_run(&self, plan: &mut dyn Plan) -> Vec<PlanCommand> {
        let mut commands = Vec::with_capacity(plan.num_commands());
        while let Some(cmd) = plan.next_command() {
            commands.push(cmd);
        }
        plan.reset();
        commands
    }

    async fn process_command(&self, cmd: PlanCommand) -> Result<Option<(String, Duration)>, MxError> {
        debug!(command = %cmd, "Processing command");

        match cmd {
            PlanCommand::Set { signal, value } => {
                signal.set_value(value).await?;
                Ok(None)
            }

            PlanCommand::TimedSet {
                signal,
                value,
                label,
            } => {
                let started = Instant::now();
                signal.set_value(value).await?;
                let elapsed = started.elapsed();
                info!(
                    signal = signal.name(),
                    at = %now_string(),
                    "{} time = {:.6} s",
                    label,
                    elapsed.as_secs_f64()
                );
                Ok(Some((label, elapsed)))
            }

            PlanCommand::Sleep { duration } => {
                debug!(?duration, "Sleeping");
                sleep(duration).await;
                Ok(None)
            }

            PlanCommand::WaitFor {
                signal,
                value,
                timeout,
            } => {
                wait_for_value(signal.as_ref(), &value, timeout, self.poll_interval).await?;
                Ok(None)
            }
        }
    }
}
