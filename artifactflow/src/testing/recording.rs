//! A supervisor stub that records invocations instead of spawning workers.

use crate::cancellation::CancellationToken;
use crate::core::{CapturedOutput, ProcessExit, ProcessOutcome, StageId};
use crate::supervisor::{Invocation, ProcessSupervisor};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

/// What the stub does when a stage is invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubAction {
    /// Write these bytes to every declared output, then exit 0.
    WriteOutputs(Vec<u8>),
    /// Exit 0 without writing anything.
    ExitWithoutOutputs,
    /// Exit with this code without writing anything.
    Exit(i32),
    /// Report death by this signal.
    Crash(i32),
    /// Report a timeout.
    TimeOut,
}

/// Records every [`Invocation`] and answers with scripted actions.
///
/// Stages without a scripted action get the default, which writes
/// `b"stub output"` to every declared output.
#[derive(Debug)]
pub struct RecordingSupervisor {
    default: StubAction,
    actions: Mutex<HashMap<StageId, StubAction>>,
    calls: Mutex<Vec<Invocation>>,
}

impl Default for RecordingSupervisor {
    fn default() -> Self {
        Self {
            default: StubAction::WriteOutputs(b"stub output".to_vec()),
            actions: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl RecordingSupervisor {
    /// Creates a stub with the default action.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the action for one stage.
    #[must_use]
    pub fn with_action(self, stage: StageId, action: StubAction) -> Self {
        self.actions.lock().insert(stage, action);
        self
    }

    /// Replaces the action for one stage.
    pub fn set_action(&self, stage: StageId, action: StubAction) {
        self.actions.lock().insert(stage, action);
    }

    /// Returns every recorded invocation.
    #[must_use]
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    /// Returns the invoked stages in call order.
    #[must_use]
    pub fn invoked_stages(&self) -> Vec<StageId> {
        self.calls.lock().iter().map(|c| c.stage.clone()).collect()
    }

    /// Forgets recorded invocations.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl ProcessSupervisor for RecordingSupervisor {
    async fn run(&self, invocation: &Invocation, _cancel: &CancellationToken) -> ProcessOutcome {
        let started_at = Utc::now();
        self.calls.lock().push(invocation.clone());

        let action = self
            .actions
            .lock()
            .get(&invocation.stage)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        let exit = match action {
            StubAction::WriteOutputs(bytes) => {
                let written = invocation.outputs.values().try_for_each(|path| {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, &bytes)
                });
                match written {
                    Ok(()) => ProcessExit::Exited { code: 0 },
                    Err(_) => ProcessExit::Exited { code: 1 },
                }
            }
            StubAction::ExitWithoutOutputs => ProcessExit::Exited { code: 0 },
            StubAction::Exit(code) => ProcessExit::Exited { code },
            StubAction::Crash(signal) => ProcessExit::Signaled { signal },
            StubAction::TimeOut => ProcessExit::TimedOut {
                timeout_ms: u64::try_from(invocation.timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };

        ProcessOutcome {
            stage: invocation.stage.clone(),
            started_at,
            ended_at: Utc::now(),
            exit,
            output: CapturedOutput::default(),
        }
    }
}
