use std::future::Future;

use azvm_common::CloudError;
use thiserror::Error;
use tracing::info;

use crate::logger::{ActionLog, ActionLogger};

/// Run states, in the only order a run may visit them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Init,
    GroupCreated,
    StorageAccountCreated,
    NetworkReady,
    VmCreated,
    VmTagged,
    DataDiskCreated,
    VmFetched,
    DataDiskAttached,
    DataDiskDetached,
    VmDeallocated,
    OsDiskResized,
    VmStarted,
    VmRestarted,
    VmStopped,
    VmsListed,
    VmDeleted,
    WindowsVmCreated,
    Done,
    Failed,
}

impl RunState {
    const SEQUENCE: [RunState; 19] = [
        RunState::Init,
        RunState::GroupCreated,
        RunState::StorageAccountCreated,
        RunState::NetworkReady,
        RunState::VmCreated,
        RunState::VmTagged,
        RunState::DataDiskCreated,
        RunState::VmFetched,
        RunState::DataDiskAttached,
        RunState::DataDiskDetached,
        RunState::VmDeallocated,
        RunState::OsDiskResized,
        RunState::VmStarted,
        RunState::VmRestarted,
        RunState::VmStopped,
        RunState::VmsListed,
        RunState::VmDeleted,
        RunState::WindowsVmCreated,
        RunState::Done,
    ];

    /// Successor on the happy path. `Done` and `Failed` have none.
    pub fn next(self) -> Option<RunState> {
        let pos = Self::SEQUENCE.iter().position(|s| *s == self)?;
        Self::SEQUENCE.get(pos + 1).copied()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Init => "INIT",
            RunState::GroupCreated => "GROUP_CREATED",
            RunState::StorageAccountCreated => "STORAGE_ACCOUNT_CREATED",
            RunState::NetworkReady => "NETWORK_READY",
            RunState::VmCreated => "VM_CREATED",
            RunState::VmTagged => "VM_TAGGED",
            RunState::DataDiskCreated => "DATA_DISK_CREATED",
            RunState::VmFetched => "VM_FETCHED",
            RunState::DataDiskAttached => "DATA_DISK_ATTACHED",
            RunState::DataDiskDetached => "DATA_DISK_DETACHED",
            RunState::VmDeallocated => "VM_DEALLOCATED",
            RunState::OsDiskResized => "OS_DISK_RESIZED",
            RunState::VmStarted => "VM_STARTED",
            RunState::VmRestarted => "VM_RESTARTED",
            RunState::VmStopped => "VM_STOPPED",
            RunState::VmsListed => "VMS_LISTED",
            RunState::VmDeleted => "VM_DELETED",
            RunState::WindowsVmCreated => "WINDOWS_VM_CREATED",
            RunState::Done => "DONE",
            RunState::Failed => "FAILED",
        }
    }

    /// Human label of the step that leads into this state.
    pub fn step_label(&self) -> &'static str {
        match self {
            RunState::Init => "initialize run",
            RunState::GroupCreated => "create resource group",
            RunState::StorageAccountCreated => "create storage account",
            RunState::NetworkReady => "create network interface",
            RunState::VmCreated => "create Linux virtual machine",
            RunState::VmTagged => "tag virtual machine",
            RunState::DataDiskCreated => "create data disk",
            RunState::VmFetched => "get virtual machine",
            RunState::DataDiskAttached => "attach data disk",
            RunState::DataDiskDetached => "detach data disk",
            RunState::VmDeallocated => "deallocate virtual machine",
            RunState::OsDiskResized => "resize OS disk",
            RunState::VmStarted => "start virtual machine",
            RunState::VmRestarted => "restart virtual machine",
            RunState::VmStopped => "stop virtual machine",
            RunState::VmsListed => "list virtual machines",
            RunState::VmDeleted => "delete virtual machine",
            RunState::WindowsVmCreated => "create Windows virtual machine",
            RunState::Done => "finish run",
            RunState::Failed => "fail run",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },
}

/// A failed step: the state the run was trying to reach and why it could not.
#[derive(Debug, Error)]
#[error("step '{}' ({step}) failed: {error}", .step.step_label())]
pub struct StepFailure {
    pub step: RunState,
    #[source]
    pub error: StepError,
}

/// Linear run state machine with an action log.
#[derive(Debug)]
pub struct RunStateMachine {
    current: RunState,
    history: Vec<RunState>,
    logger: ActionLogger,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunState::Init,
            history: vec![RunState::Init],
            logger: ActionLogger::default(),
        }
    }

    pub fn current(&self) -> RunState {
        self.current
    }

    /// Every state visited, in order, starting with `Init`.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn actions(&self) -> &[ActionLog] {
        self.logger.entries()
    }

    /// Move to `to`, which must be the successor of the current state.
    pub fn advance(&mut self, to: RunState) -> Result<(), StepError> {
        if self.current.next() != Some(to) {
            return Err(StepError::InvalidTransition {
                from: self.current,
                to,
            });
        }
        info!("🔄 [state_machine] {} -> {}", self.current, to);
        self.current = to;
        self.history.push(to);
        Ok(())
    }

    /// Move to `Failed` while attempting `step`. A terminal run stays put.
    pub fn fail(&mut self, step: RunState, error: StepError) -> StepFailure {
        if !self.current.is_terminal() {
            info!(
                "🔄 [state_machine] {} -> {} ({} failed)",
                self.current,
                RunState::Failed,
                step.step_label()
            );
            self.current = RunState::Failed;
            self.history.push(RunState::Failed);
        }
        StepFailure { step, error }
    }

    /// Run `op` as the step leading to `to`, logging its duration, and
    /// advance on success or fail the run on error.
    pub async fn step<T, F>(&mut self, to: RunState, op: F) -> Result<T, StepFailure>
    where
        F: Future<Output = Result<T, CloudError>>,
    {
        if self.current.next() != Some(to) {
            let error = StepError::InvalidTransition {
                from: self.current,
                to,
            };
            return Err(self.fail(to, error));
        }

        let timer = self.logger.log_event_start(to.step_label());
        match op.await {
            Ok(value) => {
                self.logger.log_event_complete(timer, None);
                self.advance(to).map_err(|e| StepFailure { step: to, error: e })?;
                Ok(value)
            }
            Err(e) => {
                self.logger.log_event_complete(timer, Some(&e));
                Err(self.fail(to, e.into()))
            }
        }
    }

    pub fn into_actions(self) -> Vec<ActionLog> {
        self.logger.into_entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::ActionStatus;

    #[test]
    fn sequence_is_linear() {
        let mut state = RunState::Init;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            visited.push(next);
            state = next;
        }
        assert_eq!(visited.len(), 19);
        assert_eq!(visited.last(), Some(&RunState::Done));
        assert_eq!(RunState::Failed.next(), None);
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut machine = RunStateMachine::new();
        let err = machine.advance(RunState::NetworkReady).unwrap_err();
        assert!(matches!(
            err,
            StepError::InvalidTransition {
                from: RunState::Init,
                to: RunState::NetworkReady
            }
        ));
        assert_eq!(machine.current(), RunState::Init);
    }

    #[tokio::test]
    async fn successful_step_advances_and_logs() {
        let mut machine = RunStateMachine::new();
        let value = machine
            .step(RunState::GroupCreated, async { Ok::<_, CloudError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(machine.current(), RunState::GroupCreated);
        assert_eq!(machine.actions().len(), 1);
        assert_eq!(machine.actions()[0].status, ActionStatus::Success);
        assert_eq!(machine.actions()[0].action, "create resource group");
    }

    #[tokio::test]
    async fn failed_step_moves_to_failed() {
        let mut machine = RunStateMachine::new();
        machine.advance(RunState::GroupCreated).unwrap();
        let failure = machine
            .step(RunState::StorageAccountCreated, async {
                Err::<(), _>(CloudError::rejected("PUT storage", "name taken"))
            })
            .await
            .unwrap_err();
        assert_eq!(failure.step, RunState::StorageAccountCreated);
        assert_eq!(machine.current(), RunState::Failed);
        assert_eq!(
            machine.history(),
            &[RunState::Init, RunState::GroupCreated, RunState::Failed]
        );
        let entry = &machine.actions()[0];
        assert_eq!(entry.status, ActionStatus::Failed);
        assert_eq!(entry.error_kind, Some("OperationRejectedByService"));
        assert!(failure.to_string().contains("create storage account"));
    }

    #[tokio::test]
    async fn out_of_order_step_does_not_run() {
        let mut machine = RunStateMachine::new();
        let mut ran = false;
        let failure = machine
            .step(RunState::VmCreated, async {
                ran = true;
                Ok::<_, CloudError>(())
            })
            .await
            .unwrap_err();
        assert!(!ran);
        assert!(matches!(failure.error, StepError::InvalidTransition { .. }));
        assert_eq!(machine.current(), RunState::Failed);
    }
}
