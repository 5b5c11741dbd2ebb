use azvm_common::CloudError;
use std::time::Instant;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    Success,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Success => "success",
            ActionStatus::Failed => "failed",
        }
    }
}

/// One completed action of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionLog {
    pub action: String,
    pub status: ActionStatus,
    pub duration_ms: u128,
    pub error_kind: Option<&'static str>,
    pub error_message: Option<String>,
}

pub struct ActionTimer {
    action: String,
    started: Instant,
}

/// In-memory action log, mirrored to tracing as entries are written.
#[derive(Debug, Default)]
pub struct ActionLogger {
    entries: Vec<ActionLog>,
}

impl ActionLogger {
    pub fn log_event_start(&self, action: &str) -> ActionTimer {
        info!("🔵 [orchestrator] {} - in_progress", action);
        ActionTimer {
            action: action.to_string(),
            started: Instant::now(),
        }
    }

    pub fn log_event_complete(&mut self, timer: ActionTimer, error: Option<&CloudError>) {
        let duration_ms = timer.started.elapsed().as_millis();
        let entry = match error {
            None => {
                info!("✅ [orchestrator] {} - success ({}ms)", timer.action, duration_ms);
                ActionLog {
                    action: timer.action,
                    status: ActionStatus::Success,
                    duration_ms,
                    error_kind: None,
                    error_message: None,
                }
            }
            Some(e) => {
                error!(
                    "❌ [orchestrator] {} - failed after {}ms: {}",
                    timer.action, duration_ms, e
                );
                ActionLog {
                    action: timer.action,
                    status: ActionStatus::Failed,
                    duration_ms,
                    error_kind: Some(e.label()),
                    error_message: Some(e.to_string()),
                }
            }
        };
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ActionLog] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ActionLog> {
        self.entries
    }
}
