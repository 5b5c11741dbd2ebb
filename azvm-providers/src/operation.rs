//! Long-running operation handles.
//!
//! A mutating call returns a [`PendingOperation`]; callers must [`wait`] for
//! it before issuing any dependent call.
//!
//! [`wait`]: PendingOperation::wait
use async_trait::async_trait;
use azvm_common::settings::WaitPolicy;
use azvm_common::CloudError;
use std::time::{Duration, Instant};
use tracing::debug;

/// One observation of a remote operation.
#[derive(Debug)]
pub enum PollStatus<T> {
    InProgress { retry_after: Option<Duration> },
    Succeeded(T),
}

/// Provider-specific polling of a remote operation. A terminal failure is
/// reported as `Err`.
#[async_trait]
pub trait OperationPoller<T>: Send {
    async fn poll(&mut self) -> Result<PollStatus<T>, CloudError>;
}

pub struct PendingOperation<T> {
    description: String,
    poller: Box<dyn OperationPoller<T>>,
}

impl<T: Send + 'static> PendingOperation<T> {
    pub fn new(description: impl Into<String>, poller: Box<dyn OperationPoller<T>>) -> Self {
        Self {
            description: description.into(),
            poller,
        }
    }

    /// An operation that already finished at submission time.
    pub fn completed(description: impl Into<String>, value: T) -> Self {
        Self::new(description, Box::new(Completed(Some(value))))
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Poll until the operation is terminal or `policy.timeout` expires.
    pub async fn wait(mut self, policy: &WaitPolicy) -> Result<T, CloudError> {
        let started = Instant::now();
        let description = self.description.clone();
        let polling = async {
            let mut polls = 0u32;
            loop {
                polls += 1;
                match self.poller.poll().await? {
                    PollStatus::Succeeded(value) => {
                        debug!(
                            "✅ [lro] {} finished after {} poll(s) in {}ms",
                            description,
                            polls,
                            started.elapsed().as_millis()
                        );
                        return Ok(value);
                    }
                    PollStatus::InProgress { retry_after } => {
                        let delay = retry_after
                            .map(|d| d.min(policy.timeout))
                            .unwrap_or(policy.poll_interval);
                        debug!("⏳ [lro] {} still running, next poll in {:?}", description, delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        };

        let outcome = tokio::time::timeout(policy.timeout, polling).await;
        match outcome {
            Ok(result) => result,
            Err(_) => Err(CloudError::OperationTimedOut {
                operation: self.description,
                after: policy.timeout,
            }),
        }
    }
}

struct Completed<T>(Option<T>);

#[async_trait]
impl<T: Send> OperationPoller<T> for Completed<T> {
    async fn poll(&mut self) -> Result<PollStatus<T>, CloudError> {
        self.0
            .take()
            .map(PollStatus::Succeeded)
            .ok_or_else(|| CloudError::Decode("operation result already taken".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        left: u32,
        fail: bool,
    }

    #[async_trait]
    impl OperationPoller<u32> for Countdown {
        async fn poll(&mut self) -> Result<PollStatus<u32>, CloudError> {
            if self.left > 0 {
                self.left -= 1;
                return Ok(PollStatus::InProgress { retry_after: None });
            }
            if self.fail {
                return Err(CloudError::rejected("test op", "boom"));
            }
            Ok(PollStatus::Succeeded(7))
        }
    }

    fn fast() -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn waits_through_in_progress_polls() {
        let op = PendingOperation::new("count", Box::new(Countdown { left: 3, fail: false }));
        assert_eq!(op.wait(&fast()).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn terminal_failure_is_returned() {
        let op = PendingOperation::new("count", Box::new(Countdown { left: 1, fail: true }));
        let err = op.wait(&fast()).await.unwrap_err();
        assert!(matches!(err, CloudError::OperationRejectedByService { .. }));
    }

    #[tokio::test]
    async fn never_finishing_operation_times_out() {
        let op = PendingOperation::new(
            "stuck",
            Box::new(Countdown { left: u32::MAX, fail: false }),
        );
        let policy = WaitPolicy {
            poll_interval: Duration::from_millis(2),
            timeout: Duration::from_millis(20),
        };
        match op.wait(&policy).await {
            Err(CloudError::OperationTimedOut { operation, after }) => {
                assert_eq!(operation, "stuck");
                assert_eq!(after, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn completed_operation_returns_immediately() {
        let op = PendingOperation::completed("noop", "done");
        assert_eq!(op.wait(&fast()).await.unwrap(), "done");
    }
}
