use std::future::Future;
use std::panic::AssertUnwindSafe;

use azvm_common::settings::WaitPolicy;
use azvm_common::{CloudError, ResourceGroup};
use azvm_providers::ResourceManager;
use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::context::RunContext;

/// What happened to the resource group at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    Failed(String),
    /// The group was never submitted, so there was nothing to delete.
    NotAttempted,
}

impl CleanupOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, CleanupOutcome::Deleted)
    }
}

/// Group creation failed. `cleanup` reports the deletion attempted when the
/// creation had been accepted before failing.
#[derive(Debug)]
pub struct AcquireFailure {
    pub error: CloudError,
    pub cleanup: CleanupOutcome,
}

/// Ownership of the run's resource group. Everything the run creates lives
/// inside it, so releasing the guard deletes all of it.
pub struct ResourceGroupGuard<'a> {
    provider: &'a dyn ResourceManager,
    name: String,
    wait: WaitPolicy,
    released: bool,
}

impl<'a> ResourceGroupGuard<'a> {
    pub async fn acquire(
        provider: &'a dyn ResourceManager,
        ctx: &RunContext,
    ) -> Result<Self, AcquireFailure> {
        let name = ctx.names.group.clone();
        info!("🔵 [resource_group] creating {} in {}", name, ctx.location);

        let op = provider
            .create_or_update_resource_group(&name, &ResourceGroup::in_location(&ctx.location))
            .await
            .map_err(|e| AcquireFailure {
                error: e,
                cleanup: CleanupOutcome::NotAttempted,
            })?;

        let guard = Self {
            provider,
            name,
            wait: ctx.wait,
            released: false,
        };
        match op.wait(&ctx.wait).await {
            Ok(_) => {
                info!("✅ [resource_group] {} ready", guard.name);
                Ok(guard)
            }
            Err(e) => {
                // Accepted but not finished: the group may exist anyway.
                warn!(
                    "⚠️ [resource_group] creation of {} did not complete, deleting it",
                    guard.name
                );
                let cleanup = guard.release().await;
                Err(AcquireFailure { error: e, cleanup })
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `body`, then release the group whatever the outcome. A panic in
    /// `body` is re-raised after the group has been released.
    pub async fn scope<T, F>(self, body: F) -> (T, CleanupOutcome)
    where
        F: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(body).catch_unwind().await;
        let cleanup = self.release().await;
        match outcome {
            Ok(value) => (value, cleanup),
            Err(panic) => {
                error!("❌ [resource_group] run panicked, group cleanup: {:?}", cleanup);
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Delete the group and wait for the deletion to finish.
    pub async fn release(mut self) -> CleanupOutcome {
        self.released = true;
        info!("🔵 [resource_group] deleting {}", self.name);
        let result = match self.provider.delete_resource_group(&self.name).await {
            Ok(op) => op.wait(&self.wait).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                info!("✅ [resource_group] deleted {}", self.name);
                CleanupOutcome::Deleted
            }
            Err(CloudError::NotFound { .. }) => {
                info!("✅ [resource_group] {} already gone", self.name);
                CleanupOutcome::Deleted
            }
            Err(e) => {
                error!("❌ [resource_group] failed to delete {}: {}", self.name, e);
                CleanupOutcome::Failed(e.to_string())
            }
        }
    }
}

impl Drop for ResourceGroupGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            error!(
                "❌ [resource_group] guard for {} dropped without cleanup, the group may be leaked",
                self.name
            );
        }
    }
}
