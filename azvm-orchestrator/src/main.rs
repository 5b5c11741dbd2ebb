use std::time::Duration;

use anyhow::Context;
use azvm_common::settings::{Settings, WaitPolicy};
use tracing::{info, warn};

mod context;
mod disk_manager;
mod logger;
mod network_stack;
mod pipeline;
mod provider_manager;
mod resource_group;
mod state_machine;
mod vm_lifecycle;

#[cfg(test)]
mod test_support;

use context::RunContext;
use provider_manager::ProviderManager;

const MOCK_LOCATION: &str = "local";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let provider_name = ProviderManager::current_provider_name();
    let settings = match Settings::load() {
        Ok(settings) => Some(settings),
        Err(e) if provider_name == "mock" => {
            warn!("⚠️ settings unavailable ({}), running mock with defaults", e);
            None
        }
        Err(e) => return Err(e).context("failed to load settings"),
    };

    let provider = ProviderManager::get_provider(&provider_name, settings.as_ref())
        .await?
        .with_context(|| format!("provider '{}' is not available in this build", provider_name))?;

    let (location, wait) = match settings {
        Some(settings) => (settings.azure.location, settings.wait),
        None => (
            MOCK_LOCATION.to_string(),
            WaitPolicy {
                poll_interval: Duration::from_millis(50),
                timeout: Duration::from_secs(30),
            },
        ),
    };
    let ctx = RunContext::new(location, wait);
    info!(
        "🚀 azvm orchestrator starting (provider={}, location={}, group={})",
        provider.name(),
        ctx.location,
        ctx.names.group
    );

    let report = pipeline::run(provider.as_ref(), &ctx).await;
    report.print();

    if let Some(failure) = report.failure {
        return Err(failure).context("provisioning run failed");
    }
    if !report.cleanup.is_deleted() {
        anyhow::bail!("resource group {} was not deleted: {:?}", report.group, report.cleanup);
    }
    Ok(())
}
