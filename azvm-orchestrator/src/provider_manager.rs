use std::env;

#[cfg(feature = "provider-azure")]
use anyhow::Context;
use azvm_common::settings::Settings;
use azvm_providers::ResourceManager;

pub struct ProviderManager;

impl ProviderManager {
    pub fn current_provider_name() -> String {
        env::var("PROVIDER")
            .map(|p| p.trim().to_lowercase())
            .unwrap_or_else(|_| "azure".to_string())
    }

    /// Build the named provider. `None` when the name is unknown or its
    /// feature is not compiled in. Only the azure provider needs settings.
    #[cfg_attr(not(feature = "provider-azure"), allow(unused_variables))]
    pub async fn get_provider(
        provider_name: &str,
        settings: Option<&Settings>,
    ) -> anyhow::Result<Option<Box<dyn ResourceManager>>> {
        match provider_name {
            #[cfg(feature = "provider-azure")]
            "azure" => {
                let settings = settings.context("azure provider requires credentials and an endpoint")?;
                let provider = azvm_providers::azure::AzureProvider::connect(&settings.azure)
                    .await
                    .context("failed to connect to Azure Resource Manager")?;
                Ok(Some(Box::new(provider)))
            }
            #[cfg(feature = "provider-mock")]
            "mock" => Ok(Some(Box::new(azvm_providers::mock::MockProvider::new()))),
            _ => Ok(None),
        }
    }
}
