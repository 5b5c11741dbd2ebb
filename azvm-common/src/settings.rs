//! Runtime configuration: service-principal credentials, target region and
//! management endpoint, plus wait tuning.
//!
//! Values come from a JSON file (camelCase keys) and are overridden by
//! environment variables.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "../azureAppSpConfig.json";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing required setting '{key}' (config key or {env})")]
    Missing { key: &'static str, env: &'static str },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// On-disk shape of the service-principal config file.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub subscription_id: Option<String>,
    pub location: Option<String>,
    pub resource_manager_url: Option<String>,
}

#[derive(Clone)]
pub struct AzureSettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
    pub location: String,
    pub resource_manager_url: String,
}

impl std::fmt::Debug for AzureSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("subscription_id", &self.subscription_id)
            .field("location", &self.location)
            .field("resource_manager_url", &self.resource_manager_url)
            .finish()
    }
}

/// How long-running operations are awaited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub azure: AzureSettings,
    pub wait: WaitPolicy,
}

impl Settings {
    /// Load from `AZVM_CONFIG` (or the default path) and the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var("AZVM_CONFIG")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let file = read_config_file(Path::new(&path))?;
        Self::from_sources(file, |key| std::env::var(key).ok())
    }

    /// Merge a config file with environment lookups. Environment wins.
    pub fn from_sources<F>(file: Option<ConfigFile>, env: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = file.unwrap_or_default();
        let pick = |key: &'static str, env_key: &'static str, from_file: Option<String>| {
            env(env_key)
                .or(from_file)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or(SettingsError::Missing { key, env: env_key })
        };

        let azure = AzureSettings {
            tenant_id: pick("tenantId", "AZURE_TENANT_ID", file.tenant_id)?,
            client_id: pick("clientId", "AZURE_CLIENT_ID", file.client_id)?,
            client_secret: pick("clientSecret", "AZURE_CLIENT_SECRET", file.client_secret)?,
            subscription_id: pick("subscriptionId", "AZURE_SUBSCRIPTION_ID", file.subscription_id)?,
            location: pick("location", "AZURE_RESOURCE_LOCATION", file.location)?,
            resource_manager_url: pick("resourceManagerUrl", "ARM_ENDPOINT", file.resource_manager_url)?
                .trim_end_matches('/')
                .to_string(),
        };

        let mut wait = WaitPolicy::default();
        if let Some(secs) = parse_secs(&env, "AZVM_POLL_INTERVAL_SECS")? {
            wait.poll_interval = secs;
        }
        if let Some(secs) = parse_secs(&env, "AZVM_OPERATION_TIMEOUT_SECS")? {
            wait.timeout = secs;
        }

        Ok(Settings { azure, wait })
    }
}

/// Missing file is not an error: everything may come from the environment.
pub fn read_config_file(path: &Path) -> Result<Option<ConfigFile>, SettingsError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(parsed))
}

fn parse_secs<F>(env: &F, key: &'static str) -> Result<Option<Duration>, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = env(key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(Duration::from_secs(n))),
        _ => Err(SettingsError::Invalid { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn file() -> ConfigFile {
        serde_json::from_str(
            r#"{
                "tenantId": "tenant",
                "clientId": "client",
                "clientSecret": " secret\n",
                "subscriptionId": "sub",
                "location": "local",
                "resourceManagerUrl": "https://management.local.azurestack.external/"
            }"#,
        )
        .unwrap()
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn file_values_are_trimmed() {
        let s = Settings::from_sources(Some(file()), env_of(&[])).unwrap();
        assert_eq!(s.azure.client_secret, "secret");
        assert_eq!(
            s.azure.resource_manager_url,
            "https://management.local.azurestack.external"
        );
        assert_eq!(s.wait, WaitPolicy::default());
    }

    #[test]
    fn environment_overrides_file() {
        let s = Settings::from_sources(
            Some(file()),
            env_of(&[
                ("AZURE_RESOURCE_LOCATION", "westeurope"),
                ("AZVM_OPERATION_TIMEOUT_SECS", "90"),
            ]),
        )
        .unwrap();
        assert_eq!(s.azure.location, "westeurope");
        assert_eq!(s.azure.tenant_id, "tenant");
        assert_eq!(s.wait.timeout, Duration::from_secs(90));
    }

    #[test]
    fn missing_value_names_the_key() {
        let err = Settings::from_sources(None, env_of(&[("AZURE_TENANT_ID", "t")])).unwrap_err();
        assert!(matches!(err, SettingsError::Missing { key: "clientId", .. }));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Settings::from_sources(Some(file()), env_of(&[("AZVM_OPERATION_TIMEOUT_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { .. }));
    }

    #[test]
    fn debug_redacts_secret() {
        let s = Settings::from_sources(Some(file()), env_of(&[])).unwrap();
        assert!(!format!("{:?}", s).contains("secret\""));
        assert!(format!("{:?}", s.azure).contains("***"));
    }
}
