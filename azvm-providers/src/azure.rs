//! Azure Resource Manager over HTTPS.
//!
//! Endpoints are discovered from the resource manager's metadata document,
//! so the same code targets public Azure and Azure Stack Hub. API versions
//! follow the 2020-09-01 hybrid profile.
use crate::{ListScope, OperationPoller, PendingOperation, PollStatus, ResourceManager, ResourceStream};
use async_trait::async_trait;
use azvm_common::settings::AzureSettings;
use azvm_common::{
    resource_group_id, CloudError, Disk, NetworkInterface, ResourceGroup, ResourceIdentity,
    ResourceKind, StorageAccount, Subnet, Tags, VirtualMachine, VirtualNetwork,
};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use reqwest::{header::HeaderMap, Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

const API_METADATA: &str = "2015-01-01";
const API_RESOURCES: &str = "2019-10-01";
const API_STORAGE: &str = "2019-06-01";
const API_NETWORK: &str = "2018-11-01";
const API_COMPUTE: &str = "2020-06-01";
const API_DISKS: &str = "2019-07-01";

// Refresh tokens a little before they actually expire.
const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudEndpoints {
    pub resource_manager: String,
    pub login_endpoint: String,
    pub audience: String,
}

impl CloudEndpoints {
    /// Fetch `{resource_manager}/metadata/endpoints`.
    pub async fn discover(client: &Client, resource_manager_url: &str) -> Result<Self, CloudError> {
        let url = format!(
            "{}/metadata/endpoints?api-version={}",
            resource_manager_url.trim_end_matches('/'),
            API_METADATA
        );
        info!("🔵 [azure-arm] GET {} - discovering cloud endpoints", url);
        let resp = client.get(&url).send().await.map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(CloudError::Transport(format!(
                "metadata discovery failed: status={} body={}",
                status.as_u16(),
                text
            )));
        }
        let doc: Value = resp.json().await.map_err(transport)?;
        Self::from_metadata(resource_manager_url, &doc)
    }

    pub fn from_metadata(resource_manager_url: &str, doc: &Value) -> Result<Self, CloudError> {
        let auth = &doc["authentication"];
        let login_endpoint = auth["loginEndpoint"]
            .as_str()
            .ok_or_else(|| CloudError::Decode("metadata has no authentication.loginEndpoint".to_string()))?;
        let audience = auth["audiences"]
            .as_array()
            .and_then(|a| a.first())
            .and_then(|a| a.as_str())
            .ok_or_else(|| CloudError::Decode("metadata has no authentication.audiences".to_string()))?;
        Ok(Self {
            resource_manager: resource_manager_url.trim_end_matches('/').to_string(),
            login_endpoint: login_endpoint.trim_end_matches('/').to_string(),
            audience: audience.trim_end_matches('/').to_string(),
        })
    }
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Shared HTTP state: client, endpoints, credentials and token cache.
struct ArmSession {
    client: Client,
    endpoints: CloudEndpoints,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl ArmSession {
    async fn bearer(&self) -> Result<String, CloudError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_SKEW {
                return Ok(token.access_token.clone());
            }
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.endpoints.login_endpoint, self.tenant_id
        );
        let scope = format!("{}/.default", self.endpoints.audience);
        debug!("🔵 [azure-arm] POST {} - acquiring token for {}", url, scope);
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(transport)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!("❌ [azure-arm] token request failed: status={}", status.as_u16());
            return Err(CloudError::Authentication(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                error_message(&text)
            )));
        }
        let body: Value = resp.json().await.map_err(transport)?;
        let access_token = body["access_token"]
            .as_str()
            .ok_or_else(|| CloudError::Authentication("token response has no access_token".to_string()))?
            .to_string();
        let expires_in = expires_in_secs(&body["expires_in"]).unwrap_or(3600);
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });
        Ok(access_token)
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Response, CloudError> {
        let token = self.bearer().await?;
        // Correlates the call with service-side diagnostics.
        let request_id = Uuid::new_v4().to_string();
        debug!("[azure] {} {} (client request id {})", method, url, request_id);
        let mut req = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header("x-ms-client-request-id", request_id);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(transport)
    }

    async fn get_json(&self, url: &str, target: Option<(ResourceKind, &str)>) -> Result<Value, CloudError> {
        let resp = self.send(Method::GET, url, None).await?;
        let status = resp.status();
        let text = resp.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(service_error(&format!("GET {}", url), status, &text, target));
        }
        parse_body(&text)
    }
}

type Decoder<T> = fn(Option<Value>) -> Result<T, CloudError>;

fn decode_resource<T: DeserializeOwned>(body: Option<Value>) -> Result<T, CloudError> {
    let body = body.ok_or_else(|| CloudError::Decode("operation finished without a resource".to_string()))?;
    Ok(serde_json::from_value(body)?)
}

fn decode_unit(_: Option<Value>) -> Result<(), CloudError> {
    Ok(())
}

enum PollMode {
    Done(Option<Value>),
    /// `Azure-AsyncOperation`: status document, then GET the resource.
    AsyncOperation {
        status_url: String,
        final_url: Option<String>,
    },
    /// `Location`: 202 while running, final body when done.
    Location {
        url: String,
        final_url: Option<String>,
    },
    /// No operation header: poll the resource's own provisioningState.
    ProvisioningState { url: String },
}

struct ArmPoller<T> {
    session: Arc<ArmSession>,
    description: String,
    mode: PollMode,
    decode: Decoder<T>,
}

impl<T> ArmPoller<T> {
    async fn fetch_final(&self, final_url: Option<&str>) -> Result<Option<Value>, CloudError> {
        match final_url {
            Some(url) => self.session.get_json(url, None).await.map(Some),
            None => Ok(None),
        }
    }

    fn failed(&self, doc: &Value, status: &str) -> CloudError {
        let error = &doc["error"];
        CloudError::OperationRejectedByService {
            operation: self.description.clone(),
            code: error["code"].as_str().map(str::to_string),
            message: error["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("operation ended with status {}", status)),
        }
    }
}

#[async_trait]
impl<T: Send> OperationPoller<T> for ArmPoller<T> {
    async fn poll(&mut self) -> Result<PollStatus<T>, CloudError> {
        match &self.mode {
            PollMode::Done(body) => {
                let body = body.clone();
                Ok(PollStatus::Succeeded((self.decode)(body)?))
            }
            PollMode::AsyncOperation { status_url, final_url } => {
                let resp = self.session.send(Method::GET, status_url, None).await?;
                let retry_after = retry_after(resp.headers());
                let status = resp.status();
                let text = resp.text().await.map_err(transport)?;
                if !status.is_success() {
                    return Err(service_error(&self.description, status, &text, None));
                }
                let doc = parse_body(&text)?;
                let op_status = doc["status"].as_str().unwrap_or("InProgress");
                match op_status {
                    "Succeeded" => {
                        let body = self.fetch_final(final_url.as_deref()).await?;
                        Ok(PollStatus::Succeeded((self.decode)(body)?))
                    }
                    "Failed" | "Canceled" => Err(self.failed(&doc, op_status)),
                    _ => Ok(PollStatus::InProgress { retry_after }),
                }
            }
            PollMode::Location { url, final_url } => {
                let resp = self.session.send(Method::GET, url, None).await?;
                let retry_after = retry_after(resp.headers());
                let status = resp.status();
                if status == StatusCode::ACCEPTED {
                    return Ok(PollStatus::InProgress { retry_after });
                }
                let text = resp.text().await.map_err(transport)?;
                if !status.is_success() {
                    return Err(service_error(&self.description, status, &text, None));
                }
                let body = if text.trim().is_empty() {
                    self.fetch_final(final_url.as_deref()).await?
                } else {
                    Some(parse_body(&text)?)
                };
                Ok(PollStatus::Succeeded((self.decode)(body)?))
            }
            PollMode::ProvisioningState { url } => {
                let doc = self.session.get_json(url, None).await?;
                match provisioning_state(&doc) {
                    Some("Succeeded") | None => Ok(PollStatus::Succeeded((self.decode)(Some(doc))?)),
                    Some(state @ ("Failed" | "Canceled")) => Err(self.failed(&doc, state)),
                    Some(_) => Ok(PollStatus::InProgress { retry_after: None }),
                }
            }
        }
    }
}

pub struct AzureProvider {
    session: Arc<ArmSession>,
    subscription_id: String,
}

impl AzureProvider {
    /// Discover endpoints and build a provider. No token is requested yet.
    pub async fn connect(settings: &AzureSettings) -> Result<Self, CloudError> {
        // Default reqwest client has no overall timeout; a stalled endpoint would hang a poll forever.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(transport)?;
        let endpoints = CloudEndpoints::discover(&client, &settings.resource_manager_url).await?;
        info!(
            "✅ [azure-arm] endpoints: resource_manager={}, login={}, audience={}",
            endpoints.resource_manager, endpoints.login_endpoint, endpoints.audience
        );
        Ok(Self {
            session: Arc::new(ArmSession {
                client,
                endpoints,
                tenant_id: settings.tenant_id.clone(),
                client_id: settings.client_id.clone(),
                client_secret: settings.client_secret.clone(),
                token: Mutex::new(None),
            }),
            subscription_id: settings.subscription_id.clone(),
        })
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.session.endpoints.resource_manager, path, api_version
        )
    }

    fn id(&self, group: &str, name: &str, kind: ResourceKind) -> String {
        ResourceIdentity::new(group, name).arm_id(&self.subscription_id, kind)
    }

    fn vm_url(&self, group: &str, name: &str, action: Option<&str>) -> String {
        let mut path = self.id(group, name, ResourceKind::VirtualMachine);
        if let Some(action) = action {
            path.push('/');
            path.push_str(action);
        }
        self.url(&path, API_COMPUTE)
    }

    /// Submit a mutating request and wrap whatever the service answers into
    /// a pending operation.
    async fn submit<T: Send + 'static>(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        description: String,
        target: (ResourceKind, &str),
        decode: Decoder<T>,
    ) -> Result<PendingOperation<T>, CloudError> {
        info!("🔵 [azure-arm] {} {} - {}", method, url, description);
        let is_put = method == Method::PUT;
        let resp = self.session.send(method.clone(), &url, body.as_ref()).await?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let text = resp.text().await.map_err(transport)?;

        if !status.is_success() {
            warn!(
                "❌ [azure-arm] {} {} failed: status={}, response={}",
                method,
                url,
                status.as_u16(),
                text
            );
            return Err(service_error(&description, status, &text, Some(target)));
        }
        debug!("✅ [azure-arm] {} {} accepted: status={}", method, url, status.as_u16());

        let final_url = is_put.then(|| url.clone());
        let mode = if let Some(status_url) = header(&headers, "azure-asyncoperation") {
            PollMode::AsyncOperation {
                status_url,
                final_url,
            }
        } else if let Some(location) = header(&headers, "location") {
            PollMode::Location {
                url: location,
                final_url,
            }
        } else if text.trim().is_empty() {
            if is_put {
                PollMode::ProvisioningState { url }
            } else {
                PollMode::Done(None)
            }
        } else {
            let doc = parse_body(&text)?;
            match provisioning_state(&doc) {
                Some(state) if is_put && !is_terminal(state) => PollMode::ProvisioningState { url },
                _ => PollMode::Done(Some(doc)),
            }
        };

        Ok(PendingOperation::new(
            description.clone(),
            Box::new(ArmPoller {
                session: self.session.clone(),
                description,
                mode,
                decode,
            }),
        ))
    }

    async fn put<T: DeserializeOwned + Send + 'static>(
        &self,
        url: String,
        body: Value,
        description: String,
        target: (ResourceKind, &str),
    ) -> Result<PendingOperation<T>, CloudError> {
        self.submit(Method::PUT, url, Some(body), description, target, decode_resource::<T>)
            .await
    }

    async fn vm_action(&self, group: &str, name: &str, action: &str) -> Result<PendingOperation<()>, CloudError> {
        self.submit(
            Method::POST,
            self.vm_url(group, name, Some(action)),
            None,
            format!("{} virtual machine {}", action, name),
            (ResourceKind::VirtualMachine, name),
            decode_unit,
        )
        .await
    }
}

#[async_trait]
impl ResourceManager for AzureProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn create_or_update_resource_group(
        &self,
        name: &str,
        group: &ResourceGroup,
    ) -> Result<PendingOperation<ResourceGroup>, CloudError> {
        let url = self.url(&resource_group_id(&self.subscription_id, name), API_RESOURCES);
        self.put(
            url,
            serde_json::to_value(group)?,
            format!("create resource group {}", name),
            (ResourceKind::ResourceGroup, name),
        )
        .await
    }

    async fn delete_resource_group(&self, name: &str) -> Result<PendingOperation<()>, CloudError> {
        let url = self.url(&resource_group_id(&self.subscription_id, name), API_RESOURCES);
        self.submit(
            Method::DELETE,
            url,
            None,
            format!("delete resource group {}", name),
            (ResourceKind::ResourceGroup, name),
            decode_unit,
        )
        .await
    }

    async fn create_storage_account(
        &self,
        group: &str,
        name: &str,
        account: &StorageAccount,
    ) -> Result<PendingOperation<StorageAccount>, CloudError> {
        let url = self.url(&self.id(group, name, ResourceKind::StorageAccount), API_STORAGE);
        self.put(
            url,
            serde_json::to_value(account)?,
            format!("create storage account {}", name),
            (ResourceKind::StorageAccount, name),
        )
        .await
    }

    async fn create_or_update_virtual_network(
        &self,
        group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<PendingOperation<VirtualNetwork>, CloudError> {
        let url = self.url(&self.id(group, name, ResourceKind::VirtualNetwork), API_NETWORK);
        self.put(
            url,
            serde_json::to_value(network)?,
            format!("create virtual network {}", name),
            (ResourceKind::VirtualNetwork, name),
        )
        .await
    }

    async fn create_or_update_subnet(
        &self,
        group: &str,
        network: &str,
        name: &str,
        subnet: &Subnet,
    ) -> Result<PendingOperation<Subnet>, CloudError> {
        let path = format!(
            "{}/subnets/{}",
            self.id(group, network, ResourceKind::VirtualNetwork),
            name
        );
        self.put(
            self.url(&path, API_NETWORK),
            serde_json::to_value(subnet)?,
            format!("create subnet {}/{}", network, name),
            (ResourceKind::Subnet, name),
        )
        .await
    }

    async fn create_or_update_network_interface(
        &self,
        group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<PendingOperation<NetworkInterface>, CloudError> {
        let url = self.url(&self.id(group, name, ResourceKind::NetworkInterface), API_NETWORK);
        self.put(
            url,
            serde_json::to_value(nic)?,
            format!("create network interface {}", name),
            (ResourceKind::NetworkInterface, name),
        )
        .await
    }

    async fn create_or_update_virtual_machine(
        &self,
        group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<PendingOperation<VirtualMachine>, CloudError> {
        self.put(
            self.vm_url(group, name, None),
            serde_json::to_value(vm)?,
            format!("create or update virtual machine {}", name),
            (ResourceKind::VirtualMachine, name),
        )
        .await
    }

    async fn update_virtual_machine_tags(
        &self,
        group: &str,
        name: &str,
        location: &str,
        tags: &Tags,
    ) -> Result<PendingOperation<VirtualMachine>, CloudError> {
        // Partial body: the service merges it into the existing VM.
        self.put(
            self.vm_url(group, name, None),
            json!({ "location": location, "tags": tags }),
            format!("update tags of virtual machine {}", name),
            (ResourceKind::VirtualMachine, name),
        )
        .await
    }

    async fn get_virtual_machine(&self, group: &str, name: &str) -> Result<VirtualMachine, CloudError> {
        let doc = self
            .session
            .get_json(
                &self.vm_url(group, name, None),
                Some((ResourceKind::VirtualMachine, name)),
            )
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    async fn deallocate_virtual_machine(&self, group: &str, name: &str) -> Result<PendingOperation<()>, CloudError> {
        self.vm_action(group, name, "deallocate").await
    }

    async fn start_virtual_machine(&self, group: &str, name: &str) -> Result<PendingOperation<()>, CloudError> {
        self.vm_action(group, name, "start").await
    }

    async fn restart_virtual_machine(&self, group: &str, name: &str) -> Result<PendingOperation<()>, CloudError> {
        self.vm_action(group, name, "restart").await
    }

    async fn power_off_virtual_machine(&self, group: &str, name: &str) -> Result<PendingOperation<()>, CloudError> {
        self.vm_action(group, name, "powerOff").await
    }

    async fn delete_virtual_machine(&self, group: &str, name: &str) -> Result<PendingOperation<()>, CloudError> {
        self.submit(
            Method::DELETE,
            self.vm_url(group, name, None),
            None,
            format!("delete virtual machine {}", name),
            (ResourceKind::VirtualMachine, name),
            decode_unit,
        )
        .await
    }

    fn list_virtual_machines(&self, scope: ListScope) -> ResourceStream<'_, VirtualMachine> {
        let path = match &scope {
            ListScope::Subscription => format!(
                "/subscriptions/{}/providers/{}",
                self.subscription_id,
                ResourceKind::VirtualMachine.provider_type()
            ),
            ListScope::ResourceGroup(group) => format!(
                "{}/providers/{}",
                resource_group_id(&self.subscription_id, group),
                ResourceKind::VirtualMachine.provider_type()
            ),
        };
        let first = self.url(&path, API_COMPUTE);
        let session = self.session.clone();

        stream::try_unfold(Some(first), move |next| {
            let session = session.clone();
            async move {
                let Some(url) = next else {
                    return Ok::<_, CloudError>(None);
                };
                debug!("🔵 [azure-arm] GET {} - listing virtual machines", url);
                let doc = session.get_json(&url, None).await?;
                let page: Page<VirtualMachine> = serde_json::from_value(doc)?;
                let items = stream::iter(page.value.into_iter().map(Ok::<_, CloudError>));
                Ok(Some((items, page.next_link)))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn create_or_update_disk(
        &self,
        group: &str,
        name: &str,
        disk: &Disk,
    ) -> Result<PendingOperation<Disk>, CloudError> {
        let url = self.url(&self.id(group, name, ResourceKind::Disk), API_DISKS);
        self.put(
            url,
            serde_json::to_value(disk)?,
            format!("create or update disk {}", name),
            (ResourceKind::Disk, name),
        )
        .await
    }

    async fn get_disk(&self, group: &str, name: &str) -> Result<Disk, CloudError> {
        let url = self.url(&self.id(group, name, ResourceKind::Disk), API_DISKS);
        let doc = self
            .session
            .get_json(&url, Some((ResourceKind::Disk, name)))
            .await?;
        Ok(serde_json::from_value(doc)?)
    }
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "nextLink", default)]
    next_link: Option<String>,
}

// --- helpers ---

fn transport(e: reqwest::Error) -> CloudError {
    CloudError::Transport(e.to_string())
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header(headers, "retry-after")
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn parse_body(text: &str) -> Result<Value, CloudError> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(text)?)
}

fn provisioning_state(doc: &Value) -> Option<&str> {
    doc["properties"]["provisioningState"].as_str()
}

fn is_terminal(state: &str) -> bool {
    matches!(state, "Succeeded" | "Failed" | "Canceled")
}

fn expires_in_secs(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

/// `error.message` of an ARM/AAD error body, or the raw text.
fn error_message(text: &str) -> String {
    let doc: Value = serde_json::from_str(text).unwrap_or(Value::Null);
    doc["error"]["message"]
        .as_str()
        .or_else(|| doc["error_description"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| text.to_string())
}

fn service_error(
    operation: &str,
    status: StatusCode,
    text: &str,
    target: Option<(ResourceKind, &str)>,
) -> CloudError {
    if status == StatusCode::NOT_FOUND {
        if let Some((kind, name)) = target {
            return CloudError::not_found(kind, name);
        }
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return CloudError::Authentication(format!("{}: {}", operation, error_message(text)));
    }
    let doc: Value = serde_json::from_str(text).unwrap_or(Value::Null);
    CloudError::OperationRejectedByService {
        operation: operation.to_string(),
        code: doc["error"]["code"]
            .as_str()
            .map(str::to_string)
            .or_else(|| Some(status.as_u16().to_string())),
        message: error_message(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn endpoints_come_from_metadata_document() {
        let doc = json!({
            "galleryEndpoint": "https://portal.local.azurestack.external:30015/",
            "authentication": {
                "loginEndpoint": "https://login.microsoftonline.com/",
                "audiences": ["https://management.contoso.onmicrosoft.com/abc"]
            }
        });
        let endpoints =
            CloudEndpoints::from_metadata("https://management.local.azurestack.external/", &doc).unwrap();
        assert_eq!(endpoints.resource_manager, "https://management.local.azurestack.external");
        assert_eq!(endpoints.login_endpoint, "https://login.microsoftonline.com");
        assert_eq!(endpoints.audience, "https://management.contoso.onmicrosoft.com/abc");
    }

    #[test]
    fn metadata_without_audience_is_rejected() {
        let doc = json!({ "authentication": { "loginEndpoint": "https://login/" } });
        assert!(matches!(
            CloudEndpoints::from_metadata("https://arm", &doc),
            Err(CloudError::Decode(_))
        ));
    }

    #[test]
    fn service_errors_map_onto_taxonomy() {
        let body = r#"{"error":{"code":"OperationNotAllowed","message":"Disk resize requires deallocation"}}"#;
        match service_error("PUT disk", StatusCode::CONFLICT, body, Some((ResourceKind::Disk, "os"))) {
            CloudError::OperationRejectedByService { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("OperationNotAllowed"));
                assert_eq!(message, "Disk resize requires deallocation");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            service_error("GET vm", StatusCode::NOT_FOUND, "", Some((ResourceKind::VirtualMachine, "vm"))),
            CloudError::NotFound { kind: ResourceKind::VirtualMachine, .. }
        ));
        assert!(matches!(
            service_error("GET vm", StatusCode::FORBIDDEN, "{}", None),
            CloudError::Authentication(_)
        ));
        match service_error("GET status", StatusCode::BAD_GATEWAY, "upstream down", None) {
            CloudError::OperationRejectedByService { code, message, .. } => {
                assert_eq!(code.as_deref(), Some("502"));
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn retry_after_is_read_in_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("17"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(17)));
        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn token_lifetime_accepts_number_or_string() {
        assert_eq!(expires_in_secs(&json!(3599)), Some(3599));
        assert_eq!(expires_in_secs(&json!("3600")), Some(3600));
        assert_eq!(expires_in_secs(&Value::Null), None);
    }

    #[test]
    fn provisioning_states() {
        let creating = json!({ "properties": { "provisioningState": "Creating" } });
        assert_eq!(provisioning_state(&creating), Some("Creating"));
        assert!(!is_terminal("Creating"));
        assert!(is_terminal("Canceled"));
        assert_eq!(provisioning_state(&json!({})), None);
    }

    #[test]
    fn list_page_tolerates_missing_fields() {
        let page: Page<VirtualMachine> = serde_json::from_value(json!({})).unwrap();
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }
}
