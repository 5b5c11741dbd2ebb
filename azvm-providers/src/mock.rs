//! In-memory resource manager.
//!
//! Models group containment, creation dependencies (subnet needs its network,
//! NIC needs its subnet, VM needs its NIC and any attached disk), VM power
//! state, and service-side rejections such as resizing the OS disk of a VM
//! that is not deallocated. Failures can be injected per operation and
//! occurrence, and every call is journaled for assertions.
use crate::{ListScope, OperationPoller, PendingOperation, PollStatus, ResourceManager, ResourceStream};
use async_trait::async_trait;
use azvm_common::{
    CloudError, Disk, DiskCreateOption, Extra, NetworkInterface, OsDisk, ResourceGroup,
    ResourceIdentity, ResourceKind, StorageAccount, SubResource, Subnet, Tags, VirtualMachine,
    VirtualNetwork,
};
use serde_json::{json, Value};
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub const MOCK_SUBSCRIPTION_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Size the mock gives OS disks created from an image.
pub const MOCK_OS_DISK_SIZE_GB: u32 = 64;

/// Storage tier the mock gives OS disks created from an image.
pub const MOCK_OS_DISK_SKU: &str = "Premium_LRS";

const SUCCEEDED: &str = "Succeeded";

fn extra(value: Value) -> Extra {
    match value {
        Value::Object(map) => map,
        _ => Extra::new(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    CreateResourceGroup,
    DeleteResourceGroup,
    CreateStorageAccount,
    CreateVirtualNetwork,
    CreateSubnet,
    CreateNetworkInterface,
    CreateVirtualMachine,
    UpdateVirtualMachineTags,
    GetVirtualMachine,
    DeallocateVirtualMachine,
    StartVirtualMachine,
    RestartVirtualMachine,
    PowerOffVirtualMachine,
    DeleteVirtualMachine,
    ListVirtualMachines,
    CreateDisk,
    GetDisk,
}

impl MockOp {
    pub const ALL: [MockOp; 17] = [
        MockOp::CreateResourceGroup,
        MockOp::DeleteResourceGroup,
        MockOp::CreateStorageAccount,
        MockOp::CreateVirtualNetwork,
        MockOp::CreateSubnet,
        MockOp::CreateNetworkInterface,
        MockOp::CreateVirtualMachine,
        MockOp::UpdateVirtualMachineTags,
        MockOp::GetVirtualMachine,
        MockOp::DeallocateVirtualMachine,
        MockOp::StartVirtualMachine,
        MockOp::RestartVirtualMachine,
        MockOp::PowerOffVirtualMachine,
        MockOp::DeleteVirtualMachine,
        MockOp::ListVirtualMachines,
        MockOp::CreateDisk,
        MockOp::GetDisk,
    ];
}

/// How an injected failure manifests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// The submission itself is refused.
    Reject,
    /// The submission is accepted but the operation ends in failure.
    /// Reads report a transport error instead.
    FailOperation,
    /// The operation never reaches a terminal state.
    /// Reads report a transport error instead.
    Hang,
    /// The call panics.
    Panic,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    op: MockOp,
    occurrence: u32,
    mode: FailureMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub op: MockOp,
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
    Deallocated,
}

#[derive(Debug, Clone)]
struct MockVm {
    vm: VirtualMachine,
    power: PowerState,
}

type Key = (String, String);

#[derive(Default)]
struct MockState {
    groups: BTreeMap<String, ResourceGroup>,
    storage_accounts: BTreeMap<Key, StorageAccount>,
    networks: BTreeMap<Key, VirtualNetwork>,
    subnets: BTreeMap<Key, Subnet>,
    nics: BTreeMap<Key, NetworkInterface>,
    vms: BTreeMap<Key, MockVm>,
    disks: BTreeMap<Key, Disk>,
    calls: Vec<RecordedCall>,
    counts: HashMap<MockOp, u32>,
    vm_submissions: Vec<VirtualMachine>,
    disk_submissions: Vec<Disk>,
}

impl MockState {
    fn require_group(&self, group: &str) -> Result<(), CloudError> {
        if self.groups.contains_key(group) {
            Ok(())
        } else {
            Err(CloudError::not_found(ResourceKind::ResourceGroup, group))
        }
    }

    fn nic_by_id(&self, id: &str) -> Option<&NetworkInterface> {
        self.nics.values().find(|n| n.id.as_deref() == Some(id))
    }

    fn disk_key_by_id(&self, id: &str) -> Option<Key> {
        self.disks
            .iter()
            .find(|(_, d)| d.id.as_deref() == Some(id))
            .map(|(k, _)| k.clone())
    }

    /// VM (other than `except`) that references the given NIC or disk id.
    fn vm_using(&self, except: &Key, id: &str) -> Option<String> {
        self.vms
            .iter()
            .filter(|(k, _)| *k != except)
            .find(|(_, m)| {
                let storage = &m.vm.properties.storage_profile;
                m.vm.network_interface_ids().any(|n| n == id)
                    || storage
                        .os_disk
                        .as_ref()
                        .and_then(|d| d.managed_disk.as_ref())
                        .is_some_and(|d| d.id == id)
                    || storage
                        .data_disks
                        .iter()
                        .any(|d| d.managed_disk.as_ref().is_some_and(|m| m.id == id))
            })
            .map(|(k, _)| k.1.clone())
    }

    fn power_of_vm_with_os_disk(&self, disk_id: &str) -> Option<PowerState> {
        self.vms
            .values()
            .find(|m| {
                m.vm.properties
                    .storage_profile
                    .os_disk
                    .as_ref()
                    .and_then(|d| d.managed_disk.as_ref())
                    .is_some_and(|d| d.id == disk_id)
            })
            .map(|m| m.power)
    }

    fn remove_group(&mut self, group: &str) -> usize {
        let before = self.resource_count();
        self.groups.remove(group);
        self.storage_accounts.retain(|k, _| k.0 != group);
        self.networks.retain(|k, _| k.0 != group);
        self.subnets.retain(|k, _| k.0 != group);
        self.nics.retain(|k, _| k.0 != group);
        self.vms.retain(|k, _| k.0 != group);
        self.disks.retain(|k, _| k.0 != group);
        before - self.resource_count()
    }

    fn resource_count(&self) -> usize {
        self.storage_accounts.len()
            + self.networks.len()
            + self.subnets.len()
            + self.nics.len()
            + self.vms.len()
            + self.disks.len()
    }
}

struct MockPoller<T> {
    remaining: u32,
    hang: bool,
    outcome: Option<Result<T, CloudError>>,
}

#[async_trait]
impl<T: Send> OperationPoller<T> for MockPoller<T> {
    async fn poll(&mut self) -> Result<PollStatus<T>, CloudError> {
        if self.hang || self.remaining > 0 {
            self.remaining = self.remaining.saturating_sub(1);
            return Ok(PollStatus::InProgress { retry_after: None });
        }
        match self.outcome.take() {
            Some(Ok(value)) => Ok(PollStatus::Succeeded(value)),
            Some(Err(e)) => Err(e),
            None => Err(CloudError::Decode("operation already completed".to_string())),
        }
    }
}

#[derive(Clone)]
pub struct MockProvider {
    subscription_id: String,
    pending_polls: u32,
    omit_disk_sizes: bool,
    failures: Vec<Failure>,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            subscription_id: MOCK_SUBSCRIPTION_ID.to_string(),
            pending_polls: 1,
            omit_disk_sizes: false,
            failures: Vec::new(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Number of `InProgress` polls every operation reports before finishing.
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Reads return disks without a size, like some hybrid stacks do.
    pub fn with_omitted_disk_sizes(mut self) -> Self {
        self.omit_disk_sizes = true;
        self
    }

    /// Inject `mode` on the `occurrence`-th (1-based) call of `op`.
    pub fn fail(mut self, op: MockOp, occurrence: u32, mode: FailureMode) -> Self {
        self.failures.push(Failure {
            op,
            occurrence,
            mode,
        });
        self
    }

    // --- Inspection ---

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: MockOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Every VM body submitted through create-or-update, in order.
    pub fn vm_submissions(&self) -> Vec<VirtualMachine> {
        self.lock().vm_submissions.clone()
    }

    /// Every disk body submitted through create-or-update, in order.
    pub fn disk_submissions(&self) -> Vec<Disk> {
        self.lock().disk_submissions.clone()
    }

    pub fn group_exists(&self, group: &str) -> bool {
        self.lock().groups.contains_key(group)
    }

    /// Child resources across all groups.
    pub fn resource_count(&self) -> usize {
        self.lock().resource_count()
    }

    pub fn power_state(&self, group: &str, vm: &str) -> Option<PowerState> {
        self.lock()
            .vms
            .get(&(group.to_string(), vm.to_string()))
            .map(|m| m.power)
    }

    /// Stored disk, including its real size.
    pub fn stored_disk(&self, group: &str, name: &str) -> Option<Disk> {
        self.lock()
            .disks
            .get(&(group.to_string(), name.to_string()))
            .cloned()
    }

    // --- Internals ---

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panic injected by a test must not poison later inspection.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn identity(&self, group: &str, name: &str, kind: ResourceKind) -> String {
        ResourceIdentity::new(group, name).arm_id(&self.subscription_id, kind)
    }

    /// Journal the call and resolve any injected failure for it.
    fn begin(&self, op: MockOp, target: &str) -> Result<Option<FailureMode>, CloudError> {
        let occurrence = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                op,
                target: target.to_string(),
            });
            let n = state.counts.entry(op).or_insert(0);
            *n += 1;
            *n
        };
        debug!("🔵 [mock] {:?} {} (call #{})", op, target, occurrence);

        let mode = self
            .failures
            .iter()
            .find(|f| f.op == op && f.occurrence == occurrence)
            .map(|f| f.mode);
        match mode {
            Some(FailureMode::Reject) => {
                warn!("❌ [mock] injected rejection for {:?} {}", op, target);
                Err(CloudError::rejected(
                    format!("{:?} {}", op, target),
                    "injected rejection",
                ))
            }
            Some(FailureMode::Panic) => panic!("injected panic in {:?} {}", op, target),
            other => Ok(other),
        }
    }

    /// Pending operation for an injected operation-level failure, if any.
    fn interrupted<T: Send + 'static>(
        &self,
        mode: Option<FailureMode>,
        description: &str,
    ) -> Option<PendingOperation<T>> {
        let (hang, outcome) = match mode? {
            FailureMode::FailOperation => (
                false,
                Err(CloudError::OperationRejectedByService {
                    operation: description.to_string(),
                    code: Some("InternalOperationError".to_string()),
                    message: "injected operation failure".to_string(),
                }),
            ),
            FailureMode::Hang => (true, Err(CloudError::Decode("unreachable".to_string()))),
            FailureMode::Reject | FailureMode::Panic => return None,
        };
        Some(PendingOperation::new(
            description,
            Box::new(MockPoller {
                remaining: self.pending_polls,
                hang,
                outcome: Some(outcome),
            }),
        ))
    }

    fn read_failure(mode: Option<FailureMode>, description: &str) -> Result<(), CloudError> {
        match mode {
            Some(FailureMode::FailOperation) | Some(FailureMode::Hang) => Err(CloudError::Transport(
                format!("injected failure reading {}", description),
            )),
            _ => Ok(()),
        }
    }

    fn pending<T: Send + 'static>(&self, description: String, value: T) -> PendingOperation<T> {
        PendingOperation::new(
            description,
            Box::new(MockPoller {
                remaining: self.pending_polls,
                hang: false,
                outcome: Some(Ok(value)),
            }),
        )
    }

    fn strip_for_read(&self, mut disk: Disk) -> Disk {
        if self.omit_disk_sizes {
            disk.properties.disk_size_gb = None;
        }
        disk
    }

    fn power_action(
        &self,
        op: MockOp,
        group: &str,
        name: &str,
        verb: &str,
        apply: impl FnOnce(PowerState) -> Result<PowerState, String>,
    ) -> Result<PendingOperation<()>, CloudError> {
        let description = format!("{} virtual machine {}", verb, name);
        let mode = self.begin(op, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        {
            let mut state = self.lock();
            state.require_group(group)?;
            let vm = state
                .vms
                .get_mut(&(group.to_string(), name.to_string()))
                .ok_or_else(|| CloudError::not_found(ResourceKind::VirtualMachine, name))?;
            vm.power = apply(vm.power).map_err(|msg| CloudError::OperationRejectedByService {
                operation: description.clone(),
                code: Some("OperationNotAllowed".to_string()),
                message: msg,
            })?;
        }
        Ok(self.pending(description, ()))
    }
}

#[async_trait]
impl ResourceManager for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    async fn create_or_update_resource_group(
        &self,
        name: &str,
        group: &ResourceGroup,
    ) -> Result<PendingOperation<ResourceGroup>, CloudError> {
        let description = format!("create resource group {}", name);
        let mode = self.begin(MockOp::CreateResourceGroup, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        let mut created = group.clone();
        created.id = Some(azvm_common::resource_group_id(&self.subscription_id, name));
        created.name = Some(name.to_string());
        self.lock().groups.insert(name.to_string(), created.clone());
        Ok(self.pending(description, created))
    }

    async fn delete_resource_group(&self, name: &str) -> Result<PendingOperation<()>, CloudError> {
        let description = format!("delete resource group {}", name);
        let mode = self.begin(MockOp::DeleteResourceGroup, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        let removed = {
            let mut state = self.lock();
            state.require_group(name)?;
            state.remove_group(name)
        };
        debug!("🗑️ [mock] resource group {} removed with {} child resource(s)", name, removed);
        Ok(self.pending(description, ()))
    }

    async fn create_storage_account(
        &self,
        group: &str,
        name: &str,
        account: &StorageAccount,
    ) -> Result<PendingOperation<StorageAccount>, CloudError> {
        let description = format!("create storage account {}", name);
        let mode = self.begin(MockOp::CreateStorageAccount, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        let valid = (3..=24).contains(&name.len())
            && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(CloudError::OperationRejectedByService {
                operation: description,
                code: Some("AccountNameInvalid".to_string()),
                message: format!("'{}' is not a valid storage account name", name),
            });
        }
        let mut created = account.clone();
        created.id = Some(self.identity(group, name, ResourceKind::StorageAccount));
        created.name = Some(name.to_string());
        {
            let mut state = self.lock();
            state.require_group(group)?;
            state
                .storage_accounts
                .insert((group.to_string(), name.to_string()), created.clone());
        }
        Ok(self.pending(description, created))
    }

    async fn create_or_update_virtual_network(
        &self,
        group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<PendingOperation<VirtualNetwork>, CloudError> {
        let description = format!("create virtual network {}", name);
        let mode = self.begin(MockOp::CreateVirtualNetwork, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        let mut created = network.clone();
        created.id = Some(self.identity(group, name, ResourceKind::VirtualNetwork));
        created.name = Some(name.to_string());
        created.properties.provisioning_state = Some(SUCCEEDED.to_string());
        {
            let mut state = self.lock();
            state.require_group(group)?;
            state
                .networks
                .insert((group.to_string(), name.to_string()), created.clone());
        }
        Ok(self.pending(description, created))
    }

    async fn create_or_update_subnet(
        &self,
        group: &str,
        network: &str,
        name: &str,
        subnet: &Subnet,
    ) -> Result<PendingOperation<Subnet>, CloudError> {
        let description = format!("create subnet {}/{}", network, name);
        let mode = self.begin(MockOp::CreateSubnet, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        let mut created = subnet.clone();
        created.id = Some(format!(
            "{}/subnets/{}",
            self.identity(group, network, ResourceKind::VirtualNetwork),
            name
        ));
        created.name = Some(name.to_string());
        created.properties.provisioning_state = Some(SUCCEEDED.to_string());
        {
            let mut state = self.lock();
            state.require_group(group)?;
            if !state
                .networks
                .contains_key(&(group.to_string(), network.to_string()))
            {
                return Err(CloudError::not_found(ResourceKind::VirtualNetwork, network));
            }
            state.subnets.insert(
                (group.to_string(), format!("{}/{}", network, name)),
                created.clone(),
            );
        }
        Ok(self.pending(description, created))
    }

    async fn create_or_update_network_interface(
        &self,
        group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<PendingOperation<NetworkInterface>, CloudError> {
        let description = format!("create network interface {}", name);
        let mode = self.begin(MockOp::CreateNetworkInterface, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        let mut created = nic.clone();
        created.id = Some(self.identity(group, name, ResourceKind::NetworkInterface));
        created.name = Some(name.to_string());
        created.properties.provisioning_state = Some(SUCCEEDED.to_string());
        {
            let mut state = self.lock();
            state.require_group(group)?;
            for ip in &nic.properties.ip_configurations {
                let subnet_id = &ip.properties.subnet.id;
                if !state
                    .subnets
                    .values()
                    .any(|s| s.id.as_deref() == Some(subnet_id.as_str()))
                {
                    return Err(CloudError::not_found(ResourceKind::Subnet, subnet_id.as_str()));
                }
            }
            state
                .nics
                .insert((group.to_string(), name.to_string()), created.clone());
        }
        Ok(self.pending(description, created))
    }

    async fn create_or_update_virtual_machine(
        &self,
        group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<PendingOperation<VirtualMachine>, CloudError> {
        let description = format!("create or update virtual machine {}", name);
        let mode = self.begin(MockOp::CreateVirtualMachine, name)?;
        let reject = |message: String| CloudError::OperationRejectedByService {
            operation: description.clone(),
            code: Some("InvalidParameter".to_string()),
            message,
        };

        let mut state = self.lock();
        state.vm_submissions.push(vm.clone());
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        state.require_group(group)?;
        let key = (group.to_string(), name.to_string());

        for nic_id in vm.network_interface_ids() {
            if state.nic_by_id(nic_id).is_none() {
                return Err(CloudError::not_found(ResourceKind::NetworkInterface, nic_id));
            }
            if let Some(other) = state.vm_using(&key, nic_id) {
                return Err(reject(format!(
                    "network interface {} is in use by virtual machine {}",
                    nic_id, other
                )));
            }
        }
        for data_disk in vm.data_disks() {
            let Some(managed) = &data_disk.managed_disk else {
                return Err(reject(format!("data disk at lun {} has no managed disk", data_disk.lun)));
            };
            if state.disk_key_by_id(&managed.id).is_none() {
                return Err(CloudError::not_found(ResourceKind::Disk, managed.id.as_str()));
            }
            if let Some(other) = state.vm_using(&key, &managed.id) {
                return Err(reject(format!("disk {} is attached to {}", managed.id, other)));
            }
        }

        let mut stored = vm.clone();
        stored.id = Some(self.identity(group, name, ResourceKind::VirtualMachine));
        stored.name = Some(name.to_string());
        stored.properties.provisioning_state = Some(SUCCEEDED.to_string());
        if let Some(profile) = stored.properties.os_profile.as_mut() {
            profile.admin_password = None;
        }

        let power = match state.vms.get(&key) {
            Some(existing) => {
                if stored.properties.storage_profile.os_disk.is_none() {
                    stored.properties.storage_profile.os_disk =
                        existing.vm.properties.storage_profile.os_disk.clone();
                }
                existing.power
            }
            None => {
                if stored.properties.storage_profile.image_reference.is_none() {
                    return Err(reject("an image reference is required to create a VM".to_string()));
                }
                let os_name = stored
                    .os_disk_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{}_OsDisk", name));
                let os_key = (group.to_string(), os_name.clone());
                if state.disks.contains_key(&os_key) {
                    return Err(CloudError::OperationRejectedByService {
                        operation: description.clone(),
                        code: Some("Conflict".to_string()),
                        message: format!("disk {} already exists", os_name),
                    });
                }
                let os_type = match &stored.properties.storage_profile.image_reference {
                    Some(image) if image.publisher == "MicrosoftWindowsServer" => "Windows",
                    _ => "Linux",
                };
                let os_id = self.identity(group, &os_name, ResourceKind::Disk);

                // Fields the service fills in that this crate does not model.
                let mut os_disk = Disk::empty(stored.location.clone(), MOCK_OS_DISK_SIZE_GB);
                os_disk.id = Some(os_id.clone());
                os_disk.name = Some(os_name.clone());
                os_disk.properties.provisioning_state = Some(SUCCEEDED.to_string());
                os_disk.properties.creation_data.create_option = DiskCreateOption::FromImage;
                let image_id = format!(
                    "/Subscriptions/{}/Providers/Microsoft.Compute/Locations/{}/Publishers/mock/VMImage",
                    self.subscription_id, stored.location
                );
                os_disk.properties.creation_data.extra = extra(json!({ "imageReference": { "id": image_id } }));
                os_disk.properties.extra = extra(json!({ "osType": os_type, "hyperVGeneration": "V1" }));
                os_disk.extra = extra(json!({ "sku": { "name": MOCK_OS_DISK_SKU, "tier": "Premium" } }));

                let mut managed = SubResource::new(os_id);
                managed.extra = extra(json!({ "storageAccountType": MOCK_OS_DISK_SKU }));
                stored.properties.storage_profile.os_disk = Some(OsDisk {
                    name: Some(os_name),
                    create_option: DiskCreateOption::FromImage,
                    managed_disk: Some(managed),
                    disk_size_gb: None,
                    extra: extra(json!({ "caching": "ReadWrite", "osType": os_type })),
                });
                state.disks.insert(os_key, os_disk);
                PowerState::Running
            }
        };
        state.vms.insert(
            key,
            MockVm {
                vm: stored.clone(),
                power,
            },
        );
        drop(state);
        Ok(self.pending(description, stored))
    }

    async fn update_virtual_machine_tags(
        &self,
        group: &str,
        name: &str,
        _location: &str,
        tags: &Tags,
    ) -> Result<PendingOperation<VirtualMachine>, CloudError> {
        let description = format!("update tags of virtual machine {}", name);
        let mode = self.begin(MockOp::UpdateVirtualMachineTags, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        let updated = {
            let mut state = self.lock();
            state.require_group(group)?;
            let entry = state
                .vms
                .get_mut(&(group.to_string(), name.to_string()))
                .ok_or_else(|| CloudError::not_found(ResourceKind::VirtualMachine, name))?;
            entry
                .vm
                .tags
                .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            entry.vm.clone()
        };
        Ok(self.pending(description, updated))
    }

    async fn get_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<VirtualMachine, CloudError> {
        let mode = self.begin(MockOp::GetVirtualMachine, name)?;
        Self::read_failure(mode, name)?;
        let found = {
            let state = self.lock();
            state.require_group(group)?;
            state
                .vms
                .get(&(group.to_string(), name.to_string()))
                .map(|m| m.vm.clone())
        };
        found.ok_or_else(|| CloudError::not_found(ResourceKind::VirtualMachine, name))
    }

    async fn deallocate_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError> {
        self.power_action(MockOp::DeallocateVirtualMachine, group, name, "deallocate", |_| {
            Ok(PowerState::Deallocated)
        })
    }

    async fn start_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError> {
        self.power_action(MockOp::StartVirtualMachine, group, name, "start", |_| {
            Ok(PowerState::Running)
        })
    }

    async fn restart_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError> {
        self.power_action(MockOp::RestartVirtualMachine, group, name, "restart", |power| {
            match power {
                PowerState::Running => Ok(PowerState::Running),
                other => Err(format!("cannot restart a VM that is {:?}", other)),
            }
        })
    }

    async fn power_off_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError> {
        self.power_action(MockOp::PowerOffVirtualMachine, group, name, "power off", |power| {
            match power {
                PowerState::Deallocated => Ok(PowerState::Deallocated),
                _ => Ok(PowerState::Stopped),
            }
        })
    }

    async fn delete_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError> {
        let description = format!("delete virtual machine {}", name);
        let mode = self.begin(MockOp::DeleteVirtualMachine, name)?;
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        {
            let mut state = self.lock();
            state.require_group(group)?;
            // Managed disks and NICs outlive the VM.
            state
                .vms
                .remove(&(group.to_string(), name.to_string()))
                .ok_or_else(|| CloudError::not_found(ResourceKind::VirtualMachine, name))?;
        }
        Ok(self.pending(description, ()))
    }

    fn list_virtual_machines(&self, scope: ListScope) -> ResourceStream<'_, VirtualMachine> {
        let target = match &scope {
            ListScope::Subscription => self.subscription_id.clone(),
            ListScope::ResourceGroup(group) => group.clone(),
        };
        let listed = self
            .begin(MockOp::ListVirtualMachines, &target)
            .and_then(|mode| Self::read_failure(mode, &target))
            .and_then(|()| {
                let state = self.lock();
                let vms: Vec<VirtualMachine> = match &scope {
                    ListScope::Subscription => state.vms.values().map(|m| m.vm.clone()).collect(),
                    ListScope::ResourceGroup(group) => {
                        state.require_group(group)?;
                        state
                            .vms
                            .iter()
                            .filter(|(k, _)| &k.0 == group)
                            .map(|(_, m)| m.vm.clone())
                            .collect()
                    }
                };
                Ok(vms)
            });
        match listed {
            Ok(vms) => stream::iter(vms.into_iter().map(Ok)).boxed(),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn create_or_update_disk(
        &self,
        group: &str,
        name: &str,
        disk: &Disk,
    ) -> Result<PendingOperation<Disk>, CloudError> {
        let description = format!("create or update disk {}", name);
        let mode = self.begin(MockOp::CreateDisk, name)?;
        let reject = |code: &str, message: String| CloudError::OperationRejectedByService {
            operation: description.clone(),
            code: Some(code.to_string()),
            message,
        };

        let mut state = self.lock();
        state.disk_submissions.push(disk.clone());
        if let Some(op) = self.interrupted(mode, &description) {
            return Ok(op);
        }
        state.require_group(group)?;
        let key = (group.to_string(), name.to_string());

        let stored = match state.disks.get(&key).cloned() {
            Some(existing) => {
                let requested = disk.size_gb();
                let current = existing.size_gb();
                if requested != current {
                    let (Some(requested), Some(current)) = (requested, current) else {
                        return Err(reject("InvalidParameter", "disk size is required".to_string()));
                    };
                    if requested < current {
                        return Err(reject(
                            "InvalidParameter",
                            format!("cannot shrink disk from {} GB to {} GB", current, requested),
                        ));
                    }
                    let disk_id = existing.id.clone().unwrap_or_default();
                    if let Some(power) = state.power_of_vm_with_os_disk(&disk_id) {
                        if power != PowerState::Deallocated {
                            return Err(reject(
                                "OperationNotAllowed",
                                format!(
                                    "disk {} can only be resized while its VM is deallocated (VM is {:?})",
                                    name, power
                                ),
                            ));
                        }
                    }
                }
                // Whole-object replace; creation data is immutable.
                let mut updated = existing;
                updated.properties.disk_size_gb = requested;
                updated.properties.extra = disk.properties.extra.clone();
                updated.extra = disk.extra.clone();
                updated
            }
            None => {
                if disk.properties.creation_data.create_option == DiskCreateOption::Empty
                    && disk.size_gb().unwrap_or(0) == 0
                {
                    return Err(reject(
                        "InvalidParameter",
                        "an empty disk requires a size".to_string(),
                    ));
                }
                let mut created = disk.clone();
                created.id = Some(self.identity(group, name, ResourceKind::Disk));
                created.name = Some(name.to_string());
                created.properties.provisioning_state = Some(SUCCEEDED.to_string());
                created.properties.disk_state = Some("Unattached".to_string());
                created
            }
        };
        state.disks.insert(key, stored.clone());
        drop(state);
        Ok(self.pending(description, self.strip_for_read(stored)))
    }

    async fn get_disk(&self, group: &str, name: &str) -> Result<Disk, CloudError> {
        let mode = self.begin(MockOp::GetDisk, name)?;
        Self::read_failure(mode, name)?;
        let disk = {
            let state = self.lock();
            state.require_group(group)?;
            state
                .disks
                .get(&(group.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| CloudError::not_found(ResourceKind::Disk, name))?
        };
        Ok(self.strip_for_read(disk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use azvm_common::settings::WaitPolicy;
    use azvm_common::{ImageFlavor, NetworkProfile, StorageProfile, VirtualMachineProperties};
    use futures_util::TryStreamExt;
    use std::time::Duration;

    fn fast() -> WaitPolicy {
        WaitPolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    fn vm_spec(nic_id: Option<&str>) -> VirtualMachine {
        VirtualMachine {
            id: None,
            name: None,
            location: "local".to_string(),
            tags: Tags::new(),
            properties: VirtualMachineProperties {
                storage_profile: StorageProfile {
                    image_reference: Some(ImageFlavor::Linux.reference()),
                    ..Default::default()
                },
                network_profile: NetworkProfile {
                    network_interfaces: nic_id.map(|id| vec![SubResource::new(id)]).unwrap_or_default(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn with_group(mock: &MockProvider) {
        mock.create_or_update_resource_group("rg", &ResourceGroup::in_location("local"))
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn subnet_requires_existing_network() {
        let mock = MockProvider::new();
        with_group(&mock).await;
        let subnet = Subnet {
            id: None,
            name: None,
            properties: Default::default(),
        };
        let err = mock
            .create_or_update_subnet("rg", "missing-vnet", "sn", &subnet)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CloudError::NotFound { kind: ResourceKind::VirtualNetwork, .. }));
    }

    #[tokio::test]
    async fn resizing_os_disk_of_running_vm_is_rejected() {
        let mock = MockProvider::new();
        with_group(&mock).await;
        let vm = mock
            .create_or_update_virtual_machine("rg", "vm", &vm_spec(None))
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        let os_name = vm.os_disk_name().unwrap().to_string();
        let mut disk = mock.get_disk("rg", &os_name).await.unwrap();
        disk.properties.disk_size_gb = Some(40);

        let err = mock
            .create_or_update_disk("rg", &os_name, &disk)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CloudError::OperationRejectedByService { .. }));

        mock.deallocate_virtual_machine("rg", "vm")
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        let resized = mock
            .create_or_update_disk("rg", &os_name, &disk)
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        assert_eq!(resized.size_gb(), Some(40));
    }

    #[tokio::test]
    async fn restart_of_deallocated_vm_is_rejected() {
        let mock = MockProvider::new();
        with_group(&mock).await;
        mock.create_or_update_virtual_machine("rg", "vm", &vm_spec(None))
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        mock.deallocate_virtual_machine("rg", "vm")
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        assert!(mock.restart_virtual_machine("rg", "vm").await.is_err());
        assert_eq!(mock.power_state("rg", "vm"), Some(PowerState::Deallocated));
    }

    #[tokio::test]
    async fn deleting_group_removes_children() {
        let mock = MockProvider::new();
        with_group(&mock).await;
        mock.create_or_update_virtual_machine("rg", "vm", &vm_spec(None))
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        assert_eq!(mock.resource_count(), 2);
        mock.delete_resource_group("rg")
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        assert_eq!(mock.resource_count(), 0);
        assert!(!mock.group_exists("rg"));
        let err = mock.get_virtual_machine("rg", "vm").await.unwrap_err();
        assert!(matches!(err, CloudError::NotFound { .. }));
    }

    #[tokio::test]
    async fn vm_with_unknown_nic_is_not_created() {
        let mock = MockProvider::new();
        with_group(&mock).await;
        let err = mock
            .create_or_update_virtual_machine("rg", "vm", &vm_spec(Some("/nope")))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CloudError::NotFound { kind: ResourceKind::NetworkInterface, .. }));
    }

    #[tokio::test]
    async fn omitted_sizes_hide_disk_size_on_read() {
        let mock = MockProvider::new().with_omitted_disk_sizes();
        with_group(&mock).await;
        let vm = mock
            .create_or_update_virtual_machine("rg", "vm", &vm_spec(None))
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        let os_name = vm.os_disk_name().unwrap();
        assert_eq!(mock.get_disk("rg", os_name).await.unwrap().size_gb(), None);
        assert_eq!(
            mock.stored_disk("rg", os_name).unwrap().size_gb(),
            Some(MOCK_OS_DISK_SIZE_GB)
        );
    }

    #[tokio::test]
    async fn disk_put_replaces_unmodelled_fields() {
        let mock = MockProvider::new();
        with_group(&mock).await;
        let vm = mock
            .create_or_update_virtual_machine("rg", "vm", &vm_spec(None))
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        let os_name = vm.os_disk_name().unwrap().to_string();
        let os_disk = vm.properties.storage_profile.os_disk.as_ref().unwrap();
        assert_eq!(os_disk.extra["caching"], "ReadWrite");

        let mut fetched = mock.get_disk("rg", &os_name).await.unwrap();
        assert_eq!(fetched.extra["sku"]["name"], MOCK_OS_DISK_SKU);
        assert_eq!(fetched.properties.extra["osType"], "Linux");

        fetched.extra.clear();
        mock.create_or_update_disk("rg", &os_name, &fetched)
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        let stored = mock.stored_disk("rg", &os_name).unwrap();
        assert!(!stored.extra.contains_key("sku"));
        assert_eq!(stored.properties.extra["osType"], "Linux");
        assert!(stored.properties.creation_data.extra.contains_key("imageReference"));
    }

    #[tokio::test]
    async fn injected_failures_follow_occurrence() {
        let mock = MockProvider::new()
            .fail(MockOp::CreateResourceGroup, 2, FailureMode::FailOperation)
            .fail(MockOp::DeleteResourceGroup, 1, FailureMode::Hang);
        with_group(&mock).await;

        let second = mock
            .create_or_update_resource_group("rg2", &ResourceGroup::in_location("local"))
            .await
            .unwrap();
        assert!(second.wait(&fast()).await.is_err());
        assert!(!mock.group_exists("rg2"));

        let stuck = mock.delete_resource_group("rg").await.unwrap();
        let err = stuck
            .wait(&WaitPolicy {
                poll_interval: Duration::from_millis(1),
                timeout: Duration::from_millis(10),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::OperationTimedOut { .. }));
        assert_eq!(mock.count(MockOp::CreateResourceGroup), 2);
    }

    #[tokio::test]
    async fn listing_by_group_filters() {
        let mock = MockProvider::new();
        with_group(&mock).await;
        mock.create_or_update_virtual_machine("rg", "vm", &vm_spec(None))
            .await
            .unwrap()
            .wait(&fast())
            .await
            .unwrap();
        let in_group: Vec<_> = mock
            .list_virtual_machines(ListScope::ResourceGroup("rg".to_string()))
            .try_collect()
            .await
            .unwrap();
        assert_eq!(in_group.len(), 1);
        let missing: Result<Vec<_>, _> = mock
            .list_virtual_machines(ListScope::ResourceGroup("other".to_string()))
            .try_collect()
            .await;
        assert!(missing.is_err());
    }
}
