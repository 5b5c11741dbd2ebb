use async_trait::async_trait;
use azvm_common::{
    CloudError, Disk, NetworkInterface, ResourceGroup, StorageAccount, Subnet, Tags,
    VirtualMachine, VirtualNetwork,
};
use futures_util::stream::BoxStream;

pub mod operation;

pub use operation::{OperationPoller, PendingOperation, PollStatus};

/// Lazy sequence of resources; pages are fetched as the stream is consumed.
pub type ResourceStream<'a, T> = BoxStream<'a, Result<T, CloudError>>;

/// Scope of a VM listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListScope {
    Subscription,
    ResourceGroup(String),
}

/// Abstract cloud resource-management client.
///
/// Every mutating call returns a [`PendingOperation`] that must be awaited to
/// a terminal state before a dependent call is issued. Retry of transient
/// transport failures is the implementation's business; service rejections
/// are returned as-is.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Short provider name, used in logs.
    fn name(&self) -> &'static str;

    fn subscription_id(&self) -> &str;

    // Resource groups
    async fn create_or_update_resource_group(
        &self,
        name: &str,
        group: &ResourceGroup,
    ) -> Result<PendingOperation<ResourceGroup>, CloudError>;

    /// Deletes the group and, transitively, everything in it.
    async fn delete_resource_group(&self, name: &str) -> Result<PendingOperation<()>, CloudError>;

    // Storage
    async fn create_storage_account(
        &self,
        group: &str,
        name: &str,
        account: &StorageAccount,
    ) -> Result<PendingOperation<StorageAccount>, CloudError>;

    // Network
    async fn create_or_update_virtual_network(
        &self,
        group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<PendingOperation<VirtualNetwork>, CloudError>;

    async fn create_or_update_subnet(
        &self,
        group: &str,
        network: &str,
        name: &str,
        subnet: &Subnet,
    ) -> Result<PendingOperation<Subnet>, CloudError>;

    async fn create_or_update_network_interface(
        &self,
        group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<PendingOperation<NetworkInterface>, CloudError>;

    // Virtual machines
    async fn create_or_update_virtual_machine(
        &self,
        group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<PendingOperation<VirtualMachine>, CloudError>;

    /// Partial update: the provider merges `tags` into the existing VM.
    async fn update_virtual_machine_tags(
        &self,
        group: &str,
        name: &str,
        location: &str,
        tags: &Tags,
    ) -> Result<PendingOperation<VirtualMachine>, CloudError>;

    async fn get_virtual_machine(&self, group: &str, name: &str)
        -> Result<VirtualMachine, CloudError>;

    async fn deallocate_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError>;

    async fn start_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError>;

    async fn restart_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError>;

    async fn power_off_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError>;

    async fn delete_virtual_machine(
        &self,
        group: &str,
        name: &str,
    ) -> Result<PendingOperation<()>, CloudError>;

    fn list_virtual_machines(&self, scope: ListScope) -> ResourceStream<'_, VirtualMachine>;

    // Managed disks
    async fn create_or_update_disk(
        &self,
        group: &str,
        name: &str,
        disk: &Disk,
    ) -> Result<PendingOperation<Disk>, CloudError>;

    async fn get_disk(&self, group: &str, name: &str) -> Result<Disk, CloudError>;
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "azure")]
pub mod azure;
