use azvm_common::{
    CloudError, DiskCreateOption, Extra, HardwareProfile, ImageFlavor, NetworkInterfaceRef, NetworkProfile,
    OsDisk, OsProfile, ResourceKind, StorageProfile, SubResource, Tags, VirtualMachine,
    VirtualMachineProperties,
};
use azvm_providers::{ListScope, ResourceManager};
use futures_util::TryStreamExt;
use tracing::{debug, info};

use crate::context::RunContext;

/// OS disk name for a flavor. The Windows machine reuses the VM name after
/// the Linux one is deleted, but its OS disk must not collide with the
/// Linux OS disk, which outlives the VM.
pub fn os_disk_name(ctx: &RunContext, flavor: ImageFlavor) -> String {
    match flavor {
        ImageFlavor::Linux => ctx.names.os_disk.clone(),
        ImageFlavor::Windows => format!("{}-win", ctx.names.os_disk),
    }
}

/// Creation parameters for the run's VM on `nic`.
pub fn virtual_machine_parameters(
    ctx: &RunContext,
    nic: &NetworkInterfaceRef,
    flavor: ImageFlavor,
) -> VirtualMachine {
    VirtualMachine {
        id: None,
        name: None,
        location: ctx.location.clone(),
        tags: Tags::new(),
        properties: VirtualMachineProperties {
            hardware_profile: Some(HardwareProfile {
                vm_size: ctx.vm_size.clone(),
                extra: Extra::new(),
            }),
            storage_profile: StorageProfile {
                image_reference: Some(flavor.reference()),
                os_disk: Some(OsDisk {
                    name: Some(os_disk_name(ctx, flavor)),
                    create_option: DiskCreateOption::FromImage,
                    managed_disk: None,
                    disk_size_gb: None,
                    extra: Extra::new(),
                }),
                data_disks: Vec::new(),
                extra: Extra::new(),
            },
            os_profile: Some(OsProfile {
                computer_name: ctx.names.vm.clone(),
                admin_username: ctx.admin.username.clone(),
                admin_password: Some(ctx.admin.password.clone()),
                extra: Extra::new(),
            }),
            network_profile: NetworkProfile {
                network_interfaces: vec![SubResource::new(nic.id())],
                extra: Extra::new(),
            },
            provisioning_state: None,
            extra: Extra::new(),
        },
        extra: Extra::new(),
    }
}

pub fn sample_tags() -> Tags {
    Tags::from([
        ("who-rocks".to_string(), "rust".to_string()),
        ("where".to_string(), "on azure".to_string()),
    ])
}

/// Operations on the run's virtual machine. Each mutation is awaited to a
/// terminal state before returning.
pub struct VirtualMachineLifecycle<'a> {
    provider: &'a dyn ResourceManager,
    ctx: &'a RunContext,
}

impl<'a> VirtualMachineLifecycle<'a> {
    pub fn new(provider: &'a dyn ResourceManager, ctx: &'a RunContext) -> Self {
        Self { provider, ctx }
    }

    fn group(&self) -> &str {
        &self.ctx.names.group
    }

    fn vm(&self) -> &str {
        &self.ctx.names.vm
    }

    /// Submit the full VM body. The whole object is the unit of update.
    pub async fn create_or_update(&self, vm: &VirtualMachine) -> Result<VirtualMachine, CloudError> {
        debug!("🔵 [vm] submitting {}", self.vm());
        self.provider
            .create_or_update_virtual_machine(self.group(), self.vm(), vm)
            .await?
            .wait(&self.ctx.wait)
            .await
    }

    pub async fn create(
        &self,
        nic: &NetworkInterfaceRef,
        flavor: ImageFlavor,
    ) -> Result<VirtualMachine, CloudError> {
        info!("🔵 [vm] creating {} {} on {}", flavor.as_str(), self.vm(), nic);
        let params = virtual_machine_parameters(self.ctx, nic, flavor);
        let vm = self
            .create_or_update(&params)
            .await
            .map_err(|e| e.creation_failed(ResourceKind::VirtualMachine, self.vm()))?;
        info!("✅ [vm] {} created", vm.display_name());
        Ok(vm)
    }

    pub async fn update_tags(&self, tags: &Tags) -> Result<VirtualMachine, CloudError> {
        info!("🔵 [vm] tagging {} with {:?}", self.vm(), tags);
        self.provider
            .update_virtual_machine_tags(self.group(), self.vm(), &self.ctx.location, tags)
            .await?
            .wait(&self.ctx.wait)
            .await
    }

    pub async fn get(&self) -> Result<VirtualMachine, CloudError> {
        self.provider.get_virtual_machine(self.group(), self.vm()).await
    }

    pub async fn deallocate(&self) -> Result<(), CloudError> {
        info!("🔵 [vm] deallocating {}", self.vm());
        self.provider
            .deallocate_virtual_machine(self.group(), self.vm())
            .await?
            .wait(&self.ctx.wait)
            .await
    }

    pub async fn start(&self) -> Result<(), CloudError> {
        info!("🔵 [vm] starting {}", self.vm());
        self.provider
            .start_virtual_machine(self.group(), self.vm())
            .await?
            .wait(&self.ctx.wait)
            .await
    }

    pub async fn restart(&self) -> Result<(), CloudError> {
        info!("🔵 [vm] restarting {}", self.vm());
        self.provider
            .restart_virtual_machine(self.group(), self.vm())
            .await?
            .wait(&self.ctx.wait)
            .await
    }

    /// Stop without deallocating: compute stays billed.
    pub async fn power_off(&self) -> Result<(), CloudError> {
        info!("🔵 [vm] powering off {}", self.vm());
        self.provider
            .power_off_virtual_machine(self.group(), self.vm())
            .await?
            .wait(&self.ctx.wait)
            .await
    }

    /// Deletes the VM only. Its disks and NIC stay in the group.
    pub async fn delete(&self) -> Result<(), CloudError> {
        info!("🔵 [vm] deleting {}", self.vm());
        self.provider
            .delete_virtual_machine(self.group(), self.vm())
            .await?
            .wait(&self.ctx.wait)
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<String>, CloudError> {
        self.list(ListScope::Subscription).await
    }

    pub async fn list_in_group(&self) -> Result<Vec<String>, CloudError> {
        self.list(ListScope::ResourceGroup(self.group().to_string()))
            .await
    }

    async fn list(&self, scope: ListScope) -> Result<Vec<String>, CloudError> {
        let mut stream = self.provider.list_virtual_machines(scope);
        let mut names = Vec::new();
        while let Some(vm) = stream.try_next().await? {
            names.push(vm.display_name().to_string());
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network_stack::NetworkStack;
    use crate::resource_group::ResourceGroupGuard;
    use crate::test_support::fast_context;
    use azvm_providers::mock::{FailureMode, MockOp, MockProvider, PowerState};

    #[test]
    fn parameters_bind_the_nic_and_image() {
        let ctx = fast_context();
        let nic = NetworkInterfaceRef("/subscriptions/s/nic".to_string());
        let vm = virtual_machine_parameters(&ctx, &nic, ImageFlavor::Windows);
        assert_eq!(vm.network_interface_ids().collect::<Vec<_>>(), vec!["/subscriptions/s/nic"]);
        assert_eq!(
            vm.properties.storage_profile.image_reference,
            Some(ImageFlavor::Windows.reference())
        );
        assert_eq!(vm.os_disk_name(), Some(format!("{}-win", ctx.names.os_disk).as_str()));
        let profile = vm.properties.os_profile.unwrap();
        assert_eq!(profile.admin_username, "userlogin");
        assert!(profile.admin_password.is_some());
    }

    #[tokio::test]
    async fn power_cycle_follows_the_service_state() {
        let mock = MockProvider::new();
        let ctx = fast_context();
        let guard = ResourceGroupGuard::acquire(&mock, &ctx).await.unwrap();
        let nic = NetworkStack::new(&mock, &ctx)
            .create_network_interface()
            .await
            .unwrap();

        let vms = VirtualMachineLifecycle::new(&mock, &ctx);
        vms.create(&nic, ImageFlavor::Linux).await.unwrap();
        let group = ctx.names.group.as_str();
        let name = ctx.names.vm.as_str();
        assert_eq!(mock.power_state(group, name), Some(PowerState::Running));

        vms.deallocate().await.unwrap();
        assert_eq!(mock.power_state(group, name), Some(PowerState::Deallocated));
        vms.start().await.unwrap();
        vms.restart().await.unwrap();
        vms.power_off().await.unwrap();
        assert_eq!(mock.power_state(group, name), Some(PowerState::Stopped));

        assert_eq!(vms.list_in_group().await.unwrap(), vec![ctx.names.vm.clone()]);
        vms.delete().await.unwrap();
        assert_eq!(mock.power_state(group, name), None);
        assert!(vms.list_in_group().await.unwrap().is_empty());
        guard.release().await;
    }

    #[tokio::test]
    async fn tags_are_merged_into_the_vm() {
        let mock = MockProvider::new();
        let ctx = fast_context();
        let guard = ResourceGroupGuard::acquire(&mock, &ctx).await.unwrap();
        let nic = NetworkStack::new(&mock, &ctx)
            .create_network_interface()
            .await
            .unwrap();
        let vms = VirtualMachineLifecycle::new(&mock, &ctx);
        vms.create(&nic, ImageFlavor::Linux).await.unwrap();

        let tagged = vms.update_tags(&sample_tags()).await.unwrap();
        assert_eq!(tagged.tags.get("where").map(String::as_str), Some("on azure"));
        assert_eq!(vms.get().await.unwrap().tags, sample_tags());
        guard.release().await;
    }

    #[tokio::test]
    async fn rejected_creation_is_a_creation_failure() {
        let mock = MockProvider::new().fail(MockOp::CreateVirtualMachine, 1, FailureMode::Reject);
        let ctx = fast_context();
        let guard = ResourceGroupGuard::acquire(&mock, &ctx).await.unwrap();
        let nic = NetworkStack::new(&mock, &ctx)
            .create_network_interface()
            .await
            .unwrap();

        let err = VirtualMachineLifecycle::new(&mock, &ctx)
            .create(&nic, ImageFlavor::Linux)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CloudError::ResourceCreationFailed {
                kind: ResourceKind::VirtualMachine,
                ..
            }
        ));
        guard.release().await;
    }
}
