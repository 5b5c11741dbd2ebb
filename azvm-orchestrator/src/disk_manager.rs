use azvm_common::{
    CloudError, DataDisk, Disk, DiskCreateOption, Extra, ResourceKind, SubResource, VirtualMachine,
};
use azvm_providers::ResourceManager;
use tracing::{info, warn};

use crate::context::RunContext;
use crate::vm_lifecycle::VirtualMachineLifecycle;

/// Size assumed when the service omits a disk's size. This is a quirk of
/// some hybrid stacks rather than a property of the disk.
pub const ASSUMED_DISK_SIZE_GB: u32 = 30;

pub const DATA_DISK_SIZE_GB: u32 = 1;
pub const DATA_DISK_LUN: i32 = 12;
pub const OS_DISK_GROWTH_GB: u32 = 10;

/// New size after growing a disk whose reported size may be missing.
/// Zero counts as missing.
pub fn resized_size_gb(reported: Option<u32>, delta_gb: u32) -> u32 {
    let base = match reported {
        Some(size) if size > 0 => size,
        _ => ASSUMED_DISK_SIZE_GB,
    };
    base.saturating_add(delta_gb)
}

/// Append `disk` to the VM's data disks at `lun`.
pub fn attach_data_disk(vm: &mut VirtualMachine, disk: &Disk, lun: i32) -> Result<(), CloudError> {
    let name = disk
        .name
        .clone()
        .ok_or_else(|| CloudError::Decode("disk has no name".to_string()))?;
    let id = disk
        .id
        .clone()
        .ok_or_else(|| CloudError::Decode(format!("disk {} has no id", name)))?;

    if vm.data_disks().iter().any(|d| d.lun == lun) {
        return Err(CloudError::rejected(
            format!("attach disk {}", name),
            format!("lun {} is already in use on {}", lun, vm.display_name()),
        ));
    }
    if vm.data_disks().iter().any(|d| d.name.as_deref() == Some(name.as_str())) {
        return Err(CloudError::rejected(
            format!("attach disk {}", name),
            format!("{} is already attached to {}", name, vm.display_name()),
        ));
    }

    vm.data_disks_mut().push(DataDisk {
        lun,
        name: Some(name),
        create_option: DiskCreateOption::Attach,
        managed_disk: Some(SubResource::new(id)),
        extra: Extra::new(),
    });
    Ok(())
}

/// Remove every data disk named `name`; returns how many were removed.
pub fn detach_data_disk(vm: &mut VirtualMachine, name: &str) -> usize {
    let disks = vm.data_disks_mut();
    let before = disks.len();
    disks.retain(|d| d.name.as_deref() != Some(name));
    before - disks.len()
}

pub struct DiskManager<'a> {
    provider: &'a dyn ResourceManager,
    ctx: &'a RunContext,
    vms: VirtualMachineLifecycle<'a>,
}

impl<'a> DiskManager<'a> {
    pub fn new(provider: &'a dyn ResourceManager, ctx: &'a RunContext) -> Self {
        Self {
            provider,
            ctx,
            vms: VirtualMachineLifecycle::new(provider, ctx),
        }
    }

    pub async fn create_empty(&self, name: &str, size_gb: u32) -> Result<Disk, CloudError> {
        info!("🔵 [disk] creating empty {} GB disk {}", size_gb, name);
        let disk = self
            .provider
            .create_or_update_disk(&self.ctx.names.group, name, &Disk::empty(&self.ctx.location, size_gb))
            .await
            .map_err(|e| e.creation_failed(ResourceKind::Disk, name))?
            .wait(&self.ctx.wait)
            .await
            .map_err(|e| e.creation_failed(ResourceKind::Disk, name))?;
        info!("✅ [disk] {} created", name);
        Ok(disk)
    }

    /// Attach `disk` to `vm` and re-submit the VM. `vm` is updated in place
    /// so a failed submission leaves the caller with the intended body.
    pub async fn attach(
        &self,
        vm: &mut VirtualMachine,
        disk: &Disk,
        lun: i32,
    ) -> Result<VirtualMachine, CloudError> {
        attach_data_disk(vm, disk, lun)?;
        info!(
            "🔵 [disk] attaching {} to {} at lun {}",
            disk.name.as_deref().unwrap_or_default(),
            vm.display_name(),
            lun
        );
        self.vms.create_or_update(vm).await
    }

    pub async fn detach(&self, vm: &mut VirtualMachine, name: &str) -> Result<VirtualMachine, CloudError> {
        if detach_data_disk(vm, name) == 0 {
            warn!("⚠️ [disk] {} is not attached to {}", name, vm.display_name());
        }
        info!("🔵 [disk] detaching {} from {}", name, vm.display_name());
        self.vms.create_or_update(vm).await
    }

    /// Grow `name` by `delta_gb`. The disk must not be in use by a running VM.
    pub async fn resize(&self, name: &str, delta_gb: u32) -> Result<Disk, CloudError> {
        let mut disk = self.provider.get_disk(&self.ctx.names.group, name).await?;
        let reported = disk.size_gb().filter(|size| *size > 0);
        if reported.is_none() {
            warn!(
                "⚠️ [disk] size of {} not reported, assuming {} GB",
                name, ASSUMED_DISK_SIZE_GB
            );
        }
        let new_size = resized_size_gb(reported, delta_gb);
        info!("🔵 [disk] resizing {} to {} GB", name, new_size);
        disk.properties.disk_size_gb = Some(new_size);

        let resized = self
            .provider
            .create_or_update_disk(&self.ctx.names.group, name, &disk)
            .await?
            .wait(&self.ctx.wait)
            .await?;
        info!("✅ [disk] {} is now {:?} GB", name, resized.size_gb());
        Ok(resized)
    }
}
