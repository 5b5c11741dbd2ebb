use azvm_common::{CloudError, ImageFlavor, NetworkInterfaceRef, ResourceKind, StorageAccount};
use azvm_providers::ResourceManager;
use tracing::info;

use crate::context::RunContext;
use crate::disk_manager::{DiskManager, DATA_DISK_LUN, DATA_DISK_SIZE_GB, OS_DISK_GROWTH_GB};
use crate::logger::ActionLog;
use crate::network_stack::NetworkStack;
use crate::resource_group::{CleanupOutcome, ResourceGroupGuard};
use crate::state_machine::{RunState, RunStateMachine, StepFailure};
use crate::vm_lifecycle::{sample_tags, VirtualMachineLifecycle};

/// Outcome of one run, produced whether or not the run succeeded.
#[derive(Debug)]
pub struct RunReport {
    pub group: String,
    pub final_state: RunState,
    pub history: Vec<RunState>,
    pub failure: Option<StepFailure>,
    pub cleanup: CleanupOutcome,
    pub actions: Vec<ActionLog>,
    pub network_interface: Option<NetworkInterfaceRef>,
    pub vms_in_subscription: Vec<String>,
    pub vms_in_group: Vec<String>,
}

#[derive(Debug, Default)]
struct RunOutputs {
    network_interface: Option<NetworkInterfaceRef>,
    vms_in_subscription: Vec<String>,
    vms_in_group: Vec<String>,
}

impl RunReport {
    fn new(
        ctx: &RunContext,
        machine: RunStateMachine,
        failure: Option<StepFailure>,
        cleanup: CleanupOutcome,
        outputs: RunOutputs,
    ) -> Self {
        Self {
            group: ctx.names.group.clone(),
            final_state: machine.current(),
            history: machine.history().to_vec(),
            failure,
            cleanup,
            actions: machine.into_actions(),
            network_interface: outputs.network_interface,
            vms_in_subscription: outputs.vms_in_subscription,
            vms_in_group: outputs.vms_in_group,
        }
    }

    /// Every step completed and the group is gone.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none() && self.cleanup.is_deleted()
    }

    /// Failure summary (if any) followed by the cleanup line, which is
    /// always printed.
    pub fn print(&self) {
        match &self.failure {
            None => println!("\nAll example operations completed successfully!"),
            Some(failure) => println!("\n❌ Run stopped at {}: {}", failure.step, failure),
        }

        println!("\nDelete Resource Group");
        match &self.cleanup {
            CleanupOutcome::Deleted => println!("Deleted: {}", self.group),
            CleanupOutcome::Failed(e) => {
                println!("Cleanup attempted for {} but failed: {}", self.group, e)
            }
            CleanupOutcome::NotAttempted => {
                println!("Cleanup not needed: {} was never created", self.group)
            }
        }

        for action in &self.actions {
            info!(
                "[pipeline] {} - {} ({}ms)",
                action.action,
                action.status.as_str(),
                action.duration_ms
            );
        }
        let total_ms: u128 = self.actions.iter().map(|a| a.duration_ms).sum();
        info!(
            "[pipeline] {} action(s) in {}ms, final state {}",
            self.actions.len(),
            total_ms,
            self.final_state
        );
    }
}

/// Drive one full run. The resource group is deleted on every path once it
/// has been submitted, including when a step panics (the panic is re-raised
/// after cleanup).
pub async fn run(provider: &dyn ResourceManager, ctx: &RunContext) -> RunReport {
    info!(
        "🚀 [pipeline] starting run in {} with provider {}",
        ctx.names.group,
        provider.name()
    );
    let mut machine = RunStateMachine::new();

    let mut acquire_cleanup = CleanupOutcome::NotAttempted;
    let acquired = machine
        .step(RunState::GroupCreated, async {
            ResourceGroupGuard::acquire(provider, ctx)
                .await
                .map_err(|failure| {
                    acquire_cleanup = failure.cleanup;
                    failure.error
                })
        })
        .await;
    let guard = match acquired {
        Ok(guard) => {
            info!("✅ [pipeline] resource group {} acquired", guard.name());
            guard
        }
        Err(failure) => {
            return RunReport::new(ctx, machine, Some(failure), acquire_cleanup, RunOutputs::default())
        }
    };

    let mut outputs = RunOutputs::default();
    let (result, cleanup) = guard
        .scope(run_steps(provider, ctx, &mut machine, &mut outputs))
        .await;
    RunReport::new(ctx, machine, result.err(), cleanup, outputs)
}

async fn run_steps(
    provider: &dyn ResourceManager,
    ctx: &RunContext,
    machine: &mut RunStateMachine,
    outputs: &mut RunOutputs,
) -> Result<(), StepFailure> {
    let network = NetworkStack::new(provider, ctx);
    let vms = VirtualMachineLifecycle::new(provider, ctx);
    let disks = DiskManager::new(provider, ctx);
    let names = &ctx.names;

    machine
        .step(RunState::StorageAccountCreated, create_storage_account(provider, ctx))
        .await?;

    let nic = machine
        .step(RunState::NetworkReady, network.create_network_interface())
        .await?;
    outputs.network_interface = Some(nic.clone());

    machine
        .step(RunState::VmCreated, vms.create(&nic, ImageFlavor::Linux))
        .await?;
    machine
        .step(RunState::VmTagged, vms.update_tags(&sample_tags()))
        .await?;

    let data_disk = machine
        .step(
            RunState::DataDiskCreated,
            disks.create_empty(&names.data_disk, DATA_DISK_SIZE_GB),
        )
        .await?;
    let mut vm = machine.step(RunState::VmFetched, vms.get()).await?;
    machine
        .step(
            RunState::DataDiskAttached,
            disks.attach(&mut vm, &data_disk, DATA_DISK_LUN),
        )
        .await?;
    machine
        .step(RunState::DataDiskDetached, disks.detach(&mut vm, &names.data_disk))
        .await?;

    machine.step(RunState::VmDeallocated, vms.deallocate()).await?;
    let os_disk = vm
        .os_disk_name()
        .map(str::to_string)
        .unwrap_or_else(|| names.os_disk.clone());
    machine
        .step(RunState::OsDiskResized, disks.resize(&os_disk, OS_DISK_GROWTH_GB))
        .await?;

    machine.step(RunState::VmStarted, vms.start()).await?;
    machine.step(RunState::VmRestarted, vms.restart()).await?;
    machine.step(RunState::VmStopped, vms.power_off()).await?;

    let (in_subscription, in_group) = machine
        .step(RunState::VmsListed, async {
            let all = vms.list_all().await?;
            let in_group = vms.list_in_group().await?;
            Ok::<_, CloudError>((all, in_group))
        })
        .await?;
    println!("\nList VMs in subscription");
    for name in &in_subscription {
        println!("\tVM: {}", name);
    }
    println!("\nList VMs in resource group");
    for name in &in_group {
        println!("\tVM: {}", name);
    }
    outputs.vms_in_subscription = in_subscription;
    outputs.vms_in_group = in_group;

    machine.step(RunState::VmDeleted, vms.delete()).await?;

    // Same NIC: the deleted VM released it.
    machine
        .step(RunState::WindowsVmCreated, vms.create(&nic, ImageFlavor::Windows))
        .await?;

    machine
        .advance(RunState::Done)
        .map_err(|e| machine.fail(RunState::Done, e))
}

async fn create_storage_account(
    provider: &dyn ResourceManager,
    ctx: &RunContext,
) -> Result<StorageAccount, CloudError> {
    let name = ctx.names.storage_account.as_str();
    info!("🔵 [storage] creating storage account {}", name);
    let op = provider
        .create_storage_account(
            &ctx.names.group,
            name,
            &StorageAccount::standard_lrs(&ctx.location),
        )
        .await
        .map_err(|e| e.creation_failed(ResourceKind::StorageAccount, name))?;
    op.wait(&ctx.wait)
        .await
        .map_err(|e| e.creation_failed(ResourceKind::StorageAccount, name))
}
