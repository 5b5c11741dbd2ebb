use azvm_common::{
    AddressSpace, CloudError, IpConfiguration, IpConfigurationProperties, NetworkInterface,
    NetworkInterfaceProperties, NetworkInterfaceRef, ResourceKind, SubResource, Subnet,
    SubnetProperties, VirtualNetwork, VirtualNetworkProperties,
};
use azvm_providers::ResourceManager;
use tracing::info;

use crate::context::RunContext;

pub const VNET_ADDRESS_PREFIX: &str = "10.0.0.0/16";
pub const SUBNET_ADDRESS_PREFIX: &str = "10.0.0.0/24";

/// Builds vnet -> subnet -> NIC, strictly in that order.
pub struct NetworkStack<'a> {
    provider: &'a dyn ResourceManager,
    ctx: &'a RunContext,
}

impl<'a> NetworkStack<'a> {
    pub fn new(provider: &'a dyn ResourceManager, ctx: &'a RunContext) -> Self {
        Self { provider, ctx }
    }

    /// Create the network chain and return the NIC a VM can bind to.
    ///
    /// The first failure aborts with `ResourceCreationFailed` for the
    /// resource being created; nothing already created is rolled back here.
    pub async fn create_network_interface(&self) -> Result<NetworkInterfaceRef, CloudError> {
        let names = &self.ctx.names;

        self.create_virtual_network()
            .await
            .map_err(|e| e.creation_failed(ResourceKind::VirtualNetwork, names.vnet.as_str()))?;

        let subnet_id = self
            .create_subnet()
            .await
            .map_err(|e| e.creation_failed(ResourceKind::Subnet, names.subnet.as_str()))?;

        let nic = self
            .create_nic(subnet_id)
            .await
            .map_err(|e| e.creation_failed(ResourceKind::NetworkInterface, names.nic.as_str()))?;

        info!("✅ [network] network interface ready: {}", nic);
        Ok(nic)
    }

    async fn create_virtual_network(&self) -> Result<VirtualNetwork, CloudError> {
        let names = &self.ctx.names;
        info!("🔵 [network] creating vnet {}", names.vnet);
        let params = VirtualNetwork {
            id: None,
            name: None,
            location: self.ctx.location.clone(),
            properties: VirtualNetworkProperties {
                address_space: AddressSpace {
                    address_prefixes: vec![VNET_ADDRESS_PREFIX.to_string()],
                },
                provisioning_state: None,
            },
        };
        self.provider
            .create_or_update_virtual_network(&names.group, &names.vnet, &params)
            .await?
            .wait(&self.ctx.wait)
            .await
    }

    async fn create_subnet(&self) -> Result<String, CloudError> {
        let names = &self.ctx.names;
        info!("🔵 [network] creating subnet {}", names.subnet);
        let params = Subnet {
            id: None,
            name: None,
            properties: SubnetProperties {
                address_prefix: SUBNET_ADDRESS_PREFIX.to_string(),
                provisioning_state: None,
            },
        };
        let subnet = self
            .provider
            .create_or_update_subnet(&names.group, &names.vnet, &names.subnet, &params)
            .await?
            .wait(&self.ctx.wait)
            .await?;
        subnet
            .id
            .ok_or_else(|| CloudError::Decode(format!("subnet {} has no id", names.subnet)))
    }

    async fn create_nic(&self, subnet_id: String) -> Result<NetworkInterfaceRef, CloudError> {
        let names = &self.ctx.names;
        info!("🔵 [network] creating nic {}", names.nic);
        let params = NetworkInterface {
            id: None,
            name: None,
            location: self.ctx.location.clone(),
            properties: NetworkInterfaceProperties {
                ip_configurations: vec![IpConfiguration {
                    name: names.ip_config.clone(),
                    properties: IpConfigurationProperties {
                        subnet: SubResource::new(subnet_id),
                    },
                }],
                provisioning_state: None,
            },
        };
        let nic = self
            .provider
            .create_or_update_network_interface(&names.group, &names.nic, &params)
            .await?
            .wait(&self.ctx.wait)
            .await?;
        nic.id
            .map(NetworkInterfaceRef)
            .ok_or_else(|| CloudError::Decode(format!("network interface {} has no id", names.nic)))
    }
}
