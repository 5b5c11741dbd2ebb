use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub mod error;
pub mod settings;

pub use error::CloudError;

pub type Tags = BTreeMap<String, String>;

/// Fields this crate does not model. Kept so a fetched resource can be
/// re-submitted whole.
pub type Extra = Map<String, Value>;

// --- Identity ---

/// A resource addressed by (resource group, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    pub resource_group: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// ARM id of this resource for the given kind.
    pub fn arm_id(&self, subscription_id: &str, kind: ResourceKind) -> String {
        format!(
            "{}/providers/{}/{}",
            resource_group_id(subscription_id, &self.resource_group),
            kind.provider_type(),
            self.name
        )
    }
}

pub fn resource_group_id(subscription_id: &str, resource_group: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}",
        subscription_id, resource_group
    )
}

/// Last path segment of an ARM id (the resource name).
pub fn name_from_id(id: &str) -> &str {
    id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ResourceGroup,
    StorageAccount,
    VirtualNetwork,
    Subnet,
    NetworkInterface,
    VirtualMachine,
    Disk,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "resource group",
            ResourceKind::StorageAccount => "storage account",
            ResourceKind::VirtualNetwork => "virtual network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::NetworkInterface => "network interface",
            ResourceKind::VirtualMachine => "virtual machine",
            ResourceKind::Disk => "disk",
        }
    }

    /// `{namespace}/{type}` segment used in ARM ids. Subnets are nested
    /// under their network and are not addressed through this helper.
    pub fn provider_type(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "Microsoft.Resources/resourceGroups",
            ResourceKind::StorageAccount => "Microsoft.Storage/storageAccounts",
            ResourceKind::VirtualNetwork => "Microsoft.Network/virtualNetworks",
            ResourceKind::Subnet => "Microsoft.Network/virtualNetworks/subnets",
            ResourceKind::NetworkInterface => "Microsoft.Network/networkInterfaces",
            ResourceKind::VirtualMachine => "Microsoft.Compute/virtualMachines",
            ResourceKind::Disk => "Microsoft.Compute/disks",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an ARM sub-resource by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    pub id: String,
    #[serde(flatten)]
    pub extra: Extra,
}

impl SubResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            extra: Extra::new(),
        }
    }
}

// --- Resource group / storage ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing)]
    pub name: Option<String>,
    pub location: String,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
}

impl ResourceGroup {
    pub fn in_location(location: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            location: location.into(),
            tags: Tags::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sku {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccount {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing)]
    pub name: Option<String>,
    pub location: String,
    pub sku: Sku,
    pub kind: String,
}

impl StorageAccount {
    pub fn standard_lrs(location: impl Into<String>) -> Self {
        Self {
            id: None,
            name: None,
            location: location.into(),
            sku: Sku {
                name: "Standard_LRS".to_string(),
            },
            kind: "Storage".to_string(),
        }
    }
}

// --- Network ---

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpace {
    #[serde(default)]
    pub address_prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkProperties {
    #[serde(default)]
    pub address_space: AddressSpace,
    #[serde(default, skip_serializing)]
    pub provisioning_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetwork {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing)]
    pub name: Option<String>,
    pub location: String,
    #[serde(default)]
    pub properties: VirtualNetworkProperties,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetProperties {
    pub address_prefix: String,
    #[serde(default, skip_serializing)]
    pub provisioning_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: SubnetProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    pub subnet: SubResource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    pub name: String,
    pub properties: IpConfigurationProperties,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceProperties {
    #[serde(default)]
    pub ip_configurations: Vec<IpConfiguration>,
    #[serde(default, skip_serializing)]
    pub provisioning_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing)]
    pub name: Option<String>,
    pub location: String,
    #[serde(default)]
    pub properties: NetworkInterfaceProperties,
}

/// Opaque handle to a created network interface, consumed by VM creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkInterfaceRef(pub String);

impl NetworkInterfaceRef {
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NetworkInterfaceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// --- Compute ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

/// OS images this program knows how to boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFlavor {
    Linux,
    Windows,
}

impl ImageFlavor {
    pub fn reference(&self) -> VmImageReference {
        let (publisher, offer, sku) = match self {
            ImageFlavor::Linux => ("Canonical", "UbuntuServer", "16.04-LTS"),
            ImageFlavor::Windows => ("MicrosoftWindowsServer", "WindowsServer", "2016-Datacenter"),
        };
        VmImageReference {
            publisher: publisher.to_string(),
            offer: offer.to_string(),
            sku: sku.to_string(),
            version: "latest".to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFlavor::Linux => "linux",
            ImageFlavor::Windows => "windows",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiskCreateOption {
    Empty,
    Attach,
    FromImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    pub vm_size: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDisk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub create_option: DiskCreateOption,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<u32>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDisk {
    pub lun: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub create_option: DiskCreateOption,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_disk: Option<SubResource>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_reference: Option<VmImageReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_disk: Option<OsDisk>,
    #[serde(default)]
    pub data_disks: Vec<DataDisk>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    pub computer_name: String,
    pub admin_username: String,
    // Never returned by the service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl std::fmt::Debug for OsProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OsProfile")
            .field("computer_name", &self.computer_name)
            .field("admin_username", &self.admin_username)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    #[serde(default)]
    pub network_interfaces: Vec<SubResource>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_profile: Option<HardwareProfile>,
    #[serde(default)]
    pub storage_profile: StorageProfile,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_profile: Option<OsProfile>,
    #[serde(default)]
    pub network_profile: NetworkProfile,
    #[serde(default, skip_serializing)]
    pub provisioning_state: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Full VM aggregate. The service has no incremental patch for the disk
/// list, so the whole object is the unit of update.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachine {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing)]
    pub name: Option<String>,
    pub location: String,
    #[serde(default, skip_serializing_if = "Tags::is_empty")]
    pub tags: Tags,
    #[serde(default)]
    pub properties: VirtualMachineProperties,
    #[serde(flatten)]
    pub extra: Extra,
}

impl VirtualMachine {
    pub fn data_disks(&self) -> &[DataDisk] {
        &self.properties.storage_profile.data_disks
    }

    pub fn data_disks_mut(&mut self) -> &mut Vec<DataDisk> {
        &mut self.properties.storage_profile.data_disks
    }

    pub fn os_disk_name(&self) -> Option<&str> {
        self.properties
            .storage_profile
            .os_disk
            .as_ref()
            .and_then(|d| d.name.as_deref())
    }

    pub fn network_interface_ids(&self) -> impl Iterator<Item = &str> {
        self.properties
            .network_profile
            .network_interfaces
            .iter()
            .map(|n| n.id.as_str())
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationData {
    pub create_option: DiskCreateOption,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskProperties {
    // Some stacks omit this field on read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<u32>,
    pub creation_data: CreationData,
    #[serde(default, skip_serializing)]
    pub disk_state: Option<String>,
    #[serde(default, skip_serializing)]
    pub provisioning_state: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Managed disk. Its lifecycle is independent of any VM it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing)]
    pub name: Option<String>,
    pub location: String,
    pub properties: DiskProperties,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Disk {
    pub fn empty(location: impl Into<String>, size_gb: u32) -> Self {
        Self {
            id: None,
            name: None,
            location: location.into(),
            properties: DiskProperties {
                disk_size_gb: Some(size_gb),
                creation_data: CreationData {
                    create_option: DiskCreateOption::Empty,
                    extra: Extra::new(),
                },
                disk_state: None,
                provisioning_state: None,
                extra: Extra::new(),
            },
            extra: Extra::new(),
        }
    }

    pub fn size_gb(&self) -> Option<u32> {
        self.properties.disk_size_gb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_ids_follow_provider_layout() {
        let ident = ResourceIdentity::new("rg1", "vm1");
        assert_eq!(
            ident.arm_id("sub", ResourceKind::VirtualMachine),
            "/subscriptions/sub/resourceGroups/rg1/providers/Microsoft.Compute/virtualMachines/vm1"
        );
        assert_eq!(name_from_id("/a/b/c/mydisk"), "mydisk");
        assert_eq!(name_from_id("plain"), "plain");
    }

    #[test]
    fn image_references_are_fixed() {
        let linux = ImageFlavor::Linux.reference();
        assert_eq!(linux.publisher, "Canonical");
        assert_eq!(linux.sku, "16.04-LTS");
        let windows = ImageFlavor::Windows.reference();
        assert_eq!(windows.offer, "WindowsServer");
        assert_eq!(windows.version, "latest");
    }

    #[test]
    fn vm_serializes_in_arm_shape_without_read_only_fields() {
        let vm = VirtualMachine {
            id: Some("/subscriptions/s/x".to_string()),
            name: Some("vm".to_string()),
            location: "westus".to_string(),
            tags: Tags::new(),
            properties: VirtualMachineProperties {
                storage_profile: StorageProfile {
                    data_disks: vec![DataDisk {
                        lun: 12,
                        name: Some("d1".to_string()),
                        create_option: DiskCreateOption::Attach,
                        managed_disk: Some(SubResource::new("disk-id")),
                        extra: Extra::new(),
                    }],
                    ..Default::default()
                },
                provisioning_state: Some("Succeeded".to_string()),
                ..Default::default()
            },
            extra: Extra::new(),
        };
        let json = serde_json::to_value(&vm).unwrap();
        assert!(json.get("id").is_none());
        assert!(json.get("tags").is_none());
        assert!(json["properties"].get("provisioningState").is_none());
        let disk = &json["properties"]["storageProfile"]["dataDisks"][0];
        assert_eq!(disk["createOption"], "Attach");
        assert_eq!(disk["managedDisk"]["id"], "disk-id");
    }

    #[test]
    fn disk_without_size_deserializes() {
        let disk: Disk = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/g/providers/Microsoft.Compute/disks/os",
            "name": "os",
            "location": "local",
            "properties": { "creationData": { "createOption": "FromImage" }, "provisioningState": "Succeeded" }
        }))
        .unwrap();
        assert_eq!(disk.size_gb(), None);
        assert_eq!(disk.properties.creation_data.create_option, DiskCreateOption::FromImage);
    }

    #[test]
    fn os_profile_debug_hides_password() {
        let profile = OsProfile {
            computer_name: "vm".to_string(),
            admin_username: "userlogin".to_string(),
            admin_password: Some("hunter2".to_string()),
            extra: Extra::new(),
        };
        assert!(!format!("{:?}", profile).contains("hunter2"));
    }

    #[test]
    fn fetched_disk_is_resubmitted_whole() {
        let fetched = serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/g/providers/Microsoft.Compute/disks/os",
            "name": "os",
            "location": "westus",
            "sku": { "name": "Premium_LRS", "tier": "Premium" },
            "zones": ["1"],
            "properties": {
                "osType": "Linux",
                "hyperVGeneration": "V1",
                "diskSizeGB": 30,
                "creationData": {
                    "createOption": "FromImage",
                    "imageReference": { "id": "/Subscriptions/s/Providers/Microsoft.Compute/Locations/westus/Publishers/Canonical/ArtifactTypes/VMImage/Offers/UbuntuServer/Skus/16.04-LTS/Versions/16.04.202109280" }
                },
                "provisioningState": "Succeeded",
                "diskState": "Reserved"
            }
        });
        let mut disk: Disk = serde_json::from_value(fetched.clone()).unwrap();
        disk.properties.disk_size_gb = Some(40);

        let body = serde_json::to_value(&disk).unwrap();
        assert_eq!(body["sku"], fetched["sku"]);
        assert_eq!(body["zones"], fetched["zones"]);
        assert_eq!(body["properties"]["osType"], "Linux");
        assert_eq!(body["properties"]["hyperVGeneration"], "V1");
        assert_eq!(
            body["properties"]["creationData"]["imageReference"],
            fetched["properties"]["creationData"]["imageReference"]
        );
        assert_eq!(body["properties"]["diskSizeGB"], 40);
        assert!(body.get("id").is_none());
        assert!(body["properties"].get("provisioningState").is_none());
    }

    #[test]
    fn fetched_vm_is_resubmitted_whole() {
        let fetched = serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/g/providers/Microsoft.Compute/virtualMachines/vm",
            "name": "vm",
            "location": "westus",
            "properties": {
                "vmId": "0d9e2b6a-0000-0000-0000-000000000000",
                "hardwareProfile": { "vmSize": "Standard_DS1_v2" },
                "storageProfile": {
                    "imageReference": { "publisher": "Canonical", "offer": "UbuntuServer", "sku": "16.04-LTS", "version": "latest" },
                    "osDisk": {
                        "osType": "Linux",
                        "name": "os",
                        "createOption": "FromImage",
                        "caching": "ReadWrite",
                        "managedDisk": { "id": "os-id", "storageAccountType": "Premium_LRS" },
                        "diskSizeGB": 30
                    },
                    "dataDisks": []
                },
                "osProfile": {
                    "computerName": "vm",
                    "adminUsername": "userlogin",
                    "linuxConfiguration": { "disablePasswordAuthentication": false },
                    "secrets": []
                },
                "networkProfile": {
                    "networkInterfaces": [{ "id": "nic-id", "properties": { "primary": true } }]
                },
                "diagnosticsProfile": { "bootDiagnostics": { "enabled": false } },
                "provisioningState": "Succeeded"
            }
        });
        let mut vm: VirtualMachine = serde_json::from_value(fetched.clone()).unwrap();
        vm.data_disks_mut().push(DataDisk {
            lun: 12,
            name: Some("d1".to_string()),
            create_option: DiskCreateOption::Attach,
            managed_disk: Some(SubResource::new("d1-id")),
            extra: Extra::new(),
        });

        let body = serde_json::to_value(&vm).unwrap();
        let fetched_props = &fetched["properties"];
        let props = &body["properties"];
        let os_disk = &props["storageProfile"]["osDisk"];
        assert_eq!(os_disk["caching"], "ReadWrite");
        assert_eq!(os_disk["osType"], "Linux");
        assert_eq!(os_disk["managedDisk"]["storageAccountType"], "Premium_LRS");
        assert_eq!(props["osProfile"]["linuxConfiguration"], fetched_props["osProfile"]["linuxConfiguration"]);
        assert_eq!(props["diagnosticsProfile"], fetched_props["diagnosticsProfile"]);
        assert_eq!(props["networkProfile"]["networkInterfaces"][0]["properties"]["primary"], true);
        assert_eq!(props["storageProfile"]["dataDisks"][0]["lun"], 12);
        assert!(props.get("provisioningState").is_none());
    }
}
