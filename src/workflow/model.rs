//! Workflow Data Model
//!
//! Instance specifications and the workflow file that carries them.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: build-image
//! project: my-project
//! zone: us-central1-a
//! logs_path: logs/build-image
//! resources:
//!   disks:
//!     boot-disk: projects/my-project/zones/us-central1-a/disks/boot-disk
//! steps:
//!   - name: create-builder
//!     create_instances:
//!       - name: builder
//!         machineType: n1-standard-2
//!         disks:
//!           - source: boot-disk
//! ```

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::execution::create_instances::CreateInstances;

/// Default directory (inside the object store) for serial console logs.
fn default_logs_path() -> String {
    "logs".to_string()
}

/// Default serial console port streamed for every instance.
fn default_serial_port() -> u32 {
    1
}

/// Default polling interval for serial console output, in seconds.
fn default_serial_interval_secs() -> u64 {
    3
}

/// Runtime status of an instance within one step invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceState {
    #[default]
    NotCreated,
    Creating,
    Created,
    Failed,
}

/// A compute instance to be created.
///
/// Field names follow the provider's API payload so the specification
/// can be passed through unchanged.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub name: String,

    /// Owning project (defaults to the workflow project)
    #[serde(default)]
    pub project: String,

    /// Zone (defaults to the workflow zone)
    #[serde(default)]
    pub zone: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub machine_type: String,

    #[serde(default)]
    pub disks: Vec<AttachedDisk>,

    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,

    #[serde(default)]
    pub service_accounts: Vec<ServiceAccount>,

    /// OAuth scopes for the default service account
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(skip)]
    pub state: InstanceState,
}

/// A disk attached to an instance.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttachedDisk {
    /// Short registry name or full link of an existing disk
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    #[serde(default)]
    pub boot: bool,

    #[serde(default)]
    pub auto_delete: bool,

    /// Parameters for creating the disk together with the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialize_params: Option<InitializeParams>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Short registry name or full link of the source image
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_image: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub disk_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub network: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnetwork: String,

    #[serde(default)]
    pub access_configs: Vec<AccessConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccessConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl AccessConfig {
    /// External NAT access, the provider's default for new interfaces.
    pub fn external_nat() -> Self {
        Self {
            name: "External NAT".to_string(),
            kind: "ONE_TO_ONE_NAT".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceAccount {
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Instance {
    /// Creates an instance specification with only a name set.
    ///
    /// # Example
    ///
    /// ```
    /// use cloudrunner::workflow::{AttachedDisk, Instance};
    ///
    /// let instance = Instance::new("builder")
    ///     .with_machine_type("n1-standard-2")
    ///     .with_disk(AttachedDisk::from_source("boot-disk"));
    /// assert_eq!(instance.disks.len(), 1);
    /// ```
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    pub fn with_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_type = machine_type.into();
        self
    }

    pub fn with_disk(mut self, disk: AttachedDisk) -> Self {
        self.disks.push(disk);
        self
    }

    pub fn with_network_interface(mut self, interface: NetworkInterface) -> Self {
        self.network_interfaces.push(interface);
        self
    }

    /// Fully-qualified link of this instance.
    pub fn link(&self) -> String {
        format!(
            "projects/{}/zones/{}/instances/{}",
            self.project, self.zone, self.name
        )
    }
}

impl AttachedDisk {
    /// Attaches an existing disk by name or link.
    pub fn from_source(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Creates a new disk from an image together with the instance.
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            initialize_params: Some(InitializeParams {
                source_image: image.into(),
                ..InitializeParams::default()
            }),
            ..Self::default()
        }
    }
}

impl NetworkInterface {
    pub fn on_network(network: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            ..Self::default()
        }
    }

    pub fn with_subnetwork(mut self, subnetwork: impl Into<String>) -> Self {
        self.subnetwork = subnetwork.into();
        self
    }
}

/// Short-name to link mappings used to seed the resource registries.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ResourceLinks {
    #[serde(default)]
    pub disks: HashMap<String, String>,
    #[serde(default)]
    pub images: HashMap<String, String>,
    #[serde(default)]
    pub networks: HashMap<String, String>,
    #[serde(default)]
    pub subnetworks: HashMap<String, String>,
}

/// A named step in the workflow file.
#[derive(Deserialize, Debug)]
pub struct StepDefinition {
    pub name: String,
    pub create_instances: CreateInstances,
}

/// A complete workflow definition as loaded from YAML.
#[derive(Deserialize, Debug)]
pub struct WorkflowFile {
    pub name: String,

    #[serde(default)]
    pub project: String,

    #[serde(default)]
    pub zone: String,

    /// Object store prefix for serial console logs
    #[serde(default = "default_logs_path")]
    pub logs_path: String,

    #[serde(default = "default_serial_port")]
    pub serial_port: u32,

    #[serde(default = "default_serial_interval_secs")]
    pub serial_interval_secs: u64,

    #[serde(default)]
    pub resources: ResourceLinks,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl WorkflowFile {
    pub fn serial_interval(&self) -> Duration {
        Duration::from_secs(self.serial_interval_secs)
    }

    /// Total number of instances across all steps.
    pub fn instance_count(&self) -> usize {
        self.steps
            .iter()
            .map(|step| step.create_instances.len())
            .sum()
    }
}
