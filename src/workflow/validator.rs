//! Instance Population and Validation
//!
//! Provides the per-instance halves of the step lifecycle:
//! - Defaults for project, zone, machine type, networking and service accounts
//! - Expansion of partial provider URLs to include `projects/<project>`
//! - Precondition checks run before any instance is created

use log::debug;
use thiserror::Error;

use super::model::{AccessConfig, Instance, NetworkInterface, ServiceAccount};

/// Machine type used when an instance does not name one.
pub const DEFAULT_MACHINE_TYPE: &str = "n1-standard-1";

/// Network attached when an instance declares no interfaces.
pub const DEFAULT_NETWORK: &str = "global/networks/default";

/// Scope granted to the default service account when none are requested.
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_only"];

/// Longest instance name the provider accepts.
const MAX_NAME_LENGTH: usize = 63;

/// Precondition failures for a single instance.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("instance name {0:?} is not a valid resource name")]
    InvalidName(String),

    #[error("instance {0:?} has no project")]
    MissingProject(String),

    #[error("instance {0:?} has no zone")]
    MissingZone(String),

    #[error("instance {instance:?}: machine type {machine_type:?} is not in zone {zone:?}")]
    InvalidMachineType {
        instance: String,
        machine_type: String,
        zone: String,
    },

    #[error("instance {0:?} has no disks")]
    NoDisks(String),

    #[error("instance {instance:?}: disk {index} has neither a source nor a source image")]
    DiskWithoutSource { instance: String, index: usize },

    #[error("instance {instance:?} must have exactly one boot disk, found {count}")]
    BootDiskCount { instance: String, count: usize },

    #[error("instance {instance:?}: network interface {index} has no network")]
    MissingNetwork { instance: String, index: usize },

    #[error("instance name {0:?} is used more than once in this step")]
    DuplicateName(String),
}

/// Workflow-level values applied to instances that leave them unset.
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    pub project: String,
    pub zone: String,
}

/// Fills in defaults and normalizes identifiers on one instance.
///
/// Partial URLs can only be expanded once the project and zone are
/// known, so an instance left without either is reported and not
/// populated further.
pub fn populate_instance(instance: &mut Instance, defaults: &Defaults) -> Vec<ValidationError> {
    instance.name = instance.name.trim().to_string();

    if instance.project.is_empty() {
        instance.project = defaults.project.clone();
    }
    if instance.zone.is_empty() {
        instance.zone = defaults.zone.clone();
    }
    instance.project = last_segment(&instance.project).to_string();
    instance.zone = last_segment(&instance.zone).to_string();

    let mut errors = Vec::new();
    if instance.project.is_empty() {
        errors.push(ValidationError::MissingProject(instance.name.clone()));
    }
    if instance.zone.is_empty() {
        errors.push(ValidationError::MissingZone(instance.name.clone()));
    }
    if !errors.is_empty() {
        return errors;
    }

    if instance.description.is_empty() {
        instance.description = format!("Instance created by {}.", crate::APP_NAME.to_lowercase());
    }

    if instance.machine_type.is_empty() {
        instance.machine_type = DEFAULT_MACHINE_TYPE.to_string();
    }
    instance.machine_type = expand_machine_type(&instance.machine_type, &instance.project, &instance.zone);

    if instance.network_interfaces.is_empty() {
        let mut interface = NetworkInterface::on_network(DEFAULT_NETWORK);
        interface.access_configs.push(AccessConfig::external_nat());
        instance.network_interfaces.push(interface);
    }
    for interface in &mut instance.network_interfaces {
        interface.network = expand_partial(&interface.network, &instance.project, "global/");
        interface.subnetwork = expand_partial(&interface.subnetwork, &instance.project, "regions/");
    }

    if instance.service_accounts.is_empty() {
        let scopes = if instance.scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            instance.scopes.clone()
        };
        instance.service_accounts.push(ServiceAccount {
            email: "default".to_string(),
            scopes,
        });
    }

    if !instance.disks.iter().any(|d| d.boot) {
        if let Some(first) = instance.disks.first_mut() {
            first.boot = true;
        }
    }

    debug!("Populated instance {:?} ({})", instance.name, instance.machine_type);
    errors
}

/// Checks one instance, returning every problem found.
pub fn validate_instance(instance: &Instance) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let name = &instance.name;

    if !is_valid_name(name) {
        errors.push(ValidationError::InvalidName(name.clone()));
    }
    if instance.project.is_empty() {
        errors.push(ValidationError::MissingProject(name.clone()));
    }
    if instance.zone.is_empty() {
        errors.push(ValidationError::MissingZone(name.clone()));
    }

    let expected_prefix = format!("projects/{}/zones/{}/machineTypes/", instance.project, instance.zone);
    match instance.machine_type.strip_prefix(&expected_prefix) {
        Some(machine) if !machine.is_empty() && !machine.contains('/') => {}
        _ => errors.push(ValidationError::InvalidMachineType {
            instance: name.clone(),
            machine_type: instance.machine_type.clone(),
            zone: instance.zone.clone(),
        }),
    }

    if instance.disks.is_empty() {
        errors.push(ValidationError::NoDisks(name.clone()));
    } else {
        for (index, disk) in instance.disks.iter().enumerate() {
            let has_image = disk
                .initialize_params
                .as_ref()
                .is_some_and(|p| !p.source_image.is_empty());
            if disk.source.is_empty() && !has_image {
                errors.push(ValidationError::DiskWithoutSource {
                    instance: name.clone(),
                    index,
                });
            }
        }

        let boot_disks = instance.disks.iter().filter(|d| d.boot).count();
        if boot_disks != 1 {
            errors.push(ValidationError::BootDiskCount {
                instance: name.clone(),
                count: boot_disks,
            });
        }
    }

    for (index, interface) in instance.network_interfaces.iter().enumerate() {
        if interface.network.is_empty() {
            errors.push(ValidationError::MissingNetwork {
                instance: name.clone(),
                index,
            });
        }
    }

    errors
}

/// RFC 1035 label: lowercase letter first, then letters, digits or
/// hyphens, not ending in a hyphen.
pub fn is_valid_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        return false;
    }

    let bytes = name.as_bytes();
    if !bytes[0].is_ascii_lowercase() || bytes[bytes.len() - 1] == b'-' {
        return false;
    }

    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Last `/`-separated segment of a possibly qualified identifier.
pub fn last_segment(value: &str) -> &str {
    value.trim_end_matches('/').rsplit('/').next().unwrap_or(value)
}

fn expand_machine_type(machine_type: &str, project: &str, zone: &str) -> String {
    if machine_type.starts_with("projects/") {
        machine_type.to_string()
    } else if machine_type.starts_with("zones/") {
        format!("projects/{}/{}", project, machine_type)
    } else if !machine_type.contains('/') {
        format!("projects/{}/zones/{}/machineTypes/{}", project, zone, machine_type)
    } else {
        machine_type.to_string()
    }
}

/// Prefixes a partial URL starting with `partial` by `projects/<project>/`.
/// Bare names are left for reference resolution.
fn expand_partial(value: &str, project: &str, partial: &str) -> String {
    if value.starts_with(partial) {
        format!("projects/{}/{}", project, value)
    } else {
        value.to_string()
    }
}
