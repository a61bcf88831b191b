//! Reference Resolution
//!
//! Rewrites short resource names embedded in an instance specification
//! into the links registered for them. Names with no registry entry are
//! left as they are; they are assumed to already be valid identifiers.

use log::debug;

use super::model::Instance;
use super::registry::{Registries, Registry};

/// Replaces every resolvable disk, image, network and subnetwork
/// reference in `instance` with its registered link.
///
/// Running it twice is harmless: a link is never itself a registry key,
/// so the second pass misses and leaves it unchanged.
pub fn resolve_references(instance: &mut Instance, registries: &Registries) {
    for disk in &mut instance.disks {
        resolve(&mut disk.source, registries.disks.as_ref());

        if let Some(params) = disk.initialize_params.as_mut() {
            if !params.source_image.is_empty() {
                resolve(&mut params.source_image, registries.images.as_ref());
            }
        }
    }

    for interface in &mut instance.network_interfaces {
        resolve(&mut interface.network, registries.networks.as_ref());
        resolve(&mut interface.subnetwork, registries.subnetworks.as_ref());
    }
}

fn resolve(reference: &mut String, registry: &dyn Registry) {
    if let Some(resource) = registry.get(reference) {
        debug!("Resolved {:?} to {}", reference, resource.link);
        *reference = resource.link;
    }
}
