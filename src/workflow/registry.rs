//! Resource Registries
//!
//! Read-only lookup tables mapping short resource names to fully
//! qualified links. Registries are populated by other steps; this crate
//! only reads them, so lookups may run from many threads at once.

use std::collections::HashMap;
use std::sync::Arc;

use super::model::ResourceLinks;

/// A resource known to the workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Fully-qualified provider link
    pub link: String,
}

/// Lookup of resources by short name.
pub trait Registry: Send + Sync {
    /// Returns the resource registered under `name`, if any.
    fn get(&self, name: &str) -> Option<Resource>;
}

/// A registry backed by a plain map.
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    entries: HashMap<String, Resource>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as an alias for `link`.
    pub fn insert(&mut self, name: impl Into<String>, link: impl Into<String>) {
        self.entries.insert(name.into(), Resource { link: link.into() });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for ResourceMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, link) in iter {
            map.insert(name, link);
        }
        map
    }
}

impl Registry for ResourceMap {
    fn get(&self, name: &str) -> Option<Resource> {
        self.entries.get(name).cloned()
    }
}

/// The registries consulted when resolving instance references.
#[derive(Clone)]
pub struct Registries {
    pub disks: Arc<dyn Registry>,
    pub images: Arc<dyn Registry>,
    pub networks: Arc<dyn Registry>,
    pub subnetworks: Arc<dyn Registry>,
}

impl Registries {
    /// Registries with no entries; every lookup misses.
    pub fn empty() -> Self {
        Self::from_links(&ResourceLinks::default())
    }

    /// Builds map-backed registries from workflow file links.
    pub fn from_links(links: &ResourceLinks) -> Self {
        let map = |entries: &HashMap<String, String>| -> Arc<dyn Registry> {
            Arc::new(entries.clone().into_iter().collect::<ResourceMap>())
        };

        Self {
            disks: map(&links.disks),
            images: map(&links.images),
            networks: map(&links.networks),
            subnetworks: map(&links.subnetworks),
        }
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::empty()
    }
}
