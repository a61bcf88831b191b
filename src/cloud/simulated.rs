//! Simulated Compute Provider
//!
//! An in-memory provider used for dry runs of a workflow. Created
//! instances boot, print a fixed number of console lines (one per
//! fetch) and then shut down.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use super::{ComputeClient, SerialPortOutput};
use crate::error::ProviderError;
use crate::workflow::Instance;

/// Console lines an instance prints before shutting down.
const DEFAULT_BOOT_LINES: usize = 5;

#[derive(Debug)]
struct SimulatedInstance {
    console: String,
    lines: usize,
    status: &'static str,
}

/// In-memory compute provider.
#[derive(Debug)]
pub struct SimulatedCompute {
    boot_lines: usize,
    instances: Mutex<HashMap<String, SimulatedInstance>>,
}

impl SimulatedCompute {
    pub fn new() -> Self {
        Self::with_boot_lines(DEFAULT_BOOT_LINES)
    }

    /// Instances shut down after printing `boot_lines` console lines.
    pub fn with_boot_lines(boot_lines: usize) -> Self {
        Self {
            boot_lines,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Names of all instances created so far, sorted.
    pub fn instance_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SimulatedInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key(project: &str, zone: &str, name: &str) -> String {
        format!("{}/{}/{}", project, zone, name)
    }
}

impl Default for SimulatedCompute {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeClient for SimulatedCompute {
    fn create_instance(
        &self,
        project: &str,
        zone: &str,
        instance: &Instance,
    ) -> Result<(), ProviderError> {
        let key = Self::key(project, zone, &instance.name);
        let mut instances = self.lock();

        if instances.contains_key(&key) {
            return Err(ProviderError::AlreadyExists(instance.name.clone()));
        }

        debug!("Simulated instance {} created ({})", key, instance.machine_type);
        instances.insert(
            key,
            SimulatedInstance {
                console: String::new(),
                lines: 0,
                status: "RUNNING",
            },
        );
        Ok(())
    }

    fn get_serial_port_output(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        port: u32,
        start: i64,
    ) -> Result<SerialPortOutput, ProviderError> {
        let mut instances = self.lock();
        let instance = instances
            .get_mut(&Self::key(project, zone, name))
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))?;

        if instance.status != "RUNNING" {
            return Err(ProviderError::Api(format!(
                "instance {:?} is not running",
                name
            )));
        }

        instance.lines += 1;
        instance
            .console
            .push_str(&format!("[port {}] {}: boot stage {}\n", port, name, instance.lines));
        if instance.lines >= self.boot_lines {
            instance.status = "TERMINATED";
        }

        let start = usize::try_from(start.max(0)).unwrap_or(usize::MAX);
        let contents = instance.console.get(start..).unwrap_or_default().to_string();

        Ok(SerialPortOutput {
            contents,
            next: instance.console.len() as i64,
        })
    }

    fn instance_status(
        &self,
        project: &str,
        zone: &str,
        name: &str,
    ) -> Result<String, ProviderError> {
        self.lock()
            .get(&Self::key(project, zone, name))
            .map(|instance| instance.status.to_string())
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_create_fails() {
        let compute = SimulatedCompute::new();
        let instance = Instance::new("vm");

        compute.create_instance("p", "z", &instance).unwrap();
        let err = compute.create_instance("p", "z", &instance).unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
        assert_eq!(compute.instance_names(), vec!["p/z/vm"]);
    }

    #[test]
    fn test_serial_output_is_incremental() {
        let compute = SimulatedCompute::with_boot_lines(3);
        compute.create_instance("p", "z", &Instance::new("vm")).unwrap();

        let first = compute.get_serial_port_output("p", "z", "vm", 1, 0).unwrap();
        let second = compute
            .get_serial_port_output("p", "z", "vm", 1, first.next)
            .unwrap();

        assert!(first.contents.contains("boot stage 1"));
        assert!(second.contents.contains("boot stage 2"));
        assert!(!second.contents.contains("boot stage 1"));
        assert!(second.next > first.next);
    }

    #[test]
    fn test_instance_terminates_after_boot_lines() {
        let compute = SimulatedCompute::with_boot_lines(1);
        compute.create_instance("p", "z", &Instance::new("vm")).unwrap();

        assert_eq!(compute.instance_status("p", "z", "vm").unwrap(), "RUNNING");
        compute.get_serial_port_output("p", "z", "vm", 1, 0).unwrap();
        assert_eq!(compute.instance_status("p", "z", "vm").unwrap(), "TERMINATED");
        assert!(compute.get_serial_port_output("p", "z", "vm", 1, 0).is_err());
    }

    #[test]
    fn test_unknown_instance() {
        let compute = SimulatedCompute::new();
        assert!(matches!(
            compute.instance_status("p", "z", "missing"),
            Err(ProviderError::NotFound(_))
        ));
    }
}
