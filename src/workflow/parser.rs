//! Workflow Parser
//!
//! Loads workflow definitions from YAML files.

use std::error::Error;
use std::fs;

use log::{debug, info};

use super::model::WorkflowFile;

/// Loads a workflow from a YAML file.
///
/// Only parsing happens here; defaults and preconditions are applied by
/// each step's `populate` and `validate`.
///
/// # Example
///
/// ```rust,no_run
/// use cloudrunner::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("provision.yaml")?;
///     println!("Loaded {} steps", workflow.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: &str) -> Result<WorkflowFile, Box<dyn Error>> {
    info!("Loading workflow from: {}", path);

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read workflow file '{}': {}. Check that the file exists and is readable.",
            path, e
        )
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let workflow = parse_workflow(&yaml_content)?;

    info!(
        "Parsed workflow '{}': {} steps, {} instances",
        workflow.name,
        workflow.steps.len(),
        workflow.instance_count()
    );

    Ok(workflow)
}

/// Parses a workflow from YAML text.
pub fn parse_workflow(yaml_content: &str) -> Result<WorkflowFile, Box<dyn Error>> {
    let workflow: WorkflowFile = serde_yaml::from_str(yaml_content)
        .map_err(|e| format!("Failed to parse workflow YAML: {}. Check the file format.", e))?;

    if workflow.name.trim().is_empty() {
        return Err("Workflow has no name".into());
    }
    if workflow.serial_interval_secs == 0 {
        return Err("serial_interval_secs must be greater than zero".into());
    }

    Ok(workflow)
}
