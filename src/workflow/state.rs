//! Provision State Persistence
//!
//! Records what a workflow run left behind so that a separate cleanup
//! step can delete it. Creation failures and cancellation do not roll
//! anything back, so the list of created instances is the only record
//! of what exists.
//!
//! State is saved to `{state_dir}/{workflow_stem}.state` as JSON.

use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

/// Default directory for state files, relative to the working directory.
pub const STATE_DIR: &str = ".cloudrunner";

/// Persistent record of one workflow run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProvisionState {
    /// Path to the workflow file this state belongs to
    pub workflow_path: String,

    /// Links of instances the provider accepted
    pub created_instances: BTreeSet<String>,

    /// Name of the step that failed (if any)
    pub failed_step: Option<String>,

    /// Whether the run was canceled
    pub canceled: bool,

    /// Last time the state was updated
    pub timestamp: DateTime<Utc>,
}

impl ProvisionState {
    pub fn new(workflow_path: &str) -> Self {
        Self {
            workflow_path: workflow_path.to_string(),
            created_instances: BTreeSet::new(),
            failed_step: None,
            canceled: false,
            timestamp: Utc::now(),
        }
    }

    /// Saves the state under `state_dir`, creating it if needed.
    pub fn save(&self, state_dir: &Path) -> Result<PathBuf, Box<dyn Error>> {
        fs::create_dir_all(state_dir)?;

        let state_file = Self::state_file_path_for(state_dir, &self.workflow_path);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&state_file, json)?;

        info!("Saved provision state to {}", state_file.display());
        Ok(state_file)
    }

    /// Loads the state saved for `workflow_path` under `state_dir`.
    pub fn load(state_dir: &Path, workflow_path: &str) -> Result<Self, Box<dyn Error>> {
        let state_file = Self::state_file_path_for(state_dir, workflow_path);

        let content = fs::read_to_string(&state_file)?;
        let state: ProvisionState = serde_json::from_str(&content)?;

        info!("Loaded provision state from {}", state_file.display());
        Ok(state)
    }

    fn state_file_path_for(state_dir: &Path, workflow_path: &str) -> PathBuf {
        let stem = Path::new(workflow_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow");

        state_dir.join(format!("{}.state", stem))
    }

    /// Records an instance the provider created.
    pub fn mark_created(&mut self, link: impl Into<String>) {
        self.created_instances.insert(link.into());
        self.timestamp = Utc::now();
    }

    pub fn mark_failed(&mut self, step_name: &str) {
        self.failed_step = Some(step_name.to_string());
        self.timestamp = Utc::now();
    }

    pub fn mark_canceled(&mut self) {
        self.canceled = true;
        self.timestamp = Utc::now();
    }

    /// Returns true if anything was created that needs cleaning up.
    pub fn needs_cleanup(&self) -> bool {
        !self.created_instances.is_empty()
    }
}
