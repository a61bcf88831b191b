//! Local Object Store
//!
//! Stores objects as files below a root directory. Writes are buffered
//! in memory and land atomically on finalize, so readers never observe
//! a half-written log.

use std::fs;
use std::path::{Component, Path, PathBuf};

use log::debug;

use super::{ObjectWriter, StorageClient};
use crate::error::StorageError;

/// Object store rooted in a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of the object at `path`.
    pub fn object_path(&self, path: &str) -> PathBuf {
        // Keep objects inside the root whatever the caller passes.
        let relative: PathBuf = Path::new(path)
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        self.root.join(relative)
    }
}

impl StorageClient for LocalStorage {
    fn writer(&self, path: &str, content_type: &str) -> Box<dyn ObjectWriter> {
        Box::new(LocalWriter {
            target: self.object_path(path),
            content_type: content_type.to_string(),
            data: Vec::new(),
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!("file://{}", self.object_path(path).display())
    }
}

struct LocalWriter {
    target: PathBuf,
    content_type: String,
    data: Vec<u8>,
}

impl ObjectWriter for LocalWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<(), StorageError> {
        let parent = self
            .target
            .parent()
            .ok_or_else(|| StorageError::Rejected(format!("invalid object path {}", self.target.display())))?;
        fs::create_dir_all(parent)?;

        let mut temp = self.target.clone().into_os_string();
        temp.push(".partial");
        let temp = PathBuf::from(temp);

        fs::write(&temp, &self.data)?;
        fs::rename(&temp, &self.target)?;

        debug!(
            "Stored {} bytes ({}) at {}",
            self.data.len(),
            self.content_type,
            self.target.display()
        );
        Ok(())
    }
}
