// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Slot manager configuration (TOML)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below
//!
//! Example:
//! ```toml
//! max_installations = 3
//! max_num_tries = 3
//! storage_dir = "/state/updates"
//! content_dir = "/system/content"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::record::{DEFAULT_MAX_NUM_TRIES, MAX_INSTALLATIONS};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlotConfig {
    /// Number of installation slots (N).
    pub max_installations: usize,
    #[serde(default = "default_max_num_tries")]
    pub max_num_tries: u32,
    /// Holds the store blob and every non-reserved slot.
    pub storage_dir: PathBuf,
    /// Base of the read-only system image; required when N > 2.
    #[serde(default)]
    pub content_dir: Option<PathBuf>,
    #[serde(default = "default_system_app_name")]
    pub system_app_name: String,
}

fn default_max_num_tries() -> u32 {
    DEFAULT_MAX_NUM_TRIES
}

fn default_system_app_name() -> String {
    "system".to_string()
}

impl SlotConfig {
    pub fn new(max_installations: usize, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            max_installations,
            max_num_tries: DEFAULT_MAX_NUM_TRIES,
            storage_dir: storage_dir.into(),
            content_dir: None,
            system_app_name: default_system_app_name(),
        }
    }

    pub fn with_content_dir(mut self, content_dir: impl Into<PathBuf>) -> Self {
        self.content_dir = Some(content_dir.into());
        self
    }

    pub fn with_max_num_tries(mut self, max_num_tries: u32) -> Self {
        self.max_num_tries = max_num_tries;
        self
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// True when slot 0 is the non-overwritable system image.
    pub fn has_reserved_slot(&self) -> bool {
        self.max_installations > 2
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_installations < 2 {
            return Err(ConfigError::Invalid(format!(
                "max_installations must be at least 2, got {}",
                self.max_installations
            )));
        }
        if self.max_installations > MAX_INSTALLATIONS {
            return Err(ConfigError::Invalid(format!(
                "max_installations {} exceeds store capacity {}",
                self.max_installations, MAX_INSTALLATIONS
            )));
        }
        if self.max_num_tries == 0 {
            return Err(ConfigError::Invalid("max_num_tries must be at least 1".into()));
        }
        if self.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage_dir is empty".into()));
        }
        if self.has_reserved_slot() && self.content_dir.is_none() {
            return Err(ConfigError::Invalid(
                "content_dir is required when max_installations > 2".into(),
            ));
        }
        if self.system_app_name.is_empty() || self.system_app_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "system_app_name {:?} must be a single path component",
                self.system_app_name
            )));
        }
        Ok(())
    }
}
