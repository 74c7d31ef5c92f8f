// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Locked status-code facade over the slot manager
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below, concurrency test in tests/updates_host
//!
//! One `SlotService` is constructed by the owning process at start-up and
//! shared by reference (or `Arc`). Every call holds the service mutex for its
//! whole read-modify-persist sequence. Failures never cross this boundary as
//! panics or errors, only as status codes; the cause is logged.

use parking_lot::Mutex;

use crate::blob::{BlobStore, FsBlobStore};
use crate::config::SlotConfig;
use crate::manager::{Result, SlotError, SlotManager};
use crate::paths::StorageLayout;

pub const STATUS_OK: i32 = 0;
pub const STATUS_ERROR: i32 = -1;

pub const INSTALLATION_SUCCESSFUL: i32 = 1;
pub const INSTALLATION_NOT_SUCCESSFUL: i32 = 0;

pub struct SlotService<B: BlobStore + Clone> {
    base: SlotConfig,
    blob: B,
    manager: Mutex<Option<SlotManager<B>>>,
}

impl SlotService<FsBlobStore> {
    /// File-backed service storing its blob under `config.storage_dir`.
    pub fn open(config: SlotConfig) -> Self {
        let blob = FsBlobStore::new(StorageLayout::from_config(&config).store_path());
        Self::with_blob(config, blob)
    }
}

impl<B: BlobStore + Clone> SlotService<B> {
    /// `config.max_installations` is overridden by [`Self::initialize`].
    pub fn with_blob(config: SlotConfig, blob: B) -> Self {
        Self { base: config, blob, manager: Mutex::new(None) }
    }

    /// Builds the manager on first use, then loads or creates the store.
    ///
    /// The manager built by the first call is kept even when loading fails, so a retry
    /// with a different `max_installations` still uses the first slot count. Call
    /// [`Self::uninitialize`] before retrying with another count.
    pub fn initialize(&self, max_installations: i32) -> i32 {
        let mut guard = self.manager.lock();
        if guard.is_none() {
            let Ok(max) = usize::try_from(max_installations) else {
                log::error!("updates: initialize: invalid slot count {max_installations}");
                return STATUS_ERROR;
            };
            let config = SlotConfig { max_installations: max, ..self.base.clone() };
            match SlotManager::new(&config, self.blob.clone()) {
                Ok(manager) => *guard = Some(manager),
                Err(err) => {
                    log::error!("updates: initialize: {err}");
                    return STATUS_ERROR;
                }
            }
        }
        let Some(manager) = guard.as_mut() else {
            return STATUS_ERROR;
        };
        status("initialize", manager.initialize())
    }

    /// Drops the in-memory manager; the durable store is left as is.
    pub fn uninitialize(&self) {
        self.manager.lock().take();
    }

    pub fn get_installation_status(&self, index: i32) -> i32 {
        self.query("get_installation_status", |m| {
            let successful = m.installation_status(slot_index(index, m)?)?;
            Ok(if successful { INSTALLATION_SUCCESSFUL } else { INSTALLATION_NOT_SUCCESSFUL })
        })
    }

    pub fn get_installation_num_tries_left(&self, index: i32) -> i32 {
        self.query("get_installation_num_tries_left", |m| {
            let tries = m.installation_num_tries_left(slot_index(index, m)?)?;
            Ok(i32::try_from(tries).unwrap_or(i32::MAX))
        })
    }

    pub fn decrement_installation_num_tries(&self, index: i32) -> i32 {
        self.update("decrement_installation_num_tries", |m| {
            let index = slot_index(index, m)?;
            m.decrement_installation_num_tries(index)
        })
    }

    pub fn get_current_installation_index(&self) -> i32 {
        self.query("get_current_installation_index", |m| {
            Ok(m.current_installation_index()? as i32)
        })
    }

    pub fn select_new_installation_index(&self) -> i32 {
        self.with_manager("select_new_installation_index", |m| {
            Ok(m.select_new_installation_index()? as i32)
        })
    }

    /// Writes the slot path as NUL-terminated UTF-8 into `buf`.
    pub fn get_installation_path(&self, index: i32, buf: &mut [u8]) -> i32 {
        self.query("get_installation_path", |m| {
            let path = m.installation_path(slot_index(index, m)?)?;
            let bytes = path.to_string_lossy();
            let bytes = bytes.as_bytes();
            if bytes.len() >= buf.len() {
                log::error!(
                    "updates: get_installation_path: buffer of {} bytes too small for {}",
                    buf.len(),
                    path.display()
                );
                return Ok(STATUS_ERROR);
            }
            buf[..bytes.len()].copy_from_slice(bytes);
            buf[bytes.len()] = 0;
            Ok(STATUS_OK)
        })
    }

    pub fn mark_installation_successful(&self, index: i32) -> i32 {
        self.update("mark_installation_successful", |m| {
            let index = slot_index(index, m)?;
            m.mark_installation_successful(index)
        })
    }

    pub fn roll_forward_if_needed(&self) -> i32 {
        self.update("roll_forward_if_needed", |m| m.roll_forward_if_needed())
    }

    pub fn revert_to_successful_installation(&self) -> i32 {
        self.with_manager("revert_to_successful_installation", |m| {
            Ok(m.revert_to_successful_installation()? as i32)
        })
    }

    pub fn request_roll_forward_to_installation(&self, index: i32) -> i32 {
        self.update("request_roll_forward_to_installation", |m| {
            let index = slot_index(index, m)?;
            m.request_roll_forward_to_installation(index)
        })
    }

    fn query(&self, op: &str, f: impl FnOnce(&SlotManager<B>) -> Result<i32>) -> i32 {
        self.with_manager(op, |m| f(&*m))
    }

    fn update(&self, op: &str, f: impl FnOnce(&mut SlotManager<B>) -> Result<()>) -> i32 {
        self.with_manager(op, |m| f(m).map(|()| STATUS_OK))
    }

    fn with_manager(&self, op: &str, f: impl FnOnce(&mut SlotManager<B>) -> Result<i32>) -> i32 {
        let mut guard = self.manager.lock();
        let Some(manager) = guard.as_mut() else {
            log::error!("updates: {op}: {}", SlotError::NotInitialized);
            return STATUS_ERROR;
        };
        match f(manager) {
            Ok(value) => value,
            Err(err) => {
                log::error!("updates: {op}: {err}");
                STATUS_ERROR
            }
        }
    }
}

fn slot_index<B: BlobStore>(index: i32, manager: &SlotManager<B>) -> Result<usize> {
    usize::try_from(index).map_err(|_| SlotError::InvalidIndex {
        index: i64::from(index),
        max: manager.max_installations(),
    })
}

fn status(op: &str, result: Result<()>) -> i32 {
    match result {
        Ok(()) => STATUS_OK,
        Err(err) => {
            log::error!("updates: {op}: {err}");
            STATUS_ERROR
        }
    }
}
