// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Update domain library (persistent N-slot installation manager)
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests per module + integration tests (via tests/updates_host)
//!   - priority permutation under random operation sequences (proptest)
//!   - roll-forward / revert / new-slot selection
//!   - store framing, corruption and atomic replace
//!
//! PUBLIC API:
//!   - SlotManager: slot state machine over a durable blob
//!   - SlotService: locked status-code facade owned by the updater process
//!   - InstallationStore / InstallationRecord: persisted model + codec
//!   - BlobStore: FsBlobStore (atomic replace) and MemBlobStore (tests)
//!   - SlotConfig / StorageLayout: TOML configuration and on-device paths
//!
//! DEPENDENCIES:
//!   - crc32fast: store blob integrity
//!   - tempfile: atomic replace via temp file + rename
//!   - parking_lot: service mutex
//!   - serde + toml: configuration
//!   - thiserror, log: errors and diagnostics

#![forbid(unsafe_code)]

pub mod blob;
pub mod config;
pub mod manager;
pub mod paths;
pub mod record;
pub mod service;

pub use blob::{BlobStore, FsBlobStore, MemBlobStore};
pub use config::{ConfigError, SlotConfig};
pub use manager::{Result, SlotError, SlotManager};
pub use paths::{StorageLayout, STORE_FILE_NAME};
pub use record::{
    DecodeError, EncodeError, InstallationRecord, InstallationStore, PriorityError,
    DEFAULT_MAX_NUM_TRIES, MAX_INSTALLATIONS, MAX_STORE_SIZE,
};
pub use service::{
    SlotService, INSTALLATION_NOT_SUCCESSFUL, INSTALLATION_SUCCESSFUL, STATUS_ERROR, STATUS_OK,
};
