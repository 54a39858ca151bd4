// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define kdbus item type codes, header constants, and wire errors.
// Author: Lukas Bower

//! Item type codes and shared constants for the kdbus wire format.

/// Byte length of the `{u64 size, u64 type}` record header.
pub const ITEM_HEADER_SIZE: usize = 16;

/// Sentinel offset inside a payload-vector record meaning "padding only",
/// carried instead of a real payload location.
pub const PAYLOAD_PAD_ONLY: u64 = u64::MAX;

/// Round a byte length up to the next 8-byte boundary.
#[must_use]
pub const fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Item type codes recognised on the wire.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    /// Message payload location `{u64 offset, u64 len}`.
    PayloadVec = 1,
    /// Well-known name carried by a make command, NUL-terminated.
    MakeName = 2,
    /// Cgroup hierarchy id carried by a bus make command.
    MakeCgroup = 3,
    /// Human-readable connection label, NUL-terminated.
    ConnName = 4,
    /// Metadata class mask requested by a hello command.
    AttachFlags = 5,
    /// Receive pool size requested by a hello command.
    PoolSize = 6,
    /// Send-time timestamps and sequence number.
    Timestamp = 0x1000,
    /// Sender credentials.
    Creds = 0x1001,
    /// Sender supplementary group ids.
    Auxgroups = 0x1002,
    /// One well-known name owned by the sender.
    Name = 0x1003,
    /// Thread-group leader comm string.
    TidComm = 0x1004,
    /// Thread comm string.
    PidComm = 0x1005,
    /// Absolute path of the sender executable.
    Exe = 0x1006,
    /// Raw argv area of the sender process.
    Cmdline = 0x1007,
    /// Four capability sets of the sender.
    Caps = 0x1008,
    /// Cgroup path of the sender.
    Cgroup = 0x1009,
    /// Audit login uid and session id.
    Audit = 0x100a,
    /// Opaque security label of the sender.
    Seclabel = 0x100b,
}

impl TryFrom<u64> for ItemType {
    type Error = WireError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        use ItemType::*;
        Ok(match value {
            1 => PayloadVec,
            2 => MakeName,
            3 => MakeCgroup,
            4 => ConnName,
            5 => AttachFlags,
            6 => PoolSize,
            0x1000 => Timestamp,
            0x1001 => Creds,
            0x1002 => Auxgroups,
            0x1003 => Name,
            0x1004 => TidComm,
            0x1005 => PidComm,
            0x1006 => Exe,
            0x1007 => Cmdline,
            0x1008 => Caps,
            0x1009 => Cgroup,
            0x100a => Audit,
            0x100b => Seclabel,
            other => return Err(WireError::UnsupportedItem(other)),
        })
    }
}

/// Errors produced while decoding an item stream.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// A record declared a size below the 16-byte header.
    #[error("item size {size} below header size")]
    ItemTooSmall {
        /// Size declared in the record header.
        size: u64,
    },
    /// A record payload would cross the end of the enclosing buffer.
    #[error("item size {declared} exceeds remaining {remaining} bytes")]
    Truncated {
        /// Size declared in the record header.
        declared: u64,
        /// Bytes left in the buffer at the record start.
        remaining: usize,
    },
    /// The stream left a non-padding tail before the buffer end.
    #[error("stream leaves {residual} trailing bytes, not padding")]
    TrailingBytes {
        /// Bytes between the last aligned record end and the buffer end.
        residual: usize,
    },
    /// Encountered an item type code this broker does not know.
    #[error("unsupported item type {0}")]
    UnsupportedItem(u64),
    /// A string payload was not NUL-terminated valid UTF-8.
    #[error("string payload missing terminator or not valid utf8")]
    InvalidString,
    /// A fixed-width payload had the wrong length.
    #[error("payload length {actual}, expected {expected}")]
    PayloadSizeMismatch {
        /// Length the item type requires.
        expected: usize,
        /// Length found on the wire.
        actual: usize,
    },
}
