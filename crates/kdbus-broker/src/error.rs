// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the broker error taxonomy and its fixed errno mapping.
// Author: Lukas Bower

//! Broker error kinds surfaced over the control-plane boundary.

use kdbus_wire::WireError;
use thiserror::Error;

/// Errors surfaced by broker operations.
///
/// Every validation failure maps to exactly one kind; the ioctl dispatcher
/// outside this crate forwards [`Error::errno`] to user space unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The user buffer was shorter than its declared size.
    #[error("user buffer unreadable")]
    BadAddress,
    /// A declared command size exceeded the upper bound.
    #[error("command size {size} above limit {limit}")]
    TooLarge {
        /// Size declared by the caller.
        size: u64,
        /// Largest size the broker accepts.
        limit: u64,
    },
    /// A declared command size did not cover the fixed header.
    #[error("command size {size} below minimum {min}")]
    TooSmall {
        /// Size declared by the caller.
        size: u64,
        /// Smallest size the command requires.
        min: u64,
    },
    /// A field or item failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A name payload exceeded the permitted length.
    #[error("name length {len} above limit")]
    NameTooLong {
        /// Payload length found on the wire, including the terminator.
        len: usize,
    },
    /// The request relies on an item or facility this broker does not offer.
    #[error("not supported: {0}")]
    NotSupported(&'static str),
    /// The object or singleton item already exists.
    #[error("already exists: {0}")]
    AlreadyExists(&'static str),
    /// The caller is not permitted to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),
    /// An allocation failed; the in-progress operation was rolled back.
    #[error("out of memory")]
    NoMemory,
    /// The command parsed but a required element was missing.
    #[error("bad message: {0}")]
    BadMessage(&'static str),
    /// The target object was already disconnected.
    #[error("object is shut down")]
    Shutdown,
    /// The caller-supplied timeout elapsed before delivery.
    #[error("timed out")]
    TimedOut,
    /// Item-stream framing failure, normalized at the errno boundary.
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

impl Error {
    /// Map this kind to its fixed host-ABI errno value.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Error::BadAddress => 14,           // EFAULT
            Error::TooLarge { .. } => 90,      // EMSGSIZE
            Error::TooSmall { .. } => 90,      // EMSGSIZE
            Error::InvalidArgument(_) => 22,   // EINVAL
            Error::NameTooLong { .. } => 36,   // ENAMETOOLONG
            Error::NotSupported(_) => 95,      // EOPNOTSUPP
            Error::AlreadyExists(_) => 17,     // EEXIST
            Error::PermissionDenied(_) => 1,   // EPERM
            Error::NoMemory => 12,             // ENOMEM
            Error::BadMessage(_) => 74,        // EBADMSG
            Error::Shutdown => 108,            // ESHUTDOWN
            Error::TimedOut => 110,            // ETIMEDOUT
            Error::Wire(wire) => match wire {
                WireError::Truncated { .. } => 90,
                WireError::PayloadSizeMismatch { .. } => 90,
                WireError::UnsupportedItem(_) => 95,
                _ => 22,
            },
        }
    }
}

/// Result alias used across the broker.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_follow_the_fixed_taxonomy() {
        assert_eq!(Error::BadAddress.errno(), 14);
        assert_eq!(Error::PermissionDenied("prefix").errno(), 1);
        assert_eq!(Error::AlreadyExists("bus name").errno(), 17);
        assert_eq!(Error::Shutdown.errno(), 108);
        assert_eq!(
            Error::Wire(WireError::UnsupportedItem(9)).errno(),
            95
        );
        assert_eq!(
            Error::Wire(WireError::TrailingBytes { residual: 9 }).errno(),
            22
        );
    }
}
