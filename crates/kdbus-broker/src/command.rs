// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Decode and validate variable-length make and hello commands.
// Author: Lukas Bower

//! Decoders for the variable-length control-plane commands.
//!
//! Every command begins with a u64 declaring its total size, followed by a
//! fixed header and an item stream. The declared bytes are copied out of the
//! caller's buffer before any field is trusted; the returned command objects
//! own their strings, so later stages never re-copy.

use kdbus_wire::{ItemIter, ItemType, WireError};

use crate::error::{Error, Result};
use crate::limits::{
    BLOOM_SIZE_MAX, BLOOM_SIZE_MIN, CMD_SIZE_MAX, MAKE_NAME_MAX, MAKE_NAME_MIN, POOL_SIZE_MAX,
};
use crate::meta::AttachFlags;
use crate::names::validate_name;

/// Byte length of the bus-make fixed header: size, flags, bloom_size.
pub const BUS_MAKE_HEADER: usize = 24;

/// Byte length of the namespace-make fixed header: size, flags.
pub const NS_MAKE_HEADER: usize = 16;

/// Byte length of the hello fixed header: size, conn_flags.
pub const HELLO_HEADER: usize = 16;

/// Validated bus creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMakeCmd {
    /// Bus behaviour flags.
    pub flags: u64,
    /// Bloom filter size for match items, in bytes.
    pub bloom_size: u64,
    /// Bus name, including the "<uid>-" prefix.
    pub name: String,
    /// Cgroup hierarchy id to record sender paths from.
    pub cgroup_id: Option<u64>,
}

/// Validated namespace creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsMakeCmd {
    /// Namespace behaviour flags.
    pub flags: u64,
    /// Child namespace name.
    pub name: String,
}

/// Validated hello request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloCmd {
    /// Connection behaviour flags.
    pub conn_flags: u64,
    /// Optional human-readable connection label.
    pub label: Option<String>,
    /// Metadata classes the connection agrees to receive.
    pub attach_flags: AttachFlags,
    /// Requested receive pool size in bytes.
    pub pool_size: u64,
}

/// Copy the declared command bytes out of the caller buffer.
fn copy_command(buf: &[u8], header: usize) -> Result<Vec<u8>> {
    if buf.len() < 8 {
        return Err(Error::BadAddress);
    }
    let size = u64::from_le_bytes(buf[..8].try_into().expect("slice length checked"));
    if size < header as u64 {
        return Err(Error::TooSmall {
            size,
            min: header as u64,
        });
    }
    if size > CMD_SIZE_MAX {
        return Err(Error::TooLarge {
            size,
            limit: CMD_SIZE_MAX,
        });
    }
    let size = size as usize;
    if buf.len() < size {
        return Err(Error::BadAddress);
    }
    Ok(buf[..size].to_vec())
}

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(
        buf[offset..offset + 8]
            .try_into()
            .expect("slice length checked"),
    )
}

/// Decode and validate a make-name item payload.
fn decode_make_name(payload: &[u8]) -> Result<String> {
    if payload.len() < MAKE_NAME_MIN {
        return Err(Error::InvalidArgument("name payload too short"));
    }
    if payload.len() > MAKE_NAME_MAX {
        return Err(Error::NameTooLong { len: payload.len() });
    }
    let (last, body) = payload.split_last().expect("length checked");
    if *last != 0 || body.contains(&0) {
        return Err(Error::InvalidArgument("name not NUL-terminated"));
    }
    let name =
        core::str::from_utf8(body).map_err(|_| Error::InvalidArgument("name not valid utf8"))?;
    validate_name(name)?;
    Ok(name.to_owned())
}

fn resolve_type(item: &kdbus_wire::Item<'_>) -> Result<ItemType> {
    match item.ty() {
        Ok(ty) => Ok(ty),
        Err(WireError::UnsupportedItem(_)) => Err(Error::NotSupported("unknown item type")),
        Err(other) => Err(other.into()),
    }
}

impl BusMakeCmd {
    /// Decode a bus-make command from an untrusted caller buffer.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let owned = copy_command(buf, BUS_MAKE_HEADER)?;
        let flags = read_u64(&owned, 8);
        let bloom_size = read_u64(&owned, 16);

        let mut name = None;
        let mut cgroup_id = None;
        for item in ItemIter::new(&owned[BUS_MAKE_HEADER..]) {
            let item = item?;
            if item.payload().is_empty() {
                return Err(Error::InvalidArgument("empty item payload"));
            }
            match resolve_type(&item)? {
                ItemType::MakeName => {
                    if name.is_some() {
                        return Err(Error::AlreadyExists("make-name item"));
                    }
                    name = Some(decode_make_name(item.payload())?);
                }
                ItemType::MakeCgroup => {
                    if cgroup_id.is_some() {
                        return Err(Error::AlreadyExists("make-cgroup item"));
                    }
                    cgroup_id = Some(item.as_u64()?);
                }
                _ => return Err(Error::NotSupported("item not valid in bus make")),
            }
        }

        let name = name.ok_or(Error::BadMessage("make-name item missing"))?;
        if bloom_size % 8 != 0 {
            return Err(Error::InvalidArgument("bloom size not 8-byte aligned"));
        }
        if !(BLOOM_SIZE_MIN..=BLOOM_SIZE_MAX).contains(&bloom_size) {
            return Err(Error::InvalidArgument("bloom size out of bounds"));
        }

        Ok(Self {
            flags,
            bloom_size,
            name,
            cgroup_id,
        })
    }
}

impl NsMakeCmd {
    /// Decode a namespace-make command from an untrusted caller buffer.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let owned = copy_command(buf, NS_MAKE_HEADER)?;
        let flags = read_u64(&owned, 8);

        let mut name = None;
        for item in ItemIter::new(&owned[NS_MAKE_HEADER..]) {
            let item = item?;
            if item.payload().is_empty() {
                return Err(Error::InvalidArgument("empty item payload"));
            }
            match resolve_type(&item)? {
                ItemType::MakeName => {
                    if name.is_some() {
                        return Err(Error::AlreadyExists("make-name item"));
                    }
                    name = Some(decode_make_name(item.payload())?);
                }
                _ => return Err(Error::NotSupported("item not valid in namespace make")),
            }
        }

        let name = name.ok_or(Error::BadMessage("make-name item missing"))?;
        Ok(Self { flags, name })
    }
}

impl HelloCmd {
    /// Decode a hello command from an untrusted caller buffer.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let owned = copy_command(buf, HELLO_HEADER)?;
        let conn_flags = read_u64(&owned, 8);

        let mut label = None;
        let mut attach_flags = None;
        let mut pool_size = None;
        for item in ItemIter::new(&owned[HELLO_HEADER..]) {
            let item = item?;
            if item.payload().is_empty() {
                return Err(Error::InvalidArgument("empty item payload"));
            }
            match resolve_type(&item)? {
                ItemType::ConnName => {
                    if label.is_some() {
                        return Err(Error::AlreadyExists("conn-name item"));
                    }
                    let text = item
                        .as_str()
                        .map_err(|_| Error::InvalidArgument("label not NUL-terminated"))?;
                    if !text.bytes().all(|b| (0x20..0x7f).contains(&b)) {
                        return Err(Error::InvalidArgument("label not printable"));
                    }
                    label = Some(text.to_owned());
                }
                ItemType::AttachFlags => {
                    if attach_flags.is_some() {
                        return Err(Error::AlreadyExists("attach-flags item"));
                    }
                    attach_flags = Some(AttachFlags::from_raw(item.as_u64()?));
                }
                ItemType::PoolSize => {
                    if pool_size.is_some() {
                        return Err(Error::AlreadyExists("pool-size item"));
                    }
                    pool_size = Some(item.as_u64()?);
                }
                _ => return Err(Error::NotSupported("item not valid in hello")),
            }
        }

        let pool_size = pool_size.ok_or(Error::BadMessage("pool-size item missing"))?;
        if pool_size == 0 || pool_size > POOL_SIZE_MAX {
            return Err(Error::InvalidArgument("pool size out of bounds"));
        }

        Ok(Self {
            conn_flags,
            label,
            attach_flags: attach_flags.unwrap_or(AttachFlags::NONE),
            pool_size,
        })
    }
}
