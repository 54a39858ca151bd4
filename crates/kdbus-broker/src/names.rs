// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Track well-known name ownership and waiter queues per bus.
// Author: Lukas Bower

//! Per-bus registry of well-known names.
//!
//! A name is held by at most one connection at a time; contenders either
//! fail, queue in arrival order, or preempt the holder when the replace
//! mode is requested. Every transition happens under the registry lock and
//! is observable as an ownership change.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use log::debug;

use crate::error::{Error, Result};
use crate::limits::MAKE_NAME_MAX;

/// Acquisition flag: preempt the current owner, queuing it.
pub const NAME_REPLACE_EXISTING: u64 = 1 << 0;

/// Acquisition flag: join the waiter queue when the name is taken.
pub const NAME_QUEUE: u64 = 1 << 1;

/// Result of a name acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireReply {
    /// The caller now owns the name.
    Owner,
    /// The caller joined the waiter queue.
    InQueue,
}

/// One row of a registry listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameListEntry {
    /// The well-known name.
    pub name: String,
    /// Connection id of the current owner, if any.
    pub owner: Option<u64>,
    /// Flags the owner acquired the name with.
    pub flags: u64,
}

#[derive(Debug)]
struct Waiter {
    conn: u64,
    flags: u64,
}

#[derive(Debug)]
struct NameEntry {
    owner: Option<u64>,
    flags: u64,
    queue: VecDeque<Waiter>,
}

/// Change applied by a release: the name and the promoted waiter with its
/// acquisition flags, if any.
pub(crate) type ReleaseChange = (String, Option<(u64, u64)>);

/// Per-bus well-known name registry.
#[derive(Debug, Default)]
pub struct NameRegistry {
    entries: Mutex<BTreeMap<String, NameEntry>>,
}

/// Check a well-known or make name against the shared string rules.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("empty name"));
    }
    if name.len() + 1 > MAKE_NAME_MAX {
        return Err(Error::NameTooLong { len: name.len() + 1 });
    }
    let valid = name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-');
    if !valid {
        return Err(Error::InvalidArgument("name contains invalid characters"));
    }
    Ok(())
}

impl NameRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `name` for `conn`, returning the outcome and the preempted
    /// owner when the replace mode displaced one.
    pub(crate) fn acquire(
        &self,
        conn: u64,
        name: &str,
        flags: u64,
    ) -> Result<(AcquireReply, Option<u64>)> {
        validate_name(name)?;
        let mut entries = self.entries.lock().expect("poisoned name registry lock");
        let entry = entries.entry(name.to_owned()).or_insert_with(|| NameEntry {
            owner: None,
            flags: 0,
            queue: VecDeque::new(),
        });

        match entry.owner {
            None => {
                entry.owner = Some(conn);
                entry.flags = flags;
                debug!("name '{name}' acquired by connection {conn}");
                Ok((AcquireReply::Owner, None))
            }
            Some(owner) if owner == conn => Err(Error::AlreadyExists("well-known name")),
            Some(owner) => {
                if flags & NAME_REPLACE_EXISTING != 0 {
                    let old_flags = entry.flags;
                    entry.queue.push_front(Waiter {
                        conn: owner,
                        flags: old_flags,
                    });
                    entry.owner = Some(conn);
                    entry.flags = flags;
                    debug!("name '{name}' taken over by connection {conn} from {owner}");
                    Ok((AcquireReply::Owner, Some(owner)))
                } else if flags & NAME_QUEUE != 0 {
                    entry.queue.push_back(Waiter { conn, flags });
                    Ok((AcquireReply::InQueue, None))
                } else {
                    Err(Error::AlreadyExists("well-known name"))
                }
            }
        }
    }

    /// Release `name` held or queued by `conn`; returns the promoted waiter
    /// and the flags it acquired with.
    pub(crate) fn release(&self, conn: u64, name: &str) -> Result<Option<(u64, u64)>> {
        let mut entries = self.entries.lock().expect("poisoned name registry lock");
        let entry = entries
            .get_mut(name)
            .ok_or(Error::BadMessage("name not registered"))?;

        if entry.owner == Some(conn) {
            let promoted = Self::promote(entry);
            if entry.owner.is_none() {
                entries.remove(name);
            }
            debug!("name '{name}' released by connection {conn}");
            return Ok(promoted);
        }

        let before = entry.queue.len();
        entry.queue.retain(|waiter| waiter.conn != conn);
        if entry.queue.len() == before {
            return Err(Error::PermissionDenied("name held by another connection"));
        }
        if entry.owner.is_none() && entry.queue.is_empty() {
            entries.remove(name);
        }
        Ok(None)
    }

    /// Release everything `conn` owns or waits on, in name order.
    pub(crate) fn release_all(&self, conn: u64) -> Vec<ReleaseChange> {
        let mut entries = self.entries.lock().expect("poisoned name registry lock");
        let mut changes = Vec::new();
        let names: Vec<String> = entries.keys().cloned().collect();
        for name in names {
            let entry = entries.get_mut(&name).expect("entry present");
            entry.queue.retain(|waiter| waiter.conn != conn);
            if entry.owner == Some(conn) {
                let promoted = Self::promote(entry);
                debug!("name '{name}' released on disconnect of connection {conn}");
                changes.push((name.clone(), promoted));
            }
            if entry.owner.is_none() && entry.queue.is_empty() {
                entries.remove(&name);
            }
        }
        changes
    }

    /// Look up the current owner of `name`.
    pub(crate) fn owner_of(&self, name: &str) -> Option<u64> {
        self.entries
            .lock()
            .expect("poisoned name registry lock")
            .get(name)
            .and_then(|entry| entry.owner)
    }

    /// Snapshot the registry contents.
    #[must_use]
    pub fn list(&self) -> Vec<NameListEntry> {
        self.entries
            .lock()
            .expect("poisoned name registry lock")
            .iter()
            .map(|(name, entry)| NameListEntry {
                name: name.clone(),
                owner: entry.owner,
                flags: entry.flags,
            })
            .collect()
    }

    fn promote(entry: &mut NameEntry) -> Option<(u64, u64)> {
        match entry.queue.pop_front() {
            Some(waiter) => {
                entry.owner = Some(waiter.conn);
                entry.flags = waiter.flags;
                Some((waiter.conn, waiter.flags))
            }
            None => {
                entry.owner = None;
                entry.flags = 0;
                None
            }
        }
    }
}
