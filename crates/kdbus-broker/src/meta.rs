// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Collect per-message sender metadata into an item stream.
// Author: Lukas Bower

//! On-demand collection of sender process identity into an item stream.
//!
//! Each metadata object pins the pid and user namespaces it was created in;
//! uid/gid values recorded here were rendered in those namespaces by the
//! host, and two objects are only comparable when their pinned namespaces
//! match. Every class is collected at most once; re-requesting an attached
//! class is a no-op.

use kdbus_wire::{ItemBuf, ItemType};

use crate::connection::Connection;
use crate::error::Result;
use crate::host::{Clock, NsId, ProcessSource};
use crate::limits::CMDLINE_MAX;

/// Mask of metadata classes a peer agreed to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttachFlags(u64);

impl AttachFlags {
    /// No classes.
    pub const NONE: Self = Self(0);
    /// Send-time timestamps and sequence number.
    pub const TIMESTAMP: Self = Self(1 << 0);
    /// Sender credentials.
    pub const CREDS: Self = Self(1 << 1);
    /// Supplementary group ids.
    pub const AUXGROUPS: Self = Self(1 << 2);
    /// Well-known names owned by the sender.
    pub const NAMES: Self = Self(1 << 3);
    /// Thread-group leader and thread comm strings.
    pub const COMM: Self = Self(1 << 4);
    /// Executable path.
    pub const EXE: Self = Self(1 << 5);
    /// Argv area.
    pub const CMDLINE: Self = Self(1 << 6);
    /// Capability sets.
    pub const CAPS: Self = Self(1 << 7);
    /// Cgroup path.
    pub const CGROUP: Self = Self(1 << 8);
    /// Audit login identity.
    pub const AUDIT: Self = Self(1 << 9);
    /// Security label.
    pub const SECLABEL: Self = Self(1 << 10);
    /// Connection label.
    pub const CONN_NAME: Self = Self(1 << 11);
    /// Every class.
    pub const ALL: Self = Self((1 << 12) - 1);

    /// Wrap a raw mask from the wire.
    #[must_use]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Return the raw mask.
    #[must_use]
    pub fn into_raw(self) -> u64 {
        self.0
    }

    /// Return true when every class in `other` is present.
    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of the two masks.
    #[must_use]
    pub fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Intersection of the two masks.
    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Classes present in `self` but not in `other`.
    #[must_use]
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Return true when no class is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Append-only metadata buffer describing one sender at send time.
#[derive(Debug, Clone)]
pub struct Metadata {
    pid_ns: NsId,
    user_ns: NsId,
    buf: ItemBuf,
    attached: AttachFlags,
}

impl Metadata {
    /// Create an empty metadata object pinned to the caller's namespaces.
    #[must_use]
    pub fn new(process: &dyn ProcessSource) -> Self {
        Self {
            pid_ns: process.pid_ns(),
            user_ns: process.user_ns(),
            buf: ItemBuf::new(),
            attached: AttachFlags::NONE,
        }
    }

    /// Return true when both objects pin the same pid and user namespaces.
    #[must_use]
    pub fn ns_eq(&self, other: &Metadata) -> bool {
        self.pid_ns == other.pid_ns && self.user_ns == other.user_ns
    }

    /// Borrow the collected item stream.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        self.buf.as_slice()
    }

    /// Return the classes already present in the buffer.
    #[must_use]
    pub fn attached(&self) -> AttachFlags {
        self.attached
    }

    /// Collect every class in `which` that is not attached yet.
    ///
    /// Classes are appended in a fixed order. A transient host failure
    /// propagates immediately and leaves that class's bit clear so a later
    /// call may retry; an absent host facility appends nothing and sets no
    /// bit, which is not an error.
    pub fn append(
        &mut self,
        which: AttachFlags,
        clock: &dyn Clock,
        process: &dyn ProcessSource,
        conn: Option<&Connection>,
        seq: u64,
    ) -> Result<()> {
        let missing = which.without(self.attached);
        if missing.is_empty() {
            return Ok(());
        }

        if missing.contains(AttachFlags::TIMESTAMP) {
            self.append_timestamp(clock, seq);
            self.attached = self.attached.with(AttachFlags::TIMESTAMP);
        }

        if missing.contains(AttachFlags::CREDS) {
            let creds = process.creds();
            let mut payload = [0u8; 40];
            for (slot, value) in [creds.uid, creds.gid, creds.pid, creds.tid, creds.starttime]
                .into_iter()
                .enumerate()
            {
                payload[slot * 8..slot * 8 + 8].copy_from_slice(&value.to_le_bytes());
            }
            self.buf.append_bytes(ItemType::Creds, &payload);
            self.attached = self.attached.with(AttachFlags::CREDS);
        }

        if missing.contains(AttachFlags::AUXGROUPS) {
            let groups = process.auxgroups();
            let region = self.buf.append(ItemType::Auxgroups, groups.len() * 8);
            for (slot, gid) in groups.iter().enumerate() {
                region[slot * 8..slot * 8 + 8].copy_from_slice(&gid.to_le_bytes());
            }
            self.attached = self.attached.with(AttachFlags::AUXGROUPS);
        }

        if missing.contains(AttachFlags::NAMES) {
            if let Some(conn) = conn {
                for (name, flags) in conn.names_snapshot() {
                    let region = self.buf.append(ItemType::Name, 8 + name.len() + 1);
                    region[..8].copy_from_slice(&flags.to_le_bytes());
                    region[8..8 + name.len()].copy_from_slice(name.as_bytes());
                    region[8 + name.len()] = 0;
                }
                self.attached = self.attached.with(AttachFlags::NAMES);
            }
        }

        if missing.contains(AttachFlags::COMM) {
            self.buf.append_str(ItemType::TidComm, &process.tgid_comm());
            self.buf.append_str(ItemType::PidComm, &process.tid_comm());
            self.attached = self.attached.with(AttachFlags::COMM);
        }

        if missing.contains(AttachFlags::EXE) {
            if let Some(path) = process.exe()? {
                self.buf.append_str(ItemType::Exe, &path);
                self.attached = self.attached.with(AttachFlags::EXE);
            }
        }

        if missing.contains(AttachFlags::CMDLINE) {
            if let Some(argv) = process.cmdline()? {
                let len = argv.len().min(CMDLINE_MAX);
                self.buf.append_bytes(ItemType::Cmdline, &argv[..len]);
                self.attached = self.attached.with(AttachFlags::CMDLINE);
            }
        }

        if missing.contains(AttachFlags::CAPS) {
            let caps = process.caps().masked(process.last_cap());
            let mut payload = [0u8; 32];
            for (slot, value) in [
                caps.inheritable,
                caps.permitted,
                caps.effective,
                caps.bounding,
            ]
            .into_iter()
            .enumerate()
            {
                payload[slot * 8..slot * 8 + 8].copy_from_slice(&value.to_le_bytes());
            }
            self.buf.append_bytes(ItemType::Caps, &payload);
            self.attached = self.attached.with(AttachFlags::CAPS);
        }

        if missing.contains(AttachFlags::CGROUP) {
            if let Some(path) = process.cgroup_path()? {
                self.buf.append_str(ItemType::Cgroup, &path);
                self.attached = self.attached.with(AttachFlags::CGROUP);
            }
        }

        if missing.contains(AttachFlags::AUDIT) {
            if let Some(audit) = process.audit()? {
                let mut payload = [0u8; 16];
                payload[..8].copy_from_slice(&audit.loginuid.to_le_bytes());
                payload[8..].copy_from_slice(&audit.sessionid.to_le_bytes());
                self.buf.append_bytes(ItemType::Audit, &payload);
                self.attached = self.attached.with(AttachFlags::AUDIT);
            }
        }

        if missing.contains(AttachFlags::SECLABEL) {
            if let Some(label) = process.seclabel()? {
                if !label.is_empty() {
                    self.buf.append_bytes(ItemType::Seclabel, &label);
                }
                self.attached = self.attached.with(AttachFlags::SECLABEL);
            }
        }

        if missing.contains(AttachFlags::CONN_NAME) {
            if let Some(conn) = conn {
                if let Some(label) = conn.label() {
                    self.buf.append_str(ItemType::ConnName, &label);
                }
                self.attached = self.attached.with(AttachFlags::CONN_NAME);
            }
        }

        Ok(())
    }

    fn append_timestamp(&mut self, clock: &dyn Clock, seq: u64) {
        let region = self.buf.append(ItemType::Timestamp, 24);
        let seqnum = if seq > 0 { seq } else { 0 };
        region[..8].copy_from_slice(&seqnum.to_le_bytes());
        region[8..16].copy_from_slice(&clock.monotonic_ns().to_le_bytes());
        region[16..24].copy_from_slice(&clock.realtime_ns().to_le_bytes());
    }
}
