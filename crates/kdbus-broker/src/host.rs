// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Abstract host-provided process identity behind broker traits.
// Author: Lukas Bower

//! Host abstraction for clocks and caller process identity.
//!
//! The broker core never queries the operating system directly; each entry
//! point receives the calling process as a [`ProcessSource`] so tests can
//! supply deterministic identities the same way they supply a fixed clock.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// Time source used for message timestamps.
pub trait Clock: Send + Sync {
    /// Monotonic nanoseconds since an arbitrary origin.
    fn monotonic_ns(&self) -> u64;
    /// Wall-clock nanoseconds since the Unix epoch.
    fn realtime_ns(&self) -> u64;
}

/// System clock backed by `Instant` and `SystemTime`.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a system clock anchored at construction time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn realtime_ns(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// Opaque pid- or user-namespace handle identity; compared, never dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NsId(u64);

impl NsId {
    /// Wrap a raw host namespace identity.
    #[must_use]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Return the raw host namespace identity.
    #[must_use]
    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// Caller credentials, already rendered in the caller's user namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Creds {
    /// User id.
    pub uid: u64,
    /// Group id.
    pub gid: u64,
    /// Process id.
    pub pid: u64,
    /// Thread id.
    pub tid: u64,
    /// Process start time.
    pub starttime: u64,
}

/// The four capability sets of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapSets {
    /// Inheritable set.
    pub inheritable: u64,
    /// Permitted set.
    pub permitted: u64,
    /// Effective set.
    pub effective: u64,
    /// Bounding set.
    pub bounding: u64,
}

impl CapSets {
    /// Clear bits above the host's advertised last capability.
    #[must_use]
    pub fn masked(self, last_cap: u32) -> Self {
        let mask = if last_cap >= 63 {
            u64::MAX
        } else {
            (1u64 << (last_cap + 1)) - 1
        };
        Self {
            inheritable: self.inheritable & mask,
            permitted: self.permitted & mask,
            effective: self.effective & mask,
            bounding: self.bounding & mask,
        }
    }
}

/// Audit identity of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditIds {
    /// Login uid, rendered in the caller's user namespace.
    pub loginuid: u64,
    /// Audit session id.
    pub sessionid: u64,
}

/// Outcome of an optional host facility query.
///
/// `Ok(None)` models an absent or unsupported facility and is silently
/// skipped by collectors; `Err` models a transient failure the caller may
/// retry.
pub type HostQuery<T> = Result<Option<T>>;

/// Identity of the process currently calling into the broker.
pub trait ProcessSource: Send + Sync {
    /// Pid namespace the process lives in.
    fn pid_ns(&self) -> NsId;
    /// User namespace credentials are rendered in.
    fn user_ns(&self) -> NsId;
    /// Credentials of the calling thread.
    fn creds(&self) -> Creds;
    /// Supplementary group ids, rendered in the caller's user namespace.
    fn auxgroups(&self) -> Vec<u64>;
    /// Comm string of the thread-group leader.
    fn tgid_comm(&self) -> String;
    /// Comm string of the calling thread.
    fn tid_comm(&self) -> String;
    /// Absolute path of the process executable.
    fn exe(&self) -> HostQuery<String>;
    /// Raw argv area of the process, at most one page.
    fn cmdline(&self) -> HostQuery<Vec<u8>>;
    /// Capability sets of the calling thread.
    fn caps(&self) -> CapSets;
    /// Highest capability number the host defines.
    fn last_cap(&self) -> u32;
    /// Path in the cgroup hierarchy configured for the bus.
    fn cgroup_path(&self) -> HostQuery<String>;
    /// Audit login identity.
    fn audit(&self) -> HostQuery<AuditIds>;
    /// Opaque security label bytes.
    fn seclabel(&self) -> HostQuery<Vec<u8>>;
}
