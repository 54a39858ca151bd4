// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared fake host fixtures and command builders for broker tests.
// Author: Lukas Bower
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};

use kdbus_broker::{
    AuditIds, CapSets, Clock, Creds, HostQuery, NsId, ProcessSource, BUS_MAKE_HEADER,
    HELLO_HEADER, NS_MAKE_HEADER,
};
use kdbus_broker::Error;
use kdbus_wire::{ItemBuf, ItemType};

/// Deterministic clock fixture.
pub struct FixedClock {
    pub monotonic: u64,
    pub realtime: u64,
}

impl FixedClock {
    pub fn new(monotonic: u64, realtime: u64) -> Self {
        Self {
            monotonic,
            realtime,
        }
    }
}

impl Clock for FixedClock {
    fn monotonic_ns(&self) -> u64 {
        self.monotonic
    }

    fn realtime_ns(&self) -> u64 {
        self.realtime
    }
}

/// Deterministic caller identity fixture.
pub struct FakeProcess {
    pub creds: Creds,
    pub pid_ns: u64,
    pub user_ns: u64,
    pub auxgroups: Vec<u64>,
    pub tgid_comm: String,
    pub tid_comm: String,
    pub exe: Option<String>,
    pub exe_fails: AtomicBool,
    pub cmdline: Option<Vec<u8>>,
    pub caps: CapSets,
    pub last_cap: u32,
    pub cgroup: Option<String>,
    pub audit: Option<AuditIds>,
    pub seclabel: Option<Vec<u8>>,
}

impl FakeProcess {
    pub fn with_uid(uid: u64) -> Self {
        Self {
            creds: Creds {
                uid,
                gid: uid,
                pid: 42,
                tid: 43,
                starttime: 1_000,
            },
            pid_ns: 1,
            user_ns: 1,
            auxgroups: vec![uid, uid + 1],
            tgid_comm: "daemon".to_owned(),
            tid_comm: "daemon-worker".to_owned(),
            exe: Some("/usr/bin/daemon".to_owned()),
            exe_fails: AtomicBool::new(false),
            cmdline: Some(b"daemon\0--verbose\0".to_vec()),
            caps: CapSets {
                inheritable: 0,
                permitted: 0xff,
                effective: 0x0f,
                bounding: 0xff,
            },
            last_cap: 40,
            cgroup: Some("/system/daemon".to_owned()),
            audit: Some(AuditIds {
                loginuid: uid,
                sessionid: 7,
            }),
            seclabel: Some(b"system_u:system_r:daemon_t".to_vec()),
        }
    }

    pub fn set_exe_fails(&self, fails: bool) {
        self.exe_fails.store(fails, Ordering::SeqCst);
    }
}

impl ProcessSource for FakeProcess {
    fn pid_ns(&self) -> NsId {
        NsId::from_raw(self.pid_ns)
    }

    fn user_ns(&self) -> NsId {
        NsId::from_raw(self.user_ns)
    }

    fn creds(&self) -> Creds {
        self.creds
    }

    fn auxgroups(&self) -> Vec<u64> {
        self.auxgroups.clone()
    }

    fn tgid_comm(&self) -> String {
        self.tgid_comm.clone()
    }

    fn tid_comm(&self) -> String {
        self.tid_comm.clone()
    }

    fn exe(&self) -> HostQuery<String> {
        if self.exe_fails.load(Ordering::SeqCst) {
            return Err(Error::BadAddress);
        }
        Ok(self.exe.clone())
    }

    fn cmdline(&self) -> HostQuery<Vec<u8>> {
        Ok(self.cmdline.clone())
    }

    fn caps(&self) -> CapSets {
        self.caps
    }

    fn last_cap(&self) -> u32 {
        self.last_cap
    }

    fn cgroup_path(&self) -> HostQuery<String> {
        Ok(self.cgroup.clone())
    }

    fn audit(&self) -> HostQuery<AuditIds> {
        Ok(self.audit)
    }

    fn seclabel(&self) -> HostQuery<Vec<u8>> {
        Ok(self.seclabel.clone())
    }
}

/// Encode a bus-make command buffer with a single name item.
pub fn bus_make_bytes(name: &str, bloom_size: u64) -> Vec<u8> {
    let mut items = ItemBuf::new();
    items.append_str(ItemType::MakeName, name);
    bus_make_bytes_with(bloom_size, items.as_slice())
}

/// Encode a bus-make command buffer around a prepared item stream.
pub fn bus_make_bytes_with(bloom_size: u64, items: &[u8]) -> Vec<u8> {
    let size = (BUS_MAKE_HEADER + items.len()) as u64;
    let mut buf = Vec::with_capacity(size as usize);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(&bloom_size.to_le_bytes());
    buf.extend_from_slice(items);
    buf
}

/// Encode a namespace-make command buffer.
pub fn ns_make_bytes(name: &str) -> Vec<u8> {
    let mut items = ItemBuf::new();
    items.append_str(ItemType::MakeName, name);
    let size = (NS_MAKE_HEADER + items.len()) as u64;
    let mut buf = Vec::with_capacity(size as usize);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(items.as_slice());
    buf
}

/// Encode a hello command buffer.
pub fn hello_bytes(label: Option<&str>, attach_flags: u64, pool_size: u64) -> Vec<u8> {
    let mut items = ItemBuf::new();
    if let Some(label) = label {
        items.append_str(ItemType::ConnName, label);
    }
    items.append_u64(ItemType::AttachFlags, attach_flags);
    items.append_u64(ItemType::PoolSize, pool_size);
    let size = (HELLO_HEADER + items.len()) as u64;
    let mut buf = Vec::with_capacity(size as usize);
    buf.extend_from_slice(&size.to_le_bytes());
    buf.extend_from_slice(&0u64.to_le_bytes());
    buf.extend_from_slice(items.as_slice());
    buf
}
