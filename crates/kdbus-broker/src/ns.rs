// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Implement the namespace tree and the global subsystem facade.
// Author: Lukas Bower

//! Namespaces and the subsystem facade over global broker state.
//!
//! All global mutable state (the namespace list, the character-major
//! allocator, and the namespace id sequence) lives behind the single
//! subsystem lock, which sits above every per-object lock in the ordering.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::info;

use crate::bus::Bus;
use crate::command::{BusMakeCmd, NsMakeCmd};
use crate::error::{Error, Result};
use crate::limits::{CHAR_MAJOR, DYN_MAJOR_BASE};

/// Control device nodes are world accessible.
pub const CONTROL_NODE_MODE: u32 = 0o666;

#[derive(Debug)]
struct SubsystemState {
    namespaces: Vec<Arc<Namespace>>,
    majors: BTreeMap<u32, u64>,
    ns_id_next: u64,
}

#[derive(Debug)]
pub(crate) struct SubsystemShared {
    state: Mutex<SubsystemState>,
}

impl SubsystemShared {
    fn lock(&self) -> MutexGuard<'_, SubsystemState> {
        self.state.lock().expect("poisoned subsystem lock")
    }
}

/// Facade over the broker's global state, created once at init.
#[derive(Debug)]
pub struct Subsystem {
    shared: Arc<SubsystemShared>,
    root: Arc<Namespace>,
}

impl Subsystem {
    /// Initialise the subsystem and create the root namespace.
    #[must_use]
    pub fn new() -> Self {
        let shared = Arc::new(SubsystemShared {
            state: Mutex::new(SubsystemState {
                namespaces: Vec::new(),
                majors: BTreeMap::new(),
                ns_id_next: 0,
            }),
        });
        let root = Namespace::new_root(&shared);
        Self { shared, root }
    }

    /// Return a strong reference to the root namespace.
    #[must_use]
    pub fn root(&self) -> Arc<Namespace> {
        self.root.clone()
    }

    /// Disconnect every namespace, releasing majors and closing buses.
    pub fn shutdown(&self) {
        let namespaces: Vec<Arc<Namespace>> = self.shared.lock().namespaces.clone();
        for ns in namespaces {
            ns.disconnect();
        }
    }
}

impl Default for Subsystem {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct NamespaceState {
    connected: bool,
    bus_id_next: u64,
    buses: Vec<Arc<Bus>>,
}

/// A container of buses sharing a devpath prefix.
#[derive(Debug)]
pub struct Namespace {
    id: u64,
    name: Option<String>,
    devpath: String,
    major: u32,
    parent: Option<Arc<Namespace>>,
    shared: Arc<SubsystemShared>,
    state: Mutex<NamespaceState>,
}

impl Namespace {
    fn new_root(shared: &Arc<SubsystemShared>) -> Arc<Self> {
        let mut sys = shared.lock();
        let id = sys.ns_id_next;
        sys.ns_id_next += 1;
        let ns = Arc::new(Self {
            id,
            name: None,
            devpath: "kdbus".to_owned(),
            major: CHAR_MAJOR,
            parent: None,
            shared: shared.clone(),
            state: Mutex::new(NamespaceState {
                connected: true,
                bus_id_next: 0,
                buses: Vec::new(),
            }),
        });
        sys.majors.insert(CHAR_MAJOR, id);
        sys.namespaces.push(ns.clone());
        info!("created namespace {} '{}/'", id, ns.devpath);
        ns
    }

    /// Return the namespace id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Return the namespace name; the root namespace has none.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Return the devpath prefix of this namespace.
    #[must_use]
    pub fn devpath(&self) -> &str {
        &self.devpath
    }

    /// Return the registered character major.
    #[must_use]
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Return the control device node path.
    #[must_use]
    pub fn control_node(&self) -> String {
        format!("/dev/{}/control", self.devpath)
    }

    /// Create a child namespace from a validated make command.
    ///
    /// Child names are unique among siblings; the child registers its own
    /// dynamic major and composes its devpath under this namespace.
    pub fn make_child(self: &Arc<Self>, cmd: &NsMakeCmd) -> Result<Arc<Namespace>> {
        let mut sys = self.shared.lock();
        if !self.lock().connected {
            return Err(Error::Shutdown);
        }
        let duplicate = sys.namespaces.iter().any(|ns| {
            ns.parent
                .as_ref()
                .is_some_and(|parent| Arc::ptr_eq(parent, self))
                && ns.name.as_deref() == Some(cmd.name.as_str())
        });
        if duplicate {
            return Err(Error::AlreadyExists("sibling namespace name"));
        }
        let major = (DYN_MAJOR_BASE..)
            .find(|candidate| !sys.majors.contains_key(candidate))
            .expect("major space exhausted");
        let id = sys.ns_id_next;
        sys.ns_id_next += 1;
        let ns = Arc::new(Self {
            id,
            name: Some(cmd.name.clone()),
            devpath: format!("kdbus/ns/{}/{}", self.devpath, cmd.name),
            major,
            parent: Some(self.clone()),
            shared: self.shared.clone(),
            state: Mutex::new(NamespaceState {
                connected: true,
                bus_id_next: 0,
                buses: Vec::new(),
            }),
        });
        sys.majors.insert(major, id);
        sys.namespaces.push(ns.clone());
        info!("created namespace {} '{}/'", id, ns.devpath);
        Ok(ns)
    }

    /// Create a bus in this namespace from a validated make command.
    pub fn make_bus(
        self: &Arc<Self>,
        cmd: &BusMakeCmd,
        mode: u32,
        uid: u64,
        gid: u64,
    ) -> Result<Arc<Bus>> {
        Bus::make(self, cmd, mode, uid, gid)
    }

    /// Look up a bus by name, returning a strong reference.
    #[must_use]
    pub fn lookup_bus(&self, name: &str) -> Option<Arc<Bus>> {
        self.lock()
            .buses
            .iter()
            .find(|bus| bus.name() == name)
            .cloned()
    }

    /// Disconnect the namespace: unlink from the global list, release the
    /// major, and close every bus. Idempotent.
    pub fn disconnect(&self) {
        let buses = {
            let mut sys = self.shared.lock();
            let mut state = self.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            sys.namespaces.retain(|ns| ns.id != self.id);
            sys.majors.remove(&self.major);
            std::mem::take(&mut state.buses)
        };
        for bus in &buses {
            bus.disconnect();
        }
        info!("closing namespace {}", self.devpath);
    }

    /// Allocate a bus id and link the built bus, failing on sibling
    /// name collision. The id sequence is monotonic and never reused.
    pub(crate) fn link_bus(
        &self,
        name: &str,
        build: impl FnOnce(u64) -> Arc<Bus>,
    ) -> Result<Arc<Bus>> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        if state.buses.iter().any(|bus| bus.name() == name) {
            return Err(Error::AlreadyExists("bus name"));
        }
        let id = state.bus_id_next;
        state.bus_id_next += 1;
        let bus = build(id);
        state.buses.push(bus.clone());
        Ok(bus)
    }

    pub(crate) fn remove_bus(&self, id: u64) {
        self.lock().buses.retain(|bus| bus.id() != id);
    }

    fn lock(&self) -> MutexGuard<'_, NamespaceState> {
        self.state.lock().expect("poisoned namespace lock")
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        info!("clean up namespace {}", self.devpath);
    }
}
