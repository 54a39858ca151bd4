// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Implement the bus container, its connection table, and make validation.
// Author: Lukas Bower

//! A bus: one domain of discourse within a namespace.
//!
//! A bus owns its endpoints and its name registry; connections are owned by
//! their client handles and only linked into the table here. Connection ids
//! start at 1 because id 0 is the broker itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::command::{BusMakeCmd, HelloCmd};
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::names::{AcquireReply, NameRegistry};
use crate::ns::Namespace;
use crate::host::ProcessSource;

/// Bus make flag: endpoints skip access-policy checks.
pub const BUS_MAKE_POLICY_OPEN: u64 = 1 << 0;

#[derive(Debug)]
struct BusState {
    connected: bool,
    conn_id_next: u64,
    seq_last: u64,
    ns: Option<Arc<Namespace>>,
    endpoints: Vec<Arc<Endpoint>>,
    connections: HashMap<u64, Arc<Connection>>,
}

/// One message bus within a namespace.
#[derive(Debug)]
pub struct Bus {
    id: u64,
    name: String,
    flags: u64,
    bloom_size: u64,
    cgroup_id: Option<u64>,
    devpath: String,
    registry: NameRegistry,
    state: Mutex<BusState>,
}

impl Bus {
    /// Create a bus from a validated make command.
    ///
    /// Enforces the caller-uid name prefix, sibling uniqueness within the
    /// namespace, and creates the default endpoint "bus" inheriting the
    /// requested mode, uid, gid, and the policy-open bus flag. The bus is
    /// observable to concurrent lookups once linked into the namespace.
    pub(crate) fn make(
        ns: &Arc<Namespace>,
        cmd: &BusMakeCmd,
        mode: u32,
        uid: u64,
        gid: u64,
    ) -> Result<Arc<Bus>> {
        let prefix = format!("{uid}-");
        if !cmd.name.starts_with(&prefix) {
            return Err(Error::PermissionDenied("bus name lacks caller uid prefix"));
        }

        let bus = ns.link_bus(&cmd.name, |id| {
            let bus = Arc::new(Bus {
                id,
                name: cmd.name.clone(),
                flags: cmd.flags,
                bloom_size: cmd.bloom_size,
                cgroup_id: cmd.cgroup_id,
                devpath: ns.devpath().to_owned(),
                registry: NameRegistry::new(),
                state: Mutex::new(BusState {
                    connected: true,
                    conn_id_next: 1,
                    seq_last: 0,
                    ns: Some(ns.clone()),
                    endpoints: Vec::new(),
                    connections: HashMap::new(),
                }),
            });
            let policy_open = cmd.flags & BUS_MAKE_POLICY_OPEN != 0;
            let ep = Endpoint::new("bus", mode, uid, gid, policy_open, bus.clone());
            bus.lock().endpoints.push(ep);
            bus
        })?;

        info!("created bus {} '{}/{}'", bus.id, bus.devpath, bus.name);
        Ok(bus)
    }

    /// Return the bus id within its namespace.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Return the bus name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the bus behaviour flags.
    #[must_use]
    pub fn flags(&self) -> u64 {
        self.flags
    }

    /// Return the bloom filter size for match items.
    #[must_use]
    pub fn bloom_size(&self) -> u64 {
        self.bloom_size
    }

    /// Return the cgroup hierarchy id sender paths are recorded from.
    #[must_use]
    pub fn cgroup_id(&self) -> Option<u64> {
        self.cgroup_id
    }

    /// Return the bus name registry.
    #[must_use]
    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    /// Return the device node path of an endpoint on this bus.
    #[must_use]
    pub fn endpoint_node(&self, ep_name: &str) -> String {
        format!("/dev/{}/{}/{}", self.devpath, self.name, ep_name)
    }

    /// Look up a live connection by id, returning a strong reference.
    #[must_use]
    pub fn lookup_conn(&self, id: u64) -> Option<Arc<Connection>> {
        self.lock().connections.get(&id).cloned()
    }

    /// Look up an endpoint by name, returning a strong reference.
    #[must_use]
    pub fn endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.lock()
            .endpoints
            .iter()
            .find(|ep| ep.name() == name)
            .cloned()
    }

    /// Create an additional endpoint on this bus.
    pub fn make_endpoint(
        self: &Arc<Self>,
        name: &str,
        mode: u32,
        uid: u64,
        gid: u64,
    ) -> Result<Arc<Endpoint>> {
        crate::names::validate_name(name)?;
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        if state.endpoints.iter().any(|ep| ep.name() == name) {
            return Err(Error::AlreadyExists("endpoint name"));
        }
        let policy_open = self.flags & BUS_MAKE_POLICY_OPEN != 0;
        let ep = Endpoint::new(name, mode, uid, gid, policy_open, self.clone());
        state.endpoints.push(ep.clone());
        Ok(ep)
    }

    /// Disconnect the bus: connections observe shutdown, endpoints close,
    /// and the bus unlinks from its namespace. Idempotent.
    pub fn disconnect(&self) {
        let (ns, endpoints, connections) = {
            let mut state = self.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            (
                state.ns.take(),
                std::mem::take(&mut state.endpoints),
                std::mem::take(&mut state.connections),
            )
        };
        for conn in connections.values() {
            conn.disconnect();
        }
        for ep in &endpoints {
            ep.disconnect();
        }
        if let Some(ns) = ns {
            ns.remove_bus(self.id);
        }
        info!("closing bus {}/{}", self.devpath, self.name);
    }

    pub(crate) fn attach_conn(
        self: &Arc<Self>,
        ep: &Arc<Endpoint>,
        process: &dyn ProcessSource,
        cmd: &HelloCmd,
    ) -> Result<Arc<Connection>> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        let id = state.conn_id_next;
        state.conn_id_next += 1;
        let conn = Connection::new(
            id,
            cmd.label.clone(),
            cmd.attach_flags,
            cmd.pool_size,
            ep.clone(),
            self.clone(),
            process,
        );
        state.connections.insert(id, conn.clone());
        Ok(conn)
    }

    pub(crate) fn remove_conn(&self, id: u64) {
        self.lock().connections.remove(&id);
    }

    pub(crate) fn remove_endpoint(&self, name: &str) {
        self.lock().endpoints.retain(|ep| ep.name() != name);
    }

    pub(crate) fn next_seq(&self) -> Result<u64> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        state.seq_last += 1;
        Ok(state.seq_last)
    }

    /// Acquire a well-known name for `conn`, keeping owner mirrors in sync.
    pub(crate) fn acquire_name(
        &self,
        conn: &Arc<Connection>,
        name: &str,
        flags: u64,
    ) -> Result<AcquireReply> {
        let (reply, preempted) = self.registry.acquire(conn.id(), name, flags)?;
        if reply == AcquireReply::Owner {
            conn.add_owned_name(name, flags);
        }
        if let Some(old) = preempted {
            if let Some(old_conn) = self.lookup_conn(old) {
                old_conn.remove_owned_name(name);
            }
        }
        Ok(reply)
    }

    /// Release a name for `conn`, promoting the head waiter if any.
    pub(crate) fn release_name(&self, conn: &Arc<Connection>, name: &str) -> Result<()> {
        let promoted = self.registry.release(conn.id(), name)?;
        conn.remove_owned_name(name);
        if let Some((promoted, flags)) = promoted {
            if let Some(promoted_conn) = self.lookup_conn(promoted) {
                promoted_conn.add_owned_name(name, flags);
            }
        }
        Ok(())
    }

    /// Release every name `conn` owns or waits on, for disconnect.
    pub(crate) fn release_names_for(&self, conn: &Arc<Connection>) {
        let changes = self.registry.release_all(conn.id());
        conn.clear_owned_names();
        for (name, promoted) in changes {
            if let Some((promoted, flags)) = promoted {
                if let Some(promoted_conn) = self.lookup_conn(promoted) {
                    promoted_conn.add_owned_name(&name, flags);
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BusState> {
        self.state.lock().expect("poisoned bus lock")
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        info!("clean up bus {}/{}", self.devpath, self.name);
    }
}
