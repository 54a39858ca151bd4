// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Implement the access-controlled endpoint through which clients connect.
// Author: Lukas Bower

//! Named access point on a bus.
//!
//! Mode bits gate which callers may say hello; the policy-open flag, when
//! set on the bus, bypasses the check. Disconnecting an endpoint fails new
//! hellos while existing connections keep running.

use std::sync::{Arc, Mutex};

use log::info;

use crate::bus::Bus;
use crate::command::HelloCmd;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::host::{Creds, ProcessSource};
use crate::meta::AttachFlags;

/// Reply to a successful hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloReply {
    /// Id assigned to the new connection, unique within the bus.
    pub id: u64,
    /// Metadata classes the connection will receive.
    pub attach_flags: AttachFlags,
    /// Granted receive pool size in bytes.
    pub pool_size: u64,
}

#[derive(Debug)]
struct EndpointState {
    connected: bool,
    bus: Option<Arc<Bus>>,
}

/// Named, access-controlled access point on a bus.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    mode: u32,
    uid: u64,
    gid: u64,
    policy_open: bool,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    pub(crate) fn new(
        name: &str,
        mode: u32,
        uid: u64,
        gid: u64,
        policy_open: bool,
        bus: Arc<Bus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            mode,
            uid,
            gid,
            policy_open,
            state: Mutex::new(EndpointState {
                connected: true,
                bus: Some(bus),
            }),
        })
    }

    /// Return the endpoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the device node mode bits.
    #[must_use]
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Return the owning uid of the endpoint node.
    #[must_use]
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// Return the owning gid of the endpoint node.
    #[must_use]
    pub fn gid(&self) -> u64 {
        self.gid
    }

    /// Return true when access-policy checks are bypassed.
    #[must_use]
    pub fn policy_open(&self) -> bool {
        self.policy_open
    }

    /// Return the bus this endpoint belongs to.
    pub fn bus(&self) -> Result<Arc<Bus>> {
        let state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        state.bus.clone().ok_or(Error::Shutdown)
    }

    /// Establish a new connection through this endpoint.
    ///
    /// Checks caller access against the endpoint mode, allocates the
    /// connection id under the bus lock, and links the connection into the
    /// bus table before returning the strong handle and hello reply.
    pub fn hello(
        self: &Arc<Self>,
        process: &dyn ProcessSource,
        cmd: &HelloCmd,
    ) -> Result<(Arc<Connection>, HelloReply)> {
        let bus = self.bus()?;
        let creds = process.creds();
        if !self.access_allowed(&creds) {
            return Err(Error::PermissionDenied("endpoint mode denies caller"));
        }
        let conn = bus.attach_conn(self, process, cmd)?;
        let reply = HelloReply {
            id: conn.id(),
            attach_flags: cmd.attach_flags,
            pool_size: cmd.pool_size,
        };
        info!(
            "connection {} established at endpoint '{}'",
            conn.id(),
            self.name
        );
        Ok((conn, reply))
    }

    /// Disconnect the endpoint: new hellos fail with shutdown, existing
    /// connections survive. Idempotent.
    pub fn disconnect(&self) {
        let bus = {
            let mut state = self.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            state.bus.take()
        };
        if let Some(bus) = bus {
            bus.remove_endpoint(&self.name);
        }
        info!("closing endpoint '{}'", self.name);
    }

    fn access_allowed(&self, creds: &Creds) -> bool {
        if self.policy_open {
            return true;
        }
        if creds.uid == 0 {
            return true;
        }
        if creds.uid == self.uid && self.mode & 0o600 == 0o600 {
            return true;
        }
        if creds.gid == self.gid && self.mode & 0o060 == 0o060 {
            return true;
        }
        self.mode & 0o006 == 0o006
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EndpointState> {
        self.state.lock().expect("poisoned endpoint lock")
    }
}
