// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Implement the per-client connection identity and message conduit.
// Author: Lukas Bower

//! One client identity on a bus.
//!
//! A connection carries a bus-unique id, an optional diagnostic label, the
//! names it owns, the metadata classes it agreed to receive, and its receive
//! pool. Delivered records are item streams: a payload-vector record
//! pointing at the payload slice in the pool (or the pad-only sentinel for
//! empty payloads) followed by the sender metadata the recipient asked for.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use kdbus_wire::{ItemBuf, ItemType, PAYLOAD_PAD_ONLY};
use log::{debug, info};

use crate::bus::Bus;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::host::{Clock, ProcessSource};
use crate::meta::{AttachFlags, Metadata};
use crate::names::{AcquireReply, NameListEntry};
use crate::pool::Pool;

/// Message destination: a connection id or a well-known name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination<'a> {
    /// Numeric connection id; 0 addresses the broker and is rejected.
    Id(u64),
    /// Well-known name resolved through the bus registry.
    Name(&'a str),
}

/// One record waiting in or handed out of a receive queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    /// Pool offset of the delivered record.
    pub offset: u64,
    /// Record size in bytes.
    pub size: u64,
    /// Connection id of the sender.
    pub sender: u64,
}

#[derive(Debug)]
struct ConnState {
    connected: bool,
    attach_flags: AttachFlags,
    names: Vec<(String, u64)>,
    endpoint: Option<Arc<Endpoint>>,
    bus: Option<Arc<Bus>>,
    pool: Pool,
    queue: VecDeque<Received>,
    outstanding: HashMap<u64, Option<u64>>,
    matches: Vec<u64>,
    meta: Metadata,
}

/// A client handle on a bus.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    label: Option<String>,
    state: Mutex<ConnState>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        label: Option<String>,
        attach_flags: AttachFlags,
        pool_size: u64,
        endpoint: Arc<Endpoint>,
        bus: Arc<Bus>,
        process: &dyn ProcessSource,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            label,
            state: Mutex::new(ConnState {
                connected: true,
                attach_flags,
                names: Vec::new(),
                endpoint: Some(endpoint),
                bus: Some(bus),
                pool: Pool::new(pool_size),
                queue: VecDeque::new(),
                outstanding: HashMap::new(),
                matches: Vec::new(),
                meta: Metadata::new(process),
            }),
        })
    }

    /// Return the bus-unique connection id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Return the diagnostic label, if the client supplied one.
    #[must_use]
    pub fn label(&self) -> Option<String> {
        self.label.clone()
    }

    /// Return the metadata classes this connection accepts.
    #[must_use]
    pub fn attach_flags(&self) -> AttachFlags {
        self.lock().attach_flags
    }

    /// Snapshot the names this connection currently owns.
    #[must_use]
    pub fn names_snapshot(&self) -> Vec<(String, u64)> {
        self.lock().names.clone()
    }

    /// Replace the accepted metadata class mask.
    pub fn update_attach_flags(&self, flags: AttachFlags) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        state.attach_flags = flags;
        Ok(())
    }

    /// Register a match cookie for the external match database.
    pub fn add_match(&self, cookie: u64) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        state.matches.push(cookie);
        Ok(())
    }

    /// Remove a previously registered match cookie.
    pub fn remove_match(&self, cookie: u64) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        let before = state.matches.len();
        state.matches.retain(|existing| *existing != cookie);
        if state.matches.len() == before {
            return Err(Error::BadMessage("unknown match cookie"));
        }
        Ok(())
    }

    /// Acquire a well-known name on the bus.
    pub fn acquire_name(self: &Arc<Self>, name: &str, flags: u64) -> Result<AcquireReply> {
        let bus = self.bus()?;
        bus.acquire_name(self, name, flags)
    }

    /// Release a well-known name held or waited on by this connection.
    pub fn release_name(self: &Arc<Self>, name: &str) -> Result<()> {
        let bus = self.bus()?;
        bus.release_name(self, name)
    }

    /// List the bus name registry.
    pub fn list_names(&self) -> Result<Vec<NameListEntry>> {
        Ok(self.bus()?.registry().list())
    }

    /// Send `payload` to `dst`, attaching the metadata classes the
    /// recipient agreed to receive. Returns the message sequence number.
    ///
    /// The core never blocks: a recipient pool that cannot take the record
    /// surfaces [`Error::TimedOut`] instead of waiting.
    pub fn send(
        &self,
        clock: &dyn Clock,
        process: &dyn ProcessSource,
        dst: Destination<'_>,
        payload: &[u8],
        _timeout_ns: u64,
    ) -> Result<u64> {
        let bus = self.bus()?;
        let recipient = match dst {
            Destination::Id(0) => {
                return Err(Error::InvalidArgument("broker is not a send destination"))
            }
            Destination::Id(id) => bus
                .lookup_conn(id)
                .ok_or(Error::BadMessage("unknown destination connection"))?,
            Destination::Name(name) => {
                let owner = bus
                    .registry()
                    .owner_of(name)
                    .ok_or(Error::BadMessage("destination name has no owner"))?;
                bus.lookup_conn(owner)
                    .ok_or(Error::BadMessage("destination name has no owner"))?
            }
        };

        let seq = bus.next_seq()?;
        let mut meta = Metadata::new(process);
        meta.append(
            recipient.attach_flags(),
            clock,
            process,
            Some(self),
            seq,
        )?;

        recipient.deliver(self.id, payload, meta.buffer())?;
        debug!(
            "connection {} sent seq {} to connection {}",
            self.id,
            seq,
            recipient.id()
        );
        Ok(seq)
    }

    /// Pop the next delivered record, if any.
    pub fn recv(&self) -> Result<Option<Received>> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        Ok(state.queue.pop_front())
    }

    /// Copy a delivered record out of the pool.
    pub fn pool_bytes(&self, offset: u64) -> Result<Vec<u8>> {
        let state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        state
            .pool
            .slice(offset)
            .map(<[u8]>::to_vec)
            .ok_or(Error::BadAddress)
    }

    /// Release a delivered record and its payload slice by pool offset.
    pub fn free(&self, offset: u64) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        let payload_offset = state
            .outstanding
            .remove(&offset)
            .ok_or(Error::BadAddress)?;
        state.pool.free(offset)?;
        if let Some(payload_offset) = payload_offset {
            state.pool.free(payload_offset)?;
        }
        Ok(())
    }

    /// Collect the requested classes into this connection's own metadata
    /// object and return the buffer, for conn-info queries.
    pub fn info(
        &self,
        which: AttachFlags,
        clock: &dyn Clock,
        process: &dyn ProcessSource,
    ) -> Result<Vec<u8>> {
        // Collect outside our own lock; the collector re-enters it for the
        // owned-names snapshot.
        let mut meta = {
            let state = self.lock();
            if !state.connected {
                return Err(Error::Shutdown);
            }
            state.meta.clone()
        };
        meta.append(which, clock, process, Some(self), 0)?;
        let bytes = meta.buffer().to_vec();
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        state.meta = meta;
        Ok(bytes)
    }

    /// Disconnect the connection: release owned names, unlink from the bus
    /// table, and drop the endpoint and bus back-references. Idempotent.
    pub fn disconnect(self: &Arc<Self>) {
        let (endpoint, bus) = {
            let mut state = self.lock();
            if !state.connected {
                return;
            }
            state.connected = false;
            (state.endpoint.take(), state.bus.take())
        };
        if let Some(bus) = bus.as_ref() {
            bus.release_names_for(self);
            bus.remove_conn(self.id);
        }
        drop(endpoint);
        drop(bus);
        info!("closing connection {}", self.id);
    }

    pub(crate) fn deliver(&self, sender: u64, payload: &[u8], meta_stream: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }

        let payload_offset = if payload.is_empty() {
            None
        } else {
            Some(state.pool.publish(payload).ok_or(Error::TimedOut)?)
        };

        let mut head = ItemBuf::new();
        let region = head.append(ItemType::PayloadVec, 16);
        let offset_field = payload_offset.unwrap_or(PAYLOAD_PAD_ONLY);
        region[..8].copy_from_slice(&offset_field.to_le_bytes());
        region[8..].copy_from_slice(&(payload.len() as u64).to_le_bytes());

        let mut record = head.as_slice().to_vec();
        record.extend_from_slice(meta_stream);

        let offset = match state.pool.publish(&record) {
            Some(offset) => offset,
            None => {
                if let Some(payload_offset) = payload_offset {
                    state.pool.free(payload_offset)?;
                }
                return Err(Error::TimedOut);
            }
        };
        state.outstanding.insert(offset, payload_offset);
        state.queue.push_back(Received {
            offset,
            size: record.len() as u64,
            sender,
        });
        Ok(())
    }

    pub(crate) fn add_owned_name(&self, name: &str, flags: u64) {
        let mut state = self.lock();
        if state
            .names
            .iter()
            .all(|(existing, _)| existing.as_str() != name)
        {
            state.names.push((name.to_owned(), flags));
        }
    }

    pub(crate) fn remove_owned_name(&self, name: &str) {
        self.lock()
            .names
            .retain(|(existing, _)| existing.as_str() != name);
    }

    pub(crate) fn clear_owned_names(&self) {
        self.lock().names.clear();
    }

    fn bus(&self) -> Result<Arc<Bus>> {
        let state = self.lock();
        if !state.connected {
            return Err(Error::Shutdown);
        }
        state.bus.clone().ok_or(Error::Shutdown)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnState> {
        self.state.lock().expect("poisoned connection lock")
    }
}
