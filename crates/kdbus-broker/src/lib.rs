// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Public kdbus broker interface wiring the object graph together.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Core of the kdbus IPC broker: namespaces containing buses, buses
//! containing endpoints and a name registry, and connections established
//! through endpoints. Commands arrive as untrusted item streams decoded by
//! [`command`]; sender identity is captured on demand by [`meta`] through
//! the host traits in [`host`]. The character-device plumbing, the mmap
//! transport, and the match database live outside this crate and are
//! reached only through their contracts.

mod bus;
mod command;
mod connection;
mod endpoint;
mod error;
mod host;
pub mod limits;
mod meta;
mod names;
mod ns;
mod pool;

pub use bus::{Bus, BUS_MAKE_POLICY_OPEN};
pub use command::{
    BusMakeCmd, HelloCmd, NsMakeCmd, BUS_MAKE_HEADER, HELLO_HEADER, NS_MAKE_HEADER,
};
pub use connection::{Connection, Destination, Received};
pub use endpoint::{Endpoint, HelloReply};
pub use error::{Error, Result};
pub use host::{AuditIds, CapSets, Clock, Creds, HostQuery, NsId, ProcessSource, SystemClock};
pub use meta::{AttachFlags, Metadata};
pub use names::{
    AcquireReply, NameListEntry, NameRegistry, NAME_QUEUE, NAME_REPLACE_EXISTING,
};
pub use ns::{Namespace, Subsystem, CONTROL_NODE_MODE};
pub use pool::Pool;
