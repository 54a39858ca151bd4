// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide kdbus item-stream wire types and codec primitives.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![no_std]

//! Item-stream wire types and codec primitives shared by the kdbus broker
//! crates. Every command and every message on the bus is framed as a stream
//! of 8-byte-aligned `{size, type, payload}` records; this crate owns the
//! bounds-checked decoder and the append-only encoder for those streams.

extern crate alloc;

#[cfg(test)]
extern crate std;

mod fuzz;
mod item;
mod stream;

pub use fuzz::fuzz_items;
pub use item::{align8, ItemType, WireError, ITEM_HEADER_SIZE, PAYLOAD_PAD_ONLY};
pub use stream::{Item, ItemBuf, ItemIter};
