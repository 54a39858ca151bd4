// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Provide a fuzz corpus harness for item-stream decoding.
// Author: Lukas Bower

//! Fuzz corpus harnesses for item-stream decoding.

use crate::ItemIter;

/// Exercise decoder paths on arbitrary corpus bytes.
pub fn fuzz_items(bytes: &[u8]) {
    for item in ItemIter::new(bytes) {
        let Ok(item) = item else { break };
        let _ = item.ty();
        let _ = item.as_u64();
        let _ = item.as_str();
    }
}
