// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Thread-safe dispatch queue with deduplication by transaction id.
//!
//! Holds the transactions waiting to be forwarded to a connected listener
//! app. Identity is the transaction id alone, so a transaction whose fields
//! changed since it was queued is still recognised as a duplicate.

use crate::base::TransactionId;
use crate::error::TransactionError;
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe FIFO of transaction ids with duplicate detection.
///
/// Combines a [`DashMap`] for O(1) membership with a [`SegQueue`] that keeps
/// insertion order. Removal is lazy: [`remove`](Self::remove) drops the map
/// entry and the stale queue slot is discarded on the next
/// [`snapshot`](Self::snapshot). Each insert gets a fresh sequence number so
/// a removed-then-requeued id is not reported twice.
#[derive(Debug)]
pub struct TransactionQueue {
    /// Queued ids mapped to the sequence number of their live slot.
    members: DashMap<TransactionId, u64>,

    /// Slots in FIFO order, possibly stale.
    order: SegQueue<(TransactionId, u64)>,

    sequence: AtomicU64,

    /// Serializes snapshots; each one drains and refills `order`.
    compaction: Mutex<()>,
}

impl TransactionQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            order: SegQueue::new(),
            sequence: AtomicU64::new(0),
            compaction: Mutex::new(()),
        }
    }

    /// Adds a transaction id to the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::DuplicateTransaction`] if the id is
    /// already queued; the queue is left unchanged.
    pub fn push(&self, transaction_id: TransactionId) -> Result<(), TransactionError> {
        // Entry API makes check-and-insert atomic per id.
        match self.members.entry(transaction_id) {
            Entry::Occupied(_) => Err(TransactionError::DuplicateTransaction),
            Entry::Vacant(entry) => {
                let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
                entry.insert(seq);
                self.order.push((transaction_id, seq));
                Ok(())
            }
        }
    }

    /// Removes an id. Returns whether it was queued.
    pub fn remove(&self, transaction_id: TransactionId) -> bool {
        self.members.remove(&transaction_id).is_some()
    }

    pub fn contains(&self, transaction_id: TransactionId) -> bool {
        self.members.contains_key(&transaction_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns the queued ids in FIFO order.
    ///
    /// Stale slots are compacted away. Ids pushed concurrently with the
    /// snapshot may land ahead of older survivors but are never lost.
    pub fn snapshot(&self) -> Vec<TransactionId> {
        let _guard = self.compaction.lock();
        let mut pending = Vec::with_capacity(self.order.len());
        while let Some(slot) = self.order.pop() {
            pending.push(slot);
        }

        let mut live = Vec::with_capacity(pending.len());
        for (transaction_id, seq) in pending {
            let current = self.members.get(&transaction_id).map(|entry| *entry);
            if current == Some(seq) {
                self.order.push((transaction_id, seq));
                live.push(transaction_id);
            }
        }
        live
    }
}

impl Default for TransactionQueue {
    fn default() -> Self {
        Self::new()
    }
}
