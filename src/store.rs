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

//! The record of all transactions and the dispatch queue.

use crate::base::{CustomerId, TransactionId};
use crate::error::TransactionError;
use crate::offer::Offer;
use crate::transaction::{RescheduleInfo, Transaction, TransactionStatus, TransactionType};
use crate::transaction_queue::TransactionQueue;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

/// Fields of a transaction about to be created; the store assigns the id
/// and initial status.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub amount: i64,
    pub time: DateTime<Utc>,
    pub message: String,
    pub customer: CustomerId,
    pub offer: Option<Offer>,
    pub kind: TransactionType,
    pub reschedule: Option<RescheduleInfo>,
}

/// Change notifications published by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    StatusChanged {
        id: TransactionId,
        status: TransactionStatus,
        response_message: Option<String>,
    },
    Removed {
        id: TransactionId,
    },
}

impl TransactionEvent {
    pub fn id(&self) -> TransactionId {
        match self {
            TransactionEvent::StatusChanged { id, .. } | TransactionEvent::Removed { id } => *id,
        }
    }
}

/// Concurrent transaction store.
///
/// # Invariants
///
/// - Ids are allocated monotonically and never reused.
/// - Status only changes along [`TransactionStatus::can_transition_to`] edges.
/// - Removing a transaction also drops it from the dispatch queue.
#[derive(Debug)]
pub struct TransactionStore {
    transactions: DashMap<TransactionId, Transaction>,
    next_id: AtomicU64,
    queue: TransactionQueue,
    events: broadcast::Sender<TransactionEvent>,
}

impl TransactionStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transactions: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue: TransactionQueue::new(),
            events,
        }
    }

    /// Creates a transaction, `SCHEDULED` if it carries an offer and
    /// `UNMATCHED` otherwise.
    pub fn create(&self, new: NewTransaction) -> Transaction {
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let transaction = Transaction {
            id,
            amount: new.amount,
            time: new.time,
            message: new.message,
            status: Transaction::initial_status(new.offer.as_ref()),
            response_message: None,
            customer: new.customer,
            offer: new.offer,
            kind: new.kind,
            reschedule: new.reschedule,
        };
        self.transactions.insert(id, transaction.clone());
        debug!(transaction_id = %id, status = %transaction.status, "transaction_created");
        transaction
    }

    pub fn get(&self, id: TransactionId) -> Option<Transaction> {
        self.transactions.get(&id).map(|tx| tx.value().clone())
    }

    /// All transactions ordered by id.
    pub fn list(&self) -> Vec<Transaction> {
        let mut all: Vec<Transaction> = self.transactions.iter().map(|tx| tx.value().clone()).collect();
        all.sort_by_key(|tx| tx.id);
        all
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Moves a transaction to `to`, recording the response message if given.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::TransactionNotFound`] - Unknown id.
    /// - [`TransactionError::InvalidTransition`] - `to` is not reachable from
    ///   the current status.
    pub fn transition(
        &self,
        id: TransactionId,
        to: TransactionStatus,
        response_message: Option<String>,
    ) -> Result<Transaction, TransactionError> {
        let updated = {
            let mut tx = self
                .transactions
                .get_mut(&id)
                .ok_or(TransactionError::TransactionNotFound)?;
            if !tx.status.can_transition_to(to) {
                return Err(TransactionError::InvalidTransition {
                    from: tx.status,
                    to,
                });
            }
            tx.status = to;
            if response_message.is_some() {
                tx.response_message = response_message;
            }
            tx.clone()
        };

        let _ = self.events.send(TransactionEvent::StatusChanged {
            id,
            status: updated.status,
            response_message: updated.response_message.clone(),
        });
        Ok(updated)
    }

    /// Deletes a transaction and drops it from the dispatch queue.
    pub fn remove(&self, id: TransactionId) -> Result<Transaction, TransactionError> {
        let (_, removed) = self
            .transactions
            .remove(&id)
            .ok_or(TransactionError::TransactionNotFound)?;
        self.queue.remove(id);
        let _ = self.events.send(TransactionEvent::Removed { id });
        Ok(removed)
    }

    /// Queues a stored transaction for forwarding.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::TransactionNotFound`] - Unknown id.
    /// - [`TransactionError::DuplicateTransaction`] - Already queued.
    pub fn enqueue(&self, id: TransactionId) -> Result<(), TransactionError> {
        if !self.transactions.contains_key(&id) {
            return Err(TransactionError::TransactionNotFound);
        }
        self.queue.push(id)
    }

    pub fn dequeue(&self, id: TransactionId) -> bool {
        self.queue.remove(id)
    }

    pub fn queue(&self) -> &TransactionQueue {
        &self.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransactionEvent> {
        self.events.subscribe()
    }

    /// Waits until the transaction reaches a terminal status.
    ///
    /// Resolves immediately if it already has. Dropping the future drops the
    /// subscription.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::TransactionNotFound`] if the transaction
    /// does not exist or is deleted while waiting.
    pub async fn watch(&self, id: TransactionId) -> Result<TransactionStatus, TransactionError> {
        // Subscribe before reading so no transition slips between the two.
        let mut events = self.subscribe();
        let current = self.get(id).ok_or(TransactionError::TransactionNotFound)?;
        if current.status.is_terminal() {
            return Ok(current.status);
        }

        loop {
            match events.recv().await {
                Ok(TransactionEvent::StatusChanged {
                    id: changed, status, ..
                }) if changed == id && status.is_terminal() => return Ok(status),
                Ok(TransactionEvent::Removed { id: removed }) if removed == id => {
                    return Err(TransactionError::TransactionNotFound);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    let current = self.get(id).ok_or(TransactionError::TransactionNotFound)?;
                    if current.status.is_terminal() {
                        return Ok(current.status);
                    }
                }
                Err(RecvError::Closed) => return Err(TransactionError::TransactionNotFound),
            }
        }
    }
}

impl Default for TransactionStore {
    fn default() -> Self {
        Self::new()
    }
}
