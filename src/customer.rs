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

//! Customer records and the balance ledger.
//!
//! Every balance change is an entry keyed by `(transaction, kind)`, so
//! replaying the same completion or deletion never double counts:
//!
//! ```text
//!  payment SMS ─► Payment  (+amount)
//!  unmatched   ─► Charge   (-amount)
//!  dial result ─► Charge   (-offer price)
//!  delete / reschedule of FAILED|UNMATCHED ─► Release (+reserved)
//! ```
//!
//! # Example
//!
//! ```
//! use hybrid_connect::{CustomerLedger, EntryKind, TransactionId};
//!
//! let ledger = CustomerLedger::new();
//! let id = ledger.get_or_create("0712345678", "John Doe").unwrap();
//! ledger.apply(&id, TransactionId(1), EntryKind::Payment, 20).unwrap();
//! assert_eq!(ledger.balance(&id), Some(20));
//! ```

use crate::base::{CustomerId, TransactionId};
use crate::error::TransactionError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde::Deserialize;
use std::collections::HashSet;

/// Kind of balance entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Money received from the customer
    Payment,
    /// Offer price (or unmatched amount) held against the payment
    Charge,
    /// Reversal of a charge when a failed or unmatched transaction goes away
    Release,
}

impl EntryKind {
    fn signed(self, amount: i64) -> i64 {
        match self {
            EntryKind::Payment | EntryKind::Release => amount,
            EntryKind::Charge => -amount,
        }
    }
}

#[derive(Debug)]
struct CustomerData {
    id: CustomerId,
    name: String,
    balance: i64,
    last_purchase_time: Option<DateTime<Utc>>,
    /// Entries already applied, for idempotency.
    applied: HashSet<(TransactionId, EntryKind)>,
}

impl CustomerData {
    fn new(id: CustomerId, name: String) -> Self {
        Self {
            id,
            name,
            balance: 0,
            last_purchase_time: None,
            applied: HashSet::new(),
        }
    }

    fn apply(
        &mut self,
        transaction_id: TransactionId,
        kind: EntryKind,
        amount: i64,
    ) -> Result<bool, TransactionError> {
        if amount <= 0 {
            return Err(TransactionError::InvalidAmount);
        }
        if !self.applied.insert((transaction_id, kind)) {
            return Ok(false);
        }
        self.balance += kind.signed(amount);
        Ok(true)
    }
}

/// A customer known by phone number.
#[derive(Debug)]
pub struct Customer {
    inner: Mutex<CustomerData>,
}

impl Customer {
    pub fn new(id: CustomerId, name: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(CustomerData::new(id, name.into())),
        }
    }

    pub fn id(&self) -> CustomerId {
        self.inner.lock().id.clone()
    }

    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    /// Signed balance; negative means the customer owes the agent.
    pub fn balance(&self) -> i64 {
        self.inner.lock().balance
    }

    pub fn last_purchase_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_purchase_time
    }

    /// Applies a balance entry.
    ///
    /// Returns `Ok(false)` without touching the balance when the same
    /// `(transaction_id, kind)` was applied before.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::InvalidAmount`] for non-positive amounts.
    pub fn apply(
        &self,
        transaction_id: TransactionId,
        kind: EntryKind,
        amount: i64,
    ) -> Result<bool, TransactionError> {
        self.inner.lock().apply(transaction_id, kind, amount)
    }

    pub fn record_purchase(&self, time: DateTime<Utc>) {
        let mut data = self.inner.lock();
        if data.last_purchase_time.is_none_or(|last| last < time) {
            data.last_purchase_time = Some(time);
        }
    }

    fn rename_if_unknown(&self, name: &str) {
        let mut data = self.inner.lock();
        if data.name.is_empty() && !name.is_empty() {
            data.name = name.to_string();
        }
    }
}

impl Serialize for Customer {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Customer", 5)?;
        state.serialize_field("id", &data.id)?;
        state.serialize_field("name", &data.name)?;
        state.serialize_field("phone", &data.id.local())?;
        state.serialize_field("account_balance", &data.balance)?;
        state.serialize_field("last_purchase_time", &data.last_purchase_time)?;
        state.end()
    }
}

/// Customers keyed by normalized phone number.
#[derive(Debug, Default)]
pub struct CustomerLedger {
    customers: DashMap<CustomerId, Customer>,
}

impl CustomerLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the customer for a phone number, creating it on first sight.
    ///
    /// An existing customer with no name picks up `name`.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::InvalidPhone`] if the number cannot be
    /// normalized.
    pub fn get_or_create(&self, phone: &str, name: &str) -> Result<CustomerId, TransactionError> {
        let id = CustomerId::from_phone(phone)
            .ok_or_else(|| TransactionError::InvalidPhone(phone.to_string()))?;
        let customer = self
            .customers
            .entry(id.clone())
            .or_insert_with(|| Customer::new(id.clone(), name.trim()));
        customer.rename_if_unknown(name.trim());
        Ok(id)
    }

    /// Applies a balance entry to an existing customer.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::CustomerNotFound`] - No such customer.
    /// - [`TransactionError::InvalidAmount`] - Amount is not positive.
    pub fn apply(
        &self,
        customer: &CustomerId,
        transaction_id: TransactionId,
        kind: EntryKind,
        amount: i64,
    ) -> Result<bool, TransactionError> {
        self.customers
            .get(customer)
            .ok_or(TransactionError::CustomerNotFound)?
            .apply(transaction_id, kind, amount)
    }

    pub fn record_purchase(
        &self,
        customer: &CustomerId,
        time: DateTime<Utc>,
    ) -> Result<(), TransactionError> {
        self.customers
            .get(customer)
            .ok_or(TransactionError::CustomerNotFound)?
            .record_purchase(time);
        Ok(())
    }

    pub fn balance(&self, customer: &CustomerId) -> Option<i64> {
        self.customers.get(customer).map(|c| c.balance())
    }

    pub fn get(
        &self,
        customer: &CustomerId,
    ) -> Option<dashmap::mapref::one::Ref<'_, CustomerId, Customer>> {
        self.customers.get(customer)
    }

    pub fn customers(
        &self,
    ) -> impl Iterator<Item = dashmap::mapref::multiple::RefMulti<'_, CustomerId, Customer>> {
        self.customers.iter()
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}
