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

//! Transaction records and their status machine.
//!
//! Transactions follow a directed, acyclic progression:
//! - [`Unmatched`] → [`Rescheduled`]
//! - [`Scheduled`] → [`Success`] | [`Failed`] | [`Rescheduled`]
//! - [`Failed`] → [`Rescheduled`]
//!
//! A transaction starts [`Unmatched`] when no offer resolves for the paid
//! amount and [`Scheduled`] otherwise.
//!
//! [`Unmatched`]: TransactionStatus::Unmatched
//! [`Scheduled`]: TransactionStatus::Scheduled
//! [`Success`]: TransactionStatus::Success
//! [`Failed`]: TransactionStatus::Failed
//! [`Rescheduled`]: TransactionStatus::Rescheduled

use crate::base::{CustomerId, TransactionId};
use crate::offer::Offer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Unmatched,
    Scheduled,
    Success,
    Failed,
    Rescheduled,
}

impl TransactionStatus {
    /// Whether `self → to` is an edge of the status machine.
    pub fn can_transition_to(self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, to),
            (Scheduled, Success)
                | (Scheduled, Failed)
                | (Scheduled, Rescheduled)
                | (Failed, Rescheduled)
                | (Unmatched, Rescheduled)
        )
    }

    /// A watcher stops listening once one of these is observed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Success | TransactionStatus::Failed | TransactionStatus::Rescheduled
        )
    }

    pub fn is_retryable(self) -> bool {
        self == TransactionStatus::Failed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Unmatched => "UNMATCHED",
            TransactionStatus::Scheduled => "SCHEDULED",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Rescheduled => "RESCHEDULED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a transaction came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Personal M-Pesa transfer to the agent
    Mpesa,
    /// Buy-goods till payment
    Till,
    /// Self-service purchase through the agent's storefront
    SiteLink,
    /// Dial started by the agent without a payment message
    Manual,
    /// Agent renewing their own subscription; bypasses the subscription gate
    SubscriptionRenewal,
}

impl TransactionType {
    /// Transactions paid for by a customer SMS get auto-replies.
    pub fn is_customer_paid(self) -> bool {
        matches!(
            self,
            TransactionType::Mpesa | TransactionType::Till | TransactionType::SiteLink
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Mpesa => "MPESA",
            TransactionType::Till => "TILL",
            TransactionType::SiteLink => "SITE_LINK",
            TransactionType::Manual => "MANUAL",
            TransactionType::SubscriptionRenewal => "SUBSCRIPTION_RENEWAL",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RescheduleMode {
    Once,
    /// Re-dial the same offer every renew interval after each success
    AutoRenew,
}

/// Links a rescheduled child back to the transaction it replaced.
///
/// `parent` is a lookup key only; the parent may have been deleted since.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RescheduleInfo {
    pub parent: TransactionId,
    pub time: DateTime<Utc>,
    pub mode: RescheduleMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub id: TransactionId,
    /// Raw paid amount in whole currency units.
    pub amount: i64,
    pub time: DateTime<Utc>,
    /// Raw SMS body, empty for manual dials.
    pub message: String,
    pub status: TransactionStatus,
    pub response_message: Option<String>,
    pub customer: CustomerId,
    /// Snapshot taken at creation; catalog edits never reach it.
    pub offer: Option<Offer>,
    pub kind: TransactionType,
    pub reschedule: Option<RescheduleInfo>,
}

impl Transaction {
    /// Initial status for a freshly matched (or unmatched) transaction.
    pub fn initial_status(offer: Option<&Offer>) -> TransactionStatus {
        if offer.is_some() {
            TransactionStatus::Scheduled
        } else {
            TransactionStatus::Unmatched
        }
    }

    /// Amount held against the customer's balance while the transaction
    /// awaits resolution: the offer price when failed, the raw amount when
    /// unmatched.
    pub fn reserved_amount(&self) -> Option<i64> {
        match self.status {
            TransactionStatus::Failed => self.offer.as_ref().map(|offer| offer.price),
            TransactionStatus::Unmatched => Some(self.amount),
            _ => None,
        }
    }

    pub fn is_renewal(&self) -> bool {
        self.kind == TransactionType::SubscriptionRenewal
    }
}
