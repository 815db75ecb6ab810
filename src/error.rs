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

//! Error types for message classification, transaction bookkeeping and dispatch.

use crate::transaction::TransactionStatus;
use thiserror::Error;

/// Inbound SMS classification errors.
///
/// None of these are fatal: the message is simply not turned into a
/// transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Body does not match any known payment format
    #[error("invalid message format")]
    InvalidMessageFormat,

    /// Sender is not a configured payment or site-link sender
    #[error("invalid sender: {0}")]
    InvalidSender(String),

    /// Carrier reported that a bundle recommendation timed out
    #[error("recommendation timed out")]
    RecommendationTimedOut,
}

/// Transaction bookkeeping errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    /// Referenced transaction ID does not exist
    #[error("transaction not found")]
    TransactionNotFound,

    /// Transaction is already in the dispatch queue
    #[error("duplicate transaction ID")]
    DuplicateTransaction,

    /// Requested status change is not an edge of the status machine
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    /// Only scheduled transactions can be dispatched
    #[error("transaction in status {0} cannot be dispatched")]
    NotDispatchable(TransactionStatus),

    /// Only failed transactions can be retried
    #[error("transaction is not retryable")]
    NotRetryable,

    /// Referenced offer does not exist
    #[error("offer not found")]
    OfferNotFound,

    /// Offer definition is malformed
    #[error("invalid offer: {0}")]
    InvalidOffer(String),

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// No customer is recorded for the phone number
    #[error("customer not found")]
    CustomerNotFound,

    /// Phone number cannot be normalized
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
}

/// Errors from platform ports (telephony, SMS, listener link, network).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("platform error: {0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Dispatch errors surfaced to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Device permissions are missing; they were requested and the caller
    /// must re-invoke after the grant
    #[error("missing permissions: {}", .0.join(", "))]
    PermissionDenied(Vec<String>),

    /// No subscription plan is active
    #[error("no active subscription plan")]
    NoActivePlan,

    /// Configured SIM slot has no active SIM
    #[error("no active SIM in slot {0}")]
    NoActiveSim(u8),

    /// Configured SIM slot is not 1 or 2
    #[error("invalid subscription id for SIM slot {0}")]
    InvalidSubscriptionId(u8),

    /// The job scheduler was shut down, so no dial can run
    #[error("dial scheduler is shut down")]
    SchedulerShutDown,

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Configuration loading errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}
