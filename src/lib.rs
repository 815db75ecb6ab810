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

//! # HybridConnect
//!
//! Transaction lifecycle and USSD dispatch core for agents reselling
//! mobile-network bundles. Payment SMS messages are classified, matched to
//! priced offers and turned into transactions; the coordinator gates each
//! dial on device permissions, an active subscription plan and the dial SIM,
//! then settles the carrier's response into a status, a ledger entry, an
//! auto-reply and a forward to any connected listener app.
//!
//! ## Core Components
//!
//! - [`MessageClassifier`]: Payment SMS parsing (MPESA, TILL, SITE_LINK)
//! - [`OfferCatalog`]: Priced USSD offers
//! - [`CustomerLedger`]: Customer balances with idempotent entries
//! - [`TransactionStore`]: Transactions, status machine and dispatch queue
//! - [`SubscriptionGate`]: Plan checks and token metering
//! - [`DispatchCoordinator`]: Ingestion, dispatch, reschedule, delete
//! - [`RetryForwarder`]: At-least-once forwarding of queued transactions
//!
//! Platform services (telephony, SMS, listener link) are injected through the
//! traits in [`ports`].
//!
//! ## Example
//!
//! ```
//! use hybrid_connect::{MessageClassifier, OfferCatalog, Offer, OfferId, OfferType};
//!
//! let catalog = OfferCatalog::new();
//! catalog
//!     .upsert(Offer {
//!         id: OfferId(1),
//!         name: "1GB 1hr".to_string(),
//!         ussd_code: "*180*5*2*PN*1*1#".to_string(),
//!         price: 20,
//!         offer_type: OfferType::Data,
//!         site_linked: false,
//!     })
//!     .unwrap();
//!
//! let message = MessageClassifier::default()
//!     .classify(
//!         "MPESA",
//!         "QAB1X2Y3Z4 Confirmed. Ksh20.00 received from 0712345678 John Doe on 10/1/24 at 2:30 PM",
//!     )
//!     .unwrap();
//! let offer = catalog.find_by_price(message.amount, false).unwrap();
//! assert_eq!(offer.id, OfferId(1));
//! ```
//!
//! ## Thread Safety
//!
//! Stores are internally synchronized ([`dashmap`] maps, [`parking_lot`]
//! locks) and shared through `Arc`; the coordinator runs dials as tokio
//! tasks, so it must be used from within a tokio runtime.

mod base;
pub mod config;
mod coordinator;
pub mod customer;
mod dial_response;
pub mod error;
mod forwarder;
mod message;
mod offer;
pub mod ports;
mod scheduler;
pub mod sms;
mod store;
mod subscription;
mod transaction;
mod transaction_queue;

pub use base::{CustomerId, OfferId, TransactionId, normalize_phone};
pub use config::{AutoReplySettings, Settings};
pub use coordinator::{
    DispatchCoordinator, DispatchTicket, InboundSms, NO_PLAN_MESSAGE, Submission, dial_job_name,
};
pub use customer::{Customer, CustomerLedger, EntryKind};
pub use dial_response::{DialOutcome, classify_response};
pub use error::{ConfigError, DispatchError, MessageError, PlatformError, TransactionError};
pub use forwarder::{FORWARD_JOB, ForwardReport, RetryForwarder};
pub use message::{ClassifiedMessage, MessageClassifier, MessageKind};
pub use offer::{Offer, OfferCatalog, OfferType, PHONE_PLACEHOLDER};
pub use ports::Platform;
pub use scheduler::{ExistingJobPolicy, JobScheduler};
pub use store::{NewTransaction, TransactionEvent, TransactionStore};
pub use subscription::{SYNC_JOB, SubscriptionGate, SubscriptionPlan, SubscriptionSync, TokenCharge};
pub use transaction::{
    RescheduleInfo, RescheduleMode, Transaction, TransactionStatus, TransactionType,
};
pub use transaction_queue::TransactionQueue;
