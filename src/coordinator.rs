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

//! Transaction lifecycle and USSD dispatch coordination.
//!
//! The [`DispatchCoordinator`] turns payment messages into transactions,
//! gates and schedules USSD dials, and settles the outcome.
//!
//! # Dispatch
//!
//! 1. Required device permissions must be granted; otherwise they are
//!    requested and dispatch aborts with [`DispatchError::PermissionDenied`].
//! 2. A subscription plan must be active unless the transaction is a
//!    renewal; otherwise the transaction fails with [`NO_PLAN_MESSAGE`].
//! 3. The dial SIM slot must hold an active SIM.
//! 4. The transaction is queued (a duplicate aborts the dispatch), one token
//!    is metered, and a dial job is scheduled.
//! 5. The dial response settles the transaction: status, ledger charge,
//!    auto-reply and forwarding.
//!
//! # Thread Safety
//!
//! All state lives in the injected stores, each internally synchronized.
//! The coordinator is shared as `Arc<DispatchCoordinator>`.

use crate::base::{OfferId, TransactionId};
use crate::config::Settings;
use crate::customer::{CustomerLedger, EntryKind};
use crate::dial_response::{DialOutcome, classify_response};
use crate::error::{DispatchError, MessageError, TransactionError};
use crate::message::{MessageClassifier, MessageKind};
use crate::offer::{Offer, OfferCatalog};
use crate::ports::Platform;
use crate::scheduler::{ExistingJobPolicy, JobScheduler};
use crate::sms;
use crate::store::{NewTransaction, TransactionStore};
use crate::subscription::{SubscriptionGate, TokenCharge};
use crate::transaction::{
    RescheduleInfo, RescheduleMode, Transaction, TransactionStatus, TransactionType,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Response message of a transaction failed for lack of a subscription.
pub const NO_PLAN_MESSAGE: &str =
    "No active subscription plan. Subscribe to a plan to continue dispatching offers.";

/// Name of the scheduler job that dials a transaction.
pub fn dial_job_name(id: TransactionId) -> String {
    format!("dial-{id}")
}

/// When the next auto-renew dial runs, or `None` if `interval` overflows
/// the calendar.
fn renewal_time(now: DateTime<Utc>, interval: std::time::Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(interval)
        .ok()
        .and_then(|interval| now.checked_add_signed(interval))
}

/// An SMS delivered to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSms {
    pub sender: String,
    pub body: String,
    /// SIM slot the message arrived on, when the platform reports it.
    pub sim_slot: Option<u8>,
}

impl InboundSms {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            sim_slot: None,
        }
    }
}

/// A dial that has been queued and scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTicket {
    pub transaction_id: TransactionId,
    pub job: String,
    pub at: DateTime<Utc>,
    pub charge: TokenCharge,
}

/// A created transaction and, when one was attempted, its dispatch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// The transaction as created, before any dial.
    pub transaction: Transaction,
    pub dispatch: Option<Result<DispatchTicket, DispatchError>>,
}

type DispatchFuture = Pin<Box<dyn Future<Output = Result<DispatchTicket, DispatchError>> + Send>>;

pub struct DispatchCoordinator {
    settings: Settings,
    classifier: MessageClassifier,
    offers: Arc<OfferCatalog>,
    customers: Arc<CustomerLedger>,
    store: Arc<TransactionStore>,
    gate: Arc<SubscriptionGate>,
    platform: Platform,
    scheduler: Arc<JobScheduler>,
}

impl DispatchCoordinator {
    pub fn new(
        settings: Settings,
        offers: Arc<OfferCatalog>,
        customers: Arc<CustomerLedger>,
        store: Arc<TransactionStore>,
        gate: Arc<SubscriptionGate>,
        platform: Platform,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            classifier: settings.classifier(),
            settings,
            offers,
            customers,
            store,
            gate,
            platform,
            scheduler,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<TransactionStore> {
        &self.store
    }

    pub fn customers(&self) -> &Arc<CustomerLedger> {
        &self.customers
    }

    pub fn offers(&self) -> &Arc<OfferCatalog> {
        &self.offers
    }

    pub fn gate(&self) -> &Arc<SubscriptionGate> {
        &self.gate
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Turns a payment SMS into a transaction.
    ///
    /// The customer is created on first sight and credited with the paid
    /// amount. A matched transaction is dispatched right away when
    /// auto-dispatch is on; an unmatched one holds the amount and gets the
    /// "unmatched" auto-reply.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::InvalidSubscriptionId`] - Message arrived on a SIM
    ///   slot not configured for payments.
    /// - [`DispatchError::Message`] - Classification failed; no transaction
    ///   is created.
    /// - [`DispatchError::Transaction`] - The sender phone is invalid.
    pub async fn ingest_sms(self: &Arc<Self>, sms: &InboundSms) -> Result<Submission, DispatchError> {
        if let Some(slot) = sms.sim_slot {
            if slot != self.settings.receive_sim_slot {
                warn!(slot, "sms_on_unexpected_sim_slot");
                return Err(DispatchError::InvalidSubscriptionId(slot));
            }
        }

        let message = match self.classifier.classify(&sms.sender, &sms.body) {
            Ok(message) => message,
            Err(MessageError::RecommendationTimedOut) => {
                info!(sender = %sms.sender, "recommendation_timed_out");
                return Err(MessageError::RecommendationTimedOut.into());
            }
            Err(err) => {
                warn!(sender = %sms.sender, error = %err, "sms_rejected");
                return Err(err.into());
            }
        };

        let customer = self.customers.get_or_create(&message.phone, &message.name)?;
        let offer = self
            .offers
            .find_by_price(message.amount, message.kind == MessageKind::SiteLink);
        let transaction = self.store.create(NewTransaction {
            amount: message.amount,
            time: message.time,
            message: sms.body.clone(),
            customer,
            offer,
            kind: message.kind.transaction_type(),
            reschedule: None,
        });
        self.customers.apply(
            &transaction.customer,
            transaction.id,
            EntryKind::Payment,
            transaction.amount,
        )?;
        info!(
            transaction_id = %transaction.id,
            reference = %message.reference,
            amount = transaction.amount,
            status = %transaction.status,
            "payment_ingested"
        );

        let dispatch = match transaction.status {
            TransactionStatus::Unmatched => {
                self.customers.apply(
                    &transaction.customer,
                    transaction.id,
                    EntryKind::Charge,
                    transaction.amount,
                )?;
                self.send_reply(&transaction).await;
                None
            }
            _ if self.settings.auto_dispatch => Some(self.dispatch(transaction.id, None).await),
            _ => None,
        };

        Ok(Submission {
            transaction,
            dispatch,
        })
    }

    /// Dials an offer for a phone number without a payment message.
    pub async fn manual_dial(
        self: &Arc<Self>,
        phone: &str,
        name: &str,
        offer_id: OfferId,
        at: Option<DateTime<Utc>>,
    ) -> Result<Submission, DispatchError> {
        self.submit(phone, name, offer_id, TransactionType::Manual, at).await
    }

    /// Dials a renewal of the agent's own subscription.
    ///
    /// Renewals bypass the subscription gate so an agent with no active plan
    /// can still pay for one.
    pub async fn renew_subscription(
        self: &Arc<Self>,
        phone: &str,
        offer_id: OfferId,
    ) -> Result<Submission, DispatchError> {
        self.submit(phone, "", offer_id, TransactionType::SubscriptionRenewal, None)
            .await
    }

    async fn submit(
        self: &Arc<Self>,
        phone: &str,
        name: &str,
        offer_id: OfferId,
        kind: TransactionType,
        at: Option<DateTime<Utc>>,
    ) -> Result<Submission, DispatchError> {
        let offer = self.offers.get(offer_id).ok_or(TransactionError::OfferNotFound)?;
        let customer = self.customers.get_or_create(phone, name)?;
        let transaction = self.store.create(NewTransaction {
            amount: offer.price,
            time: Utc::now(),
            message: String::new(),
            customer,
            offer: Some(offer),
            kind,
            reschedule: None,
        });
        let dispatch = self.dispatch(transaction.id, at).await;
        Ok(Submission {
            transaction,
            dispatch: Some(dispatch),
        })
    }

    /// Validates, queues and schedules the dial of a `SCHEDULED` transaction
    /// at `at` (default: now).
    ///
    /// # Errors
    ///
    /// - [`DispatchError::PermissionDenied`] - Permissions were requested;
    ///   re-invoke after the grant. The transaction is untouched.
    /// - [`DispatchError::NoActivePlan`] - The transaction was failed with
    ///   [`NO_PLAN_MESSAGE`] and no dial happened.
    /// - [`DispatchError::NoActiveSim`] / [`DispatchError::InvalidSubscriptionId`]
    ///   - The transaction was failed; no dial happened.
    /// - [`TransactionError::DuplicateTransaction`] - Already queued; nothing
    ///   was scheduled.
    /// - [`DispatchError::SchedulerShutDown`] - The transaction was failed;
    ///   no token was spent and no dial happened.
    /// - [`TransactionError::NotDispatchable`] - Not in `SCHEDULED`.
    pub async fn dispatch(
        self: &Arc<Self>,
        id: TransactionId,
        at: Option<DateTime<Utc>>,
    ) -> Result<DispatchTicket, DispatchError> {
        let transaction = self.store.get(id).ok_or(TransactionError::TransactionNotFound)?;
        if transaction.status != TransactionStatus::Scheduled {
            return Err(TransactionError::NotDispatchable(transaction.status).into());
        }
        let offer = transaction
            .offer
            .clone()
            .ok_or(TransactionError::OfferNotFound)?;

        let missing = self.platform.permissions.missing_permissions().await;
        if !missing.is_empty() {
            warn!(transaction_id = %id, missing = ?missing, "dispatch_missing_permissions");
            self.platform.permissions.request_permissions(&missing).await;
            return Err(DispatchError::PermissionDenied(missing));
        }

        let now = Utc::now();
        if !transaction.is_renewal() && !self.gate.has_active_plan(now) {
            return Err(self.reject(id, DispatchError::NoActivePlan).await);
        }

        let subscription_id = match self.resolve_subscription().await {
            Ok(subscription_id) => subscription_id,
            Err(err) => return Err(self.reject(id, err).await),
        };

        if self.scheduler.is_shut_down() {
            return Err(self.reject(id, DispatchError::SchedulerShutDown).await);
        }

        if let Err(err) = self.store.enqueue(id) {
            error!(transaction_id = %id, error = %err, "dispatch_enqueue_failed");
            return Err(err.into());
        }

        let charge = match self.gate.authorize(transaction.is_renewal(), now) {
            Ok(charge) => charge,
            Err(err) => {
                // Tokens ran out between the plan check and metering.
                self.store.dequeue(id);
                return Err(self.reject(id, err).await);
            }
        };

        let at = at.unwrap_or(now);
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let code = offer.render_ussd(&transaction.customer);
        let job = dial_job_name(id);
        let coordinator = Arc::clone(self);
        let scheduled = self.scheduler.schedule(
            job.clone(),
            ExistingJobPolicy::Replace,
            delay,
            async move {
                coordinator.run_dial(id, subscription_id, code).await;
            },
        );
        if !scheduled {
            // Shut down after the check above; undo the queue entry and token.
            self.store.dequeue(id);
            self.gate.refund(charge);
            return Err(self.reject(id, DispatchError::SchedulerShutDown).await);
        }
        info!(transaction_id = %id, charge = ?charge, at = %at, "dispatch_scheduled");

        Ok(DispatchTicket {
            transaction_id: id,
            job,
            at,
            charge,
        })
    }

    fn dispatch_boxed(self: Arc<Self>, id: TransactionId, at: Option<DateTime<Utc>>) -> DispatchFuture {
        Box::pin(async move { self.dispatch(id, at).await })
    }

    /// Moves a transaction to `RESCHEDULED` and dispatches a child
    /// transaction for `offer_id` (default: the parent's offer) at `at`.
    ///
    /// A failed or unmatched parent releases its hold on the customer's
    /// balance; the child is charged when its own dial settles.
    ///
    /// # Errors
    ///
    /// - [`TransactionError::InvalidTransition`] - Parent is `SUCCESS` or
    ///   already `RESCHEDULED`.
    /// - [`TransactionError::OfferNotFound`] - No offer given and the parent
    ///   has none, or the given offer does not exist.
    pub async fn reschedule(
        self: &Arc<Self>,
        id: TransactionId,
        offer_id: Option<OfferId>,
        at: Option<DateTime<Utc>>,
        mode: RescheduleMode,
    ) -> Result<Submission, DispatchError> {
        let parent = self.store.get(id).ok_or(TransactionError::TransactionNotFound)?;
        if !parent.status.can_transition_to(TransactionStatus::Rescheduled) {
            return Err(TransactionError::InvalidTransition {
                from: parent.status,
                to: TransactionStatus::Rescheduled,
            }
            .into());
        }
        let offer: Offer = match offer_id {
            Some(offer_id) => self.offers.get(offer_id),
            None => parent.offer.clone(),
        }
        .ok_or(TransactionError::OfferNotFound)?;

        self.scheduler.cancel(&dial_job_name(id));
        self.store.dequeue(id);
        let reserved = parent.reserved_amount();
        self.store.transition(id, TransactionStatus::Rescheduled, None)?;
        if let Some(amount) = reserved {
            self.customers
                .apply(&parent.customer, id, EntryKind::Release, amount)?;
        }

        let at = at.unwrap_or_else(Utc::now);
        let child = self.store.create(NewTransaction {
            amount: parent.amount,
            time: Utc::now(),
            message: parent.message.clone(),
            customer: parent.customer.clone(),
            offer: Some(offer),
            kind: parent.kind,
            reschedule: Some(RescheduleInfo {
                parent: id,
                time: at,
                mode,
            }),
        });
        info!(transaction_id = %id, child_id = %child.id, mode = ?mode, "transaction_rescheduled");

        let dispatch = self.dispatch(child.id, Some(at)).await;
        Ok(Submission {
            transaction: child,
            dispatch: Some(dispatch),
        })
    }

    /// Retries a failed transaction: reschedules it to the same offer, now.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionError::NotRetryable`] unless the transaction is
    /// `FAILED`.
    pub async fn retry(self: &Arc<Self>, id: TransactionId) -> Result<Submission, DispatchError> {
        let transaction = self.store.get(id).ok_or(TransactionError::TransactionNotFound)?;
        if !transaction.status.is_retryable() {
            return Err(TransactionError::NotRetryable.into());
        }
        self.reschedule(id, None, None, RescheduleMode::Once).await
    }

    /// Deletes a transaction, cancelling any pending dial.
    ///
    /// Deleting a `FAILED` transaction credits the offer price back to the
    /// customer, an `UNMATCHED` one the raw amount; other statuses leave the
    /// balance alone.
    pub fn delete(&self, id: TransactionId) -> Result<Transaction, DispatchError> {
        self.scheduler.cancel(&dial_job_name(id));
        let removed = self.store.remove(id)?;
        if let Some(amount) = removed.reserved_amount() {
            self.customers
                .apply(&removed.customer, id, EntryKind::Release, amount)?;
        }
        info!(transaction_id = %id, status = %removed.status, "transaction_deleted");
        Ok(removed)
    }

    /// Waits for the transaction to reach a terminal status.
    pub async fn watch(&self, id: TransactionId) -> Result<TransactionStatus, DispatchError> {
        Ok(self.store.watch(id).await?)
    }

    /// Cancels every pending dial and background job.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    async fn resolve_subscription(&self) -> Result<i32, DispatchError> {
        let slot = self.settings.dial_sim_slot;
        if !matches!(slot, 1 | 2) {
            return Err(DispatchError::InvalidSubscriptionId(slot));
        }
        self.platform
            .sims
            .subscription_id(slot)
            .await
            .ok_or(DispatchError::NoActiveSim(slot))
    }

    /// Fails a transaction before any dial and hands the error back.
    async fn reject(&self, id: TransactionId, err: DispatchError) -> DispatchError {
        let message = match &err {
            DispatchError::NoActivePlan => NO_PLAN_MESSAGE.to_string(),
            other => other.to_string(),
        };
        warn!(transaction_id = %id, error = %err, "dispatch_rejected");
        if let Err(settle_err) = self.settle(id, DialOutcome::Failed(message)).await {
            error!(transaction_id = %id, error = %settle_err, "dispatch_reject_settle_failed");
        }
        err
    }

    async fn run_dial(self: Arc<Self>, id: TransactionId, subscription_id: i32, code: String) {
        debug!(transaction_id = %id, subscription_id, "ussd_dial_started");
        let outcome = match self.platform.dialer.dial(subscription_id, &code).await {
            Ok(response) => classify_response(&response),
            Err(err) => DialOutcome::Failed(err.to_string()),
        };

        let settled = match self.settle(id, outcome).await {
            Ok(settled) => settled,
            Err(err) => {
                warn!(transaction_id = %id, error = %err, "ussd_dial_settle_failed");
                return;
            }
        };

        let auto_renew = settled
            .reschedule
            .as_ref()
            .is_some_and(|info| info.mode == RescheduleMode::AutoRenew);
        if settled.status == TransactionStatus::Success && auto_renew {
            self.schedule_renewal(&settled).await;
        }
    }

    /// Applies a dial outcome: status, ledger charge, auto-reply, forward.
    async fn settle(
        &self,
        id: TransactionId,
        outcome: DialOutcome,
    ) -> Result<Transaction, DispatchError> {
        let status = outcome.status();
        let transaction = self.store.transition(id, status, Some(outcome.message()))?;

        if let Some(offer) = &transaction.offer {
            self.customers
                .apply(&transaction.customer, id, EntryKind::Charge, offer.price)?;
        }
        if status == TransactionStatus::Success {
            self.customers.record_purchase(&transaction.customer, Utc::now())?;
        }
        info!(transaction_id = %id, status = %status, "dispatch_settled");

        self.send_reply(&transaction).await;
        self.forward(&transaction).await;
        Ok(transaction)
    }

    /// Creates and dispatches the next auto-renew child one renew interval
    /// after `previous` succeeded.
    async fn schedule_renewal(self: &Arc<Self>, previous: &Transaction) {
        let Some(offer) = previous.offer.clone() else {
            return;
        };
        let Some(at) = renewal_time(Utc::now(), self.settings.renew_interval()) else {
            error!(
                transaction_id = %previous.id,
                renew_interval_secs = self.settings.renew_interval_secs,
                "auto_renew_interval_out_of_range"
            );
            return;
        };
        let next = self.store.create(NewTransaction {
            amount: offer.price,
            time: Utc::now(),
            message: previous.message.clone(),
            customer: previous.customer.clone(),
            offer: Some(offer),
            kind: previous.kind,
            reschedule: Some(RescheduleInfo {
                parent: previous.id,
                time: at,
                mode: RescheduleMode::AutoRenew,
            }),
        });
        info!(transaction_id = %previous.id, next_id = %next.id, at = %at, "auto_renew_scheduled");

        if let Err(err) = Arc::clone(self).dispatch_boxed(next.id, Some(at)).await {
            warn!(transaction_id = %next.id, error = %err, "auto_renew_dispatch_failed");
        }
    }

    async fn send_reply(&self, transaction: &Transaction) {
        let reply = &self.settings.auto_reply;
        if !reply.enabled || !transaction.kind.is_customer_paid() {
            return;
        }
        let template = match transaction.status {
            TransactionStatus::Success => &reply.success,
            TransactionStatus::Failed => &reply.failure,
            TransactionStatus::Unmatched => &reply.unmatched,
            _ => return,
        };

        let name = self
            .customers
            .get(&transaction.customer)
            .map(|customer| customer.name())
            .unwrap_or_default();
        let offer = transaction
            .offer
            .as_ref()
            .map(|offer| offer.name.as_str())
            .unwrap_or_default();
        let text = sms::render(template, &name, transaction.amount, offer);

        let phone = transaction.customer.local();
        if let Err(err) = self
            .platform
            .sms
            .send_multipart(&phone, sms::segments(&text))
            .await
        {
            warn!(transaction_id = %transaction.id, error = %err, "auto_reply_failed");
        }
    }

    /// Forwards a settled transaction to the listener app.
    ///
    /// On success it leaves the queue; on failure it stays (or is added) for
    /// the next retry pass.
    async fn forward(&self, transaction: &Transaction) {
        if !self.settings.forwarding_enabled {
            self.store.dequeue(transaction.id);
            return;
        }
        match self.platform.listener.forward(transaction).await {
            Ok(()) => {
                self.store.dequeue(transaction.id);
                debug!(transaction_id = %transaction.id, "transaction_forwarded");
            }
            Err(err) => {
                warn!(transaction_id = %transaction.id, error = %err, "transaction_forward_failed");
                // Already queued is fine; the retry pass will pick it up.
                let _ = self.store.enqueue(transaction.id);
            }
        }
    }
}
