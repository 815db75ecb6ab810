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

//! In-memory platform doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use hybrid_connect::ports::{
    ListenerLink, PermissionGuard, SimDirectory, SmsSender, SubscriptionSource, UssdDialer,
};
use hybrid_connect::{
    CustomerLedger, DispatchCoordinator, JobScheduler, Offer, OfferCatalog, OfferId, OfferType,
    Platform, PlatformError, Settings, SubscriptionGate, SubscriptionPlan, Transaction,
    TransactionId, TransactionStore,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const SUCCESS_RESPONSE: &str = "You have bought 1GB data successfully. Thank you.";

pub const MPESA_20: &str =
    "QAB1X2Y3Z4 Confirmed. Ksh20.00 received from 0712345678 John Doe on 10/1/24 at 2:30 PM";

/// Device double recording every platform call.
pub struct FakeDevice {
    pub missing: Mutex<Vec<String>>,
    pub requested: Mutex<Vec<Vec<String>>>,
    pub sims: Mutex<HashMap<u8, i32>>,
    pub responses: Mutex<VecDeque<Result<String, PlatformError>>>,
    pub default_response: Mutex<String>,
    pub dialed: Mutex<Vec<(i32, String)>>,
    pub sent: Mutex<Vec<(String, Vec<String>)>>,
    pub forwarded: Mutex<Vec<TransactionId>>,
    pub forward_fails: AtomicBool,
    pub forward_attempts: AtomicUsize,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            missing: Mutex::new(Vec::new()),
            requested: Mutex::new(Vec::new()),
            sims: Mutex::new(HashMap::from([(1, 101), (2, 202)])),
            responses: Mutex::new(VecDeque::new()),
            default_response: Mutex::new(SUCCESS_RESPONSE.to_string()),
            dialed: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            forwarded: Mutex::new(Vec::new()),
            forward_fails: AtomicBool::new(false),
            forward_attempts: AtomicUsize::new(0),
        }
    }

    /// Queues the response of the next dial.
    pub fn respond(&self, response: Result<&str, &str>) {
        self.responses.lock().push_back(
            response
                .map(str::to_string)
                .map_err(PlatformError::new),
        );
    }

    pub fn dial_count(&self) -> usize {
        self.dialed.lock().len()
    }

    pub fn platform(self: &Arc<Self>) -> Platform {
        Platform {
            permissions: self.clone(),
            sims: self.clone(),
            dialer: self.clone(),
            sms: self.clone(),
            listener: self.clone(),
        }
    }
}

#[async_trait]
impl PermissionGuard for FakeDevice {
    async fn missing_permissions(&self) -> Vec<String> {
        self.missing.lock().clone()
    }

    async fn request_permissions(&self, permissions: &[String]) {
        self.requested.lock().push(permissions.to_vec());
    }
}

#[async_trait]
impl SimDirectory for FakeDevice {
    async fn subscription_id(&self, slot: u8) -> Option<i32> {
        self.sims.lock().get(&slot).copied()
    }
}

#[async_trait]
impl UssdDialer for FakeDevice {
    async fn dial(&self, subscription_id: i32, code: &str) -> Result<String, PlatformError> {
        self.dialed.lock().push((subscription_id, code.to_string()));
        let queued = self.responses.lock().pop_front();
        queued.unwrap_or_else(|| Ok(self.default_response.lock().clone()))
    }
}

#[async_trait]
impl SmsSender for FakeDevice {
    async fn send_multipart(&self, phone: &str, parts: Vec<String>) -> Result<(), PlatformError> {
        self.sent.lock().push((phone.to_string(), parts));
        Ok(())
    }
}

#[async_trait]
impl ListenerLink for FakeDevice {
    async fn forward(&self, transaction: &Transaction) -> Result<(), PlatformError> {
        self.forward_attempts.fetch_add(1, Ordering::SeqCst);
        if self.forward_fails.load(Ordering::SeqCst) {
            return Err(PlatformError::new("listener unreachable"));
        }
        self.forwarded.lock().push(transaction.id);
        Ok(())
    }
}

/// Plan source returning a fixed answer.
pub struct FakePlanSource {
    pub plans: Mutex<Result<Vec<SubscriptionPlan>, String>>,
    pub calls: AtomicUsize,
}

impl FakePlanSource {
    pub fn new(plans: Vec<SubscriptionPlan>) -> Self {
        Self {
            plans: Mutex::new(Ok(plans)),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SubscriptionSource for FakePlanSource {
    async fn fetch_plans(&self) -> Result<Vec<SubscriptionPlan>, PlatformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.plans.lock().clone().map_err(PlatformError::new)
    }
}

pub fn offer(id: u32, name: &str, price: i64, site_linked: bool) -> Offer {
    Offer {
        id: OfferId(id),
        name: name.to_string(),
        ussd_code: format!("*180*5*{id}*PN*1#"),
        price,
        offer_type: OfferType::Data,
        site_linked,
    }
}

/// Catalog: 20 -> "1GB 1hr", 50 -> "50 Minutes" (site-linked), 100 -> "Weekly 2GB".
pub fn catalog() -> OfferCatalog {
    let catalog = OfferCatalog::new();
    catalog.upsert(offer(1, "1GB 1hr", 20, false)).unwrap();
    catalog.upsert(offer(2, "50 Minutes", 50, true)).unwrap();
    catalog.upsert(offer(3, "Weekly 2GB", 100, false)).unwrap();
    catalog
}

pub fn limited(tokens: u64) -> Vec<SubscriptionPlan> {
    vec![SubscriptionPlan::Limited { tokens }]
}

pub struct Harness {
    pub coordinator: Arc<DispatchCoordinator>,
    pub device: Arc<FakeDevice>,
}

impl Harness {
    pub fn new(settings: Settings, plans: Vec<SubscriptionPlan>) -> Self {
        let device = Arc::new(FakeDevice::new());
        let coordinator = Arc::new(DispatchCoordinator::new(
            settings,
            Arc::new(catalog()),
            Arc::new(CustomerLedger::new()),
            Arc::new(TransactionStore::new()),
            Arc::new(SubscriptionGate::with_plans(plans)),
            device.platform(),
            Arc::new(JobScheduler::new()),
        ));
        Self {
            coordinator,
            device,
        }
    }

    pub fn with_tokens(tokens: u64) -> Self {
        Self::new(Settings::default(), limited(tokens))
    }

    pub fn balance(&self, phone: &str) -> i64 {
        let id = hybrid_connect::CustomerId::from_phone(phone).unwrap();
        self.coordinator.customers().balance(&id).unwrap()
    }
}
