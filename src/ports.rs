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

//! Boundaries to the device platform.
//!
//! The dispatch core never talks to telephony, SMS or network APIs
//! directly; it goes through these traits so the platform layer (or a test
//! double) can be injected.

use crate::error::PlatformError;
use crate::subscription::SubscriptionPlan;
use crate::transaction::Transaction;
use async_trait::async_trait;
use std::sync::Arc;

/// Runtime permission checks (phone calls, SMS send/receive).
#[async_trait]
pub trait PermissionGuard: Send + Sync {
    /// Names of required permissions not yet granted.
    async fn missing_permissions(&self) -> Vec<String>;

    /// Asks the user for the given permissions. Does not wait for the grant.
    async fn request_permissions(&self, permissions: &[String]);
}

/// Resolves SIM slots to platform subscription ids.
#[async_trait]
pub trait SimDirectory: Send + Sync {
    /// Subscription id of the active SIM in `slot` (1-based), if any.
    async fn subscription_id(&self, slot: u8) -> Option<i32>;
}

/// Issues USSD requests.
#[async_trait]
pub trait UssdDialer: Send + Sync {
    /// Dials `code` on the given subscription and returns the carrier's
    /// response text.
    async fn dial(&self, subscription_id: i32, code: &str) -> Result<String, PlatformError>;
}

/// Sends outbound SMS.
#[async_trait]
pub trait SmsSender: Send + Sync {
    /// Sends one logical message split into segments.
    async fn send_multipart(&self, phone: &str, parts: Vec<String>) -> Result<(), PlatformError>;
}

/// Link to a connected listener app that mirrors transactions.
#[async_trait]
pub trait ListenerLink: Send + Sync {
    async fn forward(&self, transaction: &Transaction) -> Result<(), PlatformError>;
}

/// Remote source of the agent's subscription plans.
#[async_trait]
pub trait SubscriptionSource: Send + Sync {
    async fn fetch_plans(&self) -> Result<Vec<SubscriptionPlan>, PlatformError>;
}

/// Platform services the coordinator depends on.
#[derive(Clone)]
pub struct Platform {
    pub permissions: Arc<dyn PermissionGuard>,
    pub sims: Arc<dyn SimDirectory>,
    pub dialer: Arc<dyn UssdDialer>,
    pub sms: Arc<dyn SmsSender>,
    pub listener: Arc<dyn ListenerLink>,
}
