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

//! Subscription plans and the gate that meters dispatches.
//!
//! An unexpired UNLIMITED plan authorizes every dispatch for free; otherwise
//! each non-renewal dispatch consumes one token from the LIMITED plans.

use crate::error::{DispatchError, PlatformError};
use crate::ports::SubscriptionSource;
use crate::scheduler::JobScheduler;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Job name of the periodic plan sync.
pub const SYNC_JOB: &str = "subscription-sync";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionPlan {
    /// Time-based plan valid until `expires_at_ms` (epoch milliseconds)
    Unlimited { expires_at_ms: i64 },
    /// Token-based plan with `tokens` dispatches left
    Limited { tokens: u64 },
}

impl SubscriptionPlan {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match *self {
            SubscriptionPlan::Unlimited { expires_at_ms } => expires_at_ms > now.timestamp_millis(),
            SubscriptionPlan::Limited { tokens } => tokens > 0,
        }
    }
}

/// How a dispatch was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCharge {
    /// Renewal dispatches are never metered
    Exempt,
    /// Covered by an unexpired unlimited plan
    Unlimited,
    /// One token deducted; `remaining` left across limited plans
    Deducted { remaining: u64 },
}

#[derive(Debug, Default)]
pub struct SubscriptionGate {
    plans: RwLock<Vec<SubscriptionPlan>>,
}

impl SubscriptionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(plans: Vec<SubscriptionPlan>) -> Self {
        Self {
            plans: RwLock::new(plans),
        }
    }

    pub fn add_plan(&self, plan: SubscriptionPlan) {
        self.plans.write().push(plan);
    }

    /// Replaces all plans, e.g. after a sync with the backend.
    pub fn replace_plans(&self, plans: Vec<SubscriptionPlan>) {
        *self.plans.write() = plans;
    }

    pub fn plans(&self) -> Vec<SubscriptionPlan> {
        self.plans.read().clone()
    }

    /// True iff an unexpired unlimited plan or a limited plan with tokens
    /// left exists.
    pub fn has_active_plan(&self, now: DateTime<Utc>) -> bool {
        self.plans.read().iter().any(|plan| plan.is_active(now))
    }

    pub fn has_unlimited(&self, now: DateTime<Utc>) -> bool {
        self.plans.read().iter().any(|plan| {
            matches!(plan, SubscriptionPlan::Unlimited { .. }) && plan.is_active(now)
        })
    }

    /// Tokens left across all limited plans.
    pub fn remaining_tokens(&self) -> u64 {
        Self::total_tokens(&self.plans.read())
    }

    /// Removes up to `n` tokens, draining limited plans in insertion order.
    ///
    /// Never goes below zero; asking for more than is left empties the plans.
    /// Returns the number of tokens actually removed.
    pub fn decrement_tokens(&self, n: u64) -> u64 {
        Self::drain(&mut self.plans.write(), n)
    }

    /// Checks and meters one dispatch atomically.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoActivePlan`] when no plan is active and the
    /// dispatch is not a renewal.
    pub fn authorize(&self, is_renewal: bool, now: DateTime<Utc>) -> Result<TokenCharge, DispatchError> {
        if is_renewal {
            return Ok(TokenCharge::Exempt);
        }

        let mut plans = self.plans.write();
        if !plans.iter().any(|plan| plan.is_active(now)) {
            return Err(DispatchError::NoActivePlan);
        }
        let unlimited = plans.iter().any(|plan| {
            matches!(plan, SubscriptionPlan::Unlimited { .. }) && plan.is_active(now)
        });
        if unlimited {
            return Ok(TokenCharge::Unlimited);
        }

        // An active plan that is not unlimited is a limited plan with tokens.
        Self::drain(&mut plans, 1);
        Ok(TokenCharge::Deducted {
            remaining: Self::total_tokens(&plans),
        })
    }

    /// Gives back the token taken by `charge`, if any.
    ///
    /// The token returns to the first limited plan, or to a new one when the
    /// plans were replaced since metering.
    pub fn refund(&self, charge: TokenCharge) {
        if !matches!(charge, TokenCharge::Deducted { .. }) {
            return;
        }
        let mut plans = self.plans.write();
        let limited = plans.iter_mut().find_map(|plan| match plan {
            SubscriptionPlan::Limited { tokens } => Some(tokens),
            SubscriptionPlan::Unlimited { .. } => None,
        });
        match limited {
            Some(tokens) => *tokens += 1,
            None => plans.push(SubscriptionPlan::Limited { tokens: 1 }),
        }
    }

    fn drain(plans: &mut [SubscriptionPlan], mut n: u64) -> u64 {
        let mut removed = 0;
        for plan in plans.iter_mut() {
            if n == 0 {
                break;
            }
            if let SubscriptionPlan::Limited { tokens } = plan {
                let take = (*tokens).min(n);
                *tokens -= take;
                n -= take;
                removed += take;
            }
        }
        removed
    }

    fn total_tokens(plans: &[SubscriptionPlan]) -> u64 {
        plans
            .iter()
            .map(|plan| match plan {
                SubscriptionPlan::Limited { tokens } => *tokens,
                SubscriptionPlan::Unlimited { .. } => 0,
            })
            .sum()
    }
}

/// Keeps the gate's plans in step with the backend.
pub struct SubscriptionSync {
    gate: Arc<SubscriptionGate>,
    source: Arc<dyn SubscriptionSource>,
}

impl SubscriptionSync {
    pub fn new(gate: Arc<SubscriptionGate>, source: Arc<dyn SubscriptionSource>) -> Self {
        Self { gate, source }
    }

    /// Fetches plans once and replaces the gate's plans.
    ///
    /// On failure the current plans are kept.
    pub async fn sync_once(&self) -> Result<usize, PlatformError> {
        let plans = self.source.fetch_plans().await?;
        let count = plans.len();
        self.gate.replace_plans(plans);
        info!(plans = count, "subscription_synced");
        Ok(count)
    }

    /// Starts the periodic sync under [`SYNC_JOB`]. Failures are logged.
    pub fn spawn(self: Arc<Self>, scheduler: &JobScheduler, period: Duration) -> bool {
        scheduler.spawn_periodic(SYNC_JOB, period, move || {
            let sync = Arc::clone(&self);
            async move {
                if let Err(err) = sync.sync_once().await {
                    warn!(error = %err, "subscription_sync_failed");
                }
            }
        })
    }
}
