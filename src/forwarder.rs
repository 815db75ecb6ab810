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

//! Re-forwarding of queued transactions to the listener app.
//!
//! Delivery is at-least-once: a transaction leaves the dispatch queue only
//! after the listener accepted it, and the only dedup is the queue's own
//! duplicate guard.

use crate::base::TransactionId;
use crate::ports::ListenerLink;
use crate::scheduler::{ExistingJobPolicy, JobScheduler};
use crate::store::TransactionStore;
use crate::transaction::TransactionStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Job name of a retry pass.
pub const FORWARD_JOB: &str = "forward-queue";

/// Outcome counts of one retry pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardReport {
    pub forwarded: usize,
    pub failed: usize,
    /// Still waiting on their dial; left queued untouched.
    pub in_flight: usize,
    /// Deleted since queued; dropped from the queue.
    pub stale: usize,
}

pub struct RetryForwarder {
    store: Arc<TransactionStore>,
    listener: Arc<dyn ListenerLink>,
    scheduler: Arc<JobScheduler>,
}

impl RetryForwarder {
    pub fn new(
        store: Arc<TransactionStore>,
        listener: Arc<dyn ListenerLink>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            store,
            listener,
            scheduler,
        }
    }

    /// Walks a snapshot of the queue and forwards every settled transaction.
    ///
    /// Failures are logged and the transaction stays queued for the next
    /// pass.
    pub async fn retry_pass(&self) -> ForwardReport {
        let mut report = ForwardReport::default();

        for id in self.store.queue().snapshot() {
            let Some(transaction) = self.store.get(id) else {
                self.store.dequeue(id);
                report.stale += 1;
                continue;
            };
            if transaction.status == TransactionStatus::Scheduled {
                report.in_flight += 1;
                continue;
            }

            match self.listener.forward(&transaction).await {
                Ok(()) => {
                    self.store.dequeue(id);
                    report.forwarded += 1;
                }
                Err(err) => {
                    warn!(transaction_id = %id, error = %err, "retry_forward_failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            forwarded = report.forwarded,
            failed = report.failed,
            in_flight = report.in_flight,
            stale = report.stale,
            "retry_pass_finished"
        );
        report
    }

    /// Triggers a background pass when the app returns to the foreground.
    pub fn on_resume(self: &Arc<Self>) -> bool {
        self.trigger("app_resumed")
    }

    /// Triggers a background pass when the network comes back.
    pub fn on_connectivity_regained(self: &Arc<Self>) -> bool {
        self.trigger("connectivity_regained")
    }

    /// Ids a pass would currently look at.
    pub fn pending(&self) -> Vec<TransactionId> {
        self.store.queue().snapshot()
    }

    fn trigger(self: &Arc<Self>, reason: &'static str) -> bool {
        let forwarder = Arc::clone(self);
        let scheduled = self.scheduler.schedule(
            FORWARD_JOB,
            ExistingJobPolicy::Keep,
            Duration::ZERO,
            async move {
                forwarder.retry_pass().await;
            },
        );
        info!(reason, scheduled, "retry_pass_triggered");
        scheduled
    }
}
