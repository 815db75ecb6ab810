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

//! Uniquely named background jobs.
//!
//! Every job runs on its own tokio task under a child of the scheduler's
//! cancellation token. Scheduling a name that is already live either keeps
//! the existing job or replaces it, depending on [`ExistingJobPolicy`].
//! All methods that spawn must be called from within a tokio runtime.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingJobPolicy {
    /// Leave a live job with the same name untouched and drop the new one
    Keep,
    /// Cancel the live job and run the new one
    Replace,
}

#[derive(Debug)]
struct Job {
    token: CancellationToken,
    handle: JoinHandle<()>,
    generation: u64,
}

impl Job {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

#[derive(Debug)]
pub struct JobScheduler {
    jobs: Arc<DashMap<String, Job>>,
    root: CancellationToken,
    generation: AtomicU64,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Runs `task` after `delay` under `name`.
    ///
    /// Returns `false` when a live job with that name exists and the policy
    /// is [`ExistingJobPolicy::Keep`], or the scheduler is shut down.
    pub fn schedule<F>(
        &self,
        name: impl Into<String>,
        policy: ExistingJobPolicy,
        delay: Duration,
        task: F,
    ) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.root.is_cancelled() {
            return false;
        }
        let name = name.into();

        match self.jobs.entry(name.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live() && policy == ExistingJobPolicy::Keep {
                    debug!(job = %name, "job_kept");
                    return false;
                }
                occupied.get().token.cancel();
                let job = self.spawn_job(name.clone(), delay, task);
                occupied.insert(job);
            }
            Entry::Vacant(vacant) => {
                let job = self.spawn_job(name.clone(), delay, task);
                vacant.insert(job);
            }
        }
        debug!(job = %name, delay_ms = delay.as_millis() as u64, "job_scheduled");
        true
    }

    /// Runs `make()` every `period`, starting immediately, until cancelled.
    ///
    /// Uses the keep policy: a live periodic job with the same name is left
    /// alone.
    pub fn spawn_periodic<F, Fut>(&self, name: impl Into<String>, period: Duration, mut make: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule(name, ExistingJobPolicy::Keep, Duration::ZERO, async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                make().await;
            }
        })
    }

    /// Cancels the named job. Returns whether one was live.
    pub fn cancel(&self, name: &str) -> bool {
        match self.jobs.remove(name) {
            Some((_, job)) => {
                let live = job.is_live();
                job.token.cancel();
                live
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.jobs.get(name).is_some_and(|job| job.is_live())
    }

    /// Number of live jobs.
    pub fn active(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_live()).count()
    }

    /// True once [`JobScheduler::shutdown`] ran.
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Cancels every job and refuses new ones.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.jobs.clear();
    }

    fn spawn_job<F>(&self, name: String, delay: Duration, task: F) -> Job
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let cancelled = token.clone();
        let jobs = Arc::clone(&self.jobs);

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {
                    debug!(job = %name, "job_cancelled");
                }
                _ = async {
                    tokio::time::sleep(delay).await;
                    task.await;
                } => {}
            }
            jobs.remove_if(&name, |_, job| job.generation == generation);
        });

        Job {
            token,
            handle,
            generation,
        }
    }
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
