// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Fans a single prompt out to every available worker and collects whatever
//! comes back, while a separate monitor loop polls progress.

use crate::error::{LbError, LbResult, RequestId, WorkerId};
use crate::registry::{WorkerRecord, WorkerRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use uuid::Uuid;

/// Poll interval for the progress monitor loop.
pub const MONITOR_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Per-poll timeout; a worker that doesn't answer in time is treated as
/// "still working", not failed.
pub const MONITOR_POLL_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period given to worker tasks to finish after the monitor loop
/// observes every worker has completed.
pub const JOIN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A single worker's raw reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// The worker that produced it.
    pub worker_id: WorkerId,
    /// The model it ran.
    pub model: String,
    /// Generated text.
    pub text: String,
    /// Wall-clock processing time in milliseconds.
    pub processing_time_ms: u64,
    /// The worker's performance score at dispatch time, carried so the
    /// summarizer can re-sort responses by score descending and pick the
    /// "best client" as a fallback, per the spec's deterministic re-sort.
    pub score: f64,
}

/// A worker's current progress as seen by a status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerProgress {
    /// Accepted but not yet started.
    Queued,
    /// Generating, with a rough completion estimate.
    Processing {
        /// Estimated completion percentage, 0-100.
        percentage: u8,
        /// Free-text description of the current step.
        current_step: String,
        /// Estimated seconds remaining, if the worker can guess.
        eta_seconds: Option<u32>,
    },
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Error,
}

impl WorkerProgress {
    /// Whether this status means the monitor no longer needs to poll this
    /// worker — either it succeeded or it gave up.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Pluggable transport for talking to a worker during dispatch. Production
/// code backs this with the gRPC client in `crate::rpc`; tests back it with
/// an in-memory stub.
#[async_trait]
pub trait WorkerClient: Send + Sync {
    /// Send the prompt (and any vision-filtered image payloads) to `worker`
    /// under `request_id` and await its full reply. No per-call timeout is
    /// applied here — the monitor loop is what bounds how long the caller
    /// waits overall.
    async fn process(&self, worker: &WorkerRecord, request_id: &str, prompt: &str, images: &[Vec<u8>]) -> LbResult<WorkerResponse>;

    /// Poll `worker`'s progress on `request_id`.
    async fn poll_status(&self, worker: &WorkerRecord, request_id: &str) -> LbResult<WorkerProgress>;
}

/// Per-request outcome: every response that came back before dispatch gave
/// up, plus which workers never completed.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// The request id this dispatch ran under.
    pub request_id: String,
    /// Responses from workers that completed successfully.
    pub responses: Vec<WorkerResponse>,
    /// Workers that were dispatched to but never produced a response.
    pub failed_workers: Vec<WorkerId>,
}

/// Drives one fan-out/collect cycle against the available fleet.
pub struct DispatchEngine {
    registry: Arc<WorkerRegistry>,
    client: Arc<dyn WorkerClient>,
}

impl DispatchEngine {
    /// Build a dispatch engine bound to a registry and transport.
    pub fn new(registry: Arc<WorkerRegistry>, client: Arc<dyn WorkerClient>) -> Self {
        Self { registry, client }
    }

    /// Fan a prompt out to every available worker, run a progress monitor
    /// alongside the fan-out tasks, and collect whatever responses arrive.
    ///
    /// Worker-level failures (a single worker erroring or never finishing)
    /// are absorbed into `failed_workers` and never propagate as an error.
    /// Only `LbError::NoWorkers` (nothing to dispatch to) and
    /// `LbError::NoSuccessfulResponses` (everything dispatched failed) are
    /// returned as errors, matching the documented sentinels.
    ///
    /// Image payloads are only forwarded to a worker whose assigned model is
    /// vision-capable; every other worker gets an empty image list, so a
    /// text-only model is never handed bytes it can't use.
    ///
    /// `request_id` is the caller's tracking id for this request; an empty
    /// string means the caller has none and a fresh one is generated here.
    pub async fn dispatch(&self, request_id: &str, prompt: &str, images: &[Vec<u8>]) -> LbResult<DispatchOutcome> {
        let workers = self.registry.available_workers();
        if workers.is_empty() {
            return Err(LbError::NoWorkers);
        }
        let request_id: RequestId = if request_id.is_empty() { Uuid::new_v4().to_string() } else { request_id.to_string() };
        let catalog = self.registry.catalog();

        let completed: Arc<Mutex<HashMap<WorkerId, Option<WorkerResponse>>>> =
            Arc::new(Mutex::new(workers.iter().map(|w| (w.id.clone(), None)).collect()));

        let mut handles = Vec::with_capacity(workers.len());
        for worker in &workers {
            self.registry.begin_request(&worker.id);
            let client = self.client.clone();
            let completed = completed.clone();
            let worker = worker.clone();
            let prompt = prompt.to_string();
            let registry = self.registry.clone();
            let request_id = request_id.clone();
            let worker_images = worker_visible_images(&worker, &catalog, images);
            handles.push(tokio::spawn(async move {
                let result = client.process(&worker, &request_id, &prompt, &worker_images).await;
                let success = result.is_ok();
                let mut guard = completed.lock().await;
                guard.insert(worker.id.clone(), result.ok());
                drop(guard);
                registry.end_request(&worker.id, success);
            }));
        }

        let monitor = {
            let completed = completed.clone();
            let client = self.client.clone();
            let workers = workers.clone();
            let request_id = request_id.clone();
            tokio::spawn(async move { monitor_loop(completed, client, workers, request_id).await })
        };

        for handle in handles {
            let _ = handle.await;
        }
        monitor.abort();

        let _ = timeout(JOIN_GRACE_PERIOD, async {}).await;

        let guard = completed.lock().await;
        let mut outcome = DispatchOutcome { request_id, ..Default::default() };
        for (worker_id, response) in guard.iter() {
            match response {
                Some(r) => outcome.responses.push(r.clone()),
                None => outcome.failed_workers.push(worker_id.clone()),
            }
        }
        drop(guard);

        if outcome.responses.is_empty() {
            return Err(LbError::NoSuccessfulResponses);
        }
        Ok(outcome)
    }
}

/// The image payloads a worker should actually receive: the full set if its
/// assigned model is vision-capable, otherwise none.
fn worker_visible_images(worker: &WorkerRecord, catalog: &crate::catalog::ModelCatalog, images: &[Vec<u8>]) -> Vec<Vec<u8>> {
    if images.is_empty() {
        return Vec::new();
    }
    let vision = worker
        .assigned_model
        .as_deref()
        .and_then(|m| catalog.get(m))
        .map(|m| m.vision)
        .unwrap_or(false);
    if vision {
        images.to_vec()
    } else {
        Vec::new()
    }
}

/// Polls every still-incomplete worker every `MONITOR_POLL_INTERVAL`,
/// bounding each poll with `MONITOR_POLL_TIMEOUT`. A poll that errors or
/// times out is treated as "still working" and retried next tick. A poll
/// that comes back `Completed`/`Error` stops this loop from polling that
/// worker again, even though the authoritative completion signal for the
/// overall dispatch remains the worker's `process` task returning.
async fn monitor_loop(
    completed: Arc<Mutex<HashMap<WorkerId, Option<WorkerResponse>>>>,
    client: Arc<dyn WorkerClient>,
    workers: Vec<WorkerRecord>,
    request_id: String,
) {
    let mut poll_terminal: HashSet<WorkerId> = HashSet::new();
    let mut interval = tokio::time::interval(MONITOR_POLL_INTERVAL);
    loop {
        interval.tick().await;
        let still_pending: Vec<&WorkerRecord> = {
            let guard = completed.lock().await;
            if guard.values().all(Option::is_some) {
                return;
            }
            workers
                .iter()
                .filter(|w| guard.get(&w.id).map(Option::is_none).unwrap_or(false) && !poll_terminal.contains(&w.id))
                .collect()
        };
        if still_pending.is_empty() && poll_terminal.len() == workers.len() {
            return;
        }

        for worker in still_pending {
            if let Ok(Ok(status)) = timeout(MONITOR_POLL_TIMEOUT, client.poll_status(worker, &request_id)).await {
                if status.is_terminal() {
                    poll_terminal.insert(worker.id.clone());
                }
            }
        }
    }
}
