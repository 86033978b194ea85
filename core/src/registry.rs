// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The coordinator's worker registry: the single source of truth for which
//! workers exist, their hardware score, and their current model assignment.

use crate::assignment::assign;
use crate::catalog::ModelCatalog;
use crate::error::{LbError, LbResult, WorkerId};
use crate::hardware::HardwareSpecs;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Worker lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Registered and able to take requests.
    Online,
    /// Currently processing at least one request.
    Busy,
    /// Missed enough heartbeats to be considered stale; still registered.
    Stale,
    /// Explicitly deregistered (not retained in the registry; kept here for
    /// transient reporting during deregistration only).
    Offline,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Busy => write!(f, "busy"),
            Self::Stale => write!(f, "stale"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A single registered worker and everything the coordinator knows about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Stable worker identifier, supplied at registration.
    pub id: WorkerId,
    /// `host:port` the coordinator dials for RPCs.
    pub address: String,
    /// Detected hardware facts.
    pub hardware: HardwareSpecs,
    /// Derived performance score, `hardware.score()`.
    pub score: f64,
    /// Models this worker has installed locally.
    pub installed_models: Vec<String>,
    /// The model most recently assigned to this worker by the assignment
    /// engine, if any.
    pub assigned_model: Option<String>,
    /// This worker's performance group (0 = strongest group), set by the
    /// assignment engine.
    pub group_index: Option<usize>,
    /// Lifecycle status.
    pub status: WorkerStatus,
    /// In-flight request count.
    pub current_requests: usize,
    /// Lifetime successful requests.
    pub completed_requests: u64,
    /// Lifetime failed requests.
    pub failed_requests: u64,
    /// Last heartbeat/status-poll time.
    pub last_heartbeat: DateTime<Utc>,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
}

impl WorkerRecord {
    /// Construct a freshly-registered record; `score` is computed from
    /// `hardware`, status starts `Online`, timestamps are now.
    pub fn new(id: WorkerId, address: String, hardware: HardwareSpecs, installed_models: Vec<String>) -> Self {
        let now = Utc::now();
        let score = hardware.score();
        Self {
            id,
            address,
            hardware,
            score,
            installed_models,
            assigned_model: None,
            group_index: None,
            status: WorkerStatus::Online,
            current_requests: 0,
            completed_requests: 0,
            failed_requests: 0,
            last_heartbeat: now,
            registered_at: now,
        }
    }

    /// Whether this worker has missed its heartbeat budget. Deregistration
    /// does not happen automatically on staleness — callers must call
    /// `WorkerRegistry::rebalance` to exclude a stale worker from future
    /// assignments.
    pub fn is_stale(&self, timeout_seconds: i64) -> bool {
        (Utc::now() - self.last_heartbeat).num_seconds() > timeout_seconds
    }
}

/// Aggregate counters exposed by `WorkerRegistry::stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Total registered workers.
    pub total_workers: usize,
    /// Workers currently `Online` or `Busy`.
    pub active_workers: usize,
    /// Sum of `completed_requests` across all workers.
    pub total_completed: u64,
    /// Sum of `failed_requests` across all workers.
    pub total_failed: u64,
}

/// Concurrent worker registry. All mutating operations (`register`,
/// `deregister`, `rebalance`) serialize via an internal `DashMap`
/// transaction so that the registry and the catalog it derives never
/// observe a torn intermediate state, matching the single-lock semantics
/// the dispatch and assignment engines rely on.
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, WorkerRecord>,
    catalog: parking_lot::RwLock<ModelCatalog>,
    total_requests: AtomicU64,
}

impl WorkerRegistry {
    /// An empty registry with an empty catalog.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            workers: DashMap::new(),
            catalog: parking_lot::RwLock::new(ModelCatalog::default()),
            total_requests: AtomicU64::new(0),
        })
    }

    /// Register a worker (or replace its record if the id is reused),
    /// merge its installed models into the catalog, and immediately
    /// recompute the full assignment — unchanged from the original
    /// behavior of reassigning on every registration, not just on the
    /// first.
    pub fn register(&self, mut record: WorkerRecord) -> LbResult<()> {
        if record.id.is_empty() {
            return Err(LbError::InvalidRegistration("worker id must not be empty".into()));
        }
        if record.address.is_empty() {
            return Err(LbError::InvalidRegistration("worker address must not be empty".into()));
        }

        {
            let mut catalog = self.catalog.write();
            for model in &record.installed_models {
                catalog.add(model);
            }
        }

        record.status = WorkerStatus::Online;
        self.workers.insert(record.id.clone(), record);
        self.rebalance();
        Ok(())
    }

    /// Remove a worker. Per the source behavior this is preserved exactly:
    /// deregistration does *not* trigger a reassignment of the remaining
    /// fleet. Call `rebalance` explicitly if a fresh assignment is wanted.
    pub fn deregister(&self, id: &str) -> Option<WorkerRecord> {
        self.workers.remove(id).map(|(_, record)| record)
    }

    /// Recompute the assignment map over every currently-registered worker
    /// and apply it, updating each worker's `assigned_model`/`group_index`.
    pub fn rebalance(&self) {
        let catalog = self.catalog.read().clone();
        if catalog.is_empty() {
            return;
        }
        let snapshot: Vec<WorkerRecord> = self.workers.iter().map(|e| e.value().clone()).collect();
        if snapshot.is_empty() {
            return;
        }
        let plan = assign(&snapshot, &catalog);
        for (id, outcome) in plan.assignments {
            if let Some(mut entry) = self.workers.get_mut(&id) {
                entry.assigned_model = Some(outcome.model);
                entry.group_index = Some(outcome.group_index);
            }
        }
    }

    /// Fetch a single worker's current record.
    pub fn get(&self, id: &str) -> Option<WorkerRecord> {
        self.workers.get(id).map(|e| e.value().clone())
    }

    /// Snapshot of every registered worker.
    pub fn list_workers(&self) -> Vec<WorkerRecord> {
        self.workers.iter().map(|e| e.value().clone()).collect()
    }

    /// Workers that are `Online` (not `Busy`, `Stale` or absent).
    pub fn available_workers(&self) -> Vec<WorkerRecord> {
        self.workers
            .iter()
            .filter(|e| e.value().status == WorkerStatus::Online)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Mark heartbeat freshness and flip `Stale` workers back to `Online`.
    pub fn record_heartbeat(&self, id: &str) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            entry.last_heartbeat = Utc::now();
            if entry.status == WorkerStatus::Stale {
                entry.status = WorkerStatus::Online;
            }
        }
    }

    /// Mark workers whose heartbeat is older than `timeout_seconds` as
    /// `Stale`. Returns the ids marked. Does not remove or reassign them —
    /// staleness is purely informational until `deregister`/`rebalance` is
    /// called, matching the documented non-goal of automatic recovery.
    pub fn mark_stale_workers(&self, timeout_seconds: i64) -> Vec<WorkerId> {
        let mut marked = Vec::new();
        for mut entry in self.workers.iter_mut() {
            if entry.is_stale(timeout_seconds) && entry.status != WorkerStatus::Stale {
                entry.status = WorkerStatus::Stale;
                marked.push(entry.id.clone());
            }
        }
        marked
    }

    /// Increment in-flight count and flip to `Busy`.
    pub fn begin_request(&self, id: &str) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            entry.current_requests += 1;
            entry.status = WorkerStatus::Busy;
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement in-flight count, update completion counters, and flip back
    /// to `Online` once idle.
    pub fn end_request(&self, id: &str, success: bool) {
        if let Some(mut entry) = self.workers.get_mut(id) {
            entry.current_requests = entry.current_requests.saturating_sub(1);
            if success {
                entry.completed_requests += 1;
            } else {
                entry.failed_requests += 1;
            }
            if entry.current_requests == 0 {
                entry.status = WorkerStatus::Online;
            }
        }
    }

    /// A read-only clone of the current catalog.
    pub fn catalog(&self) -> ModelCatalog {
        self.catalog.read().clone()
    }

    /// Aggregate registry statistics.
    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_workers: self.workers.len(),
            ..Default::default()
        };
        for entry in self.workers.iter() {
            if entry.status == WorkerStatus::Online || entry.status == WorkerStatus::Busy {
                stats.active_workers += 1;
            }
            stats.total_completed += entry.completed_requests;
            stats.total_failed += entry.failed_requests;
        }
        stats
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self {
            workers: DashMap::new(),
            catalog: parking_lot::RwLock::new(ModelCatalog::default()),
            total_requests: AtomicU64::new(0),
        }
    }
}
