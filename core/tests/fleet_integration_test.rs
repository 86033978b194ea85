// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Integration tests exercising the registry, dispatch engine and
//! summarizer together, the way a coordinator process actually wires them.

use async_trait::async_trait;
use fogmesh_core::dispatch::{DispatchEngine, WorkerClient, WorkerProgress, WorkerResponse};
use fogmesh_core::error::LbResult;
use fogmesh_core::hardware::HardwareSpecs;
use fogmesh_core::registry::{WorkerRecord, WorkerRegistry};
use fogmesh_core::summarizer::{SummaryBackend, Summarizer};

fn hardware(ram_gb: f64) -> HardwareSpecs {
    HardwareSpecs { cpu_cores: 8, cpu_ghz: 3.2, ram_gb, gpu_name: "Unknown GPU".to_string(), gpu_memory_gb: 0.0, os_name: "linux".to_string() }
}

/// Echoes the prompt back, tagged with the model it was assigned, and
/// reports itself `Completed` on the first poll.
struct EchoWorkerClient;

#[async_trait]
impl WorkerClient for EchoWorkerClient {
    async fn process(&self, worker: &WorkerRecord, _request_id: &str, prompt: &str, _images: &[Vec<u8>]) -> LbResult<WorkerResponse> {
        let model = worker.assigned_model.clone().unwrap_or_default();
        Ok(WorkerResponse {
            worker_id: worker.id.clone(),
            model: model.clone(),
            text: format!("[{model}] {prompt}"),
            processing_time_ms: 5,
            score: worker.score,
        })
    }

    async fn poll_status(&self, _worker: &WorkerRecord, _request_id: &str) -> LbResult<WorkerProgress> {
        Ok(WorkerProgress::Completed)
    }
}

/// Always fails, so the summarizer falls back to the fastest raw response.
struct FailingSummaryBackend;

#[async_trait]
impl SummaryBackend for FailingSummaryBackend {
    async fn generate(&self, _model: &str, _prompt: &str) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("no summarizer model installed"))
    }
}

#[tokio::test]
async fn heterogeneous_fleet_is_assigned_dispatched_and_summarized() {
    let registry = WorkerRegistry::new();
    registry
        .register(WorkerRecord::new("strong".into(), "10.0.0.1:50052".into(), hardware(64.0), vec!["llama3.1:70b".into()]))
        .unwrap();
    registry
        .register(WorkerRecord::new("weak".into(), "10.0.0.2:50052".into(), hardware(8.0), vec!["llama3.2:1b".into()]))
        .unwrap();

    // The assignment engine should have handed the heavier model to the
    // higher-scored worker.
    assert_eq!(registry.get("strong").unwrap().assigned_model.as_deref(), Some("llama3.1:70b"));
    assert_eq!(registry.get("weak").unwrap().assigned_model.as_deref(), Some("llama3.2:1b"));

    let dispatch = DispatchEngine::new(registry.clone(), std::sync::Arc::new(EchoWorkerClient));
    let outcome = dispatch.dispatch("", "summarize rust ownership", &[]).await.unwrap();
    assert_eq!(outcome.responses.len(), 2);
    assert!(outcome.failed_workers.is_empty());

    let summarizer = Summarizer::new(std::sync::Arc::new(FailingSummaryBackend));
    let final_response = summarizer.summarize("summarize rust ownership", &outcome.responses).await;

    // Summarization failed, so the fallback is the fastest worker's raw text,
    // which both workers tie on here — either is an acceptable fallback.
    assert!(!final_response.summarized);
    assert!(final_response.text.contains("summarize rust ownership"));
    assert!(final_response.text.contains("PROCESSING_DETAILS_START"));
}

#[tokio::test]
async fn deregistering_a_worker_mid_fleet_does_not_disturb_the_rest() {
    let registry = WorkerRegistry::new();
    registry
        .register(WorkerRecord::new("a".into(), "a:1".into(), hardware(32.0), vec!["llama3.1:8b".into()]))
        .unwrap();
    registry
        .register(WorkerRecord::new("b".into(), "b:1".into(), hardware(16.0), vec!["llama3.2:1b".into()]))
        .unwrap();

    let before = registry.get("b").unwrap().assigned_model;
    registry.deregister("a");
    let after = registry.get("b").unwrap().assigned_model;
    assert_eq!(before, after);

    let dispatch = DispatchEngine::new(registry.clone(), std::sync::Arc::new(EchoWorkerClient));
    let outcome = dispatch.dispatch("", "still working?", &[]).await.unwrap();
    assert_eq!(outcome.responses.len(), 1);
    assert_eq!(outcome.responses[0].worker_id, "b");
}
