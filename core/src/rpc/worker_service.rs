// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The worker's gRPC service implementation. Actual inference is delegated
//! to a pluggable `InferenceBackend` — running a local model is the
//! explicitly out-of-scope worker-side runtime.

use async_trait::async_trait;
use dashmap::DashMap;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tonic::{Request, Response, Status};

use crate::rpc::proto;

/// A nominal generation duration used to turn elapsed wall-clock time into a
/// rough completion percentage for `PollStatus`. Real progress isn't
/// observable from outside the inference backend, so this is a heuristic,
/// not a measurement.
const ASSUMED_GENERATION_MS: u128 = 4000;

/// Runs a prompt through whatever local model this worker has installed.
/// Production workers shell out to a local runtime; tests use a canned
/// stub.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Generate text for `prompt` (plus any image payloads, for a
    /// vision-capable `model`) using `model`.
    async fn generate(&self, model: &str, prompt: &str, images: &[Vec<u8>]) -> anyhow::Result<String>;
}

/// Shells out to a local `ollama run <model>` invocation, piping the prompt
/// on stdin. Mirrors `summarizer::LocalSummaryBackend`; image payloads are
/// accepted by the trait but not forwarded, since `ollama run`'s stdin mode
/// has no channel for them.
pub struct OllamaInferenceBackend;

#[async_trait]
impl InferenceBackend for OllamaInferenceBackend {
    async fn generate(&self, model: &str, prompt: &str, _images: &[Vec<u8>]) -> anyhow::Result<String> {
        let model = model.to_string();
        let prompt = prompt.to_string();
        let output = tokio::task::spawn_blocking(move || {
            use std::io::Write as _;
            let mut child = Command::new("ollama")
                .arg("run")
                .arg(&model)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::piped())
                .spawn()?;
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(prompt.as_bytes())?;
            }
            child.wait_with_output()
        })
        .await??;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// The worker-side gRPC service: accepts `Process` calls from the
/// coordinator and reports progress via `PollStatus`/`HealthCheck`.
pub struct WorkerServiceImpl {
    backend: Arc<dyn InferenceBackend>,
    capacity: usize,
    current_requests: AtomicUsize,
    in_flight: DashMap<String, Instant>,
    finished: DashMap<String, bool>,
}

impl WorkerServiceImpl {
    /// Build a worker service around the given inference backend.
    pub fn new(backend: Arc<dyn InferenceBackend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity,
            current_requests: AtomicUsize::new(0),
            in_flight: DashMap::new(),
            finished: DashMap::new(),
        }
    }
}

#[tonic::async_trait]
impl proto::worker_server::Worker for WorkerServiceImpl {
    async fn process(
        &self,
        request: Request<proto::WorkerProcessRequest>,
    ) -> Result<Response<proto::WorkerProcessResponse>, Status> {
        let req = request.into_inner();
        self.current_requests.fetch_add(1, Ordering::SeqCst);
        self.in_flight.insert(req.request_id.clone(), Instant::now());

        let start = Instant::now();
        let result = self.backend.generate(&req.model, &req.prompt, &req.images).await;

        self.in_flight.remove(&req.request_id);
        self.current_requests.fetch_sub(1, Ordering::SeqCst);
        self.finished.insert(req.request_id.clone(), result.is_ok());

        match result {
            Ok(text) => Ok(Response::new(proto::WorkerProcessResponse {
                request_id: req.request_id,
                text,
                processing_time_ms: start.elapsed().as_millis() as u64,
                success: true,
            })),
            Err(e) => Ok(Response::new(proto::WorkerProcessResponse {
                request_id: req.request_id,
                text: e.to_string(),
                processing_time_ms: start.elapsed().as_millis() as u64,
                success: false,
            })),
        }
    }

    async fn poll_status(
        &self,
        request: Request<proto::PollStatusRequest>,
    ) -> Result<Response<proto::PollStatusResponse>, Status> {
        let req = request.into_inner();
        if let Some(started) = self.in_flight.get(&req.request_id) {
            let elapsed_ms = started.elapsed().as_millis();
            let percentage = ((elapsed_ms * 100 / ASSUMED_GENERATION_MS) as u32).min(95);
            let eta_seconds = ((ASSUMED_GENERATION_MS.saturating_sub(elapsed_ms)) / 1000) as u32;
            return Ok(Response::new(proto::PollStatusResponse {
                status: proto::ProgressStatus::Processing as i32,
                percentage,
                current_step: "generating".to_string(),
                eta_seconds,
            }));
        }
        match self.finished.get(&req.request_id).map(|r| *r) {
            Some(true) => Ok(Response::new(proto::PollStatusResponse {
                status: proto::ProgressStatus::Completed as i32,
                percentage: 100,
                current_step: "done".to_string(),
                eta_seconds: 0,
            })),
            Some(false) => Ok(Response::new(proto::PollStatusResponse {
                status: proto::ProgressStatus::Error as i32,
                percentage: 0,
                current_step: "failed".to_string(),
                eta_seconds: 0,
            })),
            None => Ok(Response::new(proto::PollStatusResponse {
                status: proto::ProgressStatus::Queued as i32,
                percentage: 0,
                current_step: "queued".to_string(),
                eta_seconds: 0,
            })),
        }
    }

    async fn health_check(
        &self,
        _request: Request<proto::HealthCheckRequest>,
    ) -> Result<Response<proto::HealthCheckResponse>, Status> {
        let current = self.current_requests.load(Ordering::SeqCst);
        let status = if current < self.capacity { proto::HealthStatus::Done } else { proto::HealthStatus::Working };
        Ok(Response::new(proto::HealthCheckResponse {
            status: status as i32,
            current_requests: current as u32,
            capacity: self.capacity as u32,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubBackend;

    #[async_trait]
    impl InferenceBackend for StubBackend {
        async fn generate(&self, model: &str, prompt: &str, _images: &[Vec<u8>]) -> anyhow::Result<String> {
            Ok(format!("[{model}] replying to: {prompt}"))
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl InferenceBackend for FailingBackend {
        async fn generate(&self, _model: &str, _prompt: &str, _images: &[Vec<u8>]) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("backend unavailable"))
        }
    }

    #[tokio::test]
    async fn process_returns_generated_text() {
        let service = WorkerServiceImpl::new(Arc::new(StubBackend), 4);
        let response = service
            .process(Request::new(proto::WorkerProcessRequest {
                request_id: "r1".into(),
                prompt: "hello".into(),
                model: "llama3.2:1b".into(),
                images: vec![],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.text.contains("hello"));
        assert!(response.success);
    }

    #[tokio::test]
    async fn process_failure_is_reported_not_propagated_as_status_error() {
        let service = WorkerServiceImpl::new(Arc::new(FailingBackend), 4);
        let response = service
            .process(Request::new(proto::WorkerProcessRequest {
                request_id: "r2".into(),
                prompt: "hello".into(),
                model: "llama3.2:1b".into(),
                images: vec![],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.success);
    }

    #[tokio::test]
    async fn poll_status_reports_completed_after_process_finishes() {
        let service = WorkerServiceImpl::new(Arc::new(StubBackend), 4);
        service
            .process(Request::new(proto::WorkerProcessRequest {
                request_id: "r3".into(),
                prompt: "hi".into(),
                model: "llama3.2:1b".into(),
                images: vec![],
            }))
            .await
            .unwrap();
        let status = service.poll_status(Request::new(proto::PollStatusRequest { request_id: "r3".into() })).await.unwrap().into_inner();
        assert_eq!(status.status, proto::ProgressStatus::Completed as i32);
    }

    #[tokio::test]
    async fn poll_status_reports_queued_for_unknown_request() {
        let service = WorkerServiceImpl::new(Arc::new(StubBackend), 4);
        let status = service.poll_status(Request::new(proto::PollStatusRequest { request_id: "ghost".into() })).await.unwrap().into_inner();
        assert_eq!(status.status, proto::ProgressStatus::Queued as i32);
    }

    #[tokio::test]
    async fn health_check_reports_capacity() {
        let service = WorkerServiceImpl::new(Arc::new(StubBackend), 2);
        let response = service.health_check(Request::new(proto::HealthCheckRequest {})).await.unwrap().into_inner();
        assert_eq!(response.capacity, 2);
        assert_eq!(response.current_requests, 0);
    }
}
