// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The coordinator's gRPC service implementation: registration, heartbeats,
//! request dispatch, rebalancing and cluster status.

use crate::dispatch::DispatchEngine;
use crate::hardware::HardwareSpecs;
use crate::registry::{WorkerRecord, WorkerRegistry};
use crate::rpc::proto;
use crate::summarizer::Summarizer;
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Implements the generated `Coordinator` service trait over a registry,
/// dispatch engine and summarizer.
pub struct CoordinatorService {
    registry: Arc<WorkerRegistry>,
    dispatch: Arc<DispatchEngine>,
    summarizer: Arc<Summarizer>,
}

impl CoordinatorService {
    /// Build a coordinator service around the given components.
    pub fn new(registry: Arc<WorkerRegistry>, dispatch: Arc<DispatchEngine>, summarizer: Arc<Summarizer>) -> Self {
        Self { registry, dispatch, summarizer }
    }
}

fn proto_hardware_to_domain(h: proto::HardwareSpecs) -> HardwareSpecs {
    HardwareSpecs {
        cpu_cores: h.cpu_cores as usize,
        cpu_ghz: h.cpu_ghz,
        ram_gb: h.ram_gb,
        gpu_name: h.gpu_name,
        gpu_memory_gb: h.gpu_memory_gb,
        os_name: h.os_name,
    }
}

fn domain_hardware_to_proto(h: &HardwareSpecs) -> proto::HardwareSpecs {
    proto::HardwareSpecs {
        cpu_cores: h.cpu_cores as u32,
        cpu_ghz: h.cpu_ghz,
        ram_gb: h.ram_gb,
        gpu_name: h.gpu_name.clone(),
        gpu_memory_gb: h.gpu_memory_gb,
        os_name: h.os_name.clone(),
    }
}

fn worker_to_proto(w: &WorkerRecord) -> proto::WorkerInfo {
    proto::WorkerInfo {
        id: w.id.clone(),
        address: w.address.clone(),
        hardware: Some(domain_hardware_to_proto(&w.hardware)),
        score: w.score,
        installed_models: w.installed_models.clone(),
        assigned_model: w.assigned_model.clone().unwrap_or_default(),
        status: w.status.to_string(),
    }
}

#[tonic::async_trait]
impl proto::coordinator_server::Coordinator for CoordinatorService {
    async fn register_worker(
        &self,
        request: Request<proto::RegisterRequest>,
    ) -> Result<Response<proto::RegisterResponse>, Status> {
        let req = request.into_inner();
        let hardware = req
            .hardware
            .map(proto_hardware_to_domain)
            .ok_or_else(|| Status::invalid_argument("hardware specs are required"))?;

        let record = WorkerRecord::new(req.id.clone(), req.address, hardware, req.installed_models);
        self.registry.register(record).map_err(Into::<Status>::into)?;

        let registered = self.registry.get(&req.id);
        let assigned_model = registered.as_ref().and_then(|w| w.assigned_model.clone()).unwrap_or_default();
        let client_group = registered.as_ref().and_then(|w| w.group_index).unwrap_or(0) as u32;
        let total_clients = self.registry.stats().total_workers as u32;

        tracing::info!(worker_id = %req.id, assigned_model = %assigned_model, "worker registered");

        Ok(Response::new(proto::RegisterResponse {
            accepted: true,
            assigned_model,
            message: "registered".to_string(),
            total_clients,
            client_group,
        }))
    }

    async fn deregister_worker(
        &self,
        request: Request<proto::DeregisterRequest>,
    ) -> Result<Response<proto::DeregisterResponse>, Status> {
        let req = request.into_inner();
        let removed = self.registry.deregister(&req.id).is_some();
        tracing::info!(worker_id = %req.id, removed, "worker deregistration requested");
        Ok(Response::new(proto::DeregisterResponse { accepted: removed }))
    }

    async fn heartbeat(
        &self,
        request: Request<proto::HeartbeatRequest>,
    ) -> Result<Response<proto::HeartbeatResponse>, Status> {
        let req = request.into_inner();
        self.registry.record_heartbeat(&req.id);
        Ok(Response::new(proto::HeartbeatResponse { acknowledged: true }))
    }

    async fn process_request(
        &self,
        request: Request<proto::AiRequest>,
    ) -> Result<Response<proto::AiResponse>, Status> {
        let req = request.into_inner();

        let outcome = self.dispatch.dispatch(&req.request_id, &req.prompt, &req.images).await.map_err(Into::<Status>::into)?;
        let worker_ids = outcome.responses.iter().map(|r| r.worker_id.clone()).collect();
        let final_response = self.summarizer.summarize(&req.prompt, &outcome.responses).await;

        tracing::info!(request_id = %outcome.request_id, responses = outcome.responses.len(), failed = outcome.failed_workers.len(), "request processed");

        Ok(Response::new(proto::AiResponse {
            request_id: outcome.request_id,
            text: final_response.text,
            summarized: final_response.summarized,
            worker_ids,
            failed_worker_ids: outcome.failed_workers,
        }))
    }

    async fn rebalance_assignments(
        &self,
        _request: Request<proto::RebalanceRequest>,
    ) -> Result<Response<proto::RebalanceResponse>, Status> {
        self.registry.rebalance();
        let workers_reassigned = self.registry.list_workers().iter().filter(|w| w.assigned_model.is_some()).count() as u32;
        Ok(Response::new(proto::RebalanceResponse { workers_reassigned }))
    }

    async fn get_cluster_status(
        &self,
        _request: Request<proto::StatusRequest>,
    ) -> Result<Response<proto::StatusResponse>, Status> {
        let stats = self.registry.stats();
        let workers = self.registry.list_workers().iter().map(worker_to_proto).collect();
        Ok(Response::new(proto::StatusResponse {
            total_workers: stats.total_workers as u32,
            active_workers: stats.active_workers as u32,
            total_completed: stats.total_completed,
            total_failed: stats.total_failed,
            workers,
        }))
    }

    async fn health_check(
        &self,
        _request: Request<proto::ClusterHealthRequest>,
    ) -> Result<Response<proto::ClusterHealthResponse>, Status> {
        let stats = self.registry.stats();
        let active_models: Vec<String> = self.registry.catalog().models().iter().map(|m| m.identifier.clone()).collect();
        let healthy = stats.active_workers > 0;
        let message = if healthy {
            format!("{} of {} workers active", stats.active_workers, stats.total_workers)
        } else {
            "no active workers".to_string()
        };
        Ok(Response::new(proto::ClusterHealthResponse {
            healthy,
            message,
            connected_clients: stats.total_workers as u32,
            active_models,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{WorkerProgress, WorkerResponse};
    use crate::summarizer::SummaryBackend;
    use async_trait::async_trait;

    struct EchoClient;

    #[async_trait]
    impl crate::dispatch::WorkerClient for EchoClient {
        async fn process(&self, worker: &WorkerRecord, _request_id: &str, prompt: &str, _images: &[Vec<u8>]) -> crate::error::LbResult<WorkerResponse> {
            Ok(WorkerResponse {
                worker_id: worker.id.clone(),
                model: worker.assigned_model.clone().unwrap_or_default(),
                text: format!("echo: {prompt}"),
                processing_time_ms: 1,
                score: worker.score,
            })
        }

        async fn poll_status(&self, _worker: &WorkerRecord, _request_id: &str) -> crate::error::LbResult<WorkerProgress> {
            Ok(WorkerProgress::Completed)
        }
    }

    struct StubSummaryBackend;

    #[async_trait]
    impl SummaryBackend for StubSummaryBackend {
        async fn generate(&self, _model: &str, prompt: &str) -> anyhow::Result<String> {
            Ok(format!("summary of: {prompt}"))
        }
    }

    fn sample_hardware() -> proto::HardwareSpecs {
        proto::HardwareSpecs { cpu_cores: 8, cpu_ghz: 3.2, ram_gb: 16.0, gpu_name: "Unknown GPU".into(), gpu_memory_gb: 0.0, os_name: "linux".into() }
    }

    #[tokio::test]
    async fn register_then_process_request_end_to_end() {
        let registry = WorkerRegistry::new();
        let dispatch = Arc::new(DispatchEngine::new(registry.clone(), Arc::new(EchoClient)));
        let summarizer = Arc::new(Summarizer::new(Arc::new(StubSummaryBackend)));
        let service = CoordinatorService::new(registry.clone(), dispatch, summarizer);

        let register_response = service
            .register_worker(Request::new(proto::RegisterRequest {
                id: "w1".into(),
                address: "127.0.0.1:50052".into(),
                hardware: Some(sample_hardware()),
                installed_models: vec!["llama3.1:8b".into()],
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(register_response.accepted);
        assert_eq!(register_response.assigned_model, "llama3.1:8b");

        let response = service
            .process_request(Request::new(proto::AiRequest { request_id: String::new(), prompt: "hello".into(), images: vec![] }))
            .await
            .unwrap()
            .into_inner();
        assert!(!response.request_id.is_empty());
        assert_eq!(response.worker_ids, vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn process_request_with_no_workers_is_unavailable() {
        let registry = WorkerRegistry::new();
        let dispatch = Arc::new(DispatchEngine::new(registry.clone(), Arc::new(EchoClient)));
        let summarizer = Arc::new(Summarizer::new(Arc::new(StubSummaryBackend)));
        let service = CoordinatorService::new(registry, dispatch, summarizer);

        let status = service
            .process_request(Request::new(proto::AiRequest { request_id: String::new(), prompt: "hi".into(), images: vec![] }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn health_check_reports_unhealthy_with_no_workers() {
        let registry = WorkerRegistry::new();
        let dispatch = Arc::new(DispatchEngine::new(registry.clone(), Arc::new(EchoClient)));
        let summarizer = Arc::new(Summarizer::new(Arc::new(StubSummaryBackend)));
        let service = CoordinatorService::new(registry, dispatch, summarizer);

        let response = service.health_check(Request::new(proto::ClusterHealthRequest {})).await.unwrap().into_inner();
        assert!(!response.healthy);
    }
}
