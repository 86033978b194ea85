// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The dispatch-facing gRPC client: backs `dispatch::WorkerClient` with
//! real network calls to each worker's `Worker` service, caching one
//! channel per worker address.

use async_trait::async_trait;
use dashmap::DashMap;
use tonic::transport::Channel;

use crate::dispatch::{WorkerProgress, WorkerResponse};
use crate::error::{LbError, LbResult};
use crate::registry::WorkerRecord;
use crate::rpc::proto;

/// A `dispatch::WorkerClient` implementation backed by real gRPC calls,
/// one lazily-connected channel per worker address.
#[derive(Default)]
pub struct GrpcWorkerClient {
    channels: DashMap<String, Channel>,
}

impl GrpcWorkerClient {
    /// An empty client with no cached channels.
    pub fn new() -> Self {
        Self::default()
    }

    async fn channel_for(&self, address: &str) -> LbResult<Channel> {
        if let Some(channel) = self.channels.get(address) {
            return Ok(channel.clone());
        }
        let endpoint = format!("http://{address}");
        let channel = Channel::from_shared(endpoint)
            .map_err(|e| LbError::CommunicationError(e.to_string()))?
            .connect()
            .await
            .map_err(|e| LbError::CommunicationError(e.to_string()))?;
        self.channels.insert(address.to_string(), channel.clone());
        Ok(channel)
    }
}

#[async_trait]
impl crate::dispatch::WorkerClient for GrpcWorkerClient {
    async fn process(&self, worker: &WorkerRecord, request_id: &str, prompt: &str, images: &[Vec<u8>]) -> LbResult<WorkerResponse> {
        let channel = self.channel_for(&worker.address).await?;
        let mut client = proto::worker_client::WorkerClient::new(channel);
        let model = worker.assigned_model.clone().unwrap_or_default();
        let response = client
            .process(proto::WorkerProcessRequest {
                request_id: request_id.to_string(),
                prompt: prompt.to_string(),
                model: model.clone(),
                images: images.to_vec(),
            })
            .await
            .map_err(LbError::from)?
            .into_inner();

        if !response.success {
            return Err(LbError::CommunicationError(format!("worker {} reported failure", worker.id)));
        }

        Ok(WorkerResponse {
            worker_id: worker.id.clone(),
            model,
            text: response.text,
            processing_time_ms: response.processing_time_ms,
            score: worker.score,
        })
    }

    async fn poll_status(&self, worker: &WorkerRecord, request_id: &str) -> LbResult<WorkerProgress> {
        let channel = self.channel_for(&worker.address).await?;
        let mut client = proto::worker_client::WorkerClient::new(channel);
        let response = client
            .poll_status(proto::PollStatusRequest { request_id: request_id.to_string() })
            .await
            .map_err(LbError::from)?
            .into_inner();

        Ok(match proto::ProgressStatus::try_from(response.status) {
            Ok(proto::ProgressStatus::Completed) => WorkerProgress::Completed,
            Ok(proto::ProgressStatus::Error) => WorkerProgress::Error,
            Ok(proto::ProgressStatus::Queued) => WorkerProgress::Queued,
            _ => WorkerProgress::Processing {
                percentage: response.percentage.min(100) as u8,
                current_step: response.current_step,
                eta_seconds: if response.eta_seconds > 0 { Some(response.eta_seconds) } else { None },
            },
        })
    }
}
