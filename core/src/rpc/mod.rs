// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The gRPC wire layer: generated message/service stubs plus the
//! coordinator-side and worker-side service implementations and the
//! dispatch-facing client.

pub mod client;
pub mod coordinator_service;
pub mod worker_service;

#[allow(clippy::all, missing_docs)]
pub mod proto {
    tonic::include_proto!("fogmesh");
}

pub use client::GrpcWorkerClient;
pub use coordinator_service::CoordinatorService;
pub use worker_service::{InferenceBackend, OllamaInferenceBackend, WorkerServiceImpl};

pub use proto::coordinator_client::CoordinatorClient;
pub use proto::coordinator_server::{Coordinator, CoordinatorServer};
pub use proto::worker_client::WorkerClient as WorkerRpcClient;
pub use proto::worker_server::{Worker, WorkerServer};
