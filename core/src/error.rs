// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error taxonomy for the coordinator/worker system.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Worker identifier.
pub type WorkerId = String;

/// Request identifier.
pub type RequestId = String;

/// Result type for load-balancer operations.
pub type LbResult<T> = Result<T, LbError>;

/// Errors surfaced by the registry, assignment engine, dispatch engine and
/// RPC surface.
///
/// Worker-level failures (a single worker timing out or erroring mid-dispatch)
/// are absorbed by the dispatch engine and never reach this enum; see
/// `dispatch::DispatchOutcome`. Registry and input-validation failures are
/// surfaced here. Summarizer failures are always absorbed (fallback to the
/// best raw client response) and never produce an `LbError`.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum LbError {
    /// No worker is registered with the given id.
    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    /// A registration request failed validation (missing fields, zero
    /// capacity, malformed address).
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    /// The catalog has no model matching the requested identifier.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// No worker is currently registered at all.
    #[error("no workers registered")]
    NoWorkers,

    /// Every worker that was dispatched to failed or timed out.
    #[error("no successful responses from any worker")]
    NoSuccessfulResponses,

    /// Transport-level failure talking to a worker or the coordinator.
    #[error("communication error: {0}")]
    CommunicationError(String),

    /// A status/health poll exceeded its timeout budget.
    #[error("poll timeout: {0}")]
    PollTimeout(String),

    /// The requested request id has no known dispatch record.
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    /// Any other internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tonic::Status> for LbError {
    fn from(status: tonic::Status) -> Self {
        Self::CommunicationError(status.message().to_string())
    }
}

impl From<LbError> for tonic::Status {
    fn from(err: LbError) -> Self {
        match err {
            LbError::WorkerNotFound(_) | LbError::RequestNotFound(_) => {
                tonic::Status::not_found(err.to_string())
            }
            LbError::InvalidRegistration(_) | LbError::UnknownModel(_) => {
                tonic::Status::invalid_argument(err.to_string())
            }
            LbError::NoWorkers | LbError::NoSuccessfulResponses => {
                tonic::Status::unavailable(err.to_string())
            }
            LbError::PollTimeout(_) => tonic::Status::deadline_exceeded(err.to_string()),
            LbError::CommunicationError(_) | LbError::Internal(_) => {
                tonic::Status::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_not_found_maps_to_not_found_status() {
        let status: tonic::Status = LbError::WorkerNotFound("w1".into()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[test]
    fn no_workers_maps_to_unavailable() {
        let status: tonic::Status = LbError::NoWorkers.into();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }
}
