//! # Query Engine Boundary
//!
//! The handler reaches trace storage only through [`QueryEngine`]. Any
//! implementation providing these four operations can back the query service;
//! the production one is [`RemoteSpanReader`], which speaks the Jaeger storage
//! plugin protocol.

use async_trait::async_trait;
use thiserror::Error;

use crate::query::{OperationQueryParameters, TraceGetParameters, TraceQueryParameters};
use crate::rpc::jaeger::api_v2::Span;

mod remote;

#[cfg(test)]
pub mod mock;

pub use remote::RemoteSpanReader;

/// All spans of one trace, in the order the engine returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    /// Jaeger-model spans, all sharing one trace ID.
    pub spans: Vec<Span>,
}

/// An operation recorded for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Operation (span) name.
    pub name: String,
    /// Span kind as recorded by the backend, e.g. `server`. May be empty.
    pub span_kind: String,
}

/// Failure reported by a [`QueryEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// No spans exist for the requested trace ID.
    #[error("trace not found")]
    TraceNotFound,
    /// The backend call failed; its status is passed through as-is.
    #[error("{}", .0.message())]
    Backend(#[from] tonic::Status),
}

impl EngineError {
    /// gRPC code of the failure. Backend codes are preserved.
    pub fn code(&self) -> tonic::Code {
        match self {
            EngineError::TraceNotFound => tonic::Code::NotFound,
            EngineError::Backend(status) => status.code(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Read access to trace storage.
///
/// Implementations are shared between concurrent requests behind an `Arc`.
#[async_trait]
pub trait QueryEngine: Send + Sync + 'static {
    /// Fetches every span of one trace.
    ///
    /// # Arguments
    /// * `params` - Trace ID and an optional time window narrowing the lookup
    ///
    /// # Returns
    /// The trace, or [`EngineError::TraceNotFound`] when no spans exist
    async fn get_trace(&self, params: TraceGetParameters) -> EngineResult<Trace>;

    /// Searches for traces matching `query`.
    ///
    /// # Returns
    /// Matching traces in the engine's own order; the order is kept all the
    /// way to the client
    async fn find_traces(&self, query: TraceQueryParameters) -> EngineResult<Vec<Trace>>;

    /// Lists the names of every service with recorded spans.
    async fn get_services(&self) -> EngineResult<Vec<String>>;

    /// Lists the operations recorded for a service, optionally filtered by span kind.
    async fn get_operations(&self, query: OperationQueryParameters)
    -> EngineResult<Vec<Operation>>;
}
