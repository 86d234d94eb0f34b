//! Error taxonomy of the query service and its mapping onto gRPC status codes.

use thiserror::Error;
use tonic::{Code, Status};

use crate::codec::CodecError;
use crate::convert::ConversionError;
use crate::emit::StreamClosed;
use crate::engine::EngineError;
use crate::model::TraceIdError;

/// Everything that can go wrong while serving a query.
///
/// Variants fall into four groups: invalid input, rejected before the engine is
/// called; engine failures; conversion failures on engine output; and the
/// client going away or the worker task dying mid-stream.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The trace ID string is not 1 to 32 hex digits.
    #[error("malformed trace ID: {0}")]
    MalformedTraceId(#[from] TraceIdError),
    /// `FindTraces` was sent without a query body.
    #[error("missing query")]
    MissingQuery,
    /// A search is missing one or both start time bounds.
    #[error("start time min and max are required parameters")]
    MissingTimeRange,
    /// A time bound has no valid internal equivalent.
    #[error("invalid {field}: {source}")]
    InvalidTime {
        field: &'static str,
        source: CodecError,
    },
    /// A duration bound is malformed or negative.
    #[error("invalid {field}: {source}")]
    InvalidDuration {
        field: &'static str,
        source: CodecError,
    },
    /// A gateway query parameter could not be parsed.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    /// The engine failed a single trace lookup.
    #[error("cannot retrieve trace: {0}")]
    RetrieveTrace(#[source] EngineError),
    /// The engine failed a trace search.
    #[error("search failed: {0}")]
    Search(#[source] EngineError),
    /// The engine failed a pass-through call (services, operations).
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// An engine trace could not be converted to OTLP.
    #[error("cannot convert trace to OTLP: {0}")]
    Conversion(#[from] ConversionError),
    /// The client stopped reading the response stream.
    #[error(transparent)]
    StreamClosed(#[from] StreamClosed),
    /// The task producing a response stream panicked or was cancelled.
    #[error("query task failed: {0}")]
    TaskFailed(String),
}

impl QueryError {
    /// True for errors raised before the query engine was called.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            QueryError::MalformedTraceId(_)
                | QueryError::MissingQuery
                | QueryError::MissingTimeRange
                | QueryError::InvalidTime { .. }
                | QueryError::InvalidDuration { .. }
                | QueryError::InvalidParameter { .. }
        )
    }

    /// gRPC status code reported to the client.
    ///
    /// Invalid input maps to `InvalidArgument`. Engine failures keep the
    /// engine's code, so a missing trace stays `NotFound`. A closed stream is
    /// `Cancelled` and everything else is `Internal`.
    pub fn code(&self) -> Code {
        match self {
            _ if self.is_invalid_input() => Code::InvalidArgument,
            QueryError::RetrieveTrace(err) | QueryError::Search(err) | QueryError::Engine(err) => {
                err.code()
            }
            QueryError::StreamClosed(_) => Code::Cancelled,
            _ => Code::Internal,
        }
    }
}

impl From<QueryError> for Status {
    fn from(err: QueryError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}
