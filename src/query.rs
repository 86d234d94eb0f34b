//! # Query Parameter Translation
//!
//! Builds the engine-facing query structures from `api_v3` requests.
//!
//! Single trace lookups and trace searches are validated by separate
//! functions on purpose: a lookup treats its time window as an optional
//! refinement, while a search must always carry both `start_time_min` and
//! `start_time_max` so the engine never scans an unbounded time range.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use crate::codec;
use crate::error::QueryError;
use crate::model::TraceId;
use crate::rpc::jaeger::api_v3::{FindTracesRequest, GetOperationsRequest, GetTraceRequest};

/// Parameters of a single trace lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceGetParameters {
    pub trace_id: TraceId,
    /// Lower bound on span start times, if the client narrowed the lookup.
    pub start_time: Option<SystemTime>,
    /// Upper bound on span start times.
    pub end_time: Option<SystemTime>,
}

/// Parameters of a multi-trace search.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceQueryParameters {
    /// Service to search; empty matches any.
    pub service_name: String,
    /// Operation to search; empty matches any.
    pub operation_name: String,
    /// Equality filters on span and resource attributes.
    pub attributes: HashMap<String, String>,
    /// Earliest trace start time searched.
    pub start_time_min: SystemTime,
    /// Latest trace start time searched.
    pub start_time_max: SystemTime,
    pub duration_min: Option<Duration>,
    pub duration_max: Option<Duration>,
    /// Zero lets the engine apply its own default.
    pub num_traces: usize,
}

/// Parameters of an operation listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationQueryParameters {
    pub service_name: String,
    /// Empty matches every span kind.
    pub span_kind: String,
}

/// Builds lookup parameters from a `GetTrace` request.
///
/// Only the trace ID is validated. Time bounds are optional refinements and
/// are converted leniently.
///
/// # Arguments
/// * `request` - The incoming `GetTrace` request
///
/// # Returns
/// Lookup parameters, or [`QueryError::MalformedTraceId`] if the ID does not parse
pub fn build_trace_lookup(request: &GetTraceRequest) -> Result<TraceGetParameters, QueryError> {
    let trace_id = request.trace_id.parse::<TraceId>()?;
    Ok(TraceGetParameters {
        trace_id,
        start_time: request.start_time.as_ref().map(codec::to_system_time),
        end_time: request.end_time.as_ref().map(codec::to_system_time),
    })
}

/// Builds search parameters from a `FindTraces` request.
///
/// # Arguments
/// * `request` - The incoming `FindTraces` request
///
/// # Returns
/// Search parameters, or an invalid-input error when:
/// - the query body is missing
/// - either start time bound is missing or out of range
/// - a duration bound is malformed or negative
pub fn build_search_query(request: FindTracesRequest) -> Result<TraceQueryParameters, QueryError> {
    let query = request.query.ok_or(QueryError::MissingQuery)?;
    let (Some(start_time_min), Some(start_time_max)) = (&query.start_time_min, &query.start_time_max)
    else {
        return Err(QueryError::MissingTimeRange);
    };

    let start_time_min = codec::try_to_system_time(start_time_min).map_err(|source| {
        QueryError::InvalidTime {
            field: "start_time_min",
            source,
        }
    })?;
    let start_time_max = codec::try_to_system_time(start_time_max).map_err(|source| {
        QueryError::InvalidTime {
            field: "start_time_max",
            source,
        }
    })?;
    let duration_min = query
        .duration_min
        .as_ref()
        .map(codec::try_to_duration)
        .transpose()
        .map_err(|source| QueryError::InvalidDuration {
            field: "duration_min",
            source,
        })?;
    let duration_max = query
        .duration_max
        .as_ref()
        .map(codec::try_to_duration)
        .transpose()
        .map_err(|source| QueryError::InvalidDuration {
            field: "duration_max",
            source,
        })?;

    Ok(TraceQueryParameters {
        service_name: query.service_name,
        operation_name: query.operation_name,
        attributes: query.attributes,
        start_time_min,
        start_time_max,
        duration_min,
        duration_max,
        num_traces: usize::try_from(query.num_traces).unwrap_or(0),
    })
}

/// Builds operation listing parameters. Fields are copied verbatim and never fail.
pub fn build_operations_query(request: GetOperationsRequest) -> OperationQueryParameters {
    OperationQueryParameters {
        service_name: request.service,
        span_kind: request.span_kind,
    }
}
