//! # HTTP Gateway
//!
//! JSON rendition of the query service for clients that cannot speak gRPC.
//!
//! Query strings are turned into the same `jaeger.api_v3` request messages a
//! gRPC client would send, then go through the regular translator and
//! [`Handler`]. Streaming results are collected and returned as one document.
//!
//! ## Endpoints
//!
//! - `GET /api/v3/services` - List all services
//! - `GET /api/v3/operations` - List operations of a service
//! - `GET /api/v3/traces` - Search traces
//! - `GET /api/v3/traces/{trace_id}` - Get a trace by ID
//!
//! Times are microseconds since the Unix epoch and durations are microseconds.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use opentelemetry_proto::tonic::trace::v1::TracesData;
use prost_types::{Duration as WellKnownDuration, Timestamp as WellKnownTimestamp};
use serde::{Deserialize, Serialize};
use serde_with::{NoneAsEmptyString, serde_as};
use tonic::Code;

use crate::error::QueryError;
use crate::handler::Handler;
use crate::query;
use crate::rpc::jaeger::api_v3::{
    FindTracesRequest, GetOperationsRequest, GetTraceRequest, TraceQueryParameters,
};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Builds the gateway routes.
///
/// # Arguments
/// * `handler` - Query handler shared with the gRPC service
///
/// # Returns
/// A router with all `/api/v3` endpoints, ready for `axum::serve`
pub fn router(handler: Handler) -> Router {
    Router::new()
        .route("/api/v3/services", get(get_services))
        .route("/api/v3/operations", get(get_operations))
        .route("/api/v3/traces", get(find_traces))
        .route("/api/v3/traces/{trace_id}", get(get_trace))
        .with_state(handler)
}

/// Error payload, modeled on the Jaeger HTTP API's error envelope.
#[derive(Serialize, Debug)]
struct ErrorBody {
    #[serde(rename = "httpCode")]
    http_code: u16,
    message: String,
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: ErrorBody,
}

/// HTTP status for a gRPC code. Only bad input and missing traces are
/// distinguished; every other failure is a server error.
fn http_status(code: Code) -> StatusCode {
    match code {
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let status = http_status(self.code());
        let body = ErrorResponse {
            error: ErrorBody {
                http_code: status.as_u16(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Response body of both trace endpoints.
#[derive(Serialize, Debug)]
struct TracesResponse {
    result: TracesData,
}

#[derive(Serialize, Debug)]
struct ServicesResponse {
    services: Vec<String>,
}

#[derive(Serialize, Debug, PartialEq)]
struct OperationRecord {
    name: String,
    #[serde(rename = "spanKind")]
    span_kind: String,
}

#[derive(Serialize, Debug)]
struct OperationsResponse {
    operations: Vec<OperationRecord>,
}

/// Parses a microsecond value from a query parameter.
///
/// # Arguments
/// * `name` - Parameter name, reported back in the error
/// * `raw` - Parameter value as sent
fn parse_micros(name: &'static str, raw: &str) -> Result<i64, QueryError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|err| QueryError::InvalidParameter {
            name,
            reason: err.to_string(),
        })
}

/// Microseconds since the epoch to a normalized wire timestamp.
fn micros_to_timestamp(micros: i64) -> WellKnownTimestamp {
    WellKnownTimestamp {
        seconds: micros.div_euclid(MICROS_PER_SECOND),
        nanos: (micros.rem_euclid(MICROS_PER_SECOND) * 1000) as i32,
    }
}

/// Keeps seconds and nanos on the same side of zero, so negative values reach
/// the duration codec intact and get rejected there.
fn micros_to_duration(micros: i64) -> WellKnownDuration {
    WellKnownDuration {
        seconds: micros / MICROS_PER_SECOND,
        nanos: ((micros % MICROS_PER_SECOND) * 1000) as i32,
    }
}

fn timestamp_param(
    name: &'static str,
    raw: Option<&str>,
) -> Result<Option<WellKnownTimestamp>, QueryError> {
    raw.map(|raw| parse_micros(name, raw).map(micros_to_timestamp))
        .transpose()
}

fn duration_param(
    name: &'static str,
    raw: Option<&str>,
) -> Result<Option<WellKnownDuration>, QueryError> {
    raw.map(|raw| parse_micros(name, raw).map(micros_to_duration))
        .transpose()
}

/// `tags` is a JSON object of string values, e.g. `{"http.status_code":"500"}`.
fn tags_param(raw: Option<&str>) -> Result<HashMap<String, String>, QueryError> {
    match raw {
        None => Ok(HashMap::new()),
        Some(raw) => serde_json::from_str(raw).map_err(|err| QueryError::InvalidParameter {
            name: "tags",
            reason: err.to_string(),
        }),
    }
}

/// Query parameters for the trace lookup endpoint.
#[serde_as]
#[derive(Deserialize, Debug, Default)]
pub struct TraceQuery {
    /// Lower time bound (microseconds since epoch)
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    start: Option<String>,
    /// Upper time bound (microseconds since epoch)
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    end: Option<String>,
}

/// Handler for GET /api/v3/traces/{trace_id}
///
/// Looks up a single trace by its hex ID.
///
/// # Query Parameters
/// - `start`: Optional lower time bound (microseconds since epoch)
/// - `end`: Optional upper time bound (microseconds since epoch)
///
/// # Returns
/// The trace as OTLP JSON, 400 for a malformed ID, 404 for an unknown trace
async fn get_trace(
    State(handler): State<Handler>,
    Path(trace_id): Path<String>,
    Query(params): Query<TraceQuery>,
) -> Result<Json<TracesResponse>, QueryError> {
    log::info!("gateway get_trace: Starting request");
    log::debug!("gateway get_trace: Input - {} {:?}", trace_id, params);

    let request = GetTraceRequest {
        trace_id,
        start_time: timestamp_param("start", params.start.as_deref())?,
        end_time: timestamp_param("end", params.end.as_deref())?,
    };
    let lookup = query::build_trace_lookup(&request)?;

    let mut collected: Vec<TracesData> = Vec::new();
    handler
        .lookup_trace(lookup, &mut collected)
        .await
        .inspect_err(|err| log::error!("gateway get_trace: {}", err))?;

    Ok(Json(TracesResponse {
        result: merge(collected),
    }))
}

/// Query parameters for the traces search endpoint.
#[serde_as]
#[derive(Deserialize, Debug, Default)]
pub struct TracesQuery {
    #[serde(default)]
    service: Option<String>,
    #[serde(default)]
    operation: Option<String>,
    /// JSON object of attribute equality filters
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    tags: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    start: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    end: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default, rename = "minDuration")]
    min_duration: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default, rename = "maxDuration")]
    max_duration: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    limit: Option<String>,
}

impl TracesQuery {
    /// Builds the `FindTraces` request a gRPC client would send.
    fn into_request(self) -> Result<FindTracesRequest, QueryError> {
        let num_traces = match self.limit.as_deref() {
            None => 0,
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map(|limit| i32::try_from(limit).unwrap_or(i32::MAX))
                .map_err(|err| QueryError::InvalidParameter {
                    name: "limit",
                    reason: err.to_string(),
                })?,
        };

        Ok(FindTracesRequest {
            query: Some(TraceQueryParameters {
                service_name: self.service.unwrap_or_default(),
                operation_name: self.operation.unwrap_or_default(),
                attributes: tags_param(self.tags.as_deref())?,
                start_time_min: timestamp_param("start", self.start.as_deref())?,
                start_time_max: timestamp_param("end", self.end.as_deref())?,
                duration_min: duration_param("minDuration", self.min_duration.as_deref())?,
                duration_max: duration_param("maxDuration", self.max_duration.as_deref())?,
                num_traces,
            }),
        })
    }
}

/// Handler for GET /api/v3/traces
///
/// Searches for traces and returns all matches merged into one document.
///
/// # Query Parameters
/// - `service`: Service name filter
/// - `operation`: Operation name filter
/// - `tags`: JSON object of attribute filters
/// - `start`, `end`: Required time range (microseconds since epoch)
/// - `minDuration`, `maxDuration`: Duration filters (microseconds)
/// - `limit`: Maximum number of traces; empty lets the engine decide
async fn find_traces(
    State(handler): State<Handler>,
    Query(params): Query<TracesQuery>,
) -> Result<Json<TracesResponse>, QueryError> {
    log::info!("gateway find_traces: Starting request");
    log::debug!("gateway find_traces: Input - {:?}", params);

    let search = query::build_search_query(params.into_request()?).inspect_err(|err| {
        log::warn!("gateway find_traces: Rejecting request: {}", err);
    })?;

    let mut collected: Vec<TracesData> = Vec::new();
    let sent = handler
        .search_traces(search, &mut collected)
        .await
        .inspect_err(|err| log::error!("gateway find_traces: {}", err))?;
    log::info!("gateway find_traces: Success - Found {} traces", sent);

    Ok(Json(TracesResponse {
        result: merge(collected),
    }))
}

/// Handler for GET /api/v3/services
///
/// # Returns
/// All service names known to the storage backend
async fn get_services(State(handler): State<Handler>) -> Result<Json<ServicesResponse>, QueryError> {
    log::info!("gateway get_services: Starting request");
    let services = handler
        .list_services()
        .await
        .inspect_err(|err| log::error!("gateway get_services: {}", err))?;
    Ok(Json(ServicesResponse { services }))
}

/// Query parameters for the operations endpoint.
#[derive(Deserialize, Debug, Default)]
pub struct OperationsQuery {
    /// Service whose operations are listed
    #[serde(default)]
    service: Option<String>,
    /// Optional span kind filter
    #[serde(default, rename = "spanKind")]
    span_kind: Option<String>,
}

/// Handler for GET /api/v3/operations
///
/// # Returns
/// `{name, spanKind}` records in backend order
async fn get_operations(
    State(handler): State<Handler>,
    Query(params): Query<OperationsQuery>,
) -> Result<Json<OperationsResponse>, QueryError> {
    log::info!("gateway get_operations: Starting request");
    log::debug!("gateway get_operations: Input - {:?}", params);

    let request = GetOperationsRequest {
        service: params.service.unwrap_or_default(),
        span_kind: params.span_kind.unwrap_or_default(),
    };
    let operations = handler
        .list_operations(query::build_operations_query(request))
        .await
        .inspect_err(|err| log::error!("gateway get_operations: {}", err))?;

    Ok(Json(OperationsResponse {
        operations: operations
            .into_iter()
            .map(|operation| OperationRecord {
                name: operation.name,
                span_kind: operation.span_kind,
            })
            .collect(),
    }))
}

/// Concatenates per-trace results into one `TracesData`, keeping order.
fn merge(collected: Vec<TracesData>) -> TracesData {
    TracesData {
        resource_spans: collected
            .into_iter()
            .flat_map(|traces_data| traces_data.resource_spans)
            .collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, UNIX_EPOCH};

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::convert::tests::test_span;
    use crate::engine::mock::MockEngine;
    use crate::engine::{Operation, Trace};
    use crate::model::TraceId;

    fn app(engine: &Arc<MockEngine>) -> Router {
        router(Handler::new(engine.clone()))
    }

    async fn call(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_services() {
        let engine = Arc::new(
            MockEngine::default().with_services(Ok(vec!["frontend".to_string(), "db".to_string()])),
        );
        let (status, body) = call(app(&engine), "/api/v3/services").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"services": ["frontend", "db"]}));
    }

    #[tokio::test]
    async fn test_operations() {
        let engine = Arc::new(MockEngine::default().with_operations(Ok(vec![
            Operation {
                name: "charge".to_string(),
                span_kind: "server".to_string(),
            },
            Operation {
                name: "refund".to_string(),
                span_kind: "client".to_string(),
            },
        ])));
        let (status, body) = call(app(&engine), "/api/v3/operations?service=checkout").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"operations": [
                {"name": "charge", "spanKind": "server"},
                {"name": "refund", "spanKind": "client"},
            ]})
        );

        let query = engine.last_operations_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.service_name, "checkout");
        assert_eq!(query.span_kind, "");
    }

    #[tokio::test]
    async fn test_search_requires_time_range() {
        let engine = Arc::new(MockEngine::default());
        let (status, body) = call(app(&engine), "/api/v3/traces?service=checkout&start=1000").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["httpCode"], 400);
        assert_eq!(
            body["error"]["message"],
            "start time min and max are required parameters"
        );
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_search_translates_parameters() {
        let engine = Arc::new(MockEngine::default().with_traces(Ok(vec![
            Trace {
                spans: vec![test_span(1, 1, "checkout")],
            },
            Trace {
                spans: vec![test_span(2, 1, "checkout")],
            },
        ])));
        let uri = "/api/v3/traces?service=checkout&operation=charge\
                   &tags=%7B%22error%22%3A%22true%22%7D\
                   &start=1500000&end=3000000&minDuration=2500&maxDuration=&limit=20";
        let (status, body) = call(app(&engine), uri).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["result"].is_object());

        let search = engine.last_search.lock().unwrap().clone().unwrap();
        assert_eq!(search.service_name, "checkout");
        assert_eq!(search.operation_name, "charge");
        assert_eq!(search.attributes.get("error").map(String::as_str), Some("true"));
        assert_eq!(search.start_time_min, UNIX_EPOCH + Duration::from_micros(1_500_000));
        assert_eq!(search.start_time_max, UNIX_EPOCH + Duration::from_secs(3));
        assert_eq!(search.duration_min, Some(Duration::from_micros(2500)));
        assert_eq!(search.duration_max, None);
        assert_eq!(search.num_traces, 20);
    }

    #[tokio::test]
    async fn test_search_rejects_malformed_numbers() {
        let engine = Arc::new(MockEngine::default());
        for uri in [
            "/api/v3/traces?start=abc&end=2000",
            "/api/v3/traces?start=1000&end=2000&limit=-3",
            "/api/v3/traces?start=1000&end=2000&minDuration=-5",
            "/api/v3/traces?start=1000&end=2000&tags=notjson",
        ] {
            let (status, _) = call(app(&engine), uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        }
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_trace_lookup() {
        let engine = Arc::new(MockEngine::default().with_trace(Ok(Trace {
            spans: vec![test_span(0xab, 1, "checkout"), test_span(0xab, 2, "checkout")],
        })));
        let (status, body) = call(app(&engine), "/api/v3/traces/ab?start=1000000").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["result"].is_object());

        let lookup = engine.last_lookup.lock().unwrap().clone().unwrap();
        assert_eq!(lookup.trace_id, TraceId::new(0, 0xab));
        assert_eq!(lookup.start_time, Some(UNIX_EPOCH + Duration::from_secs(1)));
        assert_eq!(lookup.end_time, None);
    }

    #[tokio::test]
    async fn test_unknown_trace_is_not_found() {
        let engine = Arc::new(MockEngine::default());
        let (status, body) = call(app(&engine), "/api/v3/traces/abc").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["httpCode"], 404);
    }

    #[tokio::test]
    async fn test_malformed_trace_id_is_bad_request() {
        let engine = Arc::new(MockEngine::default());
        let (status, _) = call(app(&engine), "/api/v3/traces/not-hex").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_is_internal_error() {
        let engine = Arc::new(MockEngine::default().with_services(Err(Code::Unavailable)));
        let (status, body) = call(app(&engine), "/api/v3/services").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["httpCode"], 500);
    }

    #[test]
    fn test_micros_to_timestamp_handles_negative_values() {
        assert_eq!(
            micros_to_timestamp(-1),
            WellKnownTimestamp {
                seconds: -1,
                nanos: 999_999_000
            }
        );
        assert_eq!(
            micros_to_timestamp(2_500_000),
            WellKnownTimestamp {
                seconds: 2,
                nanos: 500_000_000
            }
        );
    }

    #[test]
    fn test_merge_concatenates_resources() {
        let traces_data = crate::convert::spans_to_otlp(&[test_span(1, 1, "a")]).unwrap();
        let merged = merge(vec![traces_data.clone(), traces_data]);
        assert_eq!(merged.resource_spans.len(), 2);
    }
}
