//! # Query Service Handler
//!
//! Implements `jaeger.api_v3.QueryService` on top of a [`QueryEngine`].
//!
//! Every operation follows the same shape: translate the request into engine
//! parameters, call the engine, convert the result into OTLP and hand it to the
//! client. The transport-neutral part lives in the inherent methods of
//! [`Handler`] so that the HTTP gateway can reuse it unchanged; the gRPC trait
//! implementation only adds request validation and streaming plumbing.

use std::future::Future;
use std::sync::Arc;

use opentelemetry_proto::tonic::trace::v1::TracesData;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::emit::{self, StreamClosed, TraceSink, TracesDataStream};
use crate::engine::{Operation, QueryEngine};
use crate::error::QueryError;
use crate::query::{self, OperationQueryParameters, TraceGetParameters, TraceQueryParameters};
use crate::rpc::jaeger::api_v3::query_service_server::QueryService;
use crate::rpc::jaeger::api_v3::{
    FindTracesRequest, GetOperationsRequest, GetOperationsResponse, GetServicesRequest,
    GetServicesResponse, GetTraceRequest, Operation as ApiOperation,
};

/// Shared by every request; holds nothing but the engine handle.
#[derive(Clone)]
pub struct Handler {
    engine: Arc<dyn QueryEngine>,
}

impl Handler {
    /// Creates a handler serving queries from `engine`.
    ///
    /// # Arguments
    /// * `engine` - Storage access shared by every request
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self { engine }
    }

    /// Fetches one trace and sends it to `sink` as a single message.
    ///
    /// # Arguments
    /// * `params` - Validated lookup parameters
    /// * `sink` - Receives the converted trace
    ///
    /// # Returns
    /// `Ok(())` once the message is sent. Engine failures are wrapped in
    /// [`QueryError::RetrieveTrace`], keeping the engine's error kind.
    pub async fn lookup_trace<S: TraceSink>(
        &self,
        params: TraceGetParameters,
        sink: &mut S,
    ) -> Result<(), QueryError> {
        let trace_id = params.trace_id;
        let trace = self
            .engine
            .get_trace(params)
            .await
            .map_err(QueryError::RetrieveTrace)?;
        log::debug!(
            "lookup_trace: Engine returned {} spans for trace {}",
            trace.spans.len(),
            trace_id
        );
        emit::emit_one(&trace, sink).await
    }

    /// Runs a search and streams every matching trace to `sink` in engine order.
    ///
    /// # Returns
    /// The number of traces sent
    pub async fn search_traces<S: TraceSink>(
        &self,
        query: TraceQueryParameters,
        sink: &mut S,
    ) -> Result<usize, QueryError> {
        let traces = self
            .engine
            .find_traces(query)
            .await
            .map_err(QueryError::Search)?;
        log::debug!("search_traces: Engine returned {} traces", traces.len());
        emit::emit_all(traces, sink).await
    }

    /// Lists every service known to the engine. Engine errors pass through unchanged.
    pub async fn list_services(&self) -> Result<Vec<String>, QueryError> {
        Ok(self.engine.get_services().await?)
    }

    /// Lists the operations of a service in engine order.
    ///
    /// # Arguments
    /// * `query` - Service name and optional span kind filter
    pub async fn list_operations(
        &self,
        query: OperationQueryParameters,
    ) -> Result<Vec<Operation>, QueryError> {
        Ok(self.engine.get_operations(query).await?)
    }
}

type TraceSender = mpsc::Sender<Result<TracesData, Status>>;

/// Runs `work` on its own task and returns the stream it writes into.
///
/// A supervising task watches both the worker and the client. If the client
/// goes away the worker is aborted, which drops any in-flight engine call. If
/// the worker dies without returning, the client gets an `Internal` status
/// instead of a silently truncated stream.
///
/// # Arguments
/// * `operation` - Name used as the log prefix
/// * `work` - Builds the worker future from its own handle on the channel
fn spawn_stream<F, Fut>(operation: &'static str, work: F) -> TracesDataStream
where
    F: FnOnce(TraceSender) -> Fut,
    Fut: Future<Output = Result<(), QueryError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let mut worker = tokio::spawn(work(tx.clone()));
    tokio::spawn(async move {
        let result = tokio::select! {
            joined = &mut worker => {
                joined.unwrap_or_else(|err| Err(QueryError::TaskFailed(err.to_string())))
            }
            _ = tx.closed() => {
                worker.abort();
                Err(StreamClosed.into())
            }
        };
        finish_stream(operation, &tx, result).await;
    });
    ReceiverStream::new(rx)
}

/// Reports how a streaming call ended. Errors are delivered as the final
/// stream item unless the client is already gone.
async fn finish_stream(operation: &'static str, tx: &TraceSender, result: Result<(), QueryError>) {
    match result {
        Ok(()) => {}
        Err(QueryError::StreamClosed(_)) => {
            log::debug!("{}: Client disconnected", operation);
        }
        Err(err) => {
            log::error!("{}: {}", operation, err);
            if tx.send(Err(err.into())).await.is_err() {
                log::debug!("{}: Client disconnected before the error was delivered", operation);
            }
        }
    }
}

#[tonic::async_trait]
impl QueryService for Handler {
    type GetTraceStream = TracesDataStream;

    async fn get_trace(
        &self,
        request: Request<GetTraceRequest>,
    ) -> Result<Response<Self::GetTraceStream>, Status> {
        let request = request.into_inner();
        log::info!("get_trace: Starting request");
        log::debug!("get_trace: Input - {:?}", request);

        let params = query::build_trace_lookup(&request).inspect_err(|err| {
            log::warn!("get_trace: Rejecting request: {}", err);
        })?;

        let handler = self.clone();
        let stream = spawn_stream("get_trace", move |mut tx| async move {
            handler.lookup_trace(params, &mut tx).await
        });
        Ok(Response::new(stream))
    }

    type FindTracesStream = TracesDataStream;

    async fn find_traces(
        &self,
        request: Request<FindTracesRequest>,
    ) -> Result<Response<Self::FindTracesStream>, Status> {
        let request = request.into_inner();
        log::info!("find_traces: Starting request");
        log::debug!("find_traces: Input - {:?}", request);

        let query = query::build_search_query(request).inspect_err(|err| {
            log::warn!("find_traces: Rejecting request: {}", err);
        })?;

        let handler = self.clone();
        let stream = spawn_stream("find_traces", move |mut tx| async move {
            let sent = handler.search_traces(query, &mut tx).await?;
            log::info!("find_traces: Success - Sent {} traces", sent);
            Ok(())
        });
        Ok(Response::new(stream))
    }

    async fn get_services(
        &self,
        _request: Request<GetServicesRequest>,
    ) -> Result<Response<GetServicesResponse>, Status> {
        log::info!("get_services: Starting request");

        let services = self.list_services().await.inspect_err(|err| {
            log::error!("get_services: {}", err);
        })?;
        log::info!("get_services: Success - Found {} services", services.len());
        Ok(Response::new(GetServicesResponse { services }))
    }

    async fn get_operations(
        &self,
        request: Request<GetOperationsRequest>,
    ) -> Result<Response<GetOperationsResponse>, Status> {
        let request = request.into_inner();
        log::info!("get_operations: Starting request");
        log::debug!("get_operations: Input - {:?}", request);

        let operations = self
            .list_operations(query::build_operations_query(request))
            .await
            .inspect_err(|err| log::error!("get_operations: {}", err))?;
        log::info!(
            "get_operations: Success - Found {} operations",
            operations.len()
        );

        let operations = operations
            .into_iter()
            .map(|operation| ApiOperation {
                name: operation.name,
                span_kind: operation.span_kind,
            })
            .collect();
        Ok(Response::new(GetOperationsResponse { operations }))
    }
}
