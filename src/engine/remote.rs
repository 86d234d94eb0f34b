//! Query engine backed by a remote Jaeger storage plugin over gRPC.

use std::collections::HashMap;

use async_trait::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::{Code, Status, Streaming};

use super::{EngineError, EngineResult, Operation, QueryEngine, Trace};
use crate::codec;
use crate::query::{OperationQueryParameters, TraceGetParameters, TraceQueryParameters};
use crate::rpc::jaeger::api_v2::Span;
use crate::rpc::jaeger::storage::v1::span_reader_plugin_client::SpanReaderPluginClient;
use crate::rpc::jaeger::storage::v1::{
    FindTracesRequest, GetOperationsRequest, GetServicesRequest, GetTraceRequest,
    SpansResponseChunk, TraceQueryParameters as PluginQuery,
};

/// Client of the `jaeger.storage.v1.SpanReaderPlugin` service.
///
/// Cloning is cheap; every clone shares the same underlying channel.
#[derive(Clone)]
pub struct RemoteSpanReader {
    client: SpanReaderPluginClient<Channel>,
}

impl RemoteSpanReader {
    /// Creates a reader for the storage plugin at `uri`.
    ///
    /// The connection is established lazily on the first call, so an
    /// unreachable backend surfaces as an `Unavailable` error per request
    /// rather than at startup.
    pub fn new(uri: http::Uri) -> Self {
        let channel = Channel::builder(uri).connect_lazy();
        let client = SpanReaderPluginClient::new(channel)
            .send_compressed(CompressionEncoding::Gzip)
            .accept_compressed(CompressionEncoding::Gzip);
        Self { client }
    }
}

#[async_trait]
impl QueryEngine for RemoteSpanReader {
    async fn get_trace(&self, params: TraceGetParameters) -> EngineResult<Trace> {
        log::debug!("remote get_trace: Fetching trace {}", params.trace_id);

        let request = GetTraceRequest {
            trace_id: params.trace_id.to_bytes().to_vec(),
            start_time: params.start_time.map(codec::to_timestamp),
            end_time: params.end_time.map(codec::to_timestamp),
        };
        let mut client = self.client.clone();
        let stream = client
            .get_trace(request)
            .await
            .map_err(not_found_aware)?
            .into_inner();
        let spans = collect_spans(stream).await.map_err(not_found_aware)?;

        if spans.is_empty() {
            return Err(EngineError::TraceNotFound);
        }
        log::debug!(
            "remote get_trace: Received {} spans for trace {}",
            spans.len(),
            params.trace_id
        );
        Ok(Trace { spans })
    }

    async fn find_traces(&self, query: TraceQueryParameters) -> EngineResult<Vec<Trace>> {
        log::debug!(
            "remote find_traces: service '{}', operation '{}', {} attribute filters",
            query.service_name,
            query.operation_name,
            query.attributes.len()
        );

        let wire_duration = |duration| {
            codec::to_wire_duration(duration)
                .map_err(|err| EngineError::Backend(Status::invalid_argument(err.to_string())))
        };
        let request = FindTracesRequest {
            query: Some(PluginQuery {
                service_name: query.service_name,
                operation_name: query.operation_name,
                tags: query.attributes,
                start_time_min: Some(codec::to_timestamp(query.start_time_min)),
                start_time_max: Some(codec::to_timestamp(query.start_time_max)),
                duration_min: query.duration_min.map(wire_duration).transpose()?,
                duration_max: query.duration_max.map(wire_duration).transpose()?,
                num_traces: i32::try_from(query.num_traces).unwrap_or(i32::MAX),
            }),
        };

        let mut client = self.client.clone();
        let stream = client.find_traces(request).await?.into_inner();
        let traces = group_by_trace(collect_spans(stream).await?);
        log::debug!("remote find_traces: Received {} traces", traces.len());
        Ok(traces)
    }

    async fn get_services(&self) -> EngineResult<Vec<String>> {
        let mut client = self.client.clone();
        let response = client.get_services(GetServicesRequest {}).await?;
        Ok(response.into_inner().services)
    }

    async fn get_operations(
        &self,
        query: OperationQueryParameters,
    ) -> EngineResult<Vec<Operation>> {
        let mut client = self.client.clone();
        let response = client
            .get_operations(GetOperationsRequest {
                service: query.service_name,
                span_kind: query.span_kind,
            })
            .await?
            .into_inner();

        // Older plugins only fill in the deprecated name list.
        if response.operations.is_empty() {
            return Ok(response
                .operation_names
                .into_iter()
                .map(|name| Operation {
                    name,
                    span_kind: String::new(),
                })
                .collect());
        }
        Ok(response
            .operations
            .into_iter()
            .map(|operation| Operation {
                name: operation.name,
                span_kind: operation.span_kind,
            })
            .collect())
    }
}

/// A plugin `NOT_FOUND` means the trace does not exist.
fn not_found_aware(status: Status) -> EngineError {
    if status.code() == Code::NotFound {
        EngineError::TraceNotFound
    } else {
        EngineError::Backend(status)
    }
}

/// Drains a span chunk stream into one list.
async fn collect_spans(mut stream: Streaming<SpansResponseChunk>) -> Result<Vec<Span>, Status> {
    let mut spans = Vec::new();
    while let Some(chunk) = stream.message().await? {
        log::trace!("collect_spans: Received chunk with {} spans", chunk.spans.len());
        spans.extend(chunk.spans);
    }
    Ok(spans)
}

/// Groups spans into traces, ordering traces by first appearance.
fn group_by_trace(spans: Vec<Span>) -> Vec<Trace> {
    let mut traces: Vec<Trace> = Vec::new();
    let mut index_by_trace_id: HashMap<Vec<u8>, usize> = HashMap::new();
    for span in spans {
        let index = *index_by_trace_id
            .entry(span.trace_id.clone())
            .or_insert_with(|| {
                traces.push(Trace::default());
                traces.len() - 1
            });
        traces[index].spans.push(span);
    }
    traces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::tests::test_span;

    #[test]
    fn test_group_by_trace_keeps_first_seen_order() {
        let spans = vec![
            test_span(2, 1, "svc"),
            test_span(1, 2, "svc"),
            test_span(2, 3, "svc"),
            test_span(3, 4, "svc"),
            test_span(1, 5, "svc"),
        ];
        let traces = group_by_trace(spans);
        let layout: Vec<Vec<String>> = traces
            .iter()
            .map(|trace| {
                trace
                    .spans
                    .iter()
                    .map(|span| span.operation_name.clone())
                    .collect()
            })
            .collect();
        assert_eq!(layout, vec![
            vec!["op-1", "op-3"],
            vec!["op-2", "op-5"],
            vec!["op-4"],
        ]);
    }

    #[test]
    fn test_group_by_trace_empty() {
        assert!(group_by_trace(Vec::new()).is_empty());
    }

    #[test]
    fn test_not_found_status_maps_to_trace_not_found() {
        assert!(matches!(
            not_found_aware(Status::not_found("no such trace")),
            EngineError::TraceNotFound
        ));
        assert!(matches!(
            not_found_aware(Status::unavailable("down")),
            EngineError::Backend(_)
        ));
    }
}
