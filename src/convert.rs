//! # Jaeger Model to OTLP Conversion
//!
//! Turns the spans of one trace, as returned by the storage backend in the
//! Jaeger model, into an OpenTelemetry `TracesData` message.
//!
//! Spans are grouped into one `ResourceSpans` per distinct process and, inside
//! it, one `ScopeSpans` per instrumentation scope. Tags that the Jaeger model
//! uses to carry OTLP concepts (span kind, status, scope) are lifted back into
//! their OTLP fields; every other tag becomes an attribute.

use std::time::Duration;

use opentelemetry_proto::tonic::common::v1::{
    AnyValue, InstrumentationScope, KeyValue as OtlpKeyValue, any_value::Value,
};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::span::{Event, Link, SpanKind};
use opentelemetry_proto::tonic::trace::v1::status::StatusCode;
use opentelemetry_proto::tonic::trace::v1::{
    ResourceSpans, ScopeSpans, Span as OtlpSpan, Status, TracesData,
};
use thiserror::Error;

use crate::codec::{self, CodecError};
use crate::model::TraceId;
use crate::rpc::jaeger::api_v2::{KeyValue, Log, Process, Span, SpanRefType, ValueType};

const SERVICE_NAME: &str = "service.name";
const NO_SERVICE_NAME: &str = "OTLPResourceNoServiceName";
const SPAN_KIND: &str = "span.kind";
const SCOPE_NAME: &str = "otel.scope.name";
const SCOPE_VERSION: &str = "otel.scope.version";
const LIBRARY_NAME: &str = "otel.library.name";
const LIBRARY_VERSION: &str = "otel.library.version";
const STATUS_CODE: &str = "otel.status_code";
const STATUS_DESCRIPTION: &str = "otel.status_description";
const ERROR: &str = "error";
const EVENT: &str = "event";
const REF_TYPE: &str = "opentracing.ref_type";

/// Span data that has no OTLP representation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionError {
    /// Storage trace IDs must be exactly 16 bytes.
    #[error("span {span_id}: trace ID must be 16 bytes, got {len}")]
    InvalidTraceId { span_id: String, len: usize },
    /// Storage span IDs must be exactly 8 bytes.
    #[error("span ID must be 8 bytes, got {len}")]
    InvalidSpanId { len: usize },
    /// OTLP spans always carry a start time.
    #[error("span {span_id} has no start time")]
    MissingStartTime { span_id: String },
    /// A span or log timestamp cannot be expressed as unix nanos.
    #[error("span {span_id}: {source}")]
    InvalidTime { span_id: String, source: CodecError },
    #[error("span {span_id}: end time overflows")]
    EndTimeOverflow { span_id: String },
    /// A tag's value type is not one of the Jaeger model's known types.
    #[error("span {span_id}: tag {key:?} has unsupported value type {v_type}")]
    UnsupportedValueType {
        span_id: String,
        key: String,
        v_type: i32,
    },
}

/// Converts the spans of one trace into OTLP.
///
/// # Arguments
/// * `spans` - All spans of the trace, in storage order
///
/// # Returns
/// A `TracesData` holding every span, or the first span that cannot be represented
pub fn spans_to_otlp(spans: &[Span]) -> Result<TracesData, ConversionError> {
    let mut resources: Vec<(Option<&Process>, ResourceSpans)> = Vec::new();

    for span in spans {
        let span_id = hex::encode(&span.span_id);
        let trace_id =
            TraceId::from_bytes(&span.trace_id).map_err(|_| ConversionError::InvalidTraceId {
                span_id: span_id.clone(),
                len: span.trace_id.len(),
            })?;
        log::trace!(
            "spans_to_otlp: Converting span {} ({}) of trace {}",
            span_id,
            span.operation_name,
            trace_id
        );

        let process = span.process.as_ref();
        let index = match resources.iter().position(|(known, _)| *known == process) {
            Some(index) => index,
            None => {
                let resource_spans = ResourceSpans {
                    resource: Some(convert_process(process, &span_id)?),
                    ..Default::default()
                };
                resources.push((process, resource_spans));
                resources.len() - 1
            }
        };

        let (scope, otlp_span) = convert_span(span, &span_id)?;
        let scope_spans = &mut resources[index].1.scope_spans;
        match scope_spans
            .iter_mut()
            .find(|known| known.scope.as_ref() == Some(&scope))
        {
            Some(known) => known.spans.push(otlp_span),
            None => scope_spans.push(ScopeSpans {
                scope: Some(scope),
                spans: vec![otlp_span],
                ..Default::default()
            }),
        }
    }

    Ok(TracesData {
        resource_spans: resources
            .into_iter()
            .map(|(_, resource_spans)| resource_spans)
            .collect(),
    })
}

/// Builds the OTLP resource for a process. The service name always comes first.
fn convert_process(process: Option<&Process>, span_id: &str) -> Result<Resource, ConversionError> {
    let service_name = process
        .map(|process| process.service_name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(NO_SERVICE_NAME);

    let mut attributes = vec![string_attribute(SERVICE_NAME, service_name)];
    for tag in process.into_iter().flat_map(|process| &process.tags) {
        attributes.push(convert_key_value(tag, span_id)?);
    }
    Ok(Resource {
        attributes,
        ..Default::default()
    })
}

fn convert_span(
    span: &Span,
    span_id: &str,
) -> Result<(InstrumentationScope, OtlpSpan), ConversionError> {
    if span.span_id.len() != 8 {
        return Err(ConversionError::InvalidSpanId {
            len: span.span_id.len(),
        });
    }

    let start_time = span
        .start_time
        .as_ref()
        .ok_or_else(|| ConversionError::MissingStartTime {
            span_id: span_id.to_string(),
        })?;
    let invalid_time = |source| ConversionError::InvalidTime {
        span_id: span_id.to_string(),
        source,
    };
    let start_time_unix_nano = codec::to_unix_nanos(start_time).map_err(invalid_time)?;
    let duration = match &span.duration {
        Some(duration) => codec::try_to_duration(duration).map_err(invalid_time)?,
        None => Duration::ZERO,
    };
    let end_time_unix_nano = u64::try_from(duration.as_nanos())
        .ok()
        .and_then(|nanos| start_time_unix_nano.checked_add(nanos))
        .ok_or_else(|| ConversionError::EndTimeOverflow {
            span_id: span_id.to_string(),
        })?;

    let mut reserved = ReservedTags::default();
    let mut attributes = Vec::with_capacity(span.tags.len());
    for tag in &span.tags {
        if !reserved.absorb(tag) {
            attributes.push(convert_key_value(tag, span_id)?);
        }
    }

    // The first CHILD_OF reference within the same trace is the parent,
    // every other reference is carried as a link.
    let parent = span.references.iter().position(|reference| {
        reference.ref_type == SpanRefType::ChildOf as i32 && reference.trace_id == span.trace_id
    });
    let parent_span_id = parent
        .map(|index| span.references[index].span_id.clone())
        .unwrap_or_default();
    let links = span
        .references
        .iter()
        .enumerate()
        .filter(|(index, _)| Some(*index) != parent)
        .map(|(_, reference)| {
            let ref_type = if reference.ref_type == SpanRefType::FollowsFrom as i32 {
                "follows_from"
            } else {
                "child_of"
            };
            Link {
                trace_id: reference.trace_id.clone(),
                span_id: reference.span_id.clone(),
                attributes: vec![string_attribute(REF_TYPE, ref_type)],
                ..Default::default()
            }
        })
        .collect();

    let events = span
        .logs
        .iter()
        .map(|log| convert_log(log, span_id))
        .collect::<Result<Vec<_>, _>>()?;

    let otlp_span = OtlpSpan {
        trace_id: span.trace_id.clone(),
        span_id: span.span_id.clone(),
        parent_span_id,
        name: span.operation_name.clone(),
        kind: reserved.kind.unwrap_or(SpanKind::Unspecified) as i32,
        start_time_unix_nano,
        end_time_unix_nano,
        attributes,
        events,
        links,
        status: reserved.status(),
        ..Default::default()
    };
    Ok((reserved.scope, otlp_span))
}

/// A Jaeger log becomes a span event; its first string `event` field is the name.
fn convert_log(log: &Log, span_id: &str) -> Result<Event, ConversionError> {
    let time_unix_nano = match &log.timestamp {
        Some(timestamp) => {
            codec::to_unix_nanos(timestamp).map_err(|source| ConversionError::InvalidTime {
                span_id: span_id.to_string(),
                source,
            })?
        }
        None => 0,
    };

    let mut name = String::new();
    let mut attributes = Vec::with_capacity(log.fields.len());
    for field in &log.fields {
        match string_value(field) {
            Some(value) if field.key == EVENT && name.is_empty() => name = value.to_string(),
            _ => attributes.push(convert_key_value(field, span_id)?),
        }
    }

    Ok(Event {
        time_unix_nano,
        name,
        attributes,
        ..Default::default()
    })
}

fn convert_key_value(tag: &KeyValue, span_id: &str) -> Result<OtlpKeyValue, ConversionError> {
    let value = match ValueType::try_from(tag.v_type) {
        Ok(ValueType::String) => Value::StringValue(tag.v_str.clone()),
        Ok(ValueType::Bool) => Value::BoolValue(tag.v_bool),
        Ok(ValueType::Int64) => Value::IntValue(tag.v_int64),
        Ok(ValueType::Float64) => Value::DoubleValue(tag.v_float64),
        Ok(ValueType::Binary) => Value::BytesValue(tag.v_binary.clone()),
        Err(_) => {
            return Err(ConversionError::UnsupportedValueType {
                span_id: span_id.to_string(),
                key: tag.key.clone(),
                v_type: tag.v_type,
            });
        }
    };
    Ok(OtlpKeyValue {
        key: tag.key.clone(),
        value: Some(AnyValue { value: Some(value) }),
    })
}

fn string_attribute(key: &str, value: &str) -> OtlpKeyValue {
    OtlpKeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

fn string_value(tag: &KeyValue) -> Option<&str> {
    (tag.v_type == ValueType::String as i32).then_some(tag.v_str.as_str())
}

/// Tags the Jaeger model uses to carry OTLP span fields.
#[derive(Default)]
struct ReservedTags {
    scope: InstrumentationScope,
    kind: Option<SpanKind>,
    status_code: Option<StatusCode>,
    status_message: String,
    error: bool,
}

impl ReservedTags {
    /// Returns false when the tag is an ordinary attribute.
    fn absorb(&mut self, tag: &KeyValue) -> bool {
        let Some(value) = string_value(tag) else {
            if tag.key == ERROR && tag.v_type == ValueType::Bool as i32 && tag.v_bool {
                self.error = true;
                return true;
            }
            return false;
        };

        match tag.key.as_str() {
            SCOPE_NAME | LIBRARY_NAME => self.scope.name = value.to_string(),
            SCOPE_VERSION | LIBRARY_VERSION => self.scope.version = value.to_string(),
            SPAN_KIND => match span_kind_from_str(value) {
                Some(kind) => self.kind = Some(kind),
                None => return false,
            },
            STATUS_CODE => match value {
                "OK" => self.status_code = Some(StatusCode::Ok),
                "ERROR" => self.status_code = Some(StatusCode::Error),
                _ => return false,
            },
            STATUS_DESCRIPTION => self.status_message = value.to_string(),
            ERROR if value == "true" => self.error = true,
            _ => return false,
        }
        true
    }

    fn status(&self) -> Option<Status> {
        let code = self
            .status_code
            .or_else(|| self.error.then_some(StatusCode::Error));
        if code.is_none() && self.status_message.is_empty() {
            return None;
        }
        Some(Status {
            message: self.status_message.clone(),
            code: code.unwrap_or(StatusCode::Unset) as i32,
            ..Default::default()
        })
    }
}

/// Parses the lowercase `span.kind` tag values used by Jaeger.
fn span_kind_from_str(kind: &str) -> Option<SpanKind> {
    match kind {
        "client" => Some(SpanKind::Client),
        "server" => Some(SpanKind::Server),
        "producer" => Some(SpanKind::Producer),
        "consumer" => Some(SpanKind::Consumer),
        "internal" => Some(SpanKind::Internal),
        _ => None,
    }
}
