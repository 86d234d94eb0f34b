//! # Trace Stream Emitter
//!
//! Drives the convert → send cycle for traces returned by the query engine.
//! Traces are handled strictly one at a time: each one is converted and handed
//! to the sink before the next is looked at, so at most one converted trace is
//! in flight and a slow client naturally slows the loop down.
//!
//! The first conversion or send failure ends the stream. Traces already sent
//! stay sent and no marker of incompleteness is added, so a client that sees an
//! error after some results must not treat those results as exhaustive.

use async_trait::async_trait;
use opentelemetry_proto::tonic::trace::v1::TracesData;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

use crate::convert;
use crate::engine::Trace;
use crate::error::QueryError;

/// The receiving side of the stream is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("client disconnected")]
pub struct StreamClosed;

/// Server-streaming response body for `GetTrace` and `FindTraces`.
pub type TracesDataStream = ReceiverStream<Result<TracesData, Status>>;

/// Destination of converted traces.
#[async_trait]
pub trait TraceSink: Send {
    /// Delivers one message, waiting while the destination is full.
    ///
    /// # Returns
    /// [`StreamClosed`] once the receiving side has gone away
    async fn send(&mut self, traces_data: TracesData) -> Result<(), StreamClosed>;
}

#[async_trait]
impl TraceSink for mpsc::Sender<Result<TracesData, Status>> {
    async fn send(&mut self, traces_data: TracesData) -> Result<(), StreamClosed> {
        mpsc::Sender::send(self, Ok(traces_data))
            .await
            .map_err(|_| StreamClosed)
    }
}

/// Collects every trace, for callers that answer with a single response.
#[async_trait]
impl TraceSink for Vec<TracesData> {
    async fn send(&mut self, traces_data: TracesData) -> Result<(), StreamClosed> {
        self.push(traces_data);
        Ok(())
    }
}

/// Converts one trace and sends it as exactly one message.
pub async fn emit_one<S: TraceSink>(trace: &Trace, sink: &mut S) -> Result<(), QueryError> {
    let traces_data = convert::spans_to_otlp(&trace.spans)?;
    sink.send(traces_data).await?;
    Ok(())
}

/// Converts and sends each trace in order, stopping at the first failure.
///
/// # Returns
/// The number of traces sent
pub async fn emit_all<S, I>(traces: I, sink: &mut S) -> Result<usize, QueryError>
where
    S: TraceSink,
    I: IntoIterator<Item = Trace>,
    I::IntoIter: Send,
{
    let mut sent = 0;
    for trace in traces {
        match emit_one(&trace, sink).await {
            Ok(()) => {}
            Err(QueryError::StreamClosed(err)) => {
                log::debug!("emit_all: {} after {} traces", err, sent);
                return Err(err.into());
            }
            Err(err) => {
                log::warn!("emit_all: Aborting stream after {} traces: {}", sent, err);
                return Err(err);
            }
        }
        sent += 1;
    }
    Ok(sent)
}
