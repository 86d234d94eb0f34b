//! In-memory query engine with canned answers, for tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tonic::{Code, Status};

use super::{EngineError, EngineResult, Operation, QueryEngine, Trace};
use crate::query::{OperationQueryParameters, TraceGetParameters, TraceQueryParameters};

fn failure(code: Code) -> EngineError {
    match code {
        Code::NotFound => EngineError::TraceNotFound,
        code => EngineError::Backend(Status::new(code, "mock engine failure")),
    }
}

pub struct MockEngine {
    trace: Result<Trace, Code>,
    traces: Result<Vec<Trace>, Code>,
    services: Result<Vec<String>, Code>,
    operations: Result<Vec<Operation>, Code>,
    hang: bool,
    panic: bool,
    calls: AtomicUsize,
    /// Set once a hanging call has been dropped.
    pub cancelled: AtomicBool,
    pub last_lookup: Mutex<Option<TraceGetParameters>>,
    pub last_search: Mutex<Option<TraceQueryParameters>>,
    pub last_operations_query: Mutex<Option<OperationQueryParameters>>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            trace: Err(Code::NotFound),
            traces: Ok(Vec::new()),
            services: Ok(Vec::new()),
            operations: Ok(Vec::new()),
            hang: false,
            panic: false,
            calls: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            last_lookup: Mutex::new(None),
            last_search: Mutex::new(None),
            last_operations_query: Mutex::new(None),
        }
    }
}

impl MockEngine {
    pub fn with_trace(mut self, trace: Result<Trace, Code>) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_traces(mut self, traces: Result<Vec<Trace>, Code>) -> Self {
        self.traces = traces;
        self
    }

    pub fn with_services(mut self, services: Result<Vec<String>, Code>) -> Self {
        self.services = services;
        self
    }

    pub fn with_operations(mut self, operations: Result<Vec<Operation>, Code>) -> Self {
        self.operations = operations;
        self
    }

    /// Makes trace lookups and searches wait until they are dropped.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Makes trace lookups and searches panic, like a storage client bug would.
    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("mock engine panicked");
        }
        if self.hang {
            let _guard = CancelGuard(&self.cancelled);
            std::future::pending::<()>().await;
        }
    }
}

struct CancelGuard<'a>(&'a AtomicBool);

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueryEngine for MockEngine {
    async fn get_trace(&self, params: TraceGetParameters) -> EngineResult<Trace> {
        *self.last_lookup.lock().unwrap() = Some(params);
        self.enter().await;
        self.trace.clone().map_err(failure)
    }

    async fn find_traces(&self, query: TraceQueryParameters) -> EngineResult<Vec<Trace>> {
        *self.last_search.lock().unwrap() = Some(query);
        self.enter().await;
        self.traces.clone().map_err(failure)
    }

    async fn get_services(&self) -> EngineResult<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.services.clone().map_err(failure)
    }

    async fn get_operations(
        &self,
        query: OperationQueryParameters,
    ) -> EngineResult<Vec<Operation>> {
        *self.last_operations_query.lock().unwrap() = Some(query);
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.operations.clone().map_err(failure)
    }
}
