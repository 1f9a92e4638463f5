//! Pipe: CRUD, upload, timeout and cancel against one remote resource
//!
//! Every operation is spawned onto the tokio runtime the pipe was created in
//! and returns a
//! [`PendingOperation`], which resolves exactly once with the decoded JSON
//! response or a [`PipeError`].
//!
//! Note on cancellation: [`Pipe::cancel`] only affects local delivery. A save
//! or remove that already reached the server still takes effect there; the
//! caller just receives `PipeError::Cancelled` instead of the response.

use crate::config::{Parameters, PipeConfig};
use crate::error::{PipeError, Result};
use crate::multipart::{MultipartEncoder, ProgressCallback};
use crate::request::{self, Operation, Request, RequestBody};
use crate::session::TransportSession;
use crate::storage::Store;
use crate::transport::{Dispatch, HttpTransport, Payload, RawResponse, Transport};
use crate::types::Record;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

/// Client for a single RESTful resource
pub struct Pipe {
    config: Arc<PipeConfig>,
    session: Arc<TransportSession>,
    upload_progress: RwLock<Option<ProgressCallback>>,
    store: Option<Arc<dyn Store>>,
    runtime: Handle,
}

impl Pipe {
    /// Create a pipe talking HTTP(S) through reqwest
    pub fn new(config: PipeConfig) -> Result<Self> {
        Self::with_transport(config, Arc::new(HttpTransport::new()?))
    }

    /// Create a pipe on a custom transport, bound to the current tokio runtime
    pub fn with_transport(config: PipeConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            PipeError::InvalidConfig(format!("pipe must be created inside a tokio runtime: {}", e))
        })?;
        Self::with_runtime(config, transport, runtime)
    }

    /// Create a pipe whose operations run on `runtime`. Operations may then
    /// be started from any thread.
    pub fn with_runtime(
        config: PipeConfig,
        transport: Arc<dyn Transport>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        let session = Arc::new(TransportSession::new(transport, config.timeout));

        Ok(Self {
            config: Arc::new(config),
            session,
            upload_progress: RwLock::new(None),
            store: None,
            runtime,
        })
    }

    /// Mirror confirmed results into a local store
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Collection URL of the resource
    pub fn url(&self) -> Result<Url> {
        self.config.collection_url()
    }

    /// Requests issued by this pipe that have not been delivered yet
    pub fn in_flight(&self) -> usize {
        self.session.in_flight()
    }

    /// Read the whole collection, using the default parameters
    pub fn read_all(&self) -> PendingOperation {
        self.submit(Operation::ReadAll)
    }

    /// Read a single record by its identifier. An empty identifier fails
    /// with `MissingIdentifier`.
    pub fn read(&self, id: impl ToString) -> PendingOperation {
        let id = id.to_string();
        if id.is_empty() {
            return self.fail(PipeError::MissingIdentifier(self.config.record_id.clone()));
        }
        self.submit(Operation::ReadOne(id))
    }

    /// Read the collection with `params` merged over the default parameters
    pub fn read_with_params(&self, params: Parameters) -> PendingOperation {
        self.submit(Operation::ReadWithParams(params))
    }

    /// Create the record (no identifier) or update it (identifier present).
    /// Records holding file parts are uploaded as multipart/form-data.
    pub fn save(&self, record: Record) -> PendingOperation {
        self.submit(Operation::Save(record))
    }

    /// Delete the record. Fails with `MissingIdentifier` without touching the
    /// network if the record has no identifier.
    pub fn remove(&self, record: Record) -> PendingOperation {
        if record.id_value(&self.config.record_id).is_none() {
            return self.fail(PipeError::MissingIdentifier(self.config.record_id.clone()));
        }
        self.submit(Operation::Remove(record))
    }

    /// Cancel every operation of this pipe that has not completed yet.
    /// Returns how many were cancelled.
    pub fn cancel(&self) -> usize {
        let cancelled = self.session.cancel_all();
        debug!(pipe = %self.config.name, cancelled, "cancel requested");
        cancelled
    }

    /// Register a callback for multipart upload progress:
    /// `(bytes_written, total_bytes_written, total_bytes_expected)`.
    ///
    /// Applies to operations submitted afterwards. The callback runs on a
    /// runtime worker, not on the caller's task.
    pub fn set_upload_progress<F>(&self, callback: F)
    where
        F: Fn(u64, u64, u64) + Send + Sync + 'static,
    {
        *self.upload_progress.write() = Some(Arc::new(callback));
    }

    pub fn clear_upload_progress(&self) {
        *self.upload_progress.write() = None;
    }

    fn submit(&self, operation: Operation) -> PendingOperation {
        let kind = OperationKind::of(&operation, &self.config.record_id);

        // Built synchronously so the record is captured as it is now
        let request = match request::build(&self.config, operation) {
            Ok(request) => request,
            Err(e) => return self.fail(e),
        };

        let session = self.session.clone();
        let progress = self.upload_progress.read().clone();
        let store = self.store.clone();

        let handle = self.runtime.spawn(async move {
            let response = session.run(prepare(request, progress)).await?;
            let value = decode(response, &kind)?;
            if let Some(store) = store {
                mirror(store.as_ref(), &kind, &value);
            }
            Ok(value)
        });
        PendingOperation {
            inner: Inner::Spawned(handle),
            runtime: self.runtime.clone(),
        }
    }

    fn fail(&self, error: PipeError) -> PendingOperation {
        PendingOperation {
            inner: Inner::Failed(Some(error)),
            runtime: self.runtime.clone(),
        }
    }
}

#[derive(Debug, Clone)]
enum OperationKind {
    ReadCollection,
    ReadOne,
    Save,
    Remove(Option<String>),
}

impl OperationKind {
    fn of(operation: &Operation, record_id: &str) -> Self {
        match operation {
            Operation::ReadAll | Operation::ReadWithParams(_) => OperationKind::ReadCollection,
            Operation::ReadOne(_) => OperationKind::ReadOne,
            Operation::Save(_) => OperationKind::Save,
            Operation::Remove(record) => OperationKind::Remove(record.id_value(record_id)),
        }
    }
}

/// Encode the request body into something the transport can send
async fn prepare(request: Request, progress: Option<ProgressCallback>) -> Result<Dispatch> {
    let Request {
        method,
        url,
        headers,
        body,
    } = request;

    let payload = match body {
        RequestBody::Empty => Payload::Empty,
        RequestBody::Json(bytes) => Payload::Json(Bytes::from(bytes)),
        RequestBody::Multipart(fields) => {
            Payload::Multipart(MultipartEncoder::new().encode(fields).await?)
        }
    };

    Ok(Dispatch {
        method,
        url,
        headers,
        payload,
        progress,
    })
}

/// Turn a raw response into JSON. 2xx with an unparsable body is still a
/// failure, as is a collection read that does not answer with an array.
fn decode(response: RawResponse, kind: &OperationKind) -> Result<Value> {
    if !response.is_success() {
        return Err(PipeError::HttpStatus {
            status: response.status,
            message: String::from_utf8_lossy(&response.body).into_owned(),
        });
    }

    let value = if response.body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&response.body).map_err(|e| {
            warn!(status = response.status, error = %e, "response body is not valid JSON");
            PipeError::Decoding(e.to_string())
        })?
    };

    if matches!(kind, OperationKind::ReadCollection) && !value.is_array() {
        warn!(status = response.status, "collection read did not return an array");
        return Err(PipeError::Decoding("expected a JSON array of records".into()));
    }
    Ok(value)
}

/// Write confirmed results into the attached store
fn mirror(store: &dyn Store, kind: &OperationKind, value: &Value) {
    let outcome = match (kind, value) {
        (OperationKind::ReadCollection, Value::Array(items)) => items
            .iter()
            .filter(|item| item.is_object())
            .try_for_each(|item| store.save(item.clone())),
        (OperationKind::ReadOne | OperationKind::Save, Value::Object(_)) => store.save(value.clone()),
        (OperationKind::Remove(Some(id)), _) => {
            store.remove(id);
            Ok(())
        }
        _ => Ok(()),
    };

    if let Err(e) = outcome {
        warn!(error = %e, "could not mirror response into store");
    }
}

/// Handle to a submitted operation. Resolves exactly once.
///
/// Dropping the handle does not stop the operation.
pub struct PendingOperation {
    inner: Inner,
    runtime: Handle,
}

enum Inner {
    Spawned(JoinHandle<Result<Value>>),
    Failed(Option<PipeError>),
}

impl PendingOperation {
    /// Deliver the outcome to exactly one of `success` or `failure`. The
    /// callbacks run on the pipe's runtime.
    pub fn on_complete<S, F>(self, success: S, failure: F) -> JoinHandle<()>
    where
        S: FnOnce(Value) + Send + 'static,
        F: FnOnce(PipeError) + Send + 'static,
    {
        let runtime = self.runtime.clone();
        runtime.spawn(async move {
            match self.await {
                Ok(value) => success(value),
                Err(e) => failure(e),
            }
        })
    }
}

impl Future for PendingOperation {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.inner {
            Inner::Spawned(handle) => match Pin::new(handle).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(join_error)) if join_error.is_panic() => {
                    std::panic::resume_unwind(join_error.into_panic())
                }
                Poll::Ready(Err(_)) => Poll::Ready(Err(PipeError::Cancelled)),
                Poll::Pending => Poll::Pending,
            },
            Inner::Failed(error) => match error.take() {
                Some(e) => Poll::Ready(Err(e)),
                None => panic!("PendingOperation polled after completion"),
            },
        }
    }
}
