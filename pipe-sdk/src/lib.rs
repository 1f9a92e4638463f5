//! Resource Pipe SDK - CRUD client for RESTful resources
//!
//! A [`Pipe`] talks to one remote resource:
//! 1. read, save (create or update) and remove JSON records
//! 2. multipart upload of files, byte blobs and streams, with progress
//! 3. per-pipe timeout and cancellation of in-flight operations

pub mod config;
pub mod crypto;
pub mod error;
pub mod multipart;
pub mod pipe;
pub mod pipeline;
pub mod request;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

pub use config::{Parameters, PipeConfig};
pub use crypto::{EncryptionParameterProvider, KeyMaterial, PassphraseCryptoConfig, PassphraseEncryptionService};
pub use error::{PipeError, Result};
pub use multipart::{MultipartBody, MultipartEncoder, ProgressCallback};
pub use pipe::{PendingOperation, Pipe};
pub use pipeline::Pipeline;
pub use request::Operation;
pub use session::{RequestState, TransportSession};
pub use storage::{MemoryStore, Store, StoreConfig, StoreKind, StoreRegistry};
pub use transport::{Dispatch, HttpTransport, Payload, RawResponse, Transport};
pub use types::{FilePart, Record, RecordValue};

/// Quick start: an HTTP pipe for `name` under `base_url`, bound to the
/// current tokio runtime
pub fn create_pipe(base_url: &str, name: &str) -> Result<Pipe> {
    Pipe::new(PipeConfig::new(base_url, name)?)
}
