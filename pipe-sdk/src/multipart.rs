//! multipart/form-data encoding with upload progress

use crate::error::{PipeError, Result};
use crate::request::FormField;
use crate::types::FilePart;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

/// Size of the chunks handed to the transport
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Upload progress callback: `(bytes_written, total_bytes_written, total_bytes_expected)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64, u64) + Send + Sync>;

/// Builds a multipart body from form fields, resolving file parts.
pub struct MultipartEncoder {
    boundary: String,
}

impl MultipartEncoder {
    pub fn new() -> Self {
        Self::with_boundary(format!("Boundary+{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Encode every field into a single body.
    ///
    /// File references are read from disk here and stream parts are drained,
    /// so a stream part can only ever be encoded once.
    pub async fn encode(&self, fields: Vec<FormField>) -> Result<MultipartBody> {
        let mut buf = BytesMut::new();

        for field in fields {
            match field {
                FormField::Text { name, value } => {
                    self.open_part(&mut buf);
                    buf.put_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", escape(&name))
                            .as_bytes(),
                    );
                    buf.put_slice(value.as_bytes());
                    buf.put_slice(b"\r\n");
                }
                FormField::File(part) => {
                    let field_name = part.field_name().to_string();
                    let (data, file_name, mime_type) = resolve(part).await?;
                    self.open_part(&mut buf);
                    buf.put_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                            escape(&field_name),
                            escape(&file_name)
                        )
                        .as_bytes(),
                    );
                    buf.put_slice(format!("Content-Type: {}\r\n\r\n", mime_type).as_bytes());
                    buf.put_slice(&data);
                    buf.put_slice(b"\r\n");
                }
            }
        }

        buf.put_slice(format!("--{}--\r\n", self.boundary).as_bytes());

        Ok(MultipartBody {
            boundary: self.boundary.clone(),
            bytes: buf.freeze(),
        })
    }

    fn open_part(&self, buf: &mut BytesMut) {
        buf.put_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

impl Default for MultipartEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a part's content and work out its file name and MIME type
async fn resolve(part: FilePart) -> Result<(Bytes, String, String)> {
    match part {
        FilePart::File { path, .. } => {
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| PipeError::MultipartEncoding(format!("{}: {}", path.display(), e)))?;
            Ok((Bytes::from(data), file_name_of(&path)?, mime_of(&path)))
        }
        FilePart::Data {
            bytes,
            file_name,
            mime_type,
            ..
        } => Ok((bytes, file_name, mime_type)),
        FilePart::Stream {
            stream,
            field_name,
            file_name,
            mime_type,
        } => {
            let mut reader = stream.take().ok_or_else(|| {
                PipeError::MultipartEncoding(format!("stream part '{}' was already consumed", field_name))
            })?;
            let mut data = Vec::new();
            reader
                .read_to_end(&mut data)
                .await
                .map_err(|e| PipeError::MultipartEncoding(format!("stream part '{}': {}", field_name, e)))?;
            Ok((Bytes::from(data), file_name, mime_type))
        }
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| PipeError::MultipartEncoding(format!("{} has no file name", path.display())))
}

fn mime_of(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

/// Quote-safe parameter value for Content-Disposition
fn escape(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// An encoded multipart body. Consumed by sending it.
#[derive(Debug)]
pub struct MultipartBody {
    boundary: String,
    bytes: Bytes,
}

impl MultipartBody {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Split the body into chunks, reporting progress as each chunk is pulled.
    ///
    /// `total_bytes_written` grows monotonically and ends at `len()`.
    pub fn into_stream(
        self,
        progress: Option<ProgressCallback>,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + Sync + 'static {
        let total = self.len();
        let mut rest = self.bytes;
        let mut chunks = Vec::with_capacity(rest.len() / CHUNK_SIZE + 1);
        while !rest.is_empty() {
            let at = CHUNK_SIZE.min(rest.len());
            chunks.push(rest.split_to(at));
        }

        let mut written = 0u64;
        stream::iter(chunks).map(move |chunk| {
            let len = chunk.len() as u64;
            written += len;
            if let Some(callback) = &progress {
                callback(len, written, total);
            }
            Ok(chunk)
        })
    }
}
