//! Wire transport: executes one encoded request

use crate::error::Result;
use crate::multipart::{MultipartBody, ProgressCallback};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Method};
use tracing::debug;
use url::Url;

const USER_AGENT: &str = concat!("resource-pipe/", env!("CARGO_PKG_VERSION"));

/// Encoded request body
#[derive(Debug)]
pub enum Payload {
    Empty,
    Json(Bytes),
    Multipart(MultipartBody),
}

/// A request with its body encoded, handed to a `Transport`
pub struct Dispatch {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub payload: Payload,
    /// Only consulted for multipart payloads
    pub progress: Option<ProgressCallback>,
}

/// Status and raw body of a response
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes dispatched requests.
///
/// Implementations must not apply their own timeout; the session owns it.
/// Dropping the returned future must abandon the request.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn execute(&self, dispatch: Dispatch) -> Result<RawResponse>;
}

/// `Transport` over HTTP(S) using reqwest
pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder().user_agent(USER_AGENT).build()?;
        Ok(Self { http })
    }

    /// Use a preconfigured client (TLS, proxies, pools)
    pub fn with_client(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, dispatch: Dispatch) -> Result<RawResponse> {
        let Dispatch {
            method,
            url,
            headers,
            payload,
            progress,
        } = dispatch;

        let mut request = self.http.request(method, url).headers(headers);
        request = match payload {
            Payload::Empty => request,
            Payload::Json(body) => request
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(body),
            Payload::Multipart(body) => request
                .header(CONTENT_TYPE, body.content_type())
                .header(CONTENT_LENGTH, body.len())
                .body(reqwest::Body::wrap_stream(body.into_stream(progress))),
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        debug!(status, bytes = body.len(), "response received");

        Ok(RawResponse { status, body })
    }
}
