#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use reqwest::Method;
use resource_pipe::{Dispatch, Payload, RawResponse, Result, Transport};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the scripted transport saw
#[derive(Debug, Clone)]
pub struct Seen {
    pub method: Method,
    pub url: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Seen {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Timing {
    Immediate,
    After(Duration),
    Never,
}

type Responder = dyn Fn(&Seen) -> RawResponse + Send + Sync;

/// Transport that records requests and answers from a closure
pub struct ScriptedTransport {
    responder: Box<Responder>,
    timing: Timing,
    calls: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

impl ScriptedTransport {
    pub fn new(responder: impl Fn(&Seen) -> RawResponse + Send + Sync + 'static) -> Arc<Self> {
        Self::with_timing(Timing::Immediate, responder)
    }

    pub fn with_timing(
        timing: Timing,
        responder: impl Fn(&Seen) -> RawResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            timing,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Accepts requests but never answers
    pub fn silent() -> Arc<Self> {
        Self::with_timing(Timing::Never, |_| RawResponse::new(200, "{}"))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }

    pub fn last(&self) -> Seen {
        self.seen.lock().last().cloned().expect("no request seen")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, dispatch: Dispatch) -> Result<RawResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let (content_type, body) = match dispatch.payload {
            Payload::Empty => (None, Bytes::new()),
            Payload::Json(body) => (Some("application/json".to_string()), body),
            Payload::Multipart(body) => {
                let content_type = body.content_type();
                let mut chunks = body.into_stream(dispatch.progress);
                let mut collected = Vec::new();
                while let Some(chunk) = chunks.next().await {
                    collected.extend_from_slice(&chunk.expect("chunk"));
                }
                (Some(content_type), Bytes::from(collected))
            }
        };

        let seen = Seen {
            method: dispatch.method,
            url: dispatch.url.to_string(),
            content_type,
            body,
        };
        self.seen.lock().push(seen.clone());

        match self.timing {
            Timing::Immediate => {}
            Timing::After(delay) => tokio::time::sleep(delay).await,
            Timing::Never => futures::future::pending::<()>().await,
        }

        Ok((self.responder)(&seen))
    }
}

/// Echo the JSON body back with a server-assigned id
pub fn echo_with_id(id: u64) -> impl Fn(&Seen) -> RawResponse + Send + Sync + 'static {
    move |seen| {
        let mut body: serde_json::Value =
            serde_json::from_slice(&seen.body).unwrap_or_else(|_| serde_json::json!({}));
        if body.get("id").is_none() {
            body["id"] = serde_json::json!(id);
        }
        RawResponse::new(200, body.to_string())
    }
}
