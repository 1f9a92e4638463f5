//! Translation of logical pipe operations into wire requests.
//!
//! Everything here is pure: no network or filesystem access. File parts are
//! carried through untouched and only read when the multipart body is encoded.

use crate::config::{Parameters, PipeConfig};
use crate::error::Result;
use crate::types::{FilePart, Record, RecordValue};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Method;
use serde_json::Value;
use url::Url;

/// A logical operation against the pipe's resource
#[derive(Debug, Clone)]
pub enum Operation {
    ReadAll,
    ReadOne(String),
    ReadWithParams(Parameters),
    Save(Record),
    Remove(Record),
}

/// One entry of a multipart form
#[derive(Debug, Clone)]
pub enum FormField {
    Text { name: String, value: String },
    File(FilePart),
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Vec<u8>),
    /// Encoded lazily by `MultipartEncoder`
    Multipart(Vec<FormField>),
}

/// A fully addressed request, ready to be encoded and dispatched
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

impl Request {
    fn new(method: Method, url: Url, body: RequestBody) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        Self {
            method,
            url,
            headers,
            body,
        }
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }
}

/// Build the wire request for `operation`
pub fn build(config: &PipeConfig, operation: Operation) -> Result<Request> {
    match operation {
        Operation::ReadAll => {
            let url = with_query(config.collection_url()?, &config.parameter_provider);
            Ok(Request::new(Method::GET, url, RequestBody::Empty))
        }
        Operation::ReadOne(id) => Ok(Request::new(
            Method::GET,
            config.instance_url(&id)?,
            RequestBody::Empty,
        )),
        Operation::ReadWithParams(params) => {
            let mut merged = config.parameter_provider.clone();
            merged.extend(params);
            let url = with_query(config.collection_url()?, &merged);
            Ok(Request::new(Method::GET, url, RequestBody::Empty))
        }
        Operation::Save(record) => {
            // create vs update is decided here, once
            let (method, url) = match record.id_value(&config.record_id) {
                Some(id) => (Method::PUT, config.instance_url(&id)?),
                None => (Method::POST, config.collection_url()?),
            };
            let body = if record.has_file_parts() {
                RequestBody::Multipart(form_fields(record))
            } else {
                RequestBody::Json(serde_json::to_vec(&record.to_json())?)
            };
            Ok(Request::new(method, url, body))
        }
        Operation::Remove(record) => {
            let url = match record.id_value(&config.record_id) {
                Some(id) => config.instance_url(&id)?,
                None => config.collection_url()?,
            };
            Ok(Request::new(Method::DELETE, url, RequestBody::Empty))
        }
    }
}

fn with_query(mut url: Url, params: &Parameters) -> Url {
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params.iter());
    }
    url
}

fn form_fields(record: Record) -> Vec<FormField> {
    record
        .into_fields()
        .into_iter()
        .map(|(name, value)| match value {
            RecordValue::File(part) => FormField::File(part),
            RecordValue::Json(json) => FormField::Text {
                name,
                value: scalar_text(json),
            },
        })
        .collect()
}

fn scalar_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}
