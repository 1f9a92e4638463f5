//! Pipe configuration

use crate::error::{PipeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

pub const DEFAULT_RECORD_ID: &str = "id";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Query parameters, appended to read requests in key order.
pub type Parameters = BTreeMap<String, String>;

/// Configuration of a single remote resource.
///
/// A `Pipe` takes ownership of its config at construction and never
/// changes it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipeConfig {
    /// Resource name; also the URL path segment unless `endpoint` is set.
    pub name: String,
    pub base_url: Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_record_id")]
    pub record_id: String,
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameter_provider: Parameters,
}

fn default_record_id() -> String {
    DEFAULT_RECORD_ID.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl PipeConfig {
    /// Create a config for `name` under `base_url` with default settings
    pub fn new(base_url: &str, name: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PipeError::InvalidConfig(format!("base url '{}': {}", base_url, e)))?;

        Ok(Self::with_base(base_url, name))
    }

    pub(crate) fn with_base(base_url: Url, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url,
            endpoint: None,
            record_id: default_record_id(),
            timeout: DEFAULT_TIMEOUT,
            parameter_provider: Parameters::new(),
        }
    }

    /// Load a config from its JSON form and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PipeConfig = serde_json::from_str(json)
            .map_err(|e| PipeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = record_id.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameter_provider.insert(key.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameter_provider = parameters;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PipeError::InvalidConfig("pipe name is empty".into()));
        }
        if self.record_id.is_empty() {
            return Err(PipeError::InvalidConfig("record id field is empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(PipeError::InvalidConfig("timeout must be greater than zero".into()));
        }
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(PipeError::InvalidConfig(format!(
                "unsupported scheme '{}'",
                self.base_url.scheme()
            )));
        }
        if self.base_url.cannot_be_a_base() {
            return Err(PipeError::InvalidConfig(format!(
                "'{}' cannot be used as a base url",
                self.base_url
            )));
        }
        Ok(())
    }

    /// Path of the resource relative to the base URL
    pub fn resource_path(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(&self.name)
    }

    /// `base_url/resource`
    pub fn collection_url(&self) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| PipeError::InvalidConfig(format!("'{}' cannot be a base", self.base_url)))?;
            segments
                .pop_if_empty()
                .extend(self.resource_path().split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    /// `base_url/resource/id`, with the id percent-encoded as one segment
    pub fn instance_url(&self, id: &str) -> Result<Url> {
        let mut url = self.collection_url()?;
        url.path_segments_mut()
            .map_err(|_| PipeError::InvalidConfig(format!("'{}' cannot be a base", self.base_url)))?
            .push(id);
        Ok(url)
    }
}

/// Durations as (fractional) seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
