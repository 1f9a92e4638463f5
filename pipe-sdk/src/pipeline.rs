//! Named pipes sharing a base URL and a transport

use crate::config::PipeConfig;
use crate::error::{PipeError, Result};
use crate::pipe::Pipe;
use crate::transport::{HttpTransport, Transport};
use dashmap::DashMap;
use std::sync::Arc;
use url::Url;

/// Registry of pipes for one server
pub struct Pipeline {
    base_url: Url,
    transport: Arc<dyn Transport>,
    pipes: DashMap<String, Arc<Pipe>>,
}

impl Pipeline {
    /// Create a pipeline talking HTTP(S) to `base_url`
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_transport(base_url, Arc::new(HttpTransport::new()?))
    }

    pub fn with_transport(base_url: &str, transport: Arc<dyn Transport>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PipeError::InvalidConfig(format!("base url '{}': {}", base_url, e)))?;

        Ok(Self {
            base_url,
            transport,
            pipes: DashMap::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Config for `name` under this pipeline's base URL, to customise
    /// before passing to `pipe_with`
    pub fn config(&self, name: &str) -> PipeConfig {
        PipeConfig::with_base(self.base_url.clone(), name)
    }

    /// Add (or replace) a pipe with default settings
    pub fn pipe(&self, name: &str) -> Result<Arc<Pipe>> {
        self.pipe_with(self.config(name))
    }

    /// Add (or replace) a pipe built from `config`
    pub fn pipe_with(&self, config: PipeConfig) -> Result<Arc<Pipe>> {
        let name = config.name.clone();
        let pipe = Arc::new(Pipe::with_transport(config, self.transport.clone())?);
        self.pipes.insert(name, pipe.clone());
        Ok(pipe)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Pipe>> {
        self.pipes.get(name).map(|entry| entry.value().clone())
    }

    /// Remove a pipe; its in-flight operations keep running
    pub fn remove(&self, name: &str) -> Option<Arc<Pipe>> {
        self.pipes.remove(name).map(|(_, pipe)| pipe)
    }

    pub fn names(&self) -> Vec<String> {
        self.pipes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Cancel outstanding operations on every pipe
    pub fn cancel_all(&self) -> usize {
        self.pipes.iter().map(|entry| entry.value().cancel()).sum()
    }
}
