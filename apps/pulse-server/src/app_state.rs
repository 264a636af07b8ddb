use std::sync::Arc;
use std::time::Instant;

use pulse_core::{Config, EventCounter, Hub};
use serde_json::Value;

#[derive(Clone)]
pub(crate) struct AppState {
    hub: Hub,
    counter: Arc<EventCounter>,
    config: Arc<Config>,
    endpoints: Arc<Vec<String>>,
    endpoints_meta: Arc<Vec<Value>>,
    started: Instant,
}

impl AppState {
    pub fn new(hub: Hub, counter: Arc<EventCounter>, config: Arc<Config>) -> Self {
        Self {
            hub,
            counter,
            config,
            endpoints: Arc::new(Vec::new()),
            endpoints_meta: Arc::new(Vec::new()),
            started: Instant::now(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>, endpoints_meta: Vec<Value>) -> Self {
        self.endpoints = Arc::new(endpoints);
        self.endpoints_meta = Arc::new(endpoints_meta);
        self
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn counter(&self) -> &Arc<EventCounter> {
        &self.counter
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn endpoints(&self) -> Arc<Vec<String>> {
        self.endpoints.clone()
    }

    pub fn endpoints_meta(&self) -> Arc<Vec<Value>> {
        self.endpoints_meta.clone()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}
