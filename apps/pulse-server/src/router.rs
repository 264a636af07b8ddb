use std::mem;

use axum::{
    handler::Handler,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use crate::{api, AppState};

#[derive(Copy, Clone)]
pub(crate) enum Stability {
    Stable,
    Beta,
}

impl Stability {
    fn as_str(self) -> &'static str {
        match self {
            Stability::Stable => "stable",
            Stability::Beta => "beta",
        }
    }
}

pub(crate) struct RouterBuilder {
    router: Router<AppState>,
    endpoints: Vec<String>,
    endpoints_meta: Vec<Value>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            endpoints: Vec::new(),
            endpoints_meta: Vec::new(),
        }
    }

    fn record(&mut self, method: &str, path: &'static str, stability: Stability) {
        self.endpoints.push(format!("{} {}", method, path));
        self.endpoints_meta.push(json!({
            "method": method,
            "path": path,
            "stability": stability.as_str(),
        }));
    }

    pub fn route_get<H, T>(
        &mut self,
        path: &'static str,
        handler: H,
        stability: Stability,
    ) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: 'static,
    {
        self.record("GET", path, stability);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, get(handler));
        self
    }

    pub fn route_post<H, T>(
        &mut self,
        path: &'static str,
        handler: H,
        stability: Stability,
    ) -> &mut Self
    where
        H: Handler<T, AppState> + Clone + 'static,
        T: 'static,
    {
        self.record("POST", path, stability);
        let router = mem::take(&mut self.router);
        self.router = router.route(path, post(handler));
        self
    }

    pub fn build(self) -> (Router<AppState>, Vec<String>, Vec<Value>) {
        (self.router, self.endpoints, self.endpoints_meta)
    }
}

pub(crate) mod paths {
    pub const HEALTHZ: &str = "/healthz";
    pub const ABOUT: &str = "/about";
    pub const EVENTS: &str = "/events";
    pub const METRICS_STREAM: &str = "/metrics/stream";
    pub const METRICS_ATTACH: &str = "/metrics/attach";
    pub const STATE_METRICS: &str = "/state/metrics";
    pub const STATE_HUB: &str = "/state/hub";
}

pub(crate) fn build_router() -> (Router<AppState>, Vec<String>, Vec<Value>) {
    let mut builder = RouterBuilder::new();
    builder.route_get(paths::HEALTHZ, api::meta::healthz, Stability::Stable);
    builder.route_get(paths::ABOUT, api::meta::about, Stability::Stable);
    builder.route_post(paths::EVENTS, api::ingest::events_ingest, Stability::Stable);
    builder.route_get(
        paths::METRICS_STREAM,
        api::stream::metrics_stream,
        Stability::Stable,
    );
    builder.route_post(
        paths::METRICS_ATTACH,
        api::stream::metrics_attach,
        Stability::Beta,
    );
    builder.route_get(
        paths::STATE_METRICS,
        api::state::state_metrics,
        Stability::Beta,
    );
    builder.route_get(paths::STATE_HUB, api::state::state_hub, Stability::Beta);
    builder.build()
}
