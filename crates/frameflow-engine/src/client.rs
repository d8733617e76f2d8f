use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use frameflow_contracts::api::{ExploreRequest, ExploreResponse, GenerateRequest, GenerateResponse};
use frameflow_contracts::error::FlowError;
use reqwest::blocking::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::gateway::{Gateway, EXPLORE_FALLBACK_ERROR, GENERATE_FALLBACK_ERROR};

// Two ten-minute task bounds run side by side, plus upload and polling slack.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How the orchestration layer reaches the gateways.
pub trait GatewayClient: Send + Sync {
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, FlowError>;
    fn explore(&self, request: &ExploreRequest) -> Result<ExploreResponse, FlowError>;
}

pub struct HttpGatewayClient {
    http: HttpClient,
    base_url: String,
}

impl HttpGatewayClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(CLIENT_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to build gateway HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        route: &str,
        body: &B,
        fallback: &str,
    ) -> Result<T, FlowError> {
        let url = format!("{}{route}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .with_context(|| format!("request to {url} failed"))
            .map_err(|err| FlowError::generation_failed(&err, fallback))?;
        let status = response.status().as_u16();
        let payload: Value = response.json().unwrap_or(Value::Null);
        if !(200..300).contains(&status) {
            return Err(FlowError::from_response(status, &payload, fallback));
        }
        serde_json::from_value(payload)
            .with_context(|| format!("unexpected response from {url}"))
            .map_err(|err| FlowError::generation_failed(&err, fallback))
    }
}

impl GatewayClient for HttpGatewayClient {
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, FlowError> {
        self.post("/generate", request, GENERATE_FALLBACK_ERROR)
    }

    fn explore(&self, request: &ExploreRequest) -> Result<ExploreResponse, FlowError> {
        self.post("/explore", request, EXPLORE_FALLBACK_ERROR)
    }
}

/// Calls a gateway in the same process, skipping HTTP.
pub struct LocalGatewayClient {
    gateway: Arc<Gateway>,
}

impl LocalGatewayClient {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}

impl GatewayClient for LocalGatewayClient {
    fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, FlowError> {
        self.gateway.generate(request)
    }

    fn explore(&self, request: &ExploreRequest) -> Result<ExploreResponse, FlowError> {
        self.gateway.explore(request)
    }
}
