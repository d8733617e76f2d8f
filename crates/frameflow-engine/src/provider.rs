use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use frameflow_contracts::error::truncate_text;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::EngineConfig;

pub const RUNWAY_API_VERSION: &str = "2024-11-06";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTaskRequest {
    pub model: String,
    pub prompt_image: String,
    pub prompt_text: String,
    pub ratio: String,
    pub duration: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
    pub provider: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub id: String,
    pub output: Vec<String>,
}

impl TaskOutput {
    pub fn first_url(&self) -> Option<String> {
        self.output.first().cloned()
    }
}

/// Image-to-video capability: submit a task, then wait for its output.
pub trait VideoProvider: Send + Sync {
    fn name(&self) -> &str;
    fn submit(&self, request: &VideoTaskRequest) -> Result<TaskHandle>;
    fn wait(&self, handle: &TaskHandle, timeout: Duration) -> Result<TaskOutput>;
}

#[derive(Default)]
pub struct VideoProviderRegistry {
    providers: BTreeMap<String, Arc<dyn VideoProvider>>,
}

impl VideoProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: VideoProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn VideoProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(config: &EngineConfig) -> Result<VideoProviderRegistry> {
    let mut providers = VideoProviderRegistry::new();
    providers.register(DryrunProvider::new(Duration::ZERO));
    providers.register(RunwayProvider::new(config)?);
    Ok(providers)
}

/// Offline provider: answers every task with a deterministic placeholder URL.
pub struct DryrunProvider {
    latency: Duration,
}

impl DryrunProvider {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl VideoProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn submit(&self, request: &VideoTaskRequest) -> Result<TaskHandle> {
        let mut hasher = Sha256::new();
        hasher.update(request.model.as_bytes());
        hasher.update(request.prompt_text.as_bytes());
        hasher.update(request.prompt_image.as_bytes());
        hasher.update(request.ratio.as_bytes());
        hasher.update(request.duration.to_be_bytes());
        let digest = hasher.finalize();
        Ok(TaskHandle {
            id: format!("dryrun-{}", hex::encode(&digest[..8])),
            provider: self.name().to_string(),
        })
    }

    fn wait(&self, handle: &TaskHandle, timeout: Duration) -> Result<TaskOutput> {
        if self.latency > timeout {
            thread::sleep(timeout);
            bail!("Task {} timed out after {}s", handle.id, timeout.as_secs());
        }
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        Ok(TaskOutput {
            id: handle.id.clone(),
            output: vec![format!("https://dryrun.invalid/videos/{}.mp4", handle.id)],
        })
    }
}

/// Runway image-to-video over its REST API.
pub struct RunwayProvider {
    api_base: String,
    api_secret: Option<String>,
    poll_interval: Duration,
    http: HttpClient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunwayTaskState {
    Pending(String),
    Succeeded(Vec<String>),
    Failed(String),
}

impl RunwayProvider {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build Runway HTTP client")?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_secret: config.api_secret.clone(),
            poll_interval: config.poll_interval,
            http,
        })
    }

    fn api_secret(&self) -> Result<&str> {
        self.api_secret
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("RUNWAYML_API_SECRET not set"))
    }

    fn image_to_video_endpoint(&self) -> String {
        format!("{}/v1/image_to_video", self.api_base)
    }

    fn task_endpoint(&self, id: &str) -> String {
        format!("{}/v1/tasks/{}", self.api_base, id)
    }

    pub(crate) fn submit_payload(request: &VideoTaskRequest) -> Value {
        json!({
            "model": request.model,
            "promptImage": request.prompt_image,
            "promptText": request.prompt_text,
            "ratio": request.ratio,
            "duration": request.duration,
        })
    }

    pub(crate) fn parse_task_state(payload: &Value) -> RunwayTaskState {
        let status = payload
            .get("status")
            .and_then(Value::as_str)
            .map(|value| value.trim().to_ascii_uppercase())
            .unwrap_or_default();
        match status.as_str() {
            "SUCCEEDED" => match Self::parse_output(payload.get("output")) {
                Some(output) => RunwayTaskState::Succeeded(output),
                None => RunwayTaskState::Failed(
                    "SUCCEEDED without a usable output list".to_string(),
                ),
            },
            "FAILED" | "CANCELLED" => {
                let failure = payload
                    .get("failure")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or("no failure reason given");
                let code = payload
                    .get("failureCode")
                    .and_then(Value::as_str)
                    .map(|code| format!(" ({code})"))
                    .unwrap_or_default();
                RunwayTaskState::Failed(format!("{status}: {failure}{code}"))
            }
            _ => RunwayTaskState::Pending(status),
        }
    }

    // Output must be an array of strings; an empty array is a valid
    // "no video" answer, anything else is malformed.
    fn parse_output(output: Option<&Value>) -> Option<Vec<String>> {
        let rows = output?.as_array()?;
        let mut urls = Vec::with_capacity(rows.len());
        for row in rows {
            let url = row.as_str()?.trim();
            if !url.is_empty() {
                urls.push(url.to_string());
            }
        }
        Some(urls)
    }
}

impl VideoProvider for RunwayProvider {
    fn name(&self) -> &str {
        "runway"
    }

    fn submit(&self, request: &VideoTaskRequest) -> Result<TaskHandle> {
        let api_secret = self.api_secret()?;
        let endpoint = self.image_to_video_endpoint();
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_secret)
            .header("X-Runway-Version", RUNWAY_API_VERSION)
            .json(&Self::submit_payload(request))
            .send()
            .with_context(|| format!("Runway request failed ({endpoint})"))?;
        let payload = response_json_or_error("Runway", response)?;
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Runway response missing task id"))?;
        Ok(TaskHandle {
            id: id.to_string(),
            provider: self.name().to_string(),
        })
    }

    fn wait(&self, handle: &TaskHandle, timeout: Duration) -> Result<TaskOutput> {
        let api_secret = self.api_secret()?;
        let poll_url = self.task_endpoint(&handle.id);
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(&poll_url)
                .bearer_auth(api_secret)
                .header("X-Runway-Version", RUNWAY_API_VERSION)
                .send()
                .with_context(|| format!("Runway poll request failed ({poll_url})"))?;
            let payload = response_json_or_error("Runway poll", response)?;
            match Self::parse_task_state(&payload) {
                RunwayTaskState::Succeeded(output) => {
                    return Ok(TaskOutput {
                        id: handle.id.clone(),
                        output,
                    });
                }
                RunwayTaskState::Failed(reason) => {
                    bail!("Runway task {} failed: {reason}", handle.id);
                }
                RunwayTaskState::Pending(_) => {}
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                bail!("Task {} timed out after {}s", handle.id, timeout.as_secs());
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::{
        DryrunProvider, RunwayProvider, RunwayTaskState, TaskHandle, VideoProvider,
        VideoTaskRequest, RUNWAY_API_VERSION,
    };
    use crate::config::EngineConfig;

    #[derive(Debug, Clone)]
    struct SeenRequest {
        method: String,
        url: String,
        authorization: Option<String>,
        version: Option<String>,
        body: String,
    }

    /// Local stand-in for the Runway API. `respond` gets the zero-based
    /// request index and the URL and returns status plus JSON body.
    struct StubRunway {
        server: Arc<tiny_http::Server>,
        seen: Arc<Mutex<Vec<SeenRequest>>>,
        worker: Option<JoinHandle<()>>,
    }

    impl StubRunway {
        fn start<F>(respond: F) -> anyhow::Result<Self>
        where
            F: Fn(usize, &str) -> (u16, String) + Send + 'static,
        {
            let server = Arc::new(
                tiny_http::Server::http("127.0.0.1:0").map_err(|err| anyhow::anyhow!("{err}"))?,
            );
            let seen = Arc::new(Mutex::new(Vec::new()));
            let worker = {
                let server = Arc::clone(&server);
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for mut request in server.incoming_requests() {
                        let header = |name: &'static str| {
                            request
                                .headers()
                                .iter()
                                .find(|header| header.field.equiv(name))
                                .map(|header| header.value.as_str().to_string())
                        };
                        let authorization = header("Authorization");
                        let version = header("X-Runway-Version");
                        let mut body = String::new();
                        let _ = request.as_reader().read_to_string(&mut body);
                        let url = request.url().to_string();
                        let index = {
                            let mut seen = seen.lock().unwrap();
                            seen.push(SeenRequest {
                                method: request.method().to_string(),
                                url: url.clone(),
                                authorization,
                                version,
                                body,
                            });
                            seen.len() - 1
                        };
                        let (status, payload) = respond(index, &url);
                        let response = tiny_http::Response::from_string(payload)
                            .with_status_code(status)
                            .with_header(
                                tiny_http::Header::from_bytes(
                                    &b"Content-Type"[..],
                                    &b"application/json"[..],
                                )
                                .unwrap(),
                            );
                        let _ = request.respond(response);
                    }
                })
            };
            Ok(Self {
                server,
                seen,
                worker: Some(worker),
            })
        }

        fn base(&self) -> String {
            let addr = self.server.server_addr().to_ip().unwrap();
            format!("http://{addr}")
        }

        fn provider(&self) -> anyhow::Result<RunwayProvider> {
            RunwayProvider::new(&EngineConfig {
                api_base: self.base(),
                api_secret: Some("key_test".to_string()),
                poll_interval: Duration::from_millis(20),
                ..EngineConfig::default()
            })
        }

        fn seen(&self) -> Vec<SeenRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Drop for StubRunway {
        fn drop(&mut self) {
            self.server.unblock();
            if let Some(worker) = self.worker.take() {
                let _ = worker.join();
            }
        }
    }

    fn handle(id: &str) -> TaskHandle {
        TaskHandle {
            id: id.to_string(),
            provider: "runway".to_string(),
        }
    }

    fn status_body(value: Value) -> (u16, String) {
        (200, value.to_string())
    }

    fn request(prompt: &str) -> VideoTaskRequest {
        VideoTaskRequest {
            model: "gen4_turbo".to_string(),
            prompt_image: "data:image/png;base64,AAA".to_string(),
            prompt_text: prompt.to_string(),
            ratio: "1280:720".to_string(),
            duration: 10,
        }
    }

    #[test]
    fn runway_payload_uses_api_field_names() {
        assert_eq!(
            RunwayProvider::submit_payload(&request("pan")),
            json!({
                "model": "gen4_turbo",
                "promptImage": "data:image/png;base64,AAA",
                "promptText": "pan",
                "ratio": "1280:720",
                "duration": 10,
            })
        );
    }

    #[test]
    fn runway_task_states_parse() {
        assert_eq!(
            RunwayProvider::parse_task_state(&json!({
                "status": "SUCCEEDED",
                "output": ["https://cdn.test/a.mp4", ""]
            })),
            RunwayTaskState::Succeeded(vec!["https://cdn.test/a.mp4".to_string()])
        );
        assert_eq!(
            RunwayProvider::parse_task_state(&json!({"status": "SUCCEEDED", "output": []})),
            RunwayTaskState::Succeeded(Vec::new())
        );
        assert_eq!(
            RunwayProvider::parse_task_state(&json!({
                "status": "FAILED",
                "failure": "Content moderated",
                "failureCode": "SAFETY.INPUT.IMAGE"
            })),
            RunwayTaskState::Failed("FAILED: Content moderated (SAFETY.INPUT.IMAGE)".to_string())
        );
        for malformed in [
            json!({"status": "SUCCEEDED"}),
            json!({"status": "SUCCEEDED", "output": "not-a-list"}),
            json!({"status": "SUCCEEDED", "output": [42, {"u": 1}]}),
            json!({"status": "SUCCEEDED", "output": ["https://cdn.test/a.mp4", null]}),
        ] {
            assert_eq!(
                RunwayProvider::parse_task_state(&malformed),
                RunwayTaskState::Failed("SUCCEEDED without a usable output list".to_string()),
                "{malformed}"
            );
        }
        assert_eq!(
            RunwayProvider::parse_task_state(&json!({"status": "THROTTLED"})),
            RunwayTaskState::Pending("THROTTLED".to_string())
        );
    }

    #[test]
    fn runway_submit_sends_auth_and_version_headers() -> anyhow::Result<()> {
        let stub = StubRunway::start(|_, _| status_body(json!({"id": " task-1 "})))?;
        let handle = stub.provider()?.submit(&request("pan"))?;
        assert_eq!(handle.id, "task-1");
        assert_eq!(handle.provider, "runway");

        let seen = stub.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].url, "/v1/image_to_video");
        assert_eq!(seen[0].authorization.as_deref(), Some("Bearer key_test"));
        assert_eq!(seen[0].version.as_deref(), Some(RUNWAY_API_VERSION));
        let body: Value = serde_json::from_str(&seen[0].body)?;
        assert_eq!(body, RunwayProvider::submit_payload(&request("pan")));
        Ok(())
    }

    #[test]
    fn runway_wait_polls_until_succeeded() -> anyhow::Result<()> {
        let stub = StubRunway::start(|index, _| match index {
            0 => status_body(json!({"id": "task-1", "status": "PENDING"})),
            1 => status_body(json!({"id": "task-1", "status": "RUNNING"})),
            _ => status_body(json!({
                "id": "task-1",
                "status": "SUCCEEDED",
                "output": ["https://cdn.test/task-1.mp4"]
            })),
        })?;
        let output = stub
            .provider()?
            .wait(&handle("task-1"), Duration::from_secs(5))?;
        assert_eq!(output.id, "task-1");
        assert_eq!(
            output.first_url().as_deref(),
            Some("https://cdn.test/task-1.mp4")
        );

        let seen = stub.seen();
        assert_eq!(seen.len(), 3);
        for polled in &seen {
            assert_eq!(polled.method, "GET");
            assert_eq!(polled.url, "/v1/tasks/task-1");
            assert_eq!(polled.authorization.as_deref(), Some("Bearer key_test"));
            assert_eq!(polled.version.as_deref(), Some(RUNWAY_API_VERSION));
        }
        Ok(())
    }

    #[test]
    fn runway_wait_reports_failure_reason_and_code() -> anyhow::Result<()> {
        let stub = StubRunway::start(|_, _| {
            status_body(json!({
                "id": "task-1",
                "status": "FAILED",
                "failure": "Content moderated",
                "failureCode": "SAFETY.INPUT.IMAGE"
            }))
        })?;
        let err = stub
            .provider()?
            .wait(&handle("task-1"), Duration::from_secs(5))
            .expect_err("failed task");
        assert_eq!(
            err.to_string(),
            "Runway task task-1 failed: FAILED: Content moderated (SAFETY.INPUT.IMAGE)"
        );
        Ok(())
    }

    #[test]
    fn runway_wait_rejects_success_without_output_list() -> anyhow::Result<()> {
        let stub = StubRunway::start(|_, _| status_body(json!({"status": "SUCCEEDED"})))?;
        let err = stub
            .provider()?
            .wait(&handle("task-1"), Duration::from_secs(5))
            .expect_err("malformed success");
        assert!(
            err.to_string().contains("without a usable output list"),
            "{err}"
        );
        Ok(())
    }

    #[test]
    fn runway_wait_times_out_while_pending() -> anyhow::Result<()> {
        let stub = StubRunway::start(|_, _| status_body(json!({"status": "PENDING"})))?;
        let err = stub
            .provider()?
            .wait(&handle("task-1"), Duration::from_millis(200))
            .expect_err("timeout");
        assert!(
            err.to_string().starts_with("Task task-1 timed out after"),
            "{err}"
        );
        assert!(stub.seen().len() >= 2);
        Ok(())
    }

    #[test]
    fn runway_error_status_carries_truncated_body() -> anyhow::Result<()> {
        let long_body = format!("{{\"error\":\"{}\"}}", "x".repeat(2_000));
        let stub = StubRunway::start(move |_, _| (401, long_body.clone()))?;
        let err = stub
            .provider()?
            .submit(&request("pan"))
            .expect_err("unauthorized");
        let message = err.to_string();
        assert!(message.starts_with("Runway request failed (401): "), "{message}");
        assert!(message.len() < 700, "body not truncated: {} chars", message.len());

        let err = stub
            .provider()?
            .wait(&handle("task-1"), Duration::from_secs(5))
            .expect_err("unauthorized poll");
        assert!(err.to_string().starts_with("Runway poll request failed (401): "));
        Ok(())
    }

    #[test]
    fn runway_without_secret_fails_before_network() -> anyhow::Result<()> {
        let provider = RunwayProvider::new(&EngineConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..EngineConfig::default()
        })?;
        let err = provider
            .submit(&request("pan"))
            .expect_err("missing secret must fail");
        assert_eq!(err.to_string(), "RUNWAYML_API_SECRET not set");
        Ok(())
    }

    #[test]
    fn dryrun_ids_are_deterministic_per_request() -> anyhow::Result<()> {
        let provider = DryrunProvider::new(Duration::ZERO);
        let a = provider.submit(&request("pan"))?;
        let b = provider.submit(&request("pan"))?;
        let c = provider.submit(&request("walk"))?;
        assert_eq!(a, b);
        assert_ne!(a.id, c.id);

        let output = provider.wait(&a, Duration::from_secs(1))?;
        assert_eq!(
            output.first_url(),
            Some(format!("https://dryrun.invalid/videos/{}.mp4", a.id))
        );
        Ok(())
    }

    #[test]
    fn dryrun_latency_beyond_timeout_fails() {
        let provider = DryrunProvider::new(Duration::from_millis(200));
        let handle = TaskHandle {
            id: "dryrun-slow".to_string(),
            provider: "dryrun".to_string(),
        };
        let err = provider
            .wait(&handle, Duration::from_millis(10))
            .expect_err("timeout");
        assert!(err.to_string().contains("timed out"));
    }
}
