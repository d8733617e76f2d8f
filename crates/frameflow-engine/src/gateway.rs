use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use frameflow_contracts::api::{ExploreRequest, ExploreResponse, GenerateRequest, GenerateResponse};
use frameflow_contracts::error::FlowError;
use frameflow_contracts::events::EventWriter;
use frameflow_contracts::models::{ModelSelector, VideoTaskShape};
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::log_event;
use crate::provider::{default_provider_registry, TaskHandle, VideoProvider, VideoTaskRequest};

pub const SETTING_PROMPT: &str = "Slow cinematic camera pan across the scene, gentle parallax \
and depth, natural light, smooth steady motion, no people entering the frame.";
pub const PERSON_PROMPT: &str = "The person comes to life with natural, subtle movement: \
breathing, a slight turn of the head, shifting weight, steady camera, realistic motion.";
pub const DEFAULT_RATIO: &str = "1280:720";
pub const DEFAULT_DURATION: u32 = 10;
pub const GENERATE_FALLBACK_ERROR: &str = "Failed to generate videos";
pub const EXPLORE_FALLBACK_ERROR: &str = "Failed to generate exploration video";

#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub model: Option<String>,
    pub ratio: String,
    pub duration: u32,
    pub task_timeout: Duration,
    pub setting_prompt: String,
    pub person_prompt: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            model: None,
            ratio: DEFAULT_RATIO.to_string(),
            duration: DEFAULT_DURATION,
            task_timeout: Duration::from_secs(600),
            setting_prompt: SETTING_PROMPT.to_string(),
            person_prompt: PERSON_PROMPT.to_string(),
        }
    }
}

/// One generation task of a gateway call.
#[derive(Debug, Clone, Copy)]
struct TaskSpec<'a> {
    label: &'static str,
    image: &'a str,
    prompt: &'a str,
}

/// Stateless handlers behind `POST /generate` and `POST /explore`.
pub struct Gateway {
    provider: Arc<dyn VideoProvider>,
    selector: ModelSelector,
    settings: GatewaySettings,
    events: EventWriter,
}

impl Gateway {
    pub fn new(
        provider: Arc<dyn VideoProvider>,
        settings: GatewaySettings,
        events: EventWriter,
    ) -> Self {
        Self {
            provider,
            selector: ModelSelector::new(None),
            settings,
            events,
        }
    }

    pub fn from_config(config: &EngineConfig, events: EventWriter) -> Result<Self> {
        let registry = default_provider_registry(config)?;
        let Some(provider) = registry.get(&config.provider) else {
            bail!(
                "unknown provider '{}' (available: {})",
                config.provider,
                registry.names().join(", ")
            );
        };
        let settings = GatewaySettings {
            model: config.model.clone(),
            task_timeout: config.task_timeout,
            ..GatewaySettings::default()
        };
        Ok(Self::new(provider, settings, events))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Background → setting video, front photo → person video. Both tasks
    /// are submitted before either is awaited; any failure fails the call.
    pub fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, FlowError> {
        let inputs = match request.validate() {
            Ok(inputs) => inputs,
            Err(err) => {
                self.log("request_rejected", json!({"route": "generate", "error": err.message()}));
                return Err(err);
            }
        };
        self.log(
            "generation_requested",
            json!({"front_image": inputs.front_image, "background_image": inputs.background_image}),
        );

        let tasks = [
            TaskSpec {
                label: "setting",
                image: &inputs.background_image,
                prompt: &self.settings.setting_prompt,
            },
            TaskSpec {
                label: "person",
                image: &inputs.front_image,
                prompt: &self.settings.person_prompt,
            },
        ];
        match self.run_video_tasks(&tasks) {
            Ok(urls) => {
                let mut urls = urls.into_iter();
                let response = GenerateResponse {
                    setting_video_url: urls.next().flatten(),
                    person_video_url: urls.next().flatten(),
                };
                self.log(
                    "generation_finished",
                    json!({
                        "setting_video_url": response.setting_video_url,
                        "person_video_url": response.person_video_url,
                    }),
                );
                Ok(response)
            }
            Err(err) => {
                let flow = FlowError::generation_failed(&err, GENERATE_FALLBACK_ERROR);
                self.log("generation_failed", json!({"error": flow.message()}));
                Err(flow)
            }
        }
    }

    pub fn explore(&self, request: &ExploreRequest) -> Result<ExploreResponse, FlowError> {
        let inputs = match request.validate() {
            Ok(inputs) => inputs,
            Err(err) => {
                self.log("request_rejected", json!({"route": "explore", "error": err.message()}));
                return Err(err);
            }
        };
        self.log(
            "exploration_requested",
            json!({"image": inputs.image, "prompt": inputs.prompt}),
        );

        let tasks = [TaskSpec {
            label: "exploration",
            image: &inputs.image,
            prompt: &inputs.prompt,
        }];
        match self.run_video_tasks(&tasks) {
            Ok(urls) => {
                let response = ExploreResponse {
                    video_url: urls.into_iter().next().flatten(),
                };
                self.log(
                    "exploration_finished",
                    json!({"video_url": response.video_url}),
                );
                Ok(response)
            }
            Err(err) => {
                let flow = FlowError::generation_failed(&err, EXPLORE_FALLBACK_ERROR);
                self.log("exploration_failed", json!({"error": flow.message()}));
                Err(flow)
            }
        }
    }

    /// Submits every task, then waits for all of them on separate threads.
    /// Returns the first output URL per task, in task order. The first
    /// failure ends the call; tasks still running are left to finish or
    /// time out on their own.
    fn run_video_tasks(&self, tasks: &[TaskSpec<'_>]) -> Result<Vec<Option<String>>> {
        let model = self.select_model()?;

        let mut handles: Vec<TaskHandle> = Vec::with_capacity(tasks.len());
        for task in tasks {
            let request = VideoTaskRequest {
                model: model.clone(),
                prompt_image: task.image.to_string(),
                prompt_text: task.prompt.to_string(),
                ratio: self.settings.ratio.clone(),
                duration: self.settings.duration,
            };
            let handle = self
                .provider
                .submit(&request)
                .with_context(|| format!("{} task submission failed", task.label))?;
            self.log(
                "task_submitted",
                json!({"label": task.label, "task_id": handle.id, "model": model}),
            );
            handles.push(handle);
        }

        let timeout = self.settings.task_timeout;
        let (sender, receiver) = mpsc::channel();
        for (index, handle) in handles.into_iter().enumerate() {
            let provider = Arc::clone(&self.provider);
            let sender = sender.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let outcome = provider.wait(&handle, timeout);
                let _ = sender.send((index, handle.id, started.elapsed(), outcome));
            });
        }
        drop(sender);

        let mut urls: Vec<Option<String>> = vec![None; tasks.len()];
        for _ in 0..tasks.len() {
            let (index, task_id, elapsed, outcome) = receiver
                .recv()
                .map_err(|_| anyhow!("generation worker exited without a result"))?;
            let label = tasks[index].label;
            let output = outcome.with_context(|| format!("{label} task {task_id} failed"))?;
            self.log(
                "task_completed",
                json!({
                    "label": label,
                    "task_id": task_id,
                    "outputs": output.output.len(),
                    "elapsed_s": elapsed.as_secs_f64(),
                }),
            );
            urls[index] = output.first_url();
        }
        Ok(urls)
    }

    fn select_model(&self) -> Result<String> {
        let selection = self
            .selector
            .select(
                self.settings.model.as_deref(),
                VideoTaskShape {
                    provider: self.provider.name(),
                    ratio: &self.settings.ratio,
                    duration: self.settings.duration,
                },
            )
            .map_err(|reason| anyhow!(reason))?;
        if let (Some(reason), Some(_)) = (&selection.fallback_reason, &selection.requested) {
            self.log(
                "model_fallback",
                json!({"model": selection.model.name, "reason": reason}),
            );
        }
        Ok(selection.model.name)
    }

    fn log(&self, event_type: &str, payload: Value) {
        log_event(&self.events, event_type, payload);
    }
}
