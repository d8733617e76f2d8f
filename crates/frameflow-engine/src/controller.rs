use std::path::Path;
use std::sync::Arc;

use frameflow_contracts::api::{ExploreRequest, GenerateRequest};
use frameflow_contracts::error::{FlowError, FlowErrorKind};
use frameflow_contracts::events::EventWriter;
use frameflow_contracts::session::{
    CapturedFrame, Completion, ExplorationTicket, ExplorerState, GenerationResult, SlotImage,
    SlotKey, VideoSource,
};
use frameflow_contracts::status::{RequestToken, TaskKind, TaskStatus};
use serde_json::{json, Value};

use crate::capture::{capture_frame, VideoSurface};
use crate::client::GatewayClient;
use crate::log_event;
use crate::media::InlineImage;

pub type StatusObserver = Arc<dyn Fn(TaskKind, TaskStatus) + Send + Sync>;

/// Drives one explorer session: slot intake, the generation flow, frame
/// capture and the exploration chain.
///
/// All state lives in an [`ExplorerState`]; network calls go through a
/// [`GatewayClient`]. Results are bound to the request token that produced
/// them, so a late answer to an abandoned request is dropped.
pub struct ExplorerController {
    state: ExplorerState,
    client: Arc<dyn GatewayClient>,
    events: EventWriter,
    observer: Option<StatusObserver>,
}

impl ExplorerController {
    pub fn new(client: Arc<dyn GatewayClient>, events: EventWriter) -> Self {
        Self {
            state: ExplorerState::new(),
            client,
            events,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StatusObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> &ExplorerState {
        &self.state
    }

    pub fn client(&self) -> Arc<dyn GatewayClient> {
        Arc::clone(&self.client)
    }

    pub fn load_slot(&mut self, key: SlotKey, path: &Path) -> anyhow::Result<()> {
        let image = InlineImage::from_path(path)?;
        let mime_type = image.mime_type().to_string();
        let bytes = image.into_bytes();
        let byte_len = bytes.len();
        self.state.set_slot(
            key,
            SlotImage {
                bytes,
                mime_type: mime_type.clone(),
                byte_len,
            },
            Some(path.display().to_string()),
        );
        self.log(
            "slot_loaded",
            json!({"slot": key.as_str(), "mime_type": mime_type, "bytes": byte_len}),
        );
        Ok(())
    }

    pub fn remove_slot(&mut self, key: SlotKey) {
        self.state.clear_slot(key);
        self.log("slot_cleared", json!({"slot": key.as_str()}));
    }

    /// Runs the main flow to completion: uploading while the required
    /// photos are encoded, generating, then polling while the gateway call
    /// is outstanding.
    pub fn generate(&mut self) -> Result<GenerationResult, FlowError> {
        let token = self.state.begin_generation()?;
        self.publish(TaskKind::Generation);

        let request = match self.encode_generation_request() {
            Ok(request) => request,
            Err(err) => {
                self.state.complete_generation(token, Err(err.clone()));
                self.publish(TaskKind::Generation);
                return Err(err);
            }
        };
        self.advance(token, TaskStatus::Generating);
        self.advance(token, TaskStatus::Polling);

        let outcome = self.client.generate(&request).map(GenerationResult::from);
        match self.state.complete_generation(token, outcome.clone()) {
            Completion::Applied => {
                self.publish(TaskKind::Generation);
                if outcome.is_ok() {
                    self.publish(TaskKind::Exploration);
                }
            }
            Completion::Discarded => self.log_discard(token),
        }
        outcome
    }

    fn encode_generation_request(&self) -> Result<GenerateRequest, FlowError> {
        let encode = |key: SlotKey| -> Result<String, FlowError> {
            self.state
                .slot(key)
                .and_then(|slot| slot.raw_image.as_ref())
                .map(|image| {
                    InlineImage::new(image.bytes.clone(), image.mime_type.clone()).to_data_uri()
                })
                .ok_or_else(|| {
                    FlowError::invalid_input(format!("Missing required image(s): {}", key.label()))
                })
        };
        Ok(GenerateRequest::new(
            encode(SlotKey::Front)?,
            encode(SlotKey::Background)?,
        ))
    }

    /// Grabs the paused frame as the next exploration input. A playing
    /// surface or one with nothing to read is ignored and yields `Ok(false)`.
    pub fn capture(
        &mut self,
        surface: &dyn VideoSurface,
        source: VideoSource,
    ) -> Result<bool, FlowError> {
        let image = capture_frame(surface)
            .map_err(|err| FlowError::capture_unavailable(format!("{err:#}")))?;
        let Some(image) = image else {
            return Ok(false);
        };
        let image = image.to_data_uri();
        self.state.capture_frame(CapturedFrame {
            image: image.clone(),
            source: source.clone(),
        })?;
        self.log("frame_captured", json!({"source": source, "image": image}));
        Ok(true)
    }

    /// Drops a captured frame that has not been explored yet. Returns false
    /// when there was nothing to drop.
    pub fn discard_capture(&mut self) -> bool {
        if self.state.captured_frame().is_none() {
            return false;
        }
        self.state.discard_capture();
        self.log("capture_discarded", json!({}));
        true
    }

    /// First half of an exploration; the returned ticket must be handed
    /// back to [`ExplorerController::finish_exploration`].
    pub fn start_exploration(&mut self, prompt: &str) -> Result<ExplorationTicket, FlowError> {
        let ticket = self.state.begin_exploration(prompt)?;
        self.publish(TaskKind::Exploration);
        self.log(
            "exploration_started",
            json!({"prompt": ticket.prompt, "seq": ticket.token.seq}),
        );
        self.advance(ticket.token, TaskStatus::Polling);
        Ok(ticket)
    }

    pub fn finish_exploration(
        &mut self,
        ticket: &ExplorationTicket,
        outcome: Result<Option<String>, FlowError>,
    ) -> Completion {
        let completion = self.state.complete_exploration(ticket, outcome);
        match completion {
            Completion::Applied => {
                self.publish(TaskKind::Exploration);
                if self.state.exploration_status() == TaskStatus::Done {
                    self.log_chain("chain_appended");
                }
            }
            Completion::Discarded => self.log_discard(ticket.token),
        }
        completion
    }

    /// Blocking exploration from the captured frame. Failures are recorded
    /// in the state and also returned.
    pub fn explore(&mut self, prompt: &str) -> Result<Completion, FlowError> {
        let ticket = self.start_exploration(prompt)?;
        let outcome = request_exploration(self.client.as_ref(), &ticket);
        let completion = self.finish_exploration(&ticket, outcome);
        if completion == Completion::Applied {
            if let Some(message) = self.state.exploration_error() {
                return Err(FlowError::new(FlowErrorKind::GenerationFailed, message));
            }
        }
        Ok(completion)
    }

    pub fn navigate_to(&mut self, index: usize) -> Result<(), FlowError> {
        self.state.navigate_to(index)?;
        self.publish(TaskKind::Exploration);
        self.log_chain("chain_navigated");
        Ok(())
    }

    pub fn reset(&mut self) {
        self.state.reset();
        self.publish(TaskKind::Exploration);
        self.log_chain("chain_reset");
    }

    fn advance(&mut self, token: RequestToken, status: TaskStatus) {
        if self.state.advance(token, status) {
            self.publish(token.kind);
        }
    }

    fn publish(&self, kind: TaskKind) {
        let status = self.state.status(kind);
        self.log(
            "status_changed",
            json!({"task": kind.as_str(), "status": status.as_str()}),
        );
        if let Some(observer) = self.observer.as_ref() {
            observer(kind, status);
        }
    }

    fn log_chain(&self, event_type: &str) {
        let chain = self.state.chain();
        self.log(
            event_type,
            json!({
                "depth": chain.depth(),
                "current": chain.current().map(|node| node.id.clone()),
                "breadcrumbs": chain.breadcrumbs(40),
            }),
        );
    }

    fn log_discard(&self, token: RequestToken) {
        self.log(
            "stale_result_discarded",
            json!({"task": token.kind.as_str(), "seq": token.seq}),
        );
    }

    fn log(&self, event_type: &str, payload: Value) {
        log_event(&self.events, event_type, payload);
    }
}

/// The network half of an exploration. Safe to run off the controller's
/// thread; the outcome goes back through `finish_exploration`.
pub fn request_exploration(
    client: &dyn GatewayClient,
    ticket: &ExplorationTicket,
) -> Result<Option<String>, FlowError> {
    client
        .explore(&ExploreRequest::new(ticket.image.clone(), ticket.prompt.clone()))
        .map(|response| response.video_url)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;

    use frameflow_contracts::api::{
        ExploreRequest, ExploreResponse, GenerateRequest, GenerateResponse,
    };
    use frameflow_contracts::error::{FlowError, FlowErrorKind};
    use frameflow_contracts::events::EventWriter;
    use frameflow_contracts::session::{Completion, SlotKey, VideoSource, NO_EXPLORATION_VIDEO};
    use frameflow_contracts::status::{TaskKind, TaskStatus};
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::Value;

    use super::{request_exploration, ExplorerController, StatusObserver};
    use crate::capture::StillFrameSurface;
    use crate::client::GatewayClient;

    #[derive(Default)]
    struct StubClient {
        generated: Mutex<VecDeque<Result<GenerateResponse, FlowError>>>,
        explored: Mutex<VecDeque<Result<ExploreResponse, FlowError>>>,
        generate_requests: Mutex<Vec<GenerateRequest>>,
        explore_requests: Mutex<Vec<ExploreRequest>>,
    }

    impl StubClient {
        fn generating(urls: (&str, &str)) -> Self {
            let stub = Self::default();
            stub.push_generate(Ok(GenerateResponse {
                setting_video_url: Some(urls.0.to_string()),
                person_video_url: Some(urls.1.to_string()),
            }));
            stub
        }

        fn push_generate(&self, outcome: Result<GenerateResponse, FlowError>) {
            if let Ok(mut queue) = self.generated.lock() {
                queue.push_back(outcome);
            }
        }

        fn push_explore(&self, video_url: Option<&str>) {
            if let Ok(mut queue) = self.explored.lock() {
                queue.push_back(Ok(ExploreResponse {
                    video_url: video_url.map(str::to_string),
                }));
            }
        }

        fn generate_calls(&self) -> usize {
            self.generate_requests.lock().map(|calls| calls.len()).unwrap_or(0)
        }
    }

    impl GatewayClient for StubClient {
        fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, FlowError> {
            if let Ok(mut calls) = self.generate_requests.lock() {
                calls.push(request.clone());
            }
            self.generated
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
                .unwrap_or_else(|| Err(FlowError::invalid_input("no scripted generate")))
        }

        fn explore(&self, request: &ExploreRequest) -> Result<ExploreResponse, FlowError> {
            if let Ok(mut calls) = self.explore_requests.lock() {
                calls.push(request.clone());
            }
            self.explored
                .lock()
                .ok()
                .and_then(|mut queue| queue.pop_front())
                .unwrap_or_else(|| Err(FlowError::invalid_input("no scripted explore")))
        }
    }

    type StatusLog = Arc<Mutex<Vec<(TaskKind, TaskStatus)>>>;

    fn recorder() -> (StatusObserver, StatusLog) {
        let log: StatusLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let observer: StatusObserver = Arc::new(move |kind: TaskKind, status: TaskStatus| {
            if let Ok(mut entries) = sink.lock() {
                entries.push((kind, status));
            }
        });
        (observer, log)
    }

    fn statuses(log: &StatusLog, kind: TaskKind) -> Vec<TaskStatus> {
        log.lock()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(entry_kind, _)| *entry_kind == kind)
                    .map(|(_, status)| *status)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn surface() -> StillFrameSurface {
        StillFrameSurface::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            32,
            18,
            Rgba([120, 80, 40, 255]),
        )))
    }

    fn loaded_controller(
        client: Arc<StubClient>,
        events: EventWriter,
    ) -> anyhow::Result<(ExplorerController, tempfile::TempDir)> {
        let temp = tempfile::tempdir()?;
        let front = temp.path().join("front.png");
        let background = temp.path().join("background.jpg");
        std::fs::write(&front, b"FRONT")?;
        std::fs::write(&background, b"BACKGROUND")?;
        let mut controller = ExplorerController::new(client, events);
        controller.load_slot(SlotKey::Front, &front)?;
        controller.load_slot(SlotKey::Background, &background)?;
        Ok((controller, temp))
    }

    fn generated_controller(
        client: Arc<StubClient>,
    ) -> anyhow::Result<(ExplorerController, tempfile::TempDir)> {
        let (mut controller, temp) = loaded_controller(client, EventWriter::disabled("test"))?;
        controller.generate()?;
        Ok((controller, temp))
    }

    #[test]
    fn generate_sequences_status_phases_and_encodes_slots() -> anyhow::Result<()> {
        let client = Arc::new(StubClient::generating(("setting.mp4", "person.mp4")));
        let (controller, _temp) = loaded_controller(client.clone(), EventWriter::disabled("t"))?;
        let (observer, log) = recorder();
        let mut controller = controller.with_observer(observer);

        let result = controller.generate()?;
        assert_eq!(result.setting_video_url.as_deref(), Some("setting.mp4"));
        assert_eq!(
            statuses(&log, TaskKind::Generation),
            vec![
                TaskStatus::Uploading,
                TaskStatus::Generating,
                TaskStatus::Polling,
                TaskStatus::Done
            ]
        );
        assert_eq!(
            controller.state().displayed_video(VideoSource::Person),
            Some("person.mp4")
        );

        let requests = client
            .generate_requests
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?;
        // base64 of "FRONT" and "BACKGROUND"
        assert_eq!(
            requests[0].front_image.as_deref(),
            Some("data:image/png;base64,RlJPTlQ=")
        );
        assert_eq!(
            requests[0].background_image.as_deref(),
            Some("data:image/jpeg;base64,QkFDS0dST1VORA==")
        );
        Ok(())
    }

    #[test]
    fn generate_without_required_slots_never_calls_gateway() -> anyhow::Result<()> {
        let client = Arc::new(StubClient::generating(("a", "b")));
        let temp = tempfile::tempdir()?;
        let left = temp.path().join("left.png");
        std::fs::write(&left, b"LEFT")?;
        let mut controller = ExplorerController::new(client.clone(), EventWriter::disabled("t"));
        controller.load_slot(SlotKey::Left, &left)?;

        let err = controller.generate().expect_err("front/background missing");
        assert_eq!(err.kind(), FlowErrorKind::InvalidInput);
        assert_eq!(client.generate_calls(), 0);
        assert_eq!(controller.state().generation_status(), TaskStatus::Idle);
        Ok(())
    }

    #[test]
    fn removing_a_required_slot_blocks_generation() -> anyhow::Result<()> {
        let client = Arc::new(StubClient::generating(("a", "b")));
        let (mut controller, _temp) = loaded_controller(client.clone(), EventWriter::disabled("t"))?;
        controller.remove_slot(SlotKey::Background);
        assert!(!controller.state().can_generate());
        assert!(controller.generate().is_err());
        assert_eq!(client.generate_calls(), 0);
        Ok(())
    }

    #[test]
    fn gateway_error_moves_generation_to_error_and_allows_retry() -> anyhow::Result<()> {
        let client = Arc::new(StubClient::default());
        client.push_generate(Err(FlowError::generation_failed_message(
            "Task abc timed out after 600s",
            "Failed to generate videos",
        )));
        let (mut controller, _temp) = loaded_controller(client.clone(), EventWriter::disabled("t"))?;
        let err = controller.generate().expect_err("gateway failed");
        assert_eq!(err.message(), "Task abc timed out after 600s");
        assert_eq!(controller.state().generation_status(), TaskStatus::Error);
        assert_eq!(
            controller.state().generation_error(),
            Some("Task abc timed out after 600s")
        );
        assert!(controller.state().can_generate());
        Ok(())
    }

    #[test]
    fn capture_then_explore_appends_node_from_frame() -> anyhow::Result<()> {
        let client = Arc::new(StubClient::generating(("s.mp4", "p.mp4")));
        client.push_explore(Some("e1.mp4"));
        let (controller, _temp) = generated_controller(client.clone())?;
        let (observer, log) = recorder();
        let mut controller = controller.with_observer(observer);

        assert!(controller.capture(&surface(), VideoSource::Setting)?);
        let frame = controller
            .state()
            .captured_frame()
            .map(|frame| frame.image.clone())
            .expect("frame captured");
        assert!(frame.starts_with("data:image/jpeg;base64,"));

        assert_eq!(controller.explore("zoom in")?, Completion::Applied);
        let node = controller.state().chain().current().expect("node appended");
        assert_eq!(node.prompt, "zoom in");
        assert_eq!(node.source_frame_image, frame);
        assert_eq!(node.video_url, "e1.mp4");
        assert!(controller.state().captured_frame().is_none());
        assert_eq!(
            statuses(&log, TaskKind::Exploration),
            vec![TaskStatus::Generating, TaskStatus::Polling, TaskStatus::Done]
        );

        let sent = client
            .explore_requests
            .lock()
            .map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(sent[0].image.as_deref(), Some(frame.as_str()));
        assert_eq!(sent[0].prompt.as_deref(), Some("zoom in"));
        Ok(())
    }

    #[test]
    fn capture_while_playing_is_a_silent_noop() -> anyhow::Result<()> {
        let (mut controller, _temp) =
            generated_controller(Arc::new(StubClient::generating(("s", "p"))))?;
        let mut playing = surface();
        playing.play();
        assert!(!controller.capture(&playing, VideoSource::Person)?);
        assert!(!controller.capture(&StillFrameSurface::without_context(), VideoSource::Person)?);
        assert!(controller.state().captured_frame().is_none());
        Ok(())
    }

    #[test]
    fn discarding_a_capture_blocks_exploration() -> anyhow::Result<()> {
        let (mut controller, _temp) =
            generated_controller(Arc::new(StubClient::generating(("s", "p"))))?;
        assert!(!controller.discard_capture());
        controller.capture(&surface(), VideoSource::Setting)?;
        assert!(controller.discard_capture());
        assert!(controller.state().captured_frame().is_none());
        assert_eq!(
            controller.explore("zoom in").expect_err("no frame").kind(),
            FlowErrorKind::InvalidInput
        );
        Ok(())
    }

    #[test]
    fn unencodable_frame_is_capture_unavailable() -> anyhow::Result<()> {
        let (mut controller, _temp) =
            generated_controller(Arc::new(StubClient::generating(("s", "p"))))?;
        // JPEG dimensions are limited to 65535 pixels per side.
        let too_wide = StillFrameSurface::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            70_000,
            1,
            Rgba([0, 0, 0, 255]),
        )));
        let err = controller
            .capture(&too_wide, VideoSource::Setting)
            .expect_err("encoder rejects the frame");
        assert_eq!(err.kind(), FlowErrorKind::CaptureUnavailable);
        assert_eq!(err.http_status(), 422);
        assert!(controller.state().captured_frame().is_none());
        Ok(())
    }

    #[test]
    fn empty_exploration_output_is_reported_without_appending() -> anyhow::Result<()> {
        let client = Arc::new(StubClient::generating(("s", "p")));
        client.push_explore(None);
        let (mut controller, _temp) = generated_controller(client)?;
        controller.capture(&surface(), VideoSource::Setting)?;
        let err = controller.explore("zoom in").expect_err("no video");
        assert_eq!(err.message(), NO_EXPLORATION_VIDEO);
        assert!(controller.state().chain().is_root());
        assert_eq!(controller.state().exploration_status(), TaskStatus::Error);
        Ok(())
    }

    #[test]
    fn navigate_truncates_and_reset_empties() -> anyhow::Result<()> {
        let client = Arc::new(StubClient::generating(("s", "p")));
        for url in ["n0", "n1", "n2", "n3"] {
            client.push_explore(Some(url));
        }
        let (mut controller, _temp) = generated_controller(client)?;
        for prompt in ["a", "b", "c"] {
            controller.capture(&surface(), VideoSource::Setting)?;
            controller.explore(prompt)?;
        }
        controller.navigate_to(0)?;
        assert_eq!(controller.state().chain().depth(), 1);

        controller.capture(&surface(), VideoSource::Setting)?;
        controller.explore("d")?;
        let urls = controller
            .state()
            .chain()
            .nodes()
            .iter()
            .map(|node| node.video_url.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(urls, vec!["n0", "n3"]);

        assert!(controller.navigate_to(5).is_err());
        controller.reset();
        assert!(controller.state().chain().is_root());
        assert_eq!(controller.state().displayed_video(VideoSource::Setting), Some("s"));
        Ok(())
    }

    #[test]
    fn late_result_from_background_exploration_is_discarded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let client = Arc::new(StubClient::generating(("s", "p")));
        client.push_explore(Some("late.mp4"));
        let (mut controller, _slots) =
            loaded_controller(client, EventWriter::new(&events_path, "session"))?;
        controller.generate()?;
        controller.capture(&surface(), VideoSource::Setting)?;

        let ticket = controller.start_exploration("drift left")?;
        let (sender, receiver) = mpsc::channel();
        let worker_client = controller.client();
        let worker_ticket = ticket.clone();
        let worker = thread::spawn(move || {
            let outcome = request_exploration(worker_client.as_ref(), &worker_ticket);
            let _ = sender.send(outcome);
        });

        controller.reset();
        let outcome = receiver.recv()?;
        worker
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))?;
        assert_eq!(
            controller.finish_exploration(&ticket, outcome),
            Completion::Discarded
        );
        assert!(controller.state().chain().is_root());
        assert_eq!(controller.state().exploration_status(), TaskStatus::Idle);

        let raw = std::fs::read_to_string(&events_path)?;
        let types = raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .filter_map(|row| row.get("type").and_then(Value::as_str).map(str::to_string))
            .collect::<Vec<String>>();
        assert!(types.iter().any(|kind| kind == "chain_reset"));
        assert_eq!(types.last().map(String::as_str), Some("stale_result_discarded"));
        Ok(())
    }
}
