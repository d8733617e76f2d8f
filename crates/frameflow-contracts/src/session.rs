use serde::{Deserialize, Serialize};

use crate::api::GenerateResponse;
use crate::chain::{ExplorationChain, ExplorationNode};
use crate::error::FlowError;
use crate::status::{RequestToken, RequestTokens, TaskKind, TaskStatus};

pub const NO_EXPLORATION_VIDEO: &str = "No video was returned for this exploration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    Front,
    Left,
    Right,
    Back,
    Background,
}

impl SlotKey {
    pub const ALL: [SlotKey; 5] = [
        SlotKey::Front,
        SlotKey::Left,
        SlotKey::Right,
        SlotKey::Back,
        SlotKey::Background,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Front => "Front",
            Self::Left => "Left Side",
            Self::Right => "Right Side",
            Self::Back => "Back",
            Self::Background => "Background",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Front => "front",
            Self::Left => "left",
            Self::Right => "right",
            Self::Back => "back",
            Self::Background => "background",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == normalized)
    }

    /// Front and background feed the gateway; the other person photos are
    /// collected but not sent anywhere.
    pub fn is_required(self) -> bool {
        matches!(self, Self::Front | Self::Background)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotImage {
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub byte_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSlot {
    pub label: String,
    pub key: SlotKey,
    pub raw_image: Option<SlotImage>,
    pub preview_uri: Option<String>,
}

impl ImageSlot {
    fn empty(key: SlotKey) -> Self {
        Self {
            label: key.label().to_string(),
            key,
            raw_image: None,
            preview_uri: None,
        }
    }

    pub fn is_filled(&self) -> bool {
        self.raw_image.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub setting_video_url: Option<String>,
    pub person_video_url: Option<String>,
}

impl From<GenerateResponse> for GenerationResult {
    fn from(response: GenerateResponse) -> Self {
        Self {
            setting_video_url: response.setting_video_url,
            person_video_url: response.person_video_url,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "node_id")]
pub enum VideoSource {
    Setting,
    Person,
    Exploration(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFrame {
    pub image: String,
    pub source: VideoSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplorationTicket {
    pub token: RequestToken,
    pub prompt: String,
    pub image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    Discarded,
}

/// Everything the explorer UI renders from, owned by one controller and
/// changed only through the methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplorerState {
    slots: Vec<ImageSlot>,
    generation_status: TaskStatus,
    generation_error: Option<String>,
    generation_result: Option<GenerationResult>,
    chain: ExplorationChain,
    captured_frame: Option<CapturedFrame>,
    exploration_status: TaskStatus,
    exploration_error: Option<String>,
    tokens: RequestTokens,
}

impl Default for ExplorerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ExplorerState {
    pub fn new() -> Self {
        Self {
            slots: SlotKey::ALL.into_iter().map(ImageSlot::empty).collect(),
            generation_status: TaskStatus::Idle,
            generation_error: None,
            generation_result: None,
            chain: ExplorationChain::new(),
            captured_frame: None,
            exploration_status: TaskStatus::Idle,
            exploration_error: None,
            tokens: RequestTokens::default(),
        }
    }

    pub fn slots(&self) -> &[ImageSlot] {
        self.slots.as_slice()
    }

    pub fn slot(&self, key: SlotKey) -> Option<&ImageSlot> {
        self.slots.iter().find(|slot| slot.key == key)
    }

    pub fn set_slot(&mut self, key: SlotKey, image: SlotImage, preview_uri: Option<String>) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.key == key) {
            slot.raw_image = Some(image);
            slot.preview_uri = preview_uri;
        }
    }

    pub fn clear_slot(&mut self, key: SlotKey) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.key == key) {
            slot.raw_image = None;
            slot.preview_uri = None;
        }
    }

    pub fn missing_required_slots(&self) -> Vec<SlotKey> {
        self.slots
            .iter()
            .filter(|slot| slot.key.is_required() && !slot.is_filled())
            .map(|slot| slot.key)
            .collect()
    }

    pub fn can_generate(&self) -> bool {
        self.missing_required_slots().is_empty() && !self.generation_status.is_active()
    }

    pub fn generation_status(&self) -> TaskStatus {
        self.generation_status
    }

    pub fn generation_error(&self) -> Option<&str> {
        self.generation_error.as_deref()
    }

    pub fn generation_result(&self) -> Option<&GenerationResult> {
        self.generation_result.as_ref()
    }

    pub fn chain(&self) -> &ExplorationChain {
        &self.chain
    }

    pub fn captured_frame(&self) -> Option<&CapturedFrame> {
        self.captured_frame.as_ref()
    }

    pub fn exploration_status(&self) -> TaskStatus {
        self.exploration_status
    }

    pub fn exploration_error(&self) -> Option<&str> {
        self.exploration_error.as_deref()
    }

    pub fn status(&self, kind: TaskKind) -> TaskStatus {
        match kind {
            TaskKind::Generation => self.generation_status,
            TaskKind::Exploration => self.exploration_status,
        }
    }

    /// Video URL the player should show: the current exploration, or the
    /// root videos when the chain is empty.
    pub fn displayed_video(&self, root: VideoSource) -> Option<&str> {
        if let Some(node) = self.chain.current() {
            return Some(node.video_url.as_str());
        }
        let result = self.generation_result.as_ref()?;
        match root {
            VideoSource::Setting => result.setting_video_url.as_deref(),
            VideoSource::Person => result.person_video_url.as_deref(),
            VideoSource::Exploration(_) => None,
        }
    }

    pub fn begin_generation(&mut self) -> Result<RequestToken, FlowError> {
        if self.generation_status.is_active() {
            return Err(FlowError::busy("A generation is already in progress."));
        }
        let missing = self.missing_required_slots();
        if !missing.is_empty() {
            let labels = missing
                .iter()
                .map(|key| key.label())
                .collect::<Vec<&str>>()
                .join(", ");
            return Err(FlowError::invalid_input(format!(
                "Missing required image(s): {labels}"
            )));
        }
        let token = self.tokens.issue(TaskKind::Generation);
        self.generation_status = TaskStatus::Uploading;
        self.generation_error = None;
        Ok(token)
    }

    /// Moves an in-flight request to a later phase. Returns false when the
    /// token has been superseded.
    pub fn advance(&mut self, token: RequestToken, status: TaskStatus) -> bool {
        if !self.tokens.is_current(token) {
            return false;
        }
        match token.kind {
            TaskKind::Generation => self.generation_status = status,
            TaskKind::Exploration => self.exploration_status = status,
        }
        true
    }

    pub fn complete_generation(
        &mut self,
        token: RequestToken,
        outcome: Result<GenerationResult, FlowError>,
    ) -> Completion {
        if token.kind != TaskKind::Generation || !self.tokens.is_current(token) {
            return Completion::Discarded;
        }
        match outcome {
            Ok(result) => {
                self.generation_result = Some(result);
                self.generation_status = TaskStatus::Done;
                self.generation_error = None;
                self.chain.reset();
                self.clear_exploration_substate();
            }
            Err(err) => {
                self.generation_status = TaskStatus::Error;
                self.generation_error = Some(err.message().to_string());
            }
        }
        Completion::Applied
    }

    pub fn capture_frame(&mut self, frame: CapturedFrame) -> Result<(), FlowError> {
        if self.exploration_status.is_active() {
            return Err(FlowError::busy("An exploration is already in progress."));
        }
        self.captured_frame = Some(frame);
        self.exploration_error = None;
        Ok(())
    }

    pub fn discard_capture(&mut self) {
        self.captured_frame = None;
    }

    pub fn begin_exploration(&mut self, prompt: &str) -> Result<ExplorationTicket, FlowError> {
        if self.exploration_status.is_active() {
            return Err(FlowError::busy("An exploration is already in progress."));
        }
        let Some(frame) = self.captured_frame.as_ref() else {
            return Err(FlowError::invalid_input(
                "Pause a video and capture a frame first.",
            ));
        };
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(FlowError::invalid_input("Describe where to explore next."));
        }
        let image = frame.image.clone();
        let token = self.tokens.issue(TaskKind::Exploration);
        self.exploration_status = TaskStatus::Generating;
        self.exploration_error = None;
        Ok(ExplorationTicket {
            token,
            prompt: prompt.to_string(),
            image,
        })
    }

    pub fn complete_exploration(
        &mut self,
        ticket: &ExplorationTicket,
        outcome: Result<Option<String>, FlowError>,
    ) -> Completion {
        if !self.tokens.is_current(ticket.token) {
            return Completion::Discarded;
        }
        match outcome {
            Ok(Some(video_url)) => {
                self.append(ExplorationNode::new(
                    ticket.prompt.clone(),
                    ticket.image.clone(),
                    video_url,
                ));
                self.exploration_status = TaskStatus::Done;
            }
            Ok(None) => {
                self.exploration_status = TaskStatus::Error;
                self.exploration_error = Some(NO_EXPLORATION_VIDEO.to_string());
            }
            Err(err) => {
                self.exploration_status = TaskStatus::Error;
                self.exploration_error = Some(err.message().to_string());
            }
        }
        Completion::Applied
    }

    pub fn append(&mut self, node: ExplorationNode) {
        self.chain.append(node);
        self.clear_exploration_substate();
    }

    pub fn navigate_to(&mut self, index: usize) -> Result<(), FlowError> {
        self.chain.navigate_to(index)?;
        self.clear_exploration_substate();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.chain.reset();
        self.clear_exploration_substate();
    }

    // Drops the pending capture and abandons any exploration still in flight;
    // its late result will no longer match the active token.
    fn clear_exploration_substate(&mut self) {
        self.captured_frame = None;
        self.exploration_status = TaskStatus::Idle;
        self.exploration_error = None;
        self.tokens.abandon(TaskKind::Exploration);
    }
}
