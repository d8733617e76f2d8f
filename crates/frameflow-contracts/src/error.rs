use serde_json::{json, Value};

const ERROR_MESSAGE_MAX_CHARS: usize = 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlowErrorKind {
    InvalidInput,
    GenerationFailed,
    CaptureUnavailable,
    Busy,
}

impl FlowErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::GenerationFailed => "generation_failed",
            Self::CaptureUnavailable => "capture_unavailable",
            Self::Busy => "busy",
        }
    }
}

/// Boundary error shared by the gateways, the HTTP server and the client
/// controller. Internal plumbing stays on `anyhow` and is folded into a
/// `FlowError` where it crosses into a response or a status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowError {
    kind: FlowErrorKind,
    message: String,
}

impl FlowError {
    pub fn new(kind: FlowErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FlowErrorKind::InvalidInput, message)
    }

    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(FlowErrorKind::Busy, message)
    }

    pub fn capture_unavailable(message: impl Into<String>) -> Self {
        Self::new(FlowErrorKind::CaptureUnavailable, message)
    }

    /// Folds an error chain into a GenerationFailed, keeping the underlying
    /// message when there is one and `fallback` otherwise.
    pub fn generation_failed(err: &anyhow::Error, fallback: &str) -> Self {
        let message = error_chain_text(err, ERROR_MESSAGE_MAX_CHARS);
        if message.trim().is_empty() {
            return Self::new(FlowErrorKind::GenerationFailed, fallback);
        }
        Self::new(FlowErrorKind::GenerationFailed, message)
    }

    pub fn generation_failed_message(message: impl Into<String>, fallback: &str) -> Self {
        let message = message.into();
        if message.trim().is_empty() {
            return Self::new(FlowErrorKind::GenerationFailed, fallback);
        }
        Self::new(FlowErrorKind::GenerationFailed, message)
    }

    pub fn kind(&self) -> FlowErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn http_status(&self) -> u16 {
        match self.kind {
            FlowErrorKind::InvalidInput => 400,
            FlowErrorKind::Busy => 409,
            FlowErrorKind::CaptureUnavailable => 422,
            FlowErrorKind::GenerationFailed => 500,
        }
    }

    pub fn to_body(&self) -> Value {
        json!({ "error": self.message })
    }

    /// Rebuilds an error from an HTTP status and the `{error}` body a gateway
    /// sent back.
    pub fn from_response(status: u16, body: &Value, fallback: &str) -> Self {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(fallback)
            .to_string();
        let kind = match status {
            400..=408 | 410..=499 => FlowErrorKind::InvalidInput,
            409 => FlowErrorKind::Busy,
            _ => FlowErrorKind::GenerationFailed,
        };
        Self::new(kind, message)
    }
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for FlowError {}

pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().map(|existing| existing == trimmed).unwrap_or(false) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
