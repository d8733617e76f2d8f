use serde::{Deserialize, Serialize};

/// Phase of one kind of generation request as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Idle,
    Uploading,
    Generating,
    Polling,
    Done,
    Error,
}

impl TaskStatus {
    /// A request of this kind is in flight; its triggering control stays
    /// disabled.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Uploading | Self::Generating | Self::Polling)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Uploading => "uploading",
            Self::Generating => "generating",
            Self::Polling => "polling",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Generation,
    Exploration,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Exploration => "exploration",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestToken {
    pub kind: TaskKind,
    pub seq: u64,
}

/// Monotonic per-kind counters. A result is applied only while its token is
/// still the active one for its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RequestTokens {
    generation: u64,
    exploration: u64,
}

impl RequestTokens {
    pub fn issue(&mut self, kind: TaskKind) -> RequestToken {
        let slot = self.slot_mut(kind);
        *slot += 1;
        RequestToken { kind, seq: *slot }
    }

    /// Invalidates whatever request of `kind` is outstanding.
    pub fn abandon(&mut self, kind: TaskKind) {
        *self.slot_mut(kind) += 1;
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        let active = match token.kind {
            TaskKind::Generation => self.generation,
            TaskKind::Exploration => self.exploration,
        };
        active == token.seq
    }

    fn slot_mut(&mut self, kind: TaskKind) -> &mut u64 {
        match kind {
            TaskKind::Generation => &mut self.generation,
            TaskKind::Exploration => &mut self.exploration,
        }
    }
}
