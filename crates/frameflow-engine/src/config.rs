use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_RUNWAY_API_BASE: &str = "https://api.dev.runwayml.com";
pub const DEFAULT_PROVIDER: &str = "runway";
pub const DEFAULT_POLL_INTERVAL_S: f64 = 5.0;
pub const DEFAULT_TASK_TIMEOUT_S: f64 = 600.0;

/// Runtime settings for the gateways, resolved from the process
/// environment with a `.env` file as a fallback layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub provider: String,
    pub api_base: String,
    pub api_secret: Option<String>,
    pub model: Option<String>,
    pub poll_interval: Duration,
    pub task_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            api_base: DEFAULT_RUNWAY_API_BASE.to_string(),
            api_secret: None,
            model: None,
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_S),
            task_timeout: Duration::from_secs_f64(DEFAULT_TASK_TIMEOUT_S),
        }
    }
}

impl EngineConfig {
    /// Reads the environment, then `.env` in the working directory for keys
    /// the environment does not set.
    pub fn from_env() -> Self {
        let dotenv = env::current_dir()
            .map(|dir| parse_dotenv(&dir.join(".env")))
            .unwrap_or_default();
        Self::from_lookup(|key| non_empty_env(key).or_else(|| non_empty(dotenv.get(key).cloned())))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            provider: lookup("FRAMEFLOW_PROVIDER")
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or(defaults.provider),
            api_base: lookup("RUNWAY_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_secret: lookup("RUNWAYML_API_SECRET"),
            model: lookup("FRAMEFLOW_VIDEO_MODEL"),
            poll_interval: seconds_setting(
                lookup("FRAMEFLOW_POLL_INTERVAL"),
                DEFAULT_POLL_INTERVAL_S,
                0.2,
                30.0,
            ),
            task_timeout: seconds_setting(
                lookup("FRAMEFLOW_TASK_TIMEOUT"),
                DEFAULT_TASK_TIMEOUT_S,
                10.0,
                3600.0,
            ),
        }
    }
}

fn seconds_setting(raw: Option<String>, default: f64, min: f64, max: f64) -> Duration {
    let value = raw
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max);
    Duration::from_secs_f64(value)
}

pub fn non_empty_env(key: &str) -> Option<String> {
    non_empty(env::var(key).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let unquoted = ['"', '\'']
            .iter()
            .find_map(|quote| {
                value
                    .strip_prefix(*quote)
                    .and_then(|rest| rest.strip_suffix(*quote))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), unquoted.to_string());
    }
    vars
}
