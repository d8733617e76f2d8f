use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NO_ARG_COMMANDS, SLOT_COMMANDS};

/// One parsed line of the interactive session.
#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

fn explore_intent(prompt: &str, raw: &str) -> Intent {
    let mut intent = Intent::new("explore", raw);
    intent.prompt = Some(prompt.trim().to_string());
    intent
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return explore_intent(raw_trimmed, text);
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return explore_intent(raw_trimmed, text);
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, SLOT_COMMANDS) {
        return Intent::new(action, text)
            .with_arg("slot", Value::String(command))
            .with_arg("path", Value::String(parse_single_path_arg(arg)));
    }

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return Intent::new(action, text);
    }

    match command.as_str() {
        "remove" => {
            Intent::new("clear_slot", text).with_arg("slot", Value::String(arg.to_string()))
        }
        "explore" => explore_intent(arg, text),
        "goto" => {
            let index = arg
                .parse::<u64>()
                .map(|value| Value::Number(value.into()))
                .unwrap_or(Value::Null);
            Intent::new("navigate", text).with_arg("index", index)
        }
        "capture" => {
            let mut parts = parse_path_args(arg);
            let last = parts.last().map(|value| value.to_ascii_lowercase());
            let source = match last {
                Some(last)
                    if parts.len() > 1
                        && matches!(last.as_str(), "setting" | "person" | "current") =>
                {
                    parts.pop();
                    last
                }
                _ => "current".to_string(),
            };
            Intent::new("capture", text)
                .with_arg("path", Value::String(parts.join(" ")))
                .with_arg("source", Value::String(source))
        }
        _ => Intent::new("unknown", text)
            .with_arg("command", Value::String(command))
            .with_arg("arg", Value::String(arg.to_string())),
    }
}
