use std::collections::BTreeMap;

use serde_json::Value;

use super::registry::{
    CommandSpec, HOTSPOT_COMMAND, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
    TEXT_ARG_COMMANDS,
};

/// One parsed line of interactive input.
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

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn arg_strings(&self, key: &str) -> Vec<String> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn arg_f64(&self, key: &str) -> Option<f64> {
        self.command_args.get(key).and_then(Value::as_f64)
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

/// `x y` or `x y width height`. Anything else is rejected so a typo never
/// places a hotspot somewhere unexpected.
fn parse_hotspot_args(arg: &str) -> Option<Vec<f64>> {
    let numbers = arg
        .split(|ch: char| ch.is_whitespace() || ch == ',')
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<f64>().ok().filter(|value| value.is_finite()))
        .collect::<Option<Vec<f64>>>()?;
    matches!(numbers.len(), 2 | 4).then_some(numbers)
}

pub fn parse_command(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, TEXT_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("text".to_string(), Value::String(arg.to_string()));
                if !arg.is_empty() {
                    intent.prompt = Some(arg.to_string());
                }
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "path".to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, MULTI_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "paths".to_string(),
                    Value::Array(
                        parse_path_args(arg)
                            .into_iter()
                            .map(Value::String)
                            .collect(),
                    ),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == HOTSPOT_COMMAND.command {
                let Some(numbers) = parse_hotspot_args(arg) else {
                    let mut intent = Intent::new("invalid", text);
                    intent.command_args.insert(
                        "reason".to_string(),
                        Value::String("/spot expects <x> <y> [<width> <height>]".to_string()),
                    );
                    return intent;
                };
                let mut intent = Intent::new(HOTSPOT_COMMAND.action, text);
                for (key, value) in ["x", "y", "width", "height"].iter().zip(numbers) {
                    intent
                        .command_args
                        .insert((*key).to_string(), Value::from(value));
                }
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    // Bare text edits around the selected hotspot.
    let mut intent = Intent::new("localized_edit", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
        .command_args
        .insert("text".to_string(), Value::String(raw_trimmed.to_string()));
    intent
}
