use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use intake_core::config::{AppConfig, LoadOptions};
use toml::Value;

use crate::commands::CommandResult;

/// Keys that also read a second environment variable.
const ENV_ALIASES: [(&str, &str); 3] = [
    ("llm.api_key", "OPENAI_API_KEY"),
    ("logging.level", "INTAKE_LOG_LEVEL"),
    ("logging.format", "INTAKE_LOG_FORMAT"),
];

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value) in config.redacted_summary() {
        let source = field_source(&key, config_file_doc.as_ref(), config_file_path.as_deref());
        let value = if value.is_empty() { "<unset>".to_string() } else { value };
        lines.push(format!("- {key} = {value} (source: {source})"));
    }

    CommandResult::report(0, lines.join("\n"))
}

/// `database.url` reads `INTAKE_DATABASE_URL`.
pub fn env_key(key_path: &str) -> String {
    format!("INTAKE_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("intake.toml"), PathBuf::from("config/intake.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let primary = env_key(key_path);
    let alias = ENV_ALIASES.iter().find(|(key, _)| *key == key_path).map(|(_, alias)| *alias);
    for env_key in std::iter::once(primary.as_str()).chain(alias) {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::{contains_path, env_key};

    #[test]
    fn env_keys_follow_the_dotted_path() {
        assert_eq!(env_key("database.url"), "INTAKE_DATABASE_URL");
        assert_eq!(
            env_key("conversation.max_auto_advance"),
            "INTAKE_CONVERSATION_MAX_AUTO_ADVANCE"
        );
    }

    #[test]
    fn nested_keys_are_found_in_the_file() {
        let doc: toml::Value =
            "[conversation]\nhistory_window = 10\n".parse().expect("valid toml");
        assert!(contains_path(&doc, "conversation.history_window"));
        assert!(!contains_path(&doc, "conversation.max_auto_advance"));
    }
}
