//! Configuration — JSON file plus environment-variable overrides.
//!
//! Loaded once at startup and never mutated afterwards. Every field of the
//! file can be overridden by one environment variable, applied after the
//! file is parsed.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default IMAP port when `imapServer` carries no explicit port.
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// Process-wide configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub email: EmailSettings,
    pub webhook: WebhookSettings,
    pub llm: LlmSettings,
}

/// Mailbox account settings, shared by the IMAP watcher and the SMTP
/// reply sink.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSettings {
    /// IMAP server as `host` or `host:port`.
    pub imap_server: String,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookSettings {
    #[serde(alias = "weComUrl")]
    pub url: String,
}

/// Summarization backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    pub host: String,
    /// API path appended to `host`.
    pub api: String,
    pub token: String,
    pub model: String,
    /// Prompt template containing the `[CHAT-RECORD]` placeholder.
    pub prompt: String,
}

fn default_smtp_server() -> String {
    "smtp.qq.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

impl Config {
    /// Load configuration from a JSON file and apply env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override individual fields from the environment.
    pub fn apply_env_overrides(&mut self) {
        override_from_env(&mut self.email.imap_server, "IMAP_SERVER");
        override_from_env(&mut self.email.username, "USERNAME");
        override_from_env(&mut self.email.password, "PASSWORD");
        override_from_env(&mut self.email.mailbox, "MAILBOX");
        override_from_env(&mut self.email.smtp_server, "SMTP_SERVER");
        if let Some(port) = env_var("SMTP_PORT").and_then(|v| v.parse().ok()) {
            self.email.smtp_port = port;
        }
        override_from_env(&mut self.webhook.url, "WEBHOOK_URL");
        override_from_env(&mut self.llm.host, "LLM_HOST");
        override_from_env(&mut self.llm.api, "LLM_API");
        override_from_env(&mut self.llm.token, "LLM_TOKEN");
        override_from_env(&mut self.llm.model, "LLM_MODEL");
        override_from_env(&mut self.llm.prompt, "LLM_PROMPT");
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn override_from_env(field: &mut String, name: &str) {
    if let Some(value) = env_var(name) {
        *field = value;
    }
}

/// Split `host:port` into its parts, defaulting to the IMAPS port.
pub fn split_host_port(server: &str) -> (String, u16) {
    if let Some((host, port)) = server.rsplit_once(':')
        && let Ok(port) = port.parse()
    {
        return (host.to_string(), port);
    }
    (server.to_string(), DEFAULT_IMAP_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "email": {
            "imapServer": "imap.qq.com:993",
            "username": "bot@qq.com",
            "password": "secret",
            "mailbox": "INBOX"
        },
        "webhook": {
            "weComUrl": "https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key=abc"
        },
        "llm": {
            "host": "https://api.example.com",
            "api": "/v1/chat/completions",
            "token": "sk-test",
            "model": "gpt-4o",
            "prompt": "Summarize: [CHAT-RECORD]"
        }
    }"#;

    #[test]
    fn parses_sample_file() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.email.imap_server, "imap.qq.com:993");
        assert_eq!(config.email.mailbox, "INBOX");
        assert_eq!(config.llm.model, "gpt-4o");
        assert!(config.webhook.url.starts_with("https://qyapi"));
    }

    #[test]
    fn smtp_defaults_apply_when_absent() {
        let config: Config = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(config.email.smtp_server, "smtp.qq.com");
        assert_eq!(config.email.smtp_port, 587);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.email.mailbox, "INBOX");
    }

    #[test]
    fn env_override_wins_over_file() {
        let mut config: Config = serde_json::from_str(SAMPLE).unwrap();
        // SAFETY: this test is the only place LLM_TOKEN is touched; no other
        // test reads it concurrently.
        unsafe { std::env::set_var("LLM_TOKEN", "sk-override") };
        config.apply_env_overrides();
        unsafe { std::env::remove_var("LLM_TOKEN") };
        assert_eq!(config.llm.token, "sk-override");
    }

    #[test]
    fn split_host_port_with_port() {
        assert_eq!(
            split_host_port("imap.qq.com:143"),
            ("imap.qq.com".to_string(), 143)
        );
    }

    #[test]
    fn split_host_port_defaults_to_imaps() {
        assert_eq!(
            split_host_port("imap.qq.com"),
            ("imap.qq.com".to_string(), DEFAULT_IMAP_PORT)
        );
    }
}
