//! Configuration loading and validation for Prism.
//!
//! A single immutable [`AppConfig`] is built once at startup from
//! environment variables and never mutated afterwards. `DB_URL=memory`
//! selects the in-process document store.

use serde::{Deserialize, Serialize};

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Verbose diagnostics (`DEBUG`)
    pub debug: bool,

    /// Bind host (`HOST`)
    pub host: String,

    /// Bind port (`PORT`)
    pub port: u16,

    pub database: DatabaseConfig,

    pub llm: LlmConfig,

    pub dialogue: DialogueConfig,

    pub log: LogConfig,

    /// Allowed CORS origins (`CORS_ORIGINS`, comma-separated, `*` = any)
    pub cors_origins: Vec<String>,

    pub media: MediaConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `memory` selects the in-process store
    pub url: String,
    pub user: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// One of `mock`, `openai`, `azure` (`LLM_PROVIDER`)
    pub provider: String,
    pub api_key: String,
    pub api_url: String,
    pub model: String,
}

/// Pipeline and lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Context character budget (`MAX_CONTEXT_LENGTH`)
    pub max_context_length: usize,
    /// Turn response window (`RESPONSE_WINDOW_HOURS`)
    pub response_window_hours: f64,
    /// Session idle threshold (`SESSION_TIMEOUT_HOURS`)
    pub session_timeout_hours: f64,
    /// End-to-end pipeline deadline (`PIPELINE_DEADLINE_SECS`)
    pub pipeline_deadline_secs: u64,
    /// Tool loop bound (`MAX_TOOL_ROUNDS`)
    pub max_tool_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `LOG_LEVEL` — feeds the tracing env filter
    pub level: String,
    /// `LOG_FILE` — empty means stderr only
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Upload cap in megabytes (`MEDIA_MAX_UPLOAD_MB`)
    pub max_upload_mb: usize,
}

fn redact(s: &str) -> &'static str {
    if s.is_empty() { "\"\"" } else { "[REDACTED]" }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("debug", &self.debug)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("llm", &self.llm)
            .field("dialogue", &self.dialogue)
            .field("log", &self.log)
            .field("cors_origins", &self.cors_origins)
            .field("media", &self.media)
            .finish()
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .finish()
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            host: "0.0.0.0".into(),
            port: 8000,
            database: DatabaseConfig {
                url: "memory".into(),
                user: String::new(),
                password: String::new(),
                namespace: "prism".into(),
                database: "dialogue".into(),
            },
            llm: LlmConfig {
                provider: "mock".into(),
                api_key: String::new(),
                api_url: String::new(),
                model: "gpt-4o-mini".into(),
            },
            dialogue: DialogueConfig {
                max_context_length: 4000,
                response_window_hours: 3.0,
                session_timeout_hours: 1.0,
                pipeline_deadline_secs: 120,
                max_tool_rounds: 4,
            },
            log: LogConfig {
                level: "info".into(),
                file: String::new(),
            },
            cors_origins: vec!["*".into()],
            media: MediaConfig { max_upload_mb: 10 },
        }
    }
}

impl AppConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary lookup — the testable seam behind
    /// [`AppConfig::from_env`].
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("DEBUG") {
            config.debug = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Some(v) = lookup("HOST") {
            config.host = v;
        }
        parse_into(&lookup, "PORT", &mut config.port)?;

        if let Some(v) = lookup("DB_URL") {
            config.database.url = v;
        }
        if let Some(v) = lookup("DB_USER") {
            config.database.user = v;
        }
        if let Some(v) = lookup("DB_PASSWORD") {
            config.database.password = v;
        }
        if let Some(v) = lookup("DB_NAMESPACE") {
            config.database.namespace = v;
        }
        if let Some(v) = lookup("DB_DATABASE") {
            config.database.database = v;
        }

        if let Some(v) = lookup("LLM_PROVIDER") {
            config.llm.provider = v;
        }
        if let Some(v) = lookup("LLM_API_KEY") {
            config.llm.api_key = v;
        }
        if let Some(v) = lookup("LLM_API_URL") {
            config.llm.api_url = v;
        }
        if let Some(v) = lookup("LLM_MODEL") {
            config.llm.model = v;
        }

        parse_into(&lookup, "MAX_CONTEXT_LENGTH", &mut config.dialogue.max_context_length)?;
        parse_into(&lookup, "RESPONSE_WINDOW_HOURS", &mut config.dialogue.response_window_hours)?;
        parse_into(&lookup, "SESSION_TIMEOUT_HOURS", &mut config.dialogue.session_timeout_hours)?;
        parse_into(&lookup, "PIPELINE_DEADLINE_SECS", &mut config.dialogue.pipeline_deadline_secs)?;
        parse_into(&lookup, "MAX_TOOL_ROUNDS", &mut config.dialogue.max_tool_rounds)?;
        parse_into(&lookup, "MEDIA_MAX_UPLOAD_MB", &mut config.media.max_upload_mb)?;

        if let Some(v) = lookup("LOG_LEVEL") {
            config.log.level = v;
        }
        if let Some(v) = lookup("LOG_FILE") {
            config.log.file = v;
        }
        if let Some(v) = lookup("CORS_ORIGINS") {
            config.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Whether the in-process store is selected.
    pub fn memory_store(&self) -> bool {
        self.database.url == "memory"
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dialogue.max_context_length < 200 {
            return Err(ConfigError::Validation(
                "MAX_CONTEXT_LENGTH must be at least 200".into(),
            ));
        }
        if self.dialogue.response_window_hours <= 0.0 {
            return Err(ConfigError::Validation(
                "RESPONSE_WINDOW_HOURS must be positive".into(),
            ));
        }
        if self.dialogue.session_timeout_hours <= 0.0 {
            return Err(ConfigError::Validation(
                "SESSION_TIMEOUT_HOURS must be positive".into(),
            ));
        }
        if self.dialogue.max_tool_rounds == 0 {
            return Err(ConfigError::Validation(
                "MAX_TOOL_ROUNDS must be at least 1".into(),
            ));
        }
        match self.llm.provider.as_str() {
            "mock" | "openai" | "azure" => Ok(()),
            other => Err(ConfigError::Validation(format!(
                "LLM_PROVIDER must be mock, openai, or azure (got '{other}')"
            ))),
        }
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(key) {
        *target = raw.parse().map_err(|_| ConfigError::Parse {
            key,
            value: raw.clone(),
        })?;
    }
    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse {key}='{value}'")]
    Parse { key: &'static str, value: String },

    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_map(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_are_valid() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.llm.provider, "mock");
        assert!(config.memory_store());
        assert_eq!(config.dialogue.max_context_length, 4000);
        assert_eq!(config.dialogue.response_window_hours, 3.0);
    }

    #[test]
    fn env_overrides_apply() {
        let config = from_map(&[
            ("PORT", "9001"),
            ("LLM_PROVIDER", "openai"),
            ("LLM_API_KEY", "sk-test"),
            ("RESPONSE_WINDOW_HOURS", "0.5"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
        ])
        .unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.dialogue.response_window_hours, 0.5);
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn bad_number_is_a_parse_error() {
        let err = from_map(&[("PORT", "not-a-port")]).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { key: "PORT", .. }));
    }

    #[test]
    fn unknown_provider_rejected() {
        let err = from_map(&[("LLM_PROVIDER", "quantum")]).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn zero_window_rejected() {
        let err = from_map(&[("RESPONSE_WINDOW_HOURS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let config = from_map(&[("LLM_API_KEY", "sk-secret"), ("DB_PASSWORD", "hunter2")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }
}
