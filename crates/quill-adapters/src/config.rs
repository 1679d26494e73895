//! Configuration management for quill
//!
//! Stores settings in ~/.config/quill/config.json

use anyhow::{anyhow, bail, Context, Result};
use quill_engine::continuation::ContinuationSettings;
use quill_engine::llm::models::{DEFAULT_CONTEXT_WINDOW_TOKENS, DEFAULT_MODEL};
use quill_engine::llm::{ClientSettings, RetryPolicy, DEFAULT_BASE_URL};
use quill_engine::session::DEFAULT_CONTEXT_CHAR_BUDGET;
use quill_engine::sync::DEFAULT_WRITE_THRESHOLD_CHARS;
use quill_engine::{EngineSettings, SyncSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MAX_CONTINUATION_ROUNDS: u32 = 16;

/// Keys accepted by `get`/`set`.
pub const KEYS: &[&str] = &[
    "api_key",
    "base_url",
    "model",
    "context_window_tokens",
    "max_output_tokens",
    "min_output_tokens",
    "temperature",
    "max_continuation_rounds",
    "stream_write_threshold_chars",
    "request_timeout_secs",
    "context_char_budget",
    "streaming",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub context_window_tokens: u32,
    pub max_output_tokens: u32,
    pub min_output_tokens: u32,
    pub temperature: f32,
    pub max_continuation_rounds: u32,
    pub stream_write_threshold_chars: usize,
    pub request_timeout_secs: u64,
    pub context_char_budget: usize,
    pub streaming: bool,
}

impl Default for Config {
    fn default() -> Self {
        let continuation = ContinuationSettings::default();
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            context_window_tokens: DEFAULT_CONTEXT_WINDOW_TOKENS,
            max_output_tokens: continuation.max_output_tokens,
            min_output_tokens: continuation.min_output_tokens,
            temperature: continuation.temperature,
            max_continuation_rounds: continuation.max_rounds,
            stream_write_threshold_chars: DEFAULT_WRITE_THRESHOLD_CHARS,
            request_timeout_secs: 30,
            context_char_budget: DEFAULT_CONTEXT_CHAR_BUDGET,
            streaming: true,
        }
    }
}

impl Config {
    fn sanitize(&mut self) {
        let defaults = Config::default();
        if self.base_url.trim().is_empty() {
            self.base_url = defaults.base_url;
        }
        if self.model.trim().is_empty() {
            self.model = defaults.model;
        }
        if self.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            self.api_key = None;
        }
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.max_continuation_rounds = self.max_continuation_rounds.clamp(1, MAX_CONTINUATION_ROUNDS);
        self.min_output_tokens = self.min_output_tokens.max(1);
        if self.max_output_tokens < self.min_output_tokens {
            self.max_output_tokens = self.min_output_tokens;
        }
        if self.context_window_tokens == 0 {
            self.context_window_tokens = defaults.context_window_tokens;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = defaults.request_timeout_secs;
        }
        self.stream_write_threshold_chars = self.stream_write_threshold_chars.max(1);
    }

    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("quill"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from `path`. A file that fails to parse is moved aside to
    /// `config.json.corrupt` and defaults are returned.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str::<Config>(&content) {
            Ok(mut config) => {
                config.sanitize();
                config
            }
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let mut sanitized = self.clone();
        sanitized.sanitize();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    tracing::debug!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content =
            serde_json::to_string_pretty(&sanitized).context("Failed to serialize config")?;
        write_config_atomic(path, &content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Apply `QUILL_*` environment overrides.
    pub fn with_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty("QUILL_API_KEY")
            .or_else(|| non_empty("OPENROUTER_API_KEY"))
            .or_else(|| non_empty("OPENAI_API_KEY"))
        {
            self.api_key = Some(key);
        }
        if let Some(url) = non_empty("QUILL_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = non_empty("QUILL_MODEL") {
            self.model = model;
        }
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Value of `key` for display. The API key is masked.
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "api_key" => self.api_key.as_deref().map(mask_secret).unwrap_or_default(),
            "base_url" => self.base_url.clone(),
            "model" => self.model.clone(),
            "context_window_tokens" => self.context_window_tokens.to_string(),
            "max_output_tokens" => self.max_output_tokens.to_string(),
            "min_output_tokens" => self.min_output_tokens.to_string(),
            "temperature" => self.temperature.to_string(),
            "max_continuation_rounds" => self.max_continuation_rounds.to_string(),
            "stream_write_threshold_chars" => self.stream_write_threshold_chars.to_string(),
            "request_timeout_secs" => self.request_timeout_secs.to_string(),
            "context_char_budget" => self.context_char_budget.to_string(),
            "streaming" => self.streaming.to_string(),
            _ => return None,
        };
        Some(value)
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "api_key" => self.api_key = Some(value.to_string()).filter(|v| !v.is_empty()),
            "base_url" => {
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    bail!("base_url must start with http:// or https://");
                }
                self.base_url = value.to_string();
            }
            "model" => {
                if value.is_empty() {
                    bail!("model cannot be empty");
                }
                self.model = value.to_string();
            }
            "context_window_tokens" => self.context_window_tokens = parse(key, value)?,
            "max_output_tokens" => self.max_output_tokens = parse(key, value)?,
            "min_output_tokens" => self.min_output_tokens = parse(key, value)?,
            "temperature" => self.temperature = parse(key, value)?,
            "max_continuation_rounds" => self.max_continuation_rounds = parse(key, value)?,
            "stream_write_threshold_chars" => {
                self.stream_write_threshold_chars = parse(key, value)?
            }
            "request_timeout_secs" => self.request_timeout_secs = parse(key, value)?,
            "context_char_budget" => self.context_char_budget = parse(key, value)?,
            "streaming" => self.streaming = parse(key, value)?,
            _ => bail!("Unknown config key '{}'. Known keys: {}", key, KEYS.join(", ")),
        }
        self.sanitize();
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryPolicy::default(),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            continuation: ContinuationSettings {
                max_rounds: self.max_continuation_rounds,
                max_output_tokens: self.max_output_tokens,
                min_output_tokens: self.min_output_tokens,
                context_window_tokens: self.context_window_tokens,
                temperature: self.temperature,
                ..ContinuationSettings::default()
            },
            sync: SyncSettings {
                write_threshold_chars: self.stream_write_threshold_chars,
                ..SyncSettings::default()
            },
            context_char_budget: self.context_char_budget,
            streaming: self.streaming,
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/quill/config.json".to_string())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid value '{}' for {}", value, key))
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    use std::fs::OpenOptions;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
            tracing::debug!(error = %e, "failed to set temp config file permissions");
        }
    }

    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
