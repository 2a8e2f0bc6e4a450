//! Service configuration.
//!
//! Settings come from a YAML document, with environment overrides named
//! `SECTION_KEY` (e.g. `CHAT_WATCH_CHANNEL_ID`). The two secrets (bot token,
//! LLM key) are deliberately *not* config keys: they are read from the
//! environment only, after `main` has loaded the env file.
//!
//! Validation runs at load time; anything invalid aborts startup with a
//! message naming the offending `section.key`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable holding the chat bot token.
pub const BOT_TOKEN_ENV: &str = "BOT_TOKEN";
/// Environment variable holding the LLM API key.
pub const LLM_API_KEY_ENV: &str = "LLM_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Invalid environment override {key}: {reason}")]
    EnvOverride { key: String, reason: String },

    #[error("Missing required environment secret {0}")]
    MissingSecret(&'static str),
}

/// Top-level immutable configuration. Loaded once at startup.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub merger: MergerConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatConfig {
    /// Channel the recording bot's status panel lives in.
    #[serde(default)]
    pub watch_channel_id: u64,
    /// Channel minutes, status and error messages are published to.
    #[serde(default)]
    pub output_channel_id: u64,
    /// Role mentioned in error embeds, if set.
    #[serde(default)]
    pub error_mention_role_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    /// User id of the recording bot whose panel edits we watch.
    #[serde(default)]
    pub bot_id: u64,
    /// Hosts accepted in panel recording URLs.
    #[serde(default)]
    pub domain_allowlist: Vec<String>,
    /// Audio format requested from the cook endpoint.
    #[serde(default = "default_source_format")]
    pub format: String,
    /// Container requested from the cook endpoint.
    #[serde(default = "default_source_container")]
    pub container: String,
    /// Combined cook+download deadline in seconds.
    #[serde(default = "default_download_timeout_sec")]
    pub download_timeout_sec: u64,
    /// Archive request retry count.
    #[serde(default = "default_source_max_retries")]
    pub max_retries: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bot_id: 0,
            domain_allowlist: Vec::new(),
            format: default_source_format(),
            container: default_source_container(),
            download_timeout_sec: default_download_timeout_sec(),
            max_retries: default_source_max_retries(),
        }
    }
}

impl SourceConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_sec)
    }
}

fn default_source_format() -> String {
    // Lossy, low bitrate: plenty for speech recognition, cheap to cook.
    "aac".to_string()
}

fn default_source_container() -> String {
    "zip".to_string()
}

fn default_download_timeout_sec() -> u64 {
    300
}

fn default_source_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecognizerConfig {
    /// Path to the recognition model file.
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_recognizer_language")]
    pub language: String,
    /// "auto", "cuda" or "cpu".
    #[serde(default = "default_recognizer_device")]
    pub device: String,
    /// Requested inference precision. whisper.cpp fixes precision at build
    /// time, so this is recorded and logged rather than applied.
    #[serde(default = "default_recognizer_compute_type")]
    pub compute_type: String,
    #[serde(default = "default_recognizer_beam_size")]
    pub beam_size: u32,
    /// Drop non-speech artifacts from recognizer output.
    #[serde(default = "default_recognizer_vad_filter")]
    pub vad_filter: bool,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            language: default_recognizer_language(),
            device: default_recognizer_device(),
            compute_type: default_recognizer_compute_type(),
            beam_size: default_recognizer_beam_size(),
            vad_filter: default_recognizer_vad_filter(),
        }
    }
}

fn default_recognizer_language() -> String {
    "en".to_string()
}

fn default_recognizer_device() -> String {
    "auto".to_string()
}

fn default_recognizer_compute_type() -> String {
    "default".to_string()
}

fn default_recognizer_beam_size() -> u32 {
    5
}

fn default_recognizer_vad_filter() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergerConfig {
    /// Same-speaker segments closer than this (seconds) are coalesced.
    /// `0` disables coalescing.
    #[serde(default = "default_gap_merge_threshold_sec")]
    pub gap_merge_threshold_sec: f64,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            gap_merge_threshold_sec: default_gap_merge_threshold_sec(),
        }
    }
}

fn default_gap_merge_threshold_sec() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneratorConfig {
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_generator_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generator_temperature")]
    pub temperature: f32,
    #[serde(default = "default_prompt_template_path")]
    pub prompt_template_path: PathBuf,
    #[serde(default = "default_generator_max_retries")]
    pub max_retries: u32,
    /// Override for the chat-completions endpoint base URL.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: default_generator_model(),
            max_tokens: default_generator_max_tokens(),
            temperature: default_generator_temperature(),
            prompt_template_path: default_prompt_template_path(),
            max_retries: default_generator_max_retries(),
            api_base: None,
        }
    }
}

fn default_generator_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_generator_max_tokens() -> u32 {
    1500
}

fn default_generator_temperature() -> f32 {
    0.3
}

fn default_prompt_template_path() -> PathBuf {
    PathBuf::from("prompts/minutes.md")
}

fn default_generator_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    /// Color of the final minutes embed.
    #[serde(default = "default_embed_color")]
    pub embed_color: u32,
    /// Platform limit for the embed description.
    #[serde(default = "default_max_embed_length")]
    pub max_embed_length: usize,
    /// Also attach the raw merged transcript to the final post.
    #[serde(default)]
    pub include_transcript: bool,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            embed_color: default_embed_color(),
            max_embed_length: default_max_embed_length(),
            include_transcript: false,
        }
    }
}

fn default_embed_color() -> u32 {
    0x5865F2
}

fn default_max_embed_length() -> usize {
    4096
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriveConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub folder_id: String,
    #[serde(default = "default_poll_interval_sec")]
    pub poll_interval_sec: u64,
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// Filename pattern for recording archives in the folder.
    #[serde(default = "default_drive_name_glob")]
    pub name_glob: String,
    /// Where the processed-file set is persisted.
    #[serde(default = "default_drive_state_file")]
    pub state_file: PathBuf,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder_id: String::new(),
            poll_interval_sec: default_poll_interval_sec(),
            credentials_file: None,
            name_glob: default_drive_name_glob(),
            state_file: default_drive_state_file(),
        }
    }
}

impl DriveConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_sec)
    }
}

fn default_poll_interval_sec() -> u64 {
    30
}

fn default_drive_name_glob() -> String {
    "*.zip".to_string()
}

fn default_drive_state_file() -> PathBuf {
    PathBuf::from("processed_files.json")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log to this file instead of stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Rotation knobs consumed by the deployment's log shipper.
    #[serde(default = "default_log_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_log_backup_count")]
    pub backup_count: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            max_bytes: default_log_max_bytes(),
            backup_count: default_log_backup_count(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_log_backup_count() -> u32 {
    5
}

/// Secrets sourced exclusively from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub bot_token: String,
    pub llm_api_key: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var(BOT_TOKEN_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingSecret(BOT_TOKEN_ENV))?;
        let llm_api_key = std::env::var(LLM_API_KEY_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingSecret(LLM_API_KEY_ENV))?;
        Ok(Self {
            bot_token,
            llm_api_key,
        })
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print secret material, even at debug level.
        f.debug_struct("Secrets")
            .field("bot_token", &"***")
            .field("llm_api_key", &"***")
            .finish()
    }
}

impl Config {
    /// Load, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: Config = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SECTION_KEY` environment overrides on top of the file values.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_parsed(&mut self.chat.watch_channel_id, "CHAT_WATCH_CHANNEL_ID")?;
        override_parsed(&mut self.chat.output_channel_id, "CHAT_OUTPUT_CHANNEL_ID")?;
        override_parsed_opt(
            &mut self.chat.error_mention_role_id,
            "CHAT_ERROR_MENTION_ROLE_ID",
        )?;

        override_parsed(&mut self.source.bot_id, "SOURCE_BOT_ID")?;
        override_list(&mut self.source.domain_allowlist, "SOURCE_DOMAIN_ALLOWLIST");
        override_string(&mut self.source.format, "SOURCE_FORMAT");
        override_string(&mut self.source.container, "SOURCE_CONTAINER");
        override_parsed(
            &mut self.source.download_timeout_sec,
            "SOURCE_DOWNLOAD_TIMEOUT_SEC",
        )?;
        override_parsed(&mut self.source.max_retries, "SOURCE_MAX_RETRIES")?;

        override_string(&mut self.recognizer.model, "RECOGNIZER_MODEL");
        override_string(&mut self.recognizer.language, "RECOGNIZER_LANGUAGE");
        override_string(&mut self.recognizer.device, "RECOGNIZER_DEVICE");
        override_string(&mut self.recognizer.compute_type, "RECOGNIZER_COMPUTE_TYPE");
        override_parsed(&mut self.recognizer.beam_size, "RECOGNIZER_BEAM_SIZE")?;
        override_parsed(&mut self.recognizer.vad_filter, "RECOGNIZER_VAD_FILTER")?;

        override_parsed(
            &mut self.merger.gap_merge_threshold_sec,
            "MERGER_GAP_MERGE_THRESHOLD_SEC",
        )?;

        override_string(&mut self.generator.model, "GENERATOR_MODEL");
        override_parsed(&mut self.generator.max_tokens, "GENERATOR_MAX_TOKENS")?;
        override_parsed(&mut self.generator.temperature, "GENERATOR_TEMPERATURE")?;
        override_path(
            &mut self.generator.prompt_template_path,
            "GENERATOR_PROMPT_TEMPLATE_PATH",
        );
        override_parsed(&mut self.generator.max_retries, "GENERATOR_MAX_RETRIES")?;

        override_parsed(&mut self.publisher.embed_color, "PUBLISHER_EMBED_COLOR")?;
        override_parsed(
            &mut self.publisher.max_embed_length,
            "PUBLISHER_MAX_EMBED_LENGTH",
        )?;
        override_parsed(
            &mut self.publisher.include_transcript,
            "PUBLISHER_INCLUDE_TRANSCRIPT",
        )?;

        override_parsed(&mut self.drive.enabled, "DRIVE_ENABLED")?;
        override_string(&mut self.drive.folder_id, "DRIVE_FOLDER_ID");
        override_parsed(&mut self.drive.poll_interval_sec, "DRIVE_POLL_INTERVAL_SEC")?;
        override_path_opt(&mut self.drive.credentials_file, "DRIVE_CREDENTIALS_FILE");
        override_string(&mut self.drive.name_glob, "DRIVE_NAME_GLOB");
        override_path(&mut self.drive.state_file, "DRIVE_STATE_FILE");

        override_string(&mut self.logging.level, "LOGGING_LEVEL");
        override_path_opt(&mut self.logging.file, "LOGGING_FILE");
        override_parsed(&mut self.logging.max_bytes, "LOGGING_MAX_BYTES")?;
        override_parsed(&mut self.logging.backup_count, "LOGGING_BACKUP_COUNT")?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chat.watch_channel_id == 0 {
            return Err(invalid("chat.watch_channel_id", "must be a non-zero channel id"));
        }
        if self.chat.output_channel_id == 0 {
            return Err(invalid("chat.output_channel_id", "must be a non-zero channel id"));
        }
        if self.source.bot_id == 0 {
            return Err(invalid("source.bot_id", "must be a non-zero user id"));
        }
        if self.source.domain_allowlist.is_empty() {
            return Err(invalid(
                "source.domain_allowlist",
                "must list at least one accepted host",
            ));
        }
        if self.source.download_timeout_sec == 0 {
            return Err(invalid("source.download_timeout_sec", "must be positive"));
        }
        if self.source.format.is_empty() {
            return Err(invalid("source.format", "must not be empty"));
        }
        if self.source.container.is_empty() {
            return Err(invalid("source.container", "must not be empty"));
        }

        if !matches!(self.recognizer.device.as_str(), "auto" | "cuda" | "cpu") {
            return Err(invalid(
                "recognizer.device",
                "must be one of: auto, cuda, cpu",
            ));
        }
        if self.recognizer.beam_size == 0 {
            return Err(invalid("recognizer.beam_size", "must be positive"));
        }

        if !(self.merger.gap_merge_threshold_sec.is_finite()
            && self.merger.gap_merge_threshold_sec >= 0.0)
        {
            return Err(invalid(
                "merger.gap_merge_threshold_sec",
                "must be a non-negative number",
            ));
        }

        if self.generator.model.is_empty() {
            return Err(invalid("generator.model", "must not be empty"));
        }
        if self.generator.max_tokens == 0 {
            return Err(invalid("generator.max_tokens", "must be positive"));
        }
        if !(0.0..=2.0).contains(&self.generator.temperature) {
            return Err(invalid(
                "generator.temperature",
                "must be between 0.0 and 2.0",
            ));
        }

        if self.publisher.max_embed_length == 0 {
            return Err(invalid("publisher.max_embed_length", "must be positive"));
        }

        if self.drive.enabled {
            if self.drive.folder_id.is_empty() {
                return Err(invalid(
                    "drive.folder_id",
                    "required when the drive watcher is enabled",
                ));
            }
            if self.drive.poll_interval_sec == 0 {
                return Err(invalid("drive.poll_interval_sec", "must be positive"));
            }
            if self.drive.credentials_file.is_none() {
                return Err(invalid(
                    "drive.credentials_file",
                    "required when the drive watcher is enabled",
                ));
            }
            if glob::Pattern::new(&self.drive.name_glob).is_err() {
                return Err(invalid("drive.name_glob", "not a valid glob pattern"));
            }
        }

        if log::LevelFilter::from_str(&self.logging.level).is_err() {
            return Err(invalid(
                "logging.level",
                "must be one of: off, error, warn, info, debug, trace",
            ));
        }
        if self.logging.max_bytes == 0 {
            return Err(invalid("logging.max_bytes", "must be positive"));
        }

        Ok(())
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_string(),
    }
}

fn override_parsed<T: FromStr>(field: &mut T, key: &str) -> Result<(), ConfigError>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(key) {
        *field = raw.parse().map_err(|e: T::Err| ConfigError::EnvOverride {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn override_parsed_opt<T: FromStr>(field: &mut Option<T>, key: &str) -> Result<(), ConfigError>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(key) {
        *field = Some(raw.parse().map_err(|e: T::Err| ConfigError::EnvOverride {
            key: key.to_string(),
            reason: e.to_string(),
        })?);
    }
    Ok(())
}

fn override_string(field: &mut String, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        *field = raw;
    }
}

fn override_path(field: &mut PathBuf, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        *field = PathBuf::from(raw);
    }
}

fn override_path_opt(field: &mut Option<PathBuf>, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        *field = Some(PathBuf::from(raw));
    }
}

fn override_list(field: &mut Vec<String>, key: &str) {
    if let Ok(raw) = std::env::var(key) {
        *field = raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
