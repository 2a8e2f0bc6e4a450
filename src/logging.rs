//! Logger initialization and secret masking.
//!
//! Every rendered log record passes through the masker before it reaches the
//! sink, so the bot token, the LLM key and per-recording access keys never
//! end up in log files.

use crate::config::{ConfigError, LoggingConfig};
use std::io::Write;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Secrets shorter than this are not masked: replacing very short substrings
/// would mangle unrelated log text.
const MIN_SECRET_LEN: usize = 8;

static SECRETS: OnceLock<RwLock<Vec<String>>> = OnceLock::new();

fn registry() -> &'static RwLock<Vec<String>> {
    SECRETS.get_or_init(|| RwLock::new(Vec::new()))
}

/// Register a secret value to be redacted from all subsequent log output.
///
/// Called at startup for the bot token and LLM key, and at pipeline entry
/// for each recording's access key.
pub fn register_secret(secret: &str) {
    if secret.len() < MIN_SECRET_LEN {
        return;
    }
    if let Ok(mut secrets) = registry().write() {
        if !secrets.iter().any(|s| s == secret) {
            secrets.push(secret.to_string());
        }
    }
}

/// Replace every registered secret occurring in `text` with `***`.
pub fn mask(text: &str) -> String {
    let secrets = match registry().read() {
        Ok(guard) => guard,
        Err(_) => return text.to_string(),
    };

    let mut out = text.to_string();
    for secret in secrets.iter() {
        if out.contains(secret.as_str()) {
            out = out.replace(secret.as_str(), "***");
        }
    }
    out
}

/// Initialize the global logger from config, with an optional CLI override
/// for the level.
///
/// Rotation of `logging.file` (`max_bytes` / `backup_count`) is handled by
/// the deployment's log shipper, not in-process.
pub fn init(config: &LoggingConfig, cli_level: Option<&str>) -> Result<(), ConfigError> {
    let level_str = cli_level.unwrap_or(&config.level);
    let level = log::LevelFilter::from_str(level_str).map_err(|_| ConfigError::Invalid {
        key: "logging.level",
        reason: format!("unrecognized level {:?}", level_str),
    })?;

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        let message = mask(&record.args().to_string());
        writeln!(
            buf,
            "{} [{}] {}: {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            record.level(),
            record.target(),
            message
        )
    });

    if let Some(path) = &config.file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ConfigError::Io {
                path: path.clone(),
                source: e,
            })?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    // try_init so tests (and repeated service starts in-process) don't panic.
    let _ = builder.try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_secret_is_masked() {
        register_secret("super-secret-token-value");
        let masked = mask("posting with token super-secret-token-value done");
        assert_eq!(masked, "posting with token *** done");
    }

    #[test]
    fn test_short_values_are_not_registered() {
        register_secret("abc");
        assert_eq!(mask("abc is fine"), "abc is fine");
    }

    #[test]
    fn test_multiple_occurrences_masked() {
        register_secret("another-secret-key-123");
        let masked = mask("another-secret-key-123 and another-secret-key-123");
        assert_eq!(masked, "*** and ***");
    }
}
