//! Minutes generation: prompt template rendering plus the LLM request.
//!
//! The template is loaded once and must contain exactly one transcript
//! placeholder. Substitution is a literal string replacement, never format
//! interpolation, so nothing a speaker says can change the prompt structure.

mod openai;

pub use openai::OpenAiLlmProvider;

use crate::retry::{with_retry, Retryable, RetryConfig};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// The single placeholder the template must contain.
pub const TRANSCRIPT_PLACEHOLDER: &str = "{{TRANSCRIPT}}";

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Model returned empty minutes")]
    EmptyCompletion,

    #[error("Prompt template error: {0}")]
    Template(String),
}

impl Retryable for GenerateError {
    fn is_retryable(&self) -> bool {
        match self {
            GenerateError::Network(_) => true,
            // 429 and 5xx retry; 400/401/413 and friends never do.
            GenerateError::Api { status, .. } => {
                *status >= 500 || *status == 429 || *status == 408
            }
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerateError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Trait for LLM completion providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send one prompt, return the completion text.
    async fn complete(&self, prompt: &str) -> Result<String, GenerateError>;

    /// Get the model being used
    fn model(&self) -> &str;
}

/// Renders the minutes prompt and drives the LLM call with retries.
pub struct Generator {
    provider: Arc<dyn LlmProvider>,
    template: String,
    retry: RetryConfig,
}

impl Generator {
    /// Load the template and validate its placeholder. Called once at
    /// startup; a bad template aborts the service.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        template_path: &Path,
        max_retries: u32,
    ) -> Result<Self, GenerateError> {
        let template = std::fs::read_to_string(template_path).map_err(|e| {
            GenerateError::Template(format!(
                "failed to read {}: {}",
                template_path.display(),
                e
            ))
        })?;

        Self::with_template(provider, template, max_retries)
    }

    pub fn with_template(
        provider: Arc<dyn LlmProvider>,
        template: String,
        max_retries: u32,
    ) -> Result<Self, GenerateError> {
        let occurrences = template.matches(TRANSCRIPT_PLACEHOLDER).count();
        if occurrences != 1 {
            return Err(GenerateError::Template(format!(
                "template must contain exactly one {}, found {}",
                TRANSCRIPT_PLACEHOLDER, occurrences
            )));
        }

        Ok(Self {
            provider,
            template,
            retry: RetryConfig::with_max_retries(max_retries),
        })
    }

    /// Literal placeholder substitution; the transcript is never re-scanned.
    pub fn render_prompt(&self, transcript: &str) -> String {
        self.template.replacen(TRANSCRIPT_PLACEHOLDER, transcript, 1)
    }

    /// Produce minutes for a merged transcript.
    pub async fn generate(&self, transcript: &str) -> Result<String, GenerateError> {
        let prompt = self.render_prompt(transcript);

        log::info!(
            "Generator: requesting minutes from {} ({} prompt chars)",
            self.provider.model(),
            prompt.len()
        );

        let completion = with_retry(&self.retry, "LLM", || self.provider.complete(&prompt)).await?;

        let minutes = completion.trim();
        if minutes.is_empty() {
            return Err(GenerateError::EmptyCompletion);
        }

        Ok(minutes.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProvider {
        calls: AtomicU32,
        responses: Vec<Result<String, (u16, Option<u64>)>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, GenerateError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.responses.get(call.min(self.responses.len() - 1)).unwrap() {
                Ok(text) => Ok(text.clone()),
                Err((status, retry_after)) => Err(GenerateError::Api {
                    status: *status,
                    message: "scripted".to_string(),
                    retry_after: retry_after.map(Duration::from_millis),
                }),
            }
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn generator_with(responses: Vec<Result<String, (u16, Option<u64>)>>) -> Generator {
        Generator::with_template(
            Arc::new(ScriptedProvider {
                calls: AtomicU32::new(0),
                responses,
            }),
            format!("Summarize:\n{}\n", TRANSCRIPT_PLACEHOLDER),
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_template_requires_exactly_one_placeholder() {
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicU32::new(0),
            responses: vec![Ok("x".to_string())],
        });

        assert!(Generator::with_template(provider.clone(), "no placeholder".to_string(), 0).is_err());
        assert!(Generator::with_template(
            provider.clone(),
            format!("{} and {}", TRANSCRIPT_PLACEHOLDER, TRANSCRIPT_PLACEHOLDER),
            0
        )
        .is_err());
        assert!(
            Generator::with_template(provider, TRANSCRIPT_PLACEHOLDER.to_string(), 0).is_ok()
        );
    }

    #[test]
    fn test_render_is_literal_substitution() {
        let generator = generator_with(vec![Ok("ok".to_string())]);

        // A transcript containing the placeholder token must not recurse or
        // get re-interpreted; the token survives literally in the output.
        let hostile = format!("alice says {} loudly", TRANSCRIPT_PLACEHOLDER);
        let prompt = generator.render_prompt(&hostile);
        assert_eq!(
            prompt,
            format!("Summarize:\nalice says {} loudly\n", TRANSCRIPT_PLACEHOLDER)
        );

        // Braces and format-like fragments pass through untouched.
        let braces = "set {x} to {0:?} {{weird}}";
        assert!(generator.render_prompt(braces).contains(braces));
    }

    #[tokio::test]
    async fn test_rate_limit_then_success() {
        let generator = generator_with(vec![
            Err((429, Some(5))),
            Ok("## Summary\nshort".to_string()),
        ]);

        let minutes = generator.generate("[00:00] A: hi").await.unwrap();
        assert_eq!(minutes, "## Summary\nshort");
    }

    #[tokio::test]
    async fn test_client_errors_do_not_retry() {
        let generator = generator_with(vec![Err((400, None)), Ok("never".to_string())]);

        let err = generator.generate("[00:00] A: hi").await.unwrap_err();
        assert!(matches!(err, GenerateError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_payload_too_large_is_surfaced() {
        let generator = generator_with(vec![Err((413, None))]);

        let err = generator.generate("very long transcript").await.unwrap_err();
        assert!(matches!(err, GenerateError::Api { status: 413, .. }));
    }

    #[tokio::test]
    async fn test_empty_completion_is_an_error() {
        let generator = generator_with(vec![Ok("   \n".to_string())]);

        let err = generator.generate("[00:00] A: hi").await.unwrap_err();
        assert!(matches!(err, GenerateError::EmptyCompletion));
    }
}
