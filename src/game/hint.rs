//! Hint Text
//!
//! Optional flavour text after a wrong guess, produced by an external text
//! generator. Strictly best effort: errors and timeouts become "no hint".

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Hint provider errors.
#[derive(Debug, Error)]
pub enum HintError {
    /// Provider not configured or offline.
    #[error("hint provider unavailable: {0}")]
    Unavailable(String),
    /// Provider answered with something unusable.
    #[error("malformed hint response: {0}")]
    Malformed(String),
    /// Network or process failure talking to the provider.
    #[error("hint transport error: {0}")]
    Transport(String),
}

/// External hint generator.
#[async_trait]
pub trait HintProvider: Send + Sync {
    /// One short, non-spoiling hint for a scramble. May be empty.
    async fn hint(&self, scrambled: &str, attempts_left: u8) -> Result<String, HintError>;
}

/// Provider that never hints.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHints;

#[async_trait]
impl HintProvider for NoHints {
    async fn hint(&self, _scrambled: &str, _attempts_left: u8) -> Result<String, HintError> {
        Ok(String::new())
    }
}

/// Provider filling `{scramble}` and `{attempts}` into a fixed template.
#[derive(Debug, Clone)]
pub struct TemplateHints {
    template: String,
}

impl TemplateHints {
    /// Create from a template.
    pub fn new(template: impl Into<String>) -> Self {
        Self { template: template.into() }
    }
}

#[async_trait]
impl HintProvider for TemplateHints {
    async fn hint(&self, scrambled: &str, attempts_left: u8) -> Result<String, HintError> {
        Ok(self
            .template
            .replace("{scramble}", scrambled)
            .replace("{attempts}", &attempts_left.to_string()))
    }
}

/// Ask a provider for a hint, bounded by `timeout`.
///
/// Returns `None` for empty answers, errors and timeouts.
pub async fn fetch_hint(
    provider: &dyn HintProvider,
    scrambled: &str,
    attempts_left: u8,
    timeout: Duration,
) -> Option<String> {
    match tokio::time::timeout(timeout, provider.hint(scrambled, attempts_left)).await {
        Ok(Ok(text)) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        }
        Ok(Err(e)) => {
            debug!("Hint unavailable: {}", e);
            None
        }
        Err(_) => {
            warn!("Hint provider timed out after {:?}", timeout);
            None
        }
    }
}
