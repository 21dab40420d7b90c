pub mod providers;
pub mod retry;

use scribe_core::config::ModelConfig;
use scribe_core::error::{Result, ScribeError};
use scribe_core::traits::GenerationWorker;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingWorker;

/// Provider names served by the OpenAI-compatible client.
const OPENAI_COMPATIBLE: &[&str] = &["openai", "openai-compatible", "ollama", "openrouter", "groq"];

/// Create a generation worker based on the provider name, wrapped in retry when configured.
pub fn create_worker(config: &ModelConfig) -> Result<Box<dyn GenerationWorker>> {
    let provider = config.provider.to_ascii_lowercase();
    let client: Box<dyn GenerationWorker> = match provider.as_str() {
        "anthropic" | "claude" => Box::new(AnthropicClient::new(config.clone())),
        p if OPENAI_COMPATIBLE.contains(&p) => Box::new(OpenAiClient::new(config.clone())),
        _ => return Err(ScribeError::UnsupportedProvider(config.provider.clone())),
    };

    Ok(match &config.retry {
        Some(retry) => Box::new(RetryingWorker::new(client, retry.clone())),
        None => client,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str) -> ModelConfig {
        ModelConfig {
            provider: provider.to_string(),
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_known_providers() {
        for provider in ["openai", "Anthropic", "claude", "ollama", "groq"] {
            assert!(create_worker(&model(provider)).is_ok(), "{}", provider);
        }
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let err = create_worker(&model("antrhopic")).err().unwrap();
        assert!(matches!(err, ScribeError::UnsupportedProvider(ref p) if p == "antrhopic"));
    }
}
