use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use scribe_core::config::ModelConfig;
use scribe_core::error::{Result, ScribeError};
use scribe_core::traits::GenerationWorker;
use scribe_core::types::{GenerationRequest, OutputFormat};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: Client,
    config: ModelConfig,
}

impl AnthropicClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<ApiMessage>,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize, Debug)]
struct ResponseBlock {
    r#type: String,
    #[serde(default)]
    text: Option<String>,
}

fn build_request(config: &ModelConfig, request: &GenerationRequest) -> AnthropicRequest {
    // No JSON mode on this API; the instruction goes into the system prompt.
    let system = match request.format {
        OutputFormat::Json => format!(
            "{}\n\nRespond with a single JSON object and nothing else.",
            request.system
        ),
        OutputFormat::Text => request.system.clone(),
    };

    AnthropicRequest {
        model: config.model_id.clone(),
        max_tokens: config.max_tokens,
        temperature: request.temperature,
        system,
        messages: vec![ApiMessage {
            role: "user",
            content: request.render_user(),
        }],
    }
}

fn parse_response(body: &str) -> Result<String> {
    let parsed: AnthropicResponse = serde_json::from_str(body)
        .map_err(|e| ScribeError::GenerationParse(format!("invalid messages response: {}", e)))?;

    let text = parsed
        .content
        .into_iter()
        .filter(|b| b.r#type == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(ScribeError::GenerationParse(
            "response contained no text blocks".into(),
        ));
    }
    Ok(text)
}

impl GenerationWorker for AnthropicClient {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let api_key = self
                .config
                .api_key
                .as_deref()
                .ok_or_else(|| ScribeError::Config("Anthropic API key not set".into()))?;

            let base_url = self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
            let body = build_request(&self.config, &request);

            debug!(stage = %request.stage, model = %self.config.model_id, "Sending messages request");

            let response = self
                .http
                .post(base_url)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| ScribeError::Generation(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown error".to_string());
                return Err(ScribeError::Generation(format!("HTTP {}: {}", status, body)));
            }

            let text = response
                .text()
                .await
                .map_err(|e| ScribeError::Generation(e.to_string()))?;

            parse_response(&text)
        })
    }
}
