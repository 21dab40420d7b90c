use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use scribe_core::config::ModelConfig;
use scribe_core::error::{Result, ScribeError};
use scribe_core::traits::GenerationWorker;
use scribe_core::types::{GenerationRequest, OutputFormat};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            http: Client::new(),
            config,
        }
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    r#type: &'static str,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request(config: &ModelConfig, request: &GenerationRequest) -> ChatRequest {
    // o-series models reject temperature
    let is_o_series = config.model_id.starts_with("o1")
        || config.model_id.starts_with("o3")
        || config.model_id.starts_with("o4");

    ChatRequest {
        model: config.model_id.clone(),
        messages: vec![
            OaiMessage {
                role: "system",
                content: request.system.clone(),
            },
            OaiMessage {
                role: "user",
                content: request.render_user(),
            },
        ],
        max_tokens: config.max_tokens,
        temperature: if is_o_series {
            None
        } else {
            Some(request.temperature)
        },
        response_format: match request.format {
            OutputFormat::Json => Some(ResponseFormat {
                r#type: "json_object",
            }),
            OutputFormat::Text => None,
        },
    }
}

fn parse_response(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ScribeError::GenerationParse(format!("invalid chat response: {}", e)))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ScribeError::GenerationParse("response contained no content".into()))
}

impl GenerationWorker for OpenAiClient {
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let base_url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let body = build_request(&self.config, &request);

            let mut req = self.http.post(base_url).json(&body);

            if let Some(api_key) = &self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }

            debug!(stage = %request.stage, model = %self.config.model_id, "Sending chat completion");

            let response = req
                .send()
                .await
                .map_err(|e| ScribeError::Generation(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
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
