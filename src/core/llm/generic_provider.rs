use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::registry::{ApiFormat, AuthType, ProviderDef};
use super::{ChatMessage, LlmProvider, SamplingParams};

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

#[derive(Serialize, Deserialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

// ── Gemini request/response ──

#[derive(Serialize)]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "topP")]
    top_p: f32,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    text: String,
}

// ── Generic Provider ──

pub struct GenericProvider {
    provider_def: ProviderDef,
    api_key: String,
    client: Client,
}

impl GenericProvider {
    pub fn new(provider_def: ProviderDef, api_key: String) -> Self {
        Self {
            provider_def,
            api_key,
            client: Client::new(),
        }
    }

    fn url_for(&self, model_id: &str) -> String {
        let base = self.provider_def.base_url.replace("{model}", model_id);
        match self.provider_def.auth.auth_type {
            AuthType::QueryParam => {
                let param_name = self
                    .provider_def
                    .auth
                    .param_name
                    .as_deref()
                    .unwrap_or("key");
                let sep = if base.contains('?') { '&' } else { '?' };
                format!("{}{}{}={}", base, sep, param_name, self.api_key)
            }
            AuthType::Bearer | AuthType::Header => base,
        }
    }

    fn authorize(&self, mut request: RequestBuilder) -> RequestBuilder {
        request = match self.provider_def.auth.auth_type {
            AuthType::Bearer => request.header("Authorization", format!("Bearer {}", self.api_key)),
            AuthType::Header => {
                let header = self
                    .provider_def
                    .auth
                    .header_name
                    .as_deref()
                    .unwrap_or("Authorization");
                request.header(header, &self.api_key)
            }
            AuthType::QueryParam => request,
        };
        for (k, v) in &self.provider_def.extra_headers {
            request = request.header(k, v);
        }
        request
    }

    async fn generate_openai(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<String> {
        let req = OpenAiRequest {
            model: model_id,
            messages: messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
        };

        let request = self.authorize(self.client.post(self.url_for(model_id)).json(&req));
        let res = request.send().await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "{} API Error ({}): {}",
                self.provider_def.name,
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: OpenAiResponse = res.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("{} returned no message content", self.provider_def.name))
    }

    async fn generate_gemini(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<String> {
        let mut contents: Vec<GeminiContent> = Vec::new();
        let mut system_lines: Vec<&str> = Vec::new();

        for m in messages {
            if m.role == "system" {
                system_lines.push(&m.content);
                continue;
            }
            let gemini_role = if m.role == "assistant" { "model" } else { "user" };

            // Gemini requires strictly alternating roles. Merge consecutive same-role entries.
            if let Some(last) = contents.last_mut()
                && last.role == gemini_role
                && let Some(part) = last.parts.first_mut()
            {
                part.text.push('\n');
                part.text.push_str(&m.content);
            } else {
                contents.push(GeminiContent {
                    role: gemini_role.to_string(),
                    parts: vec![GeminiPart {
                        text: m.content.clone(),
                    }],
                });
            }
        }

        let req = GeminiRequest {
            system_instruction: (!system_lines.is_empty()).then(|| GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: system_lines.join("\n"),
                }],
            }),
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: params.temperature,
                max_output_tokens: params.max_tokens,
                top_p: params.top_p,
            },
        };

        let request = self.authorize(self.client.post(self.url_for(model_id)).json(&req));
        let res = request.send().await?;
        if !res.status().is_success() {
            return Err(anyhow!(
                "{} API Error ({}): {}",
                self.provider_def.name,
                res.status(),
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: GeminiResponse = res.json().await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| anyhow!("{} returned no candidates", self.provider_def.name))
    }
}

#[async_trait]
impl LlmProvider for GenericProvider {
    fn provider_id(&self) -> &str {
        &self.provider_def.id
    }

    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<String> {
        match self.provider_def.api_format {
            ApiFormat::Openai => self.generate_openai(model_id, messages, params).await,
            ApiFormat::Gemini => self.generate_gemini(model_id, messages, params).await,
        }
    }
}
