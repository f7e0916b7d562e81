//! OpenAI 兼容 API 客户端
//!
//! 通过 reqwest 直接调用任意 OpenAI 兼容端点（可配置 base_url）：chat/completions 使用 functions 字段暴露命令，
//! models 列表首次请求后缓存，images/generations 用于 DRAW。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::config::LlmSection;
use crate::core::TokenUsage;
use crate::llm::{Completion, FunctionSpec, LlmClient, LlmError};
use crate::memory::{AssistantTurn, CommandCall, Message};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    max_tokens: u32,
    models: OnceCell<Vec<String>>,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        api_key: Option<&str>,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!("No API key configured (llm.api_key / OPENAI_API_KEY)");
        }
        Ok(Self {
            client,
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_tokens,
            models: OnceCell::new(),
        })
    }

    pub fn from_config(cfg: &LlmSection) -> Result<Self, LlmError> {
        Self::new(
            cfg.base_url.as_deref(),
            cfg.api_key.as_deref(),
            cfg.max_tokens,
            Duration::from_secs(cfg.request_timeout_secs),
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}/{}", self.base_url, path));
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, LlmError> {
        let response = req
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "no_functions")]
    functions: &'a [FunctionSpec],
    max_tokens: u32,
}

fn no_functions(functions: &&[FunctionSpec]) -> bool {
    functions.is_empty()
}

#[derive(Serialize, Deserialize, Debug)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize, Debug)]
struct WireMessage {
    role: &'static str,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        let (name, function_call) = match msg {
            Message::FunctionResult { name, .. } => (Some(name.clone()), None),
            Message::Assistant(AssistantTurn::Call { call, .. }) => (
                None,
                Some(WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                }),
            ),
            _ => (None, None),
        };
        WireMessage {
            role: msg.role(),
            content: msg.content().map(String::from),
            name,
            function_call,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    function_call: Option<WireFunctionCall>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageEntry>,
}

#[derive(Deserialize)]
struct ImageEntry {
    url: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        functions: &[FunctionSpec],
    ) -> Result<Completion, LlmError> {
        let body = ChatRequest {
            model,
            messages: messages.iter().map(WireMessage::from).collect(),
            functions,
            max_tokens: self.max_tokens,
        };
        let response: ChatResponse = self
            .send(self.request(reqwest::Method::POST, "chat/completions").json(&body))
            .await?;

        let usage = response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Parse("no choices in response".into()))?;
        let call = choice
            .message
            .function_call
            .map(|fc| CommandCall::new(fc.name, fc.arguments));
        let message = AssistantTurn::from_parts(choice.message.content, call)
            .ok_or(LlmError::EmptyResponse)?;

        tracing::debug!(
            model = %model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "Completion received"
        );
        Ok(Completion { message, usage })
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let models = self
            .models
            .get_or_try_init(|| async {
                let list: ModelList = self
                    .send(self.request(reqwest::Method::GET, "models"))
                    .await?;
                let mut ids: Vec<String> = list
                    .data
                    .into_iter()
                    .map(|m| m.id)
                    .filter(|id| id.starts_with("gpt"))
                    .collect();
                ids.sort_unstable_by(|a, b| b.cmp(a));
                Ok::<_, LlmError>(ids)
            })
            .await?;
        Ok(models.clone())
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, LlmError> {
        let body: Value = serde_json::json!({
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });
        let response: ImageResponse = self
            .send(self.request(reqwest::Method::POST, "images/generations").json(&body))
            .await?;
        response
            .data
            .into_iter()
            .next()
            .and_then(|img| img.url)
            .ok_or_else(|| LlmError::Parse("no image url in response".into()))
    }
}
