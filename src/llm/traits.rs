//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：complete 接收完整对话与本轮可用命令的函数描述，
//! 返回一轮 Assistant 输出及 token 用量。RetryingLlmClient 在外层做有限次重试。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::TokenUsage;
use crate::memory::{AssistantTurn, Message};

/// LLM 调用错误
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("API error: {0}")]
    Api(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Model returned neither content nor a function call")]
    EmptyResponse,

    #[error("Not supported by this client: {0}")]
    Unsupported(String),
}

impl LlmError {
    /// 是否值得重试：鉴权等 4xx（429 除外）与不支持的操作不重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http { status, .. } => *status == 429 || *status >= 500,
            LlmError::Unsupported(_) => false,
            _ => true,
        }
    }
}

/// 提供给模型的函数描述（name / description / JSON Schema parameters）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 一次补全的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub message: AssistantTurn,
    pub usage: TokenUsage,
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式补全；functions 为空时不向模型暴露函数调用
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        functions: &[FunctionSpec],
    ) -> Result<Completion, LlmError>;

    /// 可选模型列表（用于监督端的模型下拉框）
    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(Vec::new())
    }

    /// 根据描述生成图片，返回图片 URL
    async fn generate_image(&self, prompt: &str) -> Result<String, LlmError> {
        let _ = prompt;
        Err(LlmError::Unsupported("image generation".into()))
    }
}

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最多尝试次数（含首次）
    pub max_attempts: u32,
    /// 第 n 次失败后等待 backoff * n
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// 带重试的客户端包装：可重试错误按线性退避重试，耗尽后返回最后一次错误
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        functions: &[FunctionSpec],
    ) -> Result<Completion, LlmError> {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.complete(model, messages, functions).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        model = %model,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Completion failed, retrying"
                    );
                    tokio::time::sleep(self.config.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(model = %model, attempt, error = %e, "Completion failed");
                    return Err(e);
                }
            }
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        self.inner.list_models().await
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, LlmError> {
        self.inner.generate_image(prompt).await
    }
}
