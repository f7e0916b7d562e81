//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序返回预置的回复；脚本耗尽后返回错误，使 Agent 以致命错误结束而不是空转。
//! 每次调用收到的对话与函数名会被记录，便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::core::TokenUsage;
use crate::llm::{Completion, FunctionSpec, LlmClient, LlmError};
use crate::memory::{AssistantTurn, CommandCall, Message};

/// 脚本中的一步
#[derive(Debug, Clone)]
pub enum MockReply {
    Turn(AssistantTurn),
    Fail(String),
    /// 永不返回（用于测试取消）
    Hang,
}

/// 一次调用的记录
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub functions: Vec<String>,
}

/// Mock 客户端：脚本式回复
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<MockRequest>>,
    usage: TokenUsage,
    models: Vec<String>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            usage: TokenUsage::new(10, 5),
            ..Default::default()
        }
    }

    pub fn then(self, reply: MockReply) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(reply);
        self
    }

    /// 纯文本回复
    pub fn say(self, text: &str) -> Self {
        self.then(MockReply::Turn(AssistantTurn::Say(text.to_string())))
    }

    /// 命令调用，arguments 为原始 JSON 文本
    pub fn call(self, name: &str, arguments: &str) -> Self {
        self.then(MockReply::Turn(AssistantTurn::Call {
            content: None,
            call: CommandCall::new(name, arguments),
        }))
    }

    pub fn fail(self, message: &str) -> Self {
        self.then(MockReply::Fail(message.to_string()))
    }

    pub fn hang(self) -> Self {
        self.then(MockReply::Hang)
    }

    pub fn with_usage(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage = TokenUsage::new(prompt_tokens, completion_tokens);
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 尚未消费的脚本步数
    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[Message],
        functions: &[FunctionSpec],
    ) -> Result<Completion, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(MockRequest {
                model: model.to_string(),
                messages: messages.to_vec(),
                functions: functions.iter().map(|f| f.name.clone()).collect(),
            });

        let next = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front();
        match next {
            Some(MockReply::Turn(message)) => Ok(Completion {
                message,
                usage: self.usage,
            }),
            Some(MockReply::Fail(msg)) => Err(LlmError::Api(msg)),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Err(LlmError::Api("mock script exhausted".into())),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        Ok(self.models.clone())
    }

    async fn generate_image(&self, prompt: &str) -> Result<String, LlmError> {
        Ok(format!("mock://image/{}", prompt.len()))
    }
}
