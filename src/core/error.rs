//! Agent 错误类型
//!
//! 分类：参数解析错误、未知/越权命令（可恢复，写回 system 消息后继续）；
//! LLM 错误（重试耗尽后致命，结束该 Agent 的运行）；取消（退出循环，不回滚）。

use thiserror::Error;

use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Command {command} is not available to role {role}")]
    UnauthorizedCommand { command: String, role: String },

    #[error("Invalid arguments for {command}: {reason}")]
    ArgumentDecode { command: String, reason: String },

    #[error("Duplicate command: {0}")]
    DuplicateCommand(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("No human supervisor attached")]
    NoSupervisor,

    /// 同一会话在上一个输入请求未返回前又发起新请求（顺序执行下不应出现）
    #[error("A human input request is already pending")]
    InputAlreadyPending,

    #[error("Cancelled")]
    Cancelled,

    #[error("HTTP client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// 写入 `ERROR` system 消息时使用的错误类别名
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::UnknownCommand(_) => "UnknownCommand",
            AgentError::UnauthorizedCommand { .. } => "UnauthorizedCommand",
            AgentError::ArgumentDecode { .. } => "ArgumentDecodeError",
            AgentError::DuplicateCommand(_) => "DuplicateCommand",
            AgentError::Llm(_) => "LlmError",
            AgentError::NoSupervisor => "NoSupervisor",
            AgentError::InputAlreadyPending => "InputAlreadyPending",
            AgentError::Cancelled => "Cancelled",
            AgentError::HttpClient(_) => "HttpClientError",
            AgentError::Io(_) => "IoError",
        }
    }

    /// 能否在 Agent 循环内就地恢复（写回提示后继续下一轮）
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AgentError::Llm(_) | AgentError::Cancelled | AgentError::InputAlreadyPending
        )
    }
}
