//! 对话日志：单个 Agent 的有序、只追加消息序列
//!
//! 消息为四种变体（System / User / Assistant / FunctionResult）；Assistant 消息由 AssistantTurn 表示，
//! 构造上保证「有文本或有命令调用，不会两者皆无」。日志不剪枝，最后一条消息用于向上级汇报结果。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 模型请求执行的命令：名称 + 原始 JSON 参数文本（未解析）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandCall {
    pub name: String,
    pub arguments: String,
}

impl CommandCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// 参数解析为 JSON；无法解析时原样作为字符串返回
    pub fn arguments_json(&self) -> Value {
        serde_json::from_str(&self.arguments).unwrap_or_else(|_| Value::String(self.arguments.clone()))
    }
}

/// 模型的一轮输出
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssistantTurn {
    /// 只有文本（模型「自言自语」，不产生动作）
    Say(String),
    /// 命令调用，可附带思考文本
    Call {
        content: Option<String>,
        call: CommandCall,
    },
}

impl AssistantTurn {
    /// 由 API 返回的两部分组装；两者皆空时返回 None
    pub fn from_parts(content: Option<String>, call: Option<CommandCall>) -> Option<Self> {
        let content = content.filter(|c| !c.is_empty());
        match (content, call) {
            (content, Some(call)) => Some(AssistantTurn::Call { content, call }),
            (Some(text), None) => Some(AssistantTurn::Say(text)),
            (None, None) => None,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    System(String),
    User(String),
    Assistant(AssistantTurn),
    FunctionResult { name: String, content: String },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System(content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User(content.into())
    }

    pub fn say(content: impl Into<String>) -> Self {
        Message::Assistant(AssistantTurn::Say(content.into()))
    }

    pub fn call(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Message::Assistant(AssistantTurn::Call {
            content: None,
            call: CommandCall::new(name, arguments),
        })
    }

    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Message::FunctionResult {
            name: name.into(),
            content: content.into(),
        }
    }

    /// 带标签的用户回复，如 {"main_goal": "..."}，便于模型区分回复类型
    pub fn tagged_reply(kind: &str, text: &str) -> Self {
        Message::User(serde_json::json!({ kind: text }).to_string())
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System(_) => "system",
            Message::User(_) => "user",
            Message::Assistant(_) => "assistant",
            Message::FunctionResult { .. } => "function",
        }
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System(c) | Message::User(c) => Some(c),
            Message::Assistant(AssistantTurn::Say(c)) => Some(c),
            Message::Assistant(AssistantTurn::Call { content, .. }) => content.as_deref(),
            Message::FunctionResult { content, .. } => Some(content),
        }
    }

    pub fn command_call(&self) -> Option<&CommandCall> {
        match self {
            Message::Assistant(AssistantTurn::Call { call, .. }) => Some(call),
            _ => None,
        }
    }

    /// 展示用 JSON（推送给监督端）：命令参数与函数结果在可解析时展开为 JSON
    pub fn to_display_json(&self) -> Value {
        match self {
            Message::Assistant(AssistantTurn::Call { content, call }) => serde_json::json!({
                "role": "assistant",
                "content": content,
                "function_call": {
                    "name": call.name,
                    "arguments": call.arguments_json(),
                },
            }),
            Message::FunctionResult { name, content } => serde_json::json!({
                "role": "function",
                "name": name,
                "content": serde_json::from_str::<Value>(content)
                    .unwrap_or_else(|_| Value::String(content.clone())),
            }),
            other => serde_json::json!({
                "role": other.role(),
                "content": other.content(),
            }),
        }
    }
}

/// 对话日志：只追加，永不缩短
#[derive(Clone, Debug, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, msg: Message) {
        debug_assert!(
            !self.messages.is_empty() || matches!(msg, Message::System(_)),
            "first message of a conversation must be a system message"
        );
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
