//! 记忆层：每个 Agent 独占的对话日志（进程内，不跨重启持久化）

pub mod conversation;

pub use conversation::{AssistantTurn, CommandCall, ConversationLog, Message};
