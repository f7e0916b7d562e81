//! 命令分发
//!
//! dispatch(agent, call)：按角色解析命令 → 调用一次 → 非空结果写回 functionResult。
//! 命令返回的错误原样向上传播，由 Agent 循环决定是写回提示还是结束运行；每次调用输出结构化审计日志（JSON）。

use std::time::Instant;

use crate::agent::Agent;
use crate::core::AgentError;
use crate::memory::{CommandCall, Message};
use crate::observability::preview;

/// 分发一次命令调用；返回写入日志的 functionResult（若有）
pub async fn dispatch(agent: &mut Agent, call: &CommandCall) -> Result<Option<Message>, AgentError> {
    let command = agent.registry().resolve(agent.role(), &call.name)?;

    let start = Instant::now();
    let result = command.invoke(agent, &call.arguments).await;

    let outcome = match &result {
        Ok(Some(_)) => "ok",
        Ok(None) => "no_result",
        Err(e) => e.kind(),
    };
    let audit = serde_json::json!({
        "event": "command_audit",
        "agent": agent.name(),
        "command": command.name(),
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": preview(&call.arguments, 200),
    });
    tracing::info!(audit = %audit, "command");

    match result? {
        Some(text) if !text.is_empty() => {
            let msg = Message::function_result(command.name(), text);
            agent.push_message(msg.clone());
            Ok(Some(msg))
        }
        _ => Ok(None),
    }
}
