//! 内置命令目录（注册顺序即暴露给模型的顺序）

pub mod draw;
pub mod process;
pub mod supervision;
pub mod web;
pub mod write;

use std::sync::Arc;

use crate::commands::CommandRegistry;
use crate::config::ToolsSection;
use crate::core::AgentError;

pub use draw::{DrawArgs, DrawCommand};
pub use process::{PythonArgs, PythonCommand, RunArgs, RunCommand};
pub use supervision::{
    AssignArgs, AssignCommand, CompleteArgs, CompleteCommand, RequestArgs, RequestCommand,
};
pub use web::{GetArgs, GetCommand, SearchArgs, SearchCommand, WebClient};
pub use write::{WriteArgs, WriteCommand};

/// 注册全部内置命令
pub fn register_builtins(registry: &mut CommandRegistry, cfg: &ToolsSection) -> Result<(), AgentError> {
    let web = Arc::new(WebClient::new(&cfg.search)?);
    registry.register(WriteCommand)?;
    registry.register(DrawCommand)?;
    registry.register(RequestCommand)?;
    registry.register(AssignCommand)?;
    registry.register(RunCommand::new(cfg.tool_timeout_secs))?;
    registry.register(PythonCommand::new(
        cfg.python_command.clone(),
        cfg.tool_timeout_secs,
    ))?;
    registry.register(SearchCommand::new(Arc::clone(&web)))?;
    registry.register(GetCommand::new(web))?;
    registry.register(CompleteCommand)?;
    Ok(())
}

/// 内置命令注册表
pub fn builtin_registry(cfg: &ToolsSection) -> Result<CommandRegistry, AgentError> {
    let mut registry = CommandRegistry::new();
    register_builtins(&mut registry, cfg)?;
    tracing::debug!(commands = ?registry.command_names(), "Registered builtin commands");
    Ok(registry)
}
