//! 命令注册表
//!
//! 所有命令实现 Command trait（name / description / parameters_schema / invoke），由 CommandRegistry
//! 按名注册（名称不区分大小写，重复注册报错），按角色筛选后生成暴露给模型的 function 列表。
//! 具体命令一般实现 TypedCommand：参数为 serde + schemars 类型，解码与 schema 由 blanket impl 统一处理。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::agent::{Agent, Role};
use crate::commands::schema::{decode_args, parameters_schema};
use crate::core::AgentError;
use crate::llm::FunctionSpec;

/// 命令 trait：invoke 拿到所属 Agent 的可变引用（可回调 Agent 请求人工输入或派生子 Agent）
///
/// 返回 Some(text) 时由 Dispatcher 写回 functionResult；None 表示命令自己已产生副作用，不写回。
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn parameters_schema(&self) -> Value;

    async fn invoke(&self, agent: &mut Agent, raw_arguments: &str)
        -> Result<Option<String>, AgentError>;
}

/// 强类型命令：参数类型同时提供 schema 与解码
#[async_trait]
pub trait TypedCommand: Send + Sync {
    type Args: DeserializeOwned + JsonSchema + Send;

    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    async fn call(&self, agent: &mut Agent, args: Self::Args) -> Result<Option<String>, AgentError>;
}

#[async_trait]
impl<T: TypedCommand> Command for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn description(&self) -> &'static str {
        T::DESCRIPTION
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<T::Args>()
    }

    async fn invoke(
        &self,
        agent: &mut Agent,
        raw_arguments: &str,
    ) -> Result<Option<String>, AgentError> {
        let args: T::Args = decode_args(T::NAME, raw_arguments)?;
        self.call(agent, args).await
    }
}

/// 角色可用的命令集合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSet {
    All,
    Only(&'static [&'static str]),
}

impl CommandSet {
    pub fn contains(&self, name: &str) -> bool {
        match self {
            CommandSet::All => true,
            CommandSet::Only(names) => names.iter().any(|n| n.eq_ignore_ascii_case(name)),
        }
    }
}

/// 命令注册表：启动时构建，之后只读，通过 Arc 在所有 Runner 间共享
#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<Arc<dyn Command>>,
    index: HashMap<String, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: impl Command + 'static) -> Result<(), AgentError> {
        let key = command.name().to_ascii_uppercase();
        if self.index.contains_key(&key) {
            return Err(AgentError::DuplicateCommand(command.name().to_string()));
        }
        self.index.insert(key, self.commands.len());
        self.commands.push(Arc::new(command));
        Ok(())
    }

    /// 不区分大小写查找
    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.index
            .get(&name.to_ascii_uppercase())
            .map(|&i| Arc::clone(&self.commands[i]))
    }

    /// 为角色解析命令：未注册 → UnknownCommand；不在角色集合内 → UnauthorizedCommand
    pub fn resolve(&self, role: Role, name: &str) -> Result<Arc<dyn Command>, AgentError> {
        let command = self
            .get(name)
            .ok_or_else(|| AgentError::UnknownCommand(name.to_string()))?;
        if !role.commands().contains(command.name()) {
            return Err(AgentError::UnauthorizedCommand {
                command: command.name().to_string(),
                role: role.as_str().to_string(),
            });
        }
        Ok(command)
    }

    /// 角色可用的命令（按注册顺序）
    pub fn commands_for_role(&self, role: Role) -> Vec<Arc<dyn Command>> {
        let set = role.commands();
        self.commands
            .iter()
            .filter(|c| set.contains(c.name()))
            .cloned()
            .collect()
    }

    /// 生成提供给模型的 function 描述
    pub fn function_specs(&self, role: Role) -> Vec<FunctionSpec> {
        self.commands_for_role(role)
            .iter()
            .map(|c| FunctionSpec {
                name: c.name().to_string(),
                description: c.description().to_string(),
                parameters: c.parameters_schema(),
            })
            .collect()
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
