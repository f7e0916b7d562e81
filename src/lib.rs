//! Argent - 递归多智能体编排
//!
//! 模块划分：
//! - **agent**: Agent 状态机、角色、委派（ASSIGN）与 Runner
//! - **commands**: 命令注册表、分发器与内置命令
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与用量统计
//! - **gateway**: 监督会话、运行队列与 WebSocket 接入
//! - **llm**: 补全客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 消息模型与对话日志
//! - **observability**: 日志初始化

pub mod agent;
pub mod commands;
pub mod config;
pub mod core;
pub mod gateway;
pub mod llm;
pub mod memory;
pub mod observability;
