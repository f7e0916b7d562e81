//! 命令层：注册表、参数 schema、分发器与内置命令

pub mod builtins;
pub mod dispatcher;
pub mod registry;
pub mod schema;

pub use builtins::builtin_registry;
pub use dispatcher::dispatch;
pub use registry::{Command, CommandRegistry, CommandSet, TypedCommand};
