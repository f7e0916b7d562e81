//! WRITE：写文件（覆盖），路径相对运行目录

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::commands::TypedCommand;
use crate::core::AgentError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WriteArgs {
    /// The file to write to
    pub filename: String,
    /// The content to write to the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

pub struct WriteCommand;

#[async_trait]
impl TypedCommand for WriteCommand {
    type Args = WriteArgs;

    const NAME: &'static str = "WRITE";
    const DESCRIPTION: &'static str = "Write to a file (overrides existing content, if any)";

    async fn call(&self, agent: &mut Agent, args: WriteArgs) -> Result<Option<String>, AgentError> {
        let content = args.content.unwrap_or_default();
        let path = match agent.runner().resolve_path(&args.filename) {
            Ok(path) => path,
            Err(e) => return Ok(Some(format!("Error: {e}"))),
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(Some(format!("Error: {e}")));
            }
        }
        match tokio::fs::write(&path, content.as_bytes()).await {
            Ok(()) => {
                tracing::info!(agent = %agent.name(), file = %args.filename, bytes = content.len(), "Wrote file");
                Ok(Some(format!("Wrote {} bytes to {}", content.len(), args.filename)))
            }
            Err(e) => {
                tracing::warn!(agent = %agent.name(), file = %args.filename, error = %e, "Write failed");
                Ok(Some(format!("Error: {e}")))
            }
        }
    }
}
