//! DRAW：通过补全客户端生成图片，返回图片 URL

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::commands::TypedCommand;
use crate::core::AgentError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DrawArgs {
    /// A detailed, graphic description of the image to generate, in English
    pub description: String,
}

pub struct DrawCommand;

#[async_trait]
impl TypedCommand for DrawCommand {
    type Args = DrawArgs;

    const NAME: &'static str = "DRAW";
    const DESCRIPTION: &'static str = "Generate an image from a prompt. The prompt should be a detailed, graphic description of the image to generate, in English. The resulting image will be displayed to the user instead of the result you will see. Never repeat the url, and don't link to the result.";

    async fn call(&self, agent: &mut Agent, args: DrawArgs) -> Result<Option<String>, AgentError> {
        tracing::info!(agent = %agent.name(), description = %args.description, "DRAW");
        let llm = std::sync::Arc::clone(agent.llm());
        match llm.generate_image(&args.description).await {
            Ok(url) => Ok(Some(url)),
            Err(e) => {
                tracing::warn!(agent = %agent.name(), error = %e, "Image generation failed");
                Ok(Some(format!("Error: {e}")))
            }
        }
    }
}
