//! 监督树相关命令：REQUEST（向上级要信息）、ASSIGN（委派子 Agent）、COMPLETE（结束并汇报）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, Role};
use crate::commands::TypedCommand;
use crate::core::AgentError;
use crate::observability::preview;

const EVALUATION_PROMPT: &str = "Evaluate the agent's performance and provide feedback.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RequestArgs {
    /// The id of the supervisor to request information from
    pub supervisor: String,
    /// The request to send to the supervisor
    pub content: String,
}

pub struct RequestCommand;

#[async_trait]
impl TypedCommand for RequestCommand {
    type Args = RequestArgs;

    const NAME: &'static str = "REQUEST";
    const DESCRIPTION: &'static str = "Ask for more information to a supervisor (human or agent) - don't assign tasks or report status with this function.";

    async fn call(&self, agent: &mut Agent, args: RequestArgs) -> Result<Option<String>, AgentError> {
        tracing::info!(agent = %agent.name(), to = %args.supervisor, request = %args.content, "REQUEST");
        agent.get_human_input(&args.content, "reply").await?;
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssignArgs {
    /// The id of the agent to assign the task to
    pub agent_id: String,
    /// The role of the agent: 'searcher' to perform online searches, 'search' to analyze provided content, anything else for a general worker (the default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// A complete description of the task to assign to the agent. Note that the agent won't have access to any other information or context about the task.
    pub content: String,
}

pub struct AssignCommand;

#[async_trait]
impl TypedCommand for AssignCommand {
    type Args = AssignArgs;

    const NAME: &'static str = "ASSIGN";
    const DESCRIPTION: &'static str = "Assign a task to another independent agent. Provide an id and a detailed description of the task including all required context for the agent, because the agent won't have access to any other information.";

    async fn call(&self, agent: &mut Agent, args: AssignArgs) -> Result<Option<String>, AgentError> {
        let role = Role::parse(args.role.as_deref());
        agent
            .assign(&args.agent_id, Some(&args.content), Vec::new(), role)
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompleteArgs {
    /// The status of the task (success or failure)
    pub status: String,
    /// The message to send to the supervisor. This should include all relevant information to evaluate the task completion.
    pub content: String,
}

pub struct CompleteCommand;

#[async_trait]
impl TypedCommand for CompleteCommand {
    type Args = CompleteArgs;

    const NAME: &'static str = "COMPLETE";
    const DESCRIPTION: &'static str = "Notify task completion (either success or failure), providing your supervisor with a corresponding 'completed' message. Provide all relevent information about what you did in the message, because your supervisor won't have access to any other message you wrote. If you are stuck in a loop, complete with failure.";

    async fn call(&self, agent: &mut Agent, args: CompleteArgs) -> Result<Option<String>, AgentError> {
        tracing::info!(
            agent = %agent.name(),
            status = %args.status,
            content = %preview(&args.content, 200),
            "COMPLETE"
        );
        // 有人类监督时，根 Agent 不结束，而是请求对结果的评价
        if agent.is_root() && agent.has_supervisor() {
            agent.get_human_input(EVALUATION_PROMPT, "evaluation").await?;
        } else {
            agent.finish();
        }
        Ok(None)
    }
}
