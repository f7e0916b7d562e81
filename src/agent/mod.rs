//! Agent：对话日志 + 角色 + 在监督树中的位置，运行「思考 → 行动」循环直到停止
//!
//! 状态：Created → Running → {Completed, Stopped}。每轮：取模型输出 → 追加并镜像到会话 →
//! 若带命令调用则分发；参数解码失败写 PARSE_ERROR，其它可恢复错误写 ERROR，循环继续。
//! LLM 错误（重试耗尽）致命，向上结束运行；取消令牌在循环顶部与每个挂起点检查。

pub mod role;
pub mod runner;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::commands::{dispatcher, CommandRegistry};
use crate::core::{AgentError, TokenUsage};
use crate::llm::LlmClient;
use crate::memory::{AssistantTurn, ConversationLog, Message};

pub use role::Role;
pub use runner::{AgentRecord, Runner, RunnerContext, RunnerSettings, Services, ROOT_AGENT_NAME};

const PARSE_ERROR_HINT: &str = "Hint: the function arguments must be a valid JSON object matching the function's parameters schema. Retry your last message using the appropriate syntax.";

/// 监督端（会话）回调：Agent 的状态与消息在产生时推送过去
#[async_trait]
pub trait Supervisor: Send + Sync {
    /// Agent 开始运行（附带元数据）
    fn agent_started(&self, profile: &AgentProfile);

    /// Agent 重新成为活动者（如子 Agent 返回后父 Agent 继续）
    fn agent_resumed(&self, agent: &str);

    fn agent_finished(&self, agent: &str);

    fn message_added(&self, agent: &str, message: &Message);

    /// 向人类请求输入；同一时刻最多一个未完成请求
    async fn request_input(&self, agent: &str, prompt: &str) -> Result<String, AgentError>;
}

/// 推送给监督端的 Agent 元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentProfile {
    pub id: String,
    pub role: Role,
    pub model: String,
    pub commands: Vec<String>,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Created,
    Running,
    /// 自己通过 COMPLETE 结束
    Completed,
    /// 被外部取消
    Stopped,
}

pub struct Agent {
    name: String,
    role: Role,
    parent: Option<String>,
    supervisor_path: Vec<String>,
    log: ConversationLog,
    usage: TokenUsage,
    state: AgentState,
    stop: CancellationToken,
    ctx: Arc<RunnerContext>,
}

impl Agent {
    pub(crate) fn new(
        ctx: Arc<RunnerContext>,
        name: String,
        role: Role,
        parent: Option<&Agent>,
        stop: CancellationToken,
    ) -> Self {
        let supervisor_path = match parent {
            Some(p) => {
                let mut path = p.supervisor_path.clone();
                path.push(p.name.clone());
                path
            }
            None => vec!["human".to_string()],
        };
        Self {
            name,
            role,
            parent: parent.map(|p| p.name.clone()),
            supervisor_path,
            log: ConversationLog::new(),
            usage: TokenUsage::default(),
            state: AgentState::Created,
            stop,
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn supervisor_path(&self) -> &[String] {
        &self.supervisor_path
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.log.last()
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, AgentState::Completed | AgentState::Stopped)
            || self.stop.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn working_dir(&self) -> &Path {
        self.ctx.dir()
    }

    pub fn model(&self) -> &str {
        self.ctx.model()
    }

    pub fn runner(&self) -> &Arc<RunnerContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &CommandRegistry {
        self.ctx.registry()
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        self.ctx.llm()
    }

    /// 是否有人类监督端（决定根 Agent 的 COMPLETE 是请求评价还是直接结束）
    pub fn has_supervisor(&self) -> bool {
        self.ctx.supervisor().is_some()
    }

    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            id: self.name.clone(),
            role: self.role,
            model: self.ctx.model().to_string(),
            commands: self
                .registry()
                .commands_for_role(self.role)
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            parent: self.parent.clone(),
        }
    }

    /// 写入系统提示词
    pub fn init(&mut self) {
        for prompt in self.role.system_prompt(&self.name, &self.supervisor_path) {
            self.push_message(Message::system(prompt));
        }
    }

    /// 追加消息并镜像到监督端
    pub fn push_message(&mut self, message: Message) {
        if let Some(supervisor) = self.ctx.supervisor() {
            supervisor.message_added(&self.name, &message);
        }
        self.log.push(message);
    }

    /// 自己结束（COMPLETE）；之后不可再运行
    pub fn finish(&mut self) {
        tracing::info!(agent = %self.name, "Agent completed");
        self.state = AgentState::Completed;
    }

    pub async fn run(&mut self) -> Result<(), AgentError> {
        let ctx = Arc::clone(&self.ctx);
        let functions = ctx.registry().function_specs(self.role);
        tracing::info!(
            agent = %self.name,
            role = %self.role,
            model = %ctx.model(),
            commands = ?functions.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            "Agent started"
        );
        if self.state == AgentState::Created {
            self.state = AgentState::Running;
        }
        if let Some(supervisor) = ctx.supervisor() {
            supervisor.agent_started(&self.profile());
        }

        let result = self.run_loop(&ctx, &functions).await;

        if self.state == AgentState::Running {
            self.state = AgentState::Stopped;
        }
        if let Some(supervisor) = ctx.supervisor() {
            supervisor.agent_finished(&self.name);
        }
        match &result {
            Ok(()) => tracing::info!(agent = %self.name, state = ?self.state, "Agent ended"),
            Err(e) => tracing::error!(agent = %self.name, error = %e, "Agent failed"),
        }
        result
    }

    async fn run_loop(
        &mut self,
        ctx: &RunnerContext,
        functions: &[crate::llm::FunctionSpec],
    ) -> Result<(), AgentError> {
        while !self.is_stopped() {
            tracing::debug!(agent = %self.name, turn = self.log.len(), "Agent thinking");
            let completion = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                res = ctx.llm().complete(ctx.model(), self.log.messages(), functions) => res?,
            };
            self.usage.add(&completion.usage);
            ctx.ledger().record(ctx.model(), &completion.usage);

            let call = match &completion.message {
                AssistantTurn::Call { call, .. } => Some(call.clone()),
                AssistantTurn::Say(_) => None,
            };
            self.push_message(Message::Assistant(completion.message));

            let Some(call) = call else {
                continue;
            };
            match dispatcher::dispatch(self, &call).await {
                Ok(_) => {}
                Err(AgentError::Cancelled) => break,
                Err(e @ AgentError::ArgumentDecode { .. }) => {
                    tracing::warn!(agent = %self.name, error = %e, "Could not parse command arguments");
                    self.push_message(Message::system(format!(
                        "PARSE_ERROR\n{e}\n{PARSE_ERROR_HINT}"
                    )));
                }
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(agent = %self.name, command = %call.name, error = %e, "Command failed");
                    self.push_message(Message::system(format!("ERROR\n{}: {}", e.kind(), e)));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// 人工输入桥：等待监督端回复，并以 {reply_kind: reply} 追加到日志
    pub async fn get_human_input(&mut self, prompt: &str, reply_kind: &str) -> Result<String, AgentError> {
        let supervisor = self.ctx.supervisor().ok_or(AgentError::NoSupervisor)?;
        tracing::info!(agent = %self.name, prompt = %prompt, "Waiting for human input");
        let reply = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Err(AgentError::Cancelled),
            reply = supervisor.request_input(&self.name, prompt) => reply?,
        };
        self.push_message(Message::tagged_reply(reply_kind, &reply));
        Ok(reply)
    }

    /// 委派：派生子 Agent 并阻塞直到其结束，返回其 COMPLETE 的参数；子 Agent 被停止时为 None
    pub async fn assign(
        &mut self,
        proposed_id: &str,
        task: Option<&str>,
        extra_messages: Vec<String>,
        role: Role,
    ) -> Result<Option<String>, AgentError> {
        let ctx = Arc::clone(&self.ctx);
        let mut child = ctx.create_agent(proposed_id, role, Some(self));
        tracing::info!(parent = %self.name, child = %child.name, role = %role, "Assigning task");

        child.init();
        if let Some(task) = task.filter(|t| !t.is_empty()) {
            child.push_message(Message::tagged_reply("main_goal", task));
        }
        for extra in extra_messages {
            child.push_message(Message::user(extra));
        }

        let run: Pin<Box<dyn Future<Output = Result<(), AgentError>> + Send + '_>> =
            Box::pin(child.run());
        run.await?;

        // 被取消的子 Agent 没有结果（最后一条可能是未返回的 REQUEST）
        let result = match child.state() {
            AgentState::Completed => child.completion_result(),
            _ => None,
        };
        tracing::info!(parent = %self.name, child = %child.name, has_result = result.is_some(), "Assigned task returned");
        if let Some(supervisor) = ctx.supervisor() {
            supervisor.agent_resumed(&self.name);
        }
        Ok(result)
    }

    /// 最后一条消息的命令参数（可解析时规范化为 JSON 文本）；没有命令调用时为 None
    pub fn completion_result(&self) -> Option<String> {
        let call = self.log.last()?.command_call()?;
        Some(match serde_json::from_str::<Value>(&call.arguments) {
            Ok(value) => value.to_string(),
            Err(_) => call.arguments.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::builtin_registry;
    use crate::config::ToolsSection;
    use crate::core::UsageLedger;
    use crate::llm::MockLlmClient;
    use std::sync::Weak;
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn runner(root: &Path, mock: MockLlmClient) -> Runner {
        runner_with(root, Arc::new(mock), None).await
    }

    async fn runner_with(
        root: &Path,
        mock: Arc<MockLlmClient>,
        supervisor: Option<Weak<dyn Supervisor>>,
    ) -> Runner {
        let services = Services {
            llm: mock,
            registry: Arc::new(builtin_registry(&ToolsSection::default()).unwrap()),
            ledger: Arc::new(UsageLedger::new()),
        };
        let settings = RunnerSettings {
            runs_root: root.to_path_buf(),
            model: "gpt-4o".into(),
        };
        Runner::new(&settings, services, supervisor).await.unwrap()
    }

    /// 请求输入后永不回复的监督端
    #[derive(Default)]
    struct SilentSupervisor {
        asked: Notify,
    }

    #[async_trait]
    impl Supervisor for SilentSupervisor {
        fn agent_started(&self, _profile: &AgentProfile) {}
        fn agent_resumed(&self, _agent: &str) {}
        fn agent_finished(&self, _agent: &str) {}
        fn message_added(&self, _agent: &str, _message: &Message) {}

        async fn request_input(&self, _agent: &str, _prompt: &str) -> Result<String, AgentError> {
            self.asked.notify_one();
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_complete_ends_with_complete_call() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(
            tmp.path(),
            MockLlmClient::new().call("COMPLETE", r#"{"status": "success", "content": "hello world"}"#),
        )
        .await;
        let mut root = runner.context().create_agent(ROOT_AGENT_NAME, Role::Agent, None);
        assert_eq!(root.state(), AgentState::Created);
        root.init();
        root.push_message(Message::tagged_reply("main_goal", "complete with message 'hello world'"));

        root.run().await.unwrap();

        assert_eq!(root.state(), AgentState::Completed);
        let call = root.last_message().and_then(Message::command_call).unwrap();
        assert_eq!(call.name, "COMPLETE");
        assert_eq!(call.arguments_json()["content"], "hello world");
        assert_eq!(root.usage().total_tokens, 15);
    }

    #[tokio::test]
    async fn test_stopped_child_has_no_completion_result() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(tmp.path(), MockLlmClient::new().say("hmm")).await;
        let root = runner.context().create_agent(ROOT_AGENT_NAME, Role::Agent, None);
        let mut child = runner.context().create_agent("worker", Role::Subagent, Some(&root));
        child.init();
        child.cancellation().cancel();

        child.run().await.unwrap();

        assert_eq!(child.state(), AgentState::Stopped);
        assert!(child.completion_result().is_none());
        assert_eq!(child.parent(), Some(ROOT_AGENT_NAME));
    }

    #[tokio::test]
    async fn test_human_input_without_supervisor_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(tmp.path(), MockLlmClient::new()).await;
        let mut root = runner.context().create_agent(ROOT_AGENT_NAME, Role::Agent, None);
        root.init();
        let err = root.get_human_input("Main goal", "main_goal").await.unwrap_err();
        assert!(matches!(err, AgentError::NoSupervisor));
    }

    #[tokio::test]
    async fn test_profile_lists_role_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = runner(tmp.path(), MockLlmClient::new()).await;
        let root = runner.context().create_agent(ROOT_AGENT_NAME, Role::Agent, None);
        let search = runner.context().create_agent("search_agent", Role::Search, Some(&root));
        let profile = search.profile();
        assert_eq!(profile.commands, vec!["COMPLETE"]);
        assert_eq!(profile.parent.as_deref(), Some(ROOT_AGENT_NAME));
        assert_eq!(profile.model, "gpt-4o");
    }

    #[tokio::test]
    async fn test_search_child_gets_context_after_goal_and_only_complete() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(
            MockLlmClient::new()
                .call("RUN", r#"{"content": "ls"}"#)
                .call("COMPLETE", r#"{"status": "success", "content": "Paris"}"#),
        );
        let runner = runner_with(tmp.path(), Arc::clone(&mock), None).await;
        let mut root = runner.context().create_agent(ROOT_AGENT_NAME, Role::Agent, None);
        root.init();

        let result = root
            .assign(
                "search_agent",
                Some("What is the capital?"),
                vec!["France's capital is Paris.".into()],
                Role::Search,
            )
            .await
            .unwrap();

        let value: Value = serde_json::from_str(&result.unwrap()).unwrap();
        assert_eq!(value["content"], "Paris");

        let first = &mock.requests()[0];
        assert_eq!(first.functions, vec!["COMPLETE"]);
        let n = first.messages.len();
        assert_eq!(
            first.messages[n - 2],
            Message::tagged_reply("main_goal", "What is the capital?")
        );
        assert_eq!(first.messages[n - 1], Message::user("France's capital is Paris."));

        // 角色外的命令写回 ERROR，子 Agent 继续下一轮
        match mock.requests()[1].messages.last().unwrap() {
            Message::System(text) => assert!(text.starts_with("ERROR\nUnauthorizedCommand"), "{text}"),
            other => panic!("expected an ERROR system message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_child_in_request_returns_no_result() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = Arc::new(SilentSupervisor::default());
        let supervisor_dyn: Arc<dyn Supervisor> = supervisor.clone();
        let mock = Arc::new(
            MockLlmClient::new().call("REQUEST", r#"{"supervisor": "main", "content": "which file?"}"#),
        );
        let runner = runner_with(tmp.path(), mock, Some(Arc::downgrade(&supervisor_dyn))).await;
        let mut root = runner.context().create_agent(ROOT_AGENT_NAME, Role::Agent, None);
        root.init();

        let stop = root.cancellation().clone();
        let canceller = tokio::spawn(async move {
            supervisor.asked.notified().await;
            stop.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            root.assign("helper", Some("ask first"), Vec::new(), Role::Subagent),
        )
        .await
        .unwrap()
        .unwrap();
        canceller.await.unwrap();

        assert!(result.is_none());
        let child = runner.agents().into_iter().find(|r| r.name == "helper").unwrap();
        assert!(child.is_stopped());
    }
}
