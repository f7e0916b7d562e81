//! 监督会话
//!
//! 一个 Session 绑定一个（可断线重连的）传输连接与至多一个 Runner：缓存可重放的 ReplayState，
//! 持有至多一个未完成的人工输入请求，并实现 Supervisor 供 Agent 推送状态与消息。
//! 发送失败只记录日志，不影响 Agent 循环。

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::message::{ReplayState, RunState, ServerEvent};
use crate::agent::{AgentProfile, Runner, Supervisor};
use crate::core::{AgentError, UsageLedger};
use crate::memory::Message;

/// 会话层错误
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport closed")]
    TransportClosed,

    #[error("Run queue closed")]
    QueueClosed,

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// 抽象传输：只负责把事件推给客户端（非阻塞）
pub trait Transport: Send + Sync {
    fn push(&self, event: &ServerEvent) -> Result<(), SessionError>;
}

/// 基于无界通道的传输：WebSocket 写任务或测试从接收端取事件
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl Transport for ChannelTransport {
    fn push(&self, event: &ServerEvent) -> Result<(), SessionError> {
        self.tx
            .send(event.clone())
            .map_err(|_| SessionError::TransportClosed)
    }
}

struct PendingInput {
    agent: String,
    reply: oneshot::Sender<String>,
}

struct SessionInner {
    transport: Option<Arc<dyn Transport>>,
    replay: ReplayState,
    pending: Option<PendingInput>,
    runner: Option<Runner>,
    run_token: Option<CancellationToken>,
}

pub struct Session {
    id: String,
    ledger: Arc<UsageLedger>,
    inner: Mutex<SessionInner>,
}

impl Session {
    pub fn new(id: impl Into<String>, model: &str, ledger: Arc<UsageLedger>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            ledger,
            inner: Mutex::new(SessionInner {
                transport: None,
                replay: ReplayState::new(model),
                pending: None,
                runner: None,
                run_token: None,
            }),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 发送事件；无连接或发送失败只记日志
    fn send(&self, event: ServerEvent) {
        let transport = self.lock().transport.clone();
        match transport {
            Some(transport) => {
                if let Err(e) = transport.push(&event) {
                    tracing::warn!(session = %self.id, error = %e, "Error sending to client");
                }
            }
            None => tracing::debug!(session = %self.id, "No client connected"),
        }
    }

    /// 绑定（或替换）传输连接
    pub fn attach(&self, transport: Arc<dyn Transport>) {
        self.lock().transport = Some(transport);
    }

    /// 解绑指定连接；已被其它连接替换时不动
    pub fn detach(&self, transport: &Arc<dyn Transport>) {
        let mut inner = self.lock();
        let current = inner
            .transport
            .as_ref()
            .is_some_and(|t| std::ptr::addr_eq(Arc::as_ptr(t), Arc::as_ptr(transport)));
        if current {
            inner.transport = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.lock().transport.is_some()
    }

    pub fn model(&self) -> String {
        self.lock().replay.model.clone()
    }

    pub fn runner(&self) -> Option<Runner> {
        self.lock().runner.clone()
    }

    pub fn snapshot(&self) -> ReplayState {
        self.lock().replay.clone()
    }

    /// 取消当前运行并清空状态，开始新的运行周期；返回新运行的取消令牌
    pub async fn reset(&self, model: &str) -> CancellationToken {
        self.stop().await;
        let token = CancellationToken::new();
        let mut inner = self.lock();
        inner.replay = ReplayState::new(model);
        inner.run_token = Some(token.clone());
        token
    }

    /// 取消后台任务、停止 Runner、丢弃未完成的输入请求
    pub async fn stop(&self) {
        let runner = {
            let mut inner = self.lock();
            inner.pending = None;
            if let Some(token) = inner.run_token.take() {
                token.cancel();
            }
            inner.runner.take()
        };
        if let Some(runner) = runner {
            runner.stop().await;
        }
    }

    /// 登记运行中的 Runner；所属运行已被取消时返回 false（调用方负责停止它）
    pub fn set_runner(&self, runner: Runner, token: &CancellationToken) -> bool {
        let mut inner = self.lock();
        if token.is_cancelled() {
            return false;
        }
        inner.runner = Some(runner);
        true
    }

    pub fn set_state(&self, agent: &str, state: RunState, with_usage: bool) {
        {
            let mut inner = self.lock();
            inner.replay.state = state;
            if with_usage {
                inner.replay.usage = Some(self.ledger.totals());
            }
        }
        self.send(ServerEvent::state(state, agent));
    }

    /// 缓存并推送 `{key: value}`（key 为 models / usage）
    pub fn set_property(&self, key: &str, value: Value) {
        {
            let mut inner = self.lock();
            match key {
                "models" => inner.replay.models = serde_json::from_value(value.clone()).ok(),
                "usage" => inner.replay.usage = serde_json::from_value(value.clone()).ok(),
                "model" => {
                    if let Some(model) = value.as_str() {
                        inner.replay.model = model.to_string();
                    }
                }
                other => tracing::debug!(key = %other, "Property is not cached"),
            }
        }
        self.send(ServerEvent::property(key, value));
    }

    pub fn set_agent_properties(&self, profile: &AgentProfile) {
        let agents = {
            let mut inner = self.lock();
            inner.replay.agent_mut(&profile.id).apply_profile(profile);
            serde_json::to_value(&inner.replay.agents).unwrap_or(Value::Null)
        };
        self.send(ServerEvent::property("agents", agents));
    }

    pub fn add_message(&self, agent: &str, message: &Message) {
        let data = message.to_display_json();
        let usage = self.ledger.totals();
        {
            let mut inner = self.lock();
            inner.replay.usage = Some(usage);
            inner.replay.agent_mut(agent).messages.push(data.clone());
        }
        self.send(ServerEvent::State {
            state: RunState::Message,
            id: agent.to_string(),
            message: Some(data),
            usage: Some(usage),
        });
    }

    /// 告知客户端会话 ID（用于重连）
    pub fn announce(&self) {
        self.send(ServerEvent::session(&self.id));
    }

    /// 发送完整快照（新运行开始或重连时）
    pub fn send_snapshot(&self) {
        let snapshot = self.snapshot();
        self.send(ServerEvent::Snapshot(snapshot));
    }

    /// 单槽请求/应答：推送 request 状态并等待 answer；已有未完成请求时报错
    pub async fn get_input(&self, agent: &str, prompt: &str) -> Result<String, AgentError> {
        let (rx, previous) = {
            let mut inner = self.lock();
            if inner
                .pending
                .as_ref()
                .is_some_and(|p| !p.reply.is_closed())
            {
                return Err(AgentError::InputAlreadyPending);
            }
            let (tx, rx) = oneshot::channel();
            inner.pending = Some(PendingInput {
                agent: agent.to_string(),
                reply: tx,
            });
            let previous = inner.replay.state;
            inner.replay.state = RunState::Request;
            inner.replay.id = Some(agent.to_string());
            inner.replay.message = Some(prompt.to_string());
            (rx, previous)
        };
        self.send(ServerEvent::State {
            state: RunState::Request,
            id: agent.to_string(),
            message: Some(Value::String(prompt.to_string())),
            usage: None,
        });

        let reply = rx.await.map_err(|_| AgentError::Cancelled)?;

        {
            let mut inner = self.lock();
            inner.replay.state = previous;
            inner.replay.id = None;
            inner.replay.message = None;
        }
        self.send(ServerEvent::state(previous, agent));
        Ok(reply)
    }

    /// 应答待处理请求；没有对应请求时返回 false
    pub fn answer(&self, id: &str, message: String) -> bool {
        let pending = {
            let mut inner = self.lock();
            match &inner.pending {
                Some(p) if p.agent == id => inner.pending.take(),
                _ => None,
            }
        };
        match pending {
            Some(p) => p.reply.send(message).is_ok(),
            None => {
                tracing::warn!(session = %self.id, id = %id, "Answer without a matching pending request");
                false
            }
        }
    }
}

#[async_trait]
impl Supervisor for Session {
    fn agent_started(&self, profile: &AgentProfile) {
        self.set_agent_properties(profile);
        self.set_state(&profile.id, RunState::Running, true);
    }

    fn agent_resumed(&self, agent: &str) {
        self.set_state(agent, RunState::Running, false);
    }

    fn agent_finished(&self, agent: &str) {
        self.set_state(agent, RunState::Completed, true);
    }

    fn message_added(&self, agent: &str, message: &Message) {
        self.add_message(agent, message);
    }

    async fn request_input(&self, agent: &str, prompt: &str) -> Result<String, AgentError> {
        self.get_input(agent, prompt).await
    }
}
