//! 会话管理器
//!
//! 按粘性会话 ID 管理 Session：新连接创建会话并排队一次根运行，已知 ID 重连时重新绑定传输并
//! 重放快照。根运行统一经由 RunQueue 串行启动（同一时刻最多一个根运行在执行）。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::message::{ClientEvent, RunState};
use super::session::{Session, SessionError, Transport};
use super::task_queue::{RunJob, RunQueue, RunTask};
use crate::agent::{Runner, RunnerSettings, Services, Supervisor, ROOT_AGENT_NAME};

/// 管理器参数
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub runs_root: PathBuf,
    /// 新会话使用的模型
    pub default_model: String,
}

pub struct SessionManager {
    settings: ManagerSettings,
    services: Services,
    queue: RunQueue,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(settings: ManagerSettings, services: Services, queue: RunQueue) -> Arc<Self> {
        Arc::new(Self {
            settings,
            services,
            queue,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 绑定连接。已知会话：重新绑定并重放快照；否则新建会话（沿用客户端给出的 ID），
    /// 告知会话 ID 并排队一次新运行。返回 (会话, 是否新建)
    pub async fn connect(
        &self,
        session_id: Option<&str>,
        transport: Arc<dyn Transport>,
    ) -> Result<(Arc<Session>, bool), SessionError> {
        if let Some(id) = session_id {
            if let Some(session) = self.get(id).await {
                tracing::info!(session = %id, "Client reconnected");
                session.attach(transport);
                session.send_snapshot();
                return Ok((session, false));
            }
        }

        let id = session_id
            .filter(|id| !id.is_empty())
            .map(String::from)
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let session = Session::new(
            id.clone(),
            &self.settings.default_model,
            Arc::clone(&self.services.ledger),
        );
        session.attach(transport);
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&session));
        tracing::info!(session = %id, "New session");

        session.announce();
        self.start_run(&session, None, None).await?;
        Ok((session, true))
    }

    /// 连接断开：只解绑传输，会话与运行保留
    pub fn disconnect(&self, session: &Session, transport: &Arc<dyn Transport>) {
        tracing::info!(session = %session.id(), "Client disconnected");
        session.detach(transport);
    }

    pub async fn handle_event(&self, session: &Arc<Session>, event: ClientEvent) -> Result<(), SessionError> {
        match event {
            ClientEvent::Restart { restart: true, model } => {
                tracing::info!(session = %session.id(), model = ?model, "Restart requested");
                self.start_run(session, model, None).await
            }
            ClientEvent::Restart { restart: false, .. } => Ok(()),
            ClientEvent::Answer { id, message } => {
                session.answer(&id, message);
                Ok(())
            }
        }
    }

    /// 取消会话当前运行，重置状态并排队新运行；model 为空时沿用会话当前模型
    pub async fn start_run(
        &self,
        session: &Arc<Session>,
        model: Option<String>,
        main_goal: Option<String>,
    ) -> Result<(), SessionError> {
        let model = model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| session.model());
        let token = session.reset(&model).await;
        session.send_snapshot();

        let task = execute_run(
            Arc::clone(session),
            self.services.clone(),
            RunnerSettings {
                runs_root: self.settings.runs_root.clone(),
                model,
            },
            token.clone(),
            main_goal,
        );
        // 不等待槽位：连接的读循环不能被其它会话的运行阻塞
        self.queue.enqueue(RunJob::new(session.id(), token, task))
    }

    /// 停止所有会话（进程退出时）
    pub async fn shutdown(&self) {
        for session in self.sessions.read().await.values() {
            session.stop().await;
        }
    }
}

/// 队列中的一次根运行：创建 Runner、推送初始状态、运行根 Agent
///
/// 任何失败都把根 Agent 标记为 completed，监督端不会无响应地等待。
fn execute_run(
    session: Arc<Session>,
    services: Services,
    settings: RunnerSettings,
    token: CancellationToken,
    main_goal: Option<String>,
) -> RunTask {
    Box::pin(async move {
        let supervisor: Arc<dyn Supervisor> = session.clone();
        let supervisor: Weak<dyn Supervisor> = Arc::downgrade(&supervisor);
        let models = services.llm.list_models().await;
        let usage = services.ledger.totals();
        let runner = match Runner::new(&settings, services, Some(supervisor)).await {
            Ok(runner) => runner,
            Err(e) => {
                tracing::error!(session = %session.id(), error = %e, "Failed to create runner");
                if !token.is_cancelled() {
                    session.set_state(ROOT_AGENT_NAME, RunState::Completed, true);
                }
                return Err(e);
            }
        };
        if !session.set_runner(runner.clone(), &token) {
            runner.stop().await;
            return Ok(());
        }

        match models {
            Ok(models) => session.set_property("models", serde_json::json!(models)),
            Err(e) => tracing::warn!(session = %session.id(), error = %e, "Failed to list models"),
        }
        session.set_property("usage", serde_json::json!(usage));
        session.send_snapshot();

        let result = runner.run(main_goal).await;
        if let Err(e) = &result {
            tracing::error!(session = %session.id(), runner = %runner.id(), error = %e, "Run failed");
            session.set_state(ROOT_AGENT_NAME, RunState::Completed, true);
            runner.stop().await;
        }
        result
    })
}
