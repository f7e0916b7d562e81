//! Agent Runner：一次人类发起的运行（一棵 Agent 树）的上下文
//!
//! 持有独占的工作目录（每次运行新建，结束时若为空则删除）、按插入顺序记录的 Agent 名册
//! （重名时追加 `_1`、`_2`…）与取消令牌。所有 Agent 共享同一个 RunnerContext。

use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};

use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, Role, Supervisor};
use crate::commands::CommandRegistry;
use crate::core::{AgentError, UsageLedger};
use crate::llm::LlmClient;
use crate::memory::Message;

/// 根 Agent 的名称
pub const ROOT_AGENT_NAME: &str = "main";

/// 运行参数
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// 运行目录在此之下创建
    pub runs_root: PathBuf,
    pub model: String,
}

/// 进程级共享服务
#[derive(Clone)]
pub struct Services {
    pub llm: Arc<dyn LlmClient>,
    pub registry: Arc<CommandRegistry>,
    pub ledger: Arc<UsageLedger>,
}

/// 名册中的一条记录（Agent 本体由其调用栈持有，名册只保留元数据与停止令牌）
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub name: String,
    pub role: Role,
    pub parent: Option<String>,
    token: CancellationToken,
}

impl AgentRecord {
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub struct RunnerContext {
    id: String,
    dir: PathBuf,
    model: String,
    services: Services,
    supervisor: Option<Weak<dyn Supervisor>>,
    agents: Mutex<Vec<AgentRecord>>,
    cancel: CancellationToken,
}

impl RunnerContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.services.llm
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.services.registry
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.services.ledger
    }

    pub fn supervisor(&self) -> Option<Arc<dyn Supervisor>> {
        self.supervisor.as_ref().and_then(Weak::upgrade)
    }

    fn records(&self) -> std::sync::MutexGuard<'_, Vec<AgentRecord>> {
        self.agents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 创建并登记 Agent（登记先于运行，嵌套 ASSIGN 可见）
    pub(crate) fn create_agent(
        self: &Arc<Self>,
        proposed: &str,
        role: Role,
        parent: Option<&Agent>,
    ) -> Agent {
        let token = match parent {
            Some(p) => p.cancellation().child_token(),
            None => self.cancel.child_token(),
        };
        let name = {
            let mut records = self.records();
            let name = unique_name(&records, proposed);
            records.push(AgentRecord {
                name: name.clone(),
                role,
                parent: parent.map(|p| p.name().to_string()),
                token: token.clone(),
            });
            name
        };
        Agent::new(Arc::clone(self), name, role, parent, token)
    }

    /// 将相对路径解析到运行目录内；绝对路径或越出运行目录的路径被拒绝
    pub fn resolve_path(&self, relative: &str) -> Result<PathBuf, String> {
        let mut resolved = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !resolved.pop() {
                        return Err(format!("path escapes the run directory: {relative}"));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("absolute paths are not allowed: {relative}"));
                }
            }
        }
        if resolved.as_os_str().is_empty() {
            return Err(format!("invalid file name: {relative:?}"));
        }
        Ok(self.dir.join(resolved))
    }
}

/// 无冲突的名称：`id`、`id_1`、`id_2`…
fn unique_name(records: &[AgentRecord], proposed: &str) -> String {
    let taken = |name: &str| records.iter().any(|r| r.name == name);
    if !taken(proposed) {
        return proposed.to_string();
    }
    (1..)
        .map(|i| format!("{proposed}_{i}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| format!("{proposed}_{}", uuid::Uuid::new_v4().simple()))
}

/// Runner 句柄（可廉价克隆，会话与运行队列各持一份）
#[derive(Clone)]
pub struct Runner {
    ctx: Arc<RunnerContext>,
}

impl Runner {
    /// 新建运行目录 `<runs_root>/YYYYmmdd-HHMMSS-xxxx`
    pub async fn new(
        settings: &RunnerSettings,
        services: Services,
        supervisor: Option<Weak<dyn Supervisor>>,
    ) -> Result<Self, AgentError> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!(
            "{}-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S"),
            &suffix[..4]
        );
        tokio::fs::create_dir_all(&settings.runs_root).await?;
        let dir = settings.runs_root.join(&id);
        tokio::fs::create_dir(&dir).await?;
        tracing::info!(runner = %id, dir = %dir.display(), model = %settings.model, "Created agent runner");

        Ok(Self {
            ctx: Arc::new(RunnerContext {
                id,
                dir,
                model: settings.model.clone(),
                services,
                supervisor,
                agents: Mutex::new(Vec::new()),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn id(&self) -> &str {
        self.ctx.id()
    }

    pub fn dir(&self) -> &Path {
        self.ctx.dir()
    }

    pub fn context(&self) -> &Arc<RunnerContext> {
        &self.ctx
    }

    /// 名册快照（插入顺序）
    pub fn agents(&self) -> Vec<AgentRecord> {
        self.ctx.records().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.ctx.cancel.is_cancelled()
    }

    /// 运行根 Agent；main_goal 为空时向监督端请求
    ///
    /// 被取消视为正常结束；LLM 错误向上返回。
    pub async fn run(&self, main_goal: Option<String>) -> Result<(), AgentError> {
        let mut root = self.ctx.create_agent(ROOT_AGENT_NAME, Role::Agent, None);
        root.init();
        match main_goal {
            Some(goal) => root.push_message(Message::tagged_reply("main_goal", &goal)),
            None => match root.get_human_input("Main goal", "main_goal").await {
                Ok(_) => {}
                Err(AgentError::Cancelled) => return Ok(()),
                Err(e) => return Err(e),
            },
        }
        root.run().await
    }

    /// 停止所有 Agent（已停止的忽略），运行目录为空时删除
    pub async fn stop(&self) {
        self.ctx.cancel.cancel();
        for record in self.ctx.records().iter() {
            if !record.token.is_cancelled() {
                tracing::debug!(agent = %record.name, "Stopping agent");
                record.token.cancel();
            }
        }
        match tokio::fs::read_dir(self.dir()).await {
            Ok(mut entries) => {
                if matches!(entries.next_entry().await, Ok(None)) {
                    if let Err(e) = tokio::fs::remove_dir(self.dir()).await {
                        tracing::warn!(dir = %self.dir().display(), error = %e, "Failed to remove empty run directory");
                    }
                }
            }
            Err(e) => {
                tracing::debug!(dir = %self.dir().display(), error = %e, "Run directory not readable")
            }
        }
        tracing::info!(runner = %self.id(), "Runner stopped");
    }
}
