//! 监督网关
//!
//! - **message**：JSON 事件协议与可重放的会话快照
//! - **session**：Session（人工输入单槽、状态镜像、断线重连）与传输抽象
//! - **task_queue**：单槽运行队列，根运行串行执行
//! - **manager**：按粘性 ID 管理会话，排队新运行
//! - **hub**：WebSocket 接入（`gateway` feature）

#[cfg(feature = "gateway")]
mod hub;
mod manager;
mod message;
mod session;
mod task_queue;

#[cfg(feature = "gateway")]
pub use hub::{Hub, HubConfig};
pub use manager::{ManagerSettings, SessionManager};
pub use message::{AgentView, ClientEvent, ReplayState, RunState, ServerEvent};
pub use session::{ChannelTransport, Session, SessionError, Transport};
pub use task_queue::{RunJob, RunQueue, RunTask, RunWorker};
