//! 网关消息协议
//!
//! 服务端 → 客户端：状态事件 `{state, id, message?, usage?}`、属性事件 `{key: value}`、
//! 完整快照（重连时重放）、会话标识 `{session}`。
//! 客户端 → 服务端：`{restart, model?}` 或回答待处理请求的 `{id, message}`。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentProfile;
use crate::core::UsageTotals;

/// 推送给监督端的运行状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    /// 等待人类输入
    Request,
    /// 新消息
    Message,
    Completed,
}

/// 快照中的单个 Agent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,
    pub parent: Option<String>,
    pub messages: Vec<Value>,
}

impl AgentView {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }

    pub fn apply_profile(&mut self, profile: &AgentProfile) {
        self.role = Some(profile.role.as_str().to_string());
        self.model = Some(profile.model.clone());
        self.commands = Some(profile.commands.clone());
        self.parent = profile.parent.clone();
    }
}

/// 重连时整体重放的会话状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayState {
    pub model: String,
    pub state: RunState,
    /// 待处理请求所属 Agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// 待处理请求的提示
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub agents: BTreeMap<String, AgentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageTotals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
}

impl ReplayState {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn agent_mut(&mut self, id: &str) -> &mut AgentView {
        self.agents
            .entry(id.to_string())
            .or_insert_with(|| AgentView::new(id))
    }
}

/// 服务端 → 客户端事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServerEvent {
    State {
        state: RunState,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<UsageTotals>,
    },
    Session {
        session: String,
    },
    Snapshot(ReplayState),
    /// `{key: value}`，如 `{"models": [...]}`、`{"agents": {...}}`
    Property(serde_json::Map<String, Value>),
}

impl ServerEvent {
    pub fn state(state: RunState, id: &str) -> Self {
        ServerEvent::State {
            state,
            id: id.to_string(),
            message: None,
            usage: None,
        }
    }

    pub fn session(id: &str) -> Self {
        ServerEvent::Session {
            session: id.to_string(),
        }
    }

    pub fn property(key: &str, value: Value) -> Self {
        let mut map = serde_json::Map::new();
        map.insert(key.to_string(), value);
        ServerEvent::Property(map)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// 客户端 → 服务端事件
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClientEvent {
    /// 重新开始运行（可切换模型）
    Restart {
        restart: bool,
        #[serde(default)]
        model: Option<String>,
    },
    /// 回答待处理的人工输入请求
    Answer { id: String, message: String },
}
