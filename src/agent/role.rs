//! Agent 角色：固定的命令子集 + 系统提示词

use serde::{Deserialize, Serialize};

use crate::commands::CommandSet;

const PURPOSE_AGENT: &str = "Analyze the goal, define a plan to achieve it, and delegate the required actions to other agents or perform them yourself, until the goal is achieved.
Always check the result of your work and the work of other agents.
Never report directly, instead use the 'COMPLETE' function to report completion of a task.
There is no need to explain your action before performing them.";

const PURPOSE_SUBAGENT: &str = "Your objective is to achieve a goal assigned to you, as part of a larger plan.
Complete the task yourself or break it down into smaller tasks to be solved by other agents.
Take time to think and inspect your environment before acting since other agents might have already done some work.
Always check the result of your work and the work of other agents.
After you complete, only your completion message and filesystem changes will be preserved.
Never report directly, instead use the 'COMPLETE' function to report completion of a task.";

const PURPOSE_SEARCH: &str = "Analyze the provided content, then directly use the 'COMPLETE' function to provide the requested information.";

const PURPOSE_SEARCHER: &str = "Your objective is to find information by performing online searches and requesting other agents to analyze results.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 根 Agent
    Agent,
    /// 被委派子目标的 Agent
    Subagent,
    /// 分析给定内容后直接 COMPLETE
    Search,
    /// 执行在线搜索
    Searcher,
}

impl Role {
    /// ASSIGN 的 role 参数：只识别 search / searcher，其余（含缺省）均为 Subagent
    pub fn parse(role: Option<&str>) -> Self {
        match role.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("search") => Role::Search,
            Some("searcher") => Role::Searcher,
            _ => Role::Subagent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Subagent => "subagent",
            Role::Search => "search",
            Role::Searcher => "searcher",
        }
    }

    pub fn commands(&self) -> CommandSet {
        match self {
            Role::Agent | Role::Subagent => CommandSet::All,
            Role::Search => CommandSet::Only(&["COMPLETE"]),
            Role::Searcher => CommandSet::Only(&["SEARCH", "COMPLETE"]),
        }
    }

    pub fn purpose(&self) -> &'static str {
        match self {
            Role::Agent => PURPOSE_AGENT,
            Role::Subagent => PURPOSE_SUBAGENT,
            Role::Search => PURPOSE_SEARCH,
            Role::Searcher => PURPOSE_SEARCHER,
        }
    }

    /// 系统提示词：角色目标 + 环境信息（日期、名称、上级路径）
    pub fn system_prompt(&self, name: &str, supervisor_path: &[String]) -> Vec<String> {
        let environment = format!(
            "date: {}\nname: {}\nsupervisor_path: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            name,
            supervisor_path.join(" > "),
        );
        vec![self.purpose().to_string(), environment]
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_to_subagent() {
        assert_eq!(Role::parse(Some("search")), Role::Search);
        assert_eq!(Role::parse(Some("Searcher")), Role::Searcher);
        assert_eq!(Role::parse(Some("engineer")), Role::Subagent);
        assert_eq!(Role::parse(Some("agent")), Role::Subagent);
        assert_eq!(Role::parse(None), Role::Subagent);
    }

    #[test]
    fn test_command_sets() {
        assert!(Role::Agent.commands().contains("ASSIGN"));
        assert!(Role::Search.commands().contains("complete"));
        assert!(!Role::Search.commands().contains("SEARCH"));
        assert!(Role::Searcher.commands().contains("SEARCH"));
    }

    #[test]
    fn test_system_prompt_mentions_path() {
        let prompt = Role::Subagent.system_prompt("writer", &["human".into(), "main".into()]);
        assert_eq!(prompt.len(), 2);
        assert!(prompt[1].contains("name: writer"));
        assert!(prompt[1].contains("human > main"));
    }
}
