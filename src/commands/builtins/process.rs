//! RUN / PYTHON：在运行目录中启动子进程，捕获 stdout / stderr / 退出码
//!
//! 每次调用都是全新进程（不保留 shell 状态）；带超时，Agent 被取消时子进程随 future 一起被杀掉。
//! 执行失败不是错误：以文本返回给模型。

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::agent::Agent;
use crate::commands::TypedCommand;
use crate::core::AgentError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RunArgs {
    /// The commands to run
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PythonArgs {
    /// The python code to run
    pub content: String,
}

/// 进程结果：正常退出（任意退出码）或无法启动 / 超时
enum ProcessOutcome {
    Exited(Output),
    Failed(String),
}

async fn run_process(
    agent: &Agent,
    mut cmd: Command,
    timeout: Duration,
) -> Result<ProcessOutcome, AgentError> {
    cmd.current_dir(agent.working_dir())
        .stdin(Stdio::null())
        .kill_on_drop(true);
    let output = tokio::select! {
        biased;
        _ = agent.cancellation().cancelled() => return Err(AgentError::Cancelled),
        output = tokio::time::timeout(timeout, cmd.output()) => output,
    };
    Ok(match output {
        Ok(Ok(output)) => ProcessOutcome::Exited(output),
        Ok(Err(e)) => ProcessOutcome::Failed(e.to_string()),
        Err(_) => ProcessOutcome::Failed(format!("timed out after {}s", timeout.as_secs())),
    })
}

pub struct RunCommand {
    timeout: Duration,
}

impl RunCommand {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl TypedCommand for RunCommand {
    type Args = RunArgs;

    const NAME: &'static str = "RUN";
    const DESCRIPTION: &'static str = "Run one or more shell command and get the output. Note that the shell is reset between each invocation.";

    async fn call(&self, agent: &mut Agent, args: RunArgs) -> Result<Option<String>, AgentError> {
        tracing::info!(agent = %agent.name(), command = %args.content, "RUN");
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", &args.content]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", &args.content]);
            c
        };
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let result = match run_process(agent, cmd, self.timeout).await? {
            ProcessOutcome::Exited(output) if output.status.success() => {
                format!("stdout: {}", String::from_utf8_lossy(&output.stdout))
            }
            ProcessOutcome::Exited(output) => {
                tracing::warn!(agent = %agent.name(), status = ?output.status, "Command returned non-zero exit code");
                format!("stderr: {}", String::from_utf8_lossy(&output.stderr))
            }
            ProcessOutcome::Failed(e) => {
                tracing::warn!(agent = %agent.name(), error = %e, "Failed to run the command");
                format!("error: {e}")
            }
        };
        Ok(Some(result))
    }
}

pub struct PythonCommand {
    program: Vec<String>,
    timeout: Duration,
}

impl PythonCommand {
    /// program：解释器及其参数（如 `["python3", "-c"]`），代码作为最后一个参数追加
    pub fn new(program: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            program,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl TypedCommand for PythonCommand {
    type Args = PythonArgs;

    const NAME: &'static str = "PYTHON";
    const DESCRIPTION: &'static str = "Run python code. Use it to perform calculations, text manipulation, or other operations. The interpreter is reset between each invocation, print the values you need.";

    async fn call(&self, agent: &mut Agent, args: PythonArgs) -> Result<Option<String>, AgentError> {
        if args.content.trim().is_empty() {
            return Ok(None);
        }
        let Some((program, program_args)) = self.program.split_first() else {
            return Ok(Some("error: no python interpreter configured".to_string()));
        };
        let mut cmd = Command::new(program);
        cmd.args(program_args)
            .arg(&args.content)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let result = match run_process(agent, cmd, self.timeout).await? {
            ProcessOutcome::Exited(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).into_owned()
            }
            ProcessOutcome::Exited(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.is_empty() {
                    String::from_utf8_lossy(&output.stdout).into_owned()
                } else {
                    stderr.into_owned()
                }
            }
            ProcessOutcome::Failed(e) => format!("error: {e}"),
        };
        Ok(Some(result))
    }
}
