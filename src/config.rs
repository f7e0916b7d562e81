//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ARGENT__*` 覆盖（双下划线表示嵌套，如 `ARGENT__LLM__BASE_URL=...`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tools: ToolsSection,
}

/// [app] 段：运行目录根、默认模型
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    /// 每次运行在此目录下新建独立子目录；未设置时用当前目录
    pub runs_root: Option<PathBuf>,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            runs_root: None,
            model: default_model(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

/// [llm] 段：端点、密钥、重试与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    pub base_url: Option<String>,
    /// 未设置时读取 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_request_timeout() -> u64 {
    120
}

/// [server] 段：WebSocket 监听地址
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

/// [tools] 段：命令超时、Python 解释器、Search 限制
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次 RUN / PYTHON 调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// PYTHON 命令的解释器与参数，代码作为最后一个参数追加
    #[serde(default = "default_python_command")]
    pub python_command: Vec<String>,
    #[serde(default)]
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            python_command: default_python_command(),
            search: SearchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    120
}

fn default_python_command() -> Vec<String> {
    vec!["python3".into(), "-c".into()]
}

/// [tools.search] 段：抓取超时与结果最大字符数
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout_secs(),
            max_result_chars: default_max_result_chars(),
        }
    }
}

fn default_search_timeout_secs() -> u64 {
    15
}

fn default_max_result_chars() -> usize {
    8000
}

/// 从 config 目录加载配置，环境变量 ARGENT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ARGENT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ARGENT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.app.model, "gpt-4o");
        assert_eq!(cfg.llm.max_retries, 3);
        assert_eq!(cfg.llm.max_tokens, 1000);
        assert_eq!(cfg.tools.python_command, vec!["python3", "-c"]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("argent.toml");
        std::fs::write(&path, "[llm]\nmax_retries = 5\n[server]\nbind_addr = \"0.0.0.0:9000\"\n").unwrap();
        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.max_retries, 5);
        assert_eq!(cfg.llm.max_tokens, 1000);
        assert_eq!(cfg.server.bind_addr, "0.0.0.0:9000");
    }
}
