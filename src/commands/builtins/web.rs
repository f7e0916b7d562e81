//! SEARCH / GET：在线检索与网页抓取
//!
//! 来源：google（Custom Search API，需 GOOGLE_API_KEY / GOOGLE_SEARCH_ID）、wikipedia（条目导言，
//! 查不到时退回搜索结果）、wikipedia-search、web（抓取网页并用 html2text 提取正文）。
//! 网络失败以文本返回给模型；结果超过 max_result_chars 时截断。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::{Agent, Role};
use crate::commands::TypedCommand;
use crate::config::SearchSection;
use crate::core::AgentError;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5.1 Safari/605.1.15";
const WIKIPEDIA_API: &str = "https://en.wikipedia.org/w/api.php";
const GOOGLE_SEARCH_API: &str = "https://customsearch.googleapis.com/customsearch/v1";
const NO_RESULTS: &str = "No results found.";

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchItem {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub snippet: String,
}

/// 检索结果：正文或结果列表
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResult {
    Text(String),
    Items(Vec<SearchItem>),
}

impl SearchResult {
    fn is_empty(&self) -> bool {
        match self {
            SearchResult::Text(t) => t.trim().is_empty(),
            SearchResult::Items(items) => items.is_empty(),
        }
    }

    fn into_text(self) -> String {
        match self {
            SearchResult::Text(t) => t,
            SearchResult::Items(items) => {
                serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
            }
        }
    }
}

/// 共享 HTTP 客户端（SEARCH 与 GET 共用）
pub struct WebClient {
    client: Client,
    max_result_chars: usize,
    google_api_key: Option<String>,
    google_search_id: Option<String>,
}

impl WebClient {
    pub fn new(cfg: &SearchSection) -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            max_result_chars: cfg.max_result_chars,
            google_api_key: std::env::var("GOOGLE_API_KEY").ok().filter(|k| !k.is_empty()),
            google_search_id: std::env::var("GOOGLE_SEARCH_ID").ok().filter(|k| !k.is_empty()),
        })
    }

    async fn get_json(&self, url: &str, params: &[(&str, &str)]) -> Result<Value, String> {
        let resp = self
            .client
            .get(url)
            .query(params)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| format!("Invalid JSON response: {e}"))
    }

    /// 按来源检索；未知来源按 google 检索 `"{query} {source}"`
    pub async fn search(&self, source: &str, query: &str) -> Result<SearchResult, String> {
        match source.trim().to_ascii_lowercase().as_str() {
            "" | "google" => self.google(query).await,
            "wikipedia" => self.wikipedia(query).await,
            "wikipedia-search" => self.wikipedia_search(query).await,
            "web" => Ok(SearchResult::Text(self.scrape(query).await?)),
            other => {
                tracing::warn!(source = %other, "Unknown search source, falling back to google");
                self.google(&format!("{query} {other}")).await
            }
        }
    }

    async fn google(&self, query: &str) -> Result<SearchResult, String> {
        let (Some(key), Some(cx)) = (&self.google_api_key, &self.google_search_id) else {
            return Err("google search is not configured (GOOGLE_API_KEY / GOOGLE_SEARCH_ID)".into());
        };
        let json = self
            .get_json(GOOGLE_SEARCH_API, &[("q", query), ("key", key), ("cx", cx)])
            .await?;
        let items = json["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| SearchItem {
                        title: str_field(item, "title"),
                        link: item["link"].as_str().map(String::from),
                        snippet: str_field(item, "snippet"),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(SearchResult::Items(items))
    }

    async fn wikipedia_search(&self, query: &str) -> Result<SearchResult, String> {
        let json = self
            .get_json(
                WIKIPEDIA_API,
                &[
                    ("action", "query"),
                    ("format", "json"),
                    ("list", "search"),
                    ("srsearch", query),
                    ("srlimit", "12"),
                ],
            )
            .await?;
        let items = json["query"]["search"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|item| SearchItem {
                        title: str_field(item, "title"),
                        link: None,
                        snippet: html_to_text(&str_field(item, "snippet")),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(SearchResult::Items(items))
    }

    /// 条目导言（纯文本）；条目不存在时退回搜索结果
    async fn wikipedia(&self, title: &str) -> Result<SearchResult, String> {
        let json = self
            .get_json(
                WIKIPEDIA_API,
                &[
                    ("action", "query"),
                    ("format", "json"),
                    ("titles", title),
                    ("prop", "extracts"),
                    ("formatversion", "2"),
                    ("exintro", "1"),
                    ("explaintext", "1"),
                ],
            )
            .await?;
        let extract = json["query"]["pages"][0]["extract"]
            .as_str()
            .unwrap_or_default();
        if !extract.trim().is_empty() {
            return Ok(SearchResult::Text(self.truncate(extract.to_string())));
        }
        self.wikipedia_search(title).await
    }

    /// 抓取网页并提取可读正文
    pub async fn scrape(&self, url: &str) -> Result<String, String> {
        let resp = self
            .client
            .get(url.trim())
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {e}"))?;
        let body = body.trim_start_matches('\u{FEFF}');
        Ok(self.truncate(clean_text(&html_to_text(body))))
    }

    fn truncate(&self, text: String) -> String {
        if text.chars().count() > self.max_result_chars {
            text.chars().take(self.max_result_chars).collect::<String>() + "\n...[truncated]"
        } else {
            text
        }
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value[key].as_str().unwrap_or_default().to_string()
}

fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) => text,
        Err(_) => html.to_string(),
    }
}

/// 去掉空段落，段落内首尾空白
fn clean_text(text: &str) -> String {
    text.trim()
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SearchArgs {
    /// The source to query ('google', 'wikipedia', 'wikipedia-search' or 'web')
    pub source: String,
    /// The query to send to the source
    pub query: String,
    /// The information to extract from the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
}

pub struct SearchCommand {
    web: Arc<WebClient>,
}

impl SearchCommand {
    pub fn new(web: Arc<WebClient>) -> Self {
        Self { web }
    }
}

#[async_trait]
impl TypedCommand for SearchCommand {
    type Args = SearchArgs;

    const NAME: &'static str = "SEARCH";
    const DESCRIPTION: &'static str = "Search for information online and get a list of results.";

    async fn call(&self, agent: &mut Agent, args: SearchArgs) -> Result<Option<String>, AgentError> {
        tracing::info!(agent = %agent.name(), source = %args.source, query = %args.query, "SEARCH");
        let text = match self.web.search(&args.source, &args.query).await {
            Ok(result) if result.is_empty() => NO_RESULTS.to_string(),
            Ok(result) => result.into_text(),
            Err(e) => format!("Error: {e}"),
        };
        Ok(Some(text))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GetArgs {
    /// The source to get the content from ('web' or 'wikipedia')
    pub source: String,
    /// The identifier of the content to get (url or wikipedia page name)
    pub id: String,
    /// The information to extract from the result. This is a prompt that will be provided to the search agent with the result
    pub request: String,
}

pub struct GetCommand {
    web: Arc<WebClient>,
}

impl GetCommand {
    pub fn new(web: Arc<WebClient>) -> Self {
        Self { web }
    }
}

#[async_trait]
impl TypedCommand for GetCommand {
    type Args = GetArgs;

    const NAME: &'static str = "GET";
    const DESCRIPTION: &'static str = "Get information from a specific piece of content online, like any webpage or wikipedia page. The result is provided to the search agent with the request as a prompt";

    async fn call(&self, agent: &mut Agent, args: GetArgs) -> Result<Option<String>, AgentError> {
        tracing::info!(agent = %agent.name(), source = %args.source, id = %args.id, "GET");
        let fetched = if args.source.trim().eq_ignore_ascii_case("web") {
            self.web.scrape(&args.id).await.map(SearchResult::Text)
        } else {
            self.web.wikipedia(&args.id).await
        };
        let content = match fetched {
            Ok(result) if result.is_empty() => return Ok(Some(NO_RESULTS.to_string())),
            Ok(result) => result.into_text(),
            Err(e) => {
                tracing::warn!(agent = %agent.name(), error = %e, "GET failed");
                return Ok(Some(NO_RESULTS.to_string()));
            }
        };
        agent
            .assign("search_agent", Some(&args.request), vec![content], Role::Search)
            .await
    }
}
