//! Web fetch tool: retrieve a page as plain text.
//!
//! When a fetch proxy is configured it is asked first (`GET {proxy}/fetch?url=`);
//! any proxy failure falls back to a direct request. HTML is rendered to text
//! and the result is capped at a configurable number of characters.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use twin_core::error::ToolError;
use twin_core::tool::{
    Tool, ToolArgs, ToolFailure, ToolKind, ToolMetadata, ToolResult, parse_args,
};

#[derive(Debug, Deserialize)]
struct WebFetchArgs {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    status_code: Option<u16>,
}

struct Page {
    text: String,
    status: u16,
    title: Option<String>,
    source: &'static str,
}

pub struct WebFetchTool {
    client: reqwest::Client,
    proxy: Option<String>,
    max_chars: usize,
    timeout: Duration,
}

impl WebFetchTool {
    pub fn new(proxy: Option<String>, max_chars: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("twin/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            proxy: proxy.map(|p| p.trim_end_matches('/').to_string()),
            max_chars: max_chars.max(1),
            timeout,
        }
    }

    async fn via_proxy(&self, proxy: &str, url: &str) -> Result<Page, String> {
        let response = self
            .client
            .get(format!("{proxy}/fetch"))
            .query(&[("url", url)])
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("proxy returned {}", response.status()));
        }
        let body: ProxyResponse = response.json().await.map_err(|e| e.to_string())?;
        debug!(url = body.url.as_deref().unwrap_or(url), "Fetched via proxy");
        Ok(Page {
            text: body.text,
            status: body.status_code.unwrap_or(200),
            title: body.title,
            source: "proxy",
        })
    }

    async fn direct(&self, url: &str) -> Result<Page, ToolError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout {
                    tool_name: "web_fetch".into(),
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                ToolError::ExecutionFailed {
                    tool_name: "web_fetch".into(),
                    reason: format!("Request to {url} failed: {e}"),
                }
            }
        })?;

        let status = response.status().as_u16();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let bytes = response.bytes().await.map_err(|e| ToolError::ExecutionFailed {
            tool_name: "web_fetch".into(),
            reason: e.to_string(),
        })?;

        let text = if is_html {
            html2text::from_read(bytes.as_ref(), 100).unwrap_or_default()
        } else {
            String::from_utf8_lossy(&bytes).into_owned()
        };

        Ok(Page {
            text,
            status,
            title: None,
            source: "direct",
        })
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new(None, 25_000, Duration::from_secs(20))
    }
}

/// Cap `text` at `max` characters, reporting whether anything was cut.
fn cap(text: String, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut capped = text[..idx].to_string();
            capped.push_str(&format!("\n\n[Content truncated to {max} characters]"));
            (capped, true)
        }
        None => (text, false),
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WebFetch
    }

    fn description(&self) -> &str {
        "Fetch a web page over http or https and return its text content."
    }

    fn argument_schema(&self) -> Vec<(&'static str, &'static str)> {
        vec![("url", "string")]
    }

    async fn execute(&self, args: ToolArgs) -> Result<ToolResult, ToolError> {
        let args: WebFetchArgs = parse_args(args)?;
        let url = args.url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidArguments(
                "URL must start with http:// or https://".into(),
            ));
        }

        let proxied = match &self.proxy {
            Some(proxy) => match self.via_proxy(proxy, url).await {
                Ok(page) => Some(page),
                Err(reason) => {
                    warn!(url, reason = %reason, "Fetch proxy failed, falling back to direct");
                    None
                }
            },
            None => None,
        };
        let page = match proxied {
            Some(page) => page,
            None => self.direct(url).await?,
        };

        let (mut body, truncated) = cap(page.text, self.max_chars);
        if let Some(title) = page.title.filter(|t| !t.is_empty()) {
            body = format!("# {title}\n\n{body}");
        }
        let metadata = ToolMetadata {
            source: Some(page.source.to_string()),
            truncated,
            ..Default::default()
        };

        if page.status >= 400 {
            return Ok(ToolResult::fail(
                ToolFailure::Execution,
                format!("HTTP {} fetching {url}", page.status),
            )
            .with_output(body)
            .with_metadata(metadata));
        }
        Ok(ToolResult::ok(body).with_metadata(metadata))
    }
}
