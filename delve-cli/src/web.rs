//! HTTP collaborators: DuckDuckGo instant-answer search, a reqwest page
//! fetcher and an HTML-aware document parser.

use async_trait::async_trait;
use delve_core::config::WebConfig;
use delve_core::error::CollaboratorError;
use delve_core::research::{
    DocumentParser, EvidenceChunk, PageContent, PageFetcher, PlainTextParser, SearchHit,
    WebSearch,
};
use std::time::Duration;
use tracing::debug;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

fn build_client(config: &WebConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(config.user_agent.clone())
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
}

/// Search backed by the DuckDuckGo instant-answer API (no API key).
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    endpoint: String,
    max_results: usize,
}

impl DuckDuckGoSearch {
    pub fn new(config: &WebConfig, max_results: usize) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(config)?,
            endpoint: config.search_endpoint.clone(),
            max_results,
        })
    }

    fn request_url(&self, query: &str) -> String {
        format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            self.endpoint,
            urlencoding::encode(query)
        )
    }
}

/// Convert an instant-answer response into ranked hits.
///
/// The abstract comes first, then related topics (flattening topic groups),
/// then the `Results` array. Entries without a URL are skipped.
pub fn parse_instant_answer(body: &serde_json::Value, max_results: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = Vec::new();
    let mut push = |url: &str, title: &str, snippet: &str| {
        if url.is_empty() || hits.iter().any(|h| h.url == url) {
            return;
        }
        hits.push(SearchHit {
            url: url.to_string(),
            title: title.to_string(),
            snippet: snippet.to_string(),
        });
    };

    let field = |v: &serde_json::Value, key: &str| -> String {
        v.get(key)
            .and_then(|f| f.as_str())
            .unwrap_or_default()
            .to_string()
    };

    let abstract_text = field(body, "AbstractText");
    if !abstract_text.is_empty() {
        push(
            &field(body, "AbstractURL"),
            &field(body, "Heading"),
            &abstract_text,
        );
    }

    let mut entries: Vec<&serde_json::Value> = Vec::new();
    for key in ["RelatedTopics", "Results"] {
        let Some(items) = body.get(key).and_then(|v| v.as_array()) else {
            continue;
        };
        for item in items {
            match item.get("Topics").and_then(|t| t.as_array()) {
                Some(group) => entries.extend(group.iter()),
                None => entries.push(item),
            }
        }
    }
    for entry in entries {
        let text = field(entry, "Text");
        // Topic text is "Title - description"; keep the head as the title.
        let title = text.split(" - ").next().unwrap_or_default().to_string();
        push(&field(entry, "FirstURL"), &title, &text);
    }

    hits.truncate(max_results);
    hits
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search_web(&self, query: &str) -> Result<Vec<SearchHit>, CollaboratorError> {
        let unavailable = |message: String| CollaboratorError::SearchUnavailable {
            query: query.to_string(),
            message,
        };

        let response = self
            .client
            .get(self.request_url(query))
            .send()
            .await
            .map_err(|e| unavailable(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| unavailable(format!("invalid response: {e}")))?;

        let hits = parse_instant_answer(&body, self.max_results);
        debug!(query = %query, hits = hits.len(), "Search complete");
        Ok(hits)
    }
}

/// Plain HTTP(S) page fetcher.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_page_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &WebConfig) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(config)?,
            max_page_bytes: config.max_page_bytes,
        })
    }
}

/// Cut `text` to at most `max_bytes`, backing off to a char boundary.
fn truncate_bytes(mut text: String, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text;
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, url: &str) -> Result<PageContent, CollaboratorError> {
        let failed = |message: String| CollaboratorError::FetchFailed {
            url: url.to_string(),
            message,
        };

        let parsed = url::Url::parse(url).map_err(|e| failed(format!("invalid URL: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(failed(format!("unsupported scheme '{}'", parsed.scheme())));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}")));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response
            .text()
            .await
            .map_err(|e| failed(format!("failed to read body: {e}")))?;

        Ok(PageContent {
            url: url.to_string(),
            content_type,
            body: truncate_bytes(body, self.max_page_bytes),
        })
    }
}

/// Parser that strips HTML before chunking; other content is chunked as is.
#[derive(Default)]
pub struct HtmlTextParser {
    chunker: PlainTextParser,
}

impl HtmlTextParser {
    pub fn new() -> Self {
        Self::default()
    }
}

fn looks_like_html(page: &PageContent) -> bool {
    match page.content_type.as_deref() {
        Some(ct) => ct.contains("text/html") || ct.contains("application/xhtml"),
        None => page.body.trim_start().starts_with('<'),
    }
}

/// Readable text of an HTML document, one blank line between blocks.
pub fn html_to_text(html: &str) -> String {
    const BLOCK_TAGS: &[&str] = &[
        "p", "br", "div", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr", "section", "article",
        "blockquote", "pre",
    ];

    let mut text = String::with_capacity(html.len() / 2);
    let mut tag = String::new();
    let mut in_tag = false;
    let mut reading_name = false;
    let mut skipping: Option<&'static str> = None;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                reading_name = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag.to_lowercase();
                let (closing, bare) = match name.strip_prefix('/') {
                    Some(rest) => (true, rest.to_string()),
                    None => (false, name.clone()),
                };
                match (skipping, bare.as_str()) {
                    (Some(skip), b) if closing && b == skip => skipping = None,
                    (None, "script") if !closing => skipping = Some("script"),
                    (None, "style") if !closing => skipping = Some("style"),
                    (None, "noscript") if !closing => skipping = Some("noscript"),
                    _ => {}
                }
                if skipping.is_none() && BLOCK_TAGS.contains(&bare.as_str()) {
                    text.push_str("\n\n");
                }
            }
            _ if in_tag => {
                if reading_name && (ch.is_ascii_alphanumeric() || (ch == '/' && tag.is_empty())) {
                    tag.push(ch);
                } else {
                    reading_name = false;
                }
            }
            _ if skipping.is_some() => {}
            _ => text.push(ch),
        }
    }

    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    text.split("\n\n")
        .map(|block| block.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl DocumentParser for HtmlTextParser {
    async fn parse_document(
        &self,
        page: &PageContent,
        title: &str,
    ) -> Result<Vec<EvidenceChunk>, CollaboratorError> {
        let text = if looks_like_html(page) {
            html_to_text(&page.body)
        } else {
            page.body.clone()
        };
        if text.trim().is_empty() {
            return Err(CollaboratorError::ParseFailed {
                url: page.url.clone(),
                message: "no readable text".into(),
            });
        }
        Ok(self.chunker.chunk_text(&text, &page.url, title))
    }
}
