//! Web search and content fetch: external collaborators the source finder
//! and summarizer depend on through narrow traits, never on a concrete wire
//! protocol.

use async_trait::async_trait;
use research_domain::error::Result;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Query → ranked result list. A search failure is not fatal to the
/// finder — it returns an empty list and the caller moves to the next
/// query (spec's error-handling table: "web-search failure → empty result
/// list for that query").
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Vec<SearchResult>;
}

/// URL → extracted text, or `None` on any fetch/parse failure. The
/// summarizer falls back to metadata-only context rather than failing the
/// session.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Option<String>;
}

/// A `ContentFetcher` over plain HTTP GET with a crude tag strip — a
/// reasonable default when no dedicated extraction service is configured.
/// Non-HTML content types and non-2xx responses yield `None`.
pub struct HttpContentFetcher {
    client: reqwest::Client,
}

impl HttpContentFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("research-gateway/0.1")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| research_domain::error::Error::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        let response = self.client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        if !content_type.contains("html") && !content_type.contains("text") {
            return None;
        }
        let body = response.text().await.ok()?;
        let text = strip_tags(&body);
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut in_script = false;
    let lower = html.to_lowercase();
    for (i, c) in html.char_indices() {
        if !in_tag && lower[i..].starts_with("<script") {
            in_script = true;
        }
        if !in_tag && lower[i..].starts_with("<style") {
            in_script = true;
        }
        if in_script && lower[i..].starts_with("</script>") {
            in_script = false;
        }
        if in_script && lower[i..].starts_with("</style>") {
            in_script = false;
        }
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag && !in_script => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A `WebSearch` over DuckDuckGo's no-API-key HTML endpoint, the closest
/// Rust-native equivalent to `finder.py`'s `ddgs` dependency. Result rows are
/// pulled out of the markup with a few targeted regexes rather than a full
/// HTML parser, matching this module's `strip_tags` idiom: the endpoint's
/// output is stable enough for that and the corpus carries no parsing crate.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
}

impl DuckDuckGoSearch {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("research-gateway/0.1")
            .timeout(std::time::Duration::from_secs(20))
            .build()
            .map_err(|e| research_domain::error::Error::Http(e.to_string()))?;
        Ok(Self { client })
    }

    fn result_pattern() -> &'static regex::Regex {
        static RE: OnceLock<regex::Regex> = OnceLock::new();
        RE.get_or_init(|| {
            regex::Regex::new(
                r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>.*?class="result__snippet"[^>]*>(.*?)</a>"#,
            )
            .expect("valid duckduckgo result regex")
        })
    }

    /// DuckDuckGo's HTML results wrap each destination in a redirect link of
    /// the form `//duckduckgo.com/l/?uddg=<percent-encoded-url>&rut=...`.
    /// Unwraps that and percent-decodes the inner URL; returns the link
    /// unchanged if it isn't wrapped.
    fn resolve_href(href: &str) -> String {
        let query = match href.split_once("uddg=") {
            Some((_, rest)) => rest,
            None => return href.to_string(),
        };
        let encoded = query.split('&').next().unwrap_or("");
        percent_decode(encoded)
    }

    fn parse_results(html: &str, max_results: u32) -> Vec<SearchResult> {
        Self::result_pattern()
            .captures_iter(html)
            .take(max_results as usize)
            .map(|caps| SearchResult {
                url: Self::resolve_href(caps[1].trim()),
                title: strip_tags(&caps[2]),
                snippet: strip_tags(&caps[3]),
            })
            .filter(|r| !r.url.is_empty())
            .collect()
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: u32) -> Vec<SearchResult> {
        let response = match self
            .client
            .get("https://html.duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(_) => return Vec::new(),
        };
        if !response.status().is_success() {
            return Vec::new();
        }
        match response.text().await {
            Ok(body) => Self::parse_results(&body, max_results),
            Err(_) => Vec::new(),
        }
    }
}

/// Decodes `%XX` escapes and `+` (space) in a single query-parameter value.
/// Minimal by design: the only input this module ever feeds it is
/// DuckDuckGo's own `uddg` redirect parameter, not general URL text.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// A deterministic `WebSearch` test double, grounded on the same
/// canned-response shape as [`research_providers::ScriptedTransport`]: one
/// result set consumed per call, in order.
pub struct ScriptedSearch {
    batches: Mutex<Vec<Vec<SearchResult>>>,
}

impl ScriptedSearch {
    pub fn new(batches: Vec<Vec<SearchResult>>) -> Self {
        Self {
            batches: Mutex::new(batches),
        }
    }
}

#[async_trait]
impl WebSearch for ScriptedSearch {
    async fn search(&self, _query: &str, max_results: u32) -> Vec<SearchResult> {
        let mut batches = self.batches.lock().expect("scripted search lock");
        if batches.is_empty() {
            return Vec::new();
        }
        let mut batch = batches.remove(0);
        batch.truncate(max_results as usize);
        batch
    }
}

/// A deterministic `ContentFetcher` test double: a fixed string per URL,
/// or `None` for unlisted URLs (simulating a fetch failure).
pub struct ScriptedFetcher {
    pages: std::collections::HashMap<String, String>,
}

impl ScriptedFetcher {
    pub fn new(pages: std::collections::HashMap<String, String>) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Option<String> {
        self.pages.get(url).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_tags_removes_markup_and_scripts() {
        let html = "<html><head><script>evil()</script></head><body><p>Hello <b>world</b></p></body></html>";
        assert_eq!(strip_tags(html), "Hello world");
    }

    #[tokio::test]
    async fn scripted_search_consumes_batches_in_order() {
        let search = ScriptedSearch::new(vec![vec![SearchResult {
            title: "A".into(),
            url: "https://a.example".into(),
            snippet: "a".into(),
        }]]);
        let first = search.search("q", 5).await;
        assert_eq!(first.len(), 1);
        let second = search.search("q", 5).await;
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn scripted_fetcher_returns_none_for_unknown_url() {
        let fetcher = ScriptedFetcher::new(std::collections::HashMap::new());
        assert!(fetcher.fetch("https://missing.example").await.is_none());
    }

    #[test]
    fn percent_decode_unwraps_escapes_and_plus() {
        assert_eq!(percent_decode("https%3A%2F%2Fexample.com%2Fa%20b"), "https://example.com/a b");
        assert_eq!(percent_decode("a+b+c"), "a b c");
    }

    #[test]
    fn duckduckgo_parse_results_extracts_title_url_snippet() {
        let html = r#"
            <div class="result results_links results_links_deep web-result">
                <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F&amp;rut=1">
                    The Rust Programming Language
                </a>
                <a class="result__snippet" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust-lang.org%2F">
                    A language empowering everyone to build reliable software.
                </a>
            </div>
        "#;
        let results = DuckDuckGoSearch::parse_results(html, 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "https://www.rust-lang.org/");
        assert_eq!(results[0].title, "The Rust Programming Language");
        assert_eq!(results[0].snippet, "A language empowering everyone to build reliable software.");
    }

    #[test]
    fn duckduckgo_parse_results_respects_max_results() {
        let one = r#"<a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fa.example%2F">A</a>
            <a class="result__snippet" href="x">snippet a</a>"#;
        let html = format!("{one}{one}{one}");
        let results = DuckDuckGoSearch::parse_results(&html, 2);
        assert_eq!(results.len(), 2);
    }
}
