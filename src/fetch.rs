//! Page text retrieval. Fetching is strictly best-effort: any failure
//! (network, status, content type, parse) yields an empty string and the
//! caller degrades to title-only analysis.

use std::time::Duration;

use scraper::{Html, Node};
use url::Url;

use crate::config::FetchConfig;

/// URL path extensions that never contain analyzable text.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "bmp", "pdf", "zip", "tar", "gz", "bz2",
    "xz", "7z", "rar", "mp3", "mp4", "mkv", "avi", "mov", "wav", "flac", "ogg", "exe", "dmg",
    "iso", "deb", "rpm", "apk", "woff", "woff2", "ttf",
];

pub struct PageFetcher {
    config: FetchConfig,
    client: Option<reqwest::blocking::Client>,
}

impl PageFetcher {
    pub fn new(config: FetchConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|err| log::warn!("failed to build http client: {err}"))
            .ok();
        PageFetcher { config, client }
    }

    /// Fetches and extracts the visible text of a page. Returns an empty
    /// string for binary URLs, non-HTML responses, and every failure mode.
    pub fn fetch_page_text(&self, url: &str) -> String {
        if is_binary_url(url) {
            log::debug!("skipping binary url {url}");
            return String::new();
        }

        let Some(client) = &self.client else {
            return String::new();
        };

        let text = match self.get_html(client, url) {
            Some(html) => visible_text(&html),
            None => String::new(),
        };

        if self.config.polite_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.polite_delay_ms));
        }

        cap_words(&text, self.config.max_words)
    }

    fn get_html(&self, client: &reqwest::blocking::Client, url: &str) -> Option<String> {
        let response = match client.get(url).send() {
            Ok(response) => response,
            Err(err) => {
                log::debug!("fetch failed for {url}: {err}");
                return None;
            }
        };
        if !response.status().is_success() {
            log::debug!("fetch for {url} returned {}", response.status());
            return None;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        if !content_type.contains("text/html") && !content_type.contains("text/plain") {
            log::debug!("skipping {url}: content-type {content_type:?}");
            return None;
        }

        response.text().ok()
    }
}

/// True when the URL path ends in an extension that cannot hold page text.
pub fn is_binary_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path().to_ascii_lowercase();
    match path.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// Visible text of an HTML document: every text node outside of script,
/// style, noscript, and head subtrees, whitespace-normalized.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut chunks = Vec::new();
    collect_text(document.tree.root(), &mut chunks);
    chunks.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(node: ego_tree::NodeRef<'_, Node>, out: &mut Vec<String>) {
    for child in node.children() {
        match child.value() {
            Node::Element(element) => {
                let name = element.name();
                if matches!(name, "script" | "style" | "noscript" | "head" | "template") {
                    continue;
                }
                collect_text(child, out);
            }
            Node::Text(text) => {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    out.push(trimmed.to_string());
                }
            }
            _ => {}
        }
    }
}

fn cap_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        words[..max_words].join(" ")
    } else {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_binary_url() {
        assert!(is_binary_url("https://example.com/report.pdf"));
        assert!(is_binary_url("https://example.com/a/b/archive.TAR"));
        assert!(!is_binary_url("https://example.com/article"));
        assert!(!is_binary_url("https://example.com/page.html"));
        // Query strings do not make a page binary.
        assert!(!is_binary_url("https://example.com/view?file=x.pdf"));
    }

    #[test]
    fn test_visible_text_strips_non_content() {
        let html = r#"
            <html>
              <head><title>ignored</title><style>.x { color: red }</style></head>
              <body>
                <script>var hidden = "nope";</script>
                <h1>Heading</h1>
                <noscript>enable js</noscript>
                <p>First   paragraph
                   text.</p>
              </body>
            </html>"#;
        let text = visible_text(html);
        assert_eq!(text, "Heading First paragraph text.");
    }

    #[test]
    fn test_visible_text_empty_document() {
        assert_eq!(visible_text(""), "");
        assert_eq!(visible_text("<html><body></body></html>"), "");
    }

    #[test]
    fn test_cap_words() {
        assert_eq!(cap_words("one two three four", 2), "one two");
        assert_eq!(cap_words("one two", 10), "one two");
        assert_eq!(cap_words("", 10), "");
    }
}
