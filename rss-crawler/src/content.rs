use crate::fetcher::Fetcher;
use crate::types::ContentFetcher;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::debug;

// Paragraphs shorter than this are usually captions, bylines or share links.
const MIN_PARAGRAPH_CHARS: usize = 40;

/// Reader-mode content fetcher: downloads the article page and keeps only the
/// text of its body paragraphs.
pub struct HttpContentFetcher {
    fetcher: Arc<Fetcher>,
}

impl HttpContentFetcher {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, url: &str) -> anyhow::Result<String> {
        let html = self.fetcher.fetch_page(url).await?;
        let text = extract_article_text(&html);
        debug!("Extracted {} characters from {}", text.chars().count(), url);
        Ok(text)
    }
}

/// Extracts the readable article text of a page.
///
/// Tries, in order: paragraphs inside `<article>`, paragraphs inside
/// `<main>`, the JSON-LD `articleBody`, and finally every paragraph of the
/// page. Returns an empty string when nothing usable is found.
pub fn extract_article_text(html: &str) -> String {
    let document = Html::parse_document(html);

    for scope in ["article", "main", "[role='main']"] {
        if let Ok(selector) = Selector::parse(&format!("{} p", scope)) {
            let text = join_paragraphs(document.select(&selector));
            if !text.is_empty() {
                return text;
            }
        }
    }

    if let Some(body) = json_ld_article_body(&document) {
        return body;
    }

    match Selector::parse("p") {
        Ok(selector) => join_paragraphs(document.select(&selector)),
        Err(_) => String::new(),
    }
}

/// Flattens an HTML fragment (as found in feed `content:encoded`) to plain
/// text with collapsed whitespace.
pub fn html_to_text(fragment: &str) -> String {
    let fragment = Html::parse_fragment(fragment);
    normalize_whitespace(&fragment.root_element().text().collect::<Vec<_>>().join(" "))
}

fn join_paragraphs<'a>(paragraphs: impl Iterator<Item = ElementRef<'a>>) -> String {
    paragraphs
        .map(|p| normalize_whitespace(&p.text().collect::<String>()))
        .filter(|text| text.chars().count() >= MIN_PARAGRAPH_CHARS)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn json_ld_article_body(document: &Html) -> Option<String> {
    let selector = Selector::parse("script[type='application/ld+json']").ok()?;

    for script in document.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(json) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
            continue;
        };

        // Either a single object or a list / @graph of objects.
        let candidates: Vec<&serde_json::Value> = match &json {
            serde_json::Value::Array(items) => items.iter().collect(),
            serde_json::Value::Object(obj) => match obj.get("@graph") {
                Some(serde_json::Value::Array(items)) => items.iter().collect(),
                _ => vec![&json],
            },
            _ => continue,
        };

        for candidate in candidates {
            if let Some(body) = candidate.get("articleBody").and_then(|b| b.as_str()) {
                let body = normalize_whitespace(body);
                if !body.is_empty() {
                    return Some(body);
                }
            }
        }
    }

    None
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
