use crate::content::html_to_text;
use crate::types::{CrawlerError, FeedItem, Result};
use chrono::Utc;
use feed_rs::parser;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// Turns RSS / Atom / JSON Feed documents into normalized feed items.
pub struct FeedParser;

impl FeedParser {
    pub fn parse_feed(content: &str) -> Result<ParsedFeed> {
        debug!("Parsing feed content ({} bytes)", content.len());

        let feed = parser::parse(content.as_bytes())
            .map_err(|e| CrawlerError::Parse(format!("Failed to parse feed: {}", e)))?;

        let title = feed.title.map(|t| t.content);

        let items: Vec<FeedItem> = feed.entries.into_iter().filter_map(Self::parse_entry).collect();

        info!("Parsed feed with {} entries", items.len());

        Ok(ParsedFeed {
            title,
            items,
        })
    }

    fn parse_entry(entry: feed_rs::model::Entry) -> Option<FeedItem> {
        // Entries without a link have no canonical URL to deduplicate on.
        let Some(url) = entry.links.first().map(|l| l.href.trim().to_string()).filter(|u| !u.is_empty()) else {
            debug!("Skipping entry {} without link", entry.id);
            return None;
        };

        let title = entry
            .title
            .map(|t| html_to_text(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled".to_string());

        // Prefer full content over the summary.
        let raw = entry
            .content
            .and_then(|c| c.body)
            .or_else(|| entry.summary.map(|s| s.content))
            .unwrap_or_default();

        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        Some(FeedItem {
            title,
            url,
            content: html_to_text(&raw),
            published_at,
        })
    }

    /// Cheap sniffing used to give a better error than the parser's for
    /// pages that are obviously not feeds.
    pub fn is_valid_feed_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();

        let has_feed_indicators = content_lower.contains("<rss")
            || content_lower.contains("<feed")
            || content_lower.contains("<rdf:rdf")
            || content_lower.contains("<channel");
        let looks_like_json_feed = content.trim_start().starts_with('{') && content_lower.contains("jsonfeed.org");

        has_feed_indicators || looks_like_json_feed
    }
}
