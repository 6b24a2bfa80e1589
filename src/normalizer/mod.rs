use chrono::Utc;
use feed_rs::model;
use feed_rs::parser::{self, Parser};
use html_escape::decode_html_entities;

use crate::app::{DigestError, Result};
use crate::domain::NewEntry;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<NewEntry>,
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    fn parser() -> Parser {
        // Leave missing ids empty so the link fallback below applies instead
        // of a synthesized hash.
        parser::Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .build()
    }

    /// Decode RSS 0.9x/1.0/2.0, Atom or JSON Feed bytes.
    pub fn normalize(&self, body: &[u8]) -> Result<ParsedFeed> {
        let feed = Self::parser()
            .parse(body)
            .map_err(|e| DigestError::Parse(e.to_string()))?;

        let title = feed
            .title
            .map(|t| decode_html_entities(t.content.trim()).to_string())
            .filter(|t| !t.is_empty());

        let mut entries = Vec::with_capacity(feed.entries.len());
        for entry in feed.entries {
            match Self::normalize_entry(entry) {
                Some(parsed) => entries.push(parsed),
                None => tracing::debug!("Skipping entry without guid or link"),
            }
        }

        Ok(ParsedFeed { title, entries })
    }

    fn normalize_entry(entry: model::Entry) -> Option<NewEntry> {
        let link = entry
            .links
            .first()
            .map(|l| l.href.trim().to_string())
            .filter(|l| !l.is_empty());

        let id = entry.id.trim();
        let guid = if id.is_empty() { link.clone()? } else { id.to_string() };

        let content = entry
            .content
            .and_then(|c| c.body)
            .filter(|b| !b.trim().is_empty())
            .or_else(|| entry.summary.map(|s| s.content))
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Some(NewEntry {
            guid,
            title: entry
                .title
                .map(|t| decode_html_entities(t.content.trim()).to_string())
                .filter(|t| !t.is_empty()),
            link,
            author: entry
                .authors
                .first()
                .map(|a| a.name.trim().to_string())
                .filter(|a| !a.is_empty()),
            published_at: entry
                .published
                .or(entry.updated)
                .map(|dt| dt.with_timezone(&Utc)),
            content,
            categories: entry.categories.into_iter().map(|c| c.term).collect(),
        })
    }
}
