//! Hierarchical subscription list backed by an OPML file.
//!
//! The tree keeps whatever nesting it was loaded with, but folder queries
//! and folder targets of add/move are one level deep: a feed nested below a
//! top-level folder is reported as belonging to that top-level folder.

pub mod file;

use std::collections::HashSet;

use hard_xml::XmlRead;
use opml::{Body, Head, OPML};
use serde::Serialize;

use crate::app::{DigestError, Result};

pub use file::OutlineFile;

pub const DEFAULT_TITLE: &str = "rssdigest subscriptions";
pub const FEED_TYPE_RSS: &str = "rss";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRef {
    pub url: String,
    pub title: String,
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Folder { name: String, children: Vec<Node> },
    Feed(FeedRef),
}

/// A feed reference flattened with its top-level folder ("" for root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutlineFeed {
    pub url: String,
    pub title: String,
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outline {
    title: String,
    nodes: Vec<Node>,
    urls: HashSet<String>,
}

impl Default for Outline {
    fn default() -> Self {
        Self::new(DEFAULT_TITLE)
    }
}

impl Outline {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            nodes: Vec::new(),
            urls: HashSet::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| DigestError::Serialization(format!("outline is not UTF-8: {e}")))?;

        // An empty subscription list has no outline elements, which the opml
        // crate rejects; read it again without that check to keep the head.
        let document = match OPML::from_str(text) {
            Err(opml::Error::BodyHasNoOutlines) => {
                <OPML as XmlRead>::from_str(text).map_err(opml::Error::from)?
            }
            parsed => parsed?,
        };
        let title = document
            .head
            .and_then(|h| h.title)
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        let mut outline = Self::new(title);
        outline.nodes = document
            .body
            .outlines
            .into_iter()
            .map(Self::node_from_opml)
            .collect();
        outline.rebuild_index();
        Ok(outline)
    }

    fn node_from_opml(element: opml::Outline) -> Node {
        match element.xml_url {
            Some(url) if !url.is_empty() => Node::Feed(FeedRef {
                title: element
                    .title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| element.text.clone()),
                url,
                kind: element.r#type,
            }),
            _ => Node::Folder {
                name: element.text,
                children: element
                    .outlines
                    .into_iter()
                    .map(Self::node_from_opml)
                    .collect(),
            },
        }
    }

    fn node_to_opml(node: &Node) -> opml::Outline {
        match node {
            Node::Feed(feed) => opml::Outline {
                text: feed.title.clone(),
                title: Some(feed.title.clone()),
                r#type: feed.kind.clone(),
                xml_url: Some(feed.url.clone()),
                ..Default::default()
            },
            Node::Folder { name, children } => opml::Outline {
                text: name.clone(),
                outlines: children.iter().map(Self::node_to_opml).collect(),
                ..Default::default()
            },
        }
    }

    /// Rebuild the URL index from the tree, dropping repeated URLs.
    fn rebuild_index(&mut self) {
        fn walk(nodes: &mut Vec<Node>, seen: &mut HashSet<String>) {
            nodes.retain_mut(|node| match node {
                Node::Feed(feed) => {
                    if seen.insert(feed.url.clone()) {
                        true
                    } else {
                        tracing::warn!("Dropping repeated outline entry for {}", feed.url);
                        false
                    }
                }
                Node::Folder { children, .. } => {
                    walk(children, seen);
                    true
                }
            });
        }

        let mut seen = HashSet::new();
        walk(&mut self.nodes, &mut seen);
        self.urls = seen;
    }

    pub fn to_opml(&self) -> OPML {
        OPML {
            head: Some(Head {
                title: Some(self.title.clone()),
                ..Default::default()
            }),
            body: Body {
                outlines: self.nodes.iter().map(Self::node_to_opml).collect(),
            },
            ..Default::default()
        }
    }

    pub fn write<W: std::io::Write>(&self, writer: &mut W) -> Result<()> {
        let xml = self.to_opml().to_string()?;
        writer.write_all(xml.as_bytes())?;
        Ok(())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn all_feeds(&self) -> Vec<OutlineFeed> {
        fn collect(nodes: &[Node], folder: &str, out: &mut Vec<OutlineFeed>) {
            for node in nodes {
                match node {
                    Node::Feed(feed) => out.push(OutlineFeed {
                        url: feed.url.clone(),
                        title: feed.title.clone(),
                        folder: folder.to_string(),
                    }),
                    Node::Folder { children, .. } => collect(children, folder, out),
                }
            }
        }

        let mut out = Vec::with_capacity(self.urls.len());
        for node in &self.nodes {
            match node {
                Node::Feed(_) => collect(std::slice::from_ref(node), "", &mut out),
                Node::Folder { name, children } => collect(children, name, &mut out),
            }
        }
        out
    }

    pub fn find(&self, url: &str) -> Option<OutlineFeed> {
        if !self.contains(url) {
            return None;
        }
        self.all_feeds().into_iter().find(|f| f.url == url)
    }

    /// Distinct top-level folder names holding at least one feed.
    pub fn folders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for feed in self.all_feeds() {
            if !feed.folder.is_empty() && !names.contains(&feed.folder) {
                names.push(feed.folder);
            }
        }
        names
    }

    pub fn feeds_in_folder(&self, name: &str) -> Vec<OutlineFeed> {
        self.all_feeds()
            .into_iter()
            .filter(|f| f.folder == name)
            .collect()
    }

    fn folder_position(&self, name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| matches!(n, Node::Folder { name: folder, .. } if folder == name))
    }

    /// Ensure a top-level folder exists; returns its position.
    fn ensure_folder(&mut self, name: &str) -> usize {
        if let Some(pos) = self.folder_position(name) {
            return pos;
        }
        self.nodes.push(Node::Folder {
            name: name.to_string(),
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    pub fn add_folder(&mut self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DigestError::InvalidInput("folder name must not be empty".into()));
        }
        self.ensure_folder(name);
        Ok(())
    }

    fn insert(&mut self, feed: FeedRef, folder: &str) {
        self.urls.insert(feed.url.clone());
        let folder = folder.trim();
        if folder.is_empty() {
            self.nodes.push(Node::Feed(feed));
            return;
        }
        let pos = self.ensure_folder(folder);
        if let Node::Folder { children, .. } = &mut self.nodes[pos] {
            children.push(Node::Feed(feed));
        }
    }

    pub fn add_feed(&mut self, url: &str, title: &str, folder: &str) -> Result<()> {
        if self.contains(url) {
            return Err(DigestError::Duplicate(url.to_string()));
        }
        let title = if title.trim().is_empty() { url } else { title };
        self.insert(
            FeedRef {
                url: url.to_string(),
                title: title.to_string(),
                kind: Some(FEED_TYPE_RSS.to_string()),
            },
            folder,
        );
        Ok(())
    }

    /// Detach a feed from the tree. Returns the reference and the name of the
    /// top-level folder it was under.
    fn detach(&mut self, url: &str) -> Option<(FeedRef, String)> {
        fn is_feed(node: &Node, url: &str) -> bool {
            matches!(node, Node::Feed(feed) if feed.url == url)
        }

        fn take(nodes: &mut Vec<Node>, url: &str) -> Option<FeedRef> {
            if let Some(pos) = nodes.iter().position(|n| is_feed(n, url)) {
                return match nodes.remove(pos) {
                    Node::Feed(feed) => Some(feed),
                    Node::Folder { .. } => None,
                };
            }
            nodes.iter_mut().find_map(|node| match node {
                Node::Folder { children, .. } => take(children, url),
                Node::Feed(_) => None,
            })
        }

        if !self.contains(url) {
            return None;
        }

        let found = match self.nodes.iter().position(|n| is_feed(n, url)) {
            Some(pos) => match self.nodes.remove(pos) {
                Node::Feed(feed) => Some((feed, String::new())),
                Node::Folder { .. } => None,
            },
            None => self.nodes.iter_mut().find_map(|node| match node {
                Node::Folder { name, children } => {
                    take(children, url).map(|feed| (feed, name.clone()))
                }
                Node::Feed(_) => None,
            }),
        };

        if found.is_some() {
            self.urls.remove(url);
        }
        found
    }

    fn prune_folder(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        if let Some(pos) = self.folder_position(name) {
            if matches!(&self.nodes[pos], Node::Folder { children, .. } if children.is_empty()) {
                self.nodes.remove(pos);
            }
        }
    }

    pub fn remove_feed(&mut self, url: &str) -> Result<FeedRef> {
        let (feed, folder) = self
            .detach(url)
            .ok_or_else(|| DigestError::NotFound(url.to_string()))?;
        self.prune_folder(&folder);
        Ok(feed)
    }

    /// Move a feed under `folder` ("" for root). Returns false when the feed
    /// was already there.
    pub fn move_feed(&mut self, url: &str, folder: &str) -> Result<bool> {
        let folder = folder.trim();
        let current = self
            .find(url)
            .ok_or_else(|| DigestError::NotFound(url.to_string()))?;
        if current.folder == folder {
            return Ok(false);
        }

        let (feed, previous) = self
            .detach(url)
            .ok_or_else(|| DigestError::NotFound(url.to_string()))?;
        self.insert(feed, folder);
        self.prune_folder(&previous);
        Ok(true)
    }

    /// Update the display title of a feed in place.
    pub fn rename_feed(&mut self, url: &str, title: &str) -> Result<()> {
        fn walk(nodes: &mut [Node], url: &str, title: &str) -> bool {
            nodes.iter_mut().any(|node| match node {
                Node::Feed(feed) if feed.url == url => {
                    feed.title = title.to_string();
                    true
                }
                Node::Folder { children, .. } => walk(children, url, title),
                Node::Feed(_) => false,
            })
        }

        if !self.contains(url) || !walk(&mut self.nodes, url, title) {
            return Err(DigestError::NotFound(url.to_string()));
        }
        Ok(())
    }
}
