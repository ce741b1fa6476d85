//! Topic configurations ("nationalizations") and their cross-language sync.
//!
//! A nationalization names the topics of one language edition together with
//! the seed categories and articles behind each topic, plus the category
//! subtrees to filter out before assignment.

mod api;
mod sync;

pub use api::{LangLinksClient, MayMissingPage, QueryCache};
pub use sync::sync;

use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::chain::ChainError;
use crate::types::{Filter, TopicAssignments};

#[derive(Debug)]
pub enum SyncError {
    Io(std::io::Error),
    Json(serde_json::Error),
    MediaWiki(mediawiki::media_wiki_error::MediaWikiError),
    Chain(ChainError),
}

impl Error for SyncError {}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => e.fmt(f),
            Self::Json(e) => e.fmt(f),
            Self::MediaWiki(e) => e.fmt(f),
            Self::Chain(e) => e.fmt(f),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<mediawiki::media_wiki_error::MediaWikiError> for SyncError {
    fn from(e: mediawiki::media_wiki_error::MediaWikiError) -> Self {
        Self::MediaWiki(e)
    }
}

impl From<ChainError> for SyncError {
    fn from(e: ChainError) -> Self {
        Self::Chain(e)
    }
}

/// A page referenced from a topic configuration.
#[derive(PartialEq, Eq, Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Page {
    pub id: u32,
    pub title: String,
}

#[derive(PartialEq, Eq, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Topic {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub categories: Vec<Page>,
    #[serde(default)]
    pub articles: Vec<Page>,
}

#[derive(PartialEq, Eq, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Nationalization {
    pub language: String,
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub filters: Vec<Page>,
}

impl Nationalization {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Seed map for `assign`: each topic to its category and article IDs.
    pub fn topic_assignments(&self) -> TopicAssignments {
        let mut assignments = TopicAssignments::new();
        for topic in &self.topics {
            let seeds = topic
                .categories
                .iter()
                .chain(&topic.articles)
                .map(|page| page.id)
                .collect();
            assignments.insert(topic.id, seeds);
        }
        assignments
    }

    /// The default blacklist: each filter page together with its direct
    /// members.
    pub fn default_filters(&self) -> Vec<Filter> {
        if self.filters.is_empty() {
            return Vec::new();
        }
        vec![Filter {
            is_whitelist: false,
            parents: self.filters.iter().map(|page| page.id).collect(),
            depth: 1,
        }]
    }
}
