//! Shared definitions for the topic assignment pipeline.

use std::collections::BTreeMap;

pub type NamespaceID = i32;

// Standard MediaWiki namespaces. Bundled with every installation and could be
// seen as universal.
pub const NS_ARTICLE: NamespaceID = 0;
pub const NS_CATEGORY: NamespaceID = 14;
/// Synthetic namespace for topic nodes, far outside the range MediaWiki
/// assigns so it can never collide with a real one.
pub const NS_TOPIC: NamespaceID = 6666;

/// A page row as the graph sees it.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Page {
    pub id: u32,
    pub namespace: NamespaceID,
    pub title: String,
}

/// A page-table row as the loader consumes it. Redirect rows never become
/// graph nodes, but their titles must still resolve once the redirect table
/// supplies the alias edges.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum PageRecord {
    Node(Page),
    Alias(Page),
}

/// Where a link points: either a page ID known up front, or a
/// (namespace, title) pair to be resolved against the title dictionary.
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum LinkTarget {
    Page(u32),
    Title(NamespaceID, String),
}

/// A directed link emitted by an edge source.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Link {
    pub from: u32,
    pub to: LinkTarget,
}

/// A subgraph filter. `depth` of `-1` lifts the hop bound; `0` keeps just the
/// parents themselves.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Filter {
    pub is_whitelist: bool,
    pub parents: Vec<u32>,
    pub depth: i32,
}

/// Topic ID to the seed pages manually associated with it. Ordered so that
/// synthetic node and link generation is deterministic.
pub type TopicAssignments = BTreeMap<u32, Vec<u32>>;
