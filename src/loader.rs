//! Ingestion of page and link sources into the semantic graph.
//!
//! The loader owns the graph, the namespace bitmaps and the title dictionary.
//! Every mutator returns `Result`, so a failed step short-circuits the whole
//! build through `?` instead of latching an error flag on the side.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use roaring::RoaringBitmap;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use crate::dump::{DumpError, LinkSource, PageSource};
use crate::graph::MapGraph;
use crate::types::{Filter, LinkTarget, NamespaceID, PageRecord};

#[derive(Debug)]
pub enum BuildError {
    Dump(DumpError),
    DuplicateNode(u32),
    UnknownSeed(u32),
    Cancelled,
}

impl Error for BuildError {}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dump(e) => e.fmt(f),
            Self::DuplicateNode(id) => write!(f, "node {} added twice", id),
            Self::UnknownSeed(id) => write!(f, "seed {} is not a known page", id),
            Self::Cancelled => f.write_str("build cancelled"),
        }
    }
}

impl From<DumpError> for BuildError {
    fn from(e: DumpError) -> Self {
        Self::Dump(e)
    }
}

/// Permitted endpoint sets for one link source.
pub struct EdgeDomain {
    pub from: RoaringBitmap,
    pub to: RoaringBitmap,
}

/// A link is accepted iff some domain contains both of its endpoints.
pub struct EdgeValidator {
    domains: Vec<EdgeDomain>,
}

impl EdgeValidator {
    pub fn new(domains: Vec<EdgeDomain>) -> Self {
        EdgeValidator { domains }
    }

    fn accepts(&self, from: u32, to: u32) -> bool {
        self.domains
            .iter()
            .any(|d| d.from.contains(from) && d.to.contains(to))
    }
}

/// (namespace, title) to page ID, split per namespace so lookups borrow the
/// title instead of building a composite key.
#[derive(Default)]
struct TitleIndex {
    by_namespace: HashMap<NamespaceID, HashMap<String, u32>>,
}

impl TitleIndex {
    fn insert(&mut self, namespace: NamespaceID, title: String, id: u32) {
        self.by_namespace
            .entry(namespace)
            .or_default()
            .insert(title, id);
    }

    fn get(&self, namespace: NamespaceID, title: &str) -> Option<u32> {
        self.by_namespace.get(&namespace)?.get(title).copied()
    }
}

/// Redirect chains collapse to their final target; cycles break at the first
/// node seen while resolving, so resolution in ascending ID order is
/// deterministic.
struct RedirectResolver {
    map: HashMap<u32, u32>,
}

impl RedirectResolver {
    fn new(map: HashMap<u32, u32>) -> Self {
        RedirectResolver { map }
    }

    fn collapse(&mut self) {
        let mut sources: Vec<u32> = self.map.keys().copied().collect();
        sources.sort_unstable();
        for id in sources {
            let mut in_progress = RoaringBitmap::new();
            self.follow(id, &mut in_progress);
        }
    }

    fn follow(&mut self, id: u32, in_progress: &mut RoaringBitmap) -> u32 {
        let next = match self.map.get(&id) {
            Some(&next) => next,
            None => return id,
        };
        if !in_progress.insert(id) {
            return id;
        }
        let target = self.follow(next, in_progress);
        self.map.insert(id, target);
        target
    }

    /// The canonical page behind `id`, or `None` when `id` is not an alias.
    fn target(&self, id: u32) -> Option<u32> {
        self.map.get(&id).copied()
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Builds the page graph from streaming sources.
pub struct GraphLoader {
    pub graph: MapGraph,
    pub namespaces: HashMap<NamespaceID, RoaringBitmap>,
    /// Redirect-flagged page IDs per namespace. Their titles live in the
    /// dictionary, but they never count as nodes.
    aliases: HashMap<NamespaceID, RoaringBitmap>,
    title2id: TitleIndex,
    cancel: CancellationToken,
}

impl GraphLoader {
    pub fn new(cancel: CancellationToken) -> Self {
        GraphLoader {
            graph: MapGraph::new(),
            namespaces: HashMap::new(),
            aliases: HashMap::new(),
            title2id: TitleIndex::default(),
            cancel,
        }
    }

    /// Snapshot of one namespace's ID set.
    pub fn namespace(&self, namespace: NamespaceID) -> RoaringBitmap {
        self.namespaces
            .get(&namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of one namespace's ID set together with its redirect-flagged
    /// pages. Redirect edges start (and, mid-chain, end) on alias IDs, so
    /// their validator domains come from here.
    pub fn namespace_with_aliases(&self, namespace: NamespaceID) -> RoaringBitmap {
        let mut ids = self.namespace(namespace);
        if let Some(aliases) = self.aliases.get(&namespace) {
            ids |= aliases;
        }
        ids
    }

    fn checkpoint(&self) -> Result<(), BuildError> {
        if self.cancel.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Registers every page of the source: nodes join their namespace
    /// bitmap, alias titles only the dictionary. An ID seen twice is a hard
    /// error either way.
    pub fn add_nodes(&mut self, mut source: impl PageSource) -> Result<(), BuildError> {
        let mut seen = RoaringBitmap::new();
        for ids in self.namespaces.values().chain(self.aliases.values()) {
            seen |= ids;
        }
        let (mut added, mut aliased) = (0u64, 0u64);
        while let Some(record) = source.next()? {
            self.checkpoint()?;
            let (page, is_alias) = match record {
                PageRecord::Node(page) => (page, false),
                PageRecord::Alias(page) => (page, true),
            };
            if !seen.insert(page.id) {
                return Err(BuildError::DuplicateNode(page.id));
            }
            self.title2id.insert(page.namespace, page.title, page.id);
            if is_alias {
                self.aliases
                    .entry(page.namespace)
                    .or_default()
                    .insert(page.id);
                aliased += 1;
            } else {
                self.namespaces
                    .entry(page.namespace)
                    .or_default()
                    .insert(page.id);
                added += 1;
            }
        }
        source.close()?;
        event!(Level::DEBUG, added, aliased, "page source drained");
        Ok(())
    }

    /// Collapses redirects: every dictionary entry held by an alias re-points
    /// to its canonical ID, and the alias leaves its namespace bitmap.
    pub fn set_aliases(
        &mut self,
        mut source: impl LinkSource,
        validator: &EdgeValidator,
    ) -> Result<(), BuildError> {
        let mut redirects = HashMap::new();
        let (mut unresolved, mut rejected) = (0u64, 0u64);
        while let Some(link) = source.next()? {
            self.checkpoint()?;
            let to = match self.resolve(&link.to) {
                Some(id) => id,
                None => {
                    unresolved += 1;
                    continue;
                }
            };
            if !validator.accepts(link.from, to) {
                rejected += 1;
                continue;
            }
            redirects.insert(link.from, to);
        }
        source.close()?;

        let mut resolver = RedirectResolver::new(redirects);
        resolver.collapse();
        for (&namespace, titles) in self.title2id.by_namespace.iter_mut() {
            for id in titles.values_mut() {
                let alias = *id;
                let target = match resolver.target(alias) {
                    Some(target) => target,
                    None => continue,
                };
                *id = target;
                if let Some(ids) = self.namespaces.get_mut(&namespace) {
                    ids.remove(alias);
                }
            }
        }
        event!(
            Level::DEBUG,
            aliases = resolver.len(),
            unresolved,
            rejected,
            "redirects applied"
        );
        Ok(())
    }

    /// Streams links into the graph. Links whose target title is unknown or
    /// whose endpoints fall outside the validator's domains are dropped and
    /// counted.
    pub fn add_edges(
        &mut self,
        mut source: impl LinkSource,
        validator: Option<&EdgeValidator>,
    ) -> Result<(), BuildError> {
        let (mut added, mut unresolved, mut rejected) = (0u64, 0u64, 0u64);
        while let Some(link) = source.next()? {
            self.checkpoint()?;
            let to = match self.resolve(&link.to) {
                Some(id) => id,
                None => {
                    unresolved += 1;
                    continue;
                }
            };
            if let Some(validator) = validator {
                if !validator.accepts(link.from, to) {
                    rejected += 1;
                    continue;
                }
            }
            self.graph.add(link.from, to);
            added += 1;
        }
        source.close()?;
        event!(Level::DEBUG, added, unresolved, rejected, "link source drained");
        Ok(())
    }

    /// Applies whitelist and blacklist filters left to right, shrinking the
    /// graph after each one.
    pub fn filter(&mut self, filters: &[Filter]) -> Result<(), BuildError> {
        if filters.is_empty() {
            return Ok(());
        }
        let mut whitelist = self.graph.nodes();
        for filter in filters {
            self.checkpoint()?;
            let parents: RoaringBitmap = filter.parents.iter().copied().collect();
            let reach = self.graph.in_subgraph(&parents, filter.depth);
            if filter.is_whitelist {
                whitelist = reach;
            } else {
                whitelist -= reach;
            }
            self.graph.apply_subgraph(&whitelist);
        }
        Ok(())
    }

    fn resolve(&self, target: &LinkTarget) -> Option<u32> {
        match target {
            LinkTarget::Page(id) => Some(*id),
            LinkTarget::Title(namespace, title) => self.title2id.get(*namespace, title),
        }
    }
}
