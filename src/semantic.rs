//! Orchestration of the dump sources into the typed semantic graph.
//!
//! The pipeline runs in a strict order: synthetic topic nodes, dump pages,
//! redirect aliases, topic and category links, user filters, the structural
//! topic-reachability filter, the category distance map, and only then the
//! page links. The reachability filter runs again after the page links so
//! they can only pull in articles that connect back to a topic; merging the
//! two passes would let page links widen the graph beyond it.

use std::collections::HashMap;

use roaring::RoaringBitmap;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use crate::dump::{
    CategoryLinkRecords, Dumps, LinkSlice, PageLinkRecords, PageRecords, PageSlice,
    RedirectRecords,
};
use crate::graph::MapGraph;
use crate::loader::{BuildError, EdgeDomain, EdgeValidator, GraphLoader};
use crate::types::{
    Filter, Link, LinkTarget, NamespaceID, Page, PageRecord, TopicAssignments, NS_ARTICLE,
    NS_CATEGORY, NS_TOPIC,
};

/// Everything needed to build the semantic graph.
pub struct SemanticGraphSources<'a, D: Dumps> {
    pub dumps: &'a D,
    pub topic_assignments: &'a TopicAssignments,
    pub filters: &'a [Filter],
}

/// The built graph together with its category distances and namespace sets.
#[derive(Debug)]
pub struct SemanticGraph {
    pub graph: MapGraph,
    pub cat_distance: HashMap<u32, u32>,
    pub namespaces: HashMap<NamespaceID, RoaringBitmap>,
}

impl<'a, D: Dumps> SemanticGraphSources<'a, D> {
    pub fn build(&self, cancel: &CancellationToken) -> Result<SemanticGraph, BuildError> {
        let mut loader = GraphLoader::new(cancel.clone());
        for namespace in [NS_TOPIC, NS_CATEGORY, NS_ARTICLE] {
            loader.namespaces.entry(namespace).or_default();
        }

        loader.add_nodes(self.topic_source())?;
        loader.add_nodes(PageRecords::open(self.dumps)?)?;

        // redirect edges start on alias IDs, and chains pass through them
        let redirect_domains = EdgeValidator::new(vec![
            EdgeDomain {
                from: loader.namespace_with_aliases(NS_ARTICLE),
                to: loader.namespace_with_aliases(NS_ARTICLE),
            },
            EdgeDomain {
                from: loader.namespace_with_aliases(NS_CATEGORY),
                to: loader.namespace_with_aliases(NS_CATEGORY),
            },
        ]);
        loader.set_aliases(RedirectRecords::open(self.dumps)?, &redirect_domains)?;

        loader.add_edges(self.topiclink_source(&loader)?, None)?;
        let categorylink_domains = EdgeValidator::new(vec![
            EdgeDomain {
                from: loader.namespace(NS_ARTICLE),
                to: loader.namespace(NS_CATEGORY),
            },
            EdgeDomain {
                from: loader.namespace(NS_CATEGORY),
                to: loader.namespace(NS_CATEGORY),
            },
        ]);
        loader.add_edges(
            CategoryLinkRecords::open(self.dumps)?,
            Some(&categorylink_domains),
        )?;

        // whatever the user filters discard leaves the namespaces too
        let before = loader.graph.nodes();
        loader.filter(self.filters)?;
        let unwanted = before - loader.graph.nodes();
        for ids in loader.namespaces.values_mut() {
            *ids -= &unwanted;
        }

        let topic_ids = loader.namespace(NS_TOPIC);
        let topic_filter = [Filter {
            is_whitelist: true,
            parents: topic_ids.iter().collect(),
            depth: -1,
        }];
        loader.filter(&topic_filter)?;

        // category distances freeze before page links exist, so link-reach
        // cannot distort them
        let cat_distance = loader.graph.distances(&topic_ids);

        let pagelink_domains = self.pagelink_domains(&loader);
        loader.add_edges(PageLinkRecords::open(self.dumps)?, Some(&pagelink_domains))?;
        loader.filter(&topic_filter)?;

        let nodes = loader.graph.nodes();
        for ids in loader.namespaces.values_mut() {
            *ids &= &nodes;
        }

        event!(Level::INFO, nodes = nodes.len(), "semantic graph ready");
        Ok(SemanticGraph {
            graph: loader.graph,
            cat_distance,
            namespaces: loader.namespaces,
        })
    }

    /// Synthetic topic nodes, in ascending topic order.
    fn topic_source(&self) -> PageSlice {
        let records = self
            .topic_assignments
            .keys()
            .map(|&id| {
                PageRecord::Node(Page {
                    id,
                    namespace: NS_TOPIC,
                    title: format!("Topic: {}", id),
                })
            })
            .collect();
        PageSlice::new(records)
    }

    /// Seed-to-topic links. Every seed must already be a page; a stranger ID
    /// in the topic configuration is a hard error.
    fn topiclink_source(&self, loader: &GraphLoader) -> Result<LinkSlice, BuildError> {
        let pages = loader.namespace(NS_CATEGORY) | loader.namespace(NS_ARTICLE);
        let mut links = Vec::new();
        for (&topic, seeds) in self.topic_assignments {
            for &seed in seeds {
                if !pages.contains(seed) {
                    return Err(BuildError::UnknownSeed(seed));
                }
                links.push(Link {
                    from: seed,
                    to: LinkTarget::Page(topic),
                });
            }
        }
        Ok(LinkSlice::new(links))
    }

    /// Page links exist to reach articles the category graph missed, so only
    /// edges from still-uncategorized articles are admitted.
    fn pagelink_domains(&self, loader: &GraphLoader) -> EdgeValidator {
        let articles = loader.namespace(NS_ARTICLE);
        let uncategorized = &articles - &loader.graph.nodes();
        EdgeValidator::new(vec![EdgeDomain {
            from: uncategorized,
            to: articles,
        }])
    }
}
