//! Assigns every page of a Wikipedia language edition to a curated topic.
//!
//! The dump tables stream into an integer multigraph, redirects collapse to
//! their canonical pages, filters prune the graph down to the component that
//! reaches a topic, and an absorbing Markov chain over the result maps each
//! page to the topic most likely to absorb a random walk starting there.
//! Category links are the valuable signal; page links only exist to connect
//! otherwise unreachable articles, and are penalized accordingly.

pub mod chain;
pub mod dump;
pub mod graph;
pub mod loader;
pub mod nationalization;
pub mod semantic;
pub mod types;

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::Path;

use roaring::RoaringBitmap;
use tokio_util::sync::CancellationToken;

use chain::{AbsorbingMarkovChain, ChainError, WeightError};
use dump::Dumps;
use loader::BuildError;
use semantic::{SemanticGraph, SemanticGraphSources};
use types::{Filter, TopicAssignments, NS_ARTICLE, NS_CATEGORY, NS_TOPIC};

/// Weight of a link added from the pagelinks table.
const PAGELINK_WEIGHT: f64 = 1.0 / 200.0;
/// How steeply category links that fail to approach a topic lose value.
const DISTANCE_PENALTY: f64 = 10.0;

#[derive(Debug)]
pub enum AssignError {
    Build(BuildError),
    Chain(ChainError),
}

impl Error for AssignError {}

impl fmt::Display for AssignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build(e) => e.fmt(f),
            Self::Chain(e) => e.fmt(f),
        }
    }
}

impl From<BuildError> for AssignError {
    fn from(e: BuildError) -> Self {
        Self::Build(e)
    }
}

impl From<ChainError> for AssignError {
    fn from(e: ChainError) -> Self {
        Self::Chain(e)
    }
}

impl AssignError {
    /// True when the failure came from the caller's cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Build(BuildError::Cancelled) | Self::Chain(ChainError::Cancelled)
        )
    }
}

/// The final node sets, one per namespace, in ascending ID order.
#[derive(Debug)]
pub struct Namespaces {
    pub topics: Vec<u32>,
    pub categories: Vec<u32>,
    pub articles: Vec<u32>,
}

/// The page-to-topic assignment over the whole semantic graph.
#[derive(Debug)]
pub struct Assignment {
    pub page2topic: HashMap<u32, u32>,
    pub namespaces: Namespaces,
}

/// Runs the full pipeline: semantic graph, weighting, absorption.
///
/// `tmp_dir` hosts the solver's scratch files; they are gone by the time this
/// returns. Cancelling the token aborts within one record or iteration.
pub fn assign<D: Dumps>(
    cancel: &CancellationToken,
    tmp_dir: &Path,
    dumps: &D,
    topic2seeds: &TopicAssignments,
    filters: &[Filter],
) -> Result<Assignment, AssignError> {
    let sources = SemanticGraphSources {
        dumps,
        topic_assignments: topic2seeds,
        filters,
    };
    let SemanticGraph {
        graph,
        cat_distance,
        namespaces,
    } = sources.build(cancel)?;

    let topics = namespaces.get(&NS_TOPIC).cloned().unwrap_or_default();
    let categories = namespaces.get(&NS_CATEGORY).cloned().unwrap_or_default();
    let articles = namespaces.get(&NS_ARTICLE).cloned().unwrap_or_default();
    let mut nodes = RoaringBitmap::new();
    for ids in namespaces.values() {
        nodes |= ids;
    }

    let weighter =
        |from: u32, to: u32| -> Result<f64, WeightError> { weight(&articles, &cat_distance, from, to) };
    let chain = AbsorbingMarkovChain::new(tmp_dir, nodes, topics.clone(), &graph, weighter);
    let mut page2topic = chain.absorption_assignments(cancel)?;
    for topic in topics.iter() {
        page2topic.insert(topic, topic);
    }

    Ok(Assignment {
        page2topic,
        namespaces: Namespaces {
            topics: topics.iter().collect(),
            categories: categories.iter().collect(),
            articles: articles.iter().collect(),
        },
    })
}

/// Page-link edges carry a flat penalty; category links reward stepping
/// closer to a topic, with full weight exactly when the edge closes one hop
/// of distance.
fn weight(
    articles: &RoaringBitmap,
    cat_distance: &HashMap<u32, u32>,
    from: u32,
    to: u32,
) -> Result<f64, WeightError> {
    if articles.contains(to) {
        return Ok(PAGELINK_WEIGHT);
    }
    let from_distance = i64::from(cat_distance.get(&from).copied().unwrap_or(0));
    let to_distance = i64::from(cat_distance.get(&to).copied().unwrap_or(0));
    let approach = to_distance + 1 - from_distance;
    if approach < 0 {
        return Err(WeightError::new(
            from,
            to,
            "category distance inconsistent with the edge",
        ));
    }
    Ok(1.0 / (1.0 + DISTANCE_PENALTY * approach as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distances(pairs: &[(u32, u32)]) -> HashMap<u32, u32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn article_targets_get_the_flat_penalty() {
        let articles = RoaringBitmap::from_iter([7u32]);
        let w = weight(&articles, &distances(&[]), 3, 7).expect("weight");
        assert!((w - 1.0 / 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn approaching_edges_get_full_weight() {
        let articles = RoaringBitmap::new();
        let d = distances(&[(3, 2), (5, 1)]);
        // 3 at distance 2 stepping to 5 at distance 1: one hop closed
        let w = weight(&articles, &d, 3, 5).expect("weight");
        assert!((w - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sideways_edges_lose_value() {
        let articles = RoaringBitmap::new();
        let d = distances(&[(3, 1), (5, 1)]);
        let w = weight(&articles, &d, 3, 5).expect("weight");
        assert!((w - 1.0 / 11.0).abs() < f64::EPSILON);
    }

    #[test]
    fn inconsistent_distances_are_a_weighter_error() {
        let articles = RoaringBitmap::new();
        let d = distances(&[(3, 0), (5, 3)]);
        assert!(weight(&articles, &d, 3, 5).is_ok());
        assert!(weight(&articles, &d, 5, 3).is_err());
    }
}
