//! Cross-language synchronization of topic configurations.
//!
//! User-supplied category assignments become absorbing states of the same
//! chain solver the main pipeline uses; langlinks make equivalent pages of
//! different languages mutual neighbors. Absorption then propagates every
//! topic to all connected pages, and the result folds back into one
//! configuration per language.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;

use roaring::RoaringBitmap;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use super::api::{LangLinksClient, QueryCache};
use super::{Nationalization, Page, SyncError, Topic};
use crate::chain::{AbsorbingMarkovChain, WeightError};
use crate::graph::MapGraph;
use crate::types::NS_CATEGORY;

/// Pseudo-language of the absorbing topic and filter nodes.
const DUMMY_LANG: &str = "...";

/// A page pinned to its language edition.
#[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Debug)]
struct I18lPage {
    lang: String,
    id: u32,
    title: String,
}

impl I18lPage {
    fn new(lang: &str, page: &Page) -> Self {
        I18lPage {
            lang: lang.to_string(),
            id: page.id,
            title: page.title.clone(),
        }
    }
}

fn dummy_filter() -> I18lPage {
    I18lPage {
        lang: DUMMY_LANG.to_string(),
        id: u32::MAX,
        title: "Filter".to_string(),
    }
}

/// Returns the synchronized configurations derived from the inputs and the
/// Wikipedia langlinks, one per language touched by any langlink.
pub async fn sync(
    configs: &[Nationalization],
    cancel: &CancellationToken,
) -> Result<HashMap<String, Nationalization>, SyncError> {
    let skeleton = match configs.first() {
        Some(first) => first,
        None => return Ok(HashMap::new()),
    };

    let client = LangLinksClient::new(QueryCache::open(QueryCache::DEFAULT_PATH));
    let mut graph = LangLinksGraph {
        assignments: BTreeMap::new(),
        client,
    };

    for config in configs {
        for topic in &config.topics {
            let absorbing = I18lPage {
                lang: DUMMY_LANG.to_string(),
                id: topic.id,
                title: topic.title.clone(),
            };
            for category in &topic.categories {
                // canonicalize the input before trusting it
                let mut visited = Vec::new();
                graph
                    .dfs(&mut visited, I18lPage::new(&config.language, category), 0)
                    .await;
                if let Some(canonical) = visited.first() {
                    graph
                        .assignments
                        .insert(canonical.clone(), absorbing.clone());
                }
            }
        }
        for filter in &config.filters {
            let mut visited = Vec::new();
            graph
                .dfs(&mut visited, I18lPage::new(&config.language, filter), 0)
                .await;
            if let Some(canonical) = visited.first() {
                graph.assignments.insert(canonical.clone(), dummy_filter());
            }
        }
    }

    graph.resync(cancel).await?;
    graph.client.save_cache()?;
    Ok(nationalizations(&graph.assignments, skeleton))
}

struct LangLinksGraph {
    /// Page to its absorbing target: a dummy topic page or the dummy filter.
    assignments: BTreeMap<I18lPage, I18lPage>,
    client: LangLinksClient,
}

impl LangLinksGraph {
    /// Depth-bounded closure over langlinks and assignment edges. The first
    /// page pushed for a fresh start is its canonical form.
    fn dfs<'a>(
        &'a mut self,
        visited: &'a mut Vec<I18lPage>,
        page: I18lPage,
        depth: i32,
    ) -> Pin<Box<dyn Future<Output = ()> + 'a>> {
        Box::pin(async move {
            if visited.contains(&page) {
                return;
            }
            if page.lang == DUMMY_LANG {
                visited.push(page);
                return;
            }

            let found = self
                .client
                .lang_links(&page.lang, &page.title, NS_CATEGORY)
                .await;
            if found.missing {
                return;
            }

            let canonical = I18lPage {
                lang: page.lang,
                id: found.id,
                title: found.title.clone(),
            };
            if visited.contains(&canonical) {
                return;
            }
            visited.push(canonical.clone());
            if depth == 0 {
                return;
            }

            for link in &found.lang_links {
                let neighbor = I18lPage {
                    lang: link.lang.clone(),
                    id: 0,
                    title: link.title.clone(),
                };
                self.dfs(visited, neighbor, depth - 1).await;
            }
            if let Some(assigned) = self.assignments.get(&canonical).cloned() {
                self.dfs(visited, assigned, depth - 1).await;
            }
        })
    }

    /// Replaces the assignments with the absorption result over the full
    /// langlinks closure.
    async fn resync(&mut self, cancel: &CancellationToken) -> Result<(), SyncError> {
        let mut nodes: Vec<I18lPage> = Vec::new();
        let starts: Vec<I18lPage> = self.assignments.keys().cloned().collect();
        for start in starts {
            self.dfs(&mut nodes, start, -1).await;
        }

        let mut iso = MapGraph::new();
        let mut node_ids = RoaringBitmap::new();
        let mut absorbing = RoaringBitmap::new();
        {
            let to_id: HashMap<&I18lPage, u32> = nodes
                .iter()
                .enumerate()
                .map(|(dense, page)| (page, dense as u32))
                .collect();
            for dense in 0..nodes.len() {
                let from = nodes[dense].clone();
                let from_id = dense as u32;
                node_ids.insert(from_id);
                let mut neighbors = Vec::new();
                self.dfs(&mut neighbors, from, 1).await;
                for neighbor in &neighbors {
                    let neighbor_id = match to_id.get(neighbor) {
                        Some(&id) => id,
                        None => continue,
                    };
                    iso.add(from_id, neighbor_id);
                    if neighbor.lang == DUMMY_LANG {
                        absorbing.insert(neighbor_id);
                    } else {
                        iso.add(neighbor_id, from_id);
                    }
                }
            }
        }

        let distances = iso.distances(&absorbing);
        let weighter = |from: u32, to: u32| -> Result<f64, WeightError> {
            let from_distance = i64::from(distances.get(&from).copied().unwrap_or(0));
            let to_distance = i64::from(distances.get(&to).copied().unwrap_or(0));
            let approach = to_distance + 1 - from_distance;
            if approach < 0 {
                return Err(WeightError::new(
                    from,
                    to,
                    "distance inconsistent with the langlinks edge",
                ));
            }
            Ok(1.0 / (1.0 + 10.0 * approach as f64))
        };
        let chain = AbsorbingMarkovChain::new(".", node_ids, absorbing, &iso, weighter);
        let assigned = chain.absorption_assignments(cancel)?;
        event!(
            Level::INFO,
            pages = nodes.len(),
            assigned = assigned.len(),
            "langlinks graph resynced"
        );

        for (transient, target) in assigned {
            self.assignments.insert(
                nodes[transient as usize].clone(),
                nodes[target as usize].clone(),
            );
        }
        Ok(())
    }
}

/// Folds the assignments back into one configuration per language. Languages
/// discovered through langlinks start from the skeleton's topic list.
fn nationalizations(
    assignments: &BTreeMap<I18lPage, I18lPage>,
    skeleton: &Nationalization,
) -> HashMap<String, Nationalization> {
    let filter = dummy_filter();
    let mut result: HashMap<String, Nationalization> = HashMap::new();
    for (from, to) in assignments {
        if from.lang == DUMMY_LANG {
            continue;
        }
        let config = result
            .entry(from.lang.clone())
            .or_insert_with(|| new_nationalization(&from.lang, skeleton));
        let page = Page {
            id: from.id,
            title: from.title.clone(),
        };
        if *to == filter {
            page_add(&mut config.filters, page);
        } else if let Ok(position) = config.topics.binary_search_by_key(&to.id, |t| t.id) {
            page_add(&mut config.topics[position].categories, page);
        }
    }
    result
}

fn new_nationalization(lang: &str, skeleton: &Nationalization) -> Nationalization {
    let mut topics: Vec<Topic> = skeleton
        .topics
        .iter()
        .map(|topic| Topic {
            id: topic.id,
            title: topic.title.clone(),
            categories: Vec::new(),
            articles: Vec::new(),
        })
        .collect();
    topics.sort_by_key(|topic| topic.id);
    Nationalization {
        language: lang.to_string(),
        topics,
        filters: Vec::new(),
    }
}

/// Sorted-unique insert by title.
fn page_add(pages: &mut Vec<Page>, page: Page) {
    if let Err(position) = pages.binary_search_by(|p| p.title.cmp(&page.title)) {
        pages.insert(position, page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: u32, title: &str) -> Page {
        Page {
            id,
            title: title.to_string(),
        }
    }

    fn skeleton() -> Nationalization {
        Nationalization {
            language: "en".to_string(),
            topics: vec![
                Topic {
                    id: 2,
                    title: "Science".to_string(),
                    categories: vec![page(7, "Category:Science")],
                    articles: Vec::new(),
                },
                Topic {
                    id: 1,
                    title: "Arts".to_string(),
                    categories: Vec::new(),
                    articles: Vec::new(),
                },
            ],
            filters: Vec::new(),
        }
    }

    #[test]
    fn page_add_keeps_titles_sorted_and_unique() {
        let mut pages = Vec::new();
        page_add(&mut pages, page(3, "Cherry"));
        page_add(&mut pages, page(1, "Apple"));
        page_add(&mut pages, page(2, "Banana"));
        page_add(&mut pages, page(4, "Apple"));
        let titles: Vec<&str> = pages.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["Apple", "Banana", "Cherry"]);
        assert_eq!(pages[0].id, 1);
    }

    #[test]
    fn fresh_nationalizations_carry_the_bare_topic_skeleton() {
        let fresh = new_nationalization("it", &skeleton());
        assert_eq!(fresh.language, "it");
        let ids: Vec<u32> = fresh.topics.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(fresh.topics.iter().all(|t| t.categories.is_empty()));
    }

    #[test]
    fn assignments_fold_back_into_per_language_configs() {
        let mut assignments = BTreeMap::new();
        let topic = I18lPage {
            lang: DUMMY_LANG.to_string(),
            id: 2,
            title: "Science".to_string(),
        };
        assignments.insert(
            I18lPage {
                lang: "it".to_string(),
                id: 31,
                title: "Categoria:Scienza".to_string(),
            },
            topic.clone(),
        );
        assignments.insert(
            I18lPage {
                lang: "it".to_string(),
                id: 32,
                title: "Categoria:Nascosta".to_string(),
            },
            dummy_filter(),
        );

        let result = nationalizations(&assignments, &skeleton());
        let italian = &result["it"];
        let science = italian.topics.iter().find(|t| t.id == 2).expect("topic 2");
        assert_eq!(science.categories, vec![page(31, "Categoria:Scienza")]);
        assert_eq!(italian.filters, vec![page(32, "Categoria:Nascosta")]);
    }
}
