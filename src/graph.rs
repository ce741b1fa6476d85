//! Compact directed multigraph over page IDs.
//!
//! Successor lists stay sorted and duplicate-free, and the node set tracks
//! every ID ever referenced by an edge, so subgraph operations can work on
//! bitmaps throughout.

use std::collections::{HashMap, VecDeque};

use roaring::RoaringBitmap;

#[derive(Clone, Debug, Default)]
pub struct MapGraph {
    edges: HashMap<u32, Vec<u32>>,
    nodes: RoaringBitmap,
}

impl MapGraph {
    pub fn new() -> Self {
        MapGraph::default()
    }

    /// Inserts a directed edge. Both endpoints join the node set.
    pub fn add(&mut self, from: u32, to: u32) {
        let successors = self.edges.entry(from).or_default();
        if let Err(position) = successors.binary_search(&to) {
            successors.insert(position, to);
        }
        self.nodes.insert(from);
        self.nodes.insert(to);
    }

    pub fn successors(&self, from: u32) -> &[u32] {
        self.edges.get(&from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every ID referenced so far, restricted by past `apply_subgraph` calls.
    pub fn nodes(&self) -> RoaringBitmap {
        self.nodes.clone()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.nodes.contains(id)
    }

    /// Incoming adjacency, rebuilt from the forward lists.
    fn predecessors(&self) -> HashMap<u32, Vec<u32>> {
        let mut predecessors: HashMap<u32, Vec<u32>> = HashMap::new();
        for (&from, successors) in &self.edges {
            for &to in successors {
                predecessors.entry(to).or_default().push(from);
            }
        }
        predecessors
    }

    /// The IDs that can reach `parents` within `depth` hops along the edge
    /// direction. `-1` lifts the bound; `0` keeps just the parents.
    pub fn in_subgraph(&self, parents: &RoaringBitmap, depth: i32) -> RoaringBitmap {
        let mut reached = parents & &self.nodes;
        if depth == 0 {
            return reached;
        }
        let predecessors = self.predecessors();
        let mut frontier: VecDeque<(u32, i32)> = reached.iter().map(|id| (id, 0)).collect();
        while let Some((id, hops)) = frontier.pop_front() {
            if depth >= 0 && hops == depth {
                continue;
            }
            if let Some(sources) = predecessors.get(&id) {
                for &source in sources {
                    if reached.insert(source) {
                        frontier.push_back((source, hops + 1));
                    }
                }
            }
        }
        reached
    }

    /// Shortest hop count from every node to the nearest seed, following the
    /// edge direction. Nodes that cannot reach any seed are absent.
    pub fn distances(&self, seeds: &RoaringBitmap) -> HashMap<u32, u32> {
        let predecessors = self.predecessors();
        let mut distances = HashMap::new();
        let mut frontier = VecDeque::new();
        for id in (seeds & &self.nodes).iter() {
            distances.insert(id, 0);
            frontier.push_back(id);
        }
        while let Some(id) = frontier.pop_front() {
            let hops = distances[&id];
            if let Some(sources) = predecessors.get(&id) {
                for &source in sources {
                    if !distances.contains_key(&source) {
                        distances.insert(source, hops + 1);
                        frontier.push_back(source);
                    }
                }
            }
        }
        distances
    }

    /// Keeps only edges with both endpoints in `keep`; the node set becomes
    /// its intersection with `keep`.
    pub fn apply_subgraph(&mut self, keep: &RoaringBitmap) {
        self.edges.retain(|from, successors| {
            if !keep.contains(*from) {
                return false;
            }
            successors.retain(|to| keep.contains(*to));
            !successors.is_empty()
        });
        self.nodes &= keep;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> MapGraph {
        // 1 -> 2 -> 3, plus a stray 4 -> 3
        let mut g = MapGraph::new();
        g.add(1, 2);
        g.add(2, 3);
        g.add(4, 3);
        g
    }

    #[test]
    fn successors_stay_sorted_and_unique() {
        let mut g = MapGraph::new();
        g.add(1, 3);
        g.add(1, 2);
        g.add(1, 3);
        assert_eq!(g.successors(1), &[2, 3]);
        assert_eq!(g.nodes().iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn in_subgraph_respects_the_hop_bound() {
        let g = chain();
        let parents = RoaringBitmap::from_iter([3u32]);
        let collect = |depth| {
            g.in_subgraph(&parents, depth)
                .iter()
                .collect::<Vec<u32>>()
        };
        assert_eq!(collect(0), vec![3]);
        assert_eq!(collect(1), vec![2, 3, 4]);
        assert_eq!(collect(-1), vec![1, 2, 3, 4]);
    }

    #[test]
    fn in_subgraph_ignores_unknown_parents() {
        let g = chain();
        let parents = RoaringBitmap::from_iter([99u32]);
        assert!(g.in_subgraph(&parents, -1).is_empty());
    }

    #[test]
    fn distances_count_hops_toward_the_seeds() {
        let g = chain();
        let seeds = RoaringBitmap::from_iter([3u32]);
        let d = g.distances(&seeds);
        assert_eq!(d[&3], 0);
        assert_eq!(d[&2], 1);
        assert_eq!(d[&4], 1);
        assert_eq!(d[&1], 2);
    }

    #[test]
    fn unreachable_nodes_have_no_distance() {
        let mut g = chain();
        g.add(10, 11);
        let seeds = RoaringBitmap::from_iter([3u32]);
        let d = g.distances(&seeds);
        assert!(!d.contains_key(&10));
        assert!(!d.contains_key(&11));
    }

    #[test]
    fn apply_subgraph_drops_foreign_endpoints() {
        let mut g = chain();
        let keep = RoaringBitmap::from_iter([1u32, 2, 3]);
        g.apply_subgraph(&keep);
        assert_eq!(g.successors(1), &[2]);
        assert_eq!(g.successors(2), &[3]);
        assert!(g.successors(4).is_empty());
        assert_eq!(g.nodes().iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn apply_subgraph_keeps_isolated_whitelisted_nodes() {
        let mut g = chain();
        let keep = RoaringBitmap::from_iter([1u32, 4]);
        g.apply_subgraph(&keep);
        assert!(g.successors(1).is_empty());
        assert_eq!(g.nodes().iter().collect::<Vec<_>>(), vec![1, 4]);
    }
}
