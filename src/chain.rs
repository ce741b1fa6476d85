//! Absorbing Markov chain solver.
//!
//! Absorbing states transition only to themselves; every other node is
//! transient. Transition probabilities come from a caller-supplied weighter
//! and are row-normalized, and the absorption probabilities converge by
//! power iteration. Large probability matrices spill into a scratch file
//! under the caller's temp directory, which vanishes again on drop.

use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use roaring::RoaringBitmap;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

use crate::graph::MapGraph;

/// Convergence tolerance for the absorption probabilities.
const TOLERANCE: f64 = 1e-9;
/// Iteration cap; hitting it means the chain failed to converge.
const MAX_ITERATIONS: usize = 100_000;
/// Probability matrices above this many entries go to a scratch file.
const DEFAULT_SPILL_ENTRIES: u64 = 1 << 26;

/// A weighter returned something outside `(0, 1]`, or refused the edge.
#[derive(Debug)]
pub struct WeightError {
    pub from: u32,
    pub to: u32,
    reason: &'static str,
}

impl WeightError {
    pub fn new(from: u32, to: u32, reason: &'static str) -> Self {
        WeightError { from, to, reason }
    }
}

impl Error for WeightError {}

impl fmt::Display for WeightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid weight on edge {} -> {}: {}",
            self.from, self.to, self.reason
        )
    }
}

#[derive(Debug)]
pub enum ChainError {
    Weight(WeightError),
    Disconnected(u32),
    NoConvergence(usize),
    Io(io::Error),
    Cancelled,
}

impl Error for ChainError {}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weight(e) => e.fmt(f),
            Self::Disconnected(id) => {
                write!(f, "node {} cannot reach any absorbing state", id)
            }
            Self::NoConvergence(iterations) => {
                write!(f, "no convergence after {} iterations", iterations)
            }
            Self::Io(e) => e.fmt(f),
            Self::Cancelled => f.write_str("solver cancelled"),
        }
    }
}

impl From<WeightError> for ChainError {
    fn from(e: WeightError) -> Self {
        Self::Weight(e)
    }
}

impl From<io::Error> for ChainError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Successor access for the chain.
pub trait Edges {
    fn successors(&self, from: u32) -> &[u32];
}

impl Edges for MapGraph {
    fn successors(&self, from: u32) -> &[u32] {
        MapGraph::successors(self, from)
    }
}

/// Column of the row-normalized transition structure, in dense indices.
#[derive(Clone, Copy)]
enum Column {
    Transient(u32),
    Absorbing(u32),
}

pub struct AbsorbingMarkovChain<'a, G, W> {
    tmp_dir: PathBuf,
    nodes: RoaringBitmap,
    absorbing: RoaringBitmap,
    graph: &'a G,
    weighter: W,
    spill_entries: u64,
}

impl<'a, G, W> AbsorbingMarkovChain<'a, G, W>
where
    G: Edges,
    W: Fn(u32, u32) -> Result<f64, WeightError>,
{
    pub fn new(
        tmp_dir: impl Into<PathBuf>,
        nodes: RoaringBitmap,
        absorbing: RoaringBitmap,
        graph: &'a G,
        weighter: W,
    ) -> Self {
        let absorbing = &absorbing & &nodes;
        AbsorbingMarkovChain {
            tmp_dir: tmp_dir.into(),
            nodes,
            absorbing,
            graph,
            weighter,
            spill_entries: DEFAULT_SPILL_ENTRIES,
        }
    }

    /// Overrides the in-memory matrix limit. Tests force the spill path by
    /// setting it to zero.
    pub fn set_spill_entries(mut self, limit: u64) -> Self {
        self.spill_entries = limit;
        self
    }

    /// Maps every transient node to the absorbing state most likely to
    /// capture a walk starting there.
    pub fn absorption_assignments(
        &self,
        cancel: &CancellationToken,
    ) -> Result<HashMap<u32, u32>, ChainError> {
        self.absorption_probabilities(cancel)?.assignments()
    }

    /// Solves the chain and returns the full probability rows.
    pub fn absorption_probabilities(
        &self,
        cancel: &CancellationToken,
    ) -> Result<AbsorptionProbabilities, ChainError> {
        let absorbing: Vec<u32> = self.absorbing.iter().collect();
        let transient: Vec<u32> = (&self.nodes - &self.absorbing).iter().collect();
        let index: HashMap<u32, usize> = transient
            .iter()
            .enumerate()
            .map(|(dense, &id)| (id, dense))
            .collect();
        let absorbing_index: HashMap<u32, usize> = absorbing
            .iter()
            .enumerate()
            .map(|(dense, &id)| (id, dense))
            .collect();
        let targets = absorbing.len();

        // row-normalized transition structure in CSR form
        let mut row_offsets = Vec::with_capacity(transient.len() + 1);
        let mut columns: Vec<Column> = Vec::new();
        let mut probabilities: Vec<f64> = Vec::new();
        row_offsets.push(0usize);
        for (dense, &from) in transient.iter().enumerate() {
            if dense % 4096 == 0 && cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            let start = probabilities.len();
            let mut total = 0.0f64;
            for &to in self.graph.successors(from) {
                if !self.nodes.contains(to) {
                    continue;
                }
                let weight = (self.weighter)(from, to)?;
                if !(weight > 0.0 && weight <= 1.0) {
                    return Err(ChainError::Weight(WeightError::new(
                        from,
                        to,
                        "weight outside (0, 1]",
                    )));
                }
                columns.push(match absorbing_index.get(&to) {
                    Some(&target) => Column::Absorbing(target as u32),
                    None => Column::Transient(index[&to] as u32),
                });
                probabilities.push(weight);
                total += weight;
            }
            if total <= 0.0 {
                return Err(ChainError::Disconnected(from));
            }
            for probability in &mut probabilities[start..] {
                *probability /= total;
            }
            row_offsets.push(probabilities.len());
        }

        self.check_reachability(&transient, &row_offsets, &columns)?;

        let rows = self.iterate(cancel, &transient, targets, &row_offsets, &columns, &probabilities)?;

        Ok(AbsorptionProbabilities {
            transient,
            index,
            absorbing,
            rows,
        })
    }

    /// Every transient row must reach the absorbing set; the first offender
    /// in ID order is reported.
    fn check_reachability(
        &self,
        transient: &[u32],
        row_offsets: &[usize],
        columns: &[Column],
    ) -> Result<(), ChainError> {
        let mut predecessors: Vec<Vec<u32>> = vec![Vec::new(); transient.len()];
        let mut reaches = vec![false; transient.len()];
        let mut frontier = VecDeque::new();
        for dense in 0..transient.len() {
            for &column in &columns[row_offsets[dense]..row_offsets[dense + 1]] {
                match column {
                    Column::Absorbing(_) => {
                        if !reaches[dense] {
                            reaches[dense] = true;
                            frontier.push_back(dense);
                        }
                    }
                    Column::Transient(to) => predecessors[to as usize].push(dense as u32),
                }
            }
        }
        while let Some(dense) = frontier.pop_front() {
            for &from in &predecessors[dense] {
                if !reaches[from as usize] {
                    reaches[from as usize] = true;
                    frontier.push_back(from as usize);
                }
            }
        }
        match reaches.iter().position(|&ok| !ok) {
            Some(dense) => Err(ChainError::Disconnected(transient[dense])),
            None => Ok(()),
        }
    }

    fn iterate(
        &self,
        cancel: &CancellationToken,
        transient: &[u32],
        targets: usize,
        row_offsets: &[usize],
        columns: &[Column],
        probabilities: &[f64],
    ) -> Result<RowStore, ChainError> {
        let rows = transient.len();
        let mut current = vec![0.0f64; rows * targets];
        let mut next = vec![0.0f64; rows * targets];
        let mut iterations = 0usize;
        loop {
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(ChainError::NoConvergence(MAX_ITERATIONS));
            }
            let mut delta = 0.0f64;
            for dense in 0..rows {
                let row = &mut next[dense * targets..(dense + 1) * targets];
                row.fill(0.0);
                for k in row_offsets[dense]..row_offsets[dense + 1] {
                    let probability = probabilities[k];
                    match columns[k] {
                        Column::Absorbing(target) => row[target as usize] += probability,
                        Column::Transient(to) => {
                            let source =
                                &current[to as usize * targets..(to as usize + 1) * targets];
                            for (entry, &value) in row.iter_mut().zip(source) {
                                *entry += probability * value;
                            }
                        }
                    }
                }
                for (target, entry) in row.iter().enumerate() {
                    let change = (entry - current[dense * targets + target]).abs();
                    if change > delta {
                        delta = change;
                    }
                }
            }
            std::mem::swap(&mut current, &mut next);
            if delta <= TOLERANCE {
                break;
            }
        }
        event!(
            Level::DEBUG,
            iterations,
            transient = rows,
            absorbing = targets,
            "chain converged"
        );

        if (rows as u64) * (targets as u64) > self.spill_entries {
            let mut writer = BufWriter::new(tempfile::tempfile_in(&self.tmp_dir)?);
            for &probability in &current {
                writer.write_all(&probability.to_le_bytes())?;
            }
            let mut file = writer.into_inner().map_err(io::Error::from)?;
            file.seek(SeekFrom::Start(0))?;
            Ok(RowStore::Spilled(Mutex::new(file)))
        } else {
            Ok(RowStore::Memory(current))
        }
    }
}

#[derive(Debug)]
enum RowStore {
    Memory(Vec<f64>),
    Spilled(Mutex<File>),
}

/// Converged absorption probabilities, one row per transient node.
#[derive(Debug)]
pub struct AbsorptionProbabilities {
    transient: Vec<u32>,
    index: HashMap<u32, usize>,
    absorbing: Vec<u32>,
    rows: RowStore,
}

impl AbsorptionProbabilities {
    pub fn absorbing(&self) -> &[u32] {
        &self.absorbing
    }

    pub fn transient(&self) -> &[u32] {
        &self.transient
    }

    /// Probability that a walk from `from` ends at `target`. `None` when
    /// either ID is foreign to the chain.
    pub fn probability(&self, from: u32, target: u32) -> Result<Option<f64>, ChainError> {
        let t = match self.absorbing.binary_search(&target) {
            Ok(t) => t,
            Err(_) => return Ok(None),
        };
        if self.absorbing.binary_search(&from).is_ok() {
            return Ok(Some(if from == target { 1.0 } else { 0.0 }));
        }
        let dense = match self.index.get(&from) {
            Some(&dense) => dense,
            None => return Ok(None),
        };
        Ok(Some(self.row(dense)?[t]))
    }

    /// Argmax over targets for every transient row; ties go to the lowest
    /// absorbing ID.
    pub fn assignments(&self) -> Result<HashMap<u32, u32>, ChainError> {
        let targets = self.absorbing.len();
        let mut assignments = HashMap::with_capacity(self.transient.len());
        match &self.rows {
            RowStore::Memory(matrix) => {
                for (dense, &from) in self.transient.iter().enumerate() {
                    let row = &matrix[dense * targets..(dense + 1) * targets];
                    assignments.insert(from, self.absorbing[argmax(row)]);
                }
            }
            RowStore::Spilled(file) => {
                let mut guard = lock_scratch(file)?;
                guard.seek(SeekFrom::Start(0))?;
                let mut reader = BufReader::new(&mut *guard);
                let mut buffer = vec![0u8; targets * 8];
                for &from in &self.transient {
                    reader.read_exact(&mut buffer)?;
                    let row = decode_row(&buffer);
                    assignments.insert(from, self.absorbing[argmax(&row)]);
                }
            }
        }
        Ok(assignments)
    }

    fn row(&self, dense: usize) -> Result<Vec<f64>, ChainError> {
        let targets = self.absorbing.len();
        match &self.rows {
            RowStore::Memory(matrix) => {
                Ok(matrix[dense * targets..(dense + 1) * targets].to_vec())
            }
            RowStore::Spilled(file) => {
                let mut guard = lock_scratch(file)?;
                guard.seek(SeekFrom::Start((dense * targets * 8) as u64))?;
                let mut buffer = vec![0u8; targets * 8];
                guard.read_exact(&mut buffer)?;
                Ok(decode_row(&buffer))
            }
        }
    }
}

fn lock_scratch(file: &Mutex<File>) -> Result<std::sync::MutexGuard<'_, File>, ChainError> {
    file.lock()
        .map_err(|_| ChainError::Io(io::Error::new(io::ErrorKind::Other, "scratch file poisoned")))
}

fn decode_row(buffer: &[u8]) -> Vec<f64> {
    buffer
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            f64::from_le_bytes(bytes)
        })
        .collect()
}

fn argmax(row: &[f64]) -> usize {
    let mut best = 0;
    for (target, &probability) in row.iter().enumerate() {
        if probability > row[best] {
            best = target;
        }
    }
    best
}
