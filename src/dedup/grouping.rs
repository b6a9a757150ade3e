//! Partitioning of a record list into duplicate clusters.
//!
//! The default strategy is greedy similarity-to-seed clustering: records are
//! visited in input order, and each record not yet claimed becomes a seed
//! that claims every later unclaimed record matching it. Membership is judged
//! against the seed only, so a group may hold records that would not match
//! each other directly, and a different input order can produce different
//! groups. Exports depend on this exact behavior.
//!
//! [`ClusteringStrategy::Transitive`] instead takes connected components of
//! the full match graph. It merges strictly more than the seed strategy and
//! costs a full pairwise pass.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::signature::signature;
use super::similarity::{RecordFeatures, SimilarityScorer};
use crate::config::Threshold;
use crate::domain::EmailRecord;
use crate::progress::{Cancelled, Phase, RunControl};

/// Inner scans shorter than this stay on the calling thread.
const PARALLEL_MIN_CANDIDATES: usize = 64;

/// Indices into the grouped record slice, in input order. Always two or more.
pub type Cluster = Vec<usize>;

/// How matches are turned into groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringStrategy {
    /// Greedy clustering around the first unclaimed record.
    #[default]
    SeedGreedy,
    /// Connected components over all pairwise matches (union-find).
    Transitive,
}

/// Groups near-duplicate records.
#[derive(Debug, Clone)]
pub struct DuplicateGrouper {
    scorer: SimilarityScorer,
    threshold: Threshold,
    strategy: ClusteringStrategy,
    parallel: bool,
}

impl DuplicateGrouper {
    pub fn new(scorer: SimilarityScorer, threshold: Threshold) -> Self {
        Self {
            scorer,
            threshold,
            strategy: ClusteringStrategy::default(),
            parallel: true,
        }
    }

    pub fn with_strategy(mut self, strategy: ClusteringStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enables or disables parallel inner scans.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Partitions `records` into clusters of two or more duplicates.
    ///
    /// Records in no cluster are unique. Cancellation is checked once per
    /// outer record.
    pub fn group(
        &self,
        records: &[EmailRecord],
        control: &RunControl,
    ) -> Result<Vec<Cluster>, Cancelled> {
        let index = MatchIndex {
            features: records.iter().map(RecordFeatures::extract).collect(),
            signatures: records.iter().map(signature).collect(),
            scorer: &self.scorer,
            threshold: self.threshold.value(),
        };

        let clusters = match self.strategy {
            ClusteringStrategy::SeedGreedy => self.seed_greedy(&index, control)?,
            ClusteringStrategy::Transitive => self.transitive(&index, control)?,
        };

        tracing::debug!(
            records = records.len(),
            clusters = clusters.len(),
            strategy = ?self.strategy,
            "grouping complete"
        );
        Ok(clusters)
    }

    fn seed_greedy(
        &self,
        index: &MatchIndex<'_, '_>,
        control: &RunControl,
    ) -> Result<Vec<Cluster>, Cancelled> {
        let n = index.len();
        let mut assigned = vec![false; n];
        let mut clusters = Vec::new();
        let mut tracker = control.tracker(Phase::Grouping, n);

        for seed in 0..n {
            control.checkpoint()?;

            if !assigned[seed] {
                // Earlier unclaimed records already failed to match this one,
                // and matching is symmetric, so only later records can join.
                let candidates: Vec<usize> = (seed + 1..n).filter(|&j| !assigned[j]).collect();
                let matched = self.scan(index, seed, &candidates);

                assigned[seed] = true;
                if !matched.is_empty() {
                    let mut cluster = Vec::with_capacity(matched.len() + 1);
                    cluster.push(seed);
                    for j in matched {
                        assigned[j] = true;
                        cluster.push(j);
                    }
                    clusters.push(cluster);
                }
            }

            tracker.update(seed + 1);
        }

        tracker.finish();
        Ok(clusters)
    }

    fn transitive(
        &self,
        index: &MatchIndex<'_, '_>,
        control: &RunControl,
    ) -> Result<Vec<Cluster>, Cancelled> {
        let n = index.len();
        let mut sets = DisjointSet::new(n);
        let mut tracker = control.tracker(Phase::Grouping, n);

        for i in 0..n {
            control.checkpoint()?;
            let candidates: Vec<usize> = (i + 1..n).collect();
            for j in self.scan(index, i, &candidates) {
                sets.union(i, j);
            }
            tracker.update(i + 1);
        }
        tracker.finish();

        let mut by_root: Vec<Vec<usize>> = vec![Vec::new(); n];
        for i in 0..n {
            let root = sets.find(i);
            by_root[root].push(i);
        }

        let mut clusters: Vec<Cluster> = by_root.into_iter().filter(|c| c.len() > 1).collect();
        clusters.sort_by_key(|c| c[0]);
        Ok(clusters)
    }

    /// Returns the candidates matching `seed`, in candidate order.
    fn scan(&self, index: &MatchIndex<'_, '_>, seed: usize, candidates: &[usize]) -> Vec<usize> {
        if self.parallel && candidates.len() >= PARALLEL_MIN_CANDIDATES {
            candidates
                .par_iter()
                .copied()
                .filter(|&j| index.matches(seed, j))
                .collect()
        } else {
            candidates
                .iter()
                .copied()
                .filter(|&j| index.matches(seed, j))
                .collect()
        }
    }
}

/// Precomputed per-record data shared by every comparison in one pass.
struct MatchIndex<'r, 's> {
    features: Vec<RecordFeatures<'r>>,
    signatures: Vec<String>,
    scorer: &'s SimilarityScorer,
    threshold: f64,
}

impl MatchIndex<'_, '_> {
    fn len(&self) -> usize {
        self.features.len()
    }

    /// Equal signatures match outright; otherwise the similarity decides.
    fn matches(&self, a: usize, b: usize) -> bool {
        self.signatures[a] == self.signatures[b]
            || self
                .scorer
                .score_features(&self.features[a], &self.features[b])
                .value
                >= self.threshold
    }
}

/// Union-find with path halving; roots are always the smallest index.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}
