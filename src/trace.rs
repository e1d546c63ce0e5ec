/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Greedy level-by-level trace of a [`ClusterTree`] into a two-way split.
//!
//! At every level the current frontier of tree nodes is dealt onto two sides
//! of a scale ([`balance_the_scale`]), the resulting partition is scored by a
//! [`Loss`], and the lowest-scoring frontier becomes the starting point for
//! the next level. The best partition seen over the whole trace is kept.
//!
//! # Frontier expansion
//!
//! ```text
//! frontier  [R]                  level 0  (root only)
//!   expand  [A, B, C]            level 1  every node with children replaced
//!   expand  [A1, A2, B, C1, C2]  level 2  leaves stay in place
//! ```
//!
//! Besides expanding every node at once, each level also tries expanding a
//! single node, so a coarse cluster that balances well is not broken up just
//! because its neighbour needed splitting. Chains of single-child nodes are
//! collapsed during expansion.
//!
//! # Invariants
//!
//! - The recorded best loss never increases; it only changes on strict
//!   improvement.
//! - A partition with an empty side scores `+∞` and is never recorded.
//! - The trace always terminates: it stops when nothing in the frontier has
//!   children, or after `max_levels` levels.

use core::cmp::Reverse;

use tracing::{debug, trace};

use crate::config::{DistributionConfig, SplitFunction};
use crate::error::Result;
use crate::tree::{intersection_len, ClusterTree, Group, NodeId};

// ─── Targets ─────────────────────────────────────────────────────────────────

/// Required size of each side of the scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Targets {
    /// Target for side 0 and side 1.
    pub sizes: [usize; 2],
}

impl Targets {
    /// Split `total` between `n0` and `n1` shares, rounding side 0 up.
    ///
    /// For a 1-vs-rest robot split this gives `ceil(total / r)` and the rest.
    pub fn proportional(total: usize, n0: usize, n1: usize) -> Self {
        let groups = (n0 + n1).max(1);
        let t0 = (total * n0).div_ceil(groups);
        Self { sizes: [t0, total - t0.min(total)] }
    }

    /// Quadrant split: side 0 is one of `groups` quadrants and never exceeds
    /// `capacity`.
    pub fn capped(total: usize, groups: usize, capacity: usize) -> Self {
        let share = total.div_ceil(groups.max(1));
        let t0 = share.min(capacity).min(total);
        Self { sizes: [t0, total - t0] }
    }

    /// Sum of both targets.
    pub fn total(&self) -> usize {
        self.sizes[0] + self.sizes[1]
    }
}

/// What a node weighs on the scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Weighting {
    /// Number of cover keys (packs in the robot split).
    Cover,
    /// Number of drugs (canister slots in the quadrant split).
    Drugs,
}

impl Weighting {
    fn of<K: Ord>(self, group: &Group<K>) -> usize {
        match self {
            Self::Cover => group.cover.len(),
            Self::Drugs => group.drugs.len(),
        }
    }
}

// ─── Loss ────────────────────────────────────────────────────────────────────

/// Partition score; lower is better.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Loss {
    /// Number of cover keys on both sides.
    CommonCover,
    /// Larger side size, only when the shared count is within `max_common`.
    Bucketed {
        /// Largest admissible shared count.
        max_common: usize,
    },
}

impl Loss {
    /// Resolve a split function against the configured bucket table.
    pub fn from_config(config: &DistributionConfig, split: SplitFunction) -> Result<Self> {
        Ok(match config.bucket_limit(split)? {
            None => Self::CommonCover,
            Some(max_common) => Self::Bucketed { max_common },
        })
    }

    /// Score a candidate with `common` shared keys and side sizes `s0`, `s1`.
    pub fn score(&self, common: usize, s0: usize, s1: usize) -> f64 {
        if s0 == 0 || s1 == 0 {
            return f64::INFINITY;
        }
        match *self {
            Self::CommonCover => common as f64,
            Self::Bucketed { max_common } if common <= max_common => s0.max(s1) as f64,
            Self::Bucketed { .. } => f64::INFINITY,
        }
    }
}

// ─── Partition ───────────────────────────────────────────────────────────────

/// A two-way split of drugs with their covers.
#[derive(Clone, Debug)]
pub struct Partition<K: Ord> {
    /// Side 0 and side 1.
    pub sides: [Group<K>; 2],
    /// Tree nodes dealt onto each side.
    pub nodes: [Vec<NodeId>; 2],
    /// Cover keys present on both sides.
    pub common: usize,
    /// Score under the trace's loss.
    pub loss: f64,
    /// Trace level the partition was found at.
    pub level: usize,
}

/// Result of one [`TreeTrace::run`].
#[derive(Clone, Debug)]
pub struct TraceOutcome<K: Ord> {
    /// Best partition, `None` when every candidate scored `+∞`.
    pub best: Option<Partition<K>>,
    /// Best loss after each evaluated level.
    pub best_loss_history: Vec<f64>,
    /// Number of levels evaluated.
    pub levels: usize,
}

// ─── balance_the_scale ───────────────────────────────────────────────────────

/// Deal weighted items onto two sides so each lands near its target.
///
/// Items are taken heaviest first (ties keep input order). An item goes to
/// side 0 when it fits there and either side 1 is already full or side 0
/// ends up no further from its target than side 1 would. Otherwise it goes
/// to side 1 if it fits. When it fits nowhere it goes to whichever side
/// overflows least.
pub fn balance_the_scale<T: Clone>(items: &[(T, usize)], targets: Targets) -> [Vec<T>; 2] {
    let mut order: Vec<usize> = (0..items.len()).collect();
    order.sort_by_key(|&i| (Reverse(items[i].1), i));

    let [t0, t1] = targets.sizes;
    let (mut s0, mut s1) = (0usize, 0usize);
    let mut sides: [Vec<T>; 2] = [Vec::new(), Vec::new()];

    for i in order {
        let (item, w) = (&items[i].0, items[i].1);
        let fits0 = s0 + w <= t0;
        let fits1 = s1 + w <= t1;
        let side = if fits0 && (!fits1 || s1 >= t1 || t0 - (s0 + w) <= t1 - (s1 + w)) {
            0
        } else if fits1 {
            1
        } else {
            let over0 = s0 + w - t0.min(s0 + w);
            let over1 = s1 + w - t1.min(s1 + w);
            if over0 <= over1 {
                0
            } else {
                1
            }
        };
        if side == 0 {
            s0 += w;
        } else {
            s1 += w;
        }
        sides[side].push(item.clone());
    }
    sides
}

// ─── TreeTrace ───────────────────────────────────────────────────────────────

/// Traces a cluster tree for its best two-way split.
pub struct TreeTrace<'a, K: Ord> {
    tree: &'a ClusterTree<K>,
    targets: Targets,
    loss: Loss,
    weighting: Weighting,
    max_levels: usize,
}

impl<'a, K: Ord + Clone> TreeTrace<'a, K> {
    /// Trace `tree` towards `targets` under `loss`, weighting nodes by cover.
    pub fn new(tree: &'a ClusterTree<K>, targets: Targets, loss: Loss) -> Self {
        Self { tree, targets, loss, weighting: Weighting::Cover, max_levels: 7 }
    }

    /// Use `weighting` for node weights and side sizes.
    pub fn weighting(mut self, weighting: Weighting) -> Self {
        self.weighting = weighting;
        self
    }

    /// Stop after `levels` expansion levels.
    pub fn max_levels(mut self, levels: usize) -> Self {
        self.max_levels = levels;
        self
    }

    /// Run the trace.
    pub fn run(&self) -> TraceOutcome<K> {
        let mut frontier = vec![NodeId::ROOT];
        let mut best: Option<Partition<K>> = None;
        let mut history = Vec::new();

        let root = self.evaluate(&frontier, 0);
        Self::keep_if_better(&mut best, root);
        history.push(best_loss(&best));

        let mut levels = 1;
        for level in 1..=self.max_levels {
            let expandable: Vec<usize> = frontier
                .iter()
                .enumerate()
                .filter(|(_, n)| !self.tree.children(**n).is_empty())
                .map(|(i, _)| i)
                .collect();
            if expandable.is_empty() {
                break;
            }

            let mut candidates = vec![self.expand(&frontier)];
            if expandable.len() > 1 {
                candidates.extend(expandable.iter().map(|&i| self.expand_one(&frontier, i)));
            }

            let mut chosen: Option<(Vec<NodeId>, Partition<K>)> = None;
            for config in candidates {
                let part = self.evaluate(&config, level);
                let better = match &chosen {
                    None => true,
                    Some((_, p)) => part.loss < p.loss,
                };
                if better {
                    chosen = Some((config, part));
                }
            }
            let Some((config, part)) = chosen else { break };

            trace!(level, loss = part.loss, nodes = config.len(), "trace level");
            Self::keep_if_better(&mut best, part);
            history.push(best_loss(&best));
            frontier = config;
            levels += 1;
        }

        debug!(levels, loss = best_loss(&best), found = best.is_some(), "tree trace done");
        TraceOutcome { best, best_loss_history: history, levels }
    }

    fn keep_if_better(best: &mut Option<Partition<K>>, candidate: Partition<K>) {
        if candidate.loss < best_loss(best) {
            *best = Some(candidate);
        }
    }

    /// Replace every node that has children with its children.
    pub fn expand(&self, frontier: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(frontier.len() * 2);
        for node in frontier {
            self.push_expanded(*node, &mut out);
        }
        out
    }

    /// Replace only the node at `index` with its children.
    pub fn expand_one(&self, frontier: &[NodeId], index: usize) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(frontier.len() + 2);
        for (i, node) in frontier.iter().enumerate() {
            if i == index {
                self.push_expanded(*node, &mut out);
            } else {
                out.push(*node);
            }
        }
        out
    }

    fn push_expanded(&self, node: NodeId, out: &mut Vec<NodeId>) {
        let kids = self.tree.children(node);
        if kids.is_empty() {
            out.push(node);
            return;
        }
        for &kid in kids {
            let mut n = kid;
            while let [only] = self.tree.children(n) {
                n = *only;
            }
            out.push(n);
        }
    }

    /// Balance `config` onto the scale and score the result.
    pub fn evaluate(&self, config: &[NodeId], level: usize) -> Partition<K> {
        let items: Vec<(NodeId, usize)> = config
            .iter()
            .filter_map(|n| self.tree.group(*n).map(|g| (*n, self.weighting.of(g))))
            .collect();
        let nodes = balance_the_scale(&items, self.targets);

        let mut sides = [Group::new(), Group::new()];
        for (side, members) in sides.iter_mut().zip(nodes.iter()) {
            for node in members {
                if let Some(g) = self.tree.group(*node) {
                    side.absorb(g);
                }
            }
        }

        let common = intersection_len(&sides[0].cover, &sides[1].cover);
        let loss = self.loss.score(
            common,
            self.weighting.of(&sides[0]),
            self.weighting.of(&sides[1]),
        );
        Partition { sides, nodes, common, loss, level }
    }
}

fn best_loss<K: Ord>(best: &Option<Partition<K>>) -> f64 {
    best.as_ref().map_or(f64::INFINITY, |p| p.loss)
}
