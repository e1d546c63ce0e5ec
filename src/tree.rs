/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Independence-degree cluster tree.
//!
//! Drugs are grouped by how much of their *cover* they share. In the robot
//! split the cover of a drug is the set of packs using it; in the quadrant
//! split it is the set of slot combinations containing it. The builder is
//! generic over the cover key so both passes share one implementation.
//!
//! # Algorithm
//!
//! ```text
//! root (0, -1) ── all drugs
//!   degree 0:  merge clusters whose covers share > 0 keys   (connected parts)
//!   degree 1:  inside each child, merge on > 1 shared keys
//!   ...
//!   degree L:  stop
//! ```
//!
//! A node is expanded into the clusters produced by one merge pass over its
//! own drugs at `degree + 1`. Nodes holding a single drug, or sitting at the
//! depth limit, stay unexpanded.
//!
//! Input drugs are sorted before any merge so the tree is reproducible.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use hashbrown::HashMap;
use tracing::debug;

use crate::matrix::DrugId;

// ─── NodeId ──────────────────────────────────────────────────────────────────

/// Tree node identity: running id plus the independence degree it was built at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    /// Sequential id, unique within one tree.
    pub id: u32,
    /// Independence degree; `-1` for the synthetic root.
    pub degree: i32,
}

impl NodeId {
    /// The synthetic root `(0, -1)`.
    pub const ROOT: NodeId = NodeId { id: 0, degree: -1 };
}

// ─── Group ───────────────────────────────────────────────────────────────────

/// A set of drugs together with the union of their covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Group<K: Ord> {
    /// Drugs in the group.
    pub drugs: BTreeSet<DrugId>,
    /// Union of the drugs' covers.
    pub cover: BTreeSet<K>,
}

impl<K: Ord + Clone> Group<K> {
    /// Empty group.
    pub fn new() -> Self {
        Self { drugs: BTreeSet::new(), cover: BTreeSet::new() }
    }

    /// Absorb another group.
    pub fn absorb(&mut self, other: &Group<K>) {
        self.drugs.extend(other.drugs.iter().cloned());
        self.cover.extend(other.cover.iter().cloned());
    }

    /// Number of cover keys shared with `other`.
    pub fn common_with(&self, other: &Group<K>) -> usize {
        intersection_len(&self.cover, &other.cover)
    }
}

impl<K: Ord + Clone> Default for Group<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Size of the intersection of two sorted sets.
pub(crate) fn intersection_len<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> usize {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().filter(|k| large.contains(*k)).count()
}

// ─── ClusterTree ─────────────────────────────────────────────────────────────

/// Output of [`ClusterTreeBuilder::build`].
#[derive(Clone, Debug)]
pub struct ClusterTree<K: Ord> {
    children: HashMap<NodeId, Vec<NodeId>>,
    info: HashMap<NodeId, Group<K>>,
    unexplored: Vec<NodeId>,
}

impl<K: Ord> ClusterTree<K> {
    /// Children of `node`, empty for leaves.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.children.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Cluster held by `node`.
    pub fn group(&self, node: NodeId) -> Option<&Group<K>> {
        self.info.get(&node)
    }

    /// Nodes that were not expanded further.
    pub fn unexplored(&self) -> &[NodeId] {
        &self.unexplored
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.info.len()
    }

    /// `true` if the tree holds only the root or nothing at all.
    pub fn is_empty(&self) -> bool {
        self.info.len() <= 1
    }

    /// `true` if the root has at least one child.
    pub fn is_expandable(&self) -> bool {
        !self.children(NodeId::ROOT).is_empty()
    }

    /// Parent → sorted children, for comparing tree shapes.
    pub fn shape(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        self.children.iter().map(|(k, v)| (*k, v.clone())).collect()
    }
}

// ─── ClusterTreeBuilder ──────────────────────────────────────────────────────

/// Builds a [`ClusterTree`] from a drug → cover mapping.
pub struct ClusterTreeBuilder<'a, K: Ord> {
    covers: &'a BTreeMap<DrugId, BTreeSet<K>>,
    max_independence: i32,
}

impl<'a, K: Ord + Clone> ClusterTreeBuilder<'a, K> {
    /// `covers` maps every drug in scope to its cover keys.
    pub fn new(covers: &'a BTreeMap<DrugId, BTreeSet<K>>, max_independence: i32) -> Self {
        Self { covers, max_independence }
    }

    /// Build the tree over every drug in `covers`.
    pub fn build(&self) -> ClusterTree<K> {
        let drugs: Vec<DrugId> = self.covers.keys().cloned().collect();
        self.build_for(&drugs)
    }

    /// Build the tree over `drugs` (sorted internally; unknown drugs skipped).
    pub fn build_for(&self, drugs: &[DrugId]) -> ClusterTree<K> {
        let mut drugs: Vec<DrugId> =
            drugs.iter().filter(|d| self.covers.contains_key(*d)).cloned().collect();
        drugs.sort();
        drugs.dedup();

        let mut root = Group::new();
        for drug in &drugs {
            root.drugs.insert(drug.clone());
            if let Some(cover) = self.cover(drug) {
                root.cover.extend(cover.iter().cloned());
            }
        }

        let mut tree = ClusterTree {
            children: HashMap::new(),
            info: HashMap::new(),
            unexplored: Vec::new(),
        };
        tree.info.insert(NodeId::ROOT, root);

        let mut queue: VecDeque<(NodeId, Vec<DrugId>)> = VecDeque::new();
        queue.push_back((NodeId::ROOT, drugs));
        let mut next_id: u32 = 1;

        while let Some((parent, members)) = queue.pop_front() {
            let degree = parent.degree + 1;
            if degree > self.max_independence || members.len() <= 1 {
                tree.children.insert(parent, Vec::new());
                tree.unexplored.push(parent);
                continue;
            }

            let clusters = self.merge_pass(&members, degree);
            let mut kids = Vec::with_capacity(clusters.len());
            for group in clusters {
                let node = NodeId { id: next_id, degree };
                next_id += 1;
                let child_drugs: Vec<DrugId> = group.drugs.iter().cloned().collect();
                tree.info.insert(node, group);
                kids.push(node);
                queue.push_back((node, child_drugs));
            }
            tree.children.insert(parent, kids);
        }

        debug!(
            nodes = tree.info.len(),
            leaves = tree.unexplored.len(),
            max_degree = self.max_independence,
            "cluster tree built"
        );
        tree
    }

    /// One merge pass at independence degree `degree`.
    ///
    /// Walks `drugs` in order. A drug joins every existing cluster whose cover
    /// shares more than `degree` keys with its own; several matches collapse
    /// into the first. No match starts a new singleton. Drugs without a cover
    /// entry are skipped.
    pub fn merge_pass(&self, drugs: &[DrugId], degree: i32) -> Vec<Group<K>> {
        let threshold = usize::try_from(degree).unwrap_or(0);
        let mut clusters: Vec<Group<K>> = Vec::new();

        for drug in drugs {
            let Some(cover) = self.cover(drug) else { continue };
            let single = Group {
                drugs: BTreeSet::from([drug.clone()]),
                cover: cover.clone(),
            };
            let matches: Vec<usize> = clusters
                .iter()
                .enumerate()
                .filter(|(_, c)| intersection_len(&c.cover, cover) > threshold)
                .map(|(i, _)| i)
                .collect();

            match matches.split_first() {
                None => clusters.push(single),
                Some((&first, rest)) => {
                    for &i in rest.iter().rev() {
                        let merged = clusters.remove(i);
                        clusters[first].absorb(&merged);
                    }
                    clusters[first].absorb(&single);
                }
            }
        }
        clusters
    }

    fn cover(&self, drug: &DrugId) -> Option<&BTreeSet<K>> {
        self.covers.get(drug)
    }
}
