/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Recursive 1-vs-rest pack split across robots.
//!
//! With `r` robots left, the packs are split into one robot's share
//! (`ceil(total / r)`) and the share of the other `r - 1` robots. Each side
//! becomes an owned sub-matrix and the second side recurses. Drugs without
//! canisters (manual) and drugs with at least `r` canisters (they can follow
//! every remaining robot) are kept out of the tree at each level; the
//! post-processor folds them back in.
//!
//! Clusters come out in canonical recursion order and are bound to physical
//! robots afterwards by [`match_robots`].

use core::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::canister::{canister_count, DrugCanisterInfo, RobotId};
use crate::cluster::Cluster;
use crate::config::{DistributionConfig, SplitFunction};
use crate::error::{InputError, Result};
use crate::matrix::{DrugId, IncidenceMatrix, PackId};
use crate::postprocess::PostProcessor;
use crate::slots::PackSlots;
use crate::trace::{Loss, Targets, TreeTrace};
use crate::tree::ClusterTreeBuilder;

// ─── Drug classes ────────────────────────────────────────────────────────────

/// Drugs of a sub-matrix split by canister count relative to the robots left.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrugClasses {
    /// `1 <= canisters < robots`: these drive the tree.
    pub active: BTreeSet<DrugId>,
    /// No canister: filled by hand.
    pub manual: BTreeSet<DrugId>,
    /// `canisters >= robots`.
    pub multi: BTreeSet<DrugId>,
}

impl DrugClasses {
    /// Classify every drug used in `matrix`.
    pub fn classify(matrix: &IncidenceMatrix, canisters: &DrugCanisterInfo, robots: usize) -> Self {
        let mut out = Self::default();
        for drug in matrix.used_drugs() {
            match canister_count(canisters, &drug) {
                0 => out.manual.insert(drug),
                n if n >= robots => out.multi.insert(drug),
                _ => out.active.insert(drug),
            };
        }
        out
    }

    /// Manual and multi-canister drugs together.
    pub fn removed(&self) -> BTreeSet<DrugId> {
        self.manual.union(&self.multi).cloned().collect()
    }
}

// ─── Output shapes ───────────────────────────────────────────────────────────

/// Externally reported cluster of one robot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssignedCluster {
    /// Packs the robot fills.
    pub packs: BTreeSet<PackId>,
    /// Drugs those packs need.
    pub drugs: BTreeSet<DrugId>,
    /// `packs.len()`.
    pub pack_length: usize,
    /// `drugs.len()`.
    pub drug_length: usize,
}

impl From<&Cluster> for AssignedCluster {
    fn from(c: &Cluster) -> Self {
        Self {
            packs: c.packs.clone(),
            drugs: c.drugs.clone(),
            pack_length: c.pack_length(),
            drug_length: c.drug_length(),
        }
    }
}

/// Robot → its cluster.
pub type RobotAssignment = BTreeMap<RobotId, AssignedCluster>;

/// Result of sweeping several split functions.
#[derive(Clone, Debug)]
pub struct MultiSplitOutcome {
    /// Canonical clusters per split function.
    pub results: BTreeMap<SplitFunction, Vec<Cluster>>,
    /// Split function with the best score.
    pub best: SplitFunction,
}

impl MultiSplitOutcome {
    /// Clusters of the winning split function.
    pub fn best_clusters(&self) -> &[Cluster] {
        self.results.get(&self.best).map_or(&[], Vec::as_slice)
    }
}

/// `(largest robot pack count, duplicated drug placements)`; lower is better.
pub fn split_score(clusters: &[Cluster]) -> (usize, usize) {
    let largest = clusters.iter().map(Cluster::pack_length).max().unwrap_or(0);
    let total: usize = clusters.iter().map(Cluster::drug_length).sum();
    let distinct: BTreeSet<&DrugId> = clusters.iter().flat_map(|c| c.drugs.iter()).collect();
    (largest, total - distinct.len())
}

// ─── MultiRobotOrchestrator ──────────────────────────────────────────────────

/// Splits a batch of packs across `r` robots.
pub struct MultiRobotOrchestrator<'a> {
    config: &'a DistributionConfig,
    canisters: &'a DrugCanisterInfo,
    slots: &'a PackSlots,
    delivery_dates: Option<&'a BTreeMap<PackId, i64>>,
}

impl<'a> MultiRobotOrchestrator<'a> {
    /// Orchestrator over the given inventory and slot layout.
    pub fn new(config: &'a DistributionConfig, canisters: &'a DrugCanisterInfo, slots: &'a PackSlots) -> Self {
        Self { config, canisters, slots, delivery_dates: None }
    }

    /// Keep packs with the same delivery date together where possible.
    pub fn delivery_dates(mut self, dates: Option<&'a BTreeMap<PackId, i64>>) -> Self {
        self.delivery_dates = dates;
        self
    }

    /// Split with the configured split function.
    pub fn run(&self, matrix: &IncidenceMatrix, robots: usize) -> Result<Vec<Cluster>> {
        self.run_with(matrix, robots, self.config.split_function)
    }

    /// Split with `split`; returns exactly `robots` clusters.
    pub fn run_with(&self, matrix: &IncidenceMatrix, robots: usize, split: SplitFunction) -> Result<Vec<Cluster>> {
        if robots == 0 {
            return Err(InputError::NoRobots.into());
        }
        let loss = Loss::from_config(self.config, split)?;
        let mut out = Vec::with_capacity(robots);
        self.split(matrix.clone(), robots, loss, &mut out);
        info!(
            robots,
            split = split.id(),
            packs = ?out.iter().map(Cluster::pack_length).collect::<Vec<_>>(),
            "robot split done"
        );
        Ok(out)
    }

    /// Run every split function in `splits` and keep the best.
    ///
    /// The winner has the smallest [`split_score`]; ties go to the earlier
    /// entry of `splits`.
    pub fn run_multi_split(
        &self,
        matrix: &IncidenceMatrix,
        robots: usize,
        splits: &[SplitFunction],
    ) -> Result<MultiSplitOutcome> {
        let mut results = BTreeMap::new();
        let mut best: Option<(SplitFunction, (usize, usize))> = None;
        for &split in splits {
            let clusters = self.run_with(matrix, robots, split)?;
            let score = split_score(&clusters);
            debug!(split = split.id(), ?score, "multi split candidate");
            if best.map_or(true, |(_, s)| score < s) {
                best = Some((split, score));
            }
            results.insert(split, clusters);
        }
        let best = best.map_or(self.config.split_function, |(s, _)| s);
        Ok(MultiSplitOutcome { results, best })
    }

    fn split(&self, matrix: IncidenceMatrix, robots: usize, loss: Loss, out: &mut Vec<Cluster>) {
        if robots <= 1 {
            out.push(Cluster::whole(&matrix, self.slots));
            return;
        }
        if matrix.pack_count() == 0 {
            debug!(robots_remaining = robots, "no packs left");
            out.extend((0..robots).map(|_| Cluster::default()));
            return;
        }

        let classes = DrugClasses::classify(&matrix, self.canisters, robots);
        let removed = classes.removed();
        let targets = Targets::proportional(matrix.pack_count(), 1, robots - 1);
        info!(
            robots_remaining = robots,
            packs = matrix.pack_count(),
            drugs = matrix.drug_count(),
            active = classes.active.len(),
            manual = classes.manual.len(),
            multi = classes.multi.len(),
            "robot split level"
        );

        let covers: BTreeMap<DrugId, BTreeSet<PackId>> = classes
            .active
            .iter()
            .map(|d| (d.clone(), matrix.packs_of(d).clone()))
            .collect();
        let tree = ClusterTreeBuilder::new(&covers, self.config.max_independence_factor).build();
        let outcome = TreeTrace::new(&tree, targets, loss)
            .max_levels(self.config.max_trace_levels)
            .run();

        let result = PostProcessor::new(&matrix, self.slots, targets)
            .active(&classes.active)
            .removed(&removed)
            .canisters(self.canisters)
            .delivery_dates(self.delivery_dates)
            .finalize(outcome.best.as_ref());

        let [one, rest] = result.clusters;
        let sub_one = matrix.restrict(&one.packs, &one.drugs).without_empty_drugs();
        let sub_rest = matrix.restrict(&rest.packs, &rest.drugs).without_empty_drugs();
        drop(matrix);

        self.split(sub_one, 1, loss, out);
        self.split(sub_rest, robots - 1, loss, out);
    }
}

// ─── Robot matching ──────────────────────────────────────────────────────────

/// Bind canonical clusters to robots by drug overlap with what each robot
/// already holds.
///
/// Pairs are taken greedily by largest overlap; ties go to the robot listed
/// first, then to the earlier cluster. Extra clusters (more clusters than
/// robots) are not assigned.
pub fn match_robots(
    clusters: Vec<Cluster>,
    robots: &[RobotId],
    loaded: &BTreeMap<RobotId, BTreeSet<DrugId>>,
) -> BTreeMap<RobotId, Cluster> {
    let mut pairs: Vec<(usize, usize, usize)> = Vec::with_capacity(clusters.len() * robots.len());
    for (ri, robot) in robots.iter().enumerate() {
        let held = loaded.get(robot);
        for (ci, cluster) in clusters.iter().enumerate() {
            let overlap = held.map_or(0, |h| cluster.drugs.intersection(h).count());
            pairs.push((overlap, ri, ci));
        }
    }
    pairs.sort_by_key(|&(overlap, ri, ci)| (Reverse(overlap), ri, ci));

    let mut slots: Vec<Option<Cluster>> = clusters.into_iter().map(Some).collect();
    let mut out = BTreeMap::new();
    for (overlap, ri, ci) in pairs {
        let robot = robots[ri];
        if out.contains_key(&robot) {
            continue;
        }
        if let Some(cluster) = slots[ci].take() {
            debug!(robot, cluster = ci, overlap, "robot matched");
            out.insert(robot, cluster);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> DrugId {
        s.to_string()
    }

    fn matrix(rows: &[(PackId, &[&str])]) -> IncidenceMatrix {
        IncidenceMatrix::from_entries(
            rows.iter().flat_map(|(p, ds)| ds.iter().map(move |x| (*p, d(x), 1))),
        )
        .unwrap()
    }

    fn single_canisters(drugs: &[&str]) -> DrugCanisterInfo {
        drugs
            .iter()
            .enumerate()
            .map(|(i, x)| (d(x), BTreeSet::from([i as u64 + 1])))
            .collect()
    }

    #[test]
    fn classify_against_robot_count() {
        let m = matrix(&[(1, &["A", "B", "M"])]);
        let mut info = single_canisters(&["A"]);
        info.insert(d("B"), BTreeSet::from([10, 11, 12]));
        let c = DrugClasses::classify(&m, &info, 3);
        assert_eq!(c.active, BTreeSet::from([d("A")]));
        assert_eq!(c.manual, BTreeSet::from([d("M")]));
        assert_eq!(c.multi, BTreeSet::from([d("B")]));
        let c = DrugClasses::classify(&m, &info, 4);
        assert!(c.active.contains("B"));
    }

    #[test]
    fn three_robots_get_three_disjoint_clusters() {
        let m = matrix(&[
            (1, &["A"]),
            (2, &["A"]),
            (3, &["B"]),
            (4, &["B"]),
            (5, &["C"]),
            (6, &["C"]),
        ]);
        let info = single_canisters(&["A", "B", "C"]);
        let cfg = DistributionConfig::default();
        let slots = PackSlots::new();
        let out = MultiRobotOrchestrator::new(&cfg, &info, &slots).run(&m, 3).unwrap();
        assert_eq!(out.len(), 3);
        let mut seen = BTreeSet::new();
        for c in &out {
            assert_eq!(c.pack_length(), 2);
            assert_eq!(c.drug_length(), 1);
            assert!(c.packs.iter().all(|p| seen.insert(*p)));
        }
    }

    #[test]
    fn more_robots_than_packs_yields_empty_clusters() {
        let m = matrix(&[(1, &["A"])]);
        let info = single_canisters(&["A"]);
        let cfg = DistributionConfig::default();
        let slots = PackSlots::new();
        let out = MultiRobotOrchestrator::new(&cfg, &info, &slots).run(&m, 3).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.iter().map(Cluster::pack_length).sum::<usize>(), 1);
    }

    #[test]
    fn zero_robots_is_an_error() {
        let m = matrix(&[(1, &["A"])]);
        let cfg = DistributionConfig::default();
        let slots = PackSlots::new();
        let info = DrugCanisterInfo::new();
        assert!(MultiRobotOrchestrator::new(&cfg, &info, &slots).run(&m, 0).is_err());
    }

    #[test]
    fn multi_split_picks_lowest_score() {
        let m = matrix(&[(1, &["A"]), (2, &["A"]), (3, &["B"]), (4, &["B"])]);
        let info = single_canisters(&["A", "B"]);
        let cfg = DistributionConfig::default();
        let slots = PackSlots::new();
        let orch = MultiRobotOrchestrator::new(&cfg, &info, &slots);
        let all = cfg.all_split_functions();
        let outcome = orch.run_multi_split(&m, 2, &all).unwrap();
        assert_eq!(outcome.results.len(), all.len());
        assert_eq!(split_score(outcome.best_clusters()), (2, 0));
        assert_eq!(outcome.best, SplitFunction::CommonCover);
    }

    #[test]
    fn multi_split_prefers_fewer_duplicated_drugs() {
        // Chain A-B-C over packs 1..8 plus D on 9, 10. The bucketed split
        // cuts the chain twice and duplicates A and B; the common-cover
        // split keeps the chain together and duplicates only A.
        let m = matrix(&[
            (1, &["A"]),
            (2, &["A"]),
            (3, &["A", "B"]),
            (4, &["B"]),
            (5, &["B"]),
            (6, &["B", "C"]),
            (7, &["C"]),
            (8, &["C"]),
            (9, &["D"]),
            (10, &["D"]),
        ]);
        let info = single_canisters(&["A", "B", "C", "D"]);
        let cfg = DistributionConfig { split_function: SplitFunction::Bucket(1), ..Default::default() };
        let slots = PackSlots::new();
        let orch = MultiRobotOrchestrator::new(&cfg, &info, &slots);
        let splits = [SplitFunction::Bucket(1), SplitFunction::CommonCover];
        let outcome = orch.run_multi_split(&m, 2, &splits).unwrap();

        assert_eq!(split_score(&outcome.results[&SplitFunction::Bucket(1)]), (5, 2));
        assert_eq!(split_score(&outcome.results[&SplitFunction::CommonCover]), (5, 1));
        assert_eq!(outcome.best, SplitFunction::CommonCover);
    }

    #[test]
    fn delivery_dates_group_remainder_packs() {
        // Packs 3..6 only use the manual drug M.
        let m = matrix(&[(1, &["A"]), (2, &["B"]), (3, &["M"]), (4, &["M"]), (5, &["M"]), (6, &["M"])]);
        let info = single_canisters(&["A", "B"]);
        let cfg = DistributionConfig::default();
        let slots = PackSlots::new();
        let together = |out: &[Cluster]| out.iter().any(|c| c.packs.contains(&3) && c.packs.contains(&5));

        let plain = MultiRobotOrchestrator::new(&cfg, &info, &slots).run(&m, 2).unwrap();
        assert!(!together(&plain));

        let dates = BTreeMap::from([(3, 10), (4, 20), (5, 10), (6, 20)]);
        let dated = MultiRobotOrchestrator::new(&cfg, &info, &slots)
            .delivery_dates(Some(&dates))
            .run(&m, 2)
            .unwrap();
        assert!(together(&dated));
        assert!(dated.iter().all(|c| c.pack_length() == 3));
    }

    #[test]
    fn matching_follows_loaded_drugs() {
        let a = Cluster { drugs: BTreeSet::from([d("A")]), ..Default::default() };
        let b = Cluster { drugs: BTreeSet::from([d("B")]), ..Default::default() };
        let loaded = BTreeMap::from([(7, BTreeSet::from([d("B")])), (9, BTreeSet::from([d("A")]))]);
        let out = match_robots(vec![a.clone(), b.clone()], &[7, 9], &loaded);
        assert_eq!(out[&7], b);
        assert_eq!(out[&9], a);

        let out = match_robots(vec![a.clone(), b.clone()], &[7, 9], &BTreeMap::new());
        assert_eq!(out[&7], a);
        assert_eq!(out[&9], b);
    }
}
