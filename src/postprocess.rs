/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Turns a traced partition into two finished pack clusters.
//!
//! The tree trace only sees the active drugs. This stage folds everything
//! else back in:
//!
//! 1. **Seed**: packs follow the side holding their active drugs. Packs
//!    with active drugs on both sides go to the side holding more of them.
//! 2. **Remainder**: packs that only use removed (manual or multi-canister)
//!    drugs are dealt to the side with the larger deficit, grouped by
//!    delivery date when dates are known.
//! 3. **Exact balance**: packs move from the overfull side, cheapest first,
//!    until both sides hit their targets.
//! 4. **Drugs**: each side's drug set is re-derived from the packs it owns.
//!
//! When no partition exists the seed step has three fallbacks: a single
//! active drug keeps its packs on one side, several active drugs are kept
//! together on side 0, and no active drug at all triggers the multi-canister
//! pack balancing.
//!
//! # Invariants
//!
//! - Every pack of the matrix ends in exactly one cluster.
//! - Every drug a pack uses is in its cluster's drug set.

use core::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::canister::{canister_count, DrugCanisterInfo};
use crate::cluster::Cluster;
use crate::matrix::{DrugId, IncidenceMatrix, PackId};
use crate::slots::PackSlots;
use crate::trace::{Partition, Targets};
use crate::tree::ClusterTreeBuilder;

static NO_DRUGS: BTreeSet<DrugId> = BTreeSet::new();
static NO_CANISTERS: DrugCanisterInfo = BTreeMap::new();

/// How the seed assignment was obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SplitStrategy {
    /// From a traced partition.
    Tree,
    /// Only one active drug: its packs stay together on side 0.
    SingleDrug,
    /// Several active drugs but no scoring partition: kept on side 0.
    Unsplit,
    /// No active drug: multi-canister pack balancing.
    MultiCanisterBalancing,
}

/// Two finished clusters.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitResult {
    /// Side 0 and side 1.
    pub clusters: [Cluster; 2],
    /// Seed strategy used.
    pub strategy: SplitStrategy,
}

// ─── PostProcessor ───────────────────────────────────────────────────────────

/// Completes a two-way pack split.
pub struct PostProcessor<'a> {
    matrix: &'a IncidenceMatrix,
    slots: &'a PackSlots,
    targets: Targets,
    active: &'a BTreeSet<DrugId>,
    removed: &'a BTreeSet<DrugId>,
    canisters: &'a DrugCanisterInfo,
    delivery_dates: Option<&'a BTreeMap<PackId, i64>>,
}

impl<'a> PostProcessor<'a> {
    /// Split the packs of `matrix` towards `targets`.
    pub fn new(matrix: &'a IncidenceMatrix, slots: &'a PackSlots, targets: Targets) -> Self {
        Self {
            matrix,
            slots,
            targets,
            active: &NO_DRUGS,
            removed: &NO_DRUGS,
            canisters: &NO_CANISTERS,
            delivery_dates: None,
        }
    }

    /// Drugs the tree was built from.
    pub fn active(mut self, drugs: &'a BTreeSet<DrugId>) -> Self {
        self.active = drugs;
        self
    }

    /// Manual and multi-canister drugs left out of the tree.
    pub fn removed(mut self, drugs: &'a BTreeSet<DrugId>) -> Self {
        self.removed = drugs;
        self
    }

    /// Canister inventory, used to order multi-canister packs and to price
    /// pack moves.
    pub fn canisters(mut self, info: &'a DrugCanisterInfo) -> Self {
        self.canisters = info;
        self
    }

    /// Delivery date per pack (any monotone day number).
    pub fn delivery_dates(mut self, dates: Option<&'a BTreeMap<PackId, i64>>) -> Self {
        self.delivery_dates = dates;
        self
    }

    /// Produce the two clusters from `partition`.
    pub fn finalize(&self, partition: Option<&Partition<PackId>>) -> SplitResult {
        let mut sides: [BTreeSet<PackId>; 2] = [BTreeSet::new(), BTreeSet::new()];

        let strategy = match partition {
            Some(p) => {
                self.seed_from_partition(p, &mut sides);
                SplitStrategy::Tree
            }
            None => {
                let used: Vec<&DrugId> = self
                    .active
                    .iter()
                    .filter(|d| !self.matrix.packs_of(d).is_empty())
                    .collect();
                match used.as_slice() {
                    [] => {
                        self.seed_multi_canister(&mut sides);
                        SplitStrategy::MultiCanisterBalancing
                    }
                    [only] => {
                        sides[0] = self.matrix.packs_of(only).clone();
                        SplitStrategy::SingleDrug
                    }
                    many => {
                        for drug in many {
                            sides[0].extend(self.matrix.packs_of(drug).iter().copied());
                        }
                        SplitStrategy::Unsplit
                    }
                }
            }
        };
        if strategy != SplitStrategy::Tree {
            info!(?strategy, packs = self.matrix.pack_count(), "split fallback");
        }

        self.distribute_remainder(&mut sides);
        if strategy != SplitStrategy::SingleDrug {
            self.rebalance(&mut sides);
        }

        debug!(
            side0 = sides[0].len(),
            side1 = sides[1].len(),
            targets = ?self.targets.sizes,
            "split finalized"
        );
        let clusters = sides.map(|packs| Cluster::from_packs(packs, self.matrix, self.slots));
        SplitResult { clusters, strategy }
    }

    fn room(&self, sides: &[BTreeSet<PackId>; 2]) -> [usize; 2] {
        let [t0, t1] = self.targets.sizes;
        [t0.saturating_sub(sides[0].len()), t1.saturating_sub(sides[1].len())]
    }

    /// Side with more room left; side 0 on ties.
    fn roomier(&self, sides: &[BTreeSet<PackId>; 2]) -> usize {
        let [r0, r1] = self.room(sides);
        usize::from(r1 > r0)
    }

    fn seed_from_partition(&self, p: &Partition<PackId>, sides: &mut [BTreeSet<PackId>; 2]) {
        for pack in self.matrix.packs() {
            let mut n = [0usize; 2];
            for drug in self.matrix.drugs_of(pack) {
                for (side, count) in n.iter_mut().enumerate() {
                    if p.sides[side].drugs.contains(drug) {
                        *count += 1;
                    }
                }
            }
            let side = match n {
                [0, 0] => continue,
                [_, 0] => 0,
                [0, _] => 1,
                [a, b] if a > b => 0,
                [a, b] if b > a => 1,
                _ => self.roomier(sides),
            };
            sides[side].insert(pack);
        }
    }

    /// Balance packs by the connected groups of the removed drugs.
    ///
    /// Multi-canister drugs are preferred; if there are none the manual
    /// drugs are grouped instead.
    fn seed_multi_canister(&self, sides: &mut [BTreeSet<PackId>; 2]) {
        let used = |d: &&DrugId| !self.matrix.packs_of(d).is_empty();
        let mut pool: Vec<DrugId> = self
            .removed
            .iter()
            .filter(used)
            .filter(|d| canister_count(self.canisters, d) > 0)
            .cloned()
            .collect();
        if pool.is_empty() {
            pool = self.removed.iter().filter(used).cloned().collect();
        }
        let covers: BTreeMap<DrugId, BTreeSet<PackId>> =
            pool.iter().map(|d| (d.clone(), self.matrix.packs_of(d).clone())).collect();

        let mut groups = ClusterTreeBuilder::new(&covers, 0).merge_pass(&pool, 0);
        groups.sort_by(|a, b| {
            b.cover.len().cmp(&a.cover.len()).then_with(|| a.drugs.cmp(&b.drugs))
        });

        for group in groups {
            let mut packs: Vec<PackId> = group.cover.iter().copied().collect();
            packs.sort_by_key(|&pack| {
                let scarcest = self
                    .matrix
                    .drugs_of(pack)
                    .filter(|d| covers.contains_key(*d))
                    .map(|d| canister_count(self.canisters, d))
                    .min()
                    .unwrap_or(0);
                (scarcest, Reverse(self.matrix.row(pack).len()), pack)
            });

            let room = self.room(sides);
            if packs.len() <= room[0].max(room[1]) {
                let side = usize::from(room[1] > room[0]);
                sides[side].extend(packs);
            } else {
                for pack in packs {
                    let side = self.roomier(sides);
                    sides[side].insert(pack);
                }
            }
        }
    }

    fn distribute_remainder(&self, sides: &mut [BTreeSet<PackId>; 2]) {
        let mut rest: Vec<PackId> = self
            .matrix
            .packs()
            .filter(|p| !sides[0].contains(p) && !sides[1].contains(p))
            .collect();
        if rest.is_empty() {
            return;
        }
        debug!(packs = rest.len(), "distributing remainder");

        let Some(dates) = self.delivery_dates else {
            for pack in rest {
                let side = self.roomier(sides);
                sides[side].insert(pack);
            }
            return;
        };

        rest.sort_by_key(|p| (dates.get(p).copied(), *p));
        let mut start = 0;
        while start < rest.len() {
            let date = dates.get(&rest[start]).copied();
            let end = rest[start..]
                .iter()
                .position(|p| dates.get(p).copied() != date)
                .map_or(rest.len(), |i| start + i);
            let group = &rest[start..end];

            let room = self.room(sides);
            let side = usize::from(room[1] > room[0]);
            if group.len() <= room[side] {
                sides[side].extend(group.iter().copied());
            } else {
                let half = group.len().div_ceil(2);
                sides[side].extend(group[..half].iter().copied());
                sides[1 - side].extend(group[half..].iter().copied());
            }
            start = end;
        }
    }

    /// Move packs off the overfull side until both targets are met exactly.
    fn rebalance(&self, sides: &mut [BTreeSet<PackId>; 2]) {
        let mut usage: [BTreeMap<DrugId, usize>; 2] = [BTreeMap::new(), BTreeMap::new()];
        for (side, packs) in sides.iter().enumerate() {
            for &pack in packs {
                for drug in self.matrix.drugs_of(pack) {
                    *usage[side].entry(drug.clone()).or_insert(0) += 1;
                }
            }
        }

        let [t0, t1] = self.targets.sizes;
        let mut moved = 0usize;
        loop {
            let from = if sides[0].len() > t0 {
                0
            } else if sides[1].len() > t1 {
                1
            } else {
                break;
            };
            let to = 1 - from;
            let Some(pack) = sides[from]
                .iter()
                .copied()
                .min_by_key(|&p| (self.move_cost(p, &usage[from], &usage[to]), p))
            else {
                break;
            };

            sides[from].remove(&pack);
            sides[to].insert(pack);
            for drug in self.matrix.drugs_of(pack) {
                if let Some(n) = usage[from].get_mut(drug) {
                    *n -= 1;
                }
                *usage[to].entry(drug.clone()).or_insert(0) += 1;
            }
            moved += 1;
        }
        if moved > 0 {
            debug!(moved, "packs rebalanced");
        }
    }

    /// Drugs the move adds to `to` minus drugs it frees on `from`. Manual
    /// drugs are free everywhere and never count.
    fn move_cost(
        &self,
        pack: PackId,
        from: &BTreeMap<DrugId, usize>,
        to: &BTreeMap<DrugId, usize>,
    ) -> i64 {
        let mut cost = 0i64;
        for drug in self.matrix.drugs_of(pack) {
            if self.is_manual(drug) {
                continue;
            }
            if to.get(drug).copied().unwrap_or(0) == 0 {
                cost += 1;
            }
            if from.get(drug).copied().unwrap_or(0) == 1 {
                cost -= 1;
            }
        }
        cost
    }

    fn is_manual(&self, drug: &str) -> bool {
        self.removed.contains(drug) && canister_count(self.canisters, drug) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{Loss, TreeTrace};

    fn d(s: &str) -> DrugId {
        s.to_string()
    }

    fn matrix(rows: &[(PackId, &[&str])]) -> IncidenceMatrix {
        IncidenceMatrix::from_entries(
            rows.iter()
                .flat_map(|(p, ds)| ds.iter().map(move |x| (*p, d(x), 1))),
        )
        .unwrap()
    }

    fn traced(m: &IncidenceMatrix, active: &BTreeSet<DrugId>, t: Targets) -> Option<Partition<PackId>> {
        let covers: BTreeMap<DrugId, BTreeSet<PackId>> =
            active.iter().map(|x| (x.clone(), m.packs_of(x).clone())).collect();
        let tree = ClusterTreeBuilder::new(&covers, 4).build();
        TreeTrace::new(&tree, t, Loss::CommonCover).run().best
    }

    fn conserved(r: &SplitResult, m: &IncidenceMatrix) {
        let [a, b] = &r.clusters;
        assert!(a.packs.is_disjoint(&b.packs));
        let all: BTreeSet<PackId> = a.packs.union(&b.packs).copied().collect();
        assert_eq!(all, m.pack_set());
        for c in &r.clusters {
            for &p in &c.packs {
                assert!(m.drugs_of(p).all(|x| c.drugs.contains(x)));
            }
        }
    }

    #[test]
    fn manual_drug_lands_on_both_sides() {
        let m = matrix(&[
            (1, &["A", "M"]),
            (2, &["A", "M"]),
            (3, &["B", "M"]),
            (4, &["B", "M"]),
        ]);
        let active = BTreeSet::from([d("A"), d("B")]);
        let removed = BTreeSet::from([d("M")]);
        let t = Targets::proportional(4, 1, 1);
        let part = traced(&m, &active, t);
        let slots = PackSlots::new();
        let r = PostProcessor::new(&m, &slots, t)
            .active(&active)
            .removed(&removed)
            .finalize(part.as_ref());
        conserved(&r, &m);
        assert_eq!(r.strategy, SplitStrategy::Tree);
        assert_eq!(r.clusters[0].pack_length(), 2);
        assert!(r.clusters.iter().all(|c| c.drugs.contains("M")));
    }

    #[test]
    fn remainder_respects_targets() {
        // Packs 5..8 only use the multi-canister drug X.
        let m = matrix(&[
            (1, &["A"]),
            (2, &["A"]),
            (3, &["B"]),
            (4, &["B", "X"]),
            (5, &["X"]),
            (6, &["X"]),
            (7, &["X"]),
            (8, &["X"]),
        ]);
        let active = BTreeSet::from([d("A"), d("B")]);
        let removed = BTreeSet::from([d("X")]);
        let t = Targets::proportional(8, 1, 1);
        let part = traced(&m, &active, t);
        let slots = PackSlots::new();
        let r = PostProcessor::new(&m, &slots, t)
            .active(&active)
            .removed(&removed)
            .finalize(part.as_ref());
        conserved(&r, &m);
        assert_eq!(r.clusters[0].pack_length(), 4);
        assert_eq!(r.clusters[1].pack_length(), 4);
    }

    #[test]
    fn same_delivery_date_stays_together() {
        let m = matrix(&[(1, &["X"]), (2, &["X"]), (3, &["Y"]), (4, &["Y"])]);
        let removed = BTreeSet::from([d("X"), d("Y")]);
        let dates = BTreeMap::from([(1, 10), (2, 20), (3, 10), (4, 20)]);
        let t = Targets::proportional(4, 1, 1);
        let slots = PackSlots::new();
        let active = BTreeSet::new();
        // Pretend nothing was seeded: both drugs manual, grouped by date.
        let pp = PostProcessor::new(&m, &slots, t).active(&active).removed(&removed);
        let mut sides = [BTreeSet::new(), BTreeSet::new()];
        pp.delivery_dates(Some(&dates)).distribute_remainder(&mut sides);
        assert_eq!(sides[0], BTreeSet::from([1, 3]));
        assert_eq!(sides[1], BTreeSet::from([2, 4]));
    }

    #[test]
    fn all_multi_canister_uses_pack_balancing() {
        let m = matrix(&[
            (1, &["X"]),
            (2, &["X"]),
            (3, &["X", "Y"]),
            (4, &["Z"]),
            (5, &["Z"]),
            (6, &["Z"]),
        ]);
        let removed = BTreeSet::from([d("X"), d("Y"), d("Z")]);
        let canisters: DrugCanisterInfo = BTreeMap::from([
            (d("X"), BTreeSet::from([1, 2])),
            (d("Y"), BTreeSet::from([3, 4])),
            (d("Z"), BTreeSet::from([5, 6])),
        ]);
        let t = Targets::proportional(6, 1, 1);
        let slots = PackSlots::new();
        let r = PostProcessor::new(&m, &slots, t)
            .removed(&removed)
            .canisters(&canisters)
            .finalize(None);
        conserved(&r, &m);
        assert_eq!(r.strategy, SplitStrategy::MultiCanisterBalancing);
        assert_eq!(r.clusters[0].packs, BTreeSet::from([1, 2, 3]));
        assert_eq!(r.clusters[1].packs, BTreeSet::from([4, 5, 6]));
    }

    #[test]
    fn single_active_drug_is_one_sided() {
        let m = matrix(&[(1, &["A"]), (2, &["A"]), (3, &["A"]), (4, &["M"])]);
        let active = BTreeSet::from([d("A")]);
        let removed = BTreeSet::from([d("M")]);
        let t = Targets::proportional(4, 1, 1);
        let slots = PackSlots::new();
        let r = PostProcessor::new(&m, &slots, t)
            .active(&active)
            .removed(&removed)
            .finalize(None);
        conserved(&r, &m);
        assert_eq!(r.strategy, SplitStrategy::SingleDrug);
        assert_eq!(r.clusters[0].packs, BTreeSet::from([1, 2, 3]));
        assert_eq!(r.clusters[1].packs, BTreeSet::from([4]));
    }
}
