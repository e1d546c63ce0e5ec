/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Canister placement inside one robot's quadrants.
//!
//! The same tree/trace machinery as the robot split, turned sideways: the
//! items are drugs, their cover is the set of slot combinations they occur
//! in, and a node weighs as many canister slots as it has drugs. The robot's
//! single-canister drugs are split `1 + (n - 1)` recursively, the first
//! share capped at the quadrant capacity.
//!
//! Multi-canister drugs are placed afterwards into every quadrant whose
//! drugs they share a combination with (up to one quadrant per canister
//! this robot may use, see [`QuadrantDistributionEngine::budgets`]).
//! A final trim enforces the capacity, removing duplicated placements
//! first.
//!
//! With `freeze_canister` set, the current physical layout is kept and only
//! missing drugs are placed, evicting occupants the batch does not need
//! before duplicated multi-canister drugs.
//!
//! # Invariants
//!
//! - A single-canister drug occupies at most one quadrant.
//! - A multi-canister drug occupies at most `min(budget, quadrants)`
//!   quadrants, the budget being the robot's canister share.
//! - After the trim no quadrant holds more than the capacity.

use core::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::canister::{canister_count, DrugCanisterInfo, RobotId};
use crate::config::{DistributionConfig, MAX_QUADRANTS};
use crate::error::{DistributionError, Result};
use crate::matrix::{DrugId, IncidenceMatrix};
use crate::slots::{Combination, PackSlots};
use crate::trace::{Loss, Targets, TreeTrace, Weighting};
use crate::tree::ClusterTreeBuilder;

/// Quadrant number, `1..=num_quadrants`.
pub type QuadrantId = u8;

type Layout = BTreeMap<QuadrantId, BTreeSet<DrugId>>;
type DrugCombos = BTreeMap<DrugId, BTreeSet<Combination>>;

/// Drugs placed in one quadrant.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quadrant {
    /// One canister slot per drug.
    pub drugs: BTreeSet<DrugId>,
    /// Combinations touched by those drugs.
    pub combinations: BTreeSet<Combination>,
}

impl Quadrant {
    /// Canister slots in use.
    pub fn used_slots(&self) -> usize {
        self.drugs.len()
    }
}

/// Quadrant layout of one robot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuadrantAssignment {
    /// Quadrant → drugs.
    pub quadrants: BTreeMap<QuadrantId, Quadrant>,
    /// Canister drugs that did not fit anywhere and fall back to manual fill.
    pub dropped: BTreeSet<DrugId>,
    /// Occupants removed from the frozen layout.
    pub evicted: BTreeMap<QuadrantId, BTreeSet<DrugId>>,
}

impl QuadrantAssignment {
    /// Quadrants holding `drug`.
    pub fn placements(&self, drug: &str) -> Vec<QuadrantId> {
        self.quadrants
            .iter()
            .filter(|(_, q)| q.drugs.contains(drug))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Every drug placed somewhere.
    pub fn placed_drugs(&self) -> BTreeSet<DrugId> {
        self.quadrants.values().flat_map(|q| q.drugs.iter().cloned()).collect()
    }

    /// Cut the placements of `drug` down to `keep`, keeping quadrants listed
    /// in `prefer` first, then lower ids. Returns the quadrants it left.
    ///
    /// A drug left with no placement moves to `dropped`.
    pub fn limit_placements(
        &mut self,
        drug: &str,
        keep: usize,
        prefer: &BTreeSet<QuadrantId>,
    ) -> Vec<QuadrantId> {
        let mut held = self.placements(drug);
        if held.len() <= keep {
            return Vec::new();
        }
        held.sort_by_key(|q| (!prefer.contains(q), *q));
        let removed = held.split_off(keep);
        for id in &removed {
            if let Some(q) = self.quadrants.get_mut(id) {
                q.drugs.remove(drug);
                let drugs = &q.drugs;
                q.combinations
                    .retain(|c| c.drugs().iter().any(|x| drugs.contains(x)));
            }
        }
        if keep == 0 {
            self.dropped.insert(drug.to_string());
        }
        removed
    }
}

// ─── QuadrantDistributionEngine ──────────────────────────────────────────────

/// Places one robot's canister drugs into its quadrants.
pub struct QuadrantDistributionEngine<'a> {
    config: &'a DistributionConfig,
    canisters: &'a DrugCanisterInfo,
    budgets: Option<&'a BTreeMap<DrugId, usize>>,
    capacity: usize,
}

impl<'a> QuadrantDistributionEngine<'a> {
    /// Engine using the configured quadrant capacity.
    pub fn new(config: &'a DistributionConfig, canisters: &'a DrugCanisterInfo) -> Self {
        Self { config, canisters, budgets: None, capacity: config.quad_canister_capacity }
    }

    /// Canisters of each drug this robot may use. Drugs not listed may use
    /// their whole inventory.
    pub fn budgets(mut self, budgets: &'a BTreeMap<DrugId, usize>) -> Self {
        self.budgets = Some(budgets);
        self
    }

    fn budget(&self, drug: &str) -> usize {
        let owned = canister_count(self.canisters, drug);
        self.budgets
            .and_then(|b| b.get(drug))
            .map_or(owned, |share| (*share).min(owned))
    }

    /// Override the per-quadrant capacity (robots with a smaller frame).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Place the canister drugs of `matrix` (one robot's packs).
    ///
    /// `current` is the robot's physical layout, only read in frozen mode.
    pub fn distribute(
        &self,
        robot: RobotId,
        matrix: &IncidenceMatrix,
        slots: &PackSlots,
        current: Option<&Layout>,
    ) -> Result<QuadrantAssignment> {
        let needed: BTreeSet<DrugId> = matrix
            .used_drugs()
            .into_iter()
            .filter(|d| self.budget(d) > 0)
            .collect();
        let combos = slots.drug_combinations(matrix, &needed);

        let (layout, dropped, evicted) = if self.config.freeze_canister {
            let empty = Layout::new();
            let (layout, evicted) = self.frozen(robot, matrix, &needed, &combos, current.unwrap_or(&empty))?;
            (layout, BTreeSet::new(), evicted)
        } else {
            let (layout, dropped) = self.balanced(&needed, &combos);
            (layout, dropped, BTreeMap::new())
        };

        let quadrants: BTreeMap<QuadrantId, Quadrant> = layout
            .into_iter()
            .map(|(id, drugs)| {
                let combinations = drugs
                    .iter()
                    .filter_map(|d| combos.get(d))
                    .flat_map(|cs| cs.iter().cloned())
                    .collect();
                (id, Quadrant { drugs, combinations })
            })
            .collect();

        info!(
            robot,
            used = ?quadrants.values().map(Quadrant::used_slots).collect::<Vec<_>>(),
            dropped = dropped.len(),
            frozen = self.config.freeze_canister,
            "quadrants distributed"
        );
        Ok(QuadrantAssignment { quadrants, dropped, evicted })
    }

    fn quadrant_ids(&self) -> impl Iterator<Item = QuadrantId> {
        (1..=self.config.num_quadrants.min(MAX_QUADRANTS)).filter_map(|i| QuadrantId::try_from(i).ok())
    }

    // ─── balanced mode ───────────────────────────────────────────────────

    fn balanced(&self, needed: &BTreeSet<DrugId>, combos: &DrugCombos) -> (Layout, BTreeSet<DrugId>) {
        let (single, multi): (BTreeSet<DrugId>, BTreeSet<DrugId>) = needed
            .iter()
            .cloned()
            .partition(|d| self.budget(d) == 1);

        let groups = self.split_quadrants(single, self.quadrant_ids().count(), combos);
        let mut layout: Layout = self.quadrant_ids().zip(groups).collect();
        for id in self.quadrant_ids() {
            layout.entry(id).or_default();
        }

        self.add_multi(&multi, combos, &mut layout);
        let dropped = self.trim(&mut layout, combos);
        (layout, dropped)
    }

    /// Split `drugs` over `n` quadrants, first share capped at the capacity.
    fn split_quadrants(&self, drugs: BTreeSet<DrugId>, n: usize, combos: &DrugCombos) -> Vec<BTreeSet<DrugId>> {
        if n <= 1 {
            return vec![drugs];
        }
        let targets = Targets::capped(drugs.len(), n, self.capacity);
        let covers: DrugCombos = drugs
            .iter()
            .map(|d| (d.clone(), combos.get(d).cloned().unwrap_or_default()))
            .collect();
        let tree = ClusterTreeBuilder::new(&covers, self.config.max_independence_factor).build();
        let outcome = TreeTrace::new(&tree, targets, Loss::CommonCover)
            .weighting(Weighting::Drugs)
            .max_levels(self.config.max_trace_levels)
            .run();

        let mut sides = match outcome.best {
            Some(p) => {
                let [a, b] = p.sides;
                [a.drugs, b.drugs]
            }
            None => [BTreeSet::new(), drugs.clone()],
        };
        for drug in &drugs {
            if !sides[0].contains(drug) && !sides[1].contains(drug) {
                sides[1].insert(drug.clone());
            }
        }
        fit_to_target(&mut sides, targets.sizes[0], &covers);
        debug!(quadrants = n, first = sides[0].len(), rest = sides[1].len(), "quadrant split");

        let [first, rest] = sides;
        let mut out = Vec::with_capacity(n);
        out.push(first);
        out.extend(self.split_quadrants(rest, n - 1, combos));
        out
    }

    fn add_multi(&self, multi: &BTreeSet<DrugId>, combos: &DrugCombos, layout: &mut Layout) {
        for drug in multi {
            let budget = self.budget(drug).min(layout.len());
            let mine = combos.get(drug);

            let mut touching: Vec<(usize, QuadrantId)> = layout
                .iter()
                .map(|(id, held)| (shared_combos(drug, mine, held), *id))
                .filter(|(shared, _)| *shared > 0)
                .collect();
            let chosen: Vec<QuadrantId> = if touching.is_empty() {
                let mut by_room: Vec<(usize, QuadrantId)> =
                    layout.iter().map(|(id, held)| (held.len(), *id)).collect();
                by_room.sort();
                by_room.into_iter().take(budget).map(|(_, id)| id).collect()
            } else {
                touching.sort_by_key(|&(shared, id)| (Reverse(shared), id));
                touching.into_iter().take(budget).map(|(_, id)| id).collect()
            };
            for id in chosen {
                if let Some(held) = layout.get_mut(&id) {
                    held.insert(drug.clone());
                }
            }
        }
    }

    /// Enforce the capacity; returns drugs left without any placement.
    fn trim(&self, layout: &mut Layout, combos: &DrugCombos) -> BTreeSet<DrugId> {
        let mut dropped = BTreeSet::new();
        let ids: Vec<QuadrantId> = layout.keys().copied().collect();
        for id in ids {
            loop {
                let Some(held) = layout.get(&id) else { break };
                if held.len() <= self.capacity {
                    break;
                }
                let victim = held
                    .iter()
                    .min_by_key(|d| {
                        let placed = layout.values().filter(|h| h.contains(*d)).count();
                        (Reverse(placed), shared_combos(d, combos.get(*d), held), *d)
                    })
                    .cloned();
                let Some(victim) = victim else { break };
                if let Some(held) = layout.get_mut(&id) {
                    held.remove(&victim);
                }
                if !layout.values().any(|h| h.contains(&victim)) {
                    warn!(drug = %victim, quadrant = id, "drug dropped for capacity");
                    dropped.insert(victim);
                }
            }
        }
        dropped
    }

    // ─── frozen mode ─────────────────────────────────────────────────────

    fn frozen(
        &self,
        robot: RobotId,
        matrix: &IncidenceMatrix,
        needed: &BTreeSet<DrugId>,
        combos: &DrugCombos,
        current: &Layout,
    ) -> Result<(Layout, BTreeMap<QuadrantId, BTreeSet<DrugId>>)> {
        let mut layout: Layout = self
            .quadrant_ids()
            .map(|id| (id, current.get(&id).cloned().unwrap_or_default()))
            .collect();
        let mut evicted: BTreeMap<QuadrantId, BTreeSet<DrugId>> = BTreeMap::new();

        let mut missing: Vec<&DrugId> =
            needed.iter().filter(|d| !layout.values().any(|h| h.contains(*d))).collect();
        missing.sort_by_key(|d| (Reverse(matrix.packs_of(d).len()), *d));
        debug!(robot, missing = missing.len(), "frozen placement");

        for drug in missing {
            let mine = combos.get(drug);
            let mut order: Vec<(usize, usize, QuadrantId)> = layout
                .iter()
                .map(|(id, held)| (shared_combos(drug, mine, held), held.len(), *id))
                .collect();
            order.sort_by_key(|&(shared, used, id)| (Reverse(shared), used, id));

            let free = order.iter().map(|o| o.2).find(|id| {
                layout.get(id).map_or(false, |h| h.len() < self.capacity)
            });
            let target = match free {
                Some(id) => Some(id),
                None => order.iter().map(|o| o.2).find_map(|id| {
                    let victim = evictable(&layout, id, needed)?;
                    Some((id, victim))
                })
                .map(|(id, victim)| {
                    if let Some(held) = layout.get_mut(&id) {
                        held.remove(&victim);
                    }
                    evicted.entry(id).or_default().insert(victim);
                    id
                }),
            };
            let Some(id) = target else {
                return Err(DistributionError::PlacementInfeasible {
                    robot,
                    drug: drug.clone(),
                    multi_canister: canister_count(self.canisters, drug) > 1,
                });
            };
            if let Some(held) = layout.get_mut(&id) {
                held.insert(drug.clone());
            }
        }
        Ok((layout, evicted))
    }
}

/// Occupant of quadrant `id` that may be removed: a drug the batch does not
/// need, else a needed drug duplicated in another quadrant.
fn evictable(layout: &Layout, id: QuadrantId, needed: &BTreeSet<DrugId>) -> Option<DrugId> {
    let held = layout.get(&id)?;
    held.iter()
        .find(|d| !needed.contains(*d))
        .or_else(|| {
            held.iter().find(|d| layout.iter().any(|(other, h)| *other != id && h.contains(*d)))
        })
        .cloned()
}

/// Combinations of `drug` that contain another drug of `held`.
fn shared_combos(drug: &str, mine: Option<&BTreeSet<Combination>>, held: &BTreeSet<DrugId>) -> usize {
    mine.map_or(0, |cs| {
        cs.iter()
            .filter(|c| c.drugs().iter().any(|x| x != drug && held.contains(x)))
            .count()
    })
}

/// Move drugs between the two sides until side 0 holds `target` drugs,
/// each time moving the drug whose combinations are least tied to its side.
fn fit_to_target(sides: &mut [BTreeSet<DrugId>; 2], target: usize, covers: &DrugCombos) {
    loop {
        let (from, to) = if sides[0].len() > target {
            (0, 1)
        } else if sides[0].len() < target && !sides[1].is_empty() {
            (1, 0)
        } else {
            break;
        };
        let pick = sides[from]
            .iter()
            .min_by_key(|d| {
                let mine = covers.get(*d);
                let stay = shared_combos(d, mine, &sides[from]) as i64;
                let go = shared_combos(d, mine, &sides[to]) as i64;
                (stay - go, *d)
            })
            .cloned();
        let Some(drug) = pick else { break };
        sides[from].remove(&drug);
        sides[to].insert(drug);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> DrugId {
        s.to_string()
    }

    fn one_each(drugs: &[DrugId]) -> DrugCanisterInfo {
        drugs
            .iter()
            .enumerate()
            .map(|(i, x)| (x.clone(), BTreeSet::from([i as u64 + 1])))
            .collect()
    }

    /// `groups` chains of `size` drugs; pack `g*100+i` has one slot with
    /// drugs `i` and `i+1` of chain `g`.
    fn chains(groups: usize, size: usize) -> (IncidenceMatrix, PackSlots, Vec<DrugId>) {
        let name = |g: usize, i: usize| format!("G{g}D{i}");
        let mut slots = PackSlots::new();
        let mut drugs = Vec::new();
        for g in 0..groups {
            for i in 0..size {
                drugs.push(name(g, i));
            }
            for i in 0..size - 1 {
                let pack = (g * 100 + i) as u64;
                slots.insert(pack, 1, name(g, i));
                slots.insert(pack, 1, name(g, i + 1));
            }
        }
        let m = IncidenceMatrix::from_slots(&slots).unwrap();
        (m, slots, drugs)
    }

    #[test]
    fn full_robot_fills_every_quadrant_exactly() {
        let (m, slots, drugs) = chains(4, 5);
        let info = one_each(&drugs);
        let cfg = DistributionConfig { quad_canister_capacity: 5, ..Default::default() };
        let out = QuadrantDistributionEngine::new(&cfg, &info).distribute(1, &m, &slots, None).unwrap();
        assert!(out.dropped.is_empty());
        assert_eq!(out.quadrants.len(), 4);
        for q in out.quadrants.values() {
            assert_eq!(q.used_slots(), 5);
            // a whole chain lands together
            let prefix: BTreeSet<&str> = q.drugs.iter().map(|x| &x[..2]).collect();
            assert_eq!(prefix.len(), 1);
        }
    }

    #[test]
    fn multi_canister_follows_its_combinations() {
        let mut slots = PackSlots::new();
        for (pack, a, b) in [(1, "A", "X"), (2, "A", "B"), (3, "C", "E"), (4, "D", "E")] {
            slots.insert(pack, 1, d(a));
            slots.insert(pack, 1, d(b));
        }
        let m = IncidenceMatrix::from_slots(&slots).unwrap();
        let mut info = one_each(&[d("A"), d("B"), d("C"), d("D"), d("E")]);
        info.insert(d("X"), BTreeSet::from([50, 51]));
        let cfg = DistributionConfig { num_quadrants: 2, ..Default::default() };
        let out = QuadrantDistributionEngine::new(&cfg, &info).distribute(1, &m, &slots, None).unwrap();
        let a_home = out.placements("A");
        assert_eq!(a_home.len(), 1);
        assert_eq!(out.placements("X"), a_home);
    }

    #[test]
    fn untouched_multi_canister_goes_to_emptiest_quadrants() {
        let m = IncidenceMatrix::from_entries(vec![(1, d("A"), 1), (2, d("B"), 1), (3, d("X"), 1)]).unwrap();
        let mut info = one_each(&[d("A"), d("B")]);
        info.insert(d("X"), BTreeSet::from([50, 51, 52]));
        let cfg = DistributionConfig { num_quadrants: 3, ..Default::default() };
        let none = DrugCanisterInfo::new();
        let out = QuadrantDistributionEngine::new(&cfg, &none).distribute(1, &m, &PackSlots::new(), None);
        // no canister info supplied to the engine: nothing to place
        assert!(out.unwrap().placed_drugs().is_empty());

        let out = QuadrantDistributionEngine::new(&cfg, &info)
            .distribute(1, &m, &PackSlots::new(), None)
            .unwrap();
        assert_eq!(out.placements("X").len(), 3);
        assert!(out.quadrants.values().all(|q| q.used_slots() <= 2));
    }

    #[test]
    fn over_capacity_drops_drugs() {
        let m = IncidenceMatrix::from_entries(vec![(1, d("A"), 1), (2, d("B"), 1), (3, d("C"), 1)]).unwrap();
        let info = one_each(&[d("A"), d("B"), d("C")]);
        let cfg = DistributionConfig { num_quadrants: 2, quad_canister_capacity: 1, ..Default::default() };
        let out = QuadrantDistributionEngine::new(&cfg, &info).distribute(1, &m, &PackSlots::new(), None).unwrap();
        assert_eq!(out.dropped.len(), 1);
        assert!(out.quadrants.values().all(|q| q.used_slots() == 1));
    }

    #[test]
    fn frozen_keeps_layout_and_evicts_unneeded() {
        let m = IncidenceMatrix::from_entries(
            ["A", "B", "C", "D"].iter().enumerate().map(|(i, x)| (i as u64, d(x), 1)),
        )
        .unwrap();
        let mut info = one_each(&[d("A"), d("B"), d("C"), d("D")]);
        info.insert(d("OLD"), BTreeSet::from([99]));
        let cfg = DistributionConfig {
            num_quadrants: 2,
            quad_canister_capacity: 2,
            freeze_canister: true,
            ..Default::default()
        };
        let current: Layout = BTreeMap::from([
            (1, BTreeSet::from([d("A"), d("OLD")])),
            (2, BTreeSet::from([d("B"), d("C")])),
        ]);
        let out = QuadrantDistributionEngine::new(&cfg, &info)
            .distribute(4, &m, &PackSlots::new(), Some(&current))
            .unwrap();
        assert_eq!(out.quadrants[&1].drugs, BTreeSet::from([d("A"), d("D")]));
        assert_eq!(out.quadrants[&2].drugs, BTreeSet::from([d("B"), d("C")]));
        assert_eq!(out.evicted[&1], BTreeSet::from([d("OLD")]));
    }

    #[test]
    fn frozen_without_room_is_infeasible() {
        let names = ["A", "B", "C", "D", "E"];
        let m = IncidenceMatrix::from_entries(names.iter().enumerate().map(|(i, x)| (i as u64, d(x), 1))).unwrap();
        let info = one_each(&names.map(d));
        let cfg = DistributionConfig {
            num_quadrants: 2,
            quad_canister_capacity: 2,
            freeze_canister: true,
            ..Default::default()
        };
        let err = QuadrantDistributionEngine::new(&cfg, &info)
            .distribute(3, &m, &PackSlots::new(), None)
            .unwrap_err();
        assert!(matches!(
            err,
            DistributionError::PlacementInfeasible { robot: 3, multi_canister: false, .. }
        ));
    }

    #[test]
    fn robot_budget_limits_multi_canister_placements() {
        let m = IncidenceMatrix::from_entries(vec![(1, d("A"), 1), (2, d("B"), 1), (3, d("X"), 1)]).unwrap();
        let mut info = one_each(&[d("A"), d("B")]);
        info.insert(d("X"), BTreeSet::from([50, 51, 52]));
        let cfg = DistributionConfig { num_quadrants: 3, ..Default::default() };

        let two = BTreeMap::from([(d("X"), 2)]);
        let out = QuadrantDistributionEngine::new(&cfg, &info)
            .budgets(&two)
            .distribute(1, &m, &PackSlots::new(), None)
            .unwrap();
        assert_eq!(out.placements("X").len(), 2);

        let none = BTreeMap::from([(d("X"), 0)]);
        let out = QuadrantDistributionEngine::new(&cfg, &info)
            .budgets(&none)
            .distribute(1, &m, &PackSlots::new(), None)
            .unwrap();
        assert!(out.placements("X").is_empty());
        assert!(!out.dropped.contains("X"));
    }

    #[test]
    fn trim_removes_duplicated_multi_canister_first() {
        let m = IncidenceMatrix::from_entries(
            ["A", "B", "C", "X"].iter().enumerate().map(|(i, x)| (i as u64, d(x), 1)),
        )
        .unwrap();
        let mut info = one_each(&[d("A"), d("B"), d("C")]);
        info.insert(d("X"), BTreeSet::from([50, 51]));
        let cfg = DistributionConfig { num_quadrants: 2, quad_canister_capacity: 2, ..Default::default() };
        let out = QuadrantDistributionEngine::new(&cfg, &info).distribute(1, &m, &PackSlots::new(), None).unwrap();

        // X first lands in both quadrants; the full one gives it up.
        assert_eq!(out.placements("X"), vec![2]);
        assert!(out.dropped.is_empty());
        assert_eq!(out.placed_drugs().len(), 4);
        assert!(out.quadrants.values().all(|q| q.used_slots() == 2));
    }

    #[test]
    fn frozen_evicts_duplicated_needed_drug() {
        let m = IncidenceMatrix::from_entries(
            ["A", "B", "C", "X"].iter().enumerate().map(|(i, x)| (i as u64, d(x), 1)),
        )
        .unwrap();
        let mut info = one_each(&[d("A"), d("B"), d("C")]);
        info.insert(d("X"), BTreeSet::from([50, 51]));
        let cfg = DistributionConfig {
            num_quadrants: 2,
            quad_canister_capacity: 2,
            freeze_canister: true,
            ..Default::default()
        };
        let current: Layout = BTreeMap::from([
            (1, BTreeSet::from([d("A"), d("X")])),
            (2, BTreeSet::from([d("B"), d("X")])),
        ]);
        let out = QuadrantDistributionEngine::new(&cfg, &info)
            .distribute(2, &m, &PackSlots::new(), Some(&current))
            .unwrap();
        assert_eq!(out.quadrants[&1].drugs, BTreeSet::from([d("A"), d("C")]));
        assert_eq!(out.quadrants[&2].drugs, BTreeSet::from([d("B"), d("X")]));
        assert_eq!(out.evicted[&1], BTreeSet::from([d("X")]));
    }

    #[test]
    fn limit_placements_keeps_preferred_quadrants() {
        let q = |ds: &[&str]| Quadrant { drugs: ds.iter().map(|x| d(x)).collect(), ..Default::default() };
        let mut a = QuadrantAssignment {
            quadrants: BTreeMap::from([(1, q(&["X", "A"])), (2, q(&["X"])), (3, q(&["X"]))]),
            ..Default::default()
        };
        assert_eq!(a.limit_placements("X", 1, &BTreeSet::from([3])), vec![1, 2]);
        assert_eq!(a.placements("X"), vec![3]);
        assert!(a.limit_placements("X", 1, &BTreeSet::new()).is_empty());
        assert_eq!(a.limit_placements("X", 0, &BTreeSet::new()), vec![3]);
        assert!(a.dropped.contains("X"));
    }
}
