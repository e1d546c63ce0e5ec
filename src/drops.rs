/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Drop scheduling on the blister grid.
//!
//! A drop is one dispensing action: a single physical quadrant filling one
//! slot, or a small block of adjacent slots that all need drugs from that
//! quadrant. Fewer drops means a faster pack.
//!
//! The quadrant engine labels its quadrants `1..=n` without regard to where
//! they sit on the robot. The scheduler tries every mapping of those labels
//! onto the physical quadrants, schedules every pack greedily under each
//! mapping, and keeps the mapping with the fewest unreachable slots, then the
//! fewest drops. Mappings that only swap quadrants with identical drug sets
//! are skipped.
//!
//! # Grouping
//!
//! ```text
//!   22 23 24 25 26 27 28      patterns, tried in this order:
//!   15 16 17 18 19 20 21        2×2   ██   1×2  ██   2×1  █   1×1  █
//!    8  9 10 11 12 13 14              ██                  █
//!    1  2  3  4  5  6  7
//! ```
//!
//! A slot whose drugs no single quadrant holds is split into a greedy
//! minimal set of quadrants, each part its own 1×1 drop.

use core::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::config::DistributionConfig;
use crate::error::{DistributionError, Result};
use crate::matrix::{DrugId, IncidenceMatrix, PackId};
use crate::quadrant::{QuadrantAssignment, QuadrantId};
use crate::slots::{PackSlots, SlotId};

// ─── PackGrid ────────────────────────────────────────────────────────────────

/// Physical slot layout of a pack.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackGrid {
    /// Slot ids, top row first.
    pub rows: Vec<Vec<SlotId>>,
    /// Physical quadrants able to reach a slot. Slots not listed are reachable
    /// from every quadrant.
    pub valid_quadrants: BTreeMap<SlotId, BTreeSet<QuadrantId>>,
}

impl Default for PackGrid {
    /// The 4×7 blister: slot 1 bottom left, slot 28 top right.
    fn default() -> Self {
        let rows = (0..4u32)
            .rev()
            .map(|r| (r * 7 + 1..=r * 7 + 7).collect())
            .collect();
        Self { rows, valid_quadrants: BTreeMap::new() }
    }
}

impl PackGrid {
    /// Reject empty, ragged or repeating grids.
    pub fn validate(&self) -> Result<()> {
        let width = self.rows.first().map_or(0, Vec::len);
        if width == 0 {
            return Err(DistributionError::InvalidConfig("pack grid is empty".into()));
        }
        if self.rows.iter().any(|r| r.len() != width) {
            return Err(DistributionError::InvalidConfig("pack grid rows differ in length".into()));
        }
        let mut seen = BTreeSet::new();
        if let Some(slot) = self.rows.iter().flatten().find(|s| !seen.insert(**s)) {
            return Err(DistributionError::InvalidConfig(format!("slot {slot} appears twice in the pack grid")));
        }
        Ok(())
    }

    /// `(rows, columns)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.rows.len(), self.rows.first().map_or(0, Vec::len))
    }

    /// `true` if physical quadrant `q` can drop into `slot`.
    pub fn reachable(&self, slot: SlotId, q: QuadrantId) -> bool {
        self.valid_quadrants.get(&slot).map_or(true, |qs| qs.contains(&q))
    }
}

// ─── Patterns and configurations ─────────────────────────────────────────────

/// Block of adjacent slots filled by one drop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Pattern {
    /// 2 rows × 2 columns.
    Square,
    /// 1 row × 2 columns.
    Horizontal,
    /// 2 rows × 1 column.
    Vertical,
    /// One slot.
    Single,
}

impl Pattern {
    /// Patterns in the order the scheduler tries them.
    pub const ORDER: [Pattern; 4] = [Self::Square, Self::Horizontal, Self::Vertical, Self::Single];

    /// `(rows, columns)` spanned.
    pub fn dims(self) -> (usize, usize) {
        match self {
            Self::Square => (2, 2),
            Self::Horizontal => (1, 2),
            Self::Vertical => (2, 1),
            Self::Single => (1, 1),
        }
    }
}

/// Pack configuration that brings abstract quadrant `label` under physical
/// quadrant `physical`. `None` outside the four-quadrant table.
pub fn configuration_id(label: QuadrantId, physical: QuadrantId) -> Option<u8> {
    match (label, physical) {
        (1, 1) | (2, 2) | (3, 3) | (4, 4) => Some(1),
        (1, 2) | (4, 3) => Some(2),
        (1, 4) | (2, 3) => Some(3),
        (2, 1) | (3, 4) => Some(4),
        (4, 1) | (3, 2) => Some(5),
        (1, 3) => Some(6),
        (2, 4) => Some(7),
        (3, 1) => Some(8),
        (4, 2) => Some(9),
        _ => None,
    }
}

// ─── Schedules ───────────────────────────────────────────────────────────────

/// One dispensing action.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DropStep {
    /// 1-based position within the pack.
    pub number: u32,
    /// Physical quadrant dropping.
    pub quadrant: QuadrantId,
    /// Pack configuration of the drop.
    pub configuration_id: Option<u8>,
    /// Slot block shape.
    pub pattern: Pattern,
    /// Slots filled.
    pub slots: Vec<SlotId>,
}

/// Drops of one pack.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PackDrops {
    /// Drops in execution order.
    pub drops: Vec<DropStep>,
    /// Slot → drug → index into `drops`.
    pub fills: BTreeMap<SlotId, BTreeMap<DrugId, usize>>,
    /// Slots whose drugs no reachable quadrant holds.
    pub unfillable: BTreeSet<SlotId>,
}

impl PackDrops {
    /// Drop filling `drug` into `slot`.
    pub fn drop_for(&self, slot: SlotId, drug: &str) -> Option<&DropStep> {
        let idx = self.fills.get(&slot)?.get(drug)?;
        self.drops.get(*idx)
    }

    fn fill(&mut self, slot: SlotId, drug: DrugId, idx: usize) {
        self.fills.entry(slot).or_default().insert(drug, idx);
    }

    fn push(&mut self, quadrant: QuadrantId, label: QuadrantId, pattern: Pattern, slots: Vec<SlotId>) -> usize {
        let idx = self.drops.len();
        self.drops.push(DropStep {
            number: u32::try_from(idx + 1).unwrap_or(u32::MAX),
            quadrant,
            configuration_id: configuration_id(label, quadrant),
            pattern,
            slots,
        });
        idx
    }
}

/// Best schedule of one robot.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DropSchedule {
    /// Abstract quadrant → physical quadrant.
    pub permutation: BTreeMap<QuadrantId, QuadrantId>,
    /// Drops over all packs.
    pub total_drops: usize,
    /// Unreachable slots over all packs.
    pub unfillable: usize,
    /// `total_drops × per_drop_seconds / system_speed`.
    pub fill_time_secs: f64,
    /// Per-pack drops.
    pub packs: BTreeMap<PackId, PackDrops>,
}

impl DropSchedule {
    /// Physical quadrant of abstract quadrant `label`.
    pub fn physical(&self, label: QuadrantId) -> Option<QuadrantId> {
        self.permutation.get(&label).copied()
    }

    fn rank(&self) -> (usize, usize) {
        (self.unfillable, self.total_drops)
    }
}

// ─── DropScheduler ───────────────────────────────────────────────────────────

/// Chooses the quadrant mapping that fills a robot's packs fastest.
pub struct DropScheduler<'a> {
    config: &'a DistributionConfig,
}

/// Drugs held by each physical quadrant, with the abstract label they came from.
type Physical<'a> = BTreeMap<QuadrantId, (QuadrantId, &'a BTreeSet<DrugId>)>;

impl<'a> DropScheduler<'a> {
    /// Scheduler on the configured grid.
    pub fn new(config: &'a DistributionConfig) -> Self {
        Self { config }
    }

    /// Best schedule for `packs` over every distinct quadrant mapping.
    ///
    /// In frozen-canister mode quadrants are already physical and only the
    /// identity mapping is scored.
    pub fn schedule(
        &self,
        assignment: &QuadrantAssignment,
        packs: &BTreeSet<PackId>,
        matrix: &IncidenceMatrix,
        slots: &PackSlots,
    ) -> DropSchedule {
        let labels: Vec<QuadrantId> = assignment.quadrants.keys().copied().collect();
        let candidates = if self.config.freeze_canister {
            vec![labels.clone()]
        } else {
            permutations(&labels)
        };

        let mut best: Option<DropSchedule> = None;
        let mut tried = 0usize;
        for perm in candidates {
            if !canonical(&labels, &perm, assignment) {
                continue;
            }
            tried += 1;
            let mapping: BTreeMap<QuadrantId, QuadrantId> =
                labels.iter().copied().zip(perm.iter().copied()).collect();
            let schedule = self.evaluate(&mapping, assignment, packs, matrix, slots);
            trace!(?mapping, drops = schedule.total_drops, unfillable = schedule.unfillable, "mapping scored");
            if best.as_ref().map_or(true, |b| schedule.rank() < b.rank()) {
                best = Some(schedule);
            }
        }

        let best = best.unwrap_or_default();
        debug!(
            tried,
            drops = best.total_drops,
            unfillable = best.unfillable,
            secs = best.fill_time_secs,
            "drop schedule chosen"
        );
        best
    }

    /// Schedule `packs` under one fixed mapping.
    pub fn evaluate(
        &self,
        mapping: &BTreeMap<QuadrantId, QuadrantId>,
        assignment: &QuadrantAssignment,
        packs: &BTreeSet<PackId>,
        matrix: &IncidenceMatrix,
        slots: &PackSlots,
    ) -> DropSchedule {
        let physical: Physical<'_> = assignment
            .quadrants
            .iter()
            .filter_map(|(label, q)| mapping.get(label).map(|p| (*p, (*label, &q.drugs))))
            .collect();
        let placed = assignment.placed_drugs();

        let mut out = DropSchedule { permutation: mapping.clone(), ..Default::default() };
        for &pack in packs {
            let needs: BTreeMap<SlotId, BTreeSet<DrugId>> = slots
                .effective_slots(pack, matrix)
                .into_iter()
                .map(|(slot, drugs)| (slot, drugs.intersection(&placed).cloned().collect::<BTreeSet<_>>()))
                .filter(|(_, drugs)| !drugs.is_empty())
                .collect();
            let drops = self.schedule_pack(&needs, &physical);
            out.total_drops += drops.drops.len();
            out.unfillable += drops.unfillable.len();
            out.packs.insert(pack, drops);
        }
        out.fill_time_secs =
            out.total_drops as f64 * self.config.per_drop_seconds / self.config.system_speed;
        out
    }

    fn schedule_pack(&self, needs: &BTreeMap<SlotId, BTreeSet<DrugId>>, physical: &Physical<'_>) -> PackDrops {
        let grid = &self.config.grid;
        let suppliers = |slot: SlotId, drugs: &BTreeSet<DrugId>| -> Vec<QuadrantId> {
            physical
                .iter()
                .filter(|(q, (_, held))| grid.reachable(slot, **q) && drugs.is_subset(held))
                .map(|(q, _)| *q)
                .collect()
        };

        // Quadrants that fully serve many slots are preferred as labels.
        let options: BTreeMap<SlotId, Vec<QuadrantId>> =
            needs.iter().map(|(s, d)| (*s, suppliers(*s, d))).collect();
        let mut serves: BTreeMap<QuadrantId, usize> = BTreeMap::new();
        for qs in options.values() {
            for q in qs {
                *serves.entry(*q).or_insert(0) += 1;
            }
        }
        let label: BTreeMap<SlotId, QuadrantId> = options
            .iter()
            .filter_map(|(s, qs)| {
                qs.iter()
                    .copied()
                    .max_by_key(|q| (serves.get(q).copied().unwrap_or(0), Reverse(*q)))
                    .map(|q| (*s, q))
            })
            .collect();

        let mut out = PackDrops::default();
        let mut covered: BTreeSet<SlotId> = BTreeSet::new();
        let origin = |q: QuadrantId| physical.get(&q).map_or(q, |(l, _)| *l);

        let (nr, nc) = grid.dims();
        for pattern in Pattern::ORDER {
            let (h, w) = pattern.dims();
            if nr < h || nc < w {
                continue;
            }
            for r in 0..=nr - h {
                for c in 0..=nc - w {
                    let block: Vec<SlotId> = (r..r + h)
                        .flat_map(|rr| grid.rows[rr][c..c + w].iter().copied())
                        .collect();
                    let Some(q) = block.first().and_then(|s| label.get(s)).copied() else { continue };
                    let uniform = block
                        .iter()
                        .all(|s| !covered.contains(s) && label.get(s) == Some(&q));
                    if !uniform {
                        continue;
                    }
                    covered.extend(block.iter().copied());
                    let idx = out.push(q, origin(q), pattern, block.clone());
                    for s in &block {
                        for drug in needs.get(s).into_iter().flatten() {
                            out.fill(*s, drug.clone(), idx);
                        }
                    }
                }
            }
        }

        for (slot, drugs) in needs {
            if covered.contains(slot) {
                continue;
            }
            if let Some(&q) = label.get(slot) {
                // off-grid slot served by one quadrant
                let idx = out.push(q, origin(q), Pattern::Single, vec![*slot]);
                for drug in drugs {
                    out.fill(*slot, drug.clone(), idx);
                }
                continue;
            }

            let mut remaining = drugs.clone();
            while !remaining.is_empty() {
                let pick = physical
                    .iter()
                    .filter(|(q, _)| grid.reachable(*slot, **q))
                    .map(|(q, (_, held))| (remaining.intersection(held).count(), *q))
                    .filter(|(n, _)| *n > 0)
                    .max_by_key(|&(n, q)| (n, Reverse(q)));
                let Some((_, q)) = pick else {
                    out.unfillable.insert(*slot);
                    break;
                };
                let idx = out.push(q, origin(q), Pattern::Single, vec![*slot]);
                let held = physical.get(&q).map(|(_, h)| *h);
                let served: Vec<DrugId> = remaining
                    .iter()
                    .filter(|d| held.map_or(false, |h| h.contains(*d)))
                    .cloned()
                    .collect();
                for drug in served {
                    remaining.remove(&drug);
                    out.fill(*slot, drug, idx);
                }
            }
        }
        out
    }
}

/// All orderings of `items`, identity first.
fn permutations(items: &[QuadrantId]) -> Vec<Vec<QuadrantId>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for (i, first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for tail in permutations(&rest) {
            let mut perm = Vec::with_capacity(items.len());
            perm.push(*first);
            perm.extend(tail);
            out.push(perm);
        }
    }
    out
}

/// `false` when `perm` only differs from a cheaper-ordered mapping by
/// swapping quadrants with identical drugs.
fn canonical(labels: &[QuadrantId], perm: &[QuadrantId], assignment: &QuadrantAssignment) -> bool {
    let drugs = |l: &QuadrantId| assignment.quadrants.get(l).map(|q| &q.drugs);
    for i in 0..labels.len() {
        for j in i + 1..labels.len() {
            if drugs(&labels[i]) == drugs(&labels[j]) && perm[i] > perm[j] {
                return false;
            }
        }
    }
    true
}
