/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Per-slot drug requirements and drug combinations.
//!
//! A pack is a grid of slots; each slot needs a set of drugs dropped into it
//! together. The sorted tuple of those drugs is a [`Combination`], the key
//! the quadrant engine clusters on and the drop scheduler fills.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{InputError, Result};
use crate::matrix::{DrugId, IncidenceMatrix, PackId};

/// Slot number within a pack grid.
pub type SlotId = u32;

/// Slot used when a pack has no slot data of its own.
pub const WHOLE_PACK_SLOT: SlotId = 1;

// ─── Combination ─────────────────────────────────────────────────────────────

/// Canonical drug tuple required together by one slot.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Combination(Vec<DrugId>);

impl Combination {
    /// Build a combination; order and duplicates in the input are ignored.
    pub fn new<I: IntoIterator<Item = DrugId>>(drugs: I) -> Self {
        let set: BTreeSet<DrugId> = drugs.into_iter().collect();
        Self(set.into_iter().collect())
    }

    /// Drugs in sorted order.
    pub fn drugs(&self) -> &[DrugId] {
        &self.0
    }

    /// `true` if `drug` is part of the combination.
    pub fn contains(&self, drug: &str) -> bool {
        self.0.binary_search_by(|d| d.as_str().cmp(drug)).is_ok()
    }

    /// Number of drugs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` for the empty combination.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

// ─── PackSlots ───────────────────────────────────────────────────────────────

/// Slot layout of every pack: pack → slot → drugs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PackSlots {
    packs: BTreeMap<PackId, BTreeMap<SlotId, BTreeSet<DrugId>>>,
}

impl PackSlots {
    /// Empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(pack, slot, drug)` triples.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (PackId, SlotId, DrugId)>,
    {
        let mut slots = Self::new();
        for (pack, slot, drug) in entries {
            slots.insert(pack, slot, drug);
        }
        slots
    }

    /// Record that `drug` goes into `slot` of `pack`.
    pub fn insert(&mut self, pack: PackId, slot: SlotId, drug: DrugId) {
        self.packs.entry(pack).or_default().entry(slot).or_default().insert(drug);
    }

    /// Slot map of one pack, if any slot data exists for it.
    pub fn slots_of(&self, pack: PackId) -> Option<&BTreeMap<SlotId, BTreeSet<DrugId>>> {
        self.packs.get(&pack)
    }

    /// Packs with slot data.
    pub fn packs(&self) -> impl Iterator<Item = PackId> + '_ {
        self.packs.keys().copied()
    }

    /// `true` when no pack has slot data.
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// Slot map of `pack`, falling back to a single slot holding every drug the
    /// matrix row lists.
    pub fn effective_slots(
        &self,
        pack: PackId,
        matrix: &IncidenceMatrix,
    ) -> BTreeMap<SlotId, BTreeSet<DrugId>> {
        match self.packs.get(&pack) {
            Some(slots) => slots.clone(),
            None => {
                let drugs: BTreeSet<DrugId> = matrix.drugs_of(pack).cloned().collect();
                if drugs.is_empty() {
                    BTreeMap::new()
                } else {
                    BTreeMap::from([(WHOLE_PACK_SLOT, drugs)])
                }
            }
        }
    }

    /// Distinct combinations of `pack`.
    pub fn combinations_of(&self, pack: PackId, matrix: &IncidenceMatrix) -> BTreeSet<Combination> {
        self.effective_slots(pack, matrix)
            .into_values()
            .filter(|drugs| !drugs.is_empty())
            .map(Combination::new)
            .collect()
    }

    /// Combination → packs containing it, over the matrix rows.
    pub fn combination_packs(&self, matrix: &IncidenceMatrix) -> BTreeMap<Combination, BTreeSet<PackId>> {
        let mut out: BTreeMap<Combination, BTreeSet<PackId>> = BTreeMap::new();
        for pack in matrix.packs() {
            for combo in self.combinations_of(pack, matrix) {
                out.entry(combo).or_default().insert(pack);
            }
        }
        out
    }

    /// Drug → combinations it appears in, restricted to `drugs`.
    pub fn drug_combinations(
        &self,
        matrix: &IncidenceMatrix,
        drugs: &BTreeSet<DrugId>,
    ) -> BTreeMap<DrugId, BTreeSet<Combination>> {
        let mut out: BTreeMap<DrugId, BTreeSet<Combination>> =
            drugs.iter().map(|d| (d.clone(), BTreeSet::new())).collect();
        for combo in self.combination_packs(matrix).into_keys() {
            for drug in combo.drugs() {
                if let Some(set) = out.get_mut(drug) {
                    set.insert(combo.clone());
                }
            }
        }
        out
    }

    /// Slot data for `packs` only.
    pub fn restrict(&self, packs: &BTreeSet<PackId>) -> PackSlots {
        Self {
            packs: self
                .packs
                .iter()
                .filter(|(p, _)| packs.contains(*p))
                .map(|(p, s)| (*p, s.clone()))
                .collect(),
        }
    }

    /// Check that every slot drug appears in the pack's matrix row.
    pub fn check_against(&self, matrix: &IncidenceMatrix) -> Result<()> {
        for (pack, slots) in &self.packs {
            if !matrix.contains_pack(*pack) {
                return Err(InputError::UnknownPack(*pack).into());
            }
            let row = matrix.row(*pack);
            for (slot, drugs) in slots {
                if let Some(drug) = drugs.iter().find(|d| !row.contains_key(*d)) {
                    return Err(InputError::UnknownSlotDrug {
                        pack: *pack,
                        slot: *slot,
                        drug: drug.clone(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

impl IncidenceMatrix {
    /// Derive a matrix from slot data; a cell counts the slots using the drug.
    pub fn from_slots(slots: &PackSlots) -> Result<IncidenceMatrix> {
        let mut counts: BTreeMap<(PackId, DrugId), u32> = BTreeMap::new();
        for (pack, slot_map) in &slots.packs {
            for drugs in slot_map.values() {
                for drug in drugs {
                    *counts.entry((*pack, drug.clone())).or_insert(0) += 1;
                }
            }
        }
        IncidenceMatrix::from_entries(counts.into_iter().map(|((p, d), c)| (p, d, c)))
    }
}
