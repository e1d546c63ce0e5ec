/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Pack × drug incidence matrix.
//!
//! Rows are packs, columns are drugs, a cell is the number of times the drug
//! is dispensed into the pack. Clustering only cares whether a cell is
//! nonzero, so both directions of the boolean relation are precomputed once
//! and served by reference afterwards.
//!
//! # Invariants
//!
//! - Every pack row has at least one nonzero drug.
//! - A matrix is never mutated after construction. Sub-matrices for a
//!   recursive branch are derived with [`IncidenceMatrix::restrict`] and owned
//!   by that branch.
//! - Zero cells are not stored; a drug column may exist with no pack using it.

use std::collections::{BTreeMap, BTreeSet};

use hashbrown::HashMap;

use crate::error::{InputError, Result};

/// Pack identifier (matrix row).
pub type PackId = u64;

/// Drug identifier (matrix column).
pub type DrugId = String;

static NO_PACKS: BTreeSet<PackId> = BTreeSet::new();
static NO_DRUGS: BTreeMap<DrugId, u32> = BTreeMap::new();

/// Immutable pack × drug usage matrix with O(1) lookups in both directions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IncidenceMatrix {
    /// Nonzero cells, row-major.
    rows: BTreeMap<PackId, BTreeMap<DrugId, u32>>,
    /// Column index: drug → packs with a nonzero cell.
    columns: HashMap<DrugId, BTreeSet<PackId>>,
    /// Every drug column, including columns with no nonzero cell.
    drugs: BTreeSet<DrugId>,
}

impl IncidenceMatrix {
    /// Build a matrix from `(pack, drug, count)` cells.
    ///
    /// A zero count registers the drug column without marking a use. The
    /// same (pack, drug) pair twice is rejected, as is a pack whose every
    /// cell is zero.
    pub fn from_entries<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (PackId, DrugId, u32)>,
    {
        let mut rows: BTreeMap<PackId, BTreeMap<DrugId, u32>> = BTreeMap::new();
        let mut drugs = BTreeSet::new();
        for (pack, drug, count) in entries {
            let row = rows.entry(pack).or_default();
            if row.contains_key(&drug) {
                return Err(InputError::DuplicateEntry { pack, drug }.into());
            }
            drugs.insert(drug.clone());
            row.insert(drug, count);
        }

        for (pack, row) in rows.iter_mut() {
            row.retain(|_, count| *count > 0);
            if row.is_empty() {
                return Err(InputError::EmptyPack(*pack).into());
            }
        }

        Ok(Self::from_parts(rows, drugs))
    }

    /// Build a matrix from whole rows.
    pub fn from_rows<I, R>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (PackId, R)>,
        R: IntoIterator<Item = (DrugId, u32)>,
    {
        Self::from_entries(
            rows.into_iter()
                .flat_map(|(pack, row)| row.into_iter().map(move |(d, c)| (pack, d, c))),
        )
    }

    fn from_parts(rows: BTreeMap<PackId, BTreeMap<DrugId, u32>>, drugs: BTreeSet<DrugId>) -> Self {
        let mut columns: HashMap<DrugId, BTreeSet<PackId>> = HashMap::new();
        for (pack, row) in &rows {
            for drug in row.keys() {
                columns.entry(drug.clone()).or_default().insert(*pack);
            }
        }
        Self { rows, columns, drugs }
    }

    /// Packs with a nonzero cell for `drug`. Unknown drugs yield the empty set.
    pub fn packs_of(&self, drug: &str) -> &BTreeSet<PackId> {
        self.columns.get(drug).unwrap_or(&NO_PACKS)
    }

    /// Nonzero drugs of `pack` with their counts. Unknown packs yield the empty map.
    pub fn row(&self, pack: PackId) -> &BTreeMap<DrugId, u32> {
        self.rows.get(&pack).unwrap_or(&NO_DRUGS)
    }

    /// Nonzero drugs of `pack`, in sorted order.
    pub fn drugs_of(&self, pack: PackId) -> impl Iterator<Item = &DrugId> + '_ {
        self.row(pack).keys()
    }

    /// Cell value, 0 when absent.
    pub fn count(&self, pack: PackId, drug: &str) -> u32 {
        self.row(pack).get(drug).copied().unwrap_or(0)
    }

    /// All pack rows in ascending id order.
    pub fn packs(&self) -> impl Iterator<Item = PackId> + '_ {
        self.rows.keys().copied()
    }

    /// All drug columns in sorted order, used or not.
    pub fn drugs(&self) -> &BTreeSet<DrugId> {
        &self.drugs
    }

    /// Drug columns used by at least one pack.
    pub fn used_drugs(&self) -> BTreeSet<DrugId> {
        self.drugs
            .iter()
            .filter(|d| self.columns.contains_key(d.as_str()))
            .cloned()
            .collect()
    }

    /// Number of pack rows.
    pub fn pack_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of drug columns.
    pub fn drug_count(&self) -> usize {
        self.drugs.len()
    }

    /// `true` if the matrix has a row for `pack`.
    pub fn contains_pack(&self, pack: PackId) -> bool {
        self.rows.contains_key(&pack)
    }

    /// `true` if the matrix has a column for `drug`.
    pub fn contains_drug(&self, drug: &str) -> bool {
        self.drugs.contains(drug)
    }

    /// Pack set as an owned `BTreeSet`.
    pub fn pack_set(&self) -> BTreeSet<PackId> {
        self.rows.keys().copied().collect()
    }

    /// Derive the sub-matrix holding only `packs` rows and `drugs` columns.
    ///
    /// Rows left with no nonzero cell after the column cut are dropped, so the
    /// result keeps the "every pack uses a drug" invariant.
    pub fn restrict(&self, packs: &BTreeSet<PackId>, drugs: &BTreeSet<DrugId>) -> IncidenceMatrix {
        let mut rows = BTreeMap::new();
        for pack in packs {
            let Some(row) = self.rows.get(pack) else { continue };
            let kept: BTreeMap<DrugId, u32> = row
                .iter()
                .filter(|(d, _)| drugs.contains(*d))
                .map(|(d, c)| (d.clone(), *c))
                .collect();
            if !kept.is_empty() {
                rows.insert(*pack, kept);
            }
        }
        let columns = self.drugs.intersection(drugs).cloned().collect();
        Self::from_parts(rows, columns)
    }

    /// Drop every drug column that no remaining pack uses.
    pub fn without_empty_drugs(self) -> IncidenceMatrix {
        let Self { rows, columns, drugs } = self;
        let drugs = drugs.into_iter().filter(|d| columns.contains_key(d)).collect();
        Self { rows, columns, drugs }
    }
}
