/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Finalised drug/pack clusters.
//!
//! A [`Cluster`] is what one side of a split hands on to the next stage: the
//! packs it owns, every drug those packs use, and the slot combinations that
//! occur in them. All three fields are always present; empty means empty.

use std::collections::BTreeSet;

use crate::matrix::{DrugId, IncidenceMatrix, PackId};
use crate::slots::{Combination, PackSlots};

/// Packs, the drugs they need, and their slot combinations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cluster {
    /// Drugs needed by the packs.
    pub drugs: BTreeSet<DrugId>,
    /// Packs owned by the cluster.
    pub packs: BTreeSet<PackId>,
    /// Distinct slot combinations in the packs.
    pub combinations: BTreeSet<Combination>,
}

impl Cluster {
    /// Build the cluster owning `packs`, deriving drugs from the matrix and
    /// combinations from the slot layout.
    pub fn from_packs(packs: BTreeSet<PackId>, matrix: &IncidenceMatrix, slots: &PackSlots) -> Self {
        let mut drugs = BTreeSet::new();
        let mut combinations = BTreeSet::new();
        for &pack in &packs {
            drugs.extend(matrix.drugs_of(pack).cloned());
            combinations.extend(slots.combinations_of(pack, matrix));
        }
        Self { drugs, packs, combinations }
    }

    /// Cluster covering every row of `matrix`.
    pub fn whole(matrix: &IncidenceMatrix, slots: &PackSlots) -> Self {
        Self::from_packs(matrix.pack_set(), matrix, slots)
    }

    /// Number of packs.
    pub fn pack_length(&self) -> usize {
        self.packs.len()
    }

    /// Number of drugs.
    pub fn drug_length(&self) -> usize {
        self.drugs.len()
    }

    /// `true` when the cluster owns no pack.
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }
}
