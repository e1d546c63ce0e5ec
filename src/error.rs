/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Error types for the distribution pipeline.
//!
//! Only structural problems surface here. Degenerate algorithmic cases (a tree
//! that never branches, an empty remainder, a cluster with no drugs) are
//! handled by explicit branches and never become errors.

use thiserror::Error;

use crate::canister::{CanisterId, RobotId};
use crate::matrix::{DrugId, PackId};
use crate::slots::SlotId;

/// Input that contradicts itself and cannot be planned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// The same (pack, drug) cell was supplied twice.
    #[error("duplicate matrix entry for pack {pack} and drug {drug}")]
    DuplicateEntry {
        /// Pack row.
        pack: PackId,
        /// Drug column.
        drug: DrugId,
    },

    /// A pack row has no nonzero drug.
    #[error("pack {0} uses no drug")]
    EmptyPack(PackId),

    /// A slot references a drug the pack does not use in the matrix.
    #[error("slot {slot} of pack {pack} references drug {drug} missing from the matrix row")]
    UnknownSlotDrug {
        /// Pack holding the slot.
        pack: PackId,
        /// Slot number.
        slot: SlotId,
        /// Offending drug.
        drug: DrugId,
    },

    /// Slot data exists for a pack that is not in the matrix.
    #[error("slot data references pack {0} missing from the matrix")]
    UnknownPack(PackId),

    /// One canister id is registered under two drugs.
    #[error("canister {canister} registered for both {first} and {second}")]
    DuplicateCanister {
        /// Canister id.
        canister: CanisterId,
        /// Drug it was first seen under.
        first: DrugId,
        /// Drug it was seen under again.
        second: DrugId,
    },

    /// No robot was supplied.
    #[error("robot list is empty")]
    NoRobots,

    /// The same robot id appears twice in the robot list.
    #[error("robot {0} listed twice")]
    DuplicateRobot(RobotId),
}

/// Crate-wide error type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistributionError {
    /// Inconsistent input data.
    #[error("inconsistent input: {0}")]
    InputInconsistency(#[from] InputError),

    /// The quadrant capacity cannot hold the drugs the batch needs.
    #[error("unable to add {} drug {drug} in any quadrant of robot {robot}", placement_kind(.multi_canister))]
    PlacementInfeasible {
        /// Robot whose quadrant pass failed.
        robot: RobotId,
        /// Drug that could not be placed.
        drug: DrugId,
        /// Whether the drug holds more than one canister.
        multi_canister: bool,
    },

    /// Configuration values out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An output invariant failed while `assert_output` was enabled.
    #[error("output invariant violated: {0}")]
    InvariantViolated(String),
}

fn placement_kind(multi_canister: &bool) -> &'static str {
    if *multi_canister {
        "multiple canister"
    } else {
        "single canister"
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, DistributionError>;
