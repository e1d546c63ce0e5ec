/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Physical canister inventory and allocation.
//!
//! Canisters are the one resource that must never be handed out twice. The
//! [`CanisterAllocator`] owns every available canister set and is threaded by
//! `&mut` through the planning stages; assigning a canister removes it from
//! its drug's pool, so a second request cannot see it.
//!
//! # Allocation order
//!
//! For a (drug, robot, quadrant) placement the allocator prefers, in order:
//!
//! 1. a canister already sitting in that robot and quadrant,
//! 2. a canister elsewhere in the same robot,
//! 3. a canister on the shelf (no robot),
//! 4. a canister in another robot.
//!
//! Ties inside a tier go to the lowest canister id.
//!
//! # Invariants
//!
//! - A canister id belongs to exactly one drug.
//! - A canister is assigned to at most one (robot, quadrant).

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::error::{InputError, Result};
use crate::matrix::DrugId;
use crate::quadrant::QuadrantId;

/// Physical canister identifier.
pub type CanisterId = u64;

/// Robot identifier.
pub type RobotId = u32;

/// Storage location inside a robot.
pub type LocationId = u32;

/// Drug → canisters available for it.
pub type DrugCanisterInfo = BTreeMap<DrugId, BTreeSet<CanisterId>>;

/// Number of canisters for `drug`; drugs absent from `info` have none.
pub fn canister_count(info: &DrugCanisterInfo, drug: &str) -> usize {
    info.get(drug).map_or(0, BTreeSet::len)
}

/// Reject canister ids registered under more than one drug.
pub fn check_canisters(info: &DrugCanisterInfo) -> Result<()> {
    let mut owner: BTreeMap<CanisterId, &DrugId> = BTreeMap::new();
    for (drug, canisters) in info {
        for &canister in canisters {
            if let Some(first) = owner.insert(canister, drug) {
                return Err(InputError::DuplicateCanister {
                    canister,
                    first: first.clone(),
                    second: drug.clone(),
                }
                .into());
            }
        }
    }
    Ok(())
}

// ─── Locations and transfers ─────────────────────────────────────────────────

/// Where a canister currently sits. `robot == None` means the shelf.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanisterLocation {
    /// Robot holding the canister.
    pub robot: Option<RobotId>,
    /// Location slot inside the robot.
    pub location: Option<LocationId>,
    /// Quadrant of that location.
    pub quadrant: Option<QuadrantId>,
}

impl CanisterLocation {
    /// A canister on the shelf.
    pub const SHELF: Self = Self { robot: None, location: None, quadrant: None };

    /// A canister in `robot` at `quadrant`.
    pub fn in_robot(robot: RobotId, quadrant: QuadrantId) -> Self {
        Self { robot: Some(robot), location: None, quadrant: Some(quadrant) }
    }
}

/// One physical canister move the operator has to perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanisterTransfer {
    /// Robot the canister leaves (`None` = shelf).
    pub src_robot: Option<RobotId>,
    /// Robot it goes to (`None` = back to the shelf).
    pub dest_robot: Option<RobotId>,
    /// Destination quadrant inside `dest_robot`.
    pub dest_quadrant: Option<QuadrantId>,
}

// ─── CanisterAllocator ───────────────────────────────────────────────────────

/// Hands out canisters for quadrant placements without ever reusing one.
#[derive(Clone, Debug, Default)]
pub struct CanisterAllocator {
    available: DrugCanisterInfo,
    drug_of: BTreeMap<CanisterId, DrugId>,
    locations: BTreeMap<CanisterId, CanisterLocation>,
    assigned: BTreeMap<CanisterId, (RobotId, QuadrantId)>,
    evicted: BTreeSet<(RobotId, QuadrantId, DrugId)>,
}

impl CanisterAllocator {
    /// Build from the canister inventory and current locations.
    ///
    /// Canisters without a location entry are on the shelf.
    pub fn new(
        info: &DrugCanisterInfo,
        locations: &BTreeMap<CanisterId, CanisterLocation>,
    ) -> Result<Self> {
        check_canisters(info)?;
        let drug_of = info
            .iter()
            .flat_map(|(d, cs)| cs.iter().map(move |c| (*c, d.clone())))
            .collect();
        Ok(Self {
            available: info.clone(),
            drug_of,
            locations: locations.clone(),
            assigned: BTreeMap::new(),
            evicted: BTreeSet::new(),
        })
    }

    /// Canisters of `drug` not yet assigned.
    pub fn available(&self, drug: &str) -> usize {
        canister_count(&self.available, drug)
    }

    /// Current location of `canister`.
    pub fn location(&self, canister: CanisterId) -> CanisterLocation {
        self.locations.get(&canister).copied().unwrap_or(CanisterLocation::SHELF)
    }

    /// Assign a canister of `drug` to `robot`/`quadrant`, or `None` when the
    /// drug has no canister left.
    pub fn allocate(&mut self, drug: &str, robot: RobotId, quadrant: QuadrantId) -> Option<CanisterId> {
        let pool = self.available.get(drug)?;
        let chosen = pool
            .iter()
            .copied()
            .min_by_key(|c| (self.tier(*c, robot, quadrant), *c))?;
        if let Some(pool) = self.available.get_mut(drug) {
            pool.remove(&chosen);
        }
        self.assigned.insert(chosen, (robot, quadrant));
        debug!(drug, canister = chosen, robot, quadrant, "canister allocated");
        Some(chosen)
    }

    fn tier(&self, canister: CanisterId, robot: RobotId, quadrant: QuadrantId) -> u8 {
        let loc = self.location(canister);
        match loc.robot {
            Some(r) if r == robot && loc.quadrant == Some(quadrant) => 0,
            Some(r) if r == robot => 1,
            None => 2,
            Some(_) => 3,
        }
    }

    /// Record that `drug` was evicted from `robot`/`quadrant`. Its canisters
    /// there that are not reassigned go back to the shelf.
    pub fn evict(&mut self, robot: RobotId, quadrant: QuadrantId, drug: &str) {
        warn!(robot, quadrant, drug, "canister evicted");
        self.evicted.insert((robot, quadrant, drug.to_string()));
    }

    /// Drugs with at least one canister currently located in `robot`.
    pub fn robot_drugs(&self, robot: RobotId) -> BTreeSet<DrugId> {
        self.locations
            .iter()
            .filter(|(_, loc)| loc.robot == Some(robot))
            .filter_map(|(c, _)| self.drug_of.get(c).cloned())
            .collect()
    }

    /// Quadrant → drugs currently loaded in `robot`.
    pub fn robot_layout(&self, robot: RobotId) -> BTreeMap<QuadrantId, BTreeSet<DrugId>> {
        let mut out: BTreeMap<QuadrantId, BTreeSet<DrugId>> = BTreeMap::new();
        for (canister, loc) in &self.locations {
            if let (Some(r), Some(q)) = (loc.robot, loc.quadrant) {
                if r == robot {
                    if let Some(drug) = self.drug_of.get(canister) {
                        out.entry(q).or_default().insert(drug.clone());
                    }
                }
            }
        }
        out
    }

    /// Canister → (robot, quadrant) for every assignment made so far.
    pub fn assignments(&self) -> &BTreeMap<CanisterId, (RobotId, QuadrantId)> {
        &self.assigned
    }

    /// Every move needed to reach the assigned layout.
    ///
    /// Includes assigned canisters whose robot or quadrant changes, and
    /// unassigned canisters sitting where their drug was evicted.
    pub fn transfers(&self) -> BTreeMap<CanisterId, CanisterTransfer> {
        let mut out = BTreeMap::new();
        for (&canister, &(robot, quadrant)) in &self.assigned {
            let loc = self.location(canister);
            if loc.robot != Some(robot) || loc.quadrant != Some(quadrant) {
                out.insert(
                    canister,
                    CanisterTransfer {
                        src_robot: loc.robot,
                        dest_robot: Some(robot),
                        dest_quadrant: Some(quadrant),
                    },
                );
            }
        }
        for (&canister, loc) in &self.locations {
            if self.assigned.contains_key(&canister) {
                continue;
            }
            let (Some(robot), Some(quadrant)) = (loc.robot, loc.quadrant) else { continue };
            let Some(drug) = self.drug_of.get(&canister) else { continue };
            if self.evicted.contains(&(robot, quadrant, drug.clone())) {
                out.insert(
                    canister,
                    CanisterTransfer { src_robot: Some(robot), dest_robot: None, dest_quadrant: None },
                );
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DistributionError;

    fn info() -> DrugCanisterInfo {
        BTreeMap::from([
            ("A".to_string(), BTreeSet::from([1, 2, 3, 4])),
            ("B".to_string(), BTreeSet::from([10])),
        ])
    }

    #[test]
    fn duplicate_canister_rejected() {
        let mut bad = info();
        bad.insert("C".to_string(), BTreeSet::from([10]));
        let err = check_canisters(&bad).unwrap_err();
        assert!(matches!(
            err,
            DistributionError::InputInconsistency(InputError::DuplicateCanister { canister: 10, .. })
        ));
    }

    #[test]
    fn allocation_prefers_closest_canister() {
        let locations = BTreeMap::from([
            (1, CanisterLocation::in_robot(2, 1)),
            (2, CanisterLocation::in_robot(1, 3)),
            (3, CanisterLocation::in_robot(1, 1)),
        ]);
        let mut alloc = CanisterAllocator::new(&info(), &locations).unwrap();
        assert_eq!(alloc.allocate("A", 1, 1), Some(3));
        assert_eq!(alloc.allocate("A", 1, 1), Some(2));
        // canister 4 has no location: shelf beats another robot
        assert_eq!(alloc.allocate("A", 1, 1), Some(4));
        assert_eq!(alloc.allocate("A", 1, 1), Some(1));
        assert_eq!(alloc.allocate("A", 1, 1), None);
        assert_eq!(alloc.allocate("Z", 1, 1), None);
    }

    #[test]
    fn never_assigns_twice() {
        let mut alloc = CanisterAllocator::new(&info(), &BTreeMap::new()).unwrap();
        let a = alloc.allocate("B", 1, 1);
        let b = alloc.allocate("B", 2, 1);
        assert_eq!(a, Some(10));
        assert_eq!(b, None);
        assert_eq!(alloc.assignments().len(), 1);
    }

    #[test]
    fn transfers_cover_moves_and_evictions() {
        let locations = BTreeMap::from([
            (1, CanisterLocation::in_robot(1, 1)),
            (2, CanisterLocation::in_robot(1, 2)),
            (10, CanisterLocation::in_robot(2, 4)),
        ]);
        let mut alloc = CanisterAllocator::new(&info(), &locations).unwrap();
        assert_eq!(alloc.allocate("A", 1, 1), Some(1));
        assert_eq!(alloc.allocate("A", 2, 3), Some(3));
        alloc.evict(2, 4, "B");
        let t = alloc.transfers();
        assert!(!t.contains_key(&1));
        assert_eq!(
            t[&3],
            CanisterTransfer { src_robot: None, dest_robot: Some(2), dest_quadrant: Some(3) }
        );
        assert_eq!(t[&10].dest_robot, None);
        assert!(!t.contains_key(&2));
        assert_eq!(alloc.robot_drugs(1), BTreeSet::from(["A".to_string()]));
        assert_eq!(alloc.robot_layout(2)[&4], BTreeSet::from(["B".to_string()]));
    }
}
