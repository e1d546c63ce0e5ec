/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! End-to-end planning.
//!
//! [`DistributionEngine::plan`] chains the stages in a fixed order:
//!
//! ```text
//! validate → robot split → robot matching → canister shares → per robot:
//!     quadrant placement → cut to canisters → drop schedule
//!     → canister allocation → fill plan
//! → transfers → (optional) invariant checks
//! ```
//!
//! The canister allocator is the only state shared between robots; it is
//! threaded through the loop by `&mut` so an earlier robot's canister can
//! never be handed to a later one. Each drug's canisters are divided between
//! the robots needing it before the loop, and placements without a canister
//! are removed before drops are scheduled, so schedules only count drops a
//! loaded canister can make.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::canister::{
    check_canisters, CanisterAllocator, CanisterId, CanisterLocation, CanisterTransfer,
    DrugCanisterInfo, RobotId,
};
use crate::cluster::Cluster;
use crate::config::DistributionConfig;
use crate::drops::{DropSchedule, DropScheduler};
use crate::error::{InputError, Result};
use crate::matrix::{DrugId, IncidenceMatrix, PackId};
use crate::quadrant::{QuadrantAssignment, QuadrantDistributionEngine, QuadrantId};
use crate::robots::{match_robots, AssignedCluster, MultiRobotOrchestrator, RobotAssignment};
use crate::slots::{PackSlots, SlotId};
use crate::verify;

// ─── Input ───────────────────────────────────────────────────────────────────

/// Everything one planning run consumes.
#[derive(Clone, Debug, Default)]
pub struct DistributionInput {
    /// Pack × drug usage.
    pub matrix: IncidenceMatrix,
    /// Per-slot drug layout; packs without an entry use one whole-pack slot.
    pub slots: PackSlots,
    /// Drug → canisters. Drugs not listed are filled by hand.
    pub drug_canisters: DrugCanisterInfo,
    /// Robots in priority order.
    pub robots: Vec<RobotId>,
    /// Canister capacity per robot; caps the quadrant capacity when smaller.
    pub robot_capacity: BTreeMap<RobotId, usize>,
    /// Current canister positions; unlisted canisters are on the shelf.
    pub canister_locations: BTreeMap<CanisterId, CanisterLocation>,
    /// Delivery day per pack.
    pub delivery_dates: Option<BTreeMap<PackId, i64>>,
}

impl DistributionInput {
    /// Input with no slot data, locations or dates.
    pub fn new(matrix: IncidenceMatrix, drug_canisters: DrugCanisterInfo, robots: Vec<RobotId>) -> Self {
        Self { matrix, drug_canisters, robots, ..Default::default() }
    }

    /// Reject inconsistent input.
    pub fn validate(&self) -> Result<()> {
        if self.robots.is_empty() {
            return Err(InputError::NoRobots.into());
        }
        let mut seen = BTreeSet::new();
        if let Some(robot) = self.robots.iter().find(|r| !seen.insert(**r)) {
            return Err(InputError::DuplicateRobot(*robot).into());
        }
        self.slots.check_against(&self.matrix)?;
        check_canisters(&self.drug_canisters)
    }

    /// Canister slots per quadrant of `robot`: the configured capacity, or
    /// less when the robot's frame is smaller.
    pub fn quadrant_capacity(&self, robot: RobotId, config: &DistributionConfig) -> usize {
        self.robot_capacity
            .get(&robot)
            .map_or(config.quad_canister_capacity, |c| {
                (c / config.num_quadrants.max(1)).min(config.quad_canister_capacity)
            })
    }
}

// ─── Output ──────────────────────────────────────────────────────────────────

/// How one drug reaches one slot of a pack.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FillEntry {
    /// Drug dispensed.
    pub drug: DrugId,
    /// Canister dispensing it; `None` for manual fill.
    pub canister: Option<CanisterId>,
    /// Robot filling the pack.
    pub robot: Option<RobotId>,
    /// Physical quadrant holding the canister.
    pub quadrant: Option<QuadrantId>,
    /// Target slot.
    pub slot: SlotId,
    /// Drop number within the pack.
    pub drop_number: Option<u32>,
    /// Pack configuration of that drop.
    pub configuration_id: Option<u8>,
}

/// Complete plan for a batch.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistributionPlan {
    /// Robot → packs and drugs.
    pub robots: RobotAssignment,
    /// Robot → quadrant layout (abstract quadrant labels).
    pub quadrants: BTreeMap<RobotId, QuadrantAssignment>,
    /// Robot → chosen drop schedule.
    pub schedules: BTreeMap<RobotId, DropSchedule>,
    /// Canister → (robot, physical quadrant).
    pub canisters: BTreeMap<CanisterId, (RobotId, QuadrantId)>,
    /// Canister moves needed before filling.
    pub transfers: BTreeMap<CanisterId, CanisterTransfer>,
    /// Pack → one entry per (slot, drug).
    pub fulfillment: BTreeMap<PackId, Vec<FillEntry>>,
}

impl DistributionPlan {
    /// Entries without a canister.
    pub fn manual_entries(&self) -> impl Iterator<Item = (PackId, &FillEntry)> + '_ {
        self.fulfillment
            .iter()
            .flat_map(|(p, es)| es.iter().map(move |e| (*p, e)))
            .filter(|(_, e)| e.canister.is_none())
    }
}

// ─── Canister shares ─────────────────────────────────────────────────────────

/// Split each drug's canisters between the matched robots whose clusters use
/// it.
///
/// Robots already holding the drug come first, then robot order. Each gets
/// `canisters / robots`, the first `canisters % robots` one more. With fewer
/// canisters than robots the last robots get none and fill the drug by hand.
fn canister_shares(
    robots: &[RobotId],
    matched: &BTreeMap<RobotId, Cluster>,
    canisters: &DrugCanisterInfo,
    loaded: &BTreeMap<RobotId, BTreeSet<DrugId>>,
) -> BTreeMap<RobotId, BTreeMap<DrugId, usize>> {
    let mut out: BTreeMap<RobotId, BTreeMap<DrugId, usize>> = BTreeMap::new();
    for (drug, owned) in canisters {
        let mut users: Vec<(usize, RobotId)> = robots
            .iter()
            .enumerate()
            .filter(|(_, r)| matched.get(*r).map_or(false, |c| c.drugs.contains(drug)))
            .map(|(i, r)| (i, *r))
            .collect();
        if users.is_empty() {
            continue;
        }
        users.sort_by_key(|&(i, r)| (!loaded.get(&r).map_or(false, |l| l.contains(drug)), i));

        let (base, extra) = (owned.len() / users.len(), owned.len() % users.len());
        if base == 0 {
            debug!(drug = %drug, canisters = owned.len(), robots = users.len(), "canister shortage");
        }
        for (n, (_, robot)) in users.into_iter().enumerate() {
            let share = base + usize::from(n < extra);
            out.entry(robot).or_default().insert(drug.clone(), share);
        }
    }
    out
}

// ─── DistributionEngine ──────────────────────────────────────────────────────

/// Top-level planner.
#[derive(Clone, Debug, Default)]
pub struct DistributionEngine {
    config: DistributionConfig,
}

impl DistributionEngine {
    /// Planner with `config`.
    pub fn new(config: DistributionConfig) -> Self {
        Self { config }
    }

    /// Active configuration.
    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Plan `input` end to end.
    pub fn plan(&self, input: &DistributionInput) -> Result<DistributionPlan> {
        let cfg = &self.config;
        cfg.validate()?;
        input.validate()?;

        let mut allocator = CanisterAllocator::new(&input.drug_canisters, &input.canister_locations)?;
        let clusters = MultiRobotOrchestrator::new(cfg, &input.drug_canisters, &input.slots)
            .delivery_dates(input.delivery_dates.as_ref())
            .run(&input.matrix, input.robots.len())?;

        let loaded: BTreeMap<RobotId, BTreeSet<DrugId>> =
            input.robots.iter().map(|r| (*r, allocator.robot_drugs(*r))).collect();
        let matched = match_robots(clusters, &input.robots, &loaded);
        let shares = canister_shares(&input.robots, &matched, &input.drug_canisters, &loaded);

        let mut plan = DistributionPlan::default();
        for &robot in &input.robots {
            let Some(cluster) = matched.get(&robot) else { continue };
            let sub = input.matrix.restrict(&cluster.packs, &cluster.drugs);
            let budgets = shares.get(&robot).cloned().unwrap_or_default();

            let layout = allocator.robot_layout(robot);
            let mut quadrants = QuadrantDistributionEngine::new(cfg, &input.drug_canisters)
                .capacity(input.quadrant_capacity(robot, cfg))
                .budgets(&budgets)
                .distribute(robot, &sub, &input.slots, Some(&layout))?;

            for (q, drugs) in &quadrants.evicted {
                for drug in drugs {
                    allocator.evict(robot, *q, drug);
                }
            }
            for drug in quadrants.placed_drugs() {
                let loaded_in: BTreeSet<QuadrantId> = layout
                    .iter()
                    .filter(|(_, held)| held.contains(&drug))
                    .map(|(q, _)| *q)
                    .collect();
                let left = allocator.available(&drug);
                let keep = budgets.get(&drug).map_or(left, |share| left.min(*share));
                let cut = quadrants.limit_placements(&drug, keep, &loaded_in);
                if !cut.is_empty() {
                    warn!(robot, drug = %drug, quadrants = ?cut, "no canister left for placement");
                }
            }

            let schedule = DropScheduler::new(cfg).schedule(&quadrants, &cluster.packs, &sub, &input.slots);

            let mut held: BTreeMap<(QuadrantId, DrugId), CanisterId> = BTreeMap::new();
            for (label, quadrant) in &quadrants.quadrants {
                let physical = schedule.physical(*label).unwrap_or(*label);
                for drug in quadrant.drugs.iter().filter(|d| cluster.drugs.contains(*d)) {
                    match allocator.allocate(drug, robot, physical) {
                        Some(canister) => {
                            held.insert((physical, drug.clone()), canister);
                        }
                        None => warn!(robot, drug = %drug, quadrant = physical, "no canister left"),
                    }
                }
            }

            for &pack in &cluster.packs {
                let drops = schedule.packs.get(&pack);
                let mut entries = Vec::new();
                for (slot, drugs) in input.slots.effective_slots(pack, &sub) {
                    for drug in drugs {
                        let step = drops.and_then(|p| p.drop_for(slot, &drug));
                        let canister = step.and_then(|s| held.get(&(s.quadrant, drug.clone())).copied());
                        let entry = match (step, canister) {
                            (Some(s), Some(c)) => FillEntry {
                                drug,
                                canister: Some(c),
                                robot: Some(robot),
                                quadrant: Some(s.quadrant),
                                slot,
                                drop_number: Some(s.number),
                                configuration_id: s.configuration_id,
                            },
                            _ => FillEntry {
                                drug,
                                canister: None,
                                robot: Some(robot),
                                quadrant: None,
                                slot,
                                drop_number: None,
                                configuration_id: None,
                            },
                        };
                        entries.push(entry);
                    }
                }
                plan.fulfillment.insert(pack, entries);
            }

            info!(
                robot,
                packs = cluster.pack_length(),
                drugs = cluster.drug_length(),
                drops = schedule.total_drops,
                secs = schedule.fill_time_secs,
                "robot planned"
            );
            plan.robots.insert(robot, AssignedCluster::from(cluster));
            plan.quadrants.insert(robot, quadrants);
            plan.schedules.insert(robot, schedule);
        }

        plan.canisters = allocator.assignments().clone();
        plan.transfers = allocator.transfers();

        if cfg.assert_output {
            verify::verify_plan(&plan, input, cfg)?;
        }
        Ok(plan)
    }
}
