/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Output invariant checks.
//!
//! The planner runs these only when `assert_output` is set. Tests run them
//! on every result.

use std::collections::{BTreeMap, BTreeSet};

use crate::canister::{canister_count, CanisterId, DrugCanisterInfo, RobotId};
use crate::cluster::Cluster;
use crate::config::DistributionConfig;
use crate::engine::{DistributionInput, DistributionPlan};
use crate::error::{DistributionError, Result};
use crate::matrix::{DrugId, IncidenceMatrix, PackId};
use crate::quadrant::{QuadrantAssignment, QuadrantId};

fn violated(msg: String) -> DistributionError {
    DistributionError::InvariantViolated(msg)
}

/// Packs are disjoint across parts, together cover the matrix, and each part
/// holds every drug its packs use.
fn check_parts<'a, I>(matrix: &IncidenceMatrix, parts: I) -> Result<()>
where
    I: IntoIterator<Item = (&'a BTreeSet<PackId>, &'a BTreeSet<DrugId>)>,
{
    let mut owner: BTreeMap<PackId, usize> = BTreeMap::new();
    for (i, (packs, drugs)) in parts.into_iter().enumerate() {
        for &pack in packs {
            if let Some(first) = owner.insert(pack, i) {
                return Err(violated(format!("pack {pack} assigned to parts {first} and {i}")));
            }
            if let Some(drug) = matrix.drugs_of(pack).find(|d| !drugs.contains(*d)) {
                return Err(violated(format!("pack {pack} needs {drug} missing from part {i}")));
            }
        }
    }
    if let Some(pack) = matrix.packs().find(|p| !owner.contains_key(p)) {
        return Err(violated(format!("pack {pack} assigned nowhere")));
    }
    if owner.len() != matrix.pack_count() {
        return Err(violated(format!(
            "{} packs assigned, matrix has {}",
            owner.len(),
            matrix.pack_count()
        )));
    }
    Ok(())
}

/// Check pack conservation and drug coverage of a set of clusters.
pub fn verify_clusters(matrix: &IncidenceMatrix, clusters: &[Cluster]) -> Result<()> {
    check_parts(matrix, clusters.iter().map(|c| (&c.packs, &c.drugs)))
}

/// Check one robot's quadrant layout against the capacity and the canister
/// budget of each drug.
pub fn verify_quadrants(
    assignment: &QuadrantAssignment,
    capacity: usize,
    canisters: &DrugCanisterInfo,
) -> Result<()> {
    let mut placements: BTreeMap<&DrugId, usize> = BTreeMap::new();
    for (id, quadrant) in &assignment.quadrants {
        if quadrant.used_slots() > capacity {
            return Err(violated(format!(
                "quadrant {id} holds {} drugs, capacity {capacity}",
                quadrant.used_slots()
            )));
        }
        for drug in &quadrant.drugs {
            *placements.entry(drug).or_insert(0) += 1;
        }
    }
    for (drug, n) in placements {
        let budget = canister_count(canisters, drug);
        if budget > 0 && n > budget {
            return Err(violated(format!("{drug} placed {n} times with {budget} canisters")));
        }
    }
    Ok(())
}

/// No canister serves two (robot, quadrant) positions or two drugs.
pub fn verify_canisters(plan: &DistributionPlan) -> Result<()> {
    let mut used: BTreeMap<CanisterId, (RobotId, QuadrantId, &DrugId)> = BTreeMap::new();
    for (pack, entries) in &plan.fulfillment {
        for e in entries {
            let (Some(canister), Some(robot), Some(quadrant)) = (e.canister, e.robot, e.quadrant) else {
                continue;
            };
            match plan.canisters.get(&canister) {
                Some(&(r, q)) if r == robot && q == quadrant => {}
                _ => {
                    return Err(violated(format!(
                        "pack {pack} uses canister {canister} outside its assignment"
                    )))
                }
            }
            let seen = used.entry(canister).or_insert((robot, quadrant, &e.drug));
            if *seen != (robot, quadrant, &e.drug) {
                return Err(violated(format!("canister {canister} used for two positions")));
            }
        }
    }
    Ok(())
}

/// Every plan-level invariant of `plan` against the input it was made from.
///
/// Each robot's quadrants are checked against that robot's own capacity.
pub fn verify_plan(plan: &DistributionPlan, input: &DistributionInput, config: &DistributionConfig) -> Result<()> {
    let matrix = &input.matrix;
    check_parts(matrix, plan.robots.values().map(|c| (&c.packs, &c.drugs)))?;
    for (robot, assignment) in &plan.quadrants {
        let capacity = input.quadrant_capacity(*robot, config);
        if let Err(DistributionError::InvariantViolated(msg)) =
            verify_quadrants(assignment, capacity, &input.drug_canisters)
        {
            return Err(violated(format!("robot {robot}: {msg}")));
        }
    }
    verify_canisters(plan)?;
    let planned: BTreeSet<PackId> = plan.fulfillment.keys().copied().collect();
    if planned != matrix.pack_set() {
        return Err(violated("fulfillment does not list every pack".into()));
    }
    Ok(())
}
