//! Integration tests for quadrant placement, drop scheduling and the full
//! planning run.

use std::collections::{BTreeMap, BTreeSet};

use packsplit_core::verify::{verify_plan, verify_quadrants};
use packsplit_core::{
    CanisterLocation, DistributionConfig, DistributionEngine, DistributionInput, DistributionPlan, DrugCanisterInfo,
    DrugId, DropScheduler, IncidenceMatrix, PackSlots, Quadrant, QuadrantAssignment,
    QuadrantDistributionEngine, QuadrantId,
};

// ─── helpers ─────────────────────────────────────────────────────────────────

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

/// Four chains of `size` drugs; neighbouring drugs of a chain share a slot.
fn chains(size: usize) -> (IncidenceMatrix, PackSlots, Vec<DrugId>) {
    let mut slots = PackSlots::new();
    let mut drugs = Vec::new();
    for g in 0..4 {
        for i in 0..size {
            drugs.push(format!("Q{g}-{i:02}"));
        }
        for i in 0..size - 1 {
            let pack = (g * 1000 + i) as u64;
            slots.insert(pack, 1, format!("Q{g}-{i:02}"));
            slots.insert(pack, 1, format!("Q{g}-{:02}", i + 1));
        }
    }
    let m = IncidenceMatrix::from_slots(&slots).expect("valid slots");
    (m, slots, drugs)
}

fn layout(quadrants: &[(QuadrantId, &[&str])]) -> QuadrantAssignment {
    QuadrantAssignment {
        quadrants: quadrants
            .iter()
            .map(|(q, ds)| (*q, Quadrant { drugs: ds.iter().map(|x| d(x)).collect(), ..Default::default() }))
            .collect(),
        ..Default::default()
    }
}

fn all_mappings() -> Vec<BTreeMap<QuadrantId, QuadrantId>> {
    let mut out = Vec::new();
    for a in 1..=4u8 {
        for b in 1..=4u8 {
            for c in 1..=4u8 {
                for e in 1..=4u8 {
                    let perm = [a, b, c, e];
                    let distinct: BTreeSet<u8> = perm.iter().copied().collect();
                    if distinct.len() == 4 {
                        out.push((1..=4u8).zip(perm).collect());
                    }
                }
            }
        }
    }
    out
}

/// Packs 1–4 use A and B, packs 5–8 use C and D, one drug per slot.
fn two_robot_input() -> DistributionInput {
    let mut slots = PackSlots::new();
    for pack in 1..=4u64 {
        slots.insert(pack, 1, d("A"));
        slots.insert(pack, 2, d("B"));
    }
    for pack in 5..=8u64 {
        slots.insert(pack, 1, d("C"));
        slots.insert(pack, 2, d("D"));
    }
    let matrix = IncidenceMatrix::from_slots(&slots).expect("valid slots");
    let canisters = one_each(&[d("A"), d("B"), d("C"), d("D")]);
    let canister_locations = BTreeMap::from([
        (1, CanisterLocation::in_robot(2, 1)),
        (2, CanisterLocation::in_robot(2, 1)),
        (3, CanisterLocation::in_robot(1, 2)),
    ]);
    DistributionInput {
        slots,
        canister_locations,
        ..DistributionInput::new(matrix, canisters, vec![1, 2])
    }
}

/// Packs 1–4 use A or B, packs 5–8 use C or D; every pack also uses X,
/// which has one canister per robot.
fn shared_drug_input() -> DistributionInput {
    let m = IncidenceMatrix::from_entries((1..=8u64).flat_map(|p| {
        let own = ["A", "B", "C", "D"][((p - 1) / 4 * 2 + (p - 1) % 2) as usize];
        [(p, d(own), 1), (p, d("X"), 1)]
    }))
    .expect("valid matrix");
    let mut canisters = one_each(&[d("A"), d("B"), d("C"), d("D")]);
    canisters.insert(d("X"), BTreeSet::from([50, 51]));
    DistributionInput::new(m, canisters, vec![1, 2])
}

/// Every drug a robot's layout holds has a canister assigned to that robot
/// and physical quadrant.
fn placements_have_canisters(plan: &DistributionPlan, input: &DistributionInput) -> bool {
    plan.quadrants.iter().all(|(robot, layout)| {
        layout.quadrants.iter().all(|(label, q)| {
            let physical = plan.schedules[robot].physical(*label).unwrap_or(*label);
            q.drugs.iter().all(|drug| {
                input.drug_canisters[drug]
                    .iter()
                    .any(|c| plan.canisters.get(c) == Some(&(*robot, physical)))
            })
        })
    })
}

// ─── quadrant placement ──────────────────────────────────────────────────────

#[test]
fn scenario_c_full_robot_balances_quadrants() {
    let capacity = 20;
    let (m, slots, drugs) = chains(capacity);
    assert_eq!(drugs.len(), 4 * capacity);
    let info = one_each(&drugs);
    let cfg = DistributionConfig::default();

    let out = QuadrantDistributionEngine::new(&cfg, &info)
        .distribute(1, &m, &slots, None)
        .expect("placement succeeds");
    verify_quadrants(&out, capacity, &info).expect("layout valid");
    assert!(out.dropped.is_empty());
    assert_eq!(out.quadrants.len(), 4);
    assert!(out.quadrants.values().all(|q| q.used_slots() == capacity));
    assert_eq!(out.placed_drugs().len(), drugs.len());
}

// ─── drop scheduling ─────────────────────────────────────────────────────────

#[test]
fn drops_equal_adjacent_groups_for_every_mapping() {
    // Three 2×2 blocks and one lone slot, each served by its own quadrant.
    let mut slots = PackSlots::new();
    for s in [22, 23, 15, 16] {
        slots.insert(1, s, d("A"));
    }
    for s in [24, 25, 17, 18] {
        slots.insert(1, s, d("B"));
    }
    for s in [8, 9, 1, 2] {
        slots.insert(1, s, d("C"));
    }
    slots.insert(1, 7, d("D"));
    let m = IncidenceMatrix::from_slots(&slots).expect("valid slots");
    let a = layout(&[(1, &["A"]), (2, &["B"]), (3, &["C"]), (4, &["D"])]);
    let cfg = DistributionConfig::default();
    let scheduler = DropScheduler::new(&cfg);
    let packs = BTreeSet::from([1]);

    let best = scheduler.schedule(&a, &packs, &m, &slots);
    assert_eq!(best.total_drops, 4);
    assert_eq!(best.unfillable, 0);
    for mapping in all_mappings() {
        let s = scheduler.evaluate(&mapping, &a, &packs, &m, &slots);
        assert!(s.total_drops >= best.total_drops);
    }
}

// ─── full plan ───────────────────────────────────────────────────────────────

#[test]
fn plan_matches_robots_to_loaded_canisters() {
    let input = two_robot_input();
    let cfg = DistributionConfig { assert_output: true, ..Default::default() };
    let plan = DistributionEngine::new(cfg.clone()).plan(&input).expect("plan succeeds");

    verify_plan(&plan, &input, &cfg).expect("plan valid");
    assert_eq!(plan.robots[&2].drugs, BTreeSet::from([d("A"), d("B")]));
    assert_eq!(plan.robots[&1].drugs, BTreeSet::from([d("C"), d("D")]));
    assert_eq!(plan.manual_entries().count(), 0);
    assert_eq!(plan.fulfillment[&1].len(), 2);
    assert!(plan.fulfillment[&5].iter().all(|e| e.robot == Some(1) && e.drop_number.is_some()));
    // the shelf canister of D has to be loaded
    assert_eq!(plan.transfers[&4].src_robot, None);
    assert_eq!(plan.transfers[&4].dest_robot, Some(1));
}

#[test]
fn frozen_plan_keeps_loaded_canisters_in_place() {
    let input = two_robot_input();
    let cfg = DistributionConfig { freeze_canister: true, assert_output: true, ..Default::default() };
    let plan = DistributionEngine::new(cfg).plan(&input).expect("plan succeeds");

    assert_eq!(plan.quadrants[&2].quadrants[&1].drugs, BTreeSet::from([d("A"), d("B")]));
    assert!(plan.quadrants[&1].quadrants[&2].drugs.contains("C"));
    assert!(!plan.transfers.contains_key(&1));
    assert!(!plan.transfers.contains_key(&2));
    assert!(!plan.transfers.contains_key(&3));
    assert_eq!(plan.transfers.len(), 1);
    assert_eq!(plan.schedules[&1].physical(1), Some(1));
}

#[test]
fn scarce_canister_falls_back_to_manual() {
    // X has one canister but both robots need it.
    let m = IncidenceMatrix::from_entries(vec![
        (1, d("A"), 1),
        (1, d("X"), 1),
        (2, d("B"), 1),
        (2, d("X"), 1),
    ])
    .expect("valid matrix");
    let canisters = one_each(&[d("A"), d("B"), d("X")]);
    let input = DistributionInput::new(m, canisters, vec![1, 2]);
    let cfg = DistributionConfig { assert_output: true, ..Default::default() };
    let plan = DistributionEngine::new(cfg).plan(&input).expect("plan succeeds");

    let x_entries: Vec<_> = plan.fulfillment.values().flatten().filter(|e| e.drug == "X").collect();
    assert_eq!(x_entries.len(), 2);
    assert_eq!(x_entries.iter().filter(|e| e.canister.is_some()).count(), 1);
}

#[test]
fn multi_canister_drug_is_shared_between_robots() {
    let input = shared_drug_input();
    let cfg = DistributionConfig { assert_output: true, ..Default::default() };
    let plan = DistributionEngine::new(cfg).plan(&input).expect("plan succeeds");

    assert!(plan.robots.values().all(|c| c.drugs.contains("X")));
    let x_robots: BTreeSet<u32> = [50, 51].iter().map(|c| plan.canisters[c].0).collect();
    assert_eq!(x_robots, BTreeSet::from([1, 2]));
    assert_eq!(plan.manual_entries().count(), 0);
    assert!(placements_have_canisters(&plan, &input));
}

#[test]
fn frozen_surplus_placement_is_released_before_scheduling() {
    // Robot 1 holds both X canisters, robot 2 needs one of them.
    let input = DistributionInput {
        canister_locations: BTreeMap::from([
            (1, CanisterLocation::in_robot(1, 1)),
            (50, CanisterLocation::in_robot(1, 1)),
            (51, CanisterLocation::in_robot(1, 2)),
        ]),
        ..shared_drug_input()
    };
    let cfg = DistributionConfig { freeze_canister: true, assert_output: true, ..Default::default() };
    let plan = DistributionEngine::new(cfg).plan(&input).expect("plan succeeds");

    assert_eq!(plan.robots[&1].drugs, BTreeSet::from([d("A"), d("B"), d("X")]));
    assert_eq!(plan.quadrants[&1].placements("X"), vec![1]);
    assert_eq!(plan.canisters[&50], (1, 1));
    assert_eq!(plan.transfers[&51].src_robot, Some(1));
    assert_eq!(plan.transfers[&51].dest_robot, Some(2));
    assert_eq!(plan.manual_entries().count(), 0);
    assert!(placements_have_canisters(&plan, &input));
}

#[test]
fn verify_uses_each_robots_capacity() {
    let input = DistributionInput {
        robot_capacity: BTreeMap::from([(1, 4), (2, 4)]),
        ..two_robot_input()
    };
    let cfg = DistributionConfig::default();
    let mut plan = DistributionEngine::new(cfg.clone()).plan(&input).expect("plan succeeds");
    verify_plan(&plan, &input, &cfg).expect("plan valid");

    // One extra drug stays far below the configured 20 but over the robot's 1.
    let crowded = plan
        .quadrants
        .get_mut(&1)
        .and_then(|a| a.quadrants.values_mut().find(|q| q.used_slots() == 1))
        .expect("robot 1 uses a quadrant");
    crowded.drugs.insert(d("Z"));
    assert!(verify_plan(&plan, &input, &cfg).is_err());
}
