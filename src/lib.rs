//! # packsplit-core
//!
//! Splits a pharmacy packaging batch across dispensing robots, places each
//! robot's canisters into its quadrants, and schedules the drops that fill
//! every pack slot.
//!
//! ---
//!
//! ## The idea
//!
//! A batch is a pack × drug matrix. Two robots that both fill packs needing
//! the same drug both need a canister of it, and canisters are scarce. So the
//! split looks for groups of drugs whose packs barely overlap:
//!
//! **Cluster tree**: drugs sharing more than `k` packs merge at independence
//! degree `k`. Raising `k` splits weakly linked clusters apart, level by
//! level.
//!
//! **Tree trace**: the tree is walked one level at a time. Each frontier is
//! dealt onto two sides of a scale sized to the target share, scored by a
//! loss (shared packs, or largest side within a shared-pack bucket), and the
//! best frontier seeds the next level.
//!
//! **Post-processing**: manual and multi-canister drugs, which never drive the
//! tree, are folded back in and the sides are brought to their exact sizes.
//!
//! The same machinery, weighted by drugs and keyed by slot combinations,
//! places canisters into quadrants.
//!
//! ## The pipeline
//!
//! ```text
//! IncidenceMatrix ─→ MultiRobotOrchestrator ─→ match_robots
//!                      │  ClusterTreeBuilder        │
//!                      │  TreeTrace                 ↓
//!                      │  PostProcessor      QuadrantDistributionEngine
//!                                                   ↓
//!                    CanisterAllocator ←──── DropScheduler
//!                            ↓
//!                    DistributionPlan
//! ```
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`matrix`] | [`IncidenceMatrix`] | Pack ↔ drug lookups, owned sub-matrices |
//! | [`slots`] | [`PackSlots`], [`Combination`] | Per-slot drug sets and combinations |
//! | [`tree`] | [`ClusterTreeBuilder`], [`ClusterTree`] | Independence-degree cluster tree |
//! | [`trace`] | [`TreeTrace`], [`Loss`], [`Targets`] | Level-by-level search for a two-way split |
//! | [`postprocess`] | [`PostProcessor`] | Remainder packs, exact balance, drug sets |
//! | [`robots`] | [`MultiRobotOrchestrator`], [`match_robots`] | Recursive 1-vs-rest robot split |
//! | [`quadrant`] | [`QuadrantDistributionEngine`] | Capacity-bound canister placement |
//! | [`drops`] | [`DropScheduler`], [`PackGrid`] | Quadrant mapping and drop grouping |
//! | [`canister`] | [`CanisterAllocator`] | Canister allocation and transfers |
//! | [`engine`] | [`DistributionEngine`] | End-to-end plan |
//! | [`verify`] | | Output invariant checks |
//!
//! ## Features
//!
//! Enable `serde` for serialisation of configuration and plan types.
//!
//! ## License
//!
//! Business Source License 1.1.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod canister;
pub mod cluster;
pub mod config;
pub mod drops;
pub mod engine;
pub mod error;
pub mod matrix;
pub mod postprocess;
pub mod quadrant;
pub mod robots;
pub mod slots;
pub mod trace;
pub mod tree;
pub mod verify;

pub use canister::{
    CanisterAllocator, CanisterId, CanisterLocation, CanisterTransfer, DrugCanisterInfo, RobotId,
};
pub use cluster::Cluster;
pub use config::{DistributionConfig, SplitFunction, MAX_QUADRANTS};
pub use drops::{DropSchedule, DropScheduler, DropStep, PackDrops, PackGrid, Pattern};
pub use engine::{DistributionEngine, DistributionInput, DistributionPlan, FillEntry};
pub use error::{DistributionError, InputError, Result};
pub use matrix::{DrugId, IncidenceMatrix, PackId};
pub use postprocess::{PostProcessor, SplitResult, SplitStrategy};
pub use quadrant::{Quadrant, QuadrantAssignment, QuadrantDistributionEngine, QuadrantId};
pub use robots::{
    match_robots, AssignedCluster, DrugClasses, MultiRobotOrchestrator, MultiSplitOutcome,
    RobotAssignment,
};
pub use slots::{Combination, PackSlots, SlotId};
pub use trace::{balance_the_scale, Loss, Partition, Targets, TraceOutcome, TreeTrace, Weighting};
pub use tree::{ClusterTree, ClusterTreeBuilder, Group, NodeId};
