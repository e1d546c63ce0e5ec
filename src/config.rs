/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Runtime configuration for the distribution pipeline.
//!
//! Every tunable lives in [`DistributionConfig`] and is passed by reference to
//! each component. There is no global state.

use crate::drops::PackGrid;
use crate::error::{DistributionError, Result};

/// Largest quadrant count: a robot has four quadrants, and drop
/// configuration ids are only defined for four.
pub const MAX_QUADRANTS: usize = 4;

/// Default common-pack bucket thresholds for split functions 1–10.
pub const DEFAULT_SPLIT_BUCKETS: [usize; 10] = [10, 20, 30, 40, 50, 60, 70, 80, 90, 100];

// ─── SplitFunction ───────────────────────────────────────────────────────────

/// Loss-function selector, as exchanged with callers by integer id.
///
/// Id `0` is the plain common-cover count. Ids `1..=buckets` select the
/// bucketed max-group-size loss with the threshold at `id - 1`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SplitFunction {
    /// Score = number of packs (or combinations) shared by both sides.
    #[default]
    CommonCover,
    /// Score = largest side, admitted only if the shared count fits the bucket.
    Bucket(u8),
}

impl SplitFunction {
    /// Map a caller-supplied id (`None` or `0` = common cover).
    pub fn from_id(id: Option<u8>) -> Self {
        match id {
            None | Some(0) => Self::CommonCover,
            Some(k) => Self::Bucket(k),
        }
    }

    /// Integer id of this selector.
    pub fn id(self) -> u8 {
        match self {
            Self::CommonCover => 0,
            Self::Bucket(k) => k,
        }
    }
}

// ─── DistributionConfig ──────────────────────────────────────────────────────

/// Configuration for [`crate::DistributionEngine`] and its components.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistributionConfig {
    /// Canister slots per robot quadrant. Default: 20.
    pub quad_canister_capacity: usize,

    /// Quadrants per robot, at most [`MAX_QUADRANTS`]. Default: 4.
    pub num_quadrants: usize,

    /// Deepest independence degree the cluster tree expands to. Default: 4.
    pub max_independence_factor: i32,

    /// Upper bound on trace iterations per tree. Default: 7.
    pub max_trace_levels: usize,

    /// Loss function used by the tree trace. Default: common cover.
    pub split_function: SplitFunction,

    /// Common-cover thresholds for bucketed split functions.
    pub split_buckets: Vec<usize>,

    /// Keep canisters where they sit and only place what is missing.
    pub freeze_canister: bool,

    /// Robot speed multiplier applied to drop time. Default: 1.0.
    pub system_speed: f64,

    /// Seconds one drop takes at speed 1.0. Default: 5.0.
    pub per_drop_seconds: f64,

    /// Run the output invariant checks after planning. Default: false.
    pub assert_output: bool,

    /// Blister grid used by the drop scheduler.
    pub grid: PackGrid,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            quad_canister_capacity: 20,
            num_quadrants: 4,
            max_independence_factor: 4,
            max_trace_levels: 7,
            split_function: SplitFunction::CommonCover,
            split_buckets: DEFAULT_SPLIT_BUCKETS.to_vec(),
            freeze_canister: false,
            system_speed: 1.0,
            per_drop_seconds: 5.0,
            assert_output: false,
            grid: PackGrid::default(),
        }
    }
}

impl DistributionConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.quad_canister_capacity == 0 {
            return Err(invalid("quad_canister_capacity must be > 0"));
        }
        if self.num_quadrants == 0 || self.num_quadrants > MAX_QUADRANTS {
            return Err(invalid("num_quadrants must be in 1..=4"));
        }
        if self.max_independence_factor < 0 {
            return Err(invalid("max_independence_factor must be >= 0"));
        }
        if !(self.system_speed > 0.0) {
            return Err(invalid("system_speed must be > 0"));
        }
        if self.per_drop_seconds < 0.0 {
            return Err(invalid("per_drop_seconds must be >= 0"));
        }
        self.bucket_limit(self.split_function)?;
        self.grid.validate()
    }

    /// Common-cover threshold for `split`, `None` for the plain loss.
    pub fn bucket_limit(&self, split: SplitFunction) -> Result<Option<usize>> {
        match split {
            SplitFunction::CommonCover => Ok(None),
            SplitFunction::Bucket(k) => self
                .split_buckets
                .get(usize::from(k).wrapping_sub(1))
                .copied()
                .map(Some)
                .ok_or_else(|| {
                    invalid(&format!(
                        "split function {k} outside 1..={}",
                        self.split_buckets.len()
                    ))
                }),
        }
    }

    /// Every selectable split function: common cover, then each bucket.
    pub fn all_split_functions(&self) -> Vec<SplitFunction> {
        let buckets = u8::try_from(self.split_buckets.len()).unwrap_or(u8::MAX);
        core::iter::once(SplitFunction::CommonCover)
            .chain((1..=buckets).map(SplitFunction::Bucket))
            .collect()
    }
}

fn invalid(msg: &str) -> DistributionError {
    DistributionError::InvalidConfig(msg.to_string())
}
