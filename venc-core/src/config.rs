//! Picture decision configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Upper bound on the configurable temporal layer depth.
///
/// Per-list reference capacity is `1 << max_temporal_layers`, two lists per
/// picture, so this bound also fixes the worst-case reference list storage.
pub const MAX_TEMPORAL_LAYERS: u8 = 6;

/// Selection order when two reference candidates sit at equal display
/// distance from the consuming picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TieBreak {
    /// Prefer the past-side (list0) candidate. Also biases the dyadic
    /// midpoint toward the earlier picture in even-width intervals.
    #[default]
    TowardList0,
    /// Prefer the future-side (list1) candidate.
    TowardList1,
}

/// Configuration for the picture decision stage.
///
/// Validated once at startup; invalid combinations are fatal before any
/// picture is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Number of new pictures per mini-GOP. The far boundary of one group
    /// is the anchor of the next.
    pub mini_gop_size: u32,
    /// Temporal layer depth of the hierarchical prediction structure,
    /// `1..=MAX_TEMPORAL_LAYERS`.
    pub max_temporal_layers: u8,
    /// Slot count of the reference dependency queue. `0` derives the
    /// minimum capacity from the GOP structure.
    pub reference_window_capacity: usize,
    /// Equal-distance selection policy.
    pub tie_break: TieBreak,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            mini_gop_size: 8,
            max_temporal_layers: 4,
            reference_window_capacity: 0,
            tie_break: TieBreak::default(),
        }
    }
}

impl DecisionConfig {
    /// Maximum entries per reference list for a picture at `temporal_layer`.
    ///
    /// Lower layers are referenced more broadly and keep larger lists; the
    /// deepest layer still gets at least one entry per side.
    pub fn ref_list_capacity(&self, temporal_layer: u8) -> usize {
        let cap = (1usize << self.max_temporal_layers) >> temporal_layer;
        cap.max(1)
    }

    /// Minimum reference window capacity for this GOP structure: every
    /// reference-eligible picture of the group, the carried anchor, and one
    /// slot of probe slack.
    pub fn required_window_capacity(&self) -> usize {
        self.mini_gop_size as usize + 2
    }

    /// Effective queue capacity after applying the auto-derive rule.
    pub fn window_capacity(&self) -> usize {
        if self.reference_window_capacity == 0 {
            self.required_window_capacity()
        } else {
            self.reference_window_capacity
        }
    }

    /// Validate the configuration. Must be called before any picture is
    /// submitted; every violation here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.mini_gop_size == 0 {
            return Err(Error::config("mini_gop_size must be at least 1"));
        }
        if self.max_temporal_layers == 0 || self.max_temporal_layers > MAX_TEMPORAL_LAYERS {
            return Err(Error::config(format!(
                "max_temporal_layers must be in 1..={}, got {}",
                MAX_TEMPORAL_LAYERS, self.max_temporal_layers
            )));
        }
        // The dyadic pattern for a group of N needs N <= 2^(layers-1) so
        // that every bisection level lands on a distinct temporal layer.
        let max_group = 1usize << (self.max_temporal_layers - 1);
        if self.mini_gop_size as usize > max_group {
            return Err(Error::config(format!(
                "mini_gop_size {} does not fit {} temporal layers (max {})",
                self.mini_gop_size, self.max_temporal_layers, max_group
            )));
        }
        if self.reference_window_capacity != 0
            && self.reference_window_capacity < self.required_window_capacity()
        {
            return Err(Error::config(format!(
                "reference_window_capacity {} below the {} required by \
                 mini_gop_size {}",
                self.reference_window_capacity,
                self.required_window_capacity(),
                self.mini_gop_size
            )));
        }
        Ok(())
    }
}
