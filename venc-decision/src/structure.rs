//! Hierarchical structure builder.
//!
//! Takes one mini-GOP of pictures in display order and assigns coding
//! order, temporal layer and prediction role following a dyadic bisection
//! pattern. The assignment is a pure function of (group size, layer depth,
//! tie-break policy), which is what makes the bitstream reproducible.
//!
//! Group shape: the preceding anchor (stream start, or the far boundary of
//! the previous group) is layer 0 and coded first; the group's far boundary
//! is layer 0 and coded second; each interior bisection midpoint is one
//! layer deeper. Deepest-layer leaves are never referenced.

use crate::error::Result;
use tracing::{debug, trace};
use venc_core::config::{DecisionConfig, TieBreak};
use venc_core::error::Error as CoreError;
use venc_core::picture::{DecisionState, PictureDescriptor, PictureRole};

/// A reference candidate: the structural identity of a previously decided
/// picture, without ownership of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefCandidate {
    pub coding_order: u64,
    pub display_order: u64,
    pub temporal_layer: u8,
}

/// A structure-assigned mini-GOP, pictures in coding order.
#[derive(Debug)]
pub struct MiniGop {
    /// Pictures in coding order, each in `StructureAssigned` state.
    pub pictures: Vec<PictureDescriptor>,
    /// Candidate reference set per picture, parallel to `pictures`.
    /// Candidates are the carried anchor plus every earlier-coded,
    /// reference-eligible group member at a numerically lower or equal
    /// temporal layer.
    pub candidates: Vec<Vec<RefCandidate>>,
}

/// Stateful builder; carries the anchor and coding-order counter across
/// groups.
#[derive(Debug)]
pub struct StructureBuilder {
    config: DecisionConfig,
    next_coding_order: u64,
    carried_anchor: Option<RefCandidate>,
    groups_assigned: u64,
}

impl StructureBuilder {
    /// Create a builder for a validated configuration.
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            next_coding_order: 0,
            carried_anchor: None,
            groups_assigned: 0,
        }
    }

    /// The anchor the next group will bind against, if any.
    pub fn carried_anchor(&self) -> Option<RefCandidate> {
        self.carried_anchor
    }

    /// Assign coding order, temporal layer and role to one group of
    /// pictures in display order, and compute each picture's candidate
    /// reference set.
    ///
    /// Deterministic given (group length, `max_temporal_layers`,
    /// `tie_break`); coding order is strictly increasing across calls.
    pub fn assign_structure(&mut self, group: Vec<PictureDescriptor>) -> Result<MiniGop> {
        if group.is_empty() {
            return Err(CoreError::consistency("assign_structure on empty group").into());
        }

        let len = group.len();
        let first_group = self.carried_anchor.is_none();
        let mut layers = vec![0u8; len];
        let mut roles = vec![PictureRole::ReferenceB; len];

        // Anchor positions are layer 0. On the first group the leading
        // picture is the sequence key; afterwards the anchor is carried
        // from the previous group's far boundary and is not a member.
        let interior = if first_group {
            roles[0] = PictureRole::Key;
            if len >= 2 {
                roles[len - 1] = PictureRole::Base;
                1..len - 1
            } else {
                1..1
            }
        } else {
            roles[len - 1] = PictureRole::Base;
            0..len - 1
        };

        // Dyadic bisection over the interior: each midpoint is one layer
        // deeper than its enclosing interval, clamped to the configured
        // depth (this is the truncation rule for non-power-of-two groups).
        let max_layer = self.config.max_temporal_layers - 1;
        bisect(
            &mut layers[interior.clone()],
            0,
            interior.len(),
            1,
            max_layer,
            self.config.tie_break,
        );

        // Deepest-layer leaves of this group are never referenced.
        if let Some(deepest) = layers[interior.clone()].iter().copied().max() {
            for i in interior.clone() {
                if layers[i] == deepest {
                    roles[i] = PictureRole::NonReferenceB;
                }
            }
        }

        // Coding order: ascending (temporal_layer, display_order). The
        // input is display-sorted, so a stable sort by layer suffices.
        let mut order: Vec<usize> = (0..len).collect();
        order.sort_by_key(|&i| layers[i]);

        let mut pictures = Vec::with_capacity(len);
        let mut candidates: Vec<Vec<RefCandidate>> = Vec::with_capacity(len);
        let mut assigned: Vec<RefCandidate> = Vec::with_capacity(len + 1);

        for &i in &order {
            let mut picture = group[i].clone();
            picture.temporal_layer = layers[i];
            picture.role = roles[i];
            picture.coding_order = Some(self.next_coding_order);
            picture.advance_to(DecisionState::StructureAssigned)?;
            self.next_coding_order += 1;

            let me = RefCandidate {
                coding_order: picture.coding_order.unwrap_or_default(),
                display_order: picture.display_order,
                temporal_layer: picture.temporal_layer,
            };

            let cands = if picture.role == PictureRole::Key {
                Vec::new()
            } else {
                let mut cands: Vec<RefCandidate> = Vec::new();
                if let Some(anchor) = self.carried_anchor {
                    cands.push(anchor);
                }
                cands.extend(
                    assigned
                        .iter()
                        .filter(|c| c.temporal_layer <= picture.temporal_layer)
                        .copied(),
                );
                cands
            };

            trace!(
                display_order = picture.display_order,
                coding_order = me.coding_order,
                layer = picture.temporal_layer,
                role = ?picture.role,
                candidates = cands.len(),
                "structure assigned"
            );

            if picture.role.is_reference() {
                assigned.push(me);
            }
            candidates.push(cands);
            pictures.push(picture);
        }

        // The far boundary anchors the next group. A single-picture first
        // group carries its key forward.
        let far_display = group[len - 1].display_order;
        let far = pictures
            .iter()
            .find(|p| p.display_order == far_display)
            .map(|p| RefCandidate {
                coding_order: p.coding_order.unwrap_or_default(),
                display_order: p.display_order,
                temporal_layer: p.temporal_layer,
            });
        self.carried_anchor = far;
        self.groups_assigned += 1;

        debug!(
            group = self.groups_assigned,
            pictures = len,
            first_group,
            "mini-GOP structure assigned"
        );

        Ok(MiniGop {
            pictures,
            candidates,
        })
    }

    /// Select the final list0/list1 for one picture from its candidate set.
    ///
    /// list0 holds past-side candidates nearest first, list1 future-side
    /// nearest first, each truncated to the layer-dependent capacity. A
    /// missing side falls back to mirroring the nearest candidate of the
    /// other side; this is a defined substitution, not an error.
    pub fn select_references(
        &self,
        picture: &PictureDescriptor,
        candidates: &[RefCandidate],
    ) -> (Vec<RefCandidate>, Vec<RefCandidate>) {
        if picture.role == PictureRole::Key {
            return (Vec::new(), Vec::new());
        }

        let disp = picture.display_order;
        let mut list0: Vec<RefCandidate> = candidates
            .iter()
            .filter(|c| c.display_order < disp)
            .copied()
            .collect();
        let mut list1: Vec<RefCandidate> = candidates
            .iter()
            .filter(|c| c.display_order > disp)
            .copied()
            .collect();

        // Nearest first on both sides.
        list0.sort_by_key(|c| disp - c.display_order);
        list1.sort_by_key(|c| c.display_order - disp);

        let capacity = self.config.ref_list_capacity(picture.temporal_layer);
        list0.truncate(capacity);
        list1.truncate(capacity);

        // Stream-start and boundary fallback: substitute the nearest
        // available candidate from the populated side.
        if list0.is_empty() && !list1.is_empty() {
            trace!(display_order = disp, "list0 fallback to future side");
            list0.push(list1[0]);
        } else if list1.is_empty() && !list0.is_empty() {
            trace!(display_order = disp, "list1 fallback to past side");
            list1.push(list0[0]);
        }

        (list0, list1)
    }
}

/// Assign layers to `slice[lo..hi)` by recursive bisection at `depth`.
fn bisect(slice: &mut [u8], lo: usize, hi: usize, depth: u8, max_layer: u8, tie_break: TieBreak) {
    if lo >= hi {
        return;
    }
    let mid = match tie_break {
        TieBreak::TowardList0 => (lo + hi - 1) / 2,
        TieBreak::TowardList1 => (lo + hi) / 2,
    };
    slice[mid] = depth.min(max_layer);
    bisect(slice, lo, mid, depth + 1, max_layer, tie_break);
    bisect(slice, mid + 1, hi, depth + 1, max_layer, tie_break);
}
