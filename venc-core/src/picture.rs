//! Picture descriptors and the decision-state machine.
//!
//! A [`PictureDescriptor`] exists per input frame and is owned by the
//! decision subsystem until handed downstream as a read-mostly copy. All
//! lifecycle transitions go through [`DecisionState::advance`], which
//! rejects anything not in the transition table.

use crate::error::{Error, Result};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Per-picture flags carried in the submission metadata.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PictureFlags: u32 {
        /// Picture starts a new key interval.
        const KEYFRAME = 0x01;
        /// Picture is eligible to be referenced by later pictures.
        const REFERENCE = 0x02;
        /// Picture is the last of the stream.
        const END_OF_STREAM = 0x04;
    }
}

/// Role of a picture inside the hierarchical prediction structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PictureRole {
    /// Sequence anchor; binds no references.
    Key,
    /// Layer-0 anchor of a mini-GOP (the group's far boundary).
    Base,
    /// Interior picture referenced by deeper layers.
    ReferenceB,
    /// Deepest-layer leaf; never referenced, gets no queue entry.
    NonReferenceB,
}

impl PictureRole {
    /// Whether pictures of this role receive a reference queue entry.
    pub fn is_reference(&self) -> bool {
        !matches!(self, PictureRole::NonReferenceB)
    }
}

/// Decision lifecycle of a picture.
///
/// The progression is linear; every transition outside
/// `Pending -> ReorderComplete -> StructureAssigned -> ReferencesBound ->
/// Decided -> Released` is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionState {
    /// Ingested, waiting in the reorder buffer.
    Pending,
    /// Emitted as part of a drained mini-GOP.
    ReorderComplete,
    /// Coding order, temporal layer and role assigned.
    StructureAssigned,
    /// list0/list1 bound, dependency counts incremented.
    ReferencesBound,
    /// Dispatched downstream; awaiting consumption reports.
    Decided,
    /// All consumers reported and the picture's own entry drained.
    Released,
}

impl DecisionState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(self, next: DecisionState) -> bool {
        use DecisionState::*;
        matches!(
            (self, next),
            (Pending, ReorderComplete)
                | (ReorderComplete, StructureAssigned)
                | (StructureAssigned, ReferencesBound)
                | (ReferencesBound, Decided)
                | (Decided, Released)
        )
    }

    /// Advance to `next`, rejecting transitions not in the table.
    pub fn advance(&mut self, next: DecisionState) -> Result<()> {
        if self.can_advance_to(next) {
            *self = next;
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecisionState::Pending => "Pending",
            DecisionState::ReorderComplete => "ReorderComplete",
            DecisionState::StructureAssigned => "StructureAssigned",
            DecisionState::ReferencesBound => "ReferencesBound",
            DecisionState::Decided => "Decided",
            DecisionState::Released => "Released",
        };
        f.write_str(name)
    }
}

/// Opaque ownership token for a pixel buffer held by the pool.
///
/// The decision core never dereferences pixels; the handle only tracks
/// ownership until reclamation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixelBufferHandle(u64);

impl PixelBufferHandle {
    pub(crate) fn new(index: u64) -> Self {
        Self(index)
    }

    /// Raw arena index of the buffer.
    pub fn index(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PixelBufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// Stream metadata carried with each submitted picture.
///
/// The GOP overrides apply at stream start; changes after the first drained
/// group are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PictureMetadata {
    /// Externally configured mini-GOP size, if the container carries one.
    pub mini_gop_size: Option<u32>,
    /// Externally configured temporal layer depth.
    pub max_temporal_layers: Option<u8>,
    /// Per-picture flags.
    pub flags: PictureFlags,
}

/// One picture moving through the decision pipeline.
#[derive(Debug, Clone)]
pub struct PictureDescriptor {
    /// Monotonically increasing index assigned at ingestion.
    pub display_order: u64,
    /// Processing sequence index; assigned by the structure builder.
    pub coding_order: Option<u64>,
    /// Depth in the hierarchical prediction tree, 0 = anchor layer.
    pub temporal_layer: u8,
    /// Prediction-structure role.
    pub role: PictureRole,
    /// Pixel buffer ownership token.
    pub buffer: PixelBufferHandle,
    /// Stream metadata from submission.
    pub metadata: PictureMetadata,
    state: DecisionState,
}

impl PictureDescriptor {
    /// Create a freshly ingested picture in `Pending` state.
    pub fn new(display_order: u64, buffer: PixelBufferHandle, metadata: PictureMetadata) -> Self {
        Self {
            display_order,
            coding_order: None,
            temporal_layer: 0,
            role: PictureRole::NonReferenceB,
            buffer,
            metadata,
            state: DecisionState::Pending,
        }
    }

    /// Current decision state.
    pub fn state(&self) -> DecisionState {
        self.state
    }

    /// Advance the lifecycle, rejecting off-table transitions.
    pub fn advance_to(&mut self, next: DecisionState) -> Result<()> {
        self.state.advance(next)
    }

    /// Coding order, or an error if the structure builder has not run yet.
    pub fn coding_order(&self) -> Result<u64> {
        self.coding_order.ok_or_else(|| {
            Error::consistency(format!(
                "picture {} has no coding order before structure assignment",
                self.display_order
            ))
        })
    }
}
