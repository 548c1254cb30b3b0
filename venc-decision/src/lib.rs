//! Picture decision and reference dependency subsystem.
//!
//! Receives pictures in display order, reorders them into a hierarchical
//! mini-GOP prediction structure, binds each picture's list0/list1 from a
//! rolling window of previously decided pictures, and releases every
//! reference exactly when no pending picture still needs it.
//!
//! The components, in pipeline order:
//! - [`ReorderBuffer`] holds ingested pictures until a full mini-GOP (or an
//!   end-of-stream flush) is available.
//! - [`StructureBuilder`] assigns coding order, temporal layer and role
//!   following a deterministic dyadic pattern.
//! - [`ReferenceQueue`] tracks reference lifetime through dependency counts
//!   in a fixed-capacity open-addressed slot table.
//! - [`DecisionStage`] drives the per-picture state machine and is the only
//!   public entry point for upstream submission and downstream completion
//!   reports.

mod error;
mod refqueue;
mod reorder;
mod stage;
mod structure;

pub use error::{DecisionError, Result};
pub use refqueue::{
    ConsumerId, ReferenceEntry, ReferenceQueue, ReleasedEntry, SharedReferenceQueue, SlotIndex,
};
pub use reorder::ReorderBuffer;
pub use stage::{DecidedPicture, DecisionStage};
pub use structure::{MiniGop, RefCandidate, StructureBuilder};
