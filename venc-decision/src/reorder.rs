//! Input reorder buffer.
//!
//! Accepts pictures strictly in display order and releases them one
//! mini-GOP at a time once enough look-ahead has accumulated. Pictures
//! leave the buffer in display order within the group; coding order is the
//! structure builder's job.

use crate::error::Result;
use std::collections::VecDeque;
use tracing::{trace, warn};
use venc_core::error::Error as CoreError;
use venc_core::picture::{DecisionState, PictureDescriptor};

/// Bounded look-ahead buffer in front of the structure builder.
#[derive(Debug)]
pub struct ReorderBuffer {
    pictures: VecDeque<PictureDescriptor>,
    mini_gop_size: usize,
    last_display_order: Option<u64>,
    ingested: u64,
}

impl ReorderBuffer {
    /// Create a buffer releasing groups of `mini_gop_size` pictures.
    pub fn new(mini_gop_size: u32) -> Self {
        Self {
            pictures: VecDeque::with_capacity(mini_gop_size as usize + 1),
            mini_gop_size: mini_gop_size as usize,
            last_display_order: None,
            ingested: 0,
        }
    }

    /// Accept one picture.
    ///
    /// Display order must strictly exceed the previous ingestion; anything
    /// else is an upstream protocol violation and is rejected. The caller
    /// must not retry with the same picture.
    pub fn ingest(&mut self, picture: PictureDescriptor) -> Result<()> {
        if let Some(last) = self.last_display_order {
            if picture.display_order <= last {
                warn!(
                    display_order = picture.display_order,
                    last, "rejecting out-of-order picture"
                );
                return Err(CoreError::Sequencing {
                    expected: last,
                    got: picture.display_order,
                }
                .into());
            }
        }
        trace!(display_order = picture.display_order, "picture ingested");
        self.last_display_order = Some(picture.display_order);
        self.pictures.push_back(picture);
        self.ingested += 1;
        Ok(())
    }

    /// Release the next mini-GOP if a full one has accumulated.
    ///
    /// Non-blocking poll: returns `None` when more look-ahead is needed.
    /// Released pictures transition to `ReorderComplete` and are emitted in
    /// display order.
    pub fn drain_ready_group(&mut self) -> Result<Option<Vec<PictureDescriptor>>> {
        if self.pictures.len() < self.mini_gop_size {
            return Ok(None);
        }
        self.take_group(self.mini_gop_size).map(Some)
    }

    /// End-of-stream flush: release whatever remains as a partial group.
    pub fn flush(&mut self) -> Result<Option<Vec<PictureDescriptor>>> {
        if self.pictures.is_empty() {
            return Ok(None);
        }
        let len = self.pictures.len();
        trace!(pictures = len, "flushing partial group");
        self.take_group(len).map(Some)
    }

    fn take_group(&mut self, count: usize) -> Result<Vec<PictureDescriptor>> {
        let mut group: Vec<PictureDescriptor> = self.pictures.drain(..count).collect();
        for picture in &mut group {
            picture.advance_to(DecisionState::ReorderComplete)?;
        }
        Ok(group)
    }

    /// Pictures currently waiting for look-ahead.
    pub fn len(&self) -> usize {
        self.pictures.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.pictures.is_empty()
    }

    /// Total pictures accepted since creation.
    pub fn ingested(&self) -> u64 {
        self.ingested
    }
}
