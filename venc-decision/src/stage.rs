//! Picture decision stage.
//!
//! Drives each picture through the linear decision lifecycle: reorder,
//! structure assignment, reference binding, dispatch, release. The stage is
//! the only writer of the reorder buffer and structure builder; the
//! reference queue and buffer pool are shared with downstream
//! completion-report callers. The queue lock and the reorder buffer are
//! never engaged at the same time.

use crate::error::{DecisionError, Result};
use crate::refqueue::{ReferenceEntry, ReleasedEntry, SharedReferenceQueue};
use crate::reorder::ReorderBuffer;
use crate::structure::StructureBuilder;
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};
use venc_core::config::DecisionConfig;
use venc_core::error::Error as CoreError;
use venc_core::picture::{
    DecisionState, PictureDescriptor, PictureFlags, PictureMetadata, PixelBufferHandle,
};
use venc_core::pool::SharedPicturePool;
use venc_core::{record_counter, record_gauge, record_interval};

/// A picture dispatched downstream, with its resolved reference lists.
///
/// The lists carry reference coding orders; downstream stages must call
/// [`DecisionStage::report_consumed`] exactly once per distinct reference.
#[derive(Debug)]
pub struct DecidedPicture {
    pub descriptor: PictureDescriptor,
    /// Past-side references, nearest first.
    pub list0: Vec<u64>,
    /// Future-side references, nearest first.
    pub list1: Vec<u64>,
}

impl DecidedPicture {
    /// Distinct references this picture holds dependencies on.
    pub fn bound_references(&self) -> Vec<u64> {
        let mut refs: Vec<u64> = self.list0.iter().chain(self.list1.iter()).copied().collect();
        refs.sort_unstable();
        refs.dedup();
        refs
    }
}

/// Stage-side record of a decided picture awaiting release.
#[derive(Debug)]
struct InFlightPicture {
    descriptor: PictureDescriptor,
    /// Consumption reports not yet received from downstream.
    outstanding: usize,
    /// All reports arrived; the picture's own processing is complete.
    processing_done: bool,
    /// The pixel buffer has been returned to the pool.
    buffer_reclaimed: bool,
}

/// The picture decision stage.
#[derive(Debug)]
pub struct DecisionStage {
    config: DecisionConfig,
    reorder: ReorderBuffer,
    builder: StructureBuilder,
    queue: SharedReferenceQueue,
    pool: SharedPicturePool,
    /// Decided pictures keyed by coding order, until released.
    in_flight: HashMap<u64, InFlightPicture>,
    /// Allocated entries the structure builder has not yet sealed.
    unsealed: Vec<u64>,
    pictures_ingested: u64,
    pictures_decided: u64,
    pictures_released: u64,
    finished: bool,
}

impl DecisionStage {
    /// Create a stage for a validated configuration.
    ///
    /// Configuration errors are fatal and reported here, before any
    /// picture is processed.
    pub fn new(config: DecisionConfig, pool: SharedPicturePool) -> Result<Self> {
        config.validate()?;
        let queue = SharedReferenceQueue::with_capacity(config.window_capacity());
        Ok(Self {
            reorder: ReorderBuffer::new(config.mini_gop_size),
            builder: StructureBuilder::new(config.clone()),
            queue,
            pool,
            in_flight: HashMap::new(),
            unsealed: Vec::new(),
            pictures_ingested: 0,
            pictures_decided: 0,
            pictures_released: 0,
            finished: false,
            config,
        })
    }

    /// Handle to the shared reference queue, for downstream callers that
    /// inspect dependency counts.
    pub fn queue(&self) -> SharedReferenceQueue {
        self.queue.clone()
    }

    /// Effective configuration after stream metadata overrides.
    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Submit one picture in display order.
    ///
    /// Returns every picture decided as a consequence of this submission,
    /// in coding order. The first picture's metadata may override the GOP
    /// shape; later overrides are ignored.
    pub fn submit_picture(
        &mut self,
        display_order: u64,
        buffer: PixelBufferHandle,
        metadata: PictureMetadata,
    ) -> Result<Vec<DecidedPicture>> {
        if self.finished {
            return Err(CoreError::EndOfStream.into());
        }
        if self.pictures_ingested == 0 {
            self.apply_stream_overrides(&metadata)?;
        } else if metadata.mini_gop_size.is_some() || metadata.max_temporal_layers.is_some() {
            debug!(display_order, "mid-stream GOP override ignored");
        }

        let picture = PictureDescriptor::new(display_order, buffer, metadata);
        self.reorder.ingest(picture)?;
        self.pictures_ingested += 1;
        record_counter!("decision.pictures.ingested", 1u64);

        let mut outputs = Vec::new();
        while let Some(group) = self.reorder.drain_ready_group()? {
            outputs.extend(self.decide_group(group)?);
        }
        if metadata.flags.contains(PictureFlags::END_OF_STREAM) {
            outputs.extend(self.finish()?);
        }
        Ok(outputs)
    }

    /// Downstream completion signal: `consumer` has finished reading
    /// `reference`. Exactly once per (reference, consumer) edge; duplicates
    /// are rejected without touching other consumers' dependencies.
    pub fn report_consumed(&mut self, reference: u64, consumer: u64) -> Result<()> {
        let slot = self
            .queue
            .lookup(reference)
            .ok_or(DecisionError::UnknownSlot {
                coding_order: reference,
            })?;
        if let Some(released) = self.queue.release(slot, consumer)? {
            self.handle_entry_released(released)?;
        }

        let Some(flight) = self.in_flight.get_mut(&consumer) else {
            return Err(CoreError::consistency(format!(
                "report from consumer {consumer} which is not in flight"
            ))
            .into());
        };
        if flight.outstanding == 0 {
            return Err(CoreError::consistency(format!(
                "consumer {consumer} reported more references than it was given"
            ))
            .into());
        }
        flight.outstanding -= 1;
        trace!(
            consumer,
            reference,
            outstanding = flight.outstanding,
            "consumption reported"
        );
        if flight.outstanding == 0 {
            flight.processing_done = true;
            if !flight.descriptor.role.is_reference() {
                // Non-reference pictures own their buffer directly; it is
                // reclaimed as soon as their processing completes.
                self.pool.release(flight.descriptor.buffer)?;
                flight.buffer_reclaimed = true;
            }
        }
        self.maybe_release(consumer)
    }

    /// End-of-stream drain: flush the partial group through the normal
    /// decision path and seal every remaining entry.
    ///
    /// The queue reaches all-slots-free once every in-flight picture's
    /// consumers report; use [`Self::assert_drained`] to verify.
    pub fn finish(&mut self) -> Result<Vec<DecidedPicture>> {
        if self.finished {
            return Ok(Vec::new());
        }
        let mut outputs = Vec::new();
        if let Some(group) = self.reorder.flush()? {
            outputs.extend(self.decide_group(group)?);
        }
        self.seal_superseded(None)?;
        self.finished = true;
        info!(
            ingested = self.pictures_ingested,
            decided = self.pictures_decided,
            released = self.pictures_released,
            "decision stage finished"
        );
        Ok(outputs)
    }

    /// Verify the cooperative drain completed: no live queue slots, no
    /// pictures awaiting release.
    pub fn assert_drained(&self) -> Result<()> {
        self.queue.assert_drained()?;
        if !self.in_flight.is_empty() {
            let mut live: Vec<u64> = self.in_flight.keys().copied().collect();
            live.sort_unstable();
            return Err(DecisionError::NotDrained { live_slots: live });
        }
        Ok(())
    }

    /// Abnormal shutdown check. Reports the first reference that still has
    /// outstanding dependencies instead of forcing its release; in-memory
    /// state is left intact for diagnosis.
    pub fn abort(&mut self) -> Result<()> {
        self.finished = true;
        for coding_order in self.queue.live_coding_orders() {
            if let Some(count) = self.queue.dependency_count(coding_order) {
                if count > 0 {
                    warn!(coding_order, count, "abort with outstanding dependencies");
                    return Err(DecisionError::OutstandingDependencies {
                        coding_order,
                        count,
                    });
                }
            }
        }
        Ok(())
    }

    /// Total pictures accepted.
    pub fn pictures_ingested(&self) -> u64 {
        self.pictures_ingested
    }

    /// Total pictures dispatched downstream.
    pub fn pictures_decided(&self) -> u64 {
        self.pictures_decided
    }

    /// Total pictures fully released.
    pub fn pictures_released(&self) -> u64 {
        self.pictures_released
    }

    /// Decide one structure-complete group: seal the window the new group
    /// supersedes, bind references, allocate entries, dispatch.
    fn decide_group(&mut self, group: Vec<PictureDescriptor>) -> Result<Vec<DecidedPicture>> {
        // The anchor this group binds against must outlive the window
        // seal; everything older can never be bound again because groups
        // are processed in strictly increasing coding order.
        let incoming_anchor = self.builder.carried_anchor().map(|a| a.coding_order);
        let gop = self.builder.assign_structure(group)?;
        self.seal_superseded(incoming_anchor)?;

        let mut outputs = Vec::with_capacity(gop.pictures.len());
        for (mut picture, candidates) in gop.pictures.into_iter().zip(gop.candidates) {
            let decide_start = std::time::Instant::now();
            let coding_order = picture.coding_order()?;
            let (list0, list1) = self.builder.select_references(&picture, &candidates);

            let mut edges: Vec<u64> = list0
                .iter()
                .chain(list1.iter())
                .map(|c| c.coding_order)
                .collect();
            edges.sort_unstable();
            edges.dedup();

            let mut bound = 0usize;
            for &reference in &edges {
                let Some(slot) = self.queue.lookup(reference) else {
                    // Candidates come from live window entries; a miss here
                    // means the fallback already substituted everything it
                    // could. Skip the edge rather than fail the picture.
                    warn!(coding_order, reference, "reference vanished before bind");
                    continue;
                };
                self.queue.bind(slot, coding_order)?;
                bound += 1;
            }
            picture.advance_to(DecisionState::ReferencesBound)?;

            if picture.role.is_reference() {
                let entry = ReferenceEntry::new(
                    coding_order,
                    picture.display_order,
                    picture.temporal_layer,
                    picture.buffer,
                );
                self.queue.allocate(entry)?;
                self.unsealed.push(coding_order);
            }
            picture.advance_to(DecisionState::Decided)?;
            self.pictures_decided += 1;
            record_counter!("decision.pictures.decided", 1u64);
            record_gauge!("decision.refqueue.occupancy", self.queue.occupancy());
            record_interval!(
                "decision.stage.duration_ns",
                coding_order,
                decide_start,
                std::time::Instant::now()
            );

            trace!(
                coding_order,
                display_order = picture.display_order,
                layer = picture.temporal_layer,
                role = ?picture.role,
                references = bound,
                "picture decided"
            );

            self.in_flight.insert(
                coding_order,
                InFlightPicture {
                    descriptor: picture.clone(),
                    outstanding: bound,
                    processing_done: bound == 0,
                    buffer_reclaimed: false,
                },
            );

            outputs.push(DecidedPicture {
                descriptor: picture,
                list0: list0.iter().map(|c| c.coding_order).collect(),
                list1: list1.iter().map(|c| c.coding_order).collect(),
            });
        }
        Ok(outputs)
    }

    /// Seal every unsealed entry except `keep` (the carried anchor).
    fn seal_superseded(&mut self, keep: Option<u64>) -> Result<()> {
        let to_seal: Vec<u64> = self
            .unsealed
            .iter()
            .copied()
            .filter(|&co| Some(co) != keep)
            .collect();
        self.unsealed.retain(|&co| Some(co) == keep);
        for coding_order in to_seal {
            let Some(slot) = self.queue.lookup(coding_order) else {
                return Err(CoreError::consistency(format!(
                    "unsealed entry {coding_order} vanished from the window"
                ))
                .into());
            };
            if let Some(released) = self.queue.seal(slot)? {
                self.handle_entry_released(released)?;
            }
        }
        Ok(())
    }

    /// A queue entry recycled: reclaim its buffer and let the owning
    /// picture progress toward release.
    fn handle_entry_released(&mut self, released: ReleasedEntry) -> Result<()> {
        self.pool.release(released.buffer)?;
        let Some(flight) = self.in_flight.get_mut(&released.coding_order) else {
            return Err(CoreError::consistency(format!(
                "recycled entry {} has no in-flight owner",
                released.coding_order
            ))
            .into());
        };
        flight.buffer_reclaimed = true;
        self.maybe_release(released.coding_order)
    }

    /// Complete `Decided -> Released` once the picture's own processing is
    /// done and its buffer is back in the pool.
    fn maybe_release(&mut self, coding_order: u64) -> Result<()> {
        let done = self
            .in_flight
            .get(&coding_order)
            .map(|f| f.processing_done && f.buffer_reclaimed)
            .unwrap_or(false);
        if !done {
            return Ok(());
        }
        if let Some(mut flight) = self.in_flight.remove(&coding_order) {
            flight.descriptor.advance_to(DecisionState::Released)?;
            self.pictures_released += 1;
            record_counter!("decision.pictures.released", 1u64);
            debug!(
                coding_order,
                display_order = flight.descriptor.display_order,
                "picture released"
            );
        }
        Ok(())
    }

    /// Honor stream-start GOP overrides from the container metadata.
    fn apply_stream_overrides(&mut self, metadata: &PictureMetadata) -> Result<()> {
        if metadata.mini_gop_size.is_none() && metadata.max_temporal_layers.is_none() {
            return Ok(());
        }
        let mut config = self.config.clone();
        if let Some(size) = metadata.mini_gop_size {
            config.mini_gop_size = size;
        }
        if let Some(layers) = metadata.max_temporal_layers {
            config.max_temporal_layers = layers;
        }
        config.validate()?;
        if config.window_capacity() > self.queue.capacity() {
            return Err(CoreError::config(format!(
                "stream override needs {} reference slots, window has {}",
                config.window_capacity(),
                self.queue.capacity()
            ))
            .into());
        }
        debug!(
            mini_gop_size = config.mini_gop_size,
            max_temporal_layers = config.max_temporal_layers,
            "stream metadata overrides applied"
        );
        self.reorder = ReorderBuffer::new(config.mini_gop_size);
        self.builder = StructureBuilder::new(config.clone());
        self.config = config;
        Ok(())
    }
}
