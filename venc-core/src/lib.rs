//! # Venc Core
//!
//! Core types shared across the venc encoder pipeline.
//!
//! This crate provides the foundation the pipeline stages build on:
//! - Error handling types
//! - Encoder configuration and validation
//! - Picture descriptors and the decision-state machine
//! - Pixel buffer pool (the allocation/reclamation collaborator)
//! - Optional, compiled-out telemetry hooks

pub mod config;
pub mod error;
pub mod picture;
pub mod pool;
pub mod telemetry;

pub use config::{DecisionConfig, TieBreak, MAX_TEMPORAL_LAYERS};
pub use error::{Error, Result};
pub use picture::{
    DecisionState, PictureDescriptor, PictureFlags, PictureMetadata, PictureRole,
    PixelBufferHandle,
};
pub use pool::{PictureBufferPool, SharedPicturePool};
