//! Optional telemetry hooks for the decision stage.
//!
//! This module provides macros for recording stage intervals and queue
//! statistics when the `telemetry` feature is enabled. When disabled, all
//! operations compile to no-ops with zero behavioral effect.
//!
//! # Feature Flag
//!
//! Enable collection by adding to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! venc-core = { version = "0.1", features = ["telemetry"] }
//! ```
//!
//! # Metric Names
//!
//! Recommended naming conventions:
//! - `decision.pictures.ingested` - pictures submitted
//! - `decision.pictures.decided` - pictures dispatched downstream
//! - `decision.pictures.released` - pictures fully reclaimed
//! - `decision.refqueue.occupancy` - live reference slots
//! - `decision.stage.duration_ns` - per-picture decision interval

/// Record a counter metric (increments by the given value).
///
/// When the `telemetry` feature is disabled, this is a no-op.
#[macro_export]
#[cfg(feature = "telemetry")]
macro_rules! record_counter {
    ($name:expr, $value:expr) => {
        ::metrics::counter!($name).increment($value)
    };
}

#[macro_export]
#[cfg(not(feature = "telemetry"))]
macro_rules! record_counter {
    ($name:expr, $value:expr) => {
        let _ = ($name, $value);
    };
}

/// Record a gauge metric (absolute value).
///
/// When the `telemetry` feature is disabled, this is a no-op.
#[macro_export]
#[cfg(feature = "telemetry")]
macro_rules! record_gauge {
    ($name:expr, $value:expr) => {
        ::metrics::gauge!($name).set($value as f64)
    };
}

#[macro_export]
#[cfg(not(feature = "telemetry"))]
macro_rules! record_gauge {
    ($name:expr, $value:expr) => {
        let _ = ($name, $value);
    };
}

/// Record a stage interval for one picture as a histogram sample.
///
/// `$start`/`$end` are `std::time::Instant` values taken around the stage.
/// When the `telemetry` feature is disabled, this is a no-op.
#[macro_export]
#[cfg(feature = "telemetry")]
macro_rules! record_interval {
    ($name:expr, $picture:expr, $start:expr, $end:expr) => {{
        let _ = $picture;
        ::metrics::histogram!($name)
            .record($end.duration_since($start).as_nanos() as f64)
    }};
}

#[macro_export]
#[cfg(not(feature = "telemetry"))]
macro_rules! record_interval {
    ($name:expr, $picture:expr, $start:expr, $end:expr) => {
        let _ = ($name, $picture, &$start, &$end);
    };
}
