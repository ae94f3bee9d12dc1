//! Lighttrace - interval reconstruction and daily aggregation for sparse
//! device telemetry.
//!
//! Devices report discrete instruction events, periodic connectivity
//! heartbeats and gaze-zone detections - never intervals. This library
//! reconstructs continuous, gap-aware state timelines from those lossy
//! point streams and performs interval algebra (merge, intersect, clip) on
//! them for per-day aggregation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Lighttrace                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  event rows ──▶ ┌───────────────┐    ┌──────────────────┐    │
//! │  (storage)      │ StateMachine  │    │  Connectivity    │    │
//! │                 │ (replay FSM)  │    │  (gap detector)  │    │
//! │                 └───────┬───────┘    └────────┬─────────┘    │
//! │                         ▼                     ▼              │
//! │                 ┌──────────────────────────────────┐         │
//! │                 │         IntervalAlgebra          │         │
//! │                 │  (run-length extract, intersect) │         │
//! │                 └────────────────┬─────────────────┘         │
//! │                                  ▼                           │
//! │                 ┌──────────────────────────────────┐         │
//! │                 │          DailyAggregator         │──▶ per- │
//! │                 │  (per-day durations, exclusion)  │    day  │
//! │                 └──────────────────────────────────┘    rows │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All components are pure, synchronous transformations over immutable
//! event data. Per-device computations are independent and safe to run
//! concurrently.
//!
//! # Example
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use lighttrace::engine::{aggregate, AggregationOptions};
//! use lighttrace::event::DeviceEvents;
//!
//! let events = DeviceEvents::new("PTL_1");
//! let since = NaiveDate::from_ymd_opt(2020, 3, 10).unwrap();
//! let until = NaiveDate::from_ymd_opt(2020, 3, 16).unwrap();
//! let records = aggregate(&events, since, until, &AggregationOptions::default())
//!     .expect("valid window");
//! assert_eq!(records.len(), 7); // one row per calendar day, zero-filled
//! ```

pub mod config;
pub mod engine;
pub mod event;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError, ExclusionConfig};
pub use engine::{
    aggregate, aggregate_batch, connection, extract_intervals, intersect, reconstruct, replay,
    state_series, transition, AggregationOptions, ConnectivityInterval, DailyRecord, DeviceState,
    EngineError, Interval, Scene, Span, StateSeries,
};
pub use event::{
    classify, partition_rows, DeviceEvents, GazeEvent, GazeZone, InstructionEvent, RawKind, RawRow,
    SwitchStatus, Target, TelemetryEvent,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
