//! The interval reconstruction and algebra engine.
//!
//! This module contains:
//! - Generic interval algebra (run-length extraction, sweep-line intersection)
//! - Connectivity reconstruction from heartbeat timestamps
//! - The device state machine replaying instruction events
//! - Daily aggregation of scene, settings and gaze durations

pub mod connectivity;
pub mod daily;
pub mod interval;
pub mod state;

// Re-export commonly used types
pub use connectivity::{connection, reconstruct, ConnectivityInterval};
pub use daily::{aggregate, aggregate_batch, AggregationOptions, DailyRecord};
pub use interval::{extract_intervals, intersect, is_intersecting, Interval, Span};
pub use state::{replay, state_series, transition, DeviceState, Scene, StateSeries};

use chrono::NaiveDate;
use thiserror::Error;

/// Errors that abort a single device/window computation.
///
/// Unclassifiable rows are fatal for their device: a swallowed unknown
/// transition would silently corrupt every duration computed downstream.
/// One failed device never aborts a batch over many devices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("unknown instruction: target `{target}`, value `{value}`")]
    UnknownInstruction { target: String, value: String },

    // The field is not named `source`: thiserror would treat it as the
    // error's cause and require it to implement `std::error::Error`.
    #[error("unknown combination of source `{name}` and target POWER")]
    UnknownSource { name: String },

    #[error("unknown gaze zone `{zone}`")]
    UnknownZone { zone: String },

    #[error("instruction row is missing field `{field}`")]
    MissingField { field: &'static str },

    #[error("invalid aggregation window: since {since} is after until {until}")]
    InvalidWindow { since: NaiveDate, until: NaiveDate },
}

/// Serde support for `chrono::Duration` as whole seconds.
///
/// Output tables carry durations as elapsed seconds, never formatted strings.
pub mod duration_serde {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.num_seconds().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = i64::deserialize(deserializer)?;
        Ok(Duration::seconds(secs))
    }
}
