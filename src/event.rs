//! Typed telemetry event records and raw-row classification.
//!
//! The storage collaborator delivers rows as loosely-typed records keyed by
//! `(device, timestamp)`. Everything downstream works on the closed enums
//! defined here; a row that cannot be classified is a fatal error for its
//! device, never a silent no-op.

use crate::engine::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// On/off status carried by instruction rows and device state fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwitchStatus {
    On,
    Off,
}

impl SwitchStatus {
    /// Parse the raw `value` column of an instruction row.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ON" => Some(SwitchStatus::On),
            "OFF" => Some(SwitchStatus::Off),
            _ => None,
        }
    }
}

/// Classified instruction target.
///
/// Raw `POWER` rows are split by their source: presence-detection commands
/// become [`Target::PowerPresence`], manual commands [`Target::PowerManual`].
/// Device restart markers are folded in as [`Target::Restart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    PowerPresence,
    PowerManual,
    LightShower,
    TaskHori,
    TaskVert,
    Settings,
    Restart,
}

/// Gaze zone reported by the eye-tracking sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GazeZone {
    Horizontal,
    Vertical,
    Undefined,
    NoDetect,
}

impl GazeZone {
    pub fn parse(zone: &str) -> Option<Self> {
        match zone {
            "HORIZONTAL" => Some(GazeZone::Horizontal),
            "VERTICAL" => Some(GazeZone::Vertical),
            "UNDEFINED" => Some(GazeZone::Undefined),
            "NO_DETECT" => Some(GazeZone::NoDetect),
            _ => None,
        }
    }
}

/// A classified device control instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionEvent {
    pub timestamp: DateTime<Utc>,
    pub target: Target,
    pub status: SwitchStatus,
}

impl InstructionEvent {
    pub fn new(timestamp: DateTime<Utc>, target: Target, status: SwitchStatus) -> Self {
        Self {
            timestamp,
            target,
            status,
        }
    }

    /// Synthetic instruction injected for a device-restart marker.
    pub fn restart(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, Target::Restart, SwitchStatus::On)
    }
}

/// A gaze-zone detection sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GazeEvent {
    pub timestamp: DateTime<Utc>,
    pub zone: GazeZone,
}

/// Unified classified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryEvent {
    Instruction(InstructionEvent),
    Heartbeat(DateTime<Utc>),
    Gaze(GazeEvent),
}

impl TelemetryEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TelemetryEvent::Instruction(e) => e.timestamp,
            TelemetryEvent::Heartbeat(t) => *t,
            TelemetryEvent::Gaze(e) => e.timestamp,
        }
    }
}

/// Row kind as delivered by storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RawKind {
    Instruction,
    Restart,
    Heartbeat,
    Gaze,
}

/// A raw event row from the storage collaborator. Read-only input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRow {
    pub device: String,
    pub timestamp: DateTime<Utc>,
    pub kind: RawKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
}

/// Strip the routing prefix from a row source (`"None@Lullaby"` -> `"Lullaby"`).
fn format_source(source: &str) -> &str {
    match source.split_once('@') {
        Some((_, rest)) => rest,
        None => source,
    }
}

/// Classify a raw row into a typed event.
///
/// Fails with [`EngineError::UnknownInstruction`] / [`EngineError::UnknownSource`] /
/// [`EngineError::UnknownZone`] for rows the transition table cannot cover.
pub fn classify(row: &RawRow) -> Result<TelemetryEvent, EngineError> {
    match row.kind {
        RawKind::Heartbeat => Ok(TelemetryEvent::Heartbeat(row.timestamp)),
        RawKind::Restart => Ok(TelemetryEvent::Instruction(InstructionEvent::restart(
            row.timestamp,
        ))),
        RawKind::Gaze => {
            let zone = row
                .zone
                .as_deref()
                .ok_or(EngineError::MissingField { field: "zone" })?;
            let zone = GazeZone::parse(zone).ok_or_else(|| EngineError::UnknownZone {
                zone: zone.to_string(),
            })?;
            Ok(TelemetryEvent::Gaze(GazeEvent {
                timestamp: row.timestamp,
                zone,
            }))
        }
        RawKind::Instruction => {
            let target = row
                .target
                .as_deref()
                .ok_or(EngineError::MissingField { field: "target" })?;
            let value = row
                .value
                .as_deref()
                .ok_or(EngineError::MissingField { field: "value" })?;

            let target = match target {
                // Distinguish manual power commands from presence detection.
                "POWER" => {
                    let source = format_source(row.source.as_deref().unwrap_or(""));
                    match source {
                        "Lullaby" => Target::PowerPresence,
                        "DataDock" => Target::PowerManual,
                        _ => {
                            return Err(EngineError::UnknownSource {
                                name: source.to_string(),
                            })
                        }
                    }
                }
                "POWER_PRESENCE" => Target::PowerPresence,
                "POWER_MANUAL" => Target::PowerManual,
                "LIGHT_SHOWER" => Target::LightShower,
                "TASK_HORI" => Target::TaskHori,
                "TASK_VERT" => Target::TaskVert,
                "SETTINGS" => Target::Settings,
                _ => {
                    return Err(EngineError::UnknownInstruction {
                        target: target.to_string(),
                        value: value.to_string(),
                    })
                }
            };

            let status =
                SwitchStatus::parse(value).ok_or_else(|| EngineError::UnknownInstruction {
                    target: row.target.clone().unwrap_or_default(),
                    value: value.to_string(),
                })?;

            Ok(TelemetryEvent::Instruction(InstructionEvent::new(
                row.timestamp,
                target,
                status,
            )))
        }
    }
}

/// Per-device event streams, sorted by timestamp.
#[derive(Debug, Clone, Default)]
pub struct DeviceEvents {
    pub device: String,
    pub instructions: Vec<InstructionEvent>,
    pub heartbeats: Vec<DateTime<Utc>>,
    pub gaze: Vec<GazeEvent>,
}

impl DeviceEvents {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, event: TelemetryEvent) {
        match event {
            TelemetryEvent::Instruction(e) => self.instructions.push(e),
            TelemetryEvent::Heartbeat(t) => self.heartbeats.push(t),
            TelemetryEvent::Gaze(e) => self.gaze.push(e),
        }
    }

    /// Sort all streams by timestamp. Stable: ties keep insertion order.
    pub fn sort(&mut self) {
        self.instructions.sort_by_key(|e| e.timestamp);
        self.heartbeats.sort();
        self.gaze.sort_by_key(|e| e.timestamp);
    }
}

/// Classify and group raw rows per device, sorted by timestamp.
///
/// A row that fails classification aborts the whole partition; callers that
/// want per-device isolation should partition per device first (the batch
/// aggregation path does this).
pub fn partition_rows(rows: &[RawRow]) -> Result<BTreeMap<String, DeviceEvents>, EngineError> {
    let mut devices: BTreeMap<String, DeviceEvents> = BTreeMap::new();
    for row in rows {
        let event = classify(row)?;
        devices
            .entry(row.device.clone())
            .or_insert_with(|| DeviceEvents::new(row.device.clone()))
            .push(event);
    }
    for events in devices.values_mut() {
        events.sort();
    }
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn instruction_row(source: &str, target: &str, value: &str) -> RawRow {
        RawRow {
            device: "PTL_1".to_string(),
            timestamp: ts(0),
            kind: RawKind::Instruction,
            source: Some(source.to_string()),
            target: Some(target.to_string()),
            value: Some(value.to_string()),
            zone: None,
        }
    }

    #[test]
    fn test_power_source_classification() {
        let row = instruction_row("None@Lullaby", "POWER", "ON");
        let event = classify(&row).unwrap();
        assert_eq!(
            event,
            TelemetryEvent::Instruction(InstructionEvent::new(
                ts(0),
                Target::PowerPresence,
                SwitchStatus::On
            ))
        );

        let row = instruction_row("DataDock", "POWER", "OFF");
        let event = classify(&row).unwrap();
        assert_eq!(
            event,
            TelemetryEvent::Instruction(InstructionEvent::new(
                ts(0),
                Target::PowerManual,
                SwitchStatus::Off
            ))
        );
    }

    #[test]
    fn test_unknown_source_is_fatal() {
        let row = instruction_row("Unknown", "POWER", "ON");
        let err = classify(&row).unwrap_err();
        assert!(matches!(err, EngineError::UnknownSource { .. }));
        assert_eq!(
            err.to_string(),
            "unknown combination of source `Unknown` and target POWER"
        );
        // The offending source string is payload, not an error cause.
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_unknown_target_is_fatal() {
        let row = instruction_row("DataDock", "DISCO", "ON");
        assert!(matches!(
            classify(&row),
            Err(EngineError::UnknownInstruction { .. })
        ));
    }

    #[test]
    fn test_unknown_status_is_fatal() {
        let row = instruction_row("DataDock", "TASK_HORI", "MAYBE");
        assert!(matches!(
            classify(&row),
            Err(EngineError::UnknownInstruction { .. })
        ));
    }

    #[test]
    fn test_restart_row_becomes_instruction() {
        let row = RawRow {
            device: "PTL_1".to_string(),
            timestamp: ts(5),
            kind: RawKind::Restart,
            source: None,
            target: None,
            value: None,
            zone: None,
        };
        let event = classify(&row).unwrap();
        assert_eq!(
            event,
            TelemetryEvent::Instruction(InstructionEvent::restart(ts(5)))
        );
    }

    #[test]
    fn test_partition_sorts_per_device() {
        let mut rows = vec![
            instruction_row("DataDock", "TASK_HORI", "ON"),
            instruction_row("DataDock", "SETTINGS", "ON"),
        ];
        rows[0].timestamp = ts(10);
        rows[1].timestamp = ts(3);
        rows.push(RawRow {
            device: "PTL_2".to_string(),
            timestamp: ts(1),
            kind: RawKind::Heartbeat,
            source: None,
            target: None,
            value: None,
            zone: None,
        });

        let devices = partition_rows(&rows).unwrap();
        assert_eq!(devices.len(), 2);
        let ptl1 = &devices["PTL_1"];
        assert_eq!(ptl1.instructions.len(), 2);
        assert!(ptl1.instructions[0].timestamp < ptl1.instructions[1].timestamp);
        assert_eq!(devices["PTL_2"].heartbeats, vec![ts(1)]);
    }
}
