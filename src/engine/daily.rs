//! Daily aggregation of reconstructed timelines.
//!
//! Built strictly on top of the state machine, the connectivity
//! reconstructor and the interval algebra. Every calendar day in the query
//! range produces exactly one record; days without activity get explicit
//! zero-duration rows. An interval is attributed to the day its begin falls
//! on, so state overhang past midnight can push a day past 24 hours - the
//! exclusion flag exists to filter such days, never to impute values.

use crate::engine::connectivity::connection;
use crate::engine::interval::{extract_intervals, intersect, span, Span};
use crate::engine::state::{state_series, Scene};
use crate::engine::EngineError;
use crate::event::{self, DeviceEvents, GazeEvent, GazeZone, InstructionEvent, RawRow, SwitchStatus};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Thresholds and timezone for daily aggregation.
#[derive(Debug, Clone, Copy)]
pub struct AggregationOptions {
    /// Largest heartbeat gap still considered connected.
    pub max_delay: Duration,
    /// Timezone used for calendar-day bucketing.
    pub timezone: Tz,
    /// A day with more disconnected time than this is excluded.
    pub max_disconnected: Duration,
    /// A day whose summed gaze durations exceed this is excluded
    /// (overhang anomaly, e.g. gaze totals above 30 hours).
    pub max_gaze: Duration,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            max_delay: Duration::minutes(2),
            timezone: chrono_tz::UTC,
            max_disconnected: Duration::hours(6),
            max_gaze: Duration::hours(30),
        }
    }
}

/// Total scene durations for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneDurations {
    #[serde(with = "crate::engine::duration_serde")]
    pub auto: Duration,
    #[serde(with = "crate::engine::duration_serde")]
    pub task_hori: Duration,
    #[serde(with = "crate::engine::duration_serde")]
    pub task_vert: Duration,
    #[serde(with = "crate::engine::duration_serde")]
    pub light_shower: Duration,
}

impl Default for SceneDurations {
    fn default() -> Self {
        Self {
            auto: Duration::zero(),
            task_hori: Duration::zero(),
            task_vert: Duration::zero(),
            light_shower: Duration::zero(),
        }
    }
}

impl SceneDurations {
    fn add(&mut self, scene: Scene, duration: Duration) {
        match scene {
            Scene::Auto => self.auto = self.auto + duration,
            Scene::TaskHori => self.task_hori = self.task_hori + duration,
            Scene::TaskVert => self.task_vert = self.task_vert + duration,
            Scene::LightShower => self.light_shower = self.light_shower + duration,
        }
    }

    pub fn total(&self) -> Duration {
        self.auto + self.task_hori + self.task_vert + self.light_shower
    }
}

/// Settings-menu usage for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsDurations {
    #[serde(with = "crate::engine::duration_serde")]
    pub duration: Duration,
    /// Number of times the settings menu was opened.
    pub count: u32,
}

impl Default for SettingsDurations {
    fn default() -> Self {
        Self {
            duration: Duration::zero(),
            count: 0,
        }
    }
}

/// Total gaze-zone durations for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GazeDurations {
    #[serde(with = "crate::engine::duration_serde")]
    pub horizontal: Duration,
    #[serde(with = "crate::engine::duration_serde")]
    pub vertical: Duration,
    #[serde(with = "crate::engine::duration_serde")]
    pub undefined: Duration,
    #[serde(with = "crate::engine::duration_serde")]
    pub no_detect: Duration,
}

impl Default for GazeDurations {
    fn default() -> Self {
        Self {
            horizontal: Duration::zero(),
            vertical: Duration::zero(),
            undefined: Duration::zero(),
            no_detect: Duration::zero(),
        }
    }
}

impl GazeDurations {
    fn add(&mut self, zone: GazeZone, duration: Duration) {
        match zone {
            GazeZone::Horizontal => self.horizontal = self.horizontal + duration,
            GazeZone::Vertical => self.vertical = self.vertical + duration,
            GazeZone::Undefined => self.undefined = self.undefined + duration,
            GazeZone::NoDetect => self.no_detect = self.no_detect + duration,
        }
    }

    pub fn total(&self) -> Duration {
        self.horizontal + self.vertical + self.undefined + self.no_detect
    }
}

/// One row per device per calendar day. Pure function of the day's event
/// log plus fixed thresholds; never mutated once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub scenes: SceneDurations,
    pub settings: SettingsDurations,
    pub gaze: GazeDurations,
    #[serde(with = "crate::engine::duration_serde")]
    pub disconnected: Duration,
    /// Filters the day from aggregate statistics; never imputes.
    pub excluded: bool,
}

/// UTC instant of local midnight starting `date`.
fn start_of_day(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    match tz.from_local_datetime(&midnight).earliest() {
        Some(dt) => dt.with_timezone(&Utc),
        // Midnight skipped by a DST gap; fall back to the UTC reading.
        None => Utc.from_utc_datetime(&midnight),
    }
}

/// UTC window covering the calendar days `[since, until]` (end exclusive).
pub fn day_bounds(since: NaiveDate, until: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = until.succ_opt().unwrap_or(until);
    (start_of_day(since, tz), start_of_day(next, tz))
}

fn day_of(ts: DateTime<Utc>, tz: Tz) -> NaiveDate {
    ts.with_timezone(&tz).date_naive()
}

/// All calendar days in `[since, until]`, inclusive.
fn date_range(since: NaiveDate, until: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = since;
    while current <= until {
        days.push(current);
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}

fn zero_filled<T: Default>(since: NaiveDate, until: NaiveDate) -> BTreeMap<NaiveDate, T> {
    date_range(since, until)
        .into_iter()
        .map(|day| (day, T::default()))
        .collect()
}

fn check_window(since: NaiveDate, until: NaiveDate) -> Result<(), EngineError> {
    if since > until {
        return Err(EngineError::InvalidWindow { since, until });
    }
    Ok(())
}

/// Per-day total duration of each scene while the device is on and the
/// settings menu is closed.
pub fn scene_durations(
    instructions: &[InstructionEvent],
    since: NaiveDate,
    until: NaiveDate,
    options: &AggregationOptions,
) -> Result<BTreeMap<NaiveDate, SceneDurations>, EngineError> {
    check_window(since, until)?;
    let (begin, end) = day_bounds(since, until, options.timezone);

    let series = state_series(instructions, begin, end);
    let samples: Vec<(DateTime<Utc>, Option<Scene>)> = series
        .samples
        .iter()
        .map(|&(ts, state)| {
            let active =
                state.power == SwitchStatus::On && state.settings == SwitchStatus::Off;
            (ts, active.then_some(state.scene))
        })
        .collect();

    let mut table = zero_filled::<SceneDurations>(since, until);
    for interval in extract_intervals(&samples, Some(end)) {
        let Some(scene) = interval.value else { continue };
        if interval.duration() <= Duration::zero() {
            continue;
        }
        if let Some(row) = table.get_mut(&day_of(interval.begin, options.timezone)) {
            row.add(scene, interval.duration());
        }
    }
    Ok(table)
}

/// Per-day settings-menu duration and open count.
pub fn settings_durations(
    instructions: &[InstructionEvent],
    since: NaiveDate,
    until: NaiveDate,
    options: &AggregationOptions,
) -> Result<BTreeMap<NaiveDate, SettingsDurations>, EngineError> {
    check_window(since, until)?;
    let (begin, end) = day_bounds(since, until, options.timezone);

    let series = state_series(instructions, begin, end);
    let samples: Vec<(DateTime<Utc>, bool)> = series
        .samples
        .iter()
        .map(|&(ts, state)| {
            (
                ts,
                state.power == SwitchStatus::On && state.settings == SwitchStatus::On,
            )
        })
        .collect();

    let mut table = zero_filled::<SettingsDurations>(since, until);
    for interval in extract_intervals(&samples, Some(end)) {
        if !interval.value || interval.duration() <= Duration::zero() {
            continue;
        }
        if let Some(row) = table.get_mut(&day_of(interval.begin, options.timezone)) {
            row.duration = row.duration + interval.duration();
            row.count += 1;
        }
    }
    Ok(table)
}

/// Per-day gaze-zone durations.
///
/// Each detection extends to the next sample's timestamp; the final sample
/// extends to the end of the query window.
pub fn gaze_durations(
    gaze: &[GazeEvent],
    since: NaiveDate,
    until: NaiveDate,
    options: &AggregationOptions,
) -> Result<BTreeMap<NaiveDate, GazeDurations>, EngineError> {
    check_window(since, until)?;
    let (begin, end) = day_bounds(since, until, options.timezone);

    let samples: Vec<(DateTime<Utc>, GazeZone)> = gaze
        .iter()
        .filter(|e| e.timestamp >= begin && e.timestamp <= end)
        .map(|e| (e.timestamp, e.zone))
        .collect();

    let mut table = zero_filled::<GazeDurations>(since, until);
    for interval in extract_intervals(&samples, Some(end)) {
        if interval.duration() <= Duration::zero() {
            continue;
        }
        if let Some(row) = table.get_mut(&day_of(interval.begin, options.timezone)) {
            row.add(interval.value, interval.duration());
        }
    }
    Ok(table)
}

/// Per-day total disconnected time.
pub fn daily_disconnected(
    heartbeats: &[DateTime<Utc>],
    since: NaiveDate,
    until: NaiveDate,
    options: &AggregationOptions,
) -> Result<BTreeMap<NaiveDate, Duration>, EngineError> {
    check_window(since, until)?;
    let (begin, end) = day_bounds(since, until, options.timezone);

    let disconnected: Vec<Span> = connection(heartbeats, begin, end, options.max_delay, true)
        .into_iter()
        .filter(|iv| !iv.connected)
        .map(|iv| span(iv.begin, iv.end))
        .collect();

    let mut table = BTreeMap::new();
    for day in date_range(since, until) {
        let day_span = {
            let (b, e) = day_bounds(day, day, options.timezone);
            span(b, e)
        };
        let total = intersect(&disconnected, &[day_span])
            .iter()
            .fold(Duration::zero(), |acc, iv| acc + iv.duration());
        table.insert(day, total);
    }
    Ok(table)
}

/// Aggregate one device over `[since, until]` into per-day records.
///
/// This is the entry point external collaborators call.
pub fn aggregate(
    events: &DeviceEvents,
    since: NaiveDate,
    until: NaiveDate,
    options: &AggregationOptions,
) -> Result<Vec<DailyRecord>, EngineError> {
    check_window(since, until)?;

    let scenes = scene_durations(&events.instructions, since, until, options)?;
    let settings = settings_durations(&events.instructions, since, until, options)?;
    let gaze = gaze_durations(&events.gaze, since, until, options)?;
    let disconnected = daily_disconnected(&events.heartbeats, since, until, options)?;

    let records = date_range(since, until)
        .into_iter()
        .map(|date| {
            let scenes = scenes.get(&date).copied().unwrap_or_default();
            let settings = settings.get(&date).copied().unwrap_or_default();
            let gaze = gaze.get(&date).copied().unwrap_or_default();
            let disconnected = disconnected.get(&date).copied().unwrap_or_default();
            let excluded = disconnected > options.max_disconnected
                || gaze.total() > options.max_gaze;
            DailyRecord {
                date,
                scenes,
                settings,
                gaze,
                disconnected,
                excluded,
            }
        })
        .collect();

    debug!(device = %events.device, days = (until - since).num_days() + 1, "aggregated");
    Ok(records)
}

/// Aggregate many devices in parallel.
///
/// Each device's event stream is processed in isolation; one failed device
/// (for example an unclassifiable instruction row) does not abort the batch.
pub fn aggregate_batch(
    rows: &[RawRow],
    since: NaiveDate,
    until: NaiveDate,
    options: &AggregationOptions,
) -> Vec<(String, Result<Vec<DailyRecord>, EngineError>)> {
    let mut per_device: BTreeMap<String, Vec<&RawRow>> = BTreeMap::new();
    for row in rows {
        per_device.entry(row.device.clone()).or_default().push(row);
    }

    let devices: Vec<(String, Vec<&RawRow>)> = per_device.into_iter().collect();
    devices
        .par_iter()
        .map(|(device, rows)| {
            let result = classify_device(device, rows)
                .and_then(|events| aggregate(&events, since, until, options));
            (device.clone(), result)
        })
        .collect()
}

fn classify_device(device: &str, rows: &[&RawRow]) -> Result<DeviceEvents, EngineError> {
    let mut events = DeviceEvents::new(device);
    for row in rows {
        events.push(event::classify(row)?);
    }
    events.sort();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Target;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 3, day).unwrap()
    }

    fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, day, hour, min, 0).unwrap()
    }

    fn instr(ts: DateTime<Utc>, target: Target, status: SwitchStatus) -> InstructionEvent {
        InstructionEvent::new(ts, target, status)
    }

    fn options() -> AggregationOptions {
        AggregationOptions::default()
    }

    #[test]
    fn test_daily_coverage_one_row_per_day() {
        let events = DeviceEvents::new("PTL_1");
        let records = aggregate(&events, date(10), date(14), &options()).unwrap();

        assert_eq!(records.len(), 5);
        for (record, day) in records.iter().zip(10..) {
            assert_eq!(record.date, date(day));
            assert_eq!(record.scenes, SceneDurations::default());
            assert_eq!(record.gaze, GazeDurations::default());
            // No heartbeats at all: the whole day is disconnected.
            assert_eq!(record.disconnected, Duration::hours(24));
            assert!(record.excluded);
        }
    }

    #[test]
    fn test_scene_durations_basic() {
        let instructions = vec![
            instr(at(16, 8, 0), Target::PowerManual, SwitchStatus::On),
            instr(at(16, 9, 0), Target::TaskHori, SwitchStatus::On),
            instr(at(16, 10, 0), Target::TaskHori, SwitchStatus::Off),
            instr(at(16, 12, 0), Target::PowerPresence, SwitchStatus::Off),
        ];

        let table = scene_durations(&instructions, date(16), date(16), &options()).unwrap();
        let row = table[&date(16)];
        assert_eq!(row.auto, Duration::hours(3)); // 08-09 and 10-12
        assert_eq!(row.task_hori, Duration::hours(1));
        assert_eq!(row.task_vert, Duration::zero());
        assert_eq!(row.light_shower, Duration::zero());
    }

    #[test]
    fn test_scene_durations_exclude_settings_time() {
        let instructions = vec![
            instr(at(16, 8, 0), Target::LightShower, SwitchStatus::On),
            instr(at(16, 9, 0), Target::Settings, SwitchStatus::On),
            instr(at(16, 9, 30), Target::Settings, SwitchStatus::Off),
            instr(at(16, 10, 0), Target::PowerManual, SwitchStatus::Off),
        ];

        let table = scene_durations(&instructions, date(16), date(16), &options()).unwrap();
        let row = table[&date(16)];
        // The half hour in the settings menu does not count as scene time.
        assert_eq!(row.light_shower, Duration::minutes(90));
        assert_eq!(row.total(), Duration::minutes(90));

        let settings = settings_durations(&instructions, date(16), date(16), &options()).unwrap();
        assert_eq!(settings[&date(16)].duration, Duration::minutes(30));
        assert_eq!(settings[&date(16)].count, 1);
    }

    #[test]
    fn test_scene_overhang_attributed_to_begin_day() {
        // Scene turned on late on day 16, never turned off; the window ends
        // after day 17, so the whole overhang lands on day 16.
        let instructions = vec![instr(at(16, 23, 0), Target::TaskVert, SwitchStatus::On)];

        let table = scene_durations(&instructions, date(16), date(17), &options()).unwrap();
        assert_eq!(table[&date(16)].task_vert, Duration::hours(25));
        assert_eq!(table[&date(17)].task_vert, Duration::zero());
    }

    #[test]
    fn test_prior_instruction_seeds_window_state() {
        // Device switched on the day before the window.
        let instructions = vec![
            instr(at(15, 20, 0), Target::TaskHori, SwitchStatus::On),
            instr(at(16, 6, 0), Target::PowerManual, SwitchStatus::Off),
        ];

        let table = scene_durations(&instructions, date(16), date(16), &options()).unwrap();
        assert_eq!(table[&date(16)].task_hori, Duration::hours(6));
    }

    #[test]
    fn test_gaze_durations_per_zone() {
        let gaze = vec![
            GazeEvent {
                timestamp: at(16, 8, 0),
                zone: GazeZone::Horizontal,
            },
            GazeEvent {
                timestamp: at(16, 8, 30),
                zone: GazeZone::Vertical,
            },
            GazeEvent {
                timestamp: at(16, 9, 0),
                zone: GazeZone::NoDetect,
            },
        ];

        let table = gaze_durations(&gaze, date(16), date(16), &options()).unwrap();
        let row = table[&date(16)];
        assert_eq!(row.horizontal, Duration::minutes(30));
        assert_eq!(row.vertical, Duration::minutes(30));
        // The final sample extends to the end of the window.
        assert_eq!(row.no_detect, Duration::hours(15));
    }

    #[test]
    fn test_gaze_anomaly_excludes_day() {
        // A single detection on day 16 overhangs the whole two-day window:
        // 40 hours attributed to day 16.
        let gaze = vec![GazeEvent {
            timestamp: at(16, 8, 0),
            zone: GazeZone::Horizontal,
        }];
        // Keep connectivity healthy so only the gaze anomaly can exclude.
        let mut events = DeviceEvents::new("PTL_1");
        events.gaze = gaze;
        let (begin, end) = day_bounds(date(16), date(17), chrono_tz::UTC);
        let mut ts = begin;
        while ts <= end {
            events.heartbeats.push(ts);
            ts += Duration::minutes(1);
        }

        let records = aggregate(&events, date(16), date(17), &options()).unwrap();
        assert_eq!(records[0].gaze.horizontal, Duration::hours(40));
        assert!(records[0].excluded);
        assert!(!records[1].excluded);
    }

    #[test]
    fn test_daily_disconnected_split_across_days() {
        // Heartbeats every minute until 22:00 on day 16, silence afterwards,
        // resuming 02:00 on day 17.
        let mut heartbeats = Vec::new();
        let mut ts = at(16, 0, 0);
        while ts <= at(16, 22, 0) {
            heartbeats.push(ts);
            ts += Duration::minutes(1);
        }
        let mut ts = at(17, 2, 0);
        while ts <= at(17, 23, 59) {
            heartbeats.push(ts);
            ts += Duration::minutes(1);
        }

        let table = daily_disconnected(&heartbeats, date(16), date(17), &options()).unwrap();
        assert_eq!(table[&date(16)], Duration::hours(2));
        // 2h of the gap plus the trailing minute before next midnight.
        assert_eq!(table[&date(17)], Duration::hours(2) + Duration::minutes(1));
    }

    #[test]
    fn test_invalid_window() {
        let events = DeviceEvents::new("PTL_1");
        assert!(matches!(
            aggregate(&events, date(17), date(16), &options()),
            Err(EngineError::InvalidWindow { .. })
        ));
    }

    #[test]
    fn test_aggregate_batch_isolates_failures() {
        use crate::event::RawKind;

        let good = RawRow {
            device: "PTL_GOOD".to_string(),
            timestamp: at(16, 8, 0),
            kind: RawKind::Heartbeat,
            source: None,
            target: None,
            value: None,
            zone: None,
        };
        let bad = RawRow {
            device: "PTL_BAD".to_string(),
            timestamp: at(16, 8, 0),
            kind: RawKind::Instruction,
            source: Some("DataDock".to_string()),
            target: Some("DISCO".to_string()),
            value: Some("ON".to_string()),
            zone: None,
        };

        let results = aggregate_batch(&[good, bad], date(16), date(16), &options());
        assert_eq!(results.len(), 2);
        let bad_result = results.iter().find(|(d, _)| d == "PTL_BAD").unwrap();
        assert!(bad_result.1.is_err());
        let good_result = results.iter().find(|(d, _)| d == "PTL_GOOD").unwrap();
        assert_eq!(good_result.1.as_ref().unwrap().len(), 1);
    }
}
