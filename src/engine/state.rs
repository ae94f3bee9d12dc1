//! The device state machine.
//!
//! Instruction events are discrete; the device state between them is
//! reconstructed by replaying a deterministic transition function. The
//! transition table is total over the classified enums, so exhaustiveness is
//! checked at compile time; rows that do not classify never reach this
//! module (see `event::classify`).

use crate::event::{InstructionEvent, SwitchStatus, Target};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Active lighting scene. Only meaningful while `power` is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scene {
    Auto,
    TaskHori,
    TaskVert,
    LightShower,
}

/// Continuous multi-field device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub power: SwitchStatus,
    pub scene: Scene,
    pub settings: SwitchStatus,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            power: SwitchStatus::Off,
            scene: Scene::Auto,
            settings: SwitchStatus::Off,
        }
    }
}

/// Apply one instruction to a state.
///
/// Selecting a scene implies the device is powered and the settings menu is
/// closed. Deselecting a scene falls back to automatic mode. A restart
/// resets scene and settings but leaves power untouched.
pub fn transition(state: DeviceState, instruction: &InstructionEvent) -> DeviceState {
    let mut next = state;
    match instruction.target {
        Target::PowerPresence | Target::PowerManual => {
            next.power = instruction.status;
        }
        Target::LightShower | Target::TaskHori | Target::TaskVert => {
            next.power = SwitchStatus::On;
            next.settings = SwitchStatus::Off;
            next.scene = match instruction.status {
                SwitchStatus::On => match instruction.target {
                    Target::LightShower => Scene::LightShower,
                    Target::TaskHori => Scene::TaskHori,
                    _ => Scene::TaskVert,
                },
                SwitchStatus::Off => Scene::Auto,
            };
        }
        Target::Settings => {
            next.settings = instruction.status;
        }
        Target::Restart => {
            next.scene = Scene::Auto;
            next.settings = SwitchStatus::Off;
        }
    }
    next
}

/// Fold the transition function over ordered events, one sample per event.
pub fn replay(
    events: &[InstructionEvent],
    initial: DeviceState,
) -> Vec<(DateTime<Utc>, DeviceState)> {
    let mut state = initial;
    events
        .iter()
        .map(|event| {
            state = transition(state, event);
            (event.timestamp, state)
        })
        .collect()
}

/// A reconstructed state series over a query window.
///
/// The first sample sits at the window's lower bound; `until` bounds the
/// last run when the series is turned into intervals or resampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSeries {
    pub samples: Vec<(DateTime<Utc>, DeviceState)>,
    pub until: DateTime<Utc>,
}

impl StateSeries {
    /// Forward-fill the series at a fixed step from its first sample up to
    /// (and including) `until`. Last value held, never interpolated.
    pub fn resample(&self, step: Duration) -> Vec<(DateTime<Utc>, DeviceState)> {
        debug_assert!(step > Duration::zero());

        let mut resampled = Vec::new();
        let Some(&(first_ts, _)) = self.samples.first() else {
            return resampled;
        };

        let mut ts = first_ts;
        let mut idx = 0;
        while ts <= self.until {
            while idx + 1 < self.samples.len() && self.samples[idx + 1].0 <= ts {
                idx += 1;
            }
            resampled.push((ts, self.samples[idx].1));
            ts += step;
        }
        resampled
    }
}

/// Reconstruct the state series for `[begin, end]` from a device's full,
/// ordered instruction stream.
///
/// The synthetic sample at `begin` is the last pre-window instruction
/// applied to the default state, or the plain default when no prior
/// instruction exists.
pub fn state_series(
    instructions: &[InstructionEvent],
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
) -> StateSeries {
    debug_assert!(begin <= end);
    debug_assert!(instructions.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let prior = instructions.iter().filter(|e| e.timestamp < begin).last();
    let initial = match prior {
        Some(event) => transition(DeviceState::default(), event),
        None => DeviceState::default(),
    };

    let in_window: Vec<InstructionEvent> = instructions
        .iter()
        .filter(|e| e.timestamp >= begin && e.timestamp <= end)
        .copied()
        .collect();

    let mut samples = vec![(begin, initial)];
    samples.extend(replay(&in_window, initial));

    StateSeries { samples, until: end }
}
