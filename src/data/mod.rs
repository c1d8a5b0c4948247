use anyhow::{bail, Result};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::routines::insulin::InsulinCurve;

pub const MS_PER_MIN: i64 = 60_000;
pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
/// Glucose readings are bucketed on a five minute grid
pub const INTERVAL_MS: i64 = 5 * MS_PER_MIN;
pub const INTERVALS_PER_DAY: usize = (MS_PER_DAY / INTERVAL_MS) as usize;

pub const MMOLL_TO_MGDL: f64 = 18.0;

/// Glucose units used for display and for the settings record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlucoseUnit {
    #[serde(rename = "mg/dl")]
    MgDl,
    #[serde(rename = "mmol")]
    Mmol,
}

impl GlucoseUnit {
    pub fn as_text(&self) -> &'static str {
        match self {
            GlucoseUnit::MgDl => "mg/dl",
            GlucoseUnit::Mmol => "mmol",
        }
    }

    /// Convert an mg/dL quantity into this unit for display
    pub fn from_mgdl(&self, value: f64) -> f64 {
        match self {
            GlucoseUnit::MgDl => value,
            GlucoseUnit::Mmol => value / MMOLL_TO_MGDL,
        }
    }
}

/// A therapy profile: 24 hourly basal rates, a single insulin sensitivity
/// factor (mg/dL per U), a single insulin-to-carb ratio (g per U) and the
/// insulin action curve in effect.
///
/// Two instances exist per tuning run: the immutable pump profile and the
/// tuned profile, which is replaced (never mutated in place) after each day.
#[derive(Debug, Clone, PartialEq)]
pub struct TherapyProfile {
    pub name: String,
    pub basal: Array1<f64>,
    pub isf: f64,
    pub ic: f64,
    pub curve: InsulinCurve,
    /// Per basal hour, the number of tuned days without any usable deviation
    /// data for that hour, so the report can flag unreliable rows
    pub basal_untuned: Vec<u32>,
}

impl TherapyProfile {
    pub fn new(
        name: impl Into<String>,
        basal: Vec<f64>,
        isf: f64,
        ic: f64,
        curve: InsulinCurve,
    ) -> Result<Self> {
        if basal.len() != 24 {
            bail!(
                "a profile requires exactly 24 hourly basal rates, got {}",
                basal.len()
            );
        }
        if basal.iter().any(|rate| *rate < 0.0 || !rate.is_finite()) {
            bail!("basal rates must be finite and non-negative");
        }
        if isf <= 0.0 || ic <= 0.0 {
            bail!("ISF and IC must be positive");
        }
        Ok(Self {
            name: name.into(),
            basal: Array1::from(basal),
            isf,
            ic,
            curve,
            basal_untuned: vec![0; 24],
        })
    }

    /// Scheduled basal rate for an hour of the day, 0..=23
    pub fn basal_at_hour(&self, hour: usize) -> f64 {
        self.basal[hour % 24]
    }

    /// Total scheduled basal insulin over 24 hours, in units
    pub fn total_basal(&self) -> f64 {
        self.basal.sum()
    }

    /// A renamed copy, used to seed the tuned profile from the pump profile
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        let mut profile = self.clone();
        profile.name = name.into();
        profile
    }
}

/// A 24 hour tuning day `[start, start + 24h)`. The boundary sits at a fixed
/// reference hour (04:00 by default), a period of minimal insulin activity;
/// `midnight` anchors hour-of-day lookups for times that precede the window
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: i64,
    pub end: i64,
    midnight: i64,
}

impl DayWindow {
    pub fn new(start: i64, day_start_hour: u32) -> Self {
        Self {
            start,
            end: start + MS_PER_DAY,
            midnight: start - day_start_hour as i64 * MS_PER_HOUR,
        }
    }

    pub fn contains(&self, time: i64) -> bool {
        time >= self.start && time < self.end
    }

    /// Hour of the (local) day a timestamp falls in, also valid for times
    /// before the window start
    pub fn hour_of(&self, time: i64) -> usize {
        ((time - self.midnight).div_euclid(MS_PER_HOUR)).rem_euclid(24) as usize
    }

    /// Timestamp of the n-th five minute grid slot
    pub fn slot_time(&self, slot: usize) -> i64 {
        self.start + slot as i64 * INTERVAL_MS
    }

    /// Grid slot a timestamp falls in, if inside the window
    pub fn slot_of(&self, time: i64) -> Option<usize> {
        if self.contains(time) {
            Some(((time - self.start) / INTERVAL_MS) as usize)
        } else {
            None
        }
    }
}

/// How a temporary basal rate is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempBasalKind {
    /// The rate replaces the scheduled basal, in U/h
    Absolute,
    /// The rate is a percentage of the scheduled basal
    Percent,
}

/// A time-bounded override of the scheduled basal delivery rate
#[derive(Debug, Clone, PartialEq)]
pub struct TempBasal {
    pub time: i64,
    /// Duration in milliseconds; insulin is contributed within `[time, time + duration)`
    pub duration: i64,
    pub rate: f64,
    pub kind: TempBasalKind,
    pub valid: bool,
}

impl TempBasal {
    pub fn end(&self) -> i64 {
        self.time + self.duration
    }

    /// Rate in U/h after resolving percent overrides against the scheduled basal
    pub fn absolute_rate(&self, scheduled: f64) -> f64 {
        match self.kind {
            TempBasalKind::Absolute => self.rate,
            TempBasalKind::Percent => self.rate / 100.0 * scheduled,
        }
    }
}

/// An extended bolus: a fixed amount of insulin delivered evenly over a duration
#[derive(Debug, Clone, PartialEq)]
pub struct ExtendedBolus {
    pub time: i64,
    pub duration: i64,
    pub amount: f64,
}

impl ExtendedBolus {
    /// Express this extended bolus as the equivalent absolute temporary basal.
    /// Produces a new value; the original event is left untouched.
    pub fn as_temp_basal(&self) -> TempBasal {
        let hours = self.duration as f64 / MS_PER_HOUR as f64;
        TempBasal {
            time: self.time,
            duration: self.duration,
            rate: if hours > 0.0 { self.amount / hours } else { 0.0 },
            kind: TempBasalKind::Absolute,
            valid: self.duration > 0,
        }
    }
}

/// A discrete insulin dose
#[derive(Debug, Clone, PartialEq)]
pub struct Bolus {
    pub time: i64,
    pub amount: f64,
}

/// A delivered insulin event. The scheduled basal itself is implicit in the
/// profile and is not represented here; these are the deviations from it.
#[derive(Debug, Clone, PartialEq)]
pub enum TherapyEvent {
    Bolus(Bolus),
    TempBasal(TempBasal),
    ExtendedBolus(ExtendedBolus),
}

impl TherapyEvent {
    pub fn time(&self) -> i64 {
        match self {
            TherapyEvent::Bolus(bolus) => bolus.time,
            TherapyEvent::TempBasal(temp) => temp.time,
            TherapyEvent::ExtendedBolus(extended) => extended.time,
        }
    }

    /// Sort a batch of events by time. The history provider already returns
    /// sorted, non-overlapping events; this is for locally assembled lists.
    pub fn sort(events: &mut [TherapyEvent]) {
        events.sort_by_key(|event| event.time());
    }
}

/// A logged carbohydrate entry
#[derive(Debug, Clone, PartialEq)]
pub struct CarbEntry {
    pub time: i64,
    pub grams: f64,
}

/// A temporary glucose target, used for exercise detection and the
/// sensitivity correction applied to scheduled basal
#[derive(Debug, Clone, PartialEq)]
pub struct TempTarget {
    pub time: i64,
    pub duration: i64,
    pub target_mgdl: f64,
}

impl TempTarget {
    pub fn active_at(&self, time: i64) -> bool {
        time >= self.time && time < self.time + self.duration
    }
}

/// A glucose reading: timestamp, value in mg/dL and the sensor trend delta
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseDatum {
    pub time: i64,
    pub value: f64,
    pub delta: f64,
}

/// One day of history as returned by the [HistoryProvider]
#[derive(Debug, Clone, Default)]
pub struct DayHistory {
    pub glucose: Vec<GlucoseDatum>,
    pub events: Vec<TherapyEvent>,
    pub carbs: Vec<CarbEntry>,
    pub temp_targets: Vec<TempTarget>,
}

/// External collaborator yielding historical records for a `[from, to)` window.
///
/// Contract: glucose and events are returned time-sorted, and overlapping
/// temporary basal segments have already been resolved into non-overlapping
/// effective segments.
pub trait HistoryProvider {
    fn history(&self, from: i64, to: i64) -> Result<DayHistory>;
}

/// Filter the raw event list for tuning: extended boluses are rewritten as
/// equivalent temporary basals, and temp-basal class events are dropped
/// entirely unless the engineering-mode gate accepts them.
pub fn effective_events(events: &[TherapyEvent], accept_temp_events: bool) -> Vec<TherapyEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            TherapyEvent::Bolus(bolus) => Some(TherapyEvent::Bolus(bolus.clone())),
            TherapyEvent::TempBasal(temp) => {
                accept_temp_events.then(|| TherapyEvent::TempBasal(temp.clone()))
            }
            TherapyEvent::ExtendedBolus(extended) => {
                accept_temp_events.then(|| TherapyEvent::TempBasal(extended.as_temp_basal()))
            }
        })
        .collect()
}
