use rayon::prelude::*;
use std::fmt;

use crate::data::{
    CarbEntry, DayHistory, DayWindow, TempTarget, TherapyEvent, TherapyProfile, INTERVALS_PER_DAY,
    MS_PER_MIN,
};
use crate::routines::iob::{total_iob, Sensitivity, NORMAL_TARGET};
use crate::routines::settings::Settings;

/// Deviation categories partition the valid intervals of a day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviationCategory {
    /// Glucose movement attributable to basal insulin alone
    Basal,
    /// A logged meal is still being absorbed
    Meal,
    /// An excursion above the UAM threshold with no logged carbs
    UnannouncedMeal,
}

/// One categorized five minute glucose interval
#[derive(Debug, Clone, PartialEq)]
pub struct CategorizedDeviation {
    /// Interval index within the day
    pub slot: usize,
    /// Timestamp of the interval end, where the deviation is observed
    pub time: i64,
    /// Glucose change predicted from insulin activity alone, mg/dL per 5 min
    pub predicted: f64,
    /// Observed glucose change, mg/dL per 5 min
    pub observed: f64,
    /// Unexplained share of the observed change
    pub residual: f64,
    pub category: DeviationCategory,
    /// Orthogonal tag: an exercise temp target was active. Excludes the
    /// interval from ISF estimation only.
    pub exercise: bool,
}

/// A deviation sample feeding ISF estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviationSample {
    pub predicted: f64,
    pub observed: f64,
}

/// One day of categorized deviations plus the aggregates the tuner consumes
#[derive(Debug, Clone)]
pub struct PreppedDay {
    pub window: DayWindow,
    pub deviations: Vec<CategorizedDeviation>,
    /// Median basal-category residual per basal hour, `None` for hours
    /// without any basal-category data
    pub basal_medians: Vec<Option<f64>>,
    /// Meal and UAM interval samples for ISF estimation
    pub isf_samples: Vec<DeviationSample>,
    /// Residuals of meal intervals, for IC estimation
    pub meal_residuals: Vec<f64>,
    /// Total logged carbs in the day, grams
    pub carb_total: f64,
    pub valid_intervals: usize,
}

impl PreppedDay {
    /// Interval counts per category: (basal, meal, unannounced meal)
    pub fn category_counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for deviation in &self.deviations {
            match deviation.category {
                DeviationCategory::Basal => counts.0 += 1,
                DeviationCategory::Meal => counts.1 += 1,
                DeviationCategory::UnannouncedMeal => counts.2 += 1,
            }
        }
        counts
    }
}

/// Categorization failure; aborts the whole run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepError {
    /// The day contained no glucose readings at all
    NoGlucoseData,
    /// Fewer valid intervals than the configured coverage minimum
    InsufficientData { valid: usize, required: usize },
}

impl fmt::Display for PrepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrepError::NoGlucoseData => write!(f, "no glucose data for the day"),
            PrepError::InsufficientData { valid, required } => write!(
                f,
                "insufficient glucose coverage: {} valid intervals, {} required",
                valid, required
            ),
        }
    }
}

impl std::error::Error for PrepError {}

/// Carb-equivalent absorption still outstanding at `time`, linearly decayed
/// over the configured absorption window
fn active_carbs(entries: &[CarbEntry], time: i64, absorption_minutes: f64) -> f64 {
    let window_ms = absorption_minutes * MS_PER_MIN as f64;
    entries
        .iter()
        .filter(|entry| time >= entry.time)
        .map(|entry| {
            let elapsed = (time - entry.time) as f64;
            (entry.grams * (1.0 - elapsed / window_ms)).max(0.0)
        })
        .sum()
}

fn exercise_target_active(temp_targets: &[TempTarget], time: i64) -> bool {
    temp_targets
        .iter()
        .any(|target| target.active_at(time) && target.target_mgdl >= NORMAL_TARGET + 5.0)
}

/// Snap the day's glucose readings to the five minute grid. The first reading
/// in a slot wins; single-slot gaps are filled by linear interpolation, longer
/// gaps stay empty and void the adjacent intervals.
fn grid_values(window: &DayWindow, history: &DayHistory) -> Vec<Option<f64>> {
    let mut slots: Vec<Option<f64>> = vec![None; INTERVALS_PER_DAY];
    for datum in &history.glucose {
        if let Some(slot) = window.slot_of(datum.time) {
            if slots[slot].is_none() {
                slots[slot] = Some(datum.value);
            }
        }
    }
    for i in 1..slots.len().saturating_sub(1) {
        if slots[i].is_none() {
            if let (Some(prev), Some(next)) = (slots[i - 1], slots[i + 1]) {
                slots[i] = Some((prev + next) / 2.0);
            }
        }
    }
    slots
}

/// Categorize one day of glucose intervals.
///
/// Predictions use the insulin activity reconstructed against the evolving
/// tuned profile and the *pump* profile's ISF; predicted deltas stay on the
/// same scale across tuning days. Within the day each interval is independent
/// and computed in parallel; the per-interval accumulation over events is
/// order-stable.
pub fn categorize(
    window: &DayWindow,
    history: &DayHistory,
    tuned: &TherapyProfile,
    pump: &TherapyProfile,
    settings: &Settings,
) -> Result<PreppedDay, PrepError> {
    if history.glucose.is_empty() {
        return Err(PrepError::NoGlucoseData);
    }
    let slots = grid_values(window, history);
    let events: &[TherapyEvent] = &history.events;

    let deviations: Vec<CategorizedDeviation> = (0..slots.len() - 1)
        .into_par_iter()
        .filter_map(|slot| {
            let (start, end) = match (slots[slot], slots[slot + 1]) {
                (Some(start), Some(end)) => (start, end),
                _ => return None,
            };
            let time = window.slot_time(slot + 1);
            let sensitivity = Sensitivity::for_time(
                time,
                settings.insulin.exercise_mode,
                settings.insulin.half_basal_exercise_target,
                &history.temp_targets,
            );
            let iob = total_iob(events, tuned, window, sensitivity, time);
            let predicted = -iob.activity * pump.isf * 5.0;
            let observed = end - start;
            let residual = observed - predicted;

            let category = if active_carbs(
                &history.carbs,
                time,
                settings.categorize.carb_absorption_minutes,
            ) > 0.0
            {
                DeviationCategory::Meal
            } else if residual > settings.categorize.uam_threshold
                && !settings.categorize.categorize_uam_as_basal
            {
                DeviationCategory::UnannouncedMeal
            } else {
                DeviationCategory::Basal
            };

            Some(CategorizedDeviation {
                slot,
                time,
                predicted,
                observed,
                residual,
                category,
                exercise: exercise_target_active(&history.temp_targets, time),
            })
        })
        .collect();

    let valid_intervals = deviations.len();
    let required = settings.categorize.min_valid_intervals;
    if valid_intervals < required {
        return Err(PrepError::InsufficientData {
            valid: valid_intervals,
            required,
        });
    }

    let mut buckets: Vec<Vec<f64>> = vec![Vec::new(); 24];
    let mut isf_samples = Vec::new();
    let mut meal_residuals = Vec::new();
    for deviation in &deviations {
        match deviation.category {
            DeviationCategory::Basal => {
                buckets[window.hour_of(deviation.time)].push(deviation.residual);
            }
            DeviationCategory::Meal => {
                meal_residuals.push(deviation.residual);
                if !deviation.exercise {
                    isf_samples.push(DeviationSample {
                        predicted: deviation.predicted,
                        observed: deviation.observed,
                    });
                }
            }
            DeviationCategory::UnannouncedMeal => {
                if !deviation.exercise {
                    isf_samples.push(DeviationSample {
                        predicted: deviation.predicted,
                        observed: deviation.observed,
                    });
                }
            }
        }
    }
    let basal_medians = buckets
        .iter()
        .map(|residuals| {
            if residuals.is_empty() {
                None
            } else {
                Some(median(residuals))
            }
        })
        .collect();

    Ok(PreppedDay {
        window: *window,
        deviations,
        basal_medians,
        isf_samples,
        meal_residuals,
        carb_total: history.carbs.iter().map(|entry| entry.grams).sum(),
        valid_intervals,
    })
}

pub(crate) fn median(data: &[f64]) -> f64 {
    let mut data: Vec<f64> = data.to_vec();
    data.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let size = data.len();
    match size {
        even if even % 2 == 0 => {
            let fst = data.get(even / 2 - 1).unwrap();
            let snd = data.get(even / 2).unwrap();
            (fst + snd) / 2.0
        }
        odd => *data.get(odd / 2_usize).unwrap(),
    }
}
