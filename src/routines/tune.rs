use ndarray::Array1;

use crate::data::TherapyProfile;
use crate::routines::categorize::PreppedDay;
use crate::routines::settings::Settings;

/// Intervals per basal hour; a residual in mg/dL per 5 min scales by this to
/// an hourly figure
const INTERVALS_PER_HOUR: f64 = 12.0;

/// Fold one categorized day into the running tuned profile.
///
/// Pure: consumes the previous tuned profile and produces a new one, never
/// mutating either input. Basal rates move a bounded step toward the rate
/// implied by each hour's median residual, the 24 hour total is rebalanced
/// into a tolerance band around the pump profile's total, and ISF/IC move a
/// bounded fraction toward their sample-implied values.
pub fn tune(
    prepped: &PreppedDay,
    tuned: &TherapyProfile,
    pump: &TherapyProfile,
    settings: &Settings,
) -> TherapyProfile {
    let mut profile = tuned.clone();
    profile.basal = tune_basal(prepped, tuned, pump, settings, &mut profile.basal_untuned);
    profile.isf = tune_isf(prepped, tuned.isf, settings);
    profile.ic = tune_ic(prepped, tuned.ic, pump.isf, settings);
    profile
}

fn tune_basal(
    prepped: &PreppedDay,
    tuned: &TherapyProfile,
    pump: &TherapyProfile,
    settings: &Settings,
    untuned: &mut [u32],
) -> Array1<f64> {
    let step = settings.tune.max_daily_basal_step;
    let fraction = settings.tune.basal_adjustment_fraction;
    let floor = settings.tune.min_basal_rate;

    // per-bucket window the day's adjustment may move within
    let lows: Vec<f64> = tuned
        .basal
        .iter()
        .map(|old| (old * (1.0 - step)).max(floor))
        .collect();
    let highs: Vec<f64> = tuned
        .basal
        .iter()
        .map(|old| (old * (1.0 + step)).max(floor))
        .collect();

    let mut rates: Vec<f64> = Vec::with_capacity(24);
    for hour in 0..24 {
        let old = tuned.basal[hour];
        let rate = match prepped.basal_medians[hour] {
            Some(residual) => {
                // residual mg/dL per 5 min -> U/h of additional basal need
                let implied_extra = residual * INTERVALS_PER_HOUR / pump.isf;
                (old + implied_extra * fraction).clamp(lows[hour], highs[hour])
            }
            None => {
                untuned[hour] += 1;
                old.max(floor)
            }
        };
        rates.push(rate);
    }

    rebalance(&mut rates, &lows, &highs, pump.total_basal(), settings);
    Array1::from(rates)
}

/// Pull the 24 hour basal total back into the tolerance band around the pump
/// total, distributing the correction over buckets proportionally to the
/// slack each still has within its per-day step window.
fn rebalance(rates: &mut [f64], lows: &[f64], highs: &[f64], pump_total: f64, settings: &Settings) {
    let tolerance = settings.tune.basal_total_tolerance;
    let total: f64 = rates.iter().sum();
    let min_total: f64 = lows.iter().sum();
    let max_total: f64 = highs.iter().sum();

    let desired = total
        .clamp(pump_total * (1.0 - tolerance), pump_total * (1.0 + tolerance))
        .clamp(min_total, max_total);
    let diff = desired - total;
    if diff.abs() < 1e-9 {
        return;
    }

    let slack: Vec<f64> = rates
        .iter()
        .enumerate()
        .map(|(i, rate)| {
            if diff > 0.0 {
                highs[i] - rate
            } else {
                rate - lows[i]
            }
        })
        .collect();
    let slack_total: f64 = slack.iter().sum();
    if slack_total <= 0.0 {
        return;
    }
    for (i, rate) in rates.iter_mut().enumerate() {
        *rate += diff * slack[i] / slack_total;
    }
}

fn tune_isf(prepped: &PreppedDay, isf: f64, settings: &Settings) -> f64 {
    if prepped.isf_samples.len() < settings.tune.min_deviation_samples {
        return isf;
    }
    let predicted: f64 = prepped.isf_samples.iter().map(|s| s.predicted).sum();
    let observed: f64 = prepped.isf_samples.iter().map(|s| s.observed).sum();
    if predicted.abs() < 1e-6 {
        return isf;
    }
    let bound = settings.tune.max_daily_isf_adjustment;
    let ratio = (observed / predicted).clamp(1.0 - bound, 1.0 + bound);
    isf * ratio
}

fn tune_ic(prepped: &PreppedDay, ic: f64, pump_isf: f64, settings: &Settings) -> f64 {
    if prepped.carb_total < settings.tune.min_carb_total {
        return ic;
    }
    let dosed = prepped.carb_total / ic;
    let residual_total: f64 = prepped.meal_residuals.iter().sum();
    // glucose left unexplained by insulin during meals translates into
    // insulin that should have been dosed for those carbs
    let missing = residual_total / pump_isf;
    let denominator = dosed + missing;
    if denominator <= 0.0 {
        return ic;
    }
    let implied = prepped.carb_total / denominator;
    let bound = settings.tune.max_daily_ic_adjustment;
    implied.clamp(ic * (1.0 - bound), ic * (1.0 + bound))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DayWindow, MS_PER_HOUR};
    use crate::routines::categorize::DeviationSample;
    use crate::routines::insulin::{CurveFamily, InsulinCurve};

    fn profile(basal: f64) -> TherapyProfile {
        TherapyProfile::new(
            "test",
            vec![basal; 24],
            50.0,
            10.0,
            InsulinCurve::new(CurveFamily::RapidActing, None, 5.0),
        )
        .unwrap()
    }

    fn prepped(basal_medians: Vec<Option<f64>>) -> PreppedDay {
        PreppedDay {
            window: DayWindow::new(4 * MS_PER_HOUR, 4),
            deviations: Vec::new(),
            basal_medians,
            isf_samples: Vec::new(),
            meal_residuals: Vec::new(),
            carb_total: 0.0,
            valid_intervals: 287,
        }
    }

    #[test]
    fn zero_residuals_leave_profile_unchanged() {
        let pump = profile(1.0);
        let tuned = pump.renamed("tuned");
        let settings = Settings::default();
        let day = prepped(vec![Some(0.0); 24]);
        let result = tune(&day, &tuned, &pump, &settings);
        for hour in 0..24 {
            assert!((result.basal[hour] - 1.0).abs() < 1e-9);
        }
        assert_eq!(result.isf, 50.0);
        assert_eq!(result.ic, 10.0);
    }

    #[test]
    fn step_is_bounded_for_any_residual() {
        let pump = profile(1.0);
        let tuned = pump.renamed("tuned");
        let settings = Settings::default();
        let mut medians = vec![Some(0.0); 24];
        medians[8] = Some(1_000.0);
        medians[9] = Some(-1_000.0);
        let result = tune(&prepped(medians), &tuned, &pump, &settings);
        let step = settings.tune.max_daily_basal_step;
        for hour in 0..24 {
            let delta = (result.basal[hour] - tuned.basal[hour]).abs();
            assert!(
                delta <= step * tuned.basal[hour] + 1e-9,
                "hour {} moved {}",
                hour,
                delta
            );
        }
    }

    #[test]
    fn total_stays_within_tolerance_of_pump_total() {
        let pump = profile(1.0);
        let settings = Settings::default();
        let mut tuned = pump.renamed("tuned");
        // several days of uniformly positive residuals pushing every bucket up
        for _ in 0..10 {
            tuned = tune(&prepped(vec![Some(20.0); 24]), &tuned, &pump, &settings);
            let drift = (tuned.total_basal() - pump.total_basal()).abs();
            assert!(
                drift <= settings.tune.basal_total_tolerance * pump.total_basal() + 1e-6,
                "total drifted by {}",
                drift
            );
        }
    }

    #[test]
    fn rates_never_reach_zero() {
        let pump = profile(0.1);
        let settings = Settings::default();
        let mut tuned = pump.renamed("tuned");
        for _ in 0..60 {
            tuned = tune(&prepped(vec![Some(-500.0); 24]), &tuned, &pump, &settings);
        }
        for hour in 0..24 {
            assert!(tuned.basal[hour] >= settings.tune.min_basal_rate);
        }
    }

    #[test]
    fn untuned_hours_are_counted() {
        let pump = profile(1.0);
        let tuned = pump.renamed("tuned");
        let settings = Settings::default();
        let mut medians = vec![Some(0.0); 24];
        medians[3] = None;
        let result = tune(&prepped(medians), &tuned, &pump, &settings);
        assert_eq!(result.basal_untuned[3], 1);
        assert_eq!(result.basal_untuned[4], 0);
    }

    #[test]
    fn isf_follows_observed_over_predicted() {
        let pump = profile(1.0);
        let tuned = pump.renamed("tuned");
        let settings = Settings::default();
        let mut day = prepped(vec![Some(0.0); 24]);
        // observed drops 20% deeper than predicted -> insulin works harder
        day.isf_samples = (0..10)
            .map(|_| DeviationSample {
                predicted: -10.0,
                observed: -12.0,
            })
            .collect();
        let result = tune(&day, &tuned, &pump, &settings);
        let bound = settings.tune.max_daily_isf_adjustment;
        assert!(result.isf > tuned.isf);
        assert!(result.isf <= tuned.isf * (1.0 + bound) + 1e-9);
    }

    #[test]
    fn isf_untouched_without_enough_samples() {
        let pump = profile(1.0);
        let tuned = pump.renamed("tuned");
        let settings = Settings::default();
        let mut day = prepped(vec![Some(0.0); 24]);
        day.isf_samples = vec![DeviationSample {
            predicted: -10.0,
            observed: -20.0,
        }];
        let result = tune(&day, &tuned, &pump, &settings);
        assert_eq!(result.isf, tuned.isf);
    }

    #[test]
    fn ic_strengthens_when_meals_run_high() {
        let pump = profile(1.0);
        let tuned = pump.renamed("tuned");
        let settings = Settings::default();
        let mut day = prepped(vec![Some(0.0); 24]);
        day.carb_total = 60.0;
        day.meal_residuals = vec![5.0; 24]; // consistently under-dosed meals
        let result = tune(&day, &tuned, &pump, &settings);
        assert!(result.ic < tuned.ic);
        let bound = settings.tune.max_daily_ic_adjustment;
        assert!(result.ic >= tuned.ic * (1.0 - bound) - 1e-9);
    }
}
