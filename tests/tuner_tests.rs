use glucotune::prelude::*;
use glucotune::routines::categorize::DeviationSample;

fn profile(name: &str) -> TherapyProfile {
    let basal = vec![
        0.6, 0.6, 0.7, 0.8, 0.9, 1.0, 1.2, 1.3, 1.1, 1.0, 0.9, 0.9, 0.8, 0.8, 0.9, 1.0, 1.0, 1.1,
        1.0, 0.9, 0.8, 0.7, 0.7, 0.6,
    ];
    TherapyProfile::new(
        name,
        basal,
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

/// Tuning a profile already at its implied optimum produces the same profile
#[test]
fn idempotent_at_equilibrium() {
    let pump = profile("pump");
    let tuned = pump.renamed("tuned");
    let settings = Settings::default();
    let mut day = prepped(vec![Some(0.0); 24]);
    day.isf_samples = (0..10)
        .map(|_| DeviationSample {
            predicted: -8.0,
            observed: -8.0,
        })
        .collect();
    day.carb_total = 50.0;
    day.meal_residuals = vec![0.0; 30];

    let result = tune(&day, &tuned, &pump, &settings);
    for hour in 0..24 {
        assert!(
            (result.basal[hour] - tuned.basal[hour]).abs() < 1e-9,
            "hour {} drifted",
            hour
        );
    }
    assert!((result.isf - tuned.isf).abs() < 1e-9);
    assert!((result.ic - tuned.ic).abs() < 1e-9);
}

/// The per-day step bound holds for every bucket regardless of residual size
#[test]
fn bounded_step_property() {
    let pump = profile("pump");
    let settings = Settings::default();
    let step = settings.tune.max_daily_basal_step;
    let mut tuned = pump.renamed("tuned");

    let wild: Vec<Option<f64>> = (0..24)
        .map(|hour| Some(if hour % 2 == 0 { 300.0 } else { -300.0 }))
        .collect();
    for _ in 0..6 {
        let next = tune(&prepped(wild.clone()), &tuned, &pump, &settings);
        for hour in 0..24 {
            let bound = step * tuned.basal[hour] + 1e-9;
            assert!(
                (next.basal[hour] - tuned.basal[hour]).abs() <= bound,
                "hour {} jumped past the bound",
                hour
            );
        }
        tuned = next;
    }
}

/// Across many one-sided days the 24h total never leaves the tolerance band
/// around the pump total
#[test]
fn basal_total_stability_property() {
    let pump = profile("pump");
    let settings = Settings::default();
    let tolerance = settings.tune.basal_total_tolerance;
    let mut tuned = pump.renamed("tuned");

    for day in 0..14 {
        let residual = if day % 3 == 0 { 25.0 } else { 12.0 };
        tuned = tune(&prepped(vec![Some(residual); 24]), &tuned, &pump, &settings);
        let drift = (tuned.total_basal() - pump.total_basal()).abs();
        assert!(
            drift <= tolerance * pump.total_basal() + 1e-6,
            "day {}: drift {}",
            day,
            drift
        );
    }
}

/// ISF and IC moves are bounded per day and keep their direction
#[test]
fn isf_ic_bounded_moves() {
    let pump = profile("pump");
    let tuned = pump.renamed("tuned");
    let settings = Settings::default();

    let mut day = prepped(vec![Some(0.0); 24]);
    day.isf_samples = (0..20)
        .map(|_| DeviationSample {
            predicted: -10.0,
            observed: -30.0,
        })
        .collect();
    day.carb_total = 80.0;
    day.meal_residuals = vec![10.0; 40];

    let result = tune(&day, &tuned, &pump, &settings);
    let isf_bound = settings.tune.max_daily_isf_adjustment;
    let ic_bound = settings.tune.max_daily_ic_adjustment;
    assert!(result.isf > tuned.isf);
    assert!(result.isf <= tuned.isf * (1.0 + isf_bound) + 1e-9);
    assert!(result.ic < tuned.ic);
    assert!(result.ic >= tuned.ic * (1.0 - ic_bound) - 1e-9);
}

/// The pump profile passed to the fold is never modified
#[test]
fn pump_profile_is_read_only() {
    let pump = profile("pump");
    let pristine = pump.clone();
    let tuned = pump.renamed("tuned");
    let settings = Settings::default();
    let _ = tune(&prepped(vec![Some(40.0); 24]), &tuned, &pump, &settings);
    assert_eq!(pump, pristine);
}
