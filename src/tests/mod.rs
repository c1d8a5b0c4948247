#![cfg(test)]
use crate::prelude::*;

#[test]
fn read_mandatory_settings() {
    let settings = read_settings("src/tests/config.toml").unwrap();
    assert_eq!(settings.run.days, 3);
    assert_eq!(settings.run.day_start_hour, 4);
    assert_eq!(settings.run.units, GlucoseUnit::MgDl);
    assert_eq!(settings.log.level, "debug");
}

#[test]
fn read_categorize_overrides() {
    let settings = read_settings("src/tests/config.toml").unwrap();
    assert!(settings.categorize.categorize_uam_as_basal);
    assert_eq!(settings.categorize.uam_threshold, 4.5);
    // untouched fields keep their defaults
    assert_eq!(settings.categorize.min_valid_intervals, 200);
    assert_eq!(settings.categorize.carb_absorption_minutes, 180.0);
}

#[test]
fn read_tune_overrides() {
    let settings = read_settings("src/tests/config.toml").unwrap();
    assert_eq!(settings.tune.max_daily_basal_step, 0.15);
    assert_eq!(settings.tune.basal_total_tolerance, 0.1);
    assert_eq!(settings.tune.min_basal_rate, 0.025);
    assert_eq!(settings.insulin.peak_override, Some(60.0));
}

#[test]
fn defaults_without_a_file() {
    let settings = Settings::default();
    assert_eq!(settings.run.days, 5);
    assert!(settings.run.accept_temp_events);
    assert!(!settings.categorize.categorize_uam_as_basal);
    assert!(!settings.insulin.exercise_mode);
    assert_eq!(settings.insulin.half_basal_exercise_target, 160.0);
    assert_eq!(settings.log.level, "info");
}
