use chrono::{DateTime, Local, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::algorithms::Status;
use crate::data::{GlucoseUnit, TherapyProfile};
use crate::routines::insulin::InsulinCurve;
use crate::routines::settings::Settings;

/// Progress emitted after each tuned day
#[derive(Debug, Clone)]
pub struct DayCycle {
    /// 1-based index of the day just tuned
    pub day: usize,
    /// Total days requested for the run
    pub days: usize,
    pub report: String,
    /// Snapshot of the tuned profile after this day
    pub profile: TherapyProfile,
}

/// In-memory log of per-day progress
#[derive(Debug, Default)]
pub struct CycleLog {
    cycles: Vec<DayCycle>,
}

impl CycleLog {
    pub fn new() -> Self {
        Self { cycles: Vec::new() }
    }

    pub fn push(&mut self, cycle: DayCycle) {
        self.cycles.push(cycle);
    }

    pub fn last(&self) -> Option<&DayCycle> {
        self.cycles.last()
    }

    pub fn cycles(&self) -> &[DayCycle] {
        &self.cycles
    }
}

/// Terminal result of a tuning run
#[derive(Debug)]
pub struct TuneResult {
    pub status: Status,
    /// The tuned profile; absent when any day failed, since downstream days
    /// depend on the partial result
    pub profile: Option<TherapyProfile>,
    pub report: String,
    pub record: SettingsRecord,
    /// Append-only run log, also mirrored to the tracing subscriber
    pub log: String,
    pub days_processed: usize,
}

/// Structured description of a run's parameters, suitable for persistence
/// and audit by an external collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingsRecord {
    pub datestring: String,
    pub dateutc: String,
    pub utc_offset: i32,
    pub units: String,
    pub timezone: String,
    pub nbdays: usize,
    pub startdate: String,
    pub enddate: String,
    pub categorize_uam_as_basal: bool,
    pub tune_insulin_curve: bool,
    pub curve: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_custom_peak_time: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insulin_peak_time: Option<f64>,
}

fn local_datetime(ms: i64) -> DateTime<Local> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .with_timezone(&Local)
}

/// Build the audit record for a run over `[start, end)`
pub fn settings_record(
    run_date: i64,
    settings: &Settings,
    curve: &InsulinCurve,
    start: i64,
    end: i64,
) -> SettingsRecord {
    let local = local_datetime(run_date);
    let offset_seconds = local.offset().fix().local_minus_utc();
    let offset_hours = offset_seconds / 3600;
    let timezone = format!(
        "UTC{}{:02}:{:02}",
        if offset_seconds < 0 { '-' } else { '+' },
        offset_hours.abs(),
        (offset_seconds.abs() % 3600) / 60
    );
    let custom_peak = curve.uses_custom_peak();

    SettingsRecord {
        datestring: local.to_rfc3339(),
        dateutc: local.with_timezone(&Utc).to_rfc3339(),
        utc_offset: offset_hours,
        units: settings.run.units.as_text().to_string(),
        timezone,
        nbdays: settings.run.days,
        startdate: local_datetime(start).format("%Y-%m-%d").to_string(),
        // the last tuned day starts 24h before the window end
        enddate: local_datetime(end - 24 * 3_600_000)
            .format("%Y-%m-%d")
            .to_string(),
        categorize_uam_as_basal: settings.categorize.categorize_uam_as_basal,
        tune_insulin_curve: false,
        curve: curve.label().to_string(),
        use_custom_peak_time: custom_peak.then_some(true),
        insulin_peak_time: custom_peak.then_some(curve.peak_minutes),
    }
}

const REPORT_LINE: &str = "-------------------------------------------------\n";

/// Human readable comparison of the tuned profile against the pump profile:
/// one row per basal hour, totals, then ISF and IC.
///
/// A bucket the pump profile drives at 0 U/h has no defined percentage
/// change; its cell is left blank rather than printing Inf or NaN.
pub fn render_report(tuned: &TherapyProfile, pump: &TherapyProfile, units: GlucoseUnit) -> String {
    let mut out = String::new();
    out.push_str(REPORT_LINE);
    let _ = writeln!(out, " Hour | Pump  | Tuned | Miss | Change");
    out.push_str(REPORT_LINE);

    let mut total_pump = 0.0;
    let mut total_tuned = 0.0;
    for hour in 0..24 {
        let pump_rate = pump.basal[hour];
        let tuned_rate = tuned.basal[hour];
        total_pump += pump_rate;
        total_tuned += tuned_rate;
        let change = if pump_rate > 0.0 {
            format!("{:+.1}%", tuned_rate / pump_rate * 100.0 - 100.0)
        } else {
            String::new()
        };
        let missed = if tuned.basal_untuned[hour] > 0 {
            format!("{}", tuned.basal_untuned[hour])
        } else {
            String::new()
        };
        let _ = writeln!(
            out,
            "  {:02}  | {:.3} | {:.3} | {:>4} | {:>7}",
            hour, pump_rate, tuned_rate, missed, change
        );
    }
    out.push_str(REPORT_LINE);
    let _ = writeln!(
        out,
        " Total basal: {:.2} U -> {:.2} U",
        total_pump, total_tuned
    );
    out.push_str(REPORT_LINE);
    let _ = writeln!(
        out,
        " ISF [{} per U]: {:.2} -> {:.2}",
        units.as_text(),
        units.from_mgdl(pump.isf),
        units.from_mgdl(tuned.isf)
    );
    out.push_str(REPORT_LINE);
    let _ = writeln!(
        out,
        " IC [g per U]: {:.2} -> {:.2}",
        pump.ic, tuned.ic
    );
    out.push_str(REPORT_LINE);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::insulin::{CurveFamily, InsulinCurve};

    fn profile(name: &str, rate: f64) -> TherapyProfile {
        TherapyProfile::new(
            name,
            vec![rate; 24],
            50.0,
            10.0,
            InsulinCurve::new(CurveFamily::RapidActing, None, 5.0),
        )
        .unwrap()
    }

    #[test]
    fn report_contains_all_hours_and_totals() {
        let pump = profile("pump", 1.0);
        let mut tuned = profile("tuned", 1.0);
        tuned.basal[12] = 1.1;
        let report = render_report(&tuned, &pump, GlucoseUnit::MgDl);
        for hour in 0..24 {
            assert!(report.contains(&format!("  {:02}  |", hour)));
        }
        assert!(report.contains("Total basal: 24.00 U -> 24.10 U"));
        assert!(report.contains("+10.0%"));
        assert!(report.contains("ISF"));
        assert!(report.contains("IC"));
    }

    #[test]
    fn zero_pump_bucket_has_no_percentage() {
        let mut pump = profile("pump", 1.0);
        pump.basal[0] = 0.0;
        let tuned = profile("tuned", 1.0);
        let report = render_report(&tuned, &pump, GlucoseUnit::MgDl);
        assert!(!report.contains("inf"));
        assert!(!report.contains("NaN"));
    }

    #[test]
    fn mmol_display_converts_isf() {
        let pump = profile("pump", 1.0);
        let tuned = profile("tuned", 1.0);
        let report = render_report(&tuned, &pump, GlucoseUnit::Mmol);
        // 50 mg/dL per U is 2.78 mmol per U
        assert!(report.contains("2.78"));
    }

    #[test]
    fn record_serializes_with_curve_flags() {
        let settings = Settings::default();
        let curve = InsulinCurve::new(CurveFamily::FreePeak, Some(60.0), 6.0);
        let record = settings_record(0, &settings, &curve, 0, 5 * 24 * 3_600_000);
        assert_eq!(record.curve, "rapid-acting");
        assert_eq!(record.use_custom_peak_time, Some(true));
        assert_eq!(record.insulin_peak_time, Some(60.0));
        assert!(!record.tune_insulin_curve);

        let json = serde_json::to_string_pretty(&record).unwrap();
        assert!(json.contains("\"nbdays\": 5"));
        let back: SettingsRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_omits_peak_for_fixed_curves() {
        let settings = Settings::default();
        let curve = InsulinCurve::new(CurveFamily::RapidActing, None, 5.0);
        let record = settings_record(0, &settings, &curve, 0, 24 * 3_600_000);
        assert_eq!(record.curve, "rapid-acting");
        assert_eq!(record.use_custom_peak_time, None);
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("insulin_peak_time"));
    }
}
