use serde::{Deserialize, Serialize};

/// Peak activity of the rapid-acting curve, minutes after dosing
pub const RAPID_PEAK: f64 = 75.0;
/// Peak activity of the ultra-rapid curve
pub const ULTRA_RAPID_PEAK: f64 = 55.0;
/// Peak activity of the Lyumjev curve
pub const LYUMJEV_PEAK: f64 = 45.0;
/// Custom free-peak values are clamped into this range, minutes
pub const FREE_PEAK_MIN: f64 = 50.0;
pub const FREE_PEAK_MAX: f64 = 120.0;
/// A free-peak curve slower than this labels itself "rapid-acting" in the
/// settings record, otherwise "ultra-rapid". Policy constant, not derived.
pub const FREE_PEAK_LABEL_THRESHOLD: f64 = 55.0;

/// Supported insulin action curve families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CurveFamily {
    RapidActing,
    UltraRapid,
    Lyumjev,
    FreePeak,
}

/// An insulin action curve: family, peak time and duration of insulin action.
///
/// The shape is the bi-exponential model with a single peak parameter; the
/// family fixes the peak unless a custom override applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsulinCurve {
    pub family: CurveFamily,
    pub peak_minutes: f64,
    pub dia_hours: f64,
}

/// Fractional insulin-on-board and activity per unit of insulin at a given
/// elapsed time
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CurveFractions {
    pub iob: f64,
    pub activity: f64,
}

impl InsulinCurve {
    /// Build a curve for a family. `peak_override` only applies to the
    /// free-peak and Lyumjev families and is clamped to the supported range.
    pub fn new(family: CurveFamily, peak_override: Option<f64>, dia_hours: f64) -> Self {
        let peak_minutes = match family {
            CurveFamily::RapidActing => RAPID_PEAK,
            CurveFamily::UltraRapid => ULTRA_RAPID_PEAK,
            CurveFamily::Lyumjev => peak_override.unwrap_or(LYUMJEV_PEAK),
            CurveFamily::FreePeak => peak_override
                .unwrap_or(RAPID_PEAK)
                .clamp(FREE_PEAK_MIN, FREE_PEAK_MAX),
        };
        Self {
            family,
            peak_minutes,
            dia_hours,
        }
    }

    /// Duration of insulin action in minutes
    pub fn duration_minutes(&self) -> f64 {
        self.dia_hours * 60.0
    }

    /// Duration of insulin action in milliseconds
    pub fn dia_ms(&self) -> i64 {
        (self.dia_hours * 3_600_000.0) as i64
    }

    /// Curve label used in the settings record
    pub fn label(&self) -> &'static str {
        match self.family {
            CurveFamily::RapidActing => "rapid-acting",
            CurveFamily::UltraRapid | CurveFamily::Lyumjev => "ultra-rapid",
            CurveFamily::FreePeak => {
                if self.peak_minutes > FREE_PEAK_LABEL_THRESHOLD {
                    "rapid-acting"
                } else {
                    "ultra-rapid"
                }
            }
        }
    }

    /// Whether the settings record should carry the explicit peak time
    pub fn uses_custom_peak(&self) -> bool {
        matches!(self.family, CurveFamily::Lyumjev | CurveFamily::FreePeak)
    }

    /// Fractional IOB and activity per unit at `elapsed_minutes` since dosing.
    ///
    /// Both fractions are in `[0, 1]`. Returns zero for negative elapsed
    /// times and for anything at or beyond the duration of insulin action;
    /// at elapsed zero the full dose is on board.
    pub fn fractions(&self, elapsed_minutes: f64) -> CurveFractions {
        let td = self.duration_minutes();
        if elapsed_minutes < 0.0 || elapsed_minutes >= td || td <= 0.0 {
            return CurveFractions::default();
        }
        let tp = self.peak_minutes;
        let t = elapsed_minutes;

        let tau = tp * (1.0 - tp / td) / (1.0 - 2.0 * tp / td);
        let a = 2.0 * tau / td;
        let s = 1.0 / (1.0 - a + (1.0 + a) * (-td / tau).exp());

        let activity = (s / tau.powi(2)) * t * (1.0 - t / td) * (-t / tau).exp();
        let iob = 1.0
            - s * (1.0 - a)
                * ((t.powi(2) / (tau * td * (1.0 - a)) - t / tau - 1.0) * (-t / tau).exp() + 1.0);

        CurveFractions {
            iob: iob.clamp(0.0, 1.0),
            activity: activity.max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rapid() -> InsulinCurve {
        InsulinCurve::new(CurveFamily::RapidActing, None, 5.0)
    }

    #[test]
    fn zero_outside_action_window() {
        let curve = rapid();
        assert_eq!(curve.fractions(-1.0), CurveFractions::default());
        assert_eq!(curve.fractions(300.0), CurveFractions::default());
        assert_eq!(curve.fractions(400.0), CurveFractions::default());
    }

    #[test]
    fn full_dose_on_board_at_dose_time() {
        let fractions = rapid().fractions(0.0);
        assert!((fractions.iob - 1.0).abs() < 1e-9);
        assert!(fractions.activity.abs() < 1e-9);
    }

    #[test]
    fn iob_decays_monotonically() {
        let curve = rapid();
        let mut last = 1.0 + 1e-9;
        for minute in 0..300 {
            let iob = curve.fractions(minute as f64).iob;
            assert!(iob <= last, "IOB rose at minute {}", minute);
            assert!((0.0..=1.0).contains(&iob));
            last = iob;
        }
    }

    #[test]
    fn rapid_iob_at_half_duration() {
        // published value of the bi-exponential rapid curve (peak 75, DIA 5h)
        let iob = rapid().fractions(150.0).iob;
        assert!((iob - 0.2681).abs() < 1e-3, "iob was {}", iob);
    }

    #[test]
    fn activity_peaks_at_peak_time() {
        let curve = rapid();
        let at_peak = curve.fractions(RAPID_PEAK).activity;
        assert!(at_peak > curve.fractions(RAPID_PEAK - 20.0).activity);
        assert!(at_peak > curve.fractions(RAPID_PEAK + 20.0).activity);
    }

    #[test]
    fn iob_nearly_zero_at_duration_end() {
        let iob = rapid().fractions(299.9).iob;
        assert!(iob < 1e-3, "iob was {}", iob);
    }

    #[test]
    fn free_peak_clamped_and_labelled() {
        let slow = InsulinCurve::new(CurveFamily::FreePeak, Some(90.0), 6.0);
        assert_eq!(slow.label(), "rapid-acting");
        let fast = InsulinCurve::new(CurveFamily::FreePeak, Some(40.0), 6.0);
        assert_eq!(fast.peak_minutes, FREE_PEAK_MIN);
        assert_eq!(fast.label(), "ultra-rapid");
        let wild = InsulinCurve::new(CurveFamily::FreePeak, Some(500.0), 6.0);
        assert_eq!(wild.peak_minutes, FREE_PEAK_MAX);
    }

    #[test]
    fn lyumjev_labels_ultra_rapid_with_custom_peak() {
        let curve = InsulinCurve::new(CurveFamily::Lyumjev, None, 5.0);
        assert_eq!(curve.label(), "ultra-rapid");
        assert!(curve.uses_custom_peak());
        assert_eq!(curve.peak_minutes, LYUMJEV_PEAK);
    }
}
