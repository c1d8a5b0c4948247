use config::Config as eConfig;
use serde::Deserialize;
use serde_derive::Serialize;

use crate::data::GlucoseUnit;

/// Settings for a tuning run
///
/// The user can specify the desired settings in a TOML configuration file;
/// every field carries a default so a minimal file (or none at all via
/// [Settings::default]) is enough to run.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub run: Run,
    #[serde(default)]
    pub categorize: Categorize,
    #[serde(default)]
    pub tune: Tune,
    #[serde(default)]
    pub insulin: Insulin,
    #[serde(default)]
    pub log: Log,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run: Run::default(),
            categorize: Categorize::default(),
            tune: Tune::default(),
            insulin: Insulin::default(),
            log: Log::default(),
        }
    }
}

/// Window and orchestration settings
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Run {
    /// Number of look-back days to tune over
    #[serde(default = "default_days")]
    pub days: usize,
    /// Hour at which a tuning day starts, chosen so the boundary falls in a
    /// period of minimal insulin activity
    #[serde(default = "default_day_start_hour")]
    pub day_start_hour: u32,
    #[serde(default = "default_units")]
    pub units: GlucoseUnit,
    /// Gate for accepting temp-basal and extended-bolus events into tuning
    #[serde(default = "default_true")]
    pub accept_temp_events: bool,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            days: default_days(),
            day_start_hour: default_day_start_hour(),
            units: default_units(),
            accept_temp_events: true,
        }
    }
}

/// Categorization policy constants
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Categorize {
    /// Fold unannounced-meal excursions into the basal category instead of
    /// tuning on them
    #[serde(default = "default_false")]
    pub categorize_uam_as_basal: bool,
    /// Residual above which an interval without logged carbs counts as an
    /// unannounced meal, mg/dL per 5 min. Policy constant, not derived.
    #[serde(default = "default_uam_threshold")]
    pub uam_threshold: f64,
    /// Minimum valid 5 minute intervals for a day to be tunable
    #[serde(default = "default_min_valid_intervals")]
    pub min_valid_intervals: usize,
    /// Window over which a logged carb entry decays to zero, minutes
    #[serde(default = "default_carb_absorption")]
    pub carb_absorption_minutes: f64,
}

impl Default for Categorize {
    fn default() -> Self {
        Self {
            categorize_uam_as_basal: false,
            uam_threshold: default_uam_threshold(),
            min_valid_intervals: default_min_valid_intervals(),
            carb_absorption_minutes: default_carb_absorption(),
        }
    }
}

/// Step bounds and clamps for the per-day tuning fold
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Tune {
    /// Largest relative basal change per bucket and day
    #[serde(default = "default_basal_step")]
    pub max_daily_basal_step: f64,
    /// Fraction of the implied basal correction applied per day
    #[serde(default = "default_adjustment_fraction")]
    pub basal_adjustment_fraction: f64,
    /// Tolerance band of the tuned 24h basal total around the pump total
    #[serde(default = "default_total_tolerance")]
    pub basal_total_tolerance: f64,
    /// Basal rates never drop below this, U/h
    #[serde(default = "default_min_basal_rate")]
    pub min_basal_rate: f64,
    /// Largest relative ISF change per day
    #[serde(default = "default_isf_adjustment")]
    pub max_daily_isf_adjustment: f64,
    /// Largest relative IC change per day
    #[serde(default = "default_ic_adjustment")]
    pub max_daily_ic_adjustment: f64,
    /// Minimum deviation samples before ISF is adjusted at all
    #[serde(default = "default_min_samples")]
    pub min_deviation_samples: usize,
    /// Minimum grams of logged carbs before IC is adjusted at all
    #[serde(default = "default_min_carb_total")]
    pub min_carb_total: f64,
}

impl Default for Tune {
    fn default() -> Self {
        Self {
            max_daily_basal_step: default_basal_step(),
            basal_adjustment_fraction: default_adjustment_fraction(),
            basal_total_tolerance: default_total_tolerance(),
            min_basal_rate: default_min_basal_rate(),
            max_daily_isf_adjustment: default_isf_adjustment(),
            max_daily_ic_adjustment: default_ic_adjustment(),
            min_deviation_samples: default_min_samples(),
            min_carb_total: default_min_carb_total(),
        }
    }
}

/// Insulin curve overrides and exercise handling
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Insulin {
    /// Peak override in minutes for free-peak and Lyumjev curves
    #[serde(default)]
    pub peak_override: Option<f64>,
    /// Scale scheduled basal down while an elevated temp target is active
    #[serde(default = "default_false")]
    pub exercise_mode: bool,
    /// Temp target at which the exercise correction halves the basal, mg/dL
    #[serde(default = "default_half_basal_target")]
    pub half_basal_exercise_target: f64,
}

impl Default for Insulin {
    fn default() -> Self {
        Self {
            peak_override: None,
            exercise_mode: false,
            half_basal_exercise_target: default_half_basal_target(),
        }
    }
}

/// Logging settings
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; stdout is always used
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Read settings from a TOML file, with `GLUCOTUNE_`-prefixed environment
/// variables layered on top
pub fn read_settings(path: impl AsRef<str>) -> Result<Settings, config::ConfigError> {
    let parsed = eConfig::builder()
        .add_source(config::File::with_name(path.as_ref()).format(config::FileFormat::Toml))
        .add_source(config::Environment::with_prefix("GLUCOTUNE").separator("_"))
        .build()?;

    parsed.try_deserialize()
}

// *********************************
// Default values for deserializing
// *********************************
fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_days() -> usize {
    5
}

fn default_day_start_hour() -> u32 {
    4
}

fn default_units() -> GlucoseUnit {
    GlucoseUnit::MgDl
}

fn default_uam_threshold() -> f64 {
    3.0
}

fn default_min_valid_intervals() -> usize {
    200
}

fn default_carb_absorption() -> f64 {
    180.0
}

fn default_basal_step() -> f64 {
    0.2
}

fn default_adjustment_fraction() -> f64 {
    0.2
}

fn default_total_tolerance() -> f64 {
    0.1
}

fn default_min_basal_rate() -> f64 {
    0.025
}

fn default_half_basal_target() -> f64 {
    160.0
}

fn default_isf_adjustment() -> f64 {
    0.1
}

fn default_ic_adjustment() -> f64 {
    0.1
}

fn default_min_samples() -> usize {
    4
}

fn default_min_carb_total() -> f64 {
    10.0
}
