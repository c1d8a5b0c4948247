//! Building blocks for retrospective insulin therapy profile tuning.
//!
//! Given several days of historical glucose readings and delivered-insulin
//! events, the library reconstructs insulin-on-board at every moment,
//! attributes observed glucose movement to insulin activity versus
//! unexplained change, and folds each day's categorized deviations into a
//! tuned profile: new hourly basal rates, insulin sensitivity factor and
//! insulin-to-carb ratio. It makes no real-time dosing decisions; it only
//! estimates better static profile parameters from history.

pub mod algorithms;
pub mod data;
pub mod logger;
pub mod routines;

pub mod prelude {
    pub use crate::algorithms::{window_end, Status, TuneRun};
    pub use crate::data::*;
    pub use crate::logger::setup_log;
    pub use crate::routines::categorize::{
        categorize, CategorizedDeviation, DeviationCategory, PrepError, PreppedDay,
    };
    pub use crate::routines::insulin::{CurveFamily, CurveFractions, InsulinCurve};
    pub use crate::routines::iob::{
        bolus_iob, event_iob, temp_basal_iob, total_iob, IobTotal, Sensitivity,
    };
    pub use crate::routines::output::{
        render_report, settings_record, DayCycle, SettingsRecord, TuneResult,
    };
    pub use crate::routines::settings::{read_settings, Settings};
    pub use crate::routines::tune::tune;
}

use anyhow::Result;
use data::{HistoryProvider, TherapyProfile};
use routines::output::{DayCycle, TuneResult};
use routines::settings::Settings;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver};

mod tests;

/// Run a tuning run to completion on the calling thread.
///
/// Sets up logging from the settings and folds every requested look-back day
/// into the tuned profile. The returned result always carries a terminal
/// [algorithms::Status]; computation failures never propagate as panics.
pub fn start<P: HistoryProvider>(
    provider: P,
    pump: TherapyProfile,
    settings: Settings,
) -> Result<TuneResult> {
    logger::setup_log(&settings)?;
    Ok(algorithms::TuneRun::new(provider, pump, settings).fit())
}

/// Handle to a tuning run executing on a background worker thread
pub struct BackgroundRun {
    /// One [DayCycle] arrives here after every tuned day
    pub progress: UnboundedReceiver<DayCycle>,
    /// Set to abort between days; the run returns the last fully-tuned profile
    pub cancel: Arc<AtomicBool>,
    pub handle: JoinHandle<TuneResult>,
}

/// Spawn a tuning run on a dedicated worker thread.
///
/// The caller receives partial progress through the channel after each day
/// and joins the handle for the terminal result. The run itself stays a
/// single sequential computation; this is an async notification boundary,
/// not parallel tuning.
pub fn start_background<P: HistoryProvider + Send + 'static>(
    provider: P,
    pump: TherapyProfile,
    settings: Settings,
) -> BackgroundRun {
    let (tx, rx) = mpsc::unbounded_channel::<DayCycle>();
    let run = algorithms::TuneRun::new(provider, pump, settings).with_progress(tx);
    let cancel = run.cancel_handle();
    let handle = std::thread::spawn(move || run.fit());
    BackgroundRun {
        progress: rx,
        cancel,
        handle,
    }
}
