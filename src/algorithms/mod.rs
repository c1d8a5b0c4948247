use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::data::{effective_events, DayWindow, HistoryProvider, TherapyProfile, MS_PER_DAY};
use crate::routines::categorize::{categorize, PrepError};
use crate::routines::insulin::InsulinCurve;
use crate::routines::output::{
    render_report, settings_record, CycleLog, DayCycle, TuneResult,
};
use crate::routines::settings::Settings;
use crate::routines::tune::tune;

/// Name given to the evolving tuned profile
const TUNED_PROFILE_NAME: &str = "Tuned profile";

/// Terminal and in-flight states of a tuning run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Run has not started yet
    Pending,
    /// Run is currently processing days
    InProgress,
    /// All requested days tuned
    Completed,
    /// Cancellation was requested between days
    Cancelled,
    /// A day failed the glucose coverage minimum; the whole run is abandoned
    InsufficientData { day: usize },
    /// Configuration or collaborator failure, with a user-facing message
    Failed(String),
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Pending => write!(f, "Pending"),
            Status::InProgress => write!(f, "In progress"),
            Status::Completed => write!(f, "Completed"),
            Status::Cancelled => write!(f, "Cancelled"),
            Status::InsufficientData { day } => {
                write!(f, "Insufficient glucose data on day {}", day)
            }
            Status::Failed(msg) => write!(f, "{}", msg),
        }
    }
}

/// End of the tuning window for a given wall-clock time: the most recent
/// day-start boundary not in the future
pub fn window_end(now: DateTime<Local>, day_start_hour: u32) -> i64 {
    let boundary = now
        .date_naive()
        .and_hms_opt(day_start_hour, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|datetime| datetime.timestamp_millis())
        .unwrap_or_else(|| now.timestamp_millis());
    if boundary > now.timestamp_millis() {
        boundary - MS_PER_DAY
    } else {
        boundary
    }
}

/// A tuning run: a strictly sequential fold over the look-back days, oldest
/// first, where each day's tuning input is the previous day's output profile.
///
/// The run owns its state exclusively; the pump profile is read-only for the
/// run's lifetime. Partial results are pushed through the progress channel
/// after every day, and a cancellation flag is honored at day boundaries.
pub struct TuneRun<P: HistoryProvider> {
    provider: P,
    pump: TherapyProfile,
    settings: Settings,
    end: i64,
    status: Status,
    cycle_log: CycleLog,
    log: String,
    cancel: Arc<AtomicBool>,
    tx: Option<UnboundedSender<DayCycle>>,
}

impl<P: HistoryProvider> TuneRun<P> {
    pub fn new(provider: P, mut pump: TherapyProfile, settings: Settings) -> Self {
        let end = window_end(Local::now(), settings.run.day_start_hour);
        // a per-run peak override replaces the curve's configured peak
        if let Some(peak) = settings.insulin.peak_override {
            pump.curve = InsulinCurve::new(pump.curve.family, Some(peak), pump.curve.dia_hours);
        }
        Self {
            provider,
            pump,
            settings,
            end,
            status: Status::Pending,
            cycle_log: CycleLog::new(),
            log: String::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            tx: None,
        }
    }

    /// Override the window end; mostly for callers replaying fixed history
    pub fn with_end(mut self, end: i64) -> Self {
        self.end = end;
        self
    }

    /// Attach a progress channel receiving one [DayCycle] per tuned day
    pub fn with_progress(mut self, tx: UnboundedSender<DayCycle>) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Flag checked between days; setting it makes the run return early with
    /// the last fully-tuned profile
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    fn at_log(&mut self, message: impl AsRef<str>) {
        tracing::info!("{}", message.as_ref());
        self.log.push_str(message.as_ref());
        self.log.push('\n');
    }

    /// Run the whole fold. Never panics across the boundary: every failure
    /// becomes a terminal [Status] in the result.
    pub fn fit(mut self) -> TuneResult {
        let run_date = Utc::now().timestamp_millis();
        let days = self.settings.run.days;
        let start = self.end - days as i64 * MS_PER_DAY;
        let record = settings_record(run_date, &self.settings, &self.pump.curve, start, self.end);
        let units = self.settings.run.units;

        if days < 1 {
            let message = "tuning requires at least one look-back day".to_string();
            self.at_log(&message);
            return TuneResult {
                status: Status::Failed(message.clone()),
                profile: None,
                report: message,
                record,
                log: self.log,
                days_processed: 0,
            };
        }

        self.status = Status::InProgress;
        self.at_log(format!("Start tuning with {} days back", days));
        let mut tuned = self.pump.renamed(TUNED_PROFILE_NAME);

        for day in 0..days {
            if self.cancel.load(Ordering::SeqCst) {
                self.at_log(format!("Cancelled before day {}", day + 1));
                self.status = Status::Cancelled;
                let report = render_report(&tuned, &self.pump, units);
                return TuneResult {
                    status: Status::Cancelled,
                    profile: Some(tuned),
                    report,
                    record,
                    log: self.log,
                    days_processed: day,
                };
            }

            let span = tracing::info_span!("", "{}", format!("Day {}", day + 1));
            let _enter = span.enter();

            let from = start + day as i64 * MS_PER_DAY;
            let to = from + MS_PER_DAY;
            self.at_log(format!("Tune day {} of {}", day + 1, days));

            let mut history = match self.provider.history(from, to) {
                Ok(history) => history,
                Err(error) => {
                    let message = format!("history unavailable for day {}: {}", day + 1, error);
                    self.at_log(&message);
                    self.status = Status::Failed(message.clone());
                    return TuneResult {
                        status: self.status.clone(),
                        profile: None,
                        report: message,
                        record,
                        log: self.log,
                        days_processed: day,
                    };
                }
            };
            history.events =
                effective_events(&history.events, self.settings.run.accept_temp_events);

            let window = DayWindow::new(from, self.settings.run.day_start_hour);
            let prepped =
                match categorize(&window, &history, &tuned, &self.pump, &self.settings) {
                    Ok(prepped) => prepped,
                    Err(error) => {
                        // one bad day invalidates the whole multi-day estimate;
                        // the partial profile is discarded, not returned
                        let message = format!("day {} not tunable: {}", day + 1, error);
                        self.at_log(&message);
                        self.status = match error {
                            PrepError::InsufficientData { .. } | PrepError::NoGlucoseData => {
                                Status::InsufficientData { day: day + 1 }
                            }
                        };
                        return TuneResult {
                            status: self.status.clone(),
                            profile: None,
                            report: message,
                            record,
                            log: self.log,
                            days_processed: day,
                        };
                    }
                };

            let (basal, meal, uam) = prepped.category_counts();
            self.at_log(format!(
                "Categorized {} intervals: {} basal, {} meal, {} unannounced",
                prepped.valid_intervals, basal, meal, uam
            ));

            tuned = tune(&prepped, &tuned, &self.pump, &self.settings);

            let report = render_report(&tuned, &self.pump, units);
            if day < days - 1 {
                self.at_log(format!("Partial result for day {}", day + 1));
            }
            let cycle = DayCycle {
                day: day + 1,
                days,
                report: report.clone(),
                profile: tuned.clone(),
            };
            if let Some(tx) = &self.tx {
                let _ = tx.send(cycle.clone());
            }
            self.cycle_log.push(cycle);
        }

        let report = render_report(&tuned, &self.pump, units);
        self.at_log(&report);
        self.status = Status::Completed;
        TuneResult {
            status: Status::Completed,
            profile: Some(tuned),
            report,
            record,
            log: self.log,
            days_processed: days,
        }
    }
}
