use crate::data::{
    Bolus, DayWindow, TempBasal, TempTarget, TherapyEvent, TherapyProfile, MS_PER_MIN,
};

/// Glucose target considered "normal"; temp targets at or above
/// `NORMAL_TARGET + 5` activate the exercise sensitivity correction
pub const NORMAL_TARGET: f64 = 100.0;

/// Insulin-on-board totals at a query time.
///
/// Accumulates additively: summing per-event results with [IobTotal::plus]
/// yields the same totals as a single pass over all events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IobTotal {
    pub time: i64,
    /// IOB from discrete boluses, units
    pub iob: f64,
    /// IOB from net basal deviations (temp basals, extended boluses), units
    pub basal_iob: f64,
    /// Instantaneous insulin activity, units per minute
    pub activity: f64,
    /// Net basal insulin within the insulin action window, units
    pub net_basal_insulin: f64,
    /// Net insulin over the whole event duration, units
    pub net_insulin: f64,
    /// Positive-only share of net basal insulin, units
    pub high_temp_insulin: f64,
}

impl IobTotal {
    pub fn new(time: i64) -> Self {
        Self {
            time,
            iob: 0.0,
            basal_iob: 0.0,
            activity: 0.0,
            net_basal_insulin: 0.0,
            net_insulin: 0.0,
            high_temp_insulin: 0.0,
        }
    }

    /// Additive combination of two results for the same query time
    pub fn plus(self, other: &IobTotal) -> Self {
        Self {
            time: self.time,
            iob: self.iob + other.iob,
            basal_iob: self.basal_iob + other.basal_iob,
            activity: self.activity + other.activity,
            net_basal_insulin: self.net_basal_insulin + other.net_basal_insulin,
            net_insulin: self.net_insulin + other.net_insulin,
            high_temp_insulin: self.high_temp_insulin + other.high_temp_insulin,
        }
    }
}

/// Sensitivity scaling applied to the scheduled basal when reconstructing
/// net temp-basal insulin. Ratio 1.0 means no adjustment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sensitivity {
    pub ratio: f64,
}

impl Default for Sensitivity {
    fn default() -> Self {
        Self { ratio: 1.0 }
    }
}

impl Sensitivity {
    /// Exercise correction: with exercise mode on and an active temp target at
    /// or above 105 mg/dL, the scheduled basal is scaled down by
    /// `c / (c + target - 100)` where `c = half_basal_target - 100`.
    ///
    /// With a half-basal target of 160: temp target 110 gives 0.86, 120 gives
    /// 0.75, 160 gives 0.5.
    pub fn for_time(
        time: i64,
        exercise_mode: bool,
        half_basal_target: f64,
        temp_targets: &[TempTarget],
    ) -> Self {
        if !exercise_mode {
            return Self::default();
        }
        let active = temp_targets.iter().find(|target| target.active_at(time));
        match active {
            Some(target) if target.target_mgdl >= NORMAL_TARGET + 5.0 => {
                let c = half_basal_target - NORMAL_TARGET;
                Self {
                    ratio: c / (c + target.target_mgdl - NORMAL_TARGET),
                }
            }
            _ => Self::default(),
        }
    }
}

/// IOB contribution of a single bolus at `time`
pub fn bolus_iob(bolus: &Bolus, profile: &TherapyProfile, time: i64) -> IobTotal {
    let mut result = IobTotal::new(time);
    let elapsed = (time - bolus.time) as f64 / MS_PER_MIN as f64;
    let fractions = profile.curve.fractions(elapsed);
    result.iob = bolus.amount * fractions.iob;
    result.activity = bolus.amount * fractions.activity;
    result
}

/// IOB contribution of a temporary basal at `time`.
///
/// The elapsed portion of the override is decomposed into roughly five minute
/// sub-intervals of equal width; the net rate at each sub-interval midpoint
/// (effective rate minus sensitivity-scaled scheduled basal) becomes an
/// equivalent micro-bolus run through the insulin curve. Micro-boluses count
/// only when their midpoint falls within `(time - DIA, time]`.
///
/// An invalid override yields a zero result rather than an error.
pub fn temp_basal_iob(
    temp: &TempBasal,
    profile: &TherapyProfile,
    window: &DayWindow,
    sensitivity: Sensitivity,
    time: i64,
) -> IobTotal {
    let mut result = IobTotal::new(time);
    if !temp.valid {
        return result;
    }
    let real_duration_min =
        ((time.min(temp.end()) - temp.time) as f64 / MS_PER_MIN as f64).round() as i64;
    if real_duration_min <= 0 {
        return result;
    }

    let dia_ago = time - profile.curve.dia_ms();
    let sub_intervals = (real_duration_min as f64 / 5.0).ceil() as i64;
    let spacing_min = real_duration_min as f64 / sub_intervals as f64;

    let mut net_amount = 0.0;
    for j in 0..sub_intervals {
        // midpoint of the sub-interval
        let calc_time = temp.time
            + (j as f64 * spacing_min * MS_PER_MIN as f64 + 0.5 * spacing_min * MS_PER_MIN as f64)
                as i64;
        let scheduled = profile.basal_at_hour(window.hour_of(calc_time));
        let net_rate = temp.absolute_rate(scheduled) - scheduled * sensitivity.ratio;
        let micro_bolus = net_rate * spacing_min / 60.0;
        net_amount += micro_bolus;
        if calc_time > dia_ago && calc_time <= time {
            let elapsed = (time - calc_time) as f64 / MS_PER_MIN as f64;
            let fractions = profile.curve.fractions(elapsed);
            result.basal_iob += micro_bolus * fractions.iob;
            result.activity += micro_bolus * fractions.activity;
            result.net_basal_insulin += micro_bolus;
            if micro_bolus > 0.0 {
                result.high_temp_insulin += micro_bolus;
            }
        }
    }
    result.net_insulin = net_amount;
    result
}

/// IOB contribution of one event at `time`
pub fn event_iob(
    event: &TherapyEvent,
    profile: &TherapyProfile,
    window: &DayWindow,
    sensitivity: Sensitivity,
    time: i64,
) -> IobTotal {
    match event {
        TherapyEvent::Bolus(bolus) => bolus_iob(bolus, profile, time),
        TherapyEvent::TempBasal(temp) => temp_basal_iob(temp, profile, window, sensitivity, time),
        TherapyEvent::ExtendedBolus(extended) => {
            temp_basal_iob(&extended.as_temp_basal(), profile, window, sensitivity, time)
        }
    }
}

/// Total IOB over all events at `time`, accumulated in event order.
///
/// Equals the sum of [event_iob] results over the same list; the per-event
/// accumulation order is fixed so totals reproduce bit-for-bit.
pub fn total_iob(
    events: &[TherapyEvent],
    profile: &TherapyProfile,
    window: &DayWindow,
    sensitivity: Sensitivity,
    time: i64,
) -> IobTotal {
    events.iter().fold(IobTotal::new(time), |acc, event| {
        acc.plus(&event_iob(event, profile, window, sensitivity, time))
    })
}
