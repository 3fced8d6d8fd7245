//! Next fire times for schedule presets

use crate::config::{SchedulePreset, SchedulerConfig};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

/// Wall-clock rule for calendar presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    Daily,
    /// ISO weekday, 1 = Monday
    Weekly(u32),
    /// Day of month
    Monthly(u32),
}

impl Calendar {
    fn matches(&self, date: NaiveDate) -> bool {
        match *self {
            Self::Daily => true,
            Self::Weekly(weekday) => date.weekday().number_from_monday() == weekday,
            Self::Monthly(day) => date.day() == day,
        }
    }
}

/// Fixed interval of the interval presets, `None` for calendar presets
pub fn interval(preset: SchedulePreset) -> Option<Duration> {
    match preset {
        SchedulePreset::Hourly => Some(Duration::hours(1)),
        SchedulePreset::TwoHourly => Some(Duration::hours(2)),
        SchedulePreset::FourHourly => Some(Duration::hours(4)),
        SchedulePreset::Daily | SchedulePreset::Weekly | SchedulePreset::Monthly => None,
    }
}

fn offset(config: &SchedulerConfig) -> FixedOffset {
    FixedOffset::east_opt(config.utc_offset_hours * 3600).unwrap_or(Utc.fix())
}

/// First instant strictly after `after` falling on `hour:minute` local time
/// of a day matching `calendar`
pub fn next_calendar(
    calendar: Calendar,
    after: DateTime<Utc>,
    hour: u32,
    minute: u32,
    offset: FixedOffset,
) -> DateTime<Utc> {
    let mut date = after.with_timezone(&offset).date_naive();
    // Monthly rules match at least once every 31 days
    for _ in 0..=62 {
        if calendar.matches(date) {
            let candidate = date
                .and_hms_opt(hour, minute, 0)
                .and_then(|naive| offset.from_local_datetime(&naive).single())
                .map(|local| local.with_timezone(&Utc));
            if let Some(candidate) = candidate.filter(|c| *c > after) {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    after + Duration::days(1)
}

/// Next firing of `preset` after `after`, before jitter
pub fn next_fire(preset: SchedulePreset, after: DateTime<Utc>, config: &SchedulerConfig) -> DateTime<Utc> {
    if let Some(every) = interval(preset) {
        return after + every;
    }
    let calendar = match preset {
        SchedulePreset::Weekly => Calendar::Weekly(config.weekly_weekday),
        SchedulePreset::Monthly => Calendar::Monthly(config.monthly_day),
        _ => Calendar::Daily,
    };
    next_calendar(calendar, after, config.daily_hour, 0, offset(config))
}

/// Next daily pipeline run
pub fn next_pipeline_run(
    after: DateTime<Utc>,
    hour: u32,
    minute: u32,
    config: &SchedulerConfig,
) -> DateTime<Utc> {
    next_calendar(Calendar::Daily, after, hour, minute, offset(config))
}

/// Random delay in `0..=max_seconds`
pub fn jitter(max_seconds: u64) -> Duration {
    if max_seconds == 0 {
        return Duration::zero();
    }
    let millis = rand::random_range(0..=max_seconds.saturating_mul(1000));
    Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
}
