//! Time-of-day classification

use chrono::{NaiveTime, Timelike};

use crate::config::LateNightWindow;
use crate::types::TimeContext;

/// Whether a local hour falls inside the late-night window.
///
/// Windows with `start_hour > end_hour` span two calendar days (22 -> 2 covers
/// 22:00-01:59); otherwise the window is a plain same-day range.
pub fn is_late_night_hour(hour: u32, window: &LateNightWindow) -> bool {
    let (start, end) = (window.start_hour, window.end_hour);
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Classify a transaction time. Missing times are `Unknown`, which every detector
/// treats as daytime.
pub fn classify_time(time: Option<NaiveTime>, window: &LateNightWindow) -> TimeContext {
    match time {
        Some(t) if is_late_night_hour(t.hour(), window) => TimeContext::LateNight,
        Some(_) => TimeContext::Daytime,
        None => TimeContext::Unknown,
    }
}

/// Minutes since local midnight
pub fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}
