//! Eligibility policy document.
//!
//! A [`Policy`] lists the roles allowed to be tracked, a working window per
//! weekday, and a holiday calendar. Weekdays without a window are
//! non-working days. Times of day are written `"HH:MM"`; `"9:00"` is
//! accepted and `"24:00"` means end of day.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Minute of the day in `0..=1440`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// End of day (`24:00`).
    pub const END_OF_DAY: Self = Self(MINUTES_PER_DAY);

    #[must_use]
    pub fn hm(hour: u8, minute: u8) -> Option<Self> {
        let total = u16::from(hour) * 60 + u16::from(minute);
        (minute < 60 && total <= MINUTES_PER_DAY).then_some(Self(total))
    }

    #[must_use]
    pub fn minutes(self) -> u16 {
        self.0
    }

    #[must_use]
    pub fn of(time: NaiveTime) -> Self {
        // `hour() <= 23` and `minute() <= 59`, so this never exceeds 1439.
        Self((time.hour() * 60 + time.minute()) as u16)
    }
}

/// Error returned when a time-of-day string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeOfDayParseError(pub String);

impl fmt::Display for TimeOfDayParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day: {:?} (expected HH:MM)", self.0)
    }
}

impl std::error::Error for TimeOfDayParseError {}

impl FromStr for TimeOfDay {
    type Err = TimeOfDayParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = || TimeOfDayParseError(s.to_owned());
        let (h, m) = trimmed.split_once(':').ok_or_else(err)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(err());
        }
        let hour: u8 = h.parse().map_err(|_| err())?;
        let minute: u8 = m.parse().map_err(|_| err())?;
        if hour == 24 && minute != 0 {
            return Err(err());
        }
        Self::hm(hour, minute).ok_or_else(err)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = TimeOfDayParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Half-open window `[start, end)` within one day.
///
/// A window whose end precedes its start wraps past midnight
/// (e.g. a night shift `22:00`–`06:00`). Equal bounds describe an empty window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingWindow {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl WorkingWindow {
    #[must_use]
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        let now = TimeOfDay::of(time);
        if self.start <= self.end {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }
}

/// The window that applies on one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingDay {
    pub day: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

/// Remote eligibility policy, cached locally with a freshness stamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Lower-case role names allowed to be tracked.
    pub authorized_roles: BTreeSet<String>,
    /// Working window per weekday; missing weekdays are days off.
    #[serde(default)]
    pub working_days: Vec<WorkingDay>,
    /// Dates on which nobody is tracked.
    #[serde(default)]
    pub holidays: BTreeSet<NaiveDate>,
    /// When this copy was fetched. Stamped by the cache, not the provider.
    #[serde(default)]
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Default for Policy {
    fn default() -> Self {
        let nine = TimeOfDay(9 * 60);
        let five = TimeOfDay(17 * 60);
        Self {
            authorized_roles: ["staff", "faculty", "admin"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            working_days: [
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ]
            .into_iter()
            .map(|day| WorkingDay {
                day,
                start: nine,
                end: five,
            })
            .collect(),
            holidays: BTreeSet::new(),
            refreshed_at: None,
        }
    }
}

impl Policy {
    /// Policy with the given roles and no working days or holidays.
    #[must_use]
    pub fn for_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            authorized_roles: roles
                .into_iter()
                .map(|r| r.as_ref().trim().to_ascii_lowercase())
                .collect(),
            working_days: Vec::new(),
            holidays: BTreeSet::new(),
            refreshed_at: None,
        }
    }

    /// Set the same window on each of `days`, replacing existing entries.
    #[must_use]
    pub fn with_window(mut self, days: &[Weekday], start: TimeOfDay, end: TimeOfDay) -> Self {
        self.working_days.retain(|wd| !days.contains(&wd.day));
        self.working_days
            .extend(days.iter().map(|&day| WorkingDay { day, start, end }));
        self
    }

    #[must_use]
    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.holidays.insert(date);
        self
    }

    #[must_use]
    pub fn authorizes(&self, role: &str) -> bool {
        self.authorized_roles
            .contains(&role.trim().to_ascii_lowercase())
    }

    /// The window for `day`, or `None` on a day off.
    #[must_use]
    pub fn working_window(&self, day: Weekday) -> Option<WorkingWindow> {
        self.working_days
            .iter()
            .find(|wd| wd.day == day)
            .map(|wd| WorkingWindow::new(wd.start, wd.end))
    }

    #[must_use]
    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }

    /// A policy never stamped, or stamped more than `ttl` ago, is stale.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        match self.refreshed_at {
            None => true,
            Some(at) => crate::clock::elapsed(at, now) >= ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn time_of_day_accepts_single_digit_hour() {
        assert_eq!(t("9:00"), TimeOfDay::hm(9, 0).unwrap());
        assert_eq!(t(" 09:30 ").to_string(), "09:30");
    }

    #[test]
    fn time_of_day_24_00_is_end_of_day() {
        assert_eq!(t("24:00"), TimeOfDay::END_OF_DAY);
        assert!("24:01".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn time_of_day_rejects_garbage() {
        for raw in ["", "9", "09:5", "25:00", "12:60", "ab:cd", "123:00"] {
            assert!(raw.parse::<TimeOfDay>().is_err(), "{raw} should not parse");
        }
    }

    #[test]
    fn window_is_half_open() {
        let window = WorkingWindow::new(t("09:00"), t("17:00"));
        assert!(!window.contains(at(8, 59, 59)));
        assert!(window.contains(at(9, 0, 0)));
        assert!(window.contains(at(16, 59, 59)));
        assert!(!window.contains(at(17, 0, 0)));
    }

    #[test]
    fn window_until_end_of_day_includes_last_minute() {
        let window = WorkingWindow::new(t("18:00"), t("24:00"));
        assert!(window.contains(at(23, 59, 59)));
        assert!(!window.contains(at(0, 0, 0)));
    }

    #[test]
    fn wrapping_window_spans_midnight() {
        let window = WorkingWindow::new(t("22:00"), t("06:00"));
        assert!(window.contains(at(23, 0, 0)));
        assert!(window.contains(at(5, 59, 0)));
        assert!(!window.contains(at(6, 0, 0)));
        assert!(!window.contains(at(12, 0, 0)));
    }

    #[test]
    fn default_policy_is_weekdays_nine_to_five() {
        let policy = Policy::default();
        assert!(policy.authorizes("Staff"));
        assert!(!policy.authorizes("student"));
        assert!(policy.working_window(Weekday::Mon).is_some());
        assert!(policy.working_window(Weekday::Sat).is_none());
    }

    #[test]
    fn policy_json_round_trip_uses_camel_case() {
        let policy = Policy::for_roles(["staff"])
            .with_window(&[Weekday::Mon], t("08:30"), t("16:30"))
            .with_holiday(NaiveDate::from_ymd_opt(2025, 8, 15).unwrap());
        let json = serde_json::to_value(&policy).unwrap();
        assert!(json.get("authorizedRoles").is_some());
        assert_eq!(json["workingDays"][0]["start"], "08:30");

        let restored: Policy = serde_json::from_value(json).unwrap();
        assert_eq!(restored, policy);
    }

    #[test]
    fn unstamped_policy_is_stale() {
        let policy = Policy::default();
        assert!(policy.is_stale(Utc::now(), std::time::Duration::from_secs(300)));
    }
}
