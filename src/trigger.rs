//! Reminder triggers: one-shot date-times and daily times of day
//!
//! Stored form is `YYYY-MM-DD HH:MM` (one-shot) or `HH:MM` (daily). User input
//! additionally accepts `<Weekday> HH:MM`, resolved to the next such day.

use crate::error::{Error, Result};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TIME_FORMAT: &str = "%H:%M";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub const WEEKDAYS: &[(&str, Weekday)] = &[
    ("Mon", Weekday::Mon),
    ("Tue", Weekday::Tue),
    ("Wed", Weekday::Wed),
    ("Thu", Weekday::Thu),
    ("Fri", Weekday::Fri),
    ("Sat", Weekday::Sat),
    ("Sun", Weekday::Sun),
];

static TIME_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,2}:\d{1,2}$").expect("Invalid time regex"));

static DATE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("Invalid date regex"));

/// When a reminder fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Trigger {
    /// Fires once, at this local date and minute
    Once(NaiveDateTime),
    /// Fires every day at this local minute
    Daily(NaiveTime),
}

impl Trigger {
    pub fn is_recurring(&self) -> bool {
        matches!(self, Trigger::Daily(_))
    }

    /// True if `now` (local, any seconds) falls in this trigger's minute
    pub fn matches(&self, now: NaiveDateTime) -> bool {
        let now = truncate_to_minute(now);
        match self {
            Trigger::Once(at) => *at == now,
            Trigger::Daily(time) => *time == now.time(),
        }
    }

    /// Parse the user-facing trigger prefix of `args` and return it with the remaining message.
    ///
    /// `now` is the current local time, used to resolve weekday names and to
    /// reject absolute dates that have already passed.
    pub fn parse_command_args(args: &str, now: NaiveDateTime) -> Result<(Trigger, String)> {
        let args = args.trim();
        let (first, rest) = split_token(args);
        if first.is_empty() {
            return Err(Error::Validation("missing time".to_string()));
        }

        let (trigger, message) = if let Some(weekday) = parse_weekday(first) {
            let (time_token, message) = split_token(rest);
            let time = parse_time(time_token)?;
            (Trigger::Once(next_weekday_at(now, weekday, time)), message)
        } else if DATE_TOKEN.is_match(first) {
            let date = NaiveDate::parse_from_str(first, DATE_FORMAT)
                .map_err(|e| Error::Validation(format!("invalid date '{}': {}", first, e)))?;
            let (time_token, message) = split_token(rest);
            let at = date.and_time(parse_time(time_token)?);
            if at < truncate_to_minute(now) {
                return Err(Error::Validation(format!(
                    "{} is already in the past",
                    at.format("%Y-%m-%d %H:%M")
                )));
            }
            (Trigger::Once(at), message)
        } else if TIME_TOKEN.is_match(first) {
            (Trigger::Daily(parse_time(first)?), rest)
        } else {
            return Err(Error::Validation(format!(
                "'{}' is not a time, date or weekday",
                first
            )));
        };

        let message = message.trim();
        if message.is_empty() {
            return Err(Error::Validation("missing reminder message".to_string()));
        }
        Ok((trigger, message.to_string()))
    }

    /// Whether the leading token of `text` looks like the start of a trigger
    pub fn starts_trigger(text: &str) -> bool {
        let (first, _) = split_token(text.trim());
        parse_weekday(first).is_some() || TIME_TOKEN.is_match(first) || DATE_TOKEN.is_match(first)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Once(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M")),
            Trigger::Daily(time) => write!(f, "{}", time.format(TIME_FORMAT)),
        }
    }
}

impl FromStr for Trigger {
    type Err = Error;

    /// Parse the stored form
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        match s.split_once(' ') {
            Some((date, time)) => {
                let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
                    .map_err(|e| Error::Validation(format!("invalid date '{}': {}", date, e)))?;
                Ok(Trigger::Once(date.and_time(parse_time(time.trim())?)))
            }
            None => Ok(Trigger::Daily(parse_time(s)?)),
        }
    }
}

impl TryFrom<String> for Trigger {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Trigger> for String {
    fn from(trigger: Trigger) -> Self {
        trigger.to_string()
    }
}

pub fn truncate_to_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0)
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

fn parse_time(token: &str) -> Result<NaiveTime> {
    if !TIME_TOKEN.is_match(token) {
        return Err(Error::Validation(format!(
            "invalid time '{}', expected HH:MM",
            token
        )));
    }
    NaiveTime::parse_from_str(token, TIME_FORMAT)
        .map_err(|e| Error::Validation(format!("invalid time '{}': {}", token, e)))
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    WEEKDAYS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(token))
        .map(|(_, day)| *day)
}

/// Next date falling on `weekday` at `time`; today only if that minute is still ahead.
fn next_weekday_at(now: NaiveDateTime, weekday: Weekday, time: NaiveTime) -> NaiveDateTime {
    let today = now.date();
    let days_ahead = (7 + weekday.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        % 7;
    let candidate = (today + Duration::days(days_ahead)).and_time(time);
    if candidate < truncate_to_minute(now) {
        candidate + Duration::days(7)
    } else {
        candidate
    }
}

fn split_token(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim_start()),
        None => (s, ""),
    }
}
