use std::{collections::BTreeSet, str::FromStr};

use chrono::{Datelike, NaiveDate};

use super::buckets::iso_weekday;
use crate::{db::models::DateRange, error::ValidationError};

pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;

/// `YYYY-MM-DD`, with the year inside `MIN_YEAR..=MAX_YEAR` so week and
/// month arithmetic around the date cannot leave chrono's range.
pub fn parse_date(field: &'static str, raw: &str) -> Result<NaiveDate, ValidationError> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::parameter(field, raw, "expected YYYY-MM-DD"))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
        return Err(ValidationError::parameter(field, raw, "year out of range"));
    }
    Ok(date)
}

pub fn parse_year(raw: &str) -> Result<i32, ValidationError> {
    let year: i32 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::parameter("year", raw, "not a number"))?;
    check_year(year)
}

pub fn check_year(year: i32) -> Result<i32, ValidationError> {
    if (MIN_YEAR..=MAX_YEAR).contains(&year) {
        Ok(year)
    } else {
        Err(ValidationError::parameter("year", year.to_string(), "out of range"))
    }
}

pub fn parse_month(raw: &str) -> Result<u32, ValidationError> {
    let month: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::parameter("month", raw, "not a number"))?;
    check_month(month)
}

pub fn check_month(month: u32) -> Result<u32, ValidationError> {
    if (1..=12).contains(&month) {
        Ok(month)
    } else {
        Err(ValidationError::parameter("month", month.to_string(), "must be 1-12"))
    }
}

/// Week of a month, 1-based; a month spans at most five of them.
pub fn parse_week_of_month(raw: &str) -> Result<u32, ValidationError> {
    let week: u32 = raw
        .trim()
        .parse()
        .map_err(|_| ValidationError::parameter("week", raw, "not a number"))?;
    if (1..=5).contains(&week) {
        Ok(week)
    } else {
        Err(ValidationError::parameter("week", raw, "must be 1-5"))
    }
}

/// Optional `from`/`to` query bounds.
pub fn parse_range(from: Option<&str>, to: Option<&str>) -> Result<DateRange, ValidationError> {
    let range = DateRange {
        from: from.map(|s| parse_date("from", s)).transpose()?,
        to: to.map(|s| parse_date("to", s)).transpose()?,
    };
    check_range(range)
}

pub fn check_range(range: DateRange) -> Result<DateRange, ValidationError> {
    match (range.from, range.to) {
        (Some(from), Some(to)) if from > to => Err(ValidationError::parameter(
            "from",
            from.to_string(),
            "must not be after 'to'",
        )),
        _ => Ok(range),
    }
}

// ---------------------------------------------------------------------------
// WeekdaySet
// ---------------------------------------------------------------------------

/// A set of ISO days of the week (1 = Monday … 7 = Sunday).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeekdaySet(BTreeSet<u32>);

impl WeekdaySet {
    pub fn weekend() -> Self {
        Self([6, 7].into_iter().collect())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.0.contains(&iso_weekday(date))
    }

    pub fn days(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }
}

/// Accepts ISO numbers (`6,7`), English day names or prefixes (`sat,sun`),
/// and the shorthands `weekend` and `weekdays`.
impl FromStr for WeekdaySet {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, ValidationError> {
        let mut days = BTreeSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let lower = part.to_ascii_lowercase();
            match lower.as_str() {
                "weekend" => days.extend([6, 7]),
                "weekdays" => days.extend(1..=5),
                _ => {
                    let day = lower
                        .parse::<u32>()
                        .ok()
                        .filter(|d| (1..=7).contains(d))
                        .or_else(|| day_from_name(&lower))
                        .ok_or_else(|| {
                            ValidationError::parameter(
                                "days",
                                part,
                                "expected 1-7 (Monday=1) or a day name",
                            )
                        })?;
                    days.insert(day);
                }
            }
        }
        if days.is_empty() {
            return Err(ValidationError::parameter("days", s, "no day given"));
        }
        Ok(Self(days))
    }
}

fn day_from_name(name: &str) -> Option<u32> {
    const NAMES: [&str; 7] = [
        "monday",
        "tuesday",
        "wednesday",
        "thursday",
        "friday",
        "saturday",
        "sunday",
    ];
    if name.len() < 3 {
        return None;
    }
    NAMES
        .iter()
        .position(|full| full.starts_with(name))
        .map(|i| i as u32 + 1)
}
