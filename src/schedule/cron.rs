//! Cron expressions selecting the instants a backup is started.
//!
//! Both the classic 5-field form and the 6-field form with a leading
//! seconds column are understood:
//!
//! ```text
//! ┌───────────── second (0-59, optional)
//! │ ┌───────────── minute (0-59)
//! │ │ ┌───────────── hour (0-23)
//! │ │ │ ┌───────────── day of month (1-31)
//! │ │ │ │ ┌───────────── month (1-12 or jan-dec)
//! │ │ │ │ │ ┌───────────── day of week (0-7 or sun-sat, 0 and 7 are Sunday)
//! │ │ │ │ │ │
//! * * * * * *
//! ```
//!
//! Day of month and day of week follow Vixie cron: if both columns are
//! restricted, a day matching either of them fires (`0 0 1 * mon` runs on the
//! 1st and on every Monday). A column starting with `*` (such as `*/2`)
//! counts as unrestricted. node-cron differs here and requires both columns
//! to match.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use derive_more::{Display, Error};

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Upper bound for the search of the next matching instant.
const SEARCH_YEARS: i32 = 5;

/// Errors on parsing a [CronSchedule].
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum CronParseError {
    /// Neither 5 nor 6 whitespace separated fields.
    #[display("cron expression needs 5 or 6 fields, got {_0}")]
    FieldCount(#[error(ignore)] usize),
    /// A value that is neither a number nor a known name.
    #[display("invalid value '{value}' in {field} field")]
    InvalidValue {
        field: &'static str,
        value: String,
    },
    /// A number outside of the range of its field.
    #[display("{value} is out of range [{min}, {max}] in {field} field")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
    /// A range whose start lies behind its end.
    #[display("inverted range {start}-{end} in {field} field")]
    InvertedRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
    /// A step that is zero or not a number.
    #[display("invalid step '{step}' in {field} field")]
    InvalidStep {
        field: &'static str,
        step: String,
    },
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Offset added to the index of `names` to get the numeric value.
    names_base: u32,
}

const SECOND: FieldSpec = FieldSpec {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    names_base: 0,
};
const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_base: 0,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_base: 0,
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day of month",
    min: 1,
    max: 31,
    names: &[],
    names_base: 0,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    names_base: 1,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day of week",
    min: 0,
    max: 7,
    names: &WEEKDAY_NAMES,
    names_base: 0,
};

/// The set of values a single column of the expression allows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    values: BTreeSet<u32>,
    /// `false` if the column starts with `*` or is `?`.
    restricted: bool,
}

impl Field {
    fn parse(expr: &str, kind: FieldSpec) -> Result<Self, CronParseError> {
        let mut values = BTreeSet::new();
        for part in expr.split(',') {
            parse_part(part, kind, &mut values)?;
        }

        Ok(Self {
            values,
            restricted: !expr.starts_with('*') && expr != "?",
        })
    }

    fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    /// Smallest allowed value `>= value`.
    fn next_from(&self, value: u32) -> Option<u32> {
        self.values.range(value..).next().copied()
    }
}

fn parse_part(
    part: &str,
    kind: FieldSpec,
    values: &mut BTreeSet<u32>,
) -> Result<(), CronParseError> {
    let (range, step) = match part.split_once('/') {
        Some((range, step_str)) => {
            let step = step_str
                .parse::<u32>()
                .ok()
                .filter(|step| *step > 0)
                .ok_or_else(|| CronParseError::InvalidStep {
                    field: kind.name,
                    step: step_str.to_string(),
                })?;
            (range, Some(step))
        }
        None => (part, None),
    };

    let (start, end) = if range == "*" || range == "?" {
        (kind.min, kind.max)
    } else if let Some((start, end)) = range.split_once('-') {
        let start = parse_value(start, kind)?;
        let end = parse_value(end, kind)?;
        if start > end {
            return Err(CronParseError::InvertedRange {
                field: kind.name,
                start,
                end,
            });
        }
        (start, end)
    } else {
        let value = parse_value(range, kind)?;
        // `a/n` runs from `a` to the end of the field
        match step {
            Some(_) => (value, kind.max),
            None => (value, value),
        }
    };

    let step = step.unwrap_or(1) as usize;
    for value in (start..=end).step_by(step) {
        values.insert(value);
    }

    Ok(())
}

fn parse_value(value: &str, kind: FieldSpec) -> Result<u32, CronParseError> {
    let lower = value.to_ascii_lowercase();
    let parsed = match kind.names.iter().position(|name| *name == lower) {
        Some(idx) => idx as u32 + kind.names_base,
        None => value.parse().map_err(|_| CronParseError::InvalidValue {
            field: kind.name,
            value: value.to_string(),
        })?,
    };

    if parsed < kind.min || parsed > kind.max {
        return Err(CronParseError::OutOfRange {
            field: kind.name,
            value: parsed,
            min: kind.min,
            max: kind.max,
        });
    }

    Ok(parsed)
}

/// A parsed cron expression.
///
/// Evaluation happens on naive (wall clock) date-times; mapping them onto a
/// time zone is up to the [Scheduler](super::Scheduler).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    second: Field,
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronSchedule {
    /// Parse a 5 or 6 field cron expression.
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let (second, rest) = match fields.len() {
            5 => ("0", &fields[..]),
            6 => (fields[0], &fields[1..]),
            n => return Err(CronParseError::FieldCount(n)),
        };

        let mut day_of_week = Field::parse(rest[4], DAY_OF_WEEK)?;
        if day_of_week.values.remove(&7) {
            day_of_week.values.insert(0);
        }

        Ok(Self {
            expr: expr.trim().to_string(),
            second: Field::parse(second, SECOND)?,
            minute: Field::parse(rest[0], MINUTE)?,
            hour: Field::parse(rest[1], HOUR)?,
            day_of_month: Field::parse(rest[2], DAY_OF_MONTH)?,
            month: Field::parse(rest[3], MONTH)?,
            day_of_week,
        })
    }

    /// The expression as it was written.
    pub fn expr(&self) -> &str {
        &self.expr
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        if !self.month.contains(date.month()) {
            return false;
        }

        let dom = self.day_of_month.contains(date.day());
        let dow = self
            .day_of_week
            .contains(date.weekday().num_days_from_sunday());

        // classic cron: two restricted day columns are OR-ed
        if self.day_of_month.restricted && self.day_of_week.restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// Returns if `dt` (truncated to seconds) is a fire time.
    pub fn matches(&self, dt: NaiveDateTime) -> bool {
        self.matches_day(dt.date())
            && self.hour.contains(dt.hour())
            && self.minute.contains(dt.minute())
            && self.second.contains(dt.second())
    }

    /// First fire time strictly after `after`.
    ///
    /// Returns [None] if the expression can't match within the next years,
    /// e.g. `0 0 30 2 *`.
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let start = after.with_nanosecond(0)? + Duration::seconds(1);
        let limit = NaiveDate::from_ymd_opt(start.year() + SEARCH_YEARS, 12, 31)?;

        let mut date = start.date();
        let mut time = start.time();
        while date <= limit {
            if self.matches_day(date) {
                if let Some(time) = self.first_time_from(time) {
                    return Some(date.and_time(time));
                }
            }
            date = date.succ_opt()?;
            time = NaiveTime::MIN;
        }

        None
    }

    /// Earliest matching time of day `>= from`.
    fn first_time_from(&self, from: NaiveTime) -> Option<NaiveTime> {
        for hour in self.hour.values.range(from.hour()..) {
            let minute_from = if *hour == from.hour() { from.minute() } else { 0 };
            for minute in self.minute.values.range(minute_from..) {
                let second_from = if *hour == from.hour() && *minute == from.minute() {
                    from.second()
                } else {
                    0
                };
                if let Some(second) = self.second.next_from(second_from) {
                    return NaiveTime::from_hms_opt(*hour, *minute, second);
                }
            }
        }

        None
    }
}

impl FromStr for CronSchedule {
    type Err = CronParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn midnight_fires_next_day() {
        let cron = CronSchedule::parse("0 0 * * *").unwrap();
        let next = cron.next_after(at(2024, 3, 6, 14, 30, 12)).unwrap();
        assert_eq!(next, at(2024, 3, 7, 0, 0, 0));
    }

    #[test]
    fn next_is_strictly_after() {
        let cron = CronSchedule::parse("0 0 * * *").unwrap();
        let midnight = at(2024, 3, 7, 0, 0, 0);
        assert!(cron.matches(midnight));
        assert_eq!(cron.next_after(midnight), Some(at(2024, 3, 8, 0, 0, 0)));
    }

    #[test]
    fn six_fields_have_seconds() {
        let cron = CronSchedule::parse("*/5 * * * * *").unwrap();
        assert_eq!(
            cron.next_after(at(2024, 1, 1, 10, 0, 3)),
            Some(at(2024, 1, 1, 10, 0, 5))
        );
        assert_eq!(
            cron.next_after(at(2024, 1, 1, 10, 0, 57)),
            Some(at(2024, 1, 1, 10, 1, 0))
        );
    }

    #[test]
    fn five_fields_fire_on_second_zero() {
        let cron = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(
            cron.next_after(at(2024, 1, 1, 10, 14, 59)),
            Some(at(2024, 1, 1, 10, 15, 0))
        );
        assert!(!cron.matches(at(2024, 1, 1, 10, 15, 1)));
    }

    #[test]
    fn lists_ranges_and_steps() {
        let cron = CronSchedule::parse("0 9-17/4,22 * * *").unwrap();
        let hours: Vec<_> = cron.hour.values.iter().copied().collect();
        assert_eq!(hours, vec![9, 13, 17, 22]);

        let cron = CronSchedule::parse("10/20 * * * *").unwrap();
        let minutes: Vec<_> = cron.minute.values.iter().copied().collect();
        assert_eq!(minutes, vec![10, 30, 50]);
    }

    #[test]
    fn names_and_sunday_seven() {
        let cron = CronSchedule::parse("30 4 * Jan-Mar sun").unwrap();
        let seven = CronSchedule::parse("30 4 * 1-3 7").unwrap();
        assert_eq!(cron.month, seven.month);
        assert_eq!(cron.day_of_week.values, seven.day_of_week.values);
        // 2024-01-07 is a Sunday
        assert!(cron.matches(at(2024, 1, 7, 4, 30, 0)));
        assert!(!cron.matches(at(2024, 1, 8, 4, 30, 0)));
    }

    #[test]
    fn restricted_day_columns_are_or_ed() {
        // the 1st of the month or any Monday
        let cron = CronSchedule::parse("0 0 1 * mon").unwrap();
        assert!(cron.matches(at(2024, 5, 1, 0, 0, 0))); // Wednesday the 1st
        assert!(cron.matches(at(2024, 5, 6, 0, 0, 0))); // Monday
        assert!(!cron.matches(at(2024, 5, 7, 0, 0, 0)));

        let weekdays_only = CronSchedule::parse("0 0 * * 1-5").unwrap();
        assert!(!weekdays_only.matches(at(2024, 5, 4, 0, 0, 0))); // Saturday
    }

    #[test]
    fn stepped_star_day_column_is_unrestricted() {
        // odd days of the month that are also Mondays
        let cron = CronSchedule::parse("0 0 */2 * mon").unwrap();
        assert!(cron.matches(at(2024, 5, 13, 0, 0, 0))); // Monday the 13th
        assert!(!cron.matches(at(2024, 5, 6, 0, 0, 0))); // Monday the 6th
        assert!(!cron.matches(at(2024, 5, 3, 0, 0, 0))); // Friday the 3rd

        let cron = CronSchedule::parse("0 0 1 * */3").unwrap();
        assert!(cron.matches(at(2024, 6, 1, 0, 0, 0))); // Saturday the 1st
        assert!(!cron.matches(at(2024, 4, 1, 0, 0, 0))); // Monday the 1st
        assert!(!cron.matches(at(2024, 5, 4, 0, 0, 0))); // Saturday the 4th
    }

    #[test]
    fn leap_day_is_found() {
        let cron = CronSchedule::parse("0 12 29 2 *").unwrap();
        assert_eq!(
            cron.next_after(at(2025, 1, 1, 0, 0, 0)),
            Some(at(2028, 2, 29, 12, 0, 0))
        );
    }

    #[test]
    fn impossible_date_never_fires() {
        let cron = CronSchedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(cron.next_after(at(2024, 1, 1, 0, 0, 0)), None);
    }

    #[test]
    fn invalid_expressions() {
        assert_eq!(
            CronSchedule::parse("* *"),
            Err(CronParseError::FieldCount(2))
        );
        assert!(matches!(
            CronSchedule::parse("60 * * * *"),
            Err(CronParseError::OutOfRange { value: 60, .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* 5-2 * * *"),
            Err(CronParseError::InvertedRange { start: 5, end: 2, .. })
        ));
        assert!(matches!(
            CronSchedule::parse("*/0 * * * *"),
            Err(CronParseError::InvalidStep { .. })
        ));
        assert!(matches!(
            CronSchedule::parse("* * * foo *"),
            Err(CronParseError::InvalidValue { .. })
        ));
    }
}
