//! Parsing and evaluation of job cron expressions.
//!
//! Expressions use the Unix 5-field form (minute, hour, day-of-month, month,
//! day-of-week) or a 6-field form with a leading seconds field. Evaluation is
//! delegated to the [`cron`] crate in the scheduler's configured timezone;
//! this module normalizes the Unix conventions the underlying crate does not
//! share: a defaulted seconds field, 0-6 day-of-week numbering with Sunday as
//! 0, and the Vixie rule that a restricted day-of-month and a restricted
//! day-of-week are combined with OR rather than AND.

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use thiserror::Error;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Error)]
pub enum CronError {
    #[error("cron expression must have 5 or 6 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid day-of-week field `{0}`: values must be 0-6 (0 = Sunday)")]
    DayOfWeek(String),
    #[error("invalid cron expression: {0}")]
    Syntax(String),
}

/// A validated cron expression bound to an evaluation timezone.
#[derive(Debug, Clone)]
pub struct CronExpression {
    raw: String,
    // Two schedules when both day fields are restricted, see `parse`.
    schedules: Vec<Schedule>,
    tz: Tz,
}

impl CronExpression {
    /// Parses a 5- or 6-field cron expression.
    ///
    /// With 5 fields the seconds field defaults to 0, so the expression fires
    /// once per matching minute.
    pub fn parse(text: &str, tz: Tz) -> Result<Self, CronError> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        let fields: Vec<String> = match fields.len() {
            5 => std::iter::once("0")
                .chain(fields)
                .map(str::to_owned)
                .collect(),
            6 => fields.into_iter().map(str::to_owned).collect(),
            n => return Err(CronError::FieldCount(n)),
        };

        let day_of_week = rewrite_day_of_week(&fields[5])?;

        let build = |day_of_month: &str, day_of_week: &str| -> Result<Schedule, CronError> {
            let expr = format!(
                "{} {} {} {} {} {}",
                fields[0], fields[1], fields[2], day_of_month, fields[4], day_of_week
            );
            Schedule::from_str(&expr).map_err(|err| CronError::Syntax(err.to_string()))
        };

        let schedules = if is_restricted(&fields[3]) && is_restricted(&fields[5]) {
            // Vixie semantics: when both day fields are restricted a match on
            // either one fires the job. The underlying crate requires both to
            // match, so evaluate the two restrictions as separate schedules.
            vec![build(&fields[3], "*")?, build("*", &day_of_week)?]
        } else {
            vec![build(&fields[3], &day_of_week)?]
        };

        Ok(Self {
            raw: text.to_owned(),
            schedules,
            tz,
        })
    }

    /// Returns the smallest instant strictly greater than `after` satisfying
    /// the expression, or `None` if no such instant exists.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.tz);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&local).next())
            .min()
            .map(|next| next.with_timezone(&Utc))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}

impl Display for CronExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

// The Vixie restriction rule keys off the leading `*`: `*/2` counts as
// unrestricted.
fn is_restricted(field: &str) -> bool {
    !field.starts_with('*') && field != "?"
}

fn invalid_day_of_week(field: &str) -> CronError {
    CronError::DayOfWeek(field.to_owned())
}

/// Rewrites a Unix day-of-week field (0-6, 0 = Sunday) to named days
/// understood unambiguously by the [`cron`] crate.
fn rewrite_day_of_week(field: &str) -> Result<String, CronError> {
    if field == "*" || field == "?" {
        return Ok("*".to_owned());
    }
    let parse_day = |token: &str| -> Result<u8, CronError> {
        token
            .parse::<u8>()
            .ok()
            .filter(|day| *day <= 6)
            .ok_or_else(|| invalid_day_of_week(field))
    };

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|step| *step > 0)
                    .ok_or_else(|| invalid_day_of_week(field))?;
                (range, step)
            }
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (0, 6)
        } else {
            match range.split_once('-') {
                Some((lo, hi)) => (parse_day(lo)?, parse_day(hi)?),
                None => {
                    let day = parse_day(range)?;
                    (day, day)
                }
            }
        };
        if lo > hi {
            return Err(invalid_day_of_week(field));
        }
        days.extend((lo..=hi).step_by(step));
    }

    if days.len() == 7 {
        Ok("*".to_owned())
    } else {
        Ok(days
            .iter()
            .map(|day| DAY_NAMES[*day as usize])
            .collect::<Vec<_>>()
            .join(","))
    }
}
