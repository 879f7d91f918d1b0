//! Cron schedules for known tasks.
//!
//! Accepts standard 5-field Unix expressions (minute hour dom month dow), which
//! fire at second 0, as well as the 6-field (with seconds) and 7-field (with
//! year) forms understood by the `cron` crate. Only the 5-field form uses
//! Unix day-of-week numbers (Sunday is 0 or 7); the longer forms keep the
//! crate's 1-7 numbering.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::types::Task;

fn normalize_cron_expr(cron_expr: &str) -> Result<String, String> {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Ok(fields.join(" "));
    }

    let weekdays = unix_weekdays(fields[4])?;
    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], weekdays
    ))
}

/// Rewrites a Unix day-of-week field (0-7, Sunday is 0 or 7) into the
/// `cron` crate numbering (1-7, Sunday is 1). Named days already mean the
/// same thing in both dialects and pass through.
fn unix_weekdays(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = [false; 7];
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (range, Some(step)),
                _ => return Err(format!("invalid day-of-week step '{}'", item)),
            },
            None => (item, None),
        };

        let (start, end) = match (range, range.split_once('-')) {
            ("*", _) => (0, 6),
            (_, Some((start, end))) => (weekday(start)?, weekday(end)?),
            // `n/step` runs from n to the end of the week
            (_, None) => {
                let day = weekday(range)?;
                (day, if step.is_some() { 6 } else { day })
            }
        };
        if start > end {
            return Err(format!("invalid day-of-week range '{}'", item));
        }

        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days[day % 7] = true;
        }
    }

    Ok(days
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(day, _)| (day + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn weekday(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day of week '{}'", value)),
    }
}

pub fn parse_cron_expr(cron_expr: &str) -> JobResult<Schedule> {
    normalize_cron_expr(cron_expr)
        .and_then(|expr| Schedule::from_str(&expr).map_err(|e| e.to_string()))
        .map_err(|e| JobError::InvalidCronExpression(format!("'{}': {}", cron_expr, e)))
}

/// Parsed schedule of one task plus its next fire time.
#[derive(Debug, Clone)]
pub struct Plan {
    pub task: Task,
    schedule: Schedule,
    pub next_time: DateTime<Utc>,
}

impl Plan {
    pub fn build(task: Task, now: DateTime<Utc>) -> JobResult<Self> {
        let schedule = parse_cron_expr(&task.cron_expr)?;
        let next_time = schedule
            .after(&now)
            .next()
            .ok_or_else(|| JobError::ScheduleExhausted(task.cron_expr.clone()))?;

        Ok(Self {
            task,
            schedule,
            next_time,
        })
    }

    /// Equality fires.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_time <= now
    }

    /// Moves the fire time to the first occurrence strictly after `now`.
    /// Returns false when the schedule has no further occurrence.
    pub fn advance(&mut self, now: DateTime<Utc>) -> bool {
        match self.schedule.after(&now).next() {
            Some(next) => {
                self.next_time = next;
                true
            }
            None => false,
        }
    }
}
