use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::core::store::JobRecord;

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    Cron(Box<Schedule>),
    Interval(Duration),
    /// Runs only when asked to.
    OnDemand,
}

const SPECIALS: &[(&str, &str)] = &[
    ("@yearly", "0 0 0 1 1 *"),
    ("@annually", "0 0 0 1 1 *"),
    ("@monthly", "0 0 0 1 * *"),
    ("@weekly", "0 0 0 * * Sun"),
    ("@daily", "0 0 0 * * *"),
    ("@hourly", "0 0 * * * *"),
];

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Numeric weekdays follow the classic crontab convention (0 or 7 is
/// Sunday). They are rewritten to names so the parser cannot read them
/// with a different base.
fn weekday_field(field: &str) -> Result<String, String> {
    let name = |token: &str| -> Result<String, String> {
        match token.parse::<usize>() {
            Ok(n) if n < WEEKDAYS.len() => Ok(WEEKDAYS[n].to_string()),
            Ok(n) => Err(format!("day of week {} out of range 0-7", n)),
            Err(_) => Ok(token.to_string()),
        }
    };
    field
        .split(',')
        .map(|part| -> Result<String, String> {
            let (range, step) = match part.split_once('/') {
                Some((r, s)) => (r, Some(s)),
                None => (part, None),
            };
            let range = range
                .split('-')
                .map(&name)
                .collect::<Result<Vec<_>, _>>()?
                .join("-");
            Ok(match step {
                Some(s) => format!("{}/{}", range, s),
                None => range,
            })
        })
        .collect::<Result<Vec<_>, String>>()
        .map(|parts| parts.join(","))
}

/// Parse a 5-field crontab line, a 6-field line with seconds, or one of the
/// `@` shorthands. Five fields get an implicit `0` seconds field.
pub fn parse_cron(expr: &str) -> Result<Schedule, String> {
    let expr = expr.trim();
    if let Some((_, expanded)) = SPECIALS.iter().find(|(k, _)| k.eq_ignore_ascii_case(expr)) {
        return Schedule::from_str(expanded).map_err(|e| e.to_string());
    }
    if expr.starts_with('@') {
        return Err(format!("unknown cron shorthand '{}'", expr));
    }

    let mut fields: Vec<String> = expr.split_whitespace().map(str::to_string).collect();
    match fields.len() {
        5 => fields.insert(0, "0".to_string()),
        6 => {}
        n => {
            return Err(format!(
                "cron expression must have 5 or 6 fields, got {}",
                n
            ));
        }
    }
    fields[5] = weekday_field(&fields[5])?;
    Schedule::from_str(&fields.join(" ")).map_err(|e| format!("invalid cron expression: {}", e))
}

impl Trigger {
    pub fn from_parts(cron: Option<&str>, interval_seconds: Option<i64>) -> Result<Self, String> {
        match (cron, interval_seconds) {
            (Some(_), Some(_)) => {
                Err("a job takes either a cron expression or an interval, not both".into())
            }
            (Some(expr), None) => Ok(Trigger::Cron(Box::new(parse_cron(expr)?))),
            (None, Some(secs)) if secs > 0 => Ok(Trigger::Interval(Duration::seconds(secs))),
            (None, Some(_)) => Err("interval_seconds must be positive".into()),
            (None, None) => Ok(Trigger::OnDemand),
        }
    }

    pub fn for_job(job: &JobRecord) -> Result<Self, String> {
        Self::from_parts(job.cron_expression.as_deref(), job.interval_seconds)
    }

    /// Next fire time, measuring intervals from `anchor` when there is one.
    /// An interval that already elapsed fires at `now`.
    pub fn next_fire(
        &self,
        now: DateTime<Utc>,
        anchor: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Cron(schedule) => schedule.after(&now).next(),
            Trigger::Interval(every) => {
                let base = anchor.unwrap_or(now);
                Some((base + *every).max(now))
            }
            Trigger::OnDemand => None,
        }
    }
}
