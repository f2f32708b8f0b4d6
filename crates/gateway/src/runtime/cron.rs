//! Cron expression parser and evaluator.
//!
//! Supports the 5-field form (`min hour dom month dow`) and the 6-field
//! form with a leading seconds field, `@hourly`-style aliases, ranges,
//! steps, lists, month/weekday names, and the calendar specials `L`, `LW`,
//! `DW` (day field) and `L`, `N#K` (weekday field).
//!
//! `next_fire` uses the strictly-after convention: evaluation starts one
//! granule past the floored `from` instant, so an expression never fires
//! twice for the same minute. Parsed expressions are memoized by their
//! trimmed source string behind the [`CronParser`] handle.

use std::collections::HashMap;
use std::sync::Arc;

use ar_domain::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use parking_lot::Mutex;

const ALIASES: &[(&str, &str)] = &[
    ("@yearly", "0 0 1 1 *"),
    ("@annually", "0 0 1 1 *"),
    ("@monthly", "0 0 1 * *"),
    ("@weekly", "0 0 * * 0"),
    ("@daily", "0 0 * * *"),
    ("@midnight", "0 0 * * *"),
    ("@hourly", "0 * * * *"),
];

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Search horizon: an expression with no match within a year is invalid.
const HORIZON_DAYS: i64 = 366;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsed representation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Day-of-month field, including the calendar specials.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DaySpec {
    Values(Vec<u32>),
    /// `L` — last calendar day of the month.
    Last,
    /// `LW` — last weekday (Mon-Fri) of the month.
    LastWeekday,
    /// `DW` — nearest weekday to day D, clamped to the month.
    NearestWeekday(u32),
}

/// One item of a day-of-week field; list items evaluate independently.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WeekdayPart {
    Value(u32),
    /// `N#K` — the K-th occurrence of weekday N in the month.
    Nth { weekday: u32, nth: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    /// `Some` for the 6-field form; 5-field expressions fire at second 0.
    seconds: Option<Vec<u32>>,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    day: DaySpec,
    months: Vec<u32>,
    weekdays: Vec<WeekdayPart>,
}

impl CronExpr {
    pub fn is_extended(&self) -> bool {
        self.seconds.is_some()
    }

    /// Does this instant match the expression?
    pub fn matches(&self, dt: &NaiveDateTime) -> bool {
        match &self.seconds {
            None => {
                if dt.second() != 0 {
                    return false;
                }
            }
            Some(seconds) => {
                if !seconds.contains(&dt.second()) {
                    return false;
                }
            }
        }
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.months.contains(&dt.month())
            && self.day_matches(dt)
            && self.weekday_matches(dt)
    }

    fn day_matches(&self, dt: &NaiveDateTime) -> bool {
        let (year, month, day) = (dt.year(), dt.month(), dt.day());
        match &self.day {
            DaySpec::Values(values) => values.contains(&day),
            DaySpec::Last => day == last_day_of_month(year, month),
            DaySpec::LastWeekday => day == last_weekday_of_month(year, month),
            DaySpec::NearestWeekday(target) => day == nearest_weekday(year, month, *target),
        }
    }

    fn weekday_matches(&self, dt: &NaiveDateTime) -> bool {
        let weekday = dt.weekday().num_days_from_sunday();
        self.weekdays.iter().any(|part| match part {
            WeekdayPart::Value(v) => *v == weekday,
            WeekdayPart::Nth { weekday: w, nth } => {
                *w == weekday
                    && nth_weekday_day(dt.year(), dt.month(), *w, *nth) == Some(dt.day())
            }
        })
    }

    /// Next matching instant strictly after `from`, in naive local time.
    /// Iterates at the minimal granularity with skip-ahead for higher
    /// fields, capped at one year.
    pub fn next_fire_naive(&self, from: NaiveDateTime) -> Option<NaiveDateTime> {
        let extended = self.is_extended();
        let step = if extended {
            Duration::seconds(1)
        } else {
            Duration::minutes(1)
        };

        let floored = if extended {
            from.with_nanosecond(0)?
        } else {
            from.with_nanosecond(0)?.with_second(0)?
        };
        let mut current = floored + step;
        let horizon = from + Duration::days(HORIZON_DAYS);

        while current <= horizon {
            // Skip-ahead on mismatched higher fields.
            if !self.months.contains(&current.month()) {
                current = first_of_next_month(current)?;
                continue;
            }
            if !self.day_matches(&current) || !self.weekday_matches(&current) {
                current = start_of_next_day(current)?;
                continue;
            }
            if !self.hours.contains(&current.hour()) {
                current = current
                    .with_minute(0)?
                    .with_second(0)?
                    .checked_add_signed(Duration::hours(1))?;
                continue;
            }
            if !self.minutes.contains(&current.minute()) {
                current = current.with_second(0)? + Duration::minutes(1);
                continue;
            }
            if self.matches(&current) {
                return Some(current);
            }
            current += step;
        }
        None
    }

    /// Next fire time evaluated in `tz`, returned in UTC.
    ///
    /// DST handling: local times in a spring-forward gap are skipped;
    /// fall-back overlaps take the earliest (pre-transition) mapping.
    pub fn next_fire_tz(&self, after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
        let mut cursor = after.with_timezone(&tz).naive_local();
        let horizon = cursor + Duration::days(HORIZON_DAYS);
        while cursor <= horizon {
            let naive = self.next_fire_naive(cursor)?;
            match tz.from_local_datetime(&naive) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc));
                }
                chrono::LocalResult::None => {
                    // DST gap; keep searching past the nonexistent time.
                    cursor = naive;
                }
            }
        }
        None
    }

    /// Convenience: next fire in UTC.
    pub fn next_fire_utc(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_fire_tz(after, chrono_tz::UTC)
    }

    /// Up to `n` upcoming fire times.
    pub fn next_fires(&self, after: &DateTime<Utc>, n: usize, tz: chrono_tz::Tz) -> Vec<DateTime<Utc>> {
        let mut results = Vec::with_capacity(n);
        let mut cursor = *after;
        for _ in 0..n {
            match self.next_fire_tz(&cursor, tz) {
                Some(next) => {
                    results.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        results
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Calendar helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Last Mon-Fri day of the month.
fn last_weekday_of_month(year: i32, month: u32) -> u32 {
    let mut day = last_day_of_month(year, month);
    while let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
        let dow = date.weekday().num_days_from_sunday();
        if dow != 0 && dow != 6 {
            return day;
        }
        if day == 1 {
            break;
        }
        day -= 1;
    }
    day
}

/// Nearest Mon-Fri to `target`, never leaving the month.
fn nearest_weekday(year: i32, month: u32, target: u32) -> u32 {
    let last = last_day_of_month(year, month);
    let day = target.min(last).max(1);
    let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
        return day;
    };
    match date.weekday().num_days_from_sunday() {
        // Saturday: prefer Friday, unless that leaves the month.
        6 => {
            if day > 1 {
                day - 1
            } else {
                day + 2
            }
        }
        // Sunday: prefer Monday, unless that leaves the month.
        0 => {
            if day < last {
                day + 1
            } else {
                day - 2
            }
        }
        _ => day,
    }
}

/// Day-of-month of the K-th weekday W, or `None` when the month has no
/// K-th occurrence.
fn nth_weekday_day(year: i32, month: u32, weekday: u32, nth: u32) -> Option<u32> {
    if nth == 0 {
        return None;
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let first_dow = first.weekday().num_days_from_sunday();
    let offset = (weekday + 7 - first_dow) % 7;
    let day = 1 + offset + (nth - 1) * 7;
    (day <= last_day_of_month(year, month)).then_some(day)
}

fn first_of_next_month(dt: NaiveDateTime) -> Option<NaiveDateTime> {
    let (year, month) = if dt.month() == 12 {
        (dt.year() + 1, 1)
    } else {
        (dt.year(), dt.month() + 1)
    };
    Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?)
}

fn start_of_next_day(dt: NaiveDateTime) -> Option<NaiveDateTime> {
    Some(dt.date().succ_opt()?.and_hms_opt(0, 0, 0)?)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Memoizing cron parser handle. Construct one and share it; parsed
/// expressions are cached by their trimmed source string.
pub struct CronParser {
    cache: Mutex<HashMap<String, Arc<CronExpr>>>,
}

impl Default for CronParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CronParser {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Parse (or fetch from cache) an expression.
    pub fn parse(&self, cron: &str) -> Result<Arc<CronExpr>> {
        let key = cron.trim().to_string();
        if let Some(expr) = self.cache.lock().get(&key) {
            return Ok(expr.clone());
        }
        let expr = Arc::new(parse_expression(&key)?);
        self.cache.lock().insert(key, expr.clone());
        Ok(expr)
    }

    /// Full validation: the expression must parse AND have a computable
    /// next fire time within the one-year horizon.
    pub fn validate(&self, cron: &str) -> Result<()> {
        let expr = self.parse(cron)?;
        if expr.next_fire_utc(&Utc::now()).is_none() {
            return Err(Error::InvalidCron(format!(
                "{cron}: no fire time within one year"
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn cache_len(&self) -> usize {
        self.cache.lock().len()
    }
}

fn parse_expression(cron: &str) -> Result<CronExpr> {
    let trimmed = cron.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidCron("empty expression".into()));
    }

    let lower = trimmed.to_ascii_lowercase();
    let expanded = ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, expansion)| *expansion)
        .unwrap_or(trimmed);

    let fields: Vec<&str> = expanded.split_whitespace().collect();
    let (seconds, rest) = match fields.len() {
        5 => (None, &fields[..]),
        6 => (
            Some(parse_numeric_field(fields[0], "second", 0, 59, no_names)?),
            &fields[1..],
        ),
        n => {
            return Err(Error::InvalidCron(format!(
                "expected 5 or 6 fields, got {n}"
            )));
        }
    };

    Ok(CronExpr {
        seconds,
        minutes: parse_numeric_field(rest[0], "minute", 0, 59, no_names)?,
        hours: parse_numeric_field(rest[1], "hour", 0, 23, no_names)?,
        day: parse_day_field(rest[2])?,
        months: parse_numeric_field(rest[3], "month", 1, 12, month_name)?,
        weekdays: parse_weekday_field(rest[4])?,
    })
}

fn no_names(_: &str) -> Option<u32> {
    None
}

fn month_name(name: &str) -> Option<u32> {
    MONTH_NAMES
        .iter()
        .position(|m| *m == name)
        .map(|i| i as u32 + 1)
}

fn weekday_name(name: &str) -> Option<u32> {
    // 7 is accepted as a Sunday synonym.
    if name == "7" {
        return Some(0);
    }
    WEEKDAY_NAMES.iter().position(|d| *d == name).map(|i| i as u32)
}

fn parse_value(
    raw: &str,
    name: &str,
    min: u32,
    max: u32,
    resolve_name: fn(&str) -> Option<u32>,
) -> Result<u32> {
    let lower = raw.trim().to_ascii_lowercase();
    let value = match resolve_name(&lower) {
        Some(v) => v,
        None => lower
            .parse::<u32>()
            .map_err(|_| Error::InvalidCron(format!("{name}: invalid value '{raw}'")))?,
    };
    if value < min || value > max {
        return Err(Error::InvalidCron(format!(
            "{name}: value {value} out of range {min}..={max}"
        )));
    }
    Ok(value)
}

/// Parse one numeric field: `*`, `N`, `N-M`, `N-M/S`, `*/S`, and comma
/// lists of those. Names resolve case-insensitively where the field
/// supports them.
fn parse_numeric_field(
    field: &str,
    name: &str,
    min: u32,
    max: u32,
    resolve_name: fn(&str) -> Option<u32>,
) -> Result<Vec<u32>> {
    let mut values: Vec<u32> = Vec::new();

    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(Error::InvalidCron(format!("{name}: empty list item")));
        }

        let (base, step) = match part.split_once('/') {
            Some((base, step_s)) => {
                let step: u32 = step_s.parse().map_err(|_| {
                    Error::InvalidCron(format!("{name}: invalid step '{step_s}'"))
                })?;
                if step == 0 {
                    return Err(Error::InvalidCron(format!("{name}: step must be > 0")));
                }
                (base, step)
            }
            None => (part, 1),
        };

        let (start, end) = if base == "*" {
            (min, max)
        } else if let Some((start_s, end_s)) = base.split_once('-') {
            let start = parse_value(start_s, name, min, max, resolve_name)?;
            let end = parse_value(end_s, name, min, max, resolve_name)?;
            if start > end {
                return Err(Error::InvalidCron(format!(
                    "{name}: range start {start} > end {end}"
                )));
            }
            (start, end)
        } else {
            let value = parse_value(base, name, min, max, resolve_name)?;
            (value, value)
        };

        let mut v = start;
        while v <= end {
            if !values.contains(&v) {
                values.push(v);
            }
            v += step;
        }
    }

    values.sort_unstable();
    Ok(values)
}

fn parse_day_field(field: &str) -> Result<DaySpec> {
    let lower = field.trim().to_ascii_lowercase();
    if lower == "l" {
        return Ok(DaySpec::Last);
    }
    if lower == "lw" {
        return Ok(DaySpec::LastWeekday);
    }
    if let Some(day_s) = lower.strip_suffix('w') {
        if !day_s.is_empty() && !day_s.contains([',', '-', '/', '*']) {
            let day = parse_value(day_s, "day-of-month", 1, 31, no_names)?;
            return Ok(DaySpec::NearestWeekday(day));
        }
    }
    Ok(DaySpec::Values(parse_numeric_field(
        field,
        "day-of-month",
        1,
        31,
        no_names,
    )?))
}

fn parse_weekday_field(field: &str) -> Result<Vec<WeekdayPart>> {
    let lower = field.trim().to_ascii_lowercase();

    // Bare `L` in the weekday field means Saturday.
    if lower == "l" {
        return Ok(vec![WeekdayPart::Value(6)]);
    }

    let mut parts = Vec::new();
    for item in lower.split(',') {
        let item = item.trim();
        if let Some((weekday_s, nth_s)) = item.split_once('#') {
            let weekday = parse_value(weekday_s, "day-of-week", 0, 6, weekday_name)?;
            let nth: u32 = nth_s.parse().map_err(|_| {
                Error::InvalidCron(format!("day-of-week: invalid occurrence '{nth_s}'"))
            })?;
            if nth == 0 || nth > 5 {
                return Err(Error::InvalidCron(format!(
                    "day-of-week: occurrence {nth} out of range 1..=5"
                )));
            }
            parts.push(WeekdayPart::Nth { weekday, nth });
        } else {
            for value in parse_numeric_field(item, "day-of-week", 0, 6, weekday_name)? {
                if !parts.contains(&WeekdayPart::Value(value)) {
                    parts.push(WeekdayPart::Value(value));
                }
            }
        }
    }
    Ok(parts)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Due checks & timezone helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse an IANA timezone name, falling back to UTC.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

/// Has the stored next-run instant been reached? Total: `None` and
/// unparseable inputs are simply not due.
pub fn is_due(next_run: Option<&str>, now: &DateTime<Utc>) -> bool {
    let Some(raw) = next_run else {
        return false;
    };
    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => parsed.with_timezone(&Utc) <= *now,
        Err(_) => false,
    }
}

/// Typed variant used by the scheduler.
pub fn is_due_at(next_run: Option<DateTime<Utc>>, now: &DateTime<Utc>) -> bool {
    next_run.map_or(false, |at| at <= *now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CronParser {
        CronParser::new()
    }

    fn naive(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_all_wildcards() {
        let expr = parser().parse("* * * * *").unwrap();
        assert!(!expr.is_extended());
        assert_eq!(expr.minutes.len(), 60);
        assert_eq!(expr.hours.len(), 24);
        assert_eq!(expr.months.len(), 12);
    }

    #[test]
    fn parse_fixed_values() {
        let expr = parser().parse("30 9 15 6 3").unwrap();
        assert_eq!(expr.minutes, vec![30]);
        assert_eq!(expr.hours, vec![9]);
        assert_eq!(expr.months, vec![6]);
        assert_eq!(expr.day, DaySpec::Values(vec![15]));
        assert_eq!(expr.weekdays, vec![WeekdayPart::Value(3)]);
    }

    #[test]
    fn parse_extended_form() {
        let expr = parser().parse("*/15 * * * * *").unwrap();
        assert!(expr.is_extended());
        assert_eq!(expr.seconds.as_ref().unwrap(), &vec![0, 15, 30, 45]);
    }

    #[test]
    fn parse_steps_and_ranges() {
        let expr = parser().parse("*/5 9-17 * * 1-5").unwrap();
        assert_eq!(expr.minutes, (0..60).step_by(5).collect::<Vec<_>>());
        assert_eq!(expr.hours, (9..=17).collect::<Vec<_>>());
        assert_eq!(
            expr.weekdays,
            (1..=5).map(WeekdayPart::Value).collect::<Vec<_>>()
        );
    }

    #[test]
    fn parse_range_with_step() {
        let expr = parser().parse("10-30/10 * * * *").unwrap();
        assert_eq!(expr.minutes, vec![10, 20, 30]);
    }

    #[test]
    fn parse_lists() {
        let expr = parser().parse("0,15,30,45 * 1,15 * *").unwrap();
        assert_eq!(expr.minutes, vec![0, 15, 30, 45]);
        assert_eq!(expr.day, DaySpec::Values(vec![1, 15]));
    }

    #[test]
    fn parse_month_and_weekday_names() {
        let expr = parser().parse("0 0 * Jan,JUL sun").unwrap();
        assert_eq!(expr.months, vec![1, 7]);
        assert_eq!(expr.weekdays, vec![WeekdayPart::Value(0)]);

        let expr = parser().parse("0 0 * * Mon-Fri").unwrap();
        assert_eq!(
            expr.weekdays,
            (1..=5).map(WeekdayPart::Value).collect::<Vec<_>>()
        );
    }

    #[test]
    fn weekday_seven_is_sunday() {
        let expr = parser().parse("0 0 * * 7").unwrap();
        assert_eq!(expr.weekdays, vec![WeekdayPart::Value(0)]);
    }

    #[test]
    fn parse_aliases() {
        let p = parser();
        for (alias, expansion) in ALIASES {
            assert_eq!(
                p.parse(alias).unwrap(),
                p.parse(expansion).unwrap(),
                "{alias} should expand to {expansion}"
            );
        }
        // Case-insensitive.
        assert!(p.parse("@DAILY").is_ok());
    }

    #[test]
    fn parse_specials() {
        let p = parser();
        assert_eq!(p.parse("0 0 L * *").unwrap().day, DaySpec::Last);
        assert_eq!(p.parse("0 0 LW * *").unwrap().day, DaySpec::LastWeekday);
        assert_eq!(
            p.parse("0 0 15W * *").unwrap().day,
            DaySpec::NearestWeekday(15)
        );
        assert_eq!(
            p.parse("0 0 * * L").unwrap().weekdays,
            vec![WeekdayPart::Value(6)]
        );
        assert_eq!(
            p.parse("0 9 * * 1#2").unwrap().weekdays,
            vec![WeekdayPart::Nth { weekday: 1, nth: 2 }]
        );
    }

    #[test]
    fn parse_rejects_bad_input() {
        let p = parser();
        assert!(p.parse("").is_err());
        assert!(p.parse("* * *").is_err());
        assert!(p.parse("* * * * * * *").is_err());
        assert!(p.parse("60 * * * *").is_err());
        assert!(p.parse("* 24 * * *").is_err());
        assert!(p.parse("* * 0 * *").is_err());
        assert!(p.parse("* * 32 * *").is_err());
        assert!(p.parse("* * * 13 *").is_err());
        assert!(p.parse("* * * * 8").is_err());
        assert!(p.parse("*/0 * * * *").is_err());
        assert!(p.parse("30-10 * * * *").is_err());
        assert!(p.parse("abc * * * *").is_err());
        assert!(p.parse("0 0 * * 1#0").is_err());
        assert!(p.parse("0 0 * * 1#6").is_err());
    }

    #[test]
    fn error_messages_name_the_field() {
        let err = parser().parse("60 * * * *").unwrap_err();
        assert!(err.to_string().contains("minute"));
        let err = parser().parse("* * * * 9").unwrap_err();
        assert!(err.to_string().contains("day-of-week"));
    }

    // ── Matching ────────────────────────────────────────────────────

    #[test]
    fn matches_basic() {
        let expr = parser().parse("30 9 * * *").unwrap();
        assert!(expr.matches(&naive(2024, 6, 15, 9, 30, 0)));
        assert!(!expr.matches(&naive(2024, 6, 15, 10, 30, 0)));
        // 5-field form never matches a nonzero second.
        assert!(!expr.matches(&naive(2024, 6, 15, 9, 30, 1)));
    }

    #[test]
    fn matches_step() {
        let expr = parser().parse("*/5 * * * *").unwrap();
        assert!(expr.matches(&naive(2024, 6, 15, 10, 0, 0)));
        assert!(expr.matches(&naive(2024, 6, 15, 10, 55, 0)));
        assert!(!expr.matches(&naive(2024, 6, 15, 10, 3, 0)));
    }

    #[test]
    fn matches_extended_seconds() {
        let expr = parser().parse("*/10 * * * * *").unwrap();
        assert!(expr.matches(&naive(2024, 6, 15, 10, 0, 50)));
        assert!(!expr.matches(&naive(2024, 6, 15, 10, 0, 5)));
    }

    #[test]
    fn matches_weekday_and_day_are_both_required() {
        // 2024-06-15 is a Saturday.
        let expr = parser().parse("0 0 15 * 6").unwrap();
        assert!(expr.matches(&naive(2024, 6, 15, 0, 0, 0)));
        let expr = parser().parse("0 0 15 * 0").unwrap();
        assert!(!expr.matches(&naive(2024, 6, 15, 0, 0, 0)));
    }

    // ── next_fire ───────────────────────────────────────────────────

    #[test]
    fn next_fire_hourly() {
        let expr = parser().parse("30 * * * *").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 15, 10, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 15, 10, 30, 0));
    }

    #[test]
    fn next_fire_is_strictly_after() {
        let expr = parser().parse("30 * * * *").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 15, 10, 30, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 15, 11, 30, 0));
    }

    #[test]
    fn next_fire_daily_rolls_to_tomorrow() {
        let expr = parser().parse("0 9 * * *").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 15, 12, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 16, 9, 0, 0));
    }

    #[test]
    fn next_fire_monthly_skips_ahead() {
        let expr = parser().parse("0 0 1 * *").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 15, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 7, 1, 0, 0, 0));
    }

    #[test]
    fn next_fire_specific_month_year_boundary() {
        let expr = parser().parse("0 0 1 1 *").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2025, 1, 1, 0, 0, 0));
    }

    #[test]
    fn next_fire_extended_seconds() {
        let expr = parser().parse("*/15 * * * * *").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 15, 10, 0, 5)).unwrap();
        assert_eq!(next, utc(2024, 6, 15, 10, 0, 15));
    }

    #[test]
    fn next_fires_sequence() {
        let expr = parser().parse("0 * * * *").unwrap();
        let fires = expr.next_fires(&utc(2024, 6, 15, 10, 0, 0), 3, chrono_tz::UTC);
        assert_eq!(
            fires,
            vec![
                utc(2024, 6, 15, 11, 0, 0),
                utc(2024, 6, 15, 12, 0, 0),
                utc(2024, 6, 15, 13, 0, 0),
            ]
        );
    }

    #[test]
    fn next_fire_weekday_constraint() {
        // From Saturday 2024-06-15, next Monday is the 17th.
        let expr = parser().parse("0 9 * * 1").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 15, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 17, 9, 0, 0));
    }

    // ── Calendar specials ───────────────────────────────────────────

    #[test]
    fn last_day_february_leap_and_not() {
        let expr = parser().parse("0 0 L * *").unwrap();
        // Leap year: asked just before, fires on the 29th.
        let next = expr.next_fire_utc(&utc(2024, 2, 28, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 2, 29, 0, 0, 0));
        // Non-leap year at exactly midnight of the last day: strictly-after
        // convention rolls to the next month's last day.
        let next = expr.next_fire_utc(&utc(2023, 2, 28, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2023, 3, 31, 0, 0, 0));
        // A minute earlier still fires the same day.
        let next = expr.next_fire_utc(&utc(2023, 2, 27, 23, 59, 0)).unwrap();
        assert_eq!(next, utc(2023, 2, 28, 0, 0, 0));
    }

    #[test]
    fn last_weekday_of_month_fires_on_friday() {
        // June 2024 ends on Sunday the 30th; the last weekday is Friday 28.
        let expr = parser().parse("0 12 LW * *").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 28, 12, 0, 0));
    }

    #[test]
    fn nearest_weekday_shifts_weekend_targets() {
        // 2024-06-15 is a Saturday: 15W fires Friday the 14th.
        let expr = parser().parse("0 0 15W * *").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 14, 0, 0, 0));

        // 2024-09-15 is a Sunday: fires Monday the 16th.
        let next = expr.next_fire_utc(&utc(2024, 9, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 9, 16, 0, 0, 0));

        // 2024-07-15 is a Monday: fires that day.
        let next = expr.next_fire_utc(&utc(2024, 7, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 7, 15, 0, 0, 0));
    }

    #[test]
    fn nearest_weekday_clamps_to_month_boundary() {
        // 1W with the 1st on a Saturday cannot go to the previous month:
        // June 2024 starts Saturday, so it fires Monday the 3rd.
        assert_eq!(nearest_weekday(2024, 6, 1), 3);
        // 30W in June 2024 (Sunday the 30th is the last day) fires the 28th.
        assert_eq!(nearest_weekday(2024, 6, 30), 28);
    }

    #[test]
    fn nth_weekday_match_and_skip() {
        // Second Monday of June 2024 is the 10th.
        let expr = parser().parse("0 9 * * 1#2").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 10, 9, 0, 0));

        // June 2024 has no fifth Monday; the next one is July 29.
        let expr = parser().parse("0 9 * * 1#5").unwrap();
        let next = expr.next_fire_utc(&utc(2024, 6, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 7, 29, 9, 0, 0));
    }

    #[test]
    fn weekday_list_with_nth_items_evaluates_independently() {
        // Friday (5) OR first Monday (1#1). 2024-06-03 is the first Monday;
        // 2024-06-07 is a Friday.
        let expr = parser().parse("0 0 * * 5,1#1").unwrap();
        let first = expr.next_fire_utc(&utc(2024, 6, 1, 0, 0, 0)).unwrap();
        assert_eq!(first, utc(2024, 6, 3, 0, 0, 0));
        let second = expr.next_fire_utc(&first).unwrap();
        assert_eq!(second, utc(2024, 6, 7, 0, 0, 0));
    }

    #[test]
    fn weekday_l_is_saturday() {
        let expr = parser().parse("0 0 * * L").unwrap();
        // 2024-06-15 is a Saturday.
        let next = expr.next_fire_utc(&utc(2024, 6, 14, 0, 0, 0)).unwrap();
        assert_eq!(next, utc(2024, 6, 15, 0, 0, 0));
    }

    #[test]
    fn calendar_helpers() {
        assert_eq!(last_day_of_month(2024, 2), 29);
        assert_eq!(last_day_of_month(2023, 2), 28);
        assert_eq!(last_day_of_month(2024, 12), 31);
        assert_eq!(nth_weekday_day(2024, 6, 1, 1), Some(3));
        assert_eq!(nth_weekday_day(2024, 6, 1, 5), None);
        assert_eq!(nth_weekday_day(2024, 6, 6, 5), Some(29));
    }

    // ── Timezone evaluation ─────────────────────────────────────────

    #[test]
    fn next_fire_tz_basic() {
        let expr = parser().parse("0 9 * * *").unwrap();
        let tz = parse_tz("US/Eastern");
        let next = expr.next_fire_tz(&utc(2024, 6, 15, 12, 0, 0), tz).unwrap();
        // 9 ET = 13 UTC during EDT.
        assert_eq!(next, utc(2024, 6, 15, 13, 0, 0));
    }

    #[test]
    fn next_fire_tz_spring_forward_gap_is_skipped() {
        // US/Eastern 2024-03-10: 02:30 local does not exist.
        let expr = parser().parse("30 2 * * *").unwrap();
        let tz = parse_tz("US/Eastern");
        let next = expr.next_fire_tz(&utc(2024, 3, 10, 6, 0, 0), tz).unwrap();
        assert_eq!(next, utc(2024, 3, 11, 6, 30, 0));
    }

    #[test]
    fn next_fire_tz_fall_back_takes_earliest() {
        // US/Eastern 2024-11-03: 01:30 local happens twice; EDT maps to
        // 05:30 UTC.
        let expr = parser().parse("30 1 * * *").unwrap();
        let tz = parse_tz("US/Eastern");
        let next = expr.next_fire_tz(&utc(2024, 11, 3, 4, 0, 0), tz).unwrap();
        assert_eq!(next, utc(2024, 11, 3, 5, 30, 0));
    }

    #[test]
    fn parse_tz_falls_back_to_utc() {
        assert_eq!(parse_tz("Not/Real"), chrono_tz::UTC);
        assert_eq!(parse_tz(""), chrono_tz::UTC);
        assert_eq!(parse_tz("Asia/Tokyo"), chrono_tz::Asia::Tokyo);
    }

    // ── Memoization ─────────────────────────────────────────────────

    #[test]
    fn cache_returns_same_parse() {
        let p = parser();
        let a = p.parse("*/5 * * * *").unwrap();
        let b = p.parse("*/5 * * * *").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(p.cache_len(), 1);

        let _ = p.parse(" */5 * * * * ").unwrap();
        assert_eq!(p.cache_len(), 1, "trimmed source shares the cache slot");
    }

    #[test]
    fn cached_next_fires_are_stable() {
        let p = parser();
        let from = utc(2024, 6, 15, 10, 0, 0);
        let first = p.parse("0 * * * *").unwrap().next_fire_utc(&from);
        let second = p.parse("0 * * * *").unwrap().next_fire_utc(&from);
        assert_eq!(first, second);
    }

    // ── validate ────────────────────────────────────────────────────

    #[test]
    fn validate_accepts_common_expressions() {
        let p = parser();
        for cron in [
            "* * * * *",
            "0 * * * *",
            "*/5 9-17 * * 1-5",
            "30 9 1,15 * *",
            "0 0 L * *",
            "0 0 LW * *",
            "0 0 15W * *",
            "0 9 * * 1#2",
            "@daily",
            "0 */6 * * * *",
        ] {
            assert!(p.validate(cron).is_ok(), "{cron} should validate");
        }
    }

    #[test]
    fn validate_rejects_never_firing() {
        // February 30th never exists.
        assert!(parser().validate("0 0 30 2 *").is_err());
    }

    // ── is_due ──────────────────────────────────────────────────────

    #[test]
    fn is_due_total_behavior() {
        let now = utc(2024, 6, 15, 10, 0, 0);
        assert!(!is_due(None, &now));
        assert!(!is_due(Some("not a timestamp"), &now));
        assert!(is_due(Some("2024-06-15T09:59:00Z"), &now));
        assert!(is_due(Some("2024-06-15T10:00:00Z"), &now));
        assert!(!is_due(Some("2024-06-15T10:01:00Z"), &now));
        // Offsets are honoured.
        assert!(is_due(Some("2024-06-15T11:59:00+02:00"), &now));
    }

    #[test]
    fn is_due_at_typed() {
        let now = utc(2024, 6, 15, 10, 0, 0);
        assert!(!is_due_at(None, &now));
        assert!(is_due_at(Some(utc(2024, 6, 15, 10, 0, 0)), &now));
        assert!(!is_due_at(Some(utc(2024, 6, 15, 10, 1, 0)), &now));
    }
}
