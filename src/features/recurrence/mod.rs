//! # Feature: Recurrence Rules
//!
//! Pure recurrence arithmetic for scheduled reminders: parses the stored rule
//! tokens (`daily`, `weekly:mon`, `monthly:5`, `yearly:2-14`) into a typed rule
//! and computes the next occurrence after a reminder fires. All wall-clock math
//! happens in the reminder owner's configured timezone.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.0.0: Initial release with daily/weekly/monthly/yearly rules

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, Days, LocalResult, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// A reminder's recurrence schedule, parsed once at the store boundary.
///
/// `Monthly` carries a day-of-month (1-31); `Yearly` carries (month, day).
/// Days past the end of a target month clamp to that month's last day, so
/// `Monthly(31)` fires on April 30 and on February 28/29.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceRule {
    Daily,
    Weekly(Weekday),
    Monthly(u32),
    Yearly(u32, u32),
}

impl RecurrenceRule {
    /// Parse a stored rule token.
    ///
    /// Weekday tokens accept English three-letter names and the Indonesian day
    /// names the chat layer historically produced.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("daily") {
            return Ok(RecurrenceRule::Daily);
        }
        if let Some(day) = s.strip_prefix("weekly:") {
            return parse_weekday(day).map(RecurrenceRule::Weekly);
        }
        if let Some(day) = s.strip_prefix("monthly:") {
            let day: u32 = day
                .trim()
                .parse()
                .with_context(|| format!("invalid monthly rule day: {day:?}"))?;
            if !(1..=31).contains(&day) {
                bail!("monthly rule day out of range: {day}");
            }
            return Ok(RecurrenceRule::Monthly(day));
        }
        if let Some(rest) = s.strip_prefix("yearly:") {
            let (month, day) = rest
                .split_once('-')
                .with_context(|| format!("yearly rule must be yearly:<month>-<day>, got {rest:?}"))?;
            let month: u32 = month
                .trim()
                .parse()
                .with_context(|| format!("invalid yearly rule month: {month:?}"))?;
            let day: u32 = day
                .trim()
                .parse()
                .with_context(|| format!("invalid yearly rule day: {day:?}"))?;
            if !(1..=12).contains(&month) {
                bail!("yearly rule month out of range: {month}");
            }
            if !(1..=31).contains(&day) {
                bail!("yearly rule day out of range: {day}");
            }
            return Ok(RecurrenceRule::Yearly(month, day));
        }
        bail!("unrecognized recurrence rule: {s:?}")
    }

    /// The token form persisted in the `recurrence_rule` column.
    pub fn as_rule_string(&self) -> String {
        match self {
            RecurrenceRule::Daily => "daily".to_string(),
            RecurrenceRule::Weekly(day) => format!("weekly:{}", weekday_token(*day)),
            RecurrenceRule::Monthly(day) => format!("monthly:{day}"),
            RecurrenceRule::Yearly(month, day) => format!("yearly:{month}-{day}"),
        }
    }
}

fn parse_weekday(token: &str) -> Result<Weekday> {
    match token.trim().to_lowercase().as_str() {
        "mon" | "senin" => Ok(Weekday::Mon),
        "tue" | "selasa" => Ok(Weekday::Tue),
        "wed" | "rabu" => Ok(Weekday::Wed),
        "thu" | "kamis" => Ok(Weekday::Thu),
        "fri" | "jumat" => Ok(Weekday::Fri),
        "sat" | "sabtu" => Ok(Weekday::Sat),
        "sun" | "minggu" => Ok(Weekday::Sun),
        other => bail!("unrecognized weekday token: {other:?}"),
    }
}

fn weekday_token(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

/// Compute the next occurrence after a recurring reminder fires.
///
/// `current` is the occurrence that just fired. The result keeps the rule's
/// wall-clock hour/minute in `tz` and is always strictly after `now`: if the
/// naive increment lands in the past (the poller was down for a while), the
/// schedule is recomputed forward from `now`'s date in rule-sized steps rather
/// than drifting behind.
pub fn next_occurrence(
    current: DateTime<Utc>,
    rule: &RecurrenceRule,
    now: DateTime<Utc>,
    tz: Tz,
) -> DateTime<Utc> {
    let cur = current.with_timezone(&tz);
    let now_local = now.with_timezone(&tz);
    let (hour, minute) = (cur.hour(), cur.minute());

    let next = match rule {
        RecurrenceRule::Daily => {
            let next = at_local(tz, cur.date_naive() + Days::new(1), hour, minute);
            if next <= now_local {
                at_local(tz, now_local.date_naive() + Days::new(1), hour, minute)
            } else {
                next
            }
        }

        RecurrenceRule::Weekly(target) => {
            let mut date = cur.date_naive() + Days::new(7);
            while date.weekday() != *target {
                date = date + Days::new(1);
            }
            let mut next = at_local(tz, date, hour, minute);
            if next <= now_local {
                date = now_local.date_naive();
                next = at_local(tz, date, hour, minute);
                while date.weekday() != *target || next <= now_local {
                    date = date + Days::new(1);
                    next = at_local(tz, date, hour, minute);
                }
            }
            next
        }

        RecurrenceRule::Monthly(day) => {
            let (year, month) = add_months(cur.year(), cur.month(), 1);
            let mut next = at_local(tz, clamped_date(year, month, *day), hour, minute);
            if next <= now_local {
                let candidate = clamped_date(now_local.year(), now_local.month(), *day);
                next = at_local(tz, candidate, hour, minute);
                if next <= now_local {
                    let (year, month) = add_months(now_local.year(), now_local.month(), 1);
                    next = at_local(tz, clamped_date(year, month, *day), hour, minute);
                }
            }
            next
        }

        RecurrenceRule::Yearly(month, day) => {
            let mut next = at_local(tz, clamped_date(cur.year() + 1, *month, *day), hour, minute);
            if next <= now_local {
                next = at_local(tz, clamped_date(now_local.year(), *month, *day), hour, minute);
                if next <= now_local {
                    next =
                        at_local(tz, clamped_date(now_local.year() + 1, *month, *day), hour, minute);
                }
            }
            next
        }
    };

    next.with_timezone(&Utc)
}

/// Resolve a local wall-clock time in `tz`.
///
/// An ambiguous time (DST fold) takes the earlier instant; a time skipped by a
/// DST gap lands on the next valid hour.
pub(crate) fn at_local(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> DateTime<Tz> {
    let naive = date
        .and_hms_opt(hour, minute, 0)
        .unwrap_or_else(|| date.and_time(chrono::NaiveTime::MIN));
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earlier, _) => earlier,
        LocalResult::None => match tz.from_local_datetime(&(naive + chrono::Duration::hours(1))) {
            LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt,
            LocalResult::None => tz.from_utc_datetime(&naive),
        },
    }
}

/// Calendar month arithmetic: `(2026, 12) + 1 == (2027, 1)`.
pub(crate) fn add_months(year: i32, month: u32, months: u32) -> (i32, u32) {
    let zero_based = year * 12 + month as i32 - 1 + months as i32;
    (zero_based.div_euclid(12), (zero_based.rem_euclid(12) + 1) as u32)
}

/// Build a date, clamping the day to the target month's length.
fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_else(|| {
        let last = days_in_month(year, month);
        NaiveDate::from_ymd_opt(year, month, last).unwrap_or_default()
    })
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = add_months(year, month, 1);
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
