//! # Feature: Notification Formatting
//!
//! Pure rendering of user-facing notification text: reminder fires, the daily
//! briefing, overdue follow-ups, and the monthly expense report. No I/O and no
//! wall-clock reads; every function takes explicit time inputs so the output
//! is fully deterministic.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.0.0: Initial release with reminder/briefing/overdue/report templates

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike};
use chrono_tz::Tz;

use crate::features::recurrence::RecurrenceRule;
use crate::store::{Expense, ReminderWithTask, Task};

const DIVIDER: &str = "─────────────";
const REPORT_DIVIDER: &str = "━━━━━━━━━━━━━━━━━━━━";

fn format_date_short(t: &DateTime<Tz>) -> String {
    format!("{} {}", t.day(), t.format("%b"))
}

fn format_day_full(t: &DateTime<Tz>) -> String {
    format!("{}, {} {} {}", t.format("%a"), t.day(), t.format("%b"), t.year())
}

fn format_time(t: &DateTime<Tz>) -> String {
    format!("{:02}:{:02}", t.hour(), t.minute())
}

fn has_time_component(t: &DateTime<Tz>) -> bool {
    t.hour() != 0 || t.minute() != 0
}

fn month_year_name(year: i32, month: u32) -> String {
    match NaiveDate::from_ymd_opt(year, month, 1) {
        Some(d) => format!("{} {year}", d.format("%B")),
        None => format!("{month}/{year}"),
    }
}

fn plural(count: usize, singular: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {singular}s")
    }
}

/// Amounts are stored in whole rupiah; render with dot thousand separators.
pub fn format_rupiah(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let n = digits.len();
    let mut out = String::with_capacity(n + n / 3 + 4);
    out.push_str("Rp ");
    if amount < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (n - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

fn recurring_header(rule: &RecurrenceRule) -> &'static str {
    match rule {
        RecurrenceRule::Daily => "Daily Reminder",
        RecurrenceRule::Weekly(_) => "Weekly Reminder",
        RecurrenceRule::Monthly(_) => "Monthly Reminder",
        RecurrenceRule::Yearly(_, _) => "Yearly Reminder",
    }
}

fn recurring_detail(rule: &RecurrenceRule, fired_at: &DateTime<Tz>) -> String {
    match rule {
        RecurrenceRule::Daily => format!("Every day at {}", format_time(fired_at)),
        RecurrenceRule::Weekly(day) => {
            let names = [
                "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
            ];
            format!("Every {}", names[day.num_days_from_monday() as usize])
        }
        RecurrenceRule::Monthly(day) => format!("Every month on day {day}"),
        RecurrenceRule::Yearly(month, day) => {
            match NaiveDate::from_ymd_opt(2000, *month, 1) {
                Some(d) => format!("Every {day} {}", d.format("%B")),
                None => "Every year".to_string(),
            }
        }
    }
}

/// Render the message the poller delivers when a reminder fires.
pub fn format_reminder_notification(r: &ReminderWithTask, tz: Tz) -> String {
    let t = r.reminder.remind_at.with_timezone(&tz);
    let date_str = format!("{} · {}", format_day_full(&t), format_time(&t));

    if let Some(rule) = &r.reminder.recurrence {
        format!(
            "🔔 {}\n\n📌 {}\n📅 {}\n🔁 {}\n\nType \"done {}\" to mark it complete",
            recurring_header(rule),
            r.task_title,
            date_str,
            recurring_detail(rule, &t),
            r.task_title,
        )
    } else {
        format!(
            "🔔 Reminder\n\n📌 {}\n📅 {}\n\nType \"done {}\" to mark it complete",
            r.task_title, date_str, r.task_title,
        )
    }
}

/// Render one overdue follow-up for a task whose due date has passed.
pub fn format_overdue_notification(task: &Task, now: DateTime<Tz>) -> String {
    let due = match task.due_date {
        Some(d) => d.with_timezone(&now.timezone()),
        None => now,
    };
    format!(
        "⚠️ Still not done\n\n📌 {}\n📅 Due: {} ({})\n\nType \"done {}\" if it's finished",
        task.title,
        format_date_short(&due),
        relative_time_ago(&now, &due),
        task.title,
    )
}

fn relative_time_ago(now: &DateTime<Tz>, target: &DateTime<Tz>) -> String {
    let days = (now.date_naive() - target.date_naive()).num_days().max(0);
    match days {
        0 => "earlier today".to_string(),
        1 => "yesterday".to_string(),
        2..=6 => format!("{days} days ago"),
        7..=29 => {
            let weeks = days / 7;
            if weeks == 1 {
                "1 week ago".to_string()
            } else {
                format!("{weeks} weeks ago")
            }
        }
        _ => {
            let months = days / 30;
            if months == 1 {
                "1 month ago".to_string()
            } else {
                format!("{months} months ago")
            }
        }
    }
}

/// Render the morning briefing: pending todos, overdue todos, and this month's
/// upcoming reminders, with a short stats footer.
pub fn format_daily_briefing(
    tasks: &[Task],
    reminders: &[ReminderWithTask],
    now: DateTime<Tz>,
) -> String {
    let tz = now.timezone();
    let today_start = match now.date_naive().and_hms_opt(0, 0, 0) {
        Some(naive) => tz.from_local_datetime(&naive).earliest().unwrap_or(now),
        None => now,
    };

    let mut lines = vec![format!("☀️ Daily Briefing — {}\n", format_day_full(&now))];

    let (mut upcoming, mut overdue) = (Vec::new(), Vec::new());
    for t in tasks.iter().filter(|t| !t.is_completed) {
        match t.due_date {
            Some(due) if due.with_timezone(&tz) < today_start => overdue.push(t),
            _ => upcoming.push(t),
        }
    }

    lines.push("📌 Todo".to_string());
    if upcoming.is_empty() {
        lines.push("   Nothing pending 🎉".to_string());
    } else {
        for t in &upcoming {
            let icon = if t.due_date.is_some() { "⏳" } else { "🔘" };
            let mut line = format!("{icon} {}", t.title);
            if let Some(due) = t.due_date {
                let d = due.with_timezone(&tz);
                line.push_str(&format!(" — {}", format_date_short(&d)));
                if has_time_component(&d) {
                    line.push_str(&format!(" · {}", format_time(&d)));
                }
            }
            if let Some(r) = reminders.iter().find(|r| r.reminder.task_id == t.id) {
                line.push_str(&format!(
                    " ⏰ {}",
                    format_time(&r.reminder.remind_at.with_timezone(&tz))
                ));
                if r.reminder.is_recurring() {
                    line.push_str(" 🔁");
                }
            }
            lines.push(line);
        }
    }

    if !overdue.is_empty() {
        lines.push(String::new());
        lines.push("⚡ Overdue".to_string());
        for t in &overdue {
            let mut line = format!("🔘 {}", t.title);
            if let Some(due) = t.due_date {
                line.push_str(&format!(
                    " — {} ⚠️",
                    format_date_short(&due.with_timezone(&tz))
                ));
            }
            lines.push(line);
        }
    }

    let this_month: Vec<&ReminderWithTask> = reminders
        .iter()
        .filter(|r| {
            let at = r.reminder.remind_at.with_timezone(&tz);
            at >= now && at.year() == now.year() && at.month() == now.month()
        })
        .collect();
    if !this_month.is_empty() {
        lines.push(String::new());
        lines.push(DIVIDER.to_string());
        lines.push(String::new());
        lines.push(format!(
            "🗓 Reminders This Month — {}",
            month_year_name(now.year(), now.month())
        ));
        for r in &this_month {
            let at = r.reminder.remind_at.with_timezone(&tz);
            let mut line = format!("  {} · {}", format_date_short(&at), r.task_title);
            if r.reminder.is_recurring() {
                line.push_str(" 🔁");
            }
            lines.push(line);
        }
    }

    lines.push(String::new());
    lines.push(DIVIDER.to_string());
    lines.push(format!("📊 Pending: {}", plural(upcoming.len(), "todo")));
    lines.push(format!(
        "📊 This month: {} left",
        plural(this_month.len(), "reminder")
    ));

    lines.join("\n")
}

/// Render the monthly expense report for one calendar month.
pub fn format_monthly_report(expenses: &[Expense], year: i32, month: u32, tz: Tz) -> String {
    let month_name = month_year_name(year, month);
    if expenses.is_empty() {
        return format!("📭 No expenses recorded in {month_name}.");
    }

    let mut lines = vec![
        format!("💰 Expense Report — {month_name}\n"),
        format!("{REPORT_DIVIDER}\n"),
    ];

    let (mut paid, mut unpaid) = (Vec::new(), Vec::new());
    let (mut paid_total, mut unpaid_total) = (0i64, 0i64);
    for e in expenses {
        if e.is_paid {
            paid_total += e.amount;
            paid.push(e);
        } else {
            unpaid_total += e.amount;
            unpaid.push(e);
        }
    }

    lines.push(format!("✅ Paid ({})", plural(paid.len(), "item")));
    const MAX_SHOWN: usize = 8;
    for (i, e) in paid.iter().enumerate() {
        if i >= MAX_SHOWN {
            lines.push(format!("  ... and {} more", paid.len() - MAX_SHOWN));
            break;
        }
        let t = e.recorded_at.with_timezone(&tz);
        lines.push(format!(
            "  {} · {} · {}",
            format_date_short(&t),
            e.description,
            format_rupiah(e.amount)
        ));
    }

    if !unpaid.is_empty() {
        lines.push(String::new());
        lines.push(format!("🔴 Unpaid ({})", plural(unpaid.len(), "item")));
        for e in &unpaid {
            let t = e.recorded_at.with_timezone(&tz);
            lines.push(format!(
                "  {} · {} · {}",
                format_date_short(&t),
                e.description,
                format_rupiah(e.amount)
            ));
        }
    }

    lines.push(format!("\n{REPORT_DIVIDER}\n"));
    lines.push("📊 Summary\n".to_string());
    lines.push(format!("  Total    : {}", format_rupiah(paid_total + unpaid_total)));
    lines.push(format!("  ✅ Paid  : {}", format_rupiah(paid_total)));
    if unpaid_total > 0 {
        lines.push(format!("  🔴 Unpaid: {}", format_rupiah(unpaid_total)));
    }

    let mut by_amount: Vec<&Expense> = expenses.iter().collect();
    by_amount.sort_by(|a, b| b.amount.cmp(&a.amount));
    lines.push(String::new());
    lines.push("  Biggest items:".to_string());
    for (i, e) in by_amount.iter().take(3).enumerate() {
        lines.push(format!(
            "  {}. {} — {}",
            i + 1,
            e.description,
            format_rupiah(e.amount)
        ));
    }

    lines.push(String::new());
    lines.push(format!("  Transactions: {}", expenses.len()));
    lines.push(format!("\n{REPORT_DIVIDER}"));

    lines.join("\n")
}
