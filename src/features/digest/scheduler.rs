//! Daily task scheduling loop.
//!
//! A single loop manages the fixed broadcast roster. Every iteration it
//! recomputes each task's next absolute deadline from the current wall clock,
//! sleeps until the soonest one (or until shutdown), runs exactly that task,
//! and starts over, so no drift accumulates across runs. Broadcasts iterate
//! all active users; one user's failure never aborts the rest.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use chrono_tz::Tz;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::delivery::DeliverySink;
use crate::features::formatting;
use crate::features::recurrence::{add_months, at_local};
use crate::store::{ExpenseReporter, ReminderStore, TaskRepository};

/// Which broadcast a roster entry runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Briefing,
    OverdueFollowup,
    MonthlyReport,
}

/// Process-local roster entry: a target time of day, optionally constrained
/// to the first day of the calendar month. Built once at scheduler start and
/// never mutated.
#[derive(Debug, Clone, Copy)]
pub struct DailyTask {
    pub hour: u32,
    pub minute: u32,
    pub name: &'static str,
    pub kind: TaskKind,
    pub first_of_month_only: bool,
}

impl DailyTask {
    /// Next absolute deadline for this task, computed fresh from `now`.
    pub fn next_deadline(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();

        if self.first_of_month_only {
            if now.day() == 1 {
                let today = at_local(tz, now.date_naive(), self.hour, self.minute);
                if today > now {
                    return today;
                }
            }
            let (year, month) = add_months(now.year(), now.month(), 1);
            let first = NaiveDate::from_ymd_opt(year, month, 1)
                .unwrap_or_else(|| now.date_naive() + Days::new(1));
            return at_local(tz, first, self.hour, self.minute);
        }

        let today = at_local(tz, now.date_naive(), self.hour, self.minute);
        if today > now {
            today
        } else {
            at_local(tz, now.date_naive() + Days::new(1), self.hour, self.minute)
        }
    }
}

/// The fixed broadcast roster (times are wall clock in the configured zone).
fn roster() -> [DailyTask; 3] {
    [
        DailyTask {
            hour: 7,
            minute: 30,
            name: "daily_briefing",
            kind: TaskKind::Briefing,
            first_of_month_only: false,
        },
        DailyTask {
            hour: 8,
            minute: 0,
            name: "monthly_report",
            kind: TaskKind::MonthlyReport,
            first_of_month_only: true,
        },
        DailyTask {
            hour: 19,
            minute: 0,
            name: "overdue_followup",
            kind: TaskKind::OverdueFollowup,
            first_of_month_only: false,
        },
    ]
}

/// Pick the roster entry with the smallest deadline.
fn next_task(tasks: &[DailyTask; 3], now: DateTime<Tz>) -> (DailyTask, DateTime<Tz>) {
    let mut best = tasks[0];
    let mut best_deadline = best.next_deadline(now);
    for task in &tasks[1..] {
        let deadline = task.next_deadline(now);
        if deadline < best_deadline {
            best = *task;
            best_deadline = deadline;
        }
    }
    (best, best_deadline)
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

pub struct DailyScheduler {
    tasks: Arc<dyn TaskRepository>,
    reminders: Arc<dyn ReminderStore>,
    reports: Arc<dyn ExpenseReporter>,
    sink: Arc<dyn DeliverySink>,
    timezone: Tz,
    shutdown: CancellationToken,
}

impl DailyScheduler {
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        reminders: Arc<dyn ReminderStore>,
        reports: Arc<dyn ExpenseReporter>,
        sink: Arc<dyn DeliverySink>,
        timezone: Tz,
        shutdown: CancellationToken,
    ) -> Self {
        DailyScheduler {
            tasks,
            reminders,
            reports,
            sink,
            timezone,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled.
    pub async fn run(self) {
        info!("Daily scheduler started (briefing 07:30, overdue 19:00, monthly report 1st 08:00)");
        let tasks = roster();

        loop {
            let now = Utc::now().with_timezone(&self.timezone);
            let (task, deadline) = next_task(&tasks, now);
            let wait = (deadline - now).to_std().unwrap_or_default();

            info!(
                "Daily scheduler next run: {} at {}",
                task.name,
                deadline.format("%Y-%m-%d %H:%M")
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => match task.kind {
                    TaskKind::Briefing => self.send_briefing().await,
                    TaskKind::OverdueFollowup => self.send_overdue_followups().await,
                    TaskKind::MonthlyReport => self.send_monthly_report().await,
                },
                _ = self.shutdown.cancelled() => {
                    info!("Daily scheduler stopped");
                    return;
                }
            }
        }
    }

    /// Morning briefing: pending todos plus active reminders, one message per
    /// active user.
    async fn send_briefing(&self) {
        let user_ids = match self.tasks.list_active_user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Daily briefing: failed to list users: {e:#}");
                return;
            }
        };

        for user_id in user_ids {
            let todos = match self.tasks.list_pending_by_user(user_id).await {
                Ok(todos) => todos,
                Err(e) => {
                    error!("Daily briefing: failed to list todos for user {user_id}: {e:#}");
                    continue;
                }
            };

            // A reminder listing failure degrades the briefing instead of
            // skipping the user.
            let reminders = match self.reminders.list_active_by_user(user_id).await {
                Ok(reminders) => reminders,
                Err(e) => {
                    warn!("Daily briefing: failed to list reminders for user {user_id}: {e:#}");
                    Vec::new()
                }
            };

            let now = Utc::now().with_timezone(&self.timezone);
            let msg = formatting::format_daily_briefing(&todos, &reminders, now);
            if let Err(e) = self.sink.send(user_id, &msg).await {
                error!("Daily briefing: failed to send to user {user_id}: {e:#}");
                continue;
            }
            info!("Daily briefing sent to user {user_id}");
        }
    }

    /// Evening follow-up: one message per overdue todo; users with none are
    /// skipped entirely.
    async fn send_overdue_followups(&self) {
        let user_ids = match self.tasks.list_active_user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Overdue followup: failed to list users: {e:#}");
                return;
            }
        };

        for user_id in user_ids {
            let overdue = match self.tasks.list_overdue_by_user(user_id).await {
                Ok(overdue) => overdue,
                Err(e) => {
                    error!("Overdue followup: failed to list overdue for user {user_id}: {e:#}");
                    continue;
                }
            };

            if overdue.is_empty() {
                continue;
            }

            let now = Utc::now().with_timezone(&self.timezone);
            let mut sent = 0usize;
            for task in &overdue {
                let msg = formatting::format_overdue_notification(task, now);
                if let Err(e) = self.sink.send(user_id, &msg).await {
                    error!(
                        "Overdue followup: failed to send to user {user_id} (task {}): {e:#}",
                        task.id
                    );
                    continue;
                }
                sent += 1;
            }
            info!("Overdue followup sent to user {user_id} ({sent} of {})", overdue.len());
        }
    }

    /// Monthly report for the calendar month prior to the current one,
    /// computed at execution time.
    async fn send_monthly_report(&self) {
        let now = Utc::now().with_timezone(&self.timezone);
        let (year, month) = previous_month(now.year(), now.month());
        info!("Monthly expense report triggered for {year}-{month:02}");

        let user_ids = match self.tasks.list_active_user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Monthly report: failed to list users: {e:#}");
                return;
            }
        };

        for user_id in user_ids {
            let report = match self.reports.monthly_report(user_id, year, month).await {
                Ok(report) => report,
                Err(e) => {
                    error!("Monthly report: failed to generate for user {user_id}: {e:#}");
                    continue;
                }
            };

            if let Err(e) = self.sink.send(user_id, &report).await {
                error!("Monthly report: failed to send to user {user_id}: {e:#}");
                continue;
            }
            info!("Monthly report sent to user {user_id} ({year}-{month:02})");
        }
    }
}
