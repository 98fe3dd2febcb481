//! Collaborator contracts for the notification engine.
//!
//! The scheduler loops never hold reminder state between ticks; everything they
//! need is re-read through these traits, so a restart re-derives due work from
//! the persisted rows. `Database` provides the SQLite implementation; tests
//! substitute in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::features::recurrence::RecurrenceRule;

/// A scheduled notification bound to one task.
///
/// `remind_at` is advanced in place each time a recurring reminder fires;
/// a single-shot reminder is deactivated instead (terminal state).
#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: i64,
    pub task_id: i64,
    pub remind_at: DateTime<Utc>,
    pub recurrence: Option<RecurrenceRule>,
    pub last_fired_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Reminder {
    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }
}

/// A reminder joined with its owning task's title and user, the shape the
/// due-lookup returns so delivery needs no second query.
#[derive(Debug, Clone)]
pub struct ReminderWithTask {
    pub reminder: Reminder,
    pub task_title: String,
    pub user_id: i64,
}

/// Todo row shape consumed by the daily broadcasts.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub due_date: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Expense row shape consumed by the monthly report.
#[derive(Debug, Clone)]
pub struct Expense {
    pub description: String,
    pub amount: i64,
    pub is_paid: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Persistent reminder collection.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Active reminders with `remind_at <= now`, earliest first.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ReminderWithTask>>;

    /// Advance a recurring reminder to its next occurrence and stamp
    /// `last_fired_at`.
    async fn reschedule(&self, id: i64, next_remind_at: DateTime<Utc>) -> Result<()>;

    /// Permanently retire a single-shot reminder and stamp `last_fired_at`.
    async fn deactivate(&self, id: i64) -> Result<()>;

    async fn create(
        &self,
        task_id: i64,
        remind_at: DateTime<Utc>,
        recurrence: Option<RecurrenceRule>,
    ) -> Result<()>;

    /// Move the task's active reminder, or create a new single-shot one if the
    /// task has none.
    async fn upsert_by_task(&self, task_id: i64, remind_at: DateTime<Utc>) -> Result<()>;

    async fn list_active_by_user(&self, user_id: i64) -> Result<Vec<ReminderWithTask>>;
}

/// Read-side of the todo service consumed by the daily broadcasts.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Users with at least one non-deleted task.
    async fn list_active_user_ids(&self) -> Result<Vec<i64>>;

    async fn list_pending_by_user(&self, user_id: i64) -> Result<Vec<Task>>;

    /// Pending tasks whose due date fell before the start of the current day.
    async fn list_overdue_by_user(&self, user_id: i64) -> Result<Vec<Task>>;
}

/// Expense-report collaborator for the monthly broadcast. Returns rendered,
/// user-facing text for the given calendar month.
#[async_trait]
pub trait ExpenseReporter: Send + Sync {
    async fn monthly_report(&self, user_id: i64, year: i32, month: u32) -> Result<String>;
}
