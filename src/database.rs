//! SQLite persistence.
//!
//! `Database` is a cheap-to-clone handle over one thread-safe connection and
//! implements the collaborator traits the schedulers consume. Timestamps are
//! stored as RFC 3339 UTC strings, which also compare correctly inside SQL.
//! Recurrence rule strings are parsed into `RecurrenceRule` when rows are
//! read; a malformed rule degrades to a daily schedule with a logged warning
//! instead of killing the reminder.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use chrono_tz::Tz;
use log::warn;
use sqlite::{Connection, ConnectionThreadSafe, State};
use tokio::sync::Mutex;

use crate::features::formatting;
use crate::features::recurrence::{add_months, at_local, RecurrenceRule};
use crate::store::{
    Expense, ExpenseReporter, Reminder, ReminderStore, ReminderWithTask, Task, TaskRepository,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS todos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    due_date TEXT,
    is_completed INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE TABLE IF NOT EXISTS reminders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id INTEGER NOT NULL REFERENCES todos(id),
    remind_at TEXT NOT NULL,
    is_recurring INTEGER NOT NULL DEFAULT 0,
    recurrence_rule TEXT,
    last_fired_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);

CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders (is_active, remind_at);

CREATE TABLE IF NOT EXISTS expenses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    description TEXT NOT NULL,
    amount INTEGER NOT NULL,
    is_paid INTEGER NOT NULL DEFAULT 0,
    recorded_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);
";

fn encode_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid stored timestamp: {raw:?}"))
}

fn decode_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(decode_ts).transpose()
}

fn decode_rule(id: i64, is_recurring: bool, raw: Option<String>) -> Option<RecurrenceRule> {
    if !is_recurring {
        return None;
    }
    let raw = raw?;
    match RecurrenceRule::parse(&raw) {
        Ok(rule) => Some(rule),
        Err(e) => {
            warn!("Reminder {id} has malformed recurrence rule {raw:?}, degrading to daily: {e:#}");
            Some(RecurrenceRule::Daily)
        }
    }
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<ConnectionThreadSafe>>,
    timezone: Tz,
}

impl Database {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub async fn new(path: &str, timezone: Tz) -> Result<Self> {
        let conn = Connection::open_thread_safe(path)
            .with_context(|| format!("open database at {path}"))?;
        conn.execute(SCHEMA).context("create database schema")?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
            timezone,
        })
    }

    /// Insert a todo row. Todo CRUD itself belongs to the chat service; this
    /// seeding hook exists for that service and for tests.
    pub async fn create_task(
        &self,
        user_id: i64,
        title: &str,
        due_date: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("INSERT INTO todos (user_id, title, due_date) VALUES (?, ?, ?)")?;
        stmt.bind((1, user_id))?;
        stmt.bind((2, title))?;
        stmt.bind((3, due_date.map(encode_ts).as_deref()))?;
        while stmt.next()? != State::Done {}
        drop(stmt);

        let mut stmt = conn.prepare("SELECT last_insert_rowid()")?;
        stmt.next()?;
        Ok(stmt.read::<i64, _>(0)?)
    }

    pub async fn complete_task(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("UPDATE todos SET is_completed = 1 WHERE id = ?")?;
        stmt.bind((1, id))?;
        while stmt.next()? != State::Done {}
        Ok(())
    }

    /// Insert an expense row (seeding hook, same caveat as `create_task`).
    pub async fn record_expense(
        &self,
        user_id: i64,
        description: &str,
        amount: i64,
        is_paid: bool,
        recorded_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "INSERT INTO expenses (user_id, description, amount, is_paid, recorded_at)
             VALUES (?, ?, ?, ?, ?)",
        )?;
        stmt.bind((1, user_id))?;
        stmt.bind((2, description))?;
        stmt.bind((3, amount))?;
        stmt.bind((4, is_paid as i64))?;
        stmt.bind((5, encode_ts(recorded_at).as_str()))?;
        while stmt.next()? != State::Done {}
        Ok(())
    }

    fn read_reminder_with_task(stmt: &sqlite::Statement<'_>) -> Result<ReminderWithTask> {
        let id = stmt.read::<i64, _>("id")?;
        let is_recurring = stmt.read::<i64, _>("is_recurring")? != 0;
        let rule = stmt.read::<Option<String>, _>("recurrence_rule")?;
        Ok(ReminderWithTask {
            reminder: Reminder {
                id,
                task_id: stmt.read::<i64, _>("task_id")?,
                remind_at: decode_ts(&stmt.read::<String, _>("remind_at")?)?,
                recurrence: decode_rule(id, is_recurring, rule),
                last_fired_at: decode_opt_ts(stmt.read::<Option<String>, _>("last_fired_at")?)?,
                is_active: stmt.read::<i64, _>("is_active")? != 0,
                created_at: decode_ts(&stmt.read::<String, _>("created_at")?)?,
            },
            task_title: stmt.read::<String, _>("title")?,
            user_id: stmt.read::<i64, _>("user_id")?,
        })
    }

    fn read_task(stmt: &sqlite::Statement<'_>) -> Result<Task> {
        Ok(Task {
            id: stmt.read::<i64, _>("id")?,
            user_id: stmt.read::<i64, _>("user_id")?,
            title: stmt.read::<String, _>("title")?,
            due_date: decode_opt_ts(stmt.read::<Option<String>, _>("due_date")?)?,
            is_completed: stmt.read::<i64, _>("is_completed")? != 0,
            created_at: decode_ts(&stmt.read::<String, _>("created_at")?)?,
        })
    }
}

#[async_trait]
impl ReminderStore for Database {
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ReminderWithTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.task_id, r.remind_at, r.is_recurring, r.recurrence_rule,
                    r.last_fired_at, r.is_active, r.created_at, t.title, t.user_id
             FROM reminders r
             JOIN todos t ON t.id = r.task_id
             WHERE r.is_active = 1 AND r.remind_at <= ? AND t.deleted_at IS NULL
             ORDER BY r.remind_at ASC",
        )?;
        stmt.bind((1, encode_ts(now).as_str()))?;

        let mut due = Vec::new();
        while stmt.next()? == State::Row {
            due.push(Self::read_reminder_with_task(&stmt)?);
        }
        Ok(due)
    }

    async fn reschedule(&self, id: i64, next_remind_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("UPDATE reminders SET remind_at = ?, last_fired_at = ? WHERE id = ?")?;
        stmt.bind((1, encode_ts(next_remind_at).as_str()))?;
        stmt.bind((2, encode_ts(Utc::now()).as_str()))?;
        stmt.bind((3, id))?;
        while stmt.next()? != State::Done {}
        Ok(())
    }

    async fn deactivate(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("UPDATE reminders SET is_active = 0, last_fired_at = ? WHERE id = ?")?;
        stmt.bind((1, encode_ts(Utc::now()).as_str()))?;
        stmt.bind((2, id))?;
        while stmt.next()? != State::Done {}
        Ok(())
    }

    async fn create(
        &self,
        task_id: i64,
        remind_at: DateTime<Utc>,
        recurrence: Option<RecurrenceRule>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "INSERT INTO reminders (task_id, remind_at, is_recurring, recurrence_rule)
             VALUES (?, ?, ?, ?)",
        )?;
        stmt.bind((1, task_id))?;
        stmt.bind((2, encode_ts(remind_at).as_str()))?;
        stmt.bind((3, recurrence.is_some() as i64))?;
        stmt.bind((4, recurrence.map(|r| r.as_rule_string()).as_deref()))?;
        while stmt.next()? != State::Done {}
        Ok(())
    }

    async fn upsert_by_task(&self, task_id: i64, remind_at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("UPDATE reminders SET remind_at = ? WHERE task_id = ? AND is_active = 1")?;
        stmt.bind((1, encode_ts(remind_at).as_str()))?;
        stmt.bind((2, task_id))?;
        while stmt.next()? != State::Done {}
        drop(stmt);

        if conn.change_count() == 0 {
            let mut stmt = conn
                .prepare("INSERT INTO reminders (task_id, remind_at, is_recurring) VALUES (?, ?, 0)")?;
            stmt.bind((1, task_id))?;
            stmt.bind((2, encode_ts(remind_at).as_str()))?;
            while stmt.next()? != State::Done {}
        }
        Ok(())
    }

    async fn list_active_by_user(&self, user_id: i64) -> Result<Vec<ReminderWithTask>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT r.id, r.task_id, r.remind_at, r.is_recurring, r.recurrence_rule,
                    r.last_fired_at, r.is_active, r.created_at, t.title, t.user_id
             FROM reminders r
             JOIN todos t ON t.id = r.task_id
             WHERE t.user_id = ? AND r.is_active = 1 AND t.deleted_at IS NULL
             ORDER BY r.remind_at ASC",
        )?;
        stmt.bind((1, user_id))?;

        let mut reminders = Vec::new();
        while stmt.next()? == State::Row {
            reminders.push(Self::read_reminder_with_task(&stmt)?);
        }
        Ok(reminders)
    }
}

#[async_trait]
impl TaskRepository for Database {
    async fn list_active_user_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT DISTINCT user_id FROM todos WHERE deleted_at IS NULL ORDER BY user_id")?;
        let mut ids = Vec::new();
        while stmt.next()? == State::Row {
            ids.push(stmt.read::<i64, _>(0)?);
        }
        Ok(ids)
    }

    async fn list_pending_by_user(&self, user_id: i64) -> Result<Vec<Task>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, due_date, is_completed, created_at
             FROM todos
             WHERE user_id = ? AND is_completed = 0 AND deleted_at IS NULL
             ORDER BY due_date IS NULL, due_date ASC, id ASC",
        )?;
        stmt.bind((1, user_id))?;

        let mut tasks = Vec::new();
        while stmt.next()? == State::Row {
            tasks.push(Self::read_task(&stmt)?);
        }
        Ok(tasks)
    }

    async fn list_overdue_by_user(&self, user_id: i64) -> Result<Vec<Task>> {
        // Overdue means the due date fell before the start of the current day
        // in the configured timezone; something due later today is not nagged.
        let now = Utc::now().with_timezone(&self.timezone);
        let today_start = at_local(self.timezone, now.date_naive(), 0, 0).with_timezone(&Utc);

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, due_date, is_completed, created_at
             FROM todos
             WHERE user_id = ? AND is_completed = 0 AND deleted_at IS NULL
               AND due_date IS NOT NULL AND due_date < ?
             ORDER BY due_date ASC",
        )?;
        stmt.bind((1, user_id))?;
        stmt.bind((2, encode_ts(today_start).as_str()))?;

        let mut tasks = Vec::new();
        while stmt.next()? == State::Row {
            tasks.push(Self::read_task(&stmt)?);
        }
        Ok(tasks)
    }
}

#[async_trait]
impl ExpenseReporter for Database {
    async fn monthly_report(&self, user_id: i64, year: i32, month: u32) -> Result<String> {
        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .with_context(|| format!("invalid report month: {year}-{month}"))?;
        let (next_year, next_month) = add_months(year, month, 1);
        let next_first = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .with_context(|| format!("invalid report month: {year}-{month}"))?;
        let start = at_local(self.timezone, first, 0, 0).with_timezone(&Utc);
        let end = at_local(self.timezone, next_first, 0, 0).with_timezone(&Utc);

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT description, amount, is_paid, recorded_at
             FROM expenses
             WHERE user_id = ? AND recorded_at >= ? AND recorded_at < ?
             ORDER BY recorded_at ASC",
        )?;
        stmt.bind((1, user_id))?;
        stmt.bind((2, encode_ts(start).as_str()))?;
        stmt.bind((3, encode_ts(end).as_str()))?;

        let mut expenses = Vec::new();
        while stmt.next()? == State::Row {
            expenses.push(Expense {
                description: stmt.read::<String, _>("description")?,
                amount: stmt.read::<i64, _>("amount")?,
                is_paid: stmt.read::<i64, _>("is_paid")? != 0,
                recorded_at: decode_ts(&stmt.read::<String, _>("recorded_at")?)?,
            });
        }
        drop(stmt);

        Ok(formatting::format_monthly_report(&expenses, year, month, self.timezone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Weekday};
    use chrono_tz::Asia::Jakarta;

    async fn test_db() -> Database {
        Database::new(":memory:", Jakarta).await.unwrap()
    }

    fn jakarta_utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Jakarta
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_list_due_returns_only_active_past_reminders() {
        let db = test_db().await;
        let task_a = db.create_task(1, "water plants", None).await.unwrap();
        let task_b = db.create_task(1, "call dentist", None).await.unwrap();
        let task_c = db.create_task(2, "pay rent", None).await.unwrap();

        let past = Utc::now() - Duration::minutes(10);
        let earlier_past = Utc::now() - Duration::hours(2);
        let future = Utc::now() + Duration::hours(1);
        db.create(task_a, past, None).await.unwrap();
        db.create(task_b, future, None).await.unwrap();
        db.create(task_c, earlier_past, Some(RecurrenceRule::Daily))
            .await
            .unwrap();

        let due = db.list_due(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 2);
        // Earliest remind_at first.
        assert_eq!(due[0].task_title, "pay rent");
        assert_eq!(due[0].user_id, 2);
        assert_eq!(due[0].reminder.recurrence, Some(RecurrenceRule::Daily));
        assert_eq!(due[1].task_title, "water plants");
        assert!(due[1].reminder.recurrence.is_none());
    }

    #[tokio::test]
    async fn test_deactivated_reminder_never_due_again() {
        let db = test_db().await;
        let task = db.create_task(1, "one shot", None).await.unwrap();
        db.create(task, Utc::now() - Duration::minutes(1), None)
            .await
            .unwrap();

        let due = db.list_due(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        db.deactivate(due[0].reminder.id).await.unwrap();

        assert!(db.list_due(Utc::now()).await.unwrap().is_empty());
        let active = db.list_active_by_user(1).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_moves_remind_at_and_stamps_fired() {
        let db = test_db().await;
        let task = db.create_task(1, "standup", None).await.unwrap();
        db.create(
            task,
            Utc::now() - Duration::minutes(1),
            Some(RecurrenceRule::Weekly(Weekday::Mon)),
        )
        .await
        .unwrap();

        let due = db.list_due(Utc::now()).await.unwrap();
        let id = due[0].reminder.id;
        let next = Utc::now() + Duration::days(7);
        db.reschedule(id, next).await.unwrap();

        assert!(db.list_due(Utc::now()).await.unwrap().is_empty());
        let active = db.list_active_by_user(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(encode_ts(active[0].reminder.remind_at), encode_ts(next));
        assert!(active[0].reminder.last_fired_at.is_some());
    }

    #[tokio::test]
    async fn test_malformed_rule_degrades_to_daily() {
        let db = test_db().await;
        let task = db.create_task(1, "mystery", None).await.unwrap();
        db.create(task, Utc::now() - Duration::minutes(1), None)
            .await
            .unwrap();
        {
            let conn = db.conn.lock().await;
            let mut stmt = conn
                .prepare("UPDATE reminders SET is_recurring = 1, recurrence_rule = 'fortnightly'")
                .unwrap();
            while stmt.next().unwrap() != State::Done {}
        }

        let due = db.list_due(Utc::now()).await.unwrap();
        assert_eq!(due[0].reminder.recurrence, Some(RecurrenceRule::Daily));
    }

    #[tokio::test]
    async fn test_upsert_by_task_updates_then_creates() {
        let db = test_db().await;
        let task = db.create_task(1, "submit form", None).await.unwrap();

        // No active reminder yet: creates a single-shot one.
        let first = Utc::now() + Duration::hours(2);
        db.upsert_by_task(task, first).await.unwrap();
        let active = db.list_active_by_user(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].reminder.recurrence.is_none());

        // Second upsert moves the existing reminder instead of adding one.
        let moved = Utc::now() + Duration::hours(5);
        db.upsert_by_task(task, moved).await.unwrap();
        let active = db.list_active_by_user(1).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(encode_ts(active[0].reminder.remind_at), encode_ts(moved));
    }

    #[tokio::test]
    async fn test_active_user_ids_and_overdue_listing() {
        let db = test_db().await;
        let overdue_task = db
            .create_task(1, "pay taxes", Some(Utc::now() - Duration::days(3)))
            .await
            .unwrap();
        db.create_task(1, "later", Some(Utc::now() + Duration::days(3)))
            .await
            .unwrap();
        let done = db
            .create_task(2, "old but done", Some(Utc::now() - Duration::days(3)))
            .await
            .unwrap();
        db.complete_task(done).await.unwrap();

        assert_eq!(db.list_active_user_ids().await.unwrap(), vec![1, 2]);

        let overdue = db.list_overdue_by_user(1).await.unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, overdue_task);

        // Completed todos are never overdue.
        assert!(db.list_overdue_by_user(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cloned_handles_share_one_connection_across_tasks() {
        // Both scheduler loops hold their own clone of the handle and run on
        // separate tasks; writes through one clone must be visible to reads
        // through another.
        let db = test_db().await;
        let writer = db.clone();
        tokio::spawn(async move {
            let task = writer.create_task(1, "spawned", None).await.unwrap();
            writer
                .create(task, Utc::now() - Duration::minutes(1), None)
                .await
                .unwrap();
        })
        .await
        .unwrap();

        let due = db.list_due(Utc::now()).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].task_title, "spawned");
    }

    #[tokio::test]
    async fn test_monthly_report_scopes_to_month() {
        let db = test_db().await;
        db.create_task(1, "anchor", None).await.unwrap();
        db.record_expense(1, "Electricity", 450_000, true, jakarta_utc(2026, 1, 25, 10, 0))
            .await
            .unwrap();
        db.record_expense(1, "Internet", 350_000, false, jakarta_utc(2026, 1, 5, 9, 0))
            .await
            .unwrap();
        // Outside the reporting month.
        db.record_expense(1, "Groceries", 200_000, true, jakarta_utc(2026, 2, 2, 9, 0))
            .await
            .unwrap();

        let report = db.monthly_report(1, 2026, 1).await.unwrap();
        assert!(report.contains("January 2026"));
        assert!(report.contains("Electricity"));
        assert!(report.contains("Internet"));
        assert!(!report.contains("Groceries"));
        assert!(report.contains("Rp 800.000"));

        let empty = db.monthly_report(1, 2025, 12).await.unwrap();
        assert!(empty.starts_with("📭 No expenses recorded"));
    }
}
