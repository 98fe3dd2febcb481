//! Reminder polling loop.
//!
//! Every poll interval the scheduler reads the currently-due active reminders
//! from the store, delivers each one, and advances its state: recurring
//! reminders are rescheduled to their next occurrence, single-shot reminders
//! are deactivated. A failed delivery leaves the row untouched so the next
//! tick retries it (at-least-once; a duplicate after a partial failure is the
//! accepted trade-off).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use log::{error, info};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::delivery::DeliverySink;
use crate::features::formatting;
use crate::features::recurrence::next_occurrence;
use crate::store::ReminderStore;

pub struct ReminderScheduler {
    store: Arc<dyn ReminderStore>,
    sink: Arc<dyn DeliverySink>,
    interval: Duration,
    timezone: Tz,
    shutdown: CancellationToken,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        sink: Arc<dyn DeliverySink>,
        interval: Duration,
        timezone: Tz,
        shutdown: CancellationToken,
    ) -> Self {
        ReminderScheduler {
            store,
            sink,
            interval,
            timezone,
            shutdown,
        }
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// The first tick fires immediately, which doubles as catch-up delivery of
    /// reminders that came due while the process was down.
    pub async fn run(self) {
        info!("Reminder scheduler started (interval: {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = self.shutdown.cancelled() => {
                    info!("Reminder scheduler stopped");
                    return;
                }
            }
        }
    }

    /// One due-check-and-deliver cycle.
    async fn tick(&self) {
        let due = match self.store.list_due(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                // Abort the whole tick; the next one re-reads from scratch.
                error!("Failed to list due reminders: {e:#}");
                return;
            }
        };

        for r in due {
            let text = formatting::format_reminder_notification(&r, self.timezone);
            if let Err(e) = self.sink.send(r.user_id, &text).await {
                // State is not advanced, so the reminder stays due and is
                // retried on the next tick.
                error!(
                    "Failed to send reminder {} to user {}: {e:#}",
                    r.reminder.id, r.user_id
                );
                continue;
            }

            info!(
                "Reminder {} sent to user {} (task: {})",
                r.reminder.id, r.user_id, r.task_title
            );

            let result = match &r.reminder.recurrence {
                Some(rule) => {
                    let next = next_occurrence(r.reminder.remind_at, rule, Utc::now(), self.timezone);
                    self.store.reschedule(r.reminder.id, next).await
                }
                None => self.store.deactivate(r.reminder.id).await,
            };
            if let Err(e) = result {
                // The row was never advanced, so this reminder is delivered
                // again next tick; per-item failures must not stop the rest.
                error!(
                    "Failed to update reminder {} after delivery: {e:#}",
                    r.reminder.id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::recurrence::RecurrenceRule;
    use crate::store::{Reminder, ReminderWithTask};
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use chrono_tz::Asia::Jakarta;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    struct MemoryStore {
        reminders: Mutex<Vec<ReminderWithTask>>,
        fail_reads: AtomicBool,
    }

    impl MemoryStore {
        fn with(reminders: Vec<ReminderWithTask>) -> Arc<Self> {
            Arc::new(MemoryStore {
                reminders: Mutex::new(reminders),
                fail_reads: AtomicBool::new(false),
            })
        }

        async fn get(&self, id: i64) -> Reminder {
            self.reminders
                .lock()
                .await
                .iter()
                .find(|r| r.reminder.id == id)
                .map(|r| r.reminder.clone())
                .unwrap()
        }
    }

    #[async_trait]
    impl ReminderStore for MemoryStore {
        async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<ReminderWithTask>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                bail!("store unavailable");
            }
            let mut due: Vec<ReminderWithTask> = self
                .reminders
                .lock()
                .await
                .iter()
                .filter(|r| r.reminder.is_active && r.reminder.remind_at <= now)
                .cloned()
                .collect();
            due.sort_by_key(|r| r.reminder.remind_at);
            Ok(due)
        }

        async fn reschedule(&self, id: i64, next_remind_at: DateTime<Utc>) -> Result<()> {
            for r in self.reminders.lock().await.iter_mut() {
                if r.reminder.id == id {
                    r.reminder.remind_at = next_remind_at;
                    r.reminder.last_fired_at = Some(Utc::now());
                }
            }
            Ok(())
        }

        async fn deactivate(&self, id: i64) -> Result<()> {
            for r in self.reminders.lock().await.iter_mut() {
                if r.reminder.id == id {
                    r.reminder.is_active = false;
                    r.reminder.last_fired_at = Some(Utc::now());
                }
            }
            Ok(())
        }

        async fn create(
            &self,
            _task_id: i64,
            _remind_at: DateTime<Utc>,
            _recurrence: Option<RecurrenceRule>,
        ) -> Result<()> {
            Ok(())
        }

        async fn upsert_by_task(&self, _task_id: i64, _remind_at: DateTime<Utc>) -> Result<()> {
            Ok(())
        }

        async fn list_active_by_user(&self, _user_id: i64) -> Result<Vec<ReminderWithTask>> {
            Ok(Vec::new())
        }
    }

    struct RecordingSink {
        sent: Mutex<Vec<(i64, String)>>,
        fail: AtomicBool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(RecordingSink {
                sent: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn send(&self, user_id: i64, text: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                bail!("sink unreachable");
            }
            self.sent.lock().await.push((user_id, text.to_string()));
            Ok(())
        }
    }

    fn due_reminder(id: i64, minutes_ago: i64, recurrence: Option<RecurrenceRule>) -> ReminderWithTask {
        let remind_at = Utc::now() - ChronoDuration::minutes(minutes_ago);
        ReminderWithTask {
            reminder: Reminder {
                id,
                task_id: id,
                remind_at,
                recurrence,
                last_fired_at: None,
                is_active: true,
                created_at: remind_at,
            },
            task_title: format!("task {id}"),
            user_id: 100 + id,
        }
    }

    fn scheduler(store: Arc<MemoryStore>, sink: Arc<RecordingSink>) -> ReminderScheduler {
        ReminderScheduler::new(
            store,
            sink,
            Duration::from_secs(30),
            Jakarta,
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_single_shot_fires_once_then_retires() {
        let store = MemoryStore::with(vec![due_reminder(1, 5, None)]);
        let sink = RecordingSink::new();
        let s = scheduler(store.clone(), sink.clone());

        s.tick().await;
        assert_eq!(sink.sent.lock().await.len(), 1);
        let fired = store.get(1).await;
        assert!(!fired.is_active);
        assert!(fired.last_fired_at.is_some());

        // Further ticks never see it again.
        s.tick().await;
        s.tick().await;
        assert_eq!(sink.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_recurring_rescheduled_in_place() {
        let store = MemoryStore::with(vec![due_reminder(1, 5, Some(RecurrenceRule::Daily))]);
        let sink = RecordingSink::new();
        let s = scheduler(store.clone(), sink.clone());

        s.tick().await;
        assert_eq!(sink.sent.lock().await.len(), 1);
        let fired = store.get(1).await;
        assert!(fired.is_active);
        assert!(fired.remind_at > Utc::now());
        assert!(fired.last_fired_at.is_some());
    }

    #[tokio::test]
    async fn test_past_due_fired_after_outage() {
        // Came due three days ago while the poller was down; the first tick
        // after resume still fires it.
        let store = MemoryStore::with(vec![due_reminder(1, 3 * 24 * 60, None)]);
        let sink = RecordingSink::new();
        let s = scheduler(store.clone(), sink.clone());

        s.tick().await;
        assert_eq!(sink.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delivery_failure_leaves_reminder_due() {
        let store = MemoryStore::with(vec![due_reminder(1, 5, None)]);
        let sink = RecordingSink::new();
        let s = scheduler(store.clone(), sink.clone());

        sink.fail.store(true, Ordering::SeqCst);
        s.tick().await;
        assert_eq!(sink.sent.lock().await.len(), 0);
        let untouched = store.get(1).await;
        assert!(untouched.is_active);
        assert!(untouched.last_fired_at.is_none());

        // Sink recovers; the natural next tick delivers it.
        sink.fail.store(false, Ordering::SeqCst);
        s.tick().await;
        assert_eq!(sink.sent.lock().await.len(), 1);
        assert!(!store.get(1).await.is_active);
    }

    #[tokio::test]
    async fn test_due_reminders_processed_earliest_first() {
        let store = MemoryStore::with(vec![
            due_reminder(1, 10, None),
            due_reminder(2, 5, None),
        ]);
        let sink = RecordingSink::new();
        let s = scheduler(store.clone(), sink.clone());

        s.tick().await;
        let sent = sink.sent.lock().await;
        assert_eq!(sent.len(), 2);
        // Earliest remind_at first.
        assert_eq!(sent[0].0, 101);
        assert_eq!(sent[1].0, 102);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_tick() {
        let store = MemoryStore::with(vec![due_reminder(1, 5, None)]);
        let sink = RecordingSink::new();
        let s = scheduler(store.clone(), sink.clone());

        store.fail_reads.store(true, Ordering::SeqCst);
        s.tick().await;
        assert_eq!(sink.sent.lock().await.len(), 0);
        assert!(store.get(1).await.is_active);

        store.fail_reads.store(false, Ordering::SeqCst);
        s.tick().await;
        assert_eq!(sink.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_prompt_and_idempotent() {
        let store = MemoryStore::with(Vec::new());
        let sink = RecordingSink::new();
        let token = CancellationToken::new();
        let s = ReminderScheduler::new(
            store,
            sink,
            Duration::from_secs(3600),
            Jakarta,
            token.clone(),
        );

        let handle = tokio::spawn(s.run());
        token.cancel();
        token.cancel(); // safe to signal twice
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler did not stop promptly")
            .expect("scheduler task panicked");
    }
}
