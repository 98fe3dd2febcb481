// Core layer - shared types and configuration
pub mod core;

// Features layer - all feature modules
pub mod features;

// Domain interfaces the schedulers are written against
pub mod store;

// Outbound notification channel (Discord DMs)
pub mod delivery;

// Infrastructure - SQLite persistence
pub mod database;

// Re-export core config for convenience
pub use core::Config;

// Re-export feature items for convenience
pub use features::{
    // Daily digest broadcasts
    DailyScheduler, DailyTask, TaskKind,
    // Recurrence rules
    next_occurrence, RecurrenceRule,
    // Reminder polling
    ReminderScheduler,
};

pub use delivery::{DeliverySink, DiscordSink};
pub use store::{ExpenseReporter, Reminder, ReminderStore, ReminderWithTask, Task, TaskRepository};
