//! # Reminders Feature
//!
//! Scheduled reminder delivery: a polling loop that fires due reminders,
//! reschedules recurring ones, and retires single-shot ones.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true

pub mod scheduler;

pub use scheduler::ReminderScheduler;
