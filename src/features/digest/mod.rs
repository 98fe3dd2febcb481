//! # Digest Feature
//!
//! Once-daily and once-monthly broadcast tasks: the morning briefing, the
//! evening overdue follow-up, and the monthly expense report.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true

pub mod scheduler;

pub use scheduler::{DailyScheduler, DailyTask, TaskKind};
