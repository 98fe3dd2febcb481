//! Feature modules. Each one owns a single user-facing capability and can be
//! reasoned about (and tested) on its own.

pub mod digest;
pub mod formatting;
pub mod recurrence;
pub mod reminders;

pub use digest::{DailyScheduler, DailyTask, TaskKind};
pub use recurrence::{next_occurrence, RecurrenceRule};
pub use reminders::ReminderScheduler;
