//! # Reminders Feature
//!
//! Scheduled reminder system: persistent delivery queue, polling scheduler
//! with per-reminder retry tracking, and the intake/cancellation facade.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true

pub mod intake;
pub mod notifier;
pub mod scheduler;

pub use intake::Intake;
pub use notifier::{LogNotifier, Notifier};
pub use scheduler::ReminderScheduler;
