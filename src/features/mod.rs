//! # Features Module
//!
//! All feature modules for the reminder bot.

pub mod reminders;

// Re-export feature items
pub use reminders::{Intake, LogNotifier, Notifier, ReminderScheduler};
