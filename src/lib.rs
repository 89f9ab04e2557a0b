// Core layer - shared types and configuration
pub mod core;

// Features layer - all feature modules
pub mod features;

// Infrastructure
pub mod database;

// Re-export core config for backwards compatibility
pub use core::Config;

// Re-export feature items for backwards compatibility
pub use features::{
    // Reminders
    Intake, LogNotifier, Notifier, ReminderScheduler,
};

// Re-export store types
pub use database::{Database, LogEntry, Reminder};
