//! Outbound delivery contract
//!
//! The scheduler's only outward call. Implementations wrap whatever chat
//! transport the deployment uses; the trait keeps the queue core free of any
//! transport protocol.

use anyhow::Result;
use async_trait::async_trait;
use log::info;

/// Sends a reminder message to a destination.
///
/// Must be safe to call concurrently for different destinations: each
/// delivery cycle fans out one send per eligible reminder.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` to `destination`. An `Err` leaves the reminder
    /// pending for the next cycle.
    async fn send(&self, destination: i64, message: &str) -> Result<()>;
}

/// Transport stub that emits reminders to the process log.
///
/// Lets the daemon run without a chat backend; deployments substitute their
/// own `Notifier`.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, destination: i64, message: &str) -> Result<()> {
        info!("Reminder for {destination}: {message}");
        Ok(())
    }
}
