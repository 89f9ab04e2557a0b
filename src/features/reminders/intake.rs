//! Intake and cancellation facade
//!
//! The narrow surface a chat front end calls after it has finished its own
//! interpretation of the user's words: submit a validated
//! (destination, message, fire time) triple, list what is still pending, or
//! cancel one reminder. Natural-language parsing stays on the front end's
//! side of this boundary.

use chrono::{DateTime, Utc};
use log::info;

use crate::database::{Database, Reminder};

/// Front-end facade over the reminder store.
#[derive(Clone)]
pub struct Intake {
    database: Database,
}

impl Intake {
    pub fn new(database: Database) -> Self {
        Intake { database }
    }

    /// Accept a reminder for future delivery.
    ///
    /// Rejects empty messages and fire times that are not in the future;
    /// everything else forwards to the store's insert-or-ignore enqueue.
    pub fn submit(&self, destination: i64, message: &str, fire_at: DateTime<Utc>) -> bool {
        if message.trim().is_empty() {
            return false;
        }
        if fire_at <= Utc::now() {
            return false;
        }

        if self.database.enqueue(destination, message, fire_at) {
            info!("Enqueued reminder for {destination} at {fire_at}");
            true
        } else {
            self.database
                .log_error(&format!("failed to save reminder for {destination}"));
            false
        }
    }

    /// Reminders still pending for `destination`, most recently enqueued
    /// first. Includes retry-exhausted ones so they can still be cancelled.
    pub fn pending(&self, destination: i64) -> Vec<Reminder> {
        self.database.pending_reminders(destination)
    }

    /// Cancel one reminder. Fails when the id does not belong to
    /// `destination` or the reminder is already gone.
    pub fn cancel(&self, destination: i64, id: i64) -> bool {
        let removed = self.database.delete(destination, id);
        if removed {
            info!("Cancelled reminder {id} for {destination}");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn intake() -> (Intake, Database) {
        let db = Database::open_in_memory().unwrap();
        (Intake::new(db.clone()), db)
    }

    #[test]
    fn test_submit_and_pending() {
        let (intake, _db) = intake();
        let fire_at = Utc::now() + Duration::minutes(5);

        assert!(intake.submit(42, "pay rent", fire_at));
        let pending = intake.pending(42);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message, "pay rent");
        assert_eq!(pending[0].fire_at.timestamp(), fire_at.timestamp());

        assert!(intake.pending(7).is_empty());
    }

    #[test]
    fn test_submit_rejects_invalid_input() {
        let (intake, _db) = intake();
        let future = Utc::now() + Duration::minutes(5);

        assert!(!intake.submit(42, "", future));
        assert!(!intake.submit(42, "   ", future));
        assert!(!intake.submit(42, "too late", Utc::now() - Duration::seconds(1)));
        assert!(intake.pending(42).is_empty());
    }

    #[test]
    fn test_cancel() {
        let (intake, _db) = intake();
        assert!(intake.submit(42, "pay rent", Utc::now() + Duration::minutes(5)));
        let id = intake.pending(42)[0].id;

        // Only the owning destination may cancel
        assert!(!intake.cancel(7, id));
        assert_eq!(intake.pending(42).len(), 1);

        assert!(intake.cancel(42, id));
        assert!(intake.pending(42).is_empty());
        assert!(!intake.cancel(42, id));
    }
}
