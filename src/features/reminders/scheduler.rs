//! Delivery scheduler
//!
//! A timer-driven loop that polls the store for due reminders and fans each
//! one out to the notifier as its own task. Outcomes are written back to the
//! store; nothing in a cycle can kill the loop. There is no partial-cycle
//! state to recover: eligibility is recomputed from durable rows every tick,
//! so a crash simply means the next process picks up where the queue is.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error};
use tokio::task::{JoinHandle, JoinSet};

use crate::database::Database;
use crate::features::reminders::notifier::Notifier;

/// Periodic poll-and-dispatch loop over the reminder queue.
pub struct ReminderScheduler {
    database: Database,
    notifier: Arc<dyn Notifier>,
    poll_interval: Duration,
    max_num_tries: i64,
}

impl ReminderScheduler {
    pub fn new(
        database: Database,
        notifier: Arc<dyn Notifier>,
        poll_interval: Duration,
        max_num_tries: i64,
    ) -> Self {
        ReminderScheduler {
            database,
            notifier,
            poll_interval,
            max_num_tries,
        }
    }

    /// Spawn the polling loop on the runtime and return its handle.
    ///
    /// The loop runs until the process exits; request handling (intake,
    /// cancellation) runs on other tasks entirely independent of it.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.poll_interval);
            loop {
                interval.tick().await;
                self.run_cycle(Utc::now()).await;
            }
        })
    }

    /// One poll-and-dispatch cycle at time `now`.
    ///
    /// Every eligible reminder gets an independent delivery task; a slow or
    /// failing send blocks neither its siblings nor the next tick. The
    /// attempt counter is bumped regardless of outcome, matching the
    /// original queue's accounting (a delivered reminder's counter keeps
    /// advancing on the attempt that delivered it; `delivered_on` already
    /// excludes it from future scans).
    ///
    /// Public so tests can drive cycles with simulated time.
    pub async fn run_cycle(&self, now: DateTime<Utc>) {
        let due = self.database.deliverable_reminders(self.max_num_tries, now);
        if due.is_empty() {
            return;
        }
        debug!("Checking queue: {} reminders due", due.len());

        let mut deliveries = JoinSet::new();
        for reminder in due {
            let database = self.database.clone();
            let notifier = Arc::clone(&self.notifier);
            deliveries.spawn(async move {
                match notifier.send(reminder.destination, &reminder.message).await {
                    Ok(()) => {
                        if !database.mark_delivered(reminder.destination, reminder.id) {
                            error!(
                                "Failed to mark reminder {} (destination {}) as delivered",
                                reminder.id, reminder.destination
                            );
                        }
                    }
                    Err(e) => {
                        error!(
                            "Failed to deliver reminder {} (destination {}): {e}",
                            reminder.id, reminder.destination
                        );
                        database.log_error(&format!(
                            "failed to deliver reminder {} to {}: {e}",
                            reminder.id, reminder.destination
                        ));
                    }
                }

                if !database.increment_tries(reminder.destination, reminder.id) {
                    error!(
                        "Failed to increment num_tries for reminder {} (destination {})",
                        reminder.id, reminder.destination
                    );
                }
            });
        }

        // One candidate's panic must not abort the rest of the cycle
        while let Some(joined) = deliveries.join_next().await {
            if let Err(e) = joined {
                error!("Delivery task failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;

    /// Notifier that records sends and fails on demand.
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(RecordingNotifier {
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn sent(&self) -> Vec<(i64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, destination: i64, message: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((destination, message.to_string()));
            if self.fail {
                Err(anyhow!("transport unavailable"))
            } else {
                Ok(())
            }
        }
    }

    fn scheduler(database: Database, notifier: Arc<RecordingNotifier>) -> ReminderScheduler {
        ReminderScheduler::new(database, notifier, Duration::from_secs(10), 3)
    }

    #[tokio::test]
    async fn test_successful_delivery_cycle() {
        let db = Database::open_in_memory().unwrap();
        let fire_at = Utc::now();
        assert!(db.enqueue(42, "pay rent", fire_at));

        let id = db_reminder_id(&db, 42);
        let notifier = RecordingNotifier::new(false);
        let scheduler = scheduler(db.clone(), notifier.clone());

        // One second before the fire time: nothing due
        scheduler.run_cycle(fire_at - ChronoDuration::seconds(1)).await;
        assert!(notifier.sent().is_empty());
        assert_eq!(db.pending_reminders(42)[0].num_tries, 0);

        // One second after: delivered exactly once
        scheduler.run_cycle(fire_at + ChronoDuration::seconds(1)).await;
        assert_eq!(notifier.sent(), vec![(42, "pay rent".to_string())]);

        let reminder = db.reminder(42, id).unwrap();
        assert!(reminder.delivered_at.is_some());
        assert_eq!(reminder.num_tries, 1);

        // Delivered rows never come back
        scheduler.run_cycle(fire_at + ChronoDuration::seconds(2)).await;
        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(db.reminder(42, id).unwrap().num_tries, 1);
    }

    #[tokio::test]
    async fn test_failed_deliveries_exhaust_retry_ceiling() {
        let db = Database::open_in_memory().unwrap();
        let fire_at = Utc::now() - ChronoDuration::seconds(60);
        assert!(db.enqueue(42, "pay rent", fire_at));

        let notifier = RecordingNotifier::new(true);
        let scheduler = scheduler(db.clone(), notifier.clone());

        // Ceiling is 3: each cycle attempts once and bumps the counter
        for cycle in 1..=3 {
            scheduler.run_cycle(Utc::now()).await;
            assert_eq!(notifier.sent().len(), cycle);
        }

        let id = db_reminder_id(&db, 42);
        let reminder = db.reminder(42, id).unwrap();
        assert_eq!(reminder.num_tries, 3);
        assert!(reminder.delivered_at.is_none());

        // Cycle ceiling+1: exhausted, no further attempts
        scheduler.run_cycle(Utc::now()).await;
        assert_eq!(notifier.sent().len(), 3);

        // Still visible to the cancellation path, and failures were logged
        assert_eq!(db.pending_reminders(42).len(), 1);
        assert!(db
            .recent_logs(10)
            .iter()
            .any(|entry| entry.kind == "err" && entry.message.contains("failed to deliver")));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_other_candidates() {
        let db = Database::open_in_memory().unwrap();
        let fire_at = Utc::now() - ChronoDuration::seconds(60);
        assert!(db.enqueue(1, "first", fire_at));
        assert!(db.enqueue(2, "second", fire_at));

        let notifier = RecordingNotifier::new(true);
        let scheduler = scheduler(db.clone(), notifier.clone());
        scheduler.run_cycle(Utc::now()).await;

        // Both candidates were attempted despite both sends failing
        let mut sent = notifier.sent();
        sent.sort();
        assert_eq!(
            sent,
            vec![(1, "first".to_string()), (2, "second".to_string())]
        );
        assert_eq!(db.pending_reminders(1)[0].num_tries, 1);
        assert_eq!(db.pending_reminders(2)[0].num_tries, 1);
    }

    /// Notifier that cancels the reminder while its delivery is in flight.
    struct CancellingNotifier {
        db: Database,
        id: i64,
    }

    #[async_trait]
    impl Notifier for CancellingNotifier {
        async fn send(&self, destination: i64, _message: &str) -> anyhow::Result<()> {
            assert!(self.db.delete(destination, self.id));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cancelled_mid_flight_is_a_quiet_no_op() {
        let db = Database::open_in_memory().unwrap();
        let fire_at = Utc::now() - ChronoDuration::seconds(60);
        assert!(db.enqueue(42, "pay rent", fire_at));
        let id = db_reminder_id(&db, 42);

        // The row vanishes between dispatch and the outcome writes; both
        // store calls miss their row and the cycle completes anyway.
        let notifier = Arc::new(CancellingNotifier { db: db.clone(), id });
        let scheduler = ReminderScheduler::new(db.clone(), notifier, Duration::from_secs(10), 3);
        scheduler.run_cycle(Utc::now()).await;

        assert!(db.reminder(42, id).is_none());
        assert!(db.pending_reminders(42).is_empty());
    }

    fn db_reminder_id(db: &Database, destination: i64) -> i64 {
        db.pending_reminders(destination)[0].id
    }
}
