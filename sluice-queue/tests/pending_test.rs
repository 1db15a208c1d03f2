//! Pending-result manager semantics: registration, signaling, timeout,
//! and expiry cleanup.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sluice_core::errors::QueueError;
use sluice_core::types::QueryResult;
use sluice_queue::PendingResultManager;

#[test]
fn signal_with_wrong_id_leaves_entry_pending() {
    let manager = PendingResultManager::new();
    let pending = manager.register("q1", Duration::from_secs(5)).unwrap();

    // Signaling a different id returns ownership of the result to the
    // caller and leaves q1 untouched.
    let unclaimed = manager
        .signal_ready("other", QueryResult::failure("misrouted"))
        .unwrap_err();
    assert_eq!(unclaimed.error_message.as_deref(), Some("misrouted"));
    assert!(!pending.is_completed());
    assert_eq!(manager.pending_count(), 1);
}

#[test]
fn signal_completes_and_second_signal_finds_no_match() {
    let manager = PendingResultManager::new();
    let pending = manager.register("q1", Duration::from_secs(5)).unwrap();

    manager
        .signal_ready("q1", QueryResult::rows("[]".into(), 0, vec![], 3))
        .unwrap();
    assert!(pending.is_completed());

    // The entry was consumed by the first signal.
    assert!(manager
        .signal_ready("q1", QueryResult::failure("duplicate"))
        .is_err());
    assert_eq!(manager.pending_count(), 0);

    let result = pending.wait().unwrap();
    assert!(result.success);
    assert_eq!(result.affected_rows, 3);
}

#[test]
fn waiter_receives_result_from_another_thread() {
    let manager = Arc::new(PendingResultManager::new());
    let pending = manager.register("q1", Duration::from_secs(10)).unwrap();

    let signaler = Arc::clone(&manager);
    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        signaler
            .signal_ready("q1", QueryResult::rows("[{\"n\":1}]".into(), 1, vec!["n".into()], 0))
            .unwrap();
    });

    let result = pending.wait().unwrap();
    assert!(result.success);
    assert_eq!(result.row_count, 1);
    worker.join().unwrap();
}

#[test]
fn wait_times_out_distinctly() {
    let manager = PendingResultManager::new();
    let pending = manager.register("q1", Duration::from_millis(100)).unwrap();

    let err = pending.wait().unwrap_err();
    assert!(matches!(err, QueueError::PendingTimeout { ref query_id } if query_id == "q1"));
    assert!(pending.is_timed_out());
}

#[test]
fn duplicate_registration_rejected_while_in_flight() {
    let manager = PendingResultManager::new();
    let _pending = manager.register("q1", Duration::from_secs(5)).unwrap();
    let err = manager.register("q1", Duration::from_secs(5)).unwrap_err();
    assert!(matches!(err, QueueError::DuplicateQueryId { .. }));

    // A different id is fine.
    manager.register("q2", Duration::from_secs(5)).unwrap();
    assert_eq!(manager.pending_count(), 2);
}

#[test]
fn cleanup_removes_expired_entries_once() {
    let manager = PendingResultManager::new();
    let _short = manager.register("expired", Duration::from_millis(20)).unwrap();
    let _long = manager.register("alive", Duration::from_secs(30)).unwrap();

    thread::sleep(Duration::from_millis(60));
    assert_eq!(manager.cleanup_expired(), 1);
    assert_eq!(manager.pending_count(), 1);
    // Nothing further to clean.
    assert_eq!(manager.cleanup_expired(), 0);
}

#[test]
fn cleanup_wakes_stuck_waiters() {
    let manager = Arc::new(PendingResultManager::new());
    let pending = manager.register("q1", Duration::from_millis(80)).unwrap();

    let sweeper = Arc::clone(&manager);
    let cleaner = thread::spawn(move || {
        thread::sleep(Duration::from_millis(120));
        sweeper.cleanup_expired()
    });

    let err = pending.wait().unwrap_err();
    assert!(matches!(err, QueueError::PendingTimeout { .. }));
    cleaner.join().unwrap();
}
