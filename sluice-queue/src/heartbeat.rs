//! Lead-queue heartbeat: fixed-interval health checks, reconnection with
//! masked credential logging, and expired pending-result cleanup.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use sluice_core::connstring;

use crate::queue::{run_bootstrap, QueueShared};

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

pub(crate) fn heartbeat_loop(shared: Arc<QueueShared>) {
    let interval = Duration::from_secs(shared.config.effective_heartbeat_interval_secs());
    debug!(
        "{} heartbeat started (interval {}s)",
        shared.designator,
        interval.as_secs()
    );

    while !shared.shutdown.load(Ordering::Acquire) {
        sleep_until_tick(&shared, interval);
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        perform_heartbeat(&shared);
    }
    debug!("{} heartbeat stopped", shared.designator);
}

/// Sleep for one interval in short slices so shutdown is prompt.
fn sleep_until_tick(shared: &Arc<QueueShared>, interval: Duration) {
    let mut remaining = interval;
    while remaining > Duration::ZERO && !shared.shutdown.load(Ordering::Acquire) {
        let slice = remaining.min(SHUTDOWN_POLL);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}

/// One heartbeat tick: health-check the persistent connection under the
/// connection lock; on failure clear it and attempt a fresh connection.
/// A failed round trip alone does not destroy the connection — the
/// reconnect decision happens here, not in the engine.
pub(crate) fn perform_heartbeat(shared: &Arc<QueueShared>) {
    let designator = &shared.designator;
    let was_connected = shared.is_connected.load(Ordering::Acquire);
    let mut reconnected = false;

    let healthy = {
        let Ok(mut guard) = shared.connection.lock() else {
            return;
        };
        let check = guard.as_mut().map(|handle| handle.health_check());
        match check {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                warn!("{designator} heartbeat health check failed: {e}");
                // Drop the dead connection before retrying.
                guard.take();
                reconnected = try_reconnect(shared, &mut guard);
                reconnected
            }
            None => {
                reconnected = try_reconnect(shared, &mut guard);
                reconnected
            }
        }
    };

    shared.is_connected.store(healthy, Ordering::Release);
    if let Ok(mut last) = shared.last_heartbeat.lock() {
        *last = Some(Instant::now());
    }

    if was_connected != healthy {
        if healthy {
            info!("{designator} database connection established");
        } else {
            warn!("{designator} database connection lost - will retry");
        }
    }

    // A reconnection after a completed bootstrap refreshes the query
    // cache and migration marks.
    if reconnected {
        let completed = shared.bootstrap.lock().map(|b| b.completed).unwrap_or(false);
        if completed {
            run_bootstrap(shared);
        }
    }

    let cleaned = shared.pending.cleanup_expired();
    if cleaned > 0 {
        debug!("{designator} cleaned up {cleaned} expired pending results");
    }
    debug!(
        "{designator} heartbeat: connection {}",
        if healthy { "OK" } else { "FAILED" }
    );
}

fn try_reconnect(
    shared: &Arc<QueueShared>,
    guard: &mut Option<sluice_engines::DatabaseHandle>,
) -> bool {
    let designator = &shared.designator;
    match shared
        .registry
        .open_connection(&shared.config, designator)
    {
        Ok(mut handle) => match handle.health_check() {
            Ok(()) => {
                *guard = Some(handle);
                true
            }
            Err(e) => {
                warn!("{designator} reconnect health check failed: {e}");
                false
            }
        },
        Err(e) => {
            let masked = shared
                .config
                .engine_kind()
                .map(|kind| {
                    connstring::mask_connection_string(&connstring::build_connection_string(
                        kind,
                        &shared.config,
                    ))
                })
                .unwrap_or_default();
            warn!("{designator} reconnect failed for '{masked}': {e}");
            false
        }
    }
}
