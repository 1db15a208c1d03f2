//! # sluice-queue
//!
//! The queue subsystem: one lead queue per logical database owning the
//! persistent connection, heartbeat, bootstrap, and query cache; worker
//! queues per class (slow/medium/fast/cache) executing routed work on
//! their own connections; a pending-result rendezvous giving synchronous
//! callers a blocking wait over the asynchronous queue model; and the
//! subsystem facade with explicit init/shutdown.

pub mod bootstrap;
pub mod heartbeat;
pub mod manager;
pub mod pending;
pub mod qtc;
pub mod queue;
pub mod subsystem;

pub use bootstrap::{process_bootstrap_rows, BootstrapOutcome};
pub use manager::QueueManager;
pub use pending::{PendingQueryResult, PendingResultManager};
pub use qtc::{QueryCache, QueryCacheEntry};
pub use queue::DatabaseQueue;
pub use subsystem::DatabaseSubsystem;
