//! Database access: pooled store, schema, retry policy, snapshots

pub mod init;
pub mod retry;
pub mod snapshot;
pub mod store;
pub mod transaction;

pub use retry::{RetryDecision, RetryPolicy};
pub use snapshot::FlushOutcome;
pub use store::{Store, StoreLocation, StoreOptions};
pub use transaction::MonitoredTransaction;
