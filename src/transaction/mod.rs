//! Managed transactions with retry, backoff and nesting

pub mod manager;
pub mod retry;

pub use manager::{Transaction, TransactionContext, TransactionManager};
pub use retry::RetryPolicy;
