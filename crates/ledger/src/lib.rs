//! Participant stores for the checkout saga.
//!
//! Both the wallet ledger and the product ledger hold a `(total, reserved)`
//! pair per entity and expose the same three operations:
//!
//! - **reserve** moves the reserved watermark up, failing if the amount
//!   exceeds what is available
//! - **release** moves it back down, clamped at zero
//! - **commit** consumes a reservation, lowering both total and reserved
//!
//! Every call runs in its own short transaction with the row locked, so
//! concurrent sagas touching the same entity are serialized.

pub mod error;
pub mod holding;
pub mod memory;
pub mod postgres;
pub mod retry;
pub mod store;

pub use error::{ErrorKind, Result, StoreError};
pub use holding::{Holding, HoldingError};
pub use memory::{InMemoryProductStore, InMemoryWalletStore};
pub use postgres::{PostgresProductStore, PostgresWalletStore};
pub use retry::{RetryPolicy, is_transient_message, with_retry, with_retry_until};
pub use store::{Product, ProductStore, Wallet, WalletStore};
