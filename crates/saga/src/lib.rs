//! Saga coordinator for checkout.
//!
//! A checkout spans two participants that cannot share a database
//! transaction: the wallet ledger and the product ledger. The saga drives
//! them through a fixed sequence:
//! 1. Reserve funds
//! 2. Reserve products (sorted by product ID)
//! 3. Commit funds
//! 4. Commit products
//! 5. Save the completion event to the outbox
//!
//! If a step fails, whatever is still held is released and the original
//! failure is returned. Releases cannot undo a funds commit, so failures in
//! steps 4 and 5 are logged for manual reconciliation.

pub mod coordinator;
pub mod error;
pub mod services;
pub mod state;
pub mod steps;

pub use coordinator::SagaCoordinator;
pub use error::{ParticipantError, Result, SagaError};
pub use services::{
    DEFAULT_CALL_TIMEOUT, InMemoryMoneyReserver, InMemoryOutboxWriter, InMemoryProductsReserver,
    MoneyReserver, ParticipantOp, ProductsParticipant, ProductsReserver, ReservationToken,
    WalletParticipant,
};
pub use state::SagaState;
pub use steps::{CompensatingAction, CompensationPoint, SagaStep};
