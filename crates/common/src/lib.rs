//! Shared value objects for the checkout saga.
//!
//! These types cross every crate boundary in the workspace: the participant
//! stores key their rows by [`UserId`] and [`ProductId`], the orchestrator
//! drives a [`CheckoutOrder`], and the outbox serializes that order as the
//! completion event payload.

pub mod ids;
pub mod money;
pub mod order;

pub use ids::{OrderId, ProductId, UserId};
pub use money::Money;
pub use order::{CheckoutOrder, LineItem, OrderStatus, OrderValidationError, PricedLine};
