//! Participant traits, ledger-backed adapters and in-memory test doubles.

pub mod money;
pub mod participants;
pub mod products;
pub mod writer;

pub use money::{InMemoryMoneyReserver, MoneyReserver, ReservationToken};
pub use participants::{DEFAULT_CALL_TIMEOUT, ProductsParticipant, WalletParticipant};
pub use products::{InMemoryProductsReserver, ProductsReserver};
pub use writer::InMemoryOutboxWriter;

/// The three operations of the reservation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantOp {
    Reserve,
    Commit,
    Release,
}

impl ParticipantOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantOp::Reserve => "reserve",
            ParticipantOp::Commit => "commit",
            ParticipantOp::Release => "release",
        }
    }

    /// Whether a call that ran out of time may be retried.
    ///
    /// A timed-out commit may have been applied, so it is never retried.
    pub fn retry_on_timeout(&self) -> bool {
        !matches!(self, ParticipantOp::Commit)
    }
}

impl std::fmt::Display for ParticipantOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
