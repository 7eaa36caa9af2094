//! The `(total, reserved)` pair and its reservation state machine.
//!
//! Both the in-memory and PostgreSQL stores load a row, apply one of these
//! transitions and write the result back while the row is locked.

use thiserror::Error;

/// A participant row: total capacity and the part of it currently held.
///
/// Invariant at rest: `0 <= reserved <= total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Holding {
    pub total: i64,
    pub reserved: i64,
}

/// Rejections produced by a holding transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HoldingError {
    #[error("requested {requested}, available {available}")]
    Insufficient { requested: i64, available: i64 },

    #[error("commit of {amount} exceeds total {total} or reserved {reserved}")]
    CommitExceedsReservation {
        amount: i64,
        total: i64,
        reserved: i64,
    },
}

impl Holding {
    pub fn new(total: i64, reserved: i64) -> Self {
        Self { total, reserved }
    }

    /// Capacity not yet reserved.
    pub fn available(&self) -> i64 {
        self.total - self.reserved
    }

    /// Raises the reserved watermark by `amount` if enough is available.
    pub fn reserve(self, amount: i64) -> Result<Holding, HoldingError> {
        let available = self.available();
        if amount > available {
            return Err(HoldingError::Insufficient {
                requested: amount,
                available,
            });
        }
        Ok(Holding {
            total: self.total,
            reserved: self.reserved + amount,
        })
    }

    /// Lowers the reserved watermark, clamped at zero so a repeated
    /// release is harmless.
    pub fn release(self, amount: i64) -> Holding {
        Holding {
            total: self.total,
            reserved: (self.reserved - amount).max(0),
        }
    }

    /// Consumes `amount` of an existing reservation. The only transition
    /// that changes `total`.
    pub fn commit(self, amount: i64) -> Result<Holding, HoldingError> {
        if self.total < amount || self.reserved < amount {
            return Err(HoldingError::CommitExceedsReservation {
                amount,
                total: self.total,
                reserved: self.reserved,
            });
        }
        Ok(Holding {
            total: self.total - amount,
            reserved: self.reserved - amount,
        })
    }
}
