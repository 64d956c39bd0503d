//! Outcome types reported by bus transactions.

/// The protocol-level outcome of an I2C transaction. A value of this type is *returned*, never
/// raised: a slave that declines to acknowledge is an expected runtime condition (bus scans depend
/// on it), not a fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferStatus {
    /// Every byte in the transaction was acknowledged.
    Success,
    /// The slave address byte was not acknowledged; no data bytes were exchanged. For a probe this
    /// means "no device at this address".
    AddressNack,
    /// The address was acknowledged but a data byte was NACKed mid-transfer. `Transfer::bytes`
    /// holds the count of bytes that were fully transferred before the NACK.
    PartialTransfer,
}

impl TransferStatus {
    /// Whether the transaction ran to completion with every byte acknowledged.
    pub fn is_success(&self) -> bool {
        *self == TransferStatus::Success
    }
}

/// The result of a completed bus transaction: a status plus the number of data bytes that were
/// fully transferred. Address bytes are not counted. For a combined write-then-read transaction
/// the count is the sum over both phases.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transfer {
    /// Protocol outcome of the transaction.
    pub status: TransferStatus,
    /// Data bytes fully transferred before the transaction ended.
    pub bytes: usize,
}

impl Transfer {
    pub(crate) fn new(status: TransferStatus, bytes: usize) -> Self {
        Self { status, bytes }
    }

    /// Shorthand for `self.status.is_success()`.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_predicate() {
        assert!(Transfer::new(TransferStatus::Success, 3).is_success());
        assert!(!Transfer::new(TransferStatus::AddressNack, 0).is_success());
        assert!(!Transfer::new(TransferStatus::PartialTransfer, 1).is_success());
    }
}
