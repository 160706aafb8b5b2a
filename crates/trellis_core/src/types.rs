//! Core type definitions for Trellis.

use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within one
/// coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Number of write transactions committed so far.
///
/// Every successful write commit advances the data version by one; aborts do
/// not. A transaction records the data version current when it began, which
/// names the committed state it reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DataVersion(pub u64);

impl DataVersion {
    /// Creates a new data version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the version that the next commit produces.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Mode a transaction is started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnMode {
    /// Read-only; never blocks other readers or the writer.
    Read,
    /// The single writer.
    Write,
}

impl fmt::Display for TxnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("READ"),
            Self::Write => f.write_str("WRITE"),
        }
    }
}

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Transaction is active and can perform operations.
    Active,
    /// Commit is in progress.
    Preparing,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been aborted.
    Aborted,
    /// Transaction has ended; the handle is inert.
    Ended,
}

/// What a component is told about a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnInfo {
    id: TxnId,
    mode: TxnMode,
    data_version: DataVersion,
}

impl TxnInfo {
    /// Creates transaction info.
    #[must_use]
    pub const fn new(id: TxnId, mode: TxnMode, data_version: DataVersion) -> Self {
        Self {
            id,
            mode,
            data_version,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub const fn id(&self) -> TxnId {
        self.id
    }

    /// Returns the transaction mode.
    #[must_use]
    pub const fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Returns the data version current when the transaction began.
    #[must_use]
    pub const fn data_version(&self) -> DataVersion {
        self.data_version
    }

    /// Returns true for the write transaction.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.mode == TxnMode::Write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txn_id_ordering() {
        assert!(TxnId::new(1) < TxnId::new(2));
        assert_eq!(format!("{}", TxnId::new(7)), "txn:7");
    }

    #[test]
    fn data_version_next() {
        let v = DataVersion::new(5);
        assert_eq!(v.next().as_u64(), 6);
        assert_eq!(DataVersion::default().as_u64(), 0);
    }

    #[test]
    fn txn_info_accessors() {
        let info = TxnInfo::new(TxnId::new(3), TxnMode::Write, DataVersion::new(2));
        assert!(info.is_write());
        assert_eq!(info.id(), TxnId::new(3));
        assert_eq!(info.data_version(), DataVersion::new(2));
        assert_eq!(info.mode().to_string(), "WRITE");
    }
}
