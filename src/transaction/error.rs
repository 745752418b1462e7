use thiserror::Error;

/// Why a transaction could not complete.
///
/// Logical outcomes such as a duplicate insert or a missing key are not errors; the
/// operations report those through their `bool` or `Option` results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TxError {
    /// A read was invalidated by a concurrent transaction before it could be registered.
    #[error("conflict with a concurrent transaction")]
    Conflict,
    /// Something this transaction writes was locked by another transaction at commit.
    #[error("lock contention during commit")]
    LockContention,
    /// A version observed by this transaction changed before commit.
    #[error("read validation failed during commit")]
    ValidationFailed,
    /// The caller rolled the transaction back.
    #[error("transaction aborted by the caller")]
    UserAbort
}

impl TxError {
    /// Whether running the same transaction body again may succeed.
    pub fn is_retryable(&self) -> bool {
        match *self {
            TxError::UserAbort => false,
            _ => true
        }
    }
}
