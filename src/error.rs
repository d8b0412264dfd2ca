//! # Error Taxonomy
//!
//! SoleDB classifies every failure into one of six categories so that callers
//! can decide whether to retry, abort, or give up on the file entirely:
//!
//! - **Contention**: a lock could not be acquired; retryable. The busy policy
//!   retries these internally before they ever reach the caller.
//! - **SharedCacheBusy**: a lock was held by another connection while this
//!   connection runs in shared-cache mode. Never retried internally; callers
//!   in shared-cache mode implement their own retry loop.
//! - **Durability**: a commit could not be made durable (journal deletion or
//!   WAL fsync failed). The transaction has already been rolled back when
//!   this surfaces.
//! - **Corruption**: a header or checksum did not validate. Fatal; there is
//!   no safe continuation against the file.
//! - **Usage**: an invalid state transition requested by the caller (nested
//!   BEGIN, late logger installation, illegal lock jump).
//! - **Io**: the underlying storage failed. Fatal to the enclosing
//!   transaction, which is rolled back before the error propagates.
//!
//! ## Propagation
//!
//! Internals use `eyre::Result` with `wrap_err` context, the same way the
//! rest of the codebase does. At every classification point a `SoleError` is
//! constructed as the root of the report, so callers can recover the category
//! with [`SoleError::of`] regardless of how much context was layered on top.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SoleError {
    /// A lock is held by another connection. Retryable.
    #[error("database is locked: {operation}")]
    Contention { operation: &'static str },

    /// A lock is held by a sibling shared-cache connection. The busy policy
    /// is bypassed for this variant.
    #[error("database table is locked by shared cache: {operation}")]
    SharedCacheBusy { operation: &'static str },

    /// Commit could not be made durable; the transaction was rolled back.
    #[error("durability failure during {operation}: {detail}")]
    Durability {
        operation: &'static str,
        detail: String,
    },

    /// Header or page-level validation failed. No safe continuation.
    #[error("database disk image is malformed: {detail}")]
    Corruption { detail: String },

    /// Invalid API usage or state transition.
    #[error("usage error: {detail}")]
    Usage { detail: String },

    /// Underlying storage failure.
    #[error("I/O error during {operation}")]
    Io {
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl SoleError {
    pub fn usage(detail: impl Into<String>) -> Self {
        SoleError::Usage {
            detail: detail.into(),
        }
    }

    pub fn corruption(detail: impl Into<String>) -> Self {
        SoleError::Corruption {
            detail: detail.into(),
        }
    }

    /// Recovers the typed error from an eyre report, looking through any
    /// context layers that were wrapped around it.
    pub fn of(report: &eyre::Report) -> Option<&SoleError> {
        report.chain().find_map(|e| e.downcast_ref::<SoleError>())
    }

    /// True when the caller may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SoleError::Contention { .. })
    }

    /// Numeric code passed to the diagnostic log callback.
    pub fn code(&self) -> i32 {
        match self {
            SoleError::Contention { .. } => codes::BUSY,
            SoleError::SharedCacheBusy { .. } => codes::LOCKED_SHAREDCACHE,
            SoleError::Durability { .. } => codes::IOERR_COMMIT,
            SoleError::Corruption { .. } => codes::CORRUPT,
            SoleError::Usage { .. } => codes::MISUSE,
            SoleError::Io { .. } => codes::IOERR,
        }
    }
}

/// Codes reported through the diagnostic log callback.
pub mod codes {
    pub const BUSY: i32 = 5;
    pub const LOCKED_SHAREDCACHE: i32 = 6;
    pub const IOERR: i32 = 10;
    pub const CORRUPT: i32 = 11;
    pub const MISUSE: i32 = 21;
    pub const IOERR_COMMIT: i32 = 138;
    pub const NOTICE_RECOVER_JOURNAL: i32 = 283;
    pub const NOTICE_RECOVER_WAL: i32 = 539;
    pub const WARNING_CHECKPOINT: i32 = 284;
}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::WrapErr;

    fn failing() -> eyre::Result<()> {
        Err(SoleError::Contention { operation: "lock" }.into())
    }

    #[test]
    fn typed_error_survives_context_wrapping() {
        let err = failing()
            .wrap_err("acquiring reserved lock")
            .wrap_err("executing INSERT")
            .unwrap_err();

        let sole = SoleError::of(&err).expect("should find typed root");
        assert!(sole.is_retryable());
        assert_eq!(sole.code(), codes::BUSY);
    }

    #[test]
    fn non_sole_report_yields_none() {
        let err = eyre::eyre!("plain error");
        assert!(SoleError::of(&err).is_none());
    }

    #[test]
    fn only_contention_is_retryable() {
        assert!(!SoleError::usage("nested BEGIN").is_retryable());
        assert!(!SoleError::corruption("bad magic").is_retryable());
        assert!(!SoleError::SharedCacheBusy { operation: "read" }.is_retryable());
    }
}
