//! The closed error taxonomy and request/op status values.
//!
//! `spec.md` §7 defines a *closed* set of outcomes for every core entry
//! point: `OK`, `IN_PROGRESS`, and a fixed list of terminal errors. We
//! split that single C-style status enum into two Rust types that
//! together carry the same information more idiomatically:
//!
//! - [`UcgError`]: the terminal failures only. This is what `Result<T,
//!   UcgError>` uses at boundaries that can never be "in progress"
//!   (construction, lookup, datatype conversion).
//! - [`Status`]: the full three-way outcome (`Ok`, `InProgress`,
//!   `Err(UcgError)`) used at request/op boundaries, where "still
//!   running" is a normal, expected return value rather than an error.
//!
//! `TRUNCATE` is deliberately not a `UcgError` variant: `dt_memcpy`
//! returns it as a partial-success value via [`crate::datatype::CopyOutcome`],
//! since truncation is not a failure to propagate, it is data the caller
//! needs to act on (see `spec.md` §4.A and §7).

use thiserror::Error;

/// The closed set of terminal failures a core entry point can report.
///
/// This is exhaustive by design: `spec.md` §7 calls the error taxonomy
/// "closed set; exhaustive", so no `#[error("other")]` catch-all variant
/// is provided. Adding a new failure mode means adding a new variant
/// here, not stuffing it into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UcgError {
    /// Caller misuse: null where required, a missing required field, or a
    /// nonsensical field value.
    #[error("invalid parameter")]
    InvalidParam,
    /// Allocation failure.
    #[error("out of memory")]
    NoMemory,
    /// A required runtime resource (plugin, transport) is absent.
    #[error("required resource unavailable")]
    NoResource,
    /// A lookup failed: no plan covers this message size, or an unknown
    /// config key was requested.
    #[error("not found")]
    NotFound,
    /// A plugin or algorithm declines this request. Used as the hand-off
    /// signal in the plan fallback chain (`spec.md` §4.D); bubbles up as
    /// a real error only when no fallback remains.
    #[error("unsupported")]
    Unsupported,
    /// API major/minor version mismatch at `init`.
    #[error("incompatible api version")]
    Incompatible,
    /// Transport failure observed while progressing a collective. Terminal:
    /// `spec.md` §5 rules out automatic retry.
    #[error("I/O error in transport")]
    IoError,
}

/// Convenience alias for fallible, non-progressing core operations.
pub type UcgResult<T> = Result<T, UcgError>;

/// The full outcome of a request/op: success, still running, or a
/// latched terminal error.
///
/// Request and op state machines (`spec.md` §4.F) store exactly one of
/// these at a time. Once `Err` is observed it is sticky: `spec.md`'s
/// "Request errors latch into the request's status on first occurrence
/// and are sticky" rule is enforced by `Request`'s internal status
/// update only ever moving from `InProgress` to a terminal value, never
/// back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Terminal success.
    Ok,
    /// Not yet terminal; progress must be called again.
    InProgress,
    /// Terminal failure.
    Err(UcgError),
}

impl Status {
    /// True for `Ok` or `Err` (i.e. not `InProgress`).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::InProgress)
    }

    /// True for `Ok` specifically.
    #[must_use]
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Project a terminal status into a `UcgResult<()>`. Panics if called
    /// on `InProgress` -- callers must check [`Self::is_terminal`] first,
    /// since a non-terminal status has no error (or success) to report
    /// yet.
    #[must_use]
    pub fn into_result(self) -> UcgResult<()> {
        match self {
            Status::Ok => Ok(()),
            Status::Err(e) => Err(e),
            Status::InProgress => panic!("Status::into_result called on InProgress"),
        }
    }
}

impl From<UcgError> for Status {
    fn from(e: UcgError) -> Self {
        Status::Err(e)
    }
}

impl From<Result<(), UcgError>> for Status {
    fn from(r: Result<(), UcgError>) -> Self {
        match r {
            Ok(()) => Status::Ok,
            Err(e) => Status::Err(e),
        }
    }
}
