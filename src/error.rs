//! Unified error type for the oplog journal.
//!
//! Error messages are designed to be agent-friendly: each variant includes a
//! clear description of what went wrong and, where a concrete next step
//! exists, a `To fix:` line with actionable guidance.

use std::fmt;

// ---------------------------------------------------------------------------
// OplogError
// ---------------------------------------------------------------------------

/// Unified error type for all journal and book operations.
#[derive(Debug)]
pub enum OplogError {
    /// No log, ref, or id matches the request.
    NotFound {
        /// What was being looked up (e.g. `"log id"`, `"branch"`).
        what: String,
        /// The identifier that was not found.
        id: String,
    },

    /// `ResolveRef` could not resolve a human-friendly reference.
    RefNotFound {
        /// The reference as given by the caller.
        reference: String,
    },

    /// The acting author does not own the target log.
    AccessDenied {
        /// The log id the actor attempted to write.
        log_id: String,
        /// The author id of the actor.
        actor: String,
    },

    /// `ConstructDatasetLog` was called but a dataset log already exists.
    LogTooShort {
        /// The dataset name that already has history.
        name: String,
    },

    /// A name failed validation at write time.
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name is invalid.
        reason: String,
    },

    /// A name is valid but not in the required case; the caller should rename.
    BadCaseShouldRename {
        /// The name as given.
        name: String,
        /// The corrected, lower-cased name.
        corrected: String,
    },

    /// `MergeLog` signature verification failed.
    InvalidSignature {
        /// The log id whose signature failed to verify.
        log_id: String,
    },

    /// A cryptographic operation (key derivation, encrypt, decrypt) failed.
    CryptoError {
        /// Human-readable description of the failure.
        detail: String,
    },

    /// The encrypted journal blob could not be decoded; it may be corrupt.
    CorruptJournal {
        /// Human-readable description of the corruption.
        detail: String,
    },

    /// A method was called on a `Book` with no configured journal.
    NoJournal,

    /// A reference string did not match the reference grammar.
    ParseError {
        /// Human-readable description of the parse failure.
        detail: String,
    },

    /// The operation observed cooperative cancellation before completing.
    Cancelled,

    /// An I/O error occurred persisting or reading the journal.
    Io(std::io::Error),
}

// ---------------------------------------------------------------------------
// Display — agent-friendly error messages
// ---------------------------------------------------------------------------

impl fmt::Display for OplogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { what, id } => {
                write!(f, "{what} '{id}' not found.")
            }
            Self::RefNotFound { reference } => {
                write!(
                    f,
                    "reference '{reference}' could not be resolved.\n  To fix: check the username and dataset name, or supply an explicit initID."
                )
            }
            Self::AccessDenied { log_id, actor } => {
                write!(
                    f,
                    "author '{actor}' does not own log '{log_id}'.\n  To fix: only the log's original author may write to it."
                )
            }
            Self::LogTooShort { name } => {
                write!(
                    f,
                    "dataset '{name}' already has history.\n  To fix: use WriteVersionSave to append, not ConstructDatasetLog."
                )
            }
            Self::InvalidName { name, reason } => {
                write!(f, "invalid name '{name}': {reason}")
            }
            Self::BadCaseShouldRename { name, corrected } => {
                write!(
                    f,
                    "name '{name}' must be lower-case.\n  To fix: use '{corrected}' instead."
                )
            }
            Self::InvalidSignature { log_id } => {
                write!(
                    f,
                    "signature verification failed for log '{log_id}'.\n  To fix: confirm the sender's public key and retry the merge."
                )
            }
            Self::CryptoError { detail } => {
                write!(f, "cryptographic operation failed: {detail}")
            }
            Self::CorruptJournal { detail } => {
                write!(
                    f,
                    "journal blob is corrupt: {detail}\n  To fix: discard the cached journal and re-sync from a peer."
                )
            }
            Self::NoJournal => {
                write!(
                    f,
                    "no journal is configured on this book.\n  To fix: construct the Book with a Journal before calling write methods."
                )
            }
            Self::ParseError { detail } => {
                write!(f, "{detail}")
            }
            Self::Cancelled => {
                write!(f, "operation cancelled before completion.")
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// std::error::Error
// ---------------------------------------------------------------------------

impl std::error::Error for OplogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OplogError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
