//! The error taxonomy shared by every stage of the pipeline.
//!
//! Every failure is returned as a typed result to the immediate caller of
//! the operation that detected it; nothing is downgraded to a warning.

use crate::set::SnapshotToken;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A record with the same (name, section) key is already present and
    /// overwrite was not requested.
    #[error("duplicate symbol `{name}` in {section}")]
    DuplicateSymbol { name: String, section: String },

    /// No record exists under the given (name, section) key.
    #[error("symbol `{name}` not found in {section}")]
    NotFound { name: String, section: String },

    /// The record carries a combination of fields the format cannot
    /// represent.
    #[error("invalid symbol record `{name}`: {reason}")]
    InvalidRecord { name: String, reason: String },

    /// Two caller-declared sections would overlap in address space, or the
    /// layout cannot be represented at all. Never silently resolved.
    #[error("section layout conflict: {0}")]
    LayoutConflict(String),

    /// Post-encode validation failed. Always fatal for the call: a
    /// malformed image handed to a debugger can crash or hang it.
    #[error("malformed image: {0}")]
    MalformedImage(String),

    /// A delta was requested against a base snapshot the session does not
    /// retain.
    #[error("stale snapshot: caller base {supplied:?}, session retains {retained:?}")]
    StaleSnapshot {
        supplied: Option<SnapshotToken>,
        retained: Option<SnapshotToken>,
    },

    /// An error carried up from the serialization layer.
    #[error(transparent)]
    Scroll(#[from] scroll::Error),
}

pub type Result<T> = core::result::Result<T, Error>;
