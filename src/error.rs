//! The crate-wide error type and `Result` alias.

use std::io;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with a [`PokedexError`]
pub type Result<T> = std::result::Result<T, PokedexError>;

/// Error variants used throughout the record service.
/// It wraps any lower level errors from third party crates
#[derive(Error)]
pub enum PokedexError {
    /// variant for errors caused by std::io
    #[error("IO error")]
    Io {
        /// source of the IO Error
        #[from]
        source: io::Error,
    },

    /// a trainer id that is unallocated or logically deleted
    #[error("trainer ID not found")]
    TrainerNotFound,

    /// a species id that resolves past the end of the catalog
    #[error("species ID not found")]
    SpeciesNotFound,

    /// a trainer name longer than the 15 bytes the record layout can hold
    #[error("name too long, max 15 bytes")]
    NameTooLong,

    /// a data file whose size is not a whole number of records
    #[error("file size is not a multiple of record size")]
    FileCorrupt,

    /// the 16-bit id space is exhausted; no further trainers can be appended
    #[error("next ID out of range")]
    IdSpaceExhausted,

    /// variant for errors caused during type serialization/deserialization
    #[error("serialization/deserialization error")]
    Serialization(#[from] serde_json::Error),

    /// variant for errors when parsing strings to some other type
    #[error("{}", .0)]
    Parsing(String),

    /// the peer closed the connection at a frame boundary
    #[error("peer closed the connection")]
    Disconnected,

    /// catch-all variant for reporting error message strings
    #[error("{}", .0)]
    StringErr(String),
}

/// a custom Debug implementation that will write the entire error chain
impl std::fmt::Debug for PokedexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// writes the entire error chain of the given error `e`, to the formatter.
fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by: {}", cause)?;
        current = cause.source();
    }
    Ok(())
}
