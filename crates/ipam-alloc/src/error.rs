use thiserror::Error;

/// Errors produced while building or operating an [`crate::Ipam`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// `Ipam::with_excludes`/`Ipam::from_ranges` were given ranges that
    /// leave nothing allocatable.
    #[error("no addresses left after applying ranges/excludes")]
    UniverseEmpty,

    /// The range/CIDR layer rejected the input.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// A value crossed from one address family into a pool of another.
    #[error("address family mismatch: {0}")]
    FamilyMismatch(String),
}

pub type Result<T> = std::result::Result<T, AllocError>;
