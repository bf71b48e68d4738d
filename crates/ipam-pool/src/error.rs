use thiserror::Error;

/// Errors produced by the pool registry layer.
#[derive(Error, Debug)]
pub enum PoolError {
    /// A request named a pool that was never registered.
    #[error("unknown pool: {0}")]
    UnknownPool(String),

    /// `Registry::register` was called twice with the same name.
    #[error("pool already registered: {0}")]
    DuplicatePool(String),

    /// Construction of the underlying allocator failed.
    #[error(transparent)]
    Alloc(#[from] ipam_alloc::AllocError),
}

pub type Result<T> = std::result::Result<T, PoolError>;
