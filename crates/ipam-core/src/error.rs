use thiserror::Error;

/// Errors produced by the IP/CIDR value layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Malformed CIDR notation
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),

    /// Malformed IP address
    #[error("invalid IP address: {0}")]
    InvalidIp(String),

    /// Prefix length outside `0..=bits` for the address family
    #[error("invalid prefix length /{prefix} for a {bits}-bit address")]
    InvalidPrefixLength { prefix: u8, bits: u8 },

    /// An operation was asked to mix address families (IPv4 with IPv6)
    #[error("address family mismatch: {0}")]
    FamilyMismatch(String),
}

/// Result type alias for `ipam-core` operations
pub type Result<T> = std::result::Result<T, CoreError>;
