//! IP address and CIDR value types shared across the allocator workspace.
//!
//! This crate owns the bit arithmetic every other crate builds on: a
//! fixed-width [`Ip`] (4 or 16 bytes), the canonical [`Cidr`] block built on
//! top of it, and the error taxonomy both return.

mod cidr;
mod error;
mod ip;

pub use cidr::Cidr;
pub use error::{CoreError, Result};
pub use ip::{ip_add, ip_diff, Ip};

#[cfg(test)]
mod roundtrip_tests {
    use super::*;

    #[test]
    fn u128_roundtrip() {
        let ip = Ip::parse("10.0.0.1").unwrap();
        assert_eq!(Ip::from_u128(32, ip.to_u128()).unwrap(), ip);
    }
}
