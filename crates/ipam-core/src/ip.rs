//! Fixed-length byte-vector IP addresses and the bit arithmetic primitives
//! the CIDR layer is built on.
//!
//! An [`Ip`] is a 4-byte (IPv4) or 16-byte (IPv6) big-endian address. All
//! arithmetic here is byte-wise; it never interprets the bytes as a single
//! integer, mirroring how the allocator's source material manipulates
//! `net.IP`/`net.IPMask` slices directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{CoreError, Result};

/// An IP address stored as its raw network-order bytes (length 4 or 16).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ip(Vec<u8>);

impl Ip {
    /// Wrap raw bytes as an IP address. `len` must be 4 or 16.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        match bytes.len() {
            4 | 16 => Ok(Ip(bytes)),
            n => Err(CoreError::InvalidIp(format!(
                "address must be 4 or 16 bytes, got {n}"
            ))),
        }
    }

    /// Number of address bits (32 for v4, 128 for v6).
    pub fn bits(&self) -> u8 {
        (self.0.len() * 8) as u8
    }

    pub fn is_v4(&self) -> bool {
        self.0.len() == 4
    }

    pub fn is_v6(&self) -> bool {
        self.0.len() == 16
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse a dotted-quad or colon-hex address string.
    pub fn parse(s: &str) -> Result<Self> {
        if let Ok(v4) = s.parse::<Ipv4Addr>() {
            return Ok(Ip(v4.octets().to_vec()));
        }
        if let Ok(v6) = s.parse::<Ipv6Addr>() {
            return Ok(Ip(v6.octets().to_vec()));
        }
        Err(CoreError::InvalidIp(s.to_string()))
    }

    /// Convert to the 16-byte IPv4-mapped form used for `Align`/`to16`.
    pub fn to16(&self) -> Ip {
        if self.is_v6() {
            return self.clone();
        }
        let v4 = Ipv4Addr::new(self.0[0], self.0[1], self.0[2], self.0[3]);
        Ip(v4.to_ipv6_mapped().octets().to_vec())
    }

    /// Convert to the 4-byte form, if this address has one (`::ffff:a.b.c.d`
    /// or already v4).
    pub fn to4(&self) -> Option<Ip> {
        if self.is_v4() {
            return Some(self.clone());
        }
        let octets: [u8; 16] = self.0.clone().try_into().ok()?;
        let v6 = Ipv6Addr::from(octets);
        v6.to_ipv4().map(|v4| Ip(v4.octets().to_vec()))
    }

    /// Flatten to a single integer for range arithmetic. Both address
    /// widths fit a `u128` exactly.
    pub fn to_u128(&self) -> u128 {
        self.0.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128)
    }

    /// Rebuild an address of `bits` width from a flattened integer.
    pub fn from_u128(bits: u8, value: u128) -> Result<Ip> {
        let nbytes = (bits / 8) as usize;
        let full = value.to_be_bytes();
        Ip::from_bytes(full[full.len() - nbytes..].to_vec())
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.len() {
            4 => write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3]),
            16 => {
                let octets: [u8; 16] = self.0.clone().try_into().unwrap();
                write!(f, "{}", Ipv6Addr::from(octets))
            }
            _ => unreachable!("Ip is always 4 or 16 bytes"),
        }
    }
}

/// Byte-wise `a - b` (no borrow propagation — callers only ever subtract
/// monotonically-decreasing mask bytes, where this is exact).
pub(crate) fn sub(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x.wrapping_sub(*y)).collect()
}

pub(crate) fn or(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x | y).collect()
}

pub(crate) fn and(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x & y).collect()
}

pub(crate) fn is_zero(a: &[u8]) -> bool {
    a.iter().all(|&b| b == 0)
}

/// `ip + n`, with carry propagating from the rightmost (least-significant)
/// byte. `n` must fit the address's host width for the result to be
/// meaningful; this never wraps past the address length.
pub fn ip_add(ip: &Ip, n: u128) -> Ip {
    let mut bytes = ip.0.clone();
    let mut carry = n;
    for byte in bytes.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        carry += *byte as u128;
        *byte = (carry & 0xff) as u8;
        carry >>= 8;
    }
    Ip(bytes)
}

/// Signed big-endian byte-wise difference `a - b`, for same-length
/// addresses. Used for adjacency/overlap checks over small distances; the
/// allocator never needs this for full address-space-spanning values.
pub fn ip_diff(a: &Ip, b: &Ip) -> i128 {
    debug_assert_eq!(a.0.len(), b.0.len());
    let mut d: i128 = 0;
    for (x, y) in a.0.iter().zip(b.0.iter()) {
        d = d * 256 + (*x as i128 - *y as i128);
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v4() {
        let ip = Ip::parse("10.0.0.1").unwrap();
        assert_eq!(ip.to_string(), "10.0.0.1");
        assert!(ip.is_v4());
    }

    #[test]
    fn parses_v6() {
        let ip = Ip::parse("2001:db8::1").unwrap();
        assert!(ip.is_v6());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Ip::parse("not-an-ip").is_err());
    }

    #[test]
    fn add_propagates_carry() {
        let ip = Ip::parse("10.0.0.255").unwrap();
        let next = ip_add(&ip, 1);
        assert_eq!(next.to_string(), "10.0.1.0");
    }

    #[test]
    fn diff_roundtrips_through_add() {
        let a = Ip::parse("10.0.0.5").unwrap();
        let b = Ip::parse("10.0.0.10").unwrap();
        assert_eq!(ip_diff(&b, &a), 5);
        assert_eq!(ip_add(&a, 5), b);
    }

    #[test]
    fn to16_and_back() {
        let v4 = Ip::parse("192.168.1.1").unwrap();
        let mapped = v4.to16();
        assert!(mapped.is_v6());
        assert_eq!(mapped.to4(), Some(v4));
    }
}
