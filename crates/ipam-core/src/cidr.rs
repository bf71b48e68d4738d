//! CIDR blocks over variable-width [`Ip`] addresses.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::ip::{and, ip_add, ip_diff, is_zero, or, sub, Ip};

/// A canonical CIDR block: a network address masked down to `prefix_len`
/// bits, paired with its prefix length.
///
/// `Cidr::new` always masks the host bits off the supplied address, so a
/// `Cidr` is never observed in a non-canonical state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cidr {
    ip: Ip,
    prefix_len: u8,
}

impl Cidr {
    /// Build a canonical CIDR, masking any host bits off `ip`.
    pub fn new(ip: Ip, prefix_len: u8) -> Result<Self> {
        let bits = ip.bits();
        if prefix_len > bits {
            return Err(CoreError::InvalidPrefixLength {
                prefix: prefix_len,
                bits,
            });
        }
        let masked = and(ip.as_bytes(), mask_bytes(bits, prefix_len).as_slice());
        Ok(Cidr {
            ip: Ip::from_bytes(masked).expect("mask preserves address length"),
            prefix_len,
        })
    }

    /// Parse `"a.b.c.d/n"` / `"host:addr::/n"` notation.
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| CoreError::InvalidCidr(s.to_string()))?;
        let ip = Ip::parse(addr).map_err(|_| CoreError::InvalidCidr(s.to_string()))?;
        let prefix_len: u8 = len
            .parse()
            .map_err(|_| CoreError::InvalidCidr(s.to_string()))?;
        Cidr::new(ip, prefix_len)
    }

    pub fn network(&self) -> &Ip {
        &self.ip
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Total address bits for this family (32 or 128).
    pub fn bits(&self) -> u8 {
        self.ip.bits()
    }

    /// Host bits remaining below the prefix (`bits - prefix_len`).
    pub fn host_bits(&self) -> u8 {
        self.bits() - self.prefix_len
    }

    pub fn is_v4(&self) -> bool {
        self.ip.is_v4()
    }

    pub fn is_v6(&self) -> bool {
        self.ip.is_v6()
    }

    /// Number of addresses covered, as `2^host_bits`. Only meaningful while
    /// it fits a `u128` (host_bits <= 127); IPv6 callers needing the full
    /// /0 span should use `host_bits()` directly.
    pub fn size(&self) -> u128 {
        1u128 << self.host_bits()
    }

    pub fn first_ip(&self) -> Ip {
        self.ip.clone()
    }

    pub fn last_ip(&self) -> Ip {
        let mask = mask_bytes(self.bits(), self.prefix_len);
        let inv: Vec<u8> = mask.iter().map(|b| !b).collect();
        Ip::from_bytes(or(self.ip.as_bytes(), &inv)).expect("same length as network")
    }

    /// The IP `n` hosts past the network address.
    pub fn sub_ip(&self, n: u128) -> Ip {
        ip_add(&self.ip, n)
    }

    /// True if `other` is fully contained within `self`.
    pub fn contains_cidr(&self, other: &Cidr) -> bool {
        if self.bits() != other.bits() || self.prefix_len > other.prefix_len {
            return false;
        }
        let mask = mask_bytes(self.bits(), self.prefix_len);
        is_zero(&sub(
            &and(self.ip.as_bytes(), &mask),
            &and(other.ip.as_bytes(), &mask),
        ))
    }

    /// True if `ip` falls within this block.
    pub fn contains_ip(&self, ip: &Ip) -> bool {
        if ip.bits() != self.bits() {
            return false;
        }
        let mask = mask_bytes(self.bits(), self.prefix_len);
        and(ip.as_bytes(), &mask) == and(self.ip.as_bytes(), &mask)
    }

    /// Split into the two child blocks at `prefix_len + 1`.
    pub fn split(&self) -> Result<(Cidr, Cidr)> {
        if self.prefix_len >= self.bits() {
            return Err(CoreError::InvalidPrefixLength {
                prefix: self.prefix_len + 1,
                bits: self.bits(),
            });
        }
        let child_len = self.prefix_len + 1;
        let lower = Cidr::new(self.ip.clone(), child_len)?;
        let half = 1u128 << (self.bits() - child_len);
        let upper = Cidr::new(ip_add(&self.ip, half), child_len)?;
        Ok((lower, upper))
    }

    /// Extend (join) with the sibling produced by `split`, back to
    /// `prefix_len - 1`. Only valid if `self` is the lower half of its pair.
    pub fn extend(&self) -> Result<Cidr> {
        if self.prefix_len == 0 {
            return Err(CoreError::InvalidPrefixLength {
                prefix: 0,
                bits: self.bits(),
            });
        }
        Cidr::new(self.ip.clone(), self.prefix_len - 1)
    }

    /// True if this block is the upper half of its parent's split pair.
    pub fn is_upper(&self) -> bool {
        if self.prefix_len == 0 {
            return false;
        }
        let bit_index = self.prefix_len - 1;
        let byte = bit_index / 8;
        let bit = 7 - (bit_index % 8);
        (self.ip.as_bytes()[byte as usize] >> bit) & 1 == 1
    }

    /// The offset of `ip` within this block's range, as a host index.
    pub fn offset_of(&self, ip: &Ip) -> u128 {
        ip_diff(ip, &self.ip).max(0) as u128
    }

    /// Narrow an IPv4-mapped `::ffff:a.b.c.d/n` (n >= 96) block to its
    /// 4-byte equivalent. Already-v4 blocks are returned unchanged.
    pub fn to4(&self) -> Option<Cidr> {
        if self.is_v4() {
            return Some(self.clone());
        }
        if self.prefix_len < 96 {
            return None;
        }
        self.ip.to4().map(|ip| Cidr {
            ip,
            prefix_len: self.prefix_len - 96,
        })
    }

    pub fn to16(&self) -> Cidr {
        if self.is_v6() {
            return self.clone();
        }
        Cidr {
            ip: self.ip.to16(),
            prefix_len: self.prefix_len + 96,
        }
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

/// Big-endian mask with the top `prefix_len` bits set, sized for `bits`
/// total address bits.
fn mask_bytes(bits: u8, prefix_len: u8) -> Vec<u8> {
    let nbytes = (bits / 8) as usize;
    let mut mask = vec![0u8; nbytes];
    let full_bytes = (prefix_len / 8) as usize;
    let rem_bits = prefix_len % 8;
    for b in mask.iter_mut().take(full_bytes) {
        *b = 0xff;
    }
    if rem_bits > 0 && full_bytes < nbytes {
        mask[full_bytes] = 0xff << (8 - rem_bits);
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_canonicalizes() {
        let c = Cidr::parse("10.0.0.5/24").unwrap();
        assert_eq!(c.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn rejects_bad_prefix() {
        assert!(Cidr::parse("10.0.0.0/33").is_err());
    }

    #[test]
    fn first_last_ip() {
        let c = Cidr::parse("10.0.0.0/30").unwrap();
        assert_eq!(c.first_ip().to_string(), "10.0.0.0");
        assert_eq!(c.last_ip().to_string(), "10.0.0.3");
    }

    #[test]
    fn split_and_extend_roundtrip() {
        let c = Cidr::parse("10.0.0.0/24").unwrap();
        let (lower, upper) = c.split().unwrap();
        assert_eq!(lower.to_string(), "10.0.0.0/25");
        assert_eq!(upper.to_string(), "10.0.0.128/25");
        assert!(!lower.is_upper());
        assert!(upper.is_upper());
        assert_eq!(lower.extend().unwrap(), c);
    }

    #[test]
    fn contains_cidr() {
        let parent = Cidr::parse("10.0.0.0/8").unwrap();
        let child = Cidr::parse("10.1.2.0/24").unwrap();
        assert!(parent.contains_cidr(&child));
        assert!(!child.contains_cidr(&parent));
    }

    #[test]
    fn size_matches_host_bits() {
        let c = Cidr::parse("10.0.0.0/28").unwrap();
        assert_eq!(c.host_bits(), 4);
        assert_eq!(c.size(), 16);
    }
}
