//! Inclusive IP ranges and range-to-CIDR decomposition.
//!
//! Pools are usually described as one or more inclusive address ranges
//! rather than a single CIDR. This crate normalizes such ranges into the
//! minimal disjoint CIDR cover the allocator's block list is built from.

use ipam_core::{Cidr, Ip};
use thiserror::Error;

/// Errors produced while parsing or decomposing ranges.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RangeError {
    /// Malformed `a.b.c.d-e.f.g.h` or bare-CIDR range notation
    #[error("invalid IP range notation: {0}")]
    InvalidRange(String),

    /// `from > to`, or the two bounds are different address families
    #[error("range bounds out of order or mismatched families: {0}")]
    BadBounds(String),

    /// A constructor was given no ranges to work with
    #[error("no ranges given")]
    Empty,
}

pub type Result<T> = std::result::Result<T, RangeError>;

/// A closed interval `[from, to]`, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRange {
    from: Ip,
    to: Ip,
}

impl IpRange {
    /// Build a range directly, rejecting `from > to` or mismatched families.
    pub fn new(from: Ip, to: Ip) -> Result<Self> {
        if from.bits() != to.bits() {
            return Err(RangeError::BadBounds(format!("{from}-{to}")));
        }
        if from.to_u128() > to.to_u128() {
            return Err(RangeError::BadBounds(format!("{from}-{to}")));
        }
        Ok(IpRange { from, to })
    }

    /// Parse `"a.b.c.d-e.f.g.h"` (inclusive) or a bare CIDR, which parses
    /// as the inclusive range of its first..last addresses. Whitespace is
    /// trimmed.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((lo, hi)) = s.split_once('-') {
            let from =
                Ip::parse(lo.trim()).map_err(|_| RangeError::InvalidRange(s.to_string()))?;
            let to = Ip::parse(hi.trim()).map_err(|_| RangeError::InvalidRange(s.to_string()))?;
            return IpRange::new(from, to);
        }
        let cidr = Cidr::parse(s).map_err(|_| RangeError::InvalidRange(s.to_string()))?;
        Ok(IpRange {
            from: cidr.first_ip(),
            to: cidr.last_ip(),
        })
    }

    pub fn from_cidr(cidr: &Cidr) -> Self {
        IpRange {
            from: cidr.first_ip(),
            to: cidr.last_ip(),
        }
    }

    pub fn from(&self) -> &Ip {
        &self.from
    }

    pub fn to(&self) -> &Ip {
        &self.to
    }

    pub fn bits(&self) -> u8 {
        self.from.bits()
    }
}

impl std::fmt::Display for IpRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.from, self.to)
    }
}

/// Sort by `from`, merge overlapping/adjacent intervals, and decompose each
/// merged interval into the minimum canonical CIDR cover: greedily emit the
/// largest CIDR whose first address is the cursor and whose last address
/// does not exceed the interval's end.
pub fn normalize(ranges: &[IpRange]) -> Result<Vec<Cidr>> {
    if ranges.is_empty() {
        return Err(RangeError::Empty);
    }
    let bits = ranges[0].bits();
    let mut sorted: Vec<&IpRange> = ranges.iter().collect();
    sorted.sort_by_key(|r| r.from.to_u128());

    let mut merged: Vec<(u128, u128)> = Vec::new();
    for r in sorted {
        let (from, to) = (r.from.to_u128(), r.to.to_u128());
        match merged.last_mut() {
            Some((_, last_to)) if from <= last_to.saturating_add(1) => {
                *last_to = (*last_to).max(to);
            }
            _ => merged.push((from, to)),
        }
    }

    let mut out = Vec::new();
    for (from, to) in merged {
        out.extend(range_to_cidrs(from, to, bits)?);
    }
    Ok(out)
}

/// `Includes(ranges)` is defined as `Normalize(ranges)`.
pub fn includes(ranges: &[IpRange]) -> Result<Vec<Cidr>> {
    normalize(ranges)
}

/// The canonical CIDR cover of `universe \ Normalize(ranges)`.
pub fn excludes(universe: &Cidr, ranges: &[IpRange]) -> Result<Vec<Cidr>> {
    let included = normalize(ranges)?;
    let bits = universe.bits();
    let uni_from = universe.first_ip().to_u128();
    let uni_to = universe.last_ip().to_u128();

    let mut holes: Vec<(u128, u128)> = included
        .iter()
        .map(|c| (c.first_ip().to_u128(), c.last_ip().to_u128()))
        .filter(|(f, t)| *t >= uni_from && *f <= uni_to)
        .map(|(f, t)| (f.max(uni_from), t.min(uni_to)))
        .collect();
    holes.sort();

    let mut out = Vec::new();
    let mut cursor = uni_from;
    for (from, to) in holes {
        if from > cursor {
            out.extend(range_to_cidrs(cursor, from - 1, bits)?);
        }
        cursor = cursor.max(to.saturating_add(1));
        if cursor == 0 {
            // wrapped past the top of the address space
            return Ok(out);
        }
    }
    if cursor <= uni_to {
        out.extend(range_to_cidrs(cursor, uni_to, bits)?);
    }
    Ok(out)
}

/// Decompose `[from, to]` into the minimal list of aligned CIDRs covering
/// it exactly, for an address family `bits` wide.
fn range_to_cidrs(from: u128, to: u128, bits: u8) -> Result<Vec<Cidr>> {
    let mut out = Vec::new();
    let mut cursor = from;
    loop {
        let align_bits = if cursor == 0 {
            bits
        } else {
            cursor.trailing_zeros().min(bits as u32) as u8
        };
        // `count` is the number of addresses from `cursor` to `to`
        // inclusive; it only overflows a u128 when the interval is the
        // entire address space (cursor == 0, to == u128::MAX).
        let size_bits = match to.checked_sub(cursor).and_then(|d| d.checked_add(1)) {
            Some(count) => (127 - count.leading_zeros()) as u8,
            None => bits,
        };
        let host_bits = align_bits.min(size_bits).min(bits);
        let prefix_len = bits - host_bits;

        let ip = Ip::from_u128(bits, cursor)
            .map_err(|_| RangeError::BadBounds("address width mismatch".to_string()))?;
        let cidr = Cidr::new(ip, prefix_len)
            .map_err(|_| RangeError::BadBounds("address width mismatch".to_string()))?;
        out.push(cidr);

        if host_bits >= bits {
            break;
        }
        let step = 1u128 << host_bits;
        match cursor.checked_add(step) {
            Some(next) if next <= to => cursor = next,
            _ => break,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dash_range() {
        let r = IpRange::parse("10.0.0.10-10.0.0.250").unwrap();
        assert_eq!(r.from().to_string(), "10.0.0.10");
        assert_eq!(r.to().to_string(), "10.0.0.250");
    }

    #[test]
    fn parses_bare_cidr_as_range() {
        let r = IpRange::parse("10.0.0.0/30").unwrap();
        assert_eq!(r.from().to_string(), "10.0.0.0");
        assert_eq!(r.to().to_string(), "10.0.0.3");
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(IpRange::new(
            Ip::parse("10.0.0.10").unwrap(),
            Ip::parse("10.0.0.1").unwrap()
        )
        .is_err());
    }

    #[test]
    fn normalize_whole_block() {
        let ranges = vec![IpRange::parse("10.0.0.0/24").unwrap()];
        let cidrs = normalize(&ranges).unwrap();
        assert_eq!(cidrs.len(), 1);
        assert_eq!(cidrs[0].to_string(), "10.0.0.0/24");
    }

    #[test]
    fn normalize_merges_adjacent() {
        let ranges = vec![
            IpRange::parse("10.0.0.0/25").unwrap(),
            IpRange::parse("10.0.0.128/25").unwrap(),
        ];
        let cidrs = normalize(&ranges).unwrap();
        assert_eq!(cidrs.len(), 1);
        assert_eq!(cidrs[0].to_string(), "10.0.0.0/24");
    }

    #[test]
    fn normalize_sparse_range() {
        let ranges = vec![IpRange::parse("10.0.0.10-10.0.0.250").unwrap()];
        let cidrs = normalize(&ranges).unwrap();
        let rendered: Vec<String> = cidrs.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered.first().unwrap(), "10.0.0.10/31");
        assert_eq!(rendered.last().unwrap(), "10.0.0.248/31");
    }

    #[test]
    fn excludes_carves_out_middle() {
        let universe = Cidr::parse("10.0.0.0/24").unwrap();
        let ranges = vec![IpRange::parse("10.0.0.64/26").unwrap()];
        let cidrs = excludes(&universe, &ranges).unwrap();
        let rendered: Vec<String> = cidrs.iter().map(|c| c.to_string()).collect();
        assert_eq!(rendered, vec!["10.0.0.0/26", "10.0.0.128/25"]);
    }

    #[test]
    fn empty_ranges_is_an_error() {
        assert!(normalize(&[]).is_err());
    }
}
