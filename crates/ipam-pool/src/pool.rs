//! A named, lock-guarded allocator — the in-memory analogue of the
//! `IPAMRange` resource a reconciliation controller would manage.

use std::sync::RwLock;

use ipam_alloc::Ipam;
use ipam_cidr::IpRange;
use ipam_core::Cidr;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Allocation strategy for a pool, mirroring the `firstMatch`/`roundRobin`
/// mode on the `IPAMRange` spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    FirstMatch,
    RoundRobin,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::FirstMatch
    }
}

/// One address pool: a universe plus the allocator guarding it.
///
/// `Alloc`/`Busy`/`Free`/`State` each take the pool's own write lock so
/// that operations on this pool serialize while distinct pools never
/// block each other.
pub struct Pool {
    cidr: Cidr,
    chunk_size: Option<u8>,
    ranges: Option<Vec<IpRange>>,
    mode: Mode,
    ipam: RwLock<Ipam>,
}

impl Pool {
    pub fn new(cidr: Cidr, mode: Mode) -> Result<Self> {
        let mut ipam = Ipam::new(cidr.clone())?;
        ipam.set_round_robin(mode == Mode::RoundRobin);
        Ok(Pool {
            cidr,
            chunk_size: None,
            ranges: None,
            mode,
            ipam: RwLock::new(ipam),
        })
    }

    pub fn with_excludes(cidr: Cidr, ranges: Vec<IpRange>, mode: Mode) -> Result<Self> {
        let mut ipam = Ipam::with_excludes(cidr.clone(), &ranges)?;
        ipam.set_round_robin(mode == Mode::RoundRobin);
        Ok(Pool {
            cidr,
            chunk_size: None,
            ranges: Some(ranges),
            mode,
            ipam: RwLock::new(ipam),
        })
    }

    pub fn from_ranges(ranges: Vec<IpRange>, mode: Mode) -> Result<Self> {
        let mut ipam = Ipam::from_ranges(&ranges)?;
        ipam.set_round_robin(mode == Mode::RoundRobin);
        // A range-built pool has no single governing CIDR; report the
        // address family's default route as a stand-in so `Pool::cidr()`
        // always has something displayable.
        let cidr = if ipam.bits() == 128 {
            Cidr::parse("::/0").expect("static literal")
        } else {
            Cidr::parse("0.0.0.0/0").expect("static literal")
        };
        Ok(Pool {
            cidr,
            chunk_size: None,
            ranges: Some(ranges),
            mode,
            ipam: RwLock::new(ipam),
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: u8) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn cidr(&self) -> &Cidr {
        &self.cidr
    }

    pub fn chunk_size(&self) -> Option<u8> {
        self.chunk_size
    }

    pub fn ranges(&self) -> Option<&[IpRange]> {
        self.ranges.as_deref()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_round_robin(&self) -> bool {
        self.mode == Mode::RoundRobin
    }

    pub fn alloc(&self, size: u8) -> Option<Cidr> {
        let mut ipam = self.ipam.write().expect("pool lock poisoned");
        let result = ipam.alloc(size);
        match &result {
            Some(cidr) => tracing::info!(pool_cidr = %self.cidr, %cidr, size, "allocated"),
            None => tracing::warn!(pool_cidr = %self.cidr, size, "pool exhausted"),
        }
        result
    }

    pub fn busy(&self, cidr: &Cidr) -> bool {
        let mut ipam = self.ipam.write().expect("pool lock poisoned");
        let ok = ipam.busy(cidr);
        if ok {
            tracing::info!(pool_cidr = %self.cidr, %cidr, "marked busy");
        } else {
            tracing::warn!(pool_cidr = %self.cidr, %cidr, "busy request refused");
        }
        ok
    }

    pub fn free(&self, cidr: &Cidr) -> bool {
        let mut ipam = self.ipam.write().expect("pool lock poisoned");
        let ok = ipam.free(cidr);
        if ok {
            tracing::info!(pool_cidr = %self.cidr, %cidr, "released");
        } else {
            tracing::warn!(pool_cidr = %self.cidr, %cidr, "free request refused");
        }
        ok
    }

    pub fn contains(&self, cidr: &Cidr) -> bool {
        let ipam = self.ipam.read().expect("pool lock poisoned");
        ipam.contains(cidr)
    }

    pub fn dump(&self) -> String {
        let ipam = self.ipam.read().expect("pool lock poisoned");
        ipam.to_string()
    }

    pub fn state(&self) -> Vec<(u8, Cidr)> {
        let ipam = self.ipam.read().expect("pool lock poisoned");
        ipam.state()
    }

    pub fn set_state(&self, entries: Vec<(u8, Cidr)>) {
        let mut ipam = self.ipam.write().expect("pool lock poisoned");
        ipam.set_state(entries);
    }
}
