//! The in-memory analogue of the `IPAMRequest` resource: a request against
//! a named pool, either an explicit CIDR/IP or a size, resolved to one of
//! the reconciler's three terminal states.

use serde::{Deserialize, Serialize};

use ipam_core::Cidr;

use crate::registry::Registry;

/// Terminal outcome of reconciling a [`Request`], mirroring
/// `STATE_READY`/`STATE_BUSY`/`STATE_INVALID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Ready(Cidr),
    Busy,
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub pool: String,
    pub cidr: Option<Cidr>,
    pub size: Option<u8>,
}

impl Request {
    pub fn for_size(pool: impl Into<String>, size: u8) -> Self {
        Request {
            pool: pool.into(),
            cidr: None,
            size: Some(size),
        }
    }

    pub fn for_cidr(pool: impl Into<String>, cidr: Cidr) -> Self {
        Request {
            pool: pool.into(),
            cidr: Some(cidr),
            size: None,
        }
    }

    /// Resolve this request against a registry, allocating or marking
    /// busy as appropriate. Only a malformed request (unknown pool, an
    /// oversized size) maps to [`RequestState::Invalid`] — a pool with
    /// no room left is [`RequestState::Busy`], a transient condition a
    /// caller is expected to retry rather than give up on.
    pub fn reconcile(&self, registry: &Registry) -> RequestState {
        let Some(pool) = registry.get(&self.pool) else {
            return RequestState::Invalid(format!("unknown pool: {}", self.pool));
        };

        if let Some(cidr) = &self.cidr {
            return if pool.busy(cidr) {
                RequestState::Ready(cidr.clone())
            } else {
                RequestState::Busy
            };
        }

        let bits = pool.cidr().bits();
        let size = match self.size {
            Some(size) if size > bits => {
                return RequestState::Invalid(format!("size {size} too large: network {bits}"));
            }
            Some(size) => size,
            None => pool.chunk_size().unwrap_or(bits),
        };

        match pool.alloc(size) {
            Some(cidr) => RequestState::Ready(cidr),
            None => RequestState::Busy,
        }
    }
}
