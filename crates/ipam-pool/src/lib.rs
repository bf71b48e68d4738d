//! In-memory pool registry sitting on top of `ipam-alloc`.
//!
//! This is the ambient collaborator layer a reconciliation controller
//! would drive: a [`Pool`] wraps one [`ipam_alloc::Ipam`] behind an
//! `RwLock` the way `rasn-cache`'s `CacheLayer` wraps its LRU behind one,
//! and a [`Registry`] looks pools up by name. [`Request`] models a single
//! allocation ask and its resolution into one of three terminal states.
//!
//! There is no finalizer discipline, no CRD manifests, and no generated
//! client/lister/informer code here — this crate only reproduces the
//! locking and allocation/release contract such a controller relies on.

mod error;
mod pool;
mod registry;
mod request;

pub use error::{PoolError, Result};
pub use pool::{Mode, Pool};
pub use registry::Registry;
pub use request::{Request, RequestState};
