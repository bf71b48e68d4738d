//! The hybrid buddy-list/bitmap CIDR allocator.
//!
//! [`Ipam`] owns an ordered list of address blocks — each `Free`, `Busy`,
//! or a 64-slot [`Bitmap`] leaf — and implements best-fit allocation,
//! explicit busy/free, containment queries, and an optional round-robin
//! allocation cursor.

mod bitmap;
mod block;
mod error;
mod ipam;

pub use bitmap::Bitmap;
pub use block::{Block, BlockId, BlockState};
pub use error::{AllocError, Result};
pub use ipam::Ipam;
