//! A single node in the allocator's doubly linked block list.

use ipam_core::Cidr;

use crate::bitmap::Bitmap;

/// Index into the [`crate::Ipam`] arena. Stands in for the `prev`/`next`
/// pointers the original list used, without an ownership cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub(crate) usize);

/// The three states a block can be in. Bitmap state only ever appears on a
/// block whose CIDR has exactly 6 host bits — enforced by construction,
/// never by a runtime check alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockState {
    Free,
    Busy,
    Bitmap(Bitmap),
}

#[derive(Debug, Clone)]
pub struct Block {
    pub cidr: Cidr,
    pub state: BlockState,
    pub prev: Option<BlockId>,
    pub next: Option<BlockId>,
}

impl Block {
    pub fn new(cidr: Cidr, state: BlockState) -> Self {
        Block {
            cidr,
            state,
            prev: None,
            next: None,
        }
    }

    pub fn size(&self) -> u8 {
        self.cidr.prefix_len()
    }

    /// Uniform blocks split while they have more than 6 host bits left;
    /// below that, subdivision happens by promoting to a bitmap instead.
    /// Bitmap blocks never split further — they already encode
    /// sub-allocations.
    pub fn can_split(&self) -> bool {
        match self.state {
            BlockState::Bitmap(_) => false,
            _ => self.cidr.host_bits() > 6,
        }
    }

    /// Can this block satisfy a request of `reqsize` at all (ignoring
    /// best-fit ranking against other candidates)?
    pub fn can_alloc(&self, reqsize: u8) -> bool {
        match &self.state {
            BlockState::Bitmap(bm) => {
                if reqsize < self.cidr.prefix_len() {
                    return false;
                }
                let r = reqsize - self.cidr.prefix_len();
                r <= 6 && bm.can_allocate(r).is_some()
            }
            BlockState::Free => self.cidr.prefix_len() <= reqsize,
            BlockState::Busy => false,
        }
    }

    /// Exact match on a uniform-Free block — short-circuits best-fit
    /// search.
    pub fn match_size(&self, reqsize: u8) -> bool {
        matches!(self.state, BlockState::Free) && self.cidr.prefix_len() == reqsize
    }

    /// Terminal allocation step once this block is either already
    /// `reqsize` or sits at the bitmap boundary (6 host bits).
    pub fn alloc(&mut self, reqsize: u8) -> Option<Cidr> {
        let prefix_len = self.cidr.prefix_len();
        if prefix_len == reqsize {
            if !matches!(self.state, BlockState::Free) {
                return None;
            }
            self.state = BlockState::Busy;
            return Some(self.cidr.clone());
        }
        if reqsize < prefix_len {
            return None;
        }
        let k = reqsize - prefix_len;
        if k > 6 {
            return None;
        }
        match &mut self.state {
            BlockState::Free => {
                let mut bm = Bitmap::new(0);
                let pos = bm.allocate(k)?;
                self.state = BlockState::Bitmap(bm);
                Some(self.slot_to_cidr(pos, k))
            }
            BlockState::Bitmap(bm) => {
                let pos = bm.allocate(k)?;
                Some(self.slot_to_cidr(pos, k))
            }
            BlockState::Busy => None,
        }
    }

    /// Toggle this block (or a region inside its bitmap) busy/free.
    /// Refuses if `cidr` is larger than the block, or the change is a
    /// no-op (already in the requested state).
    pub fn set(&mut self, cidr: &Cidr, busy: bool) -> bool {
        if cidr.prefix_len() < self.cidr.prefix_len() {
            return false;
        }
        if *cidr == self.cidr {
            return match self.state {
                BlockState::Free if !busy => false,
                BlockState::Busy if busy => false,
                BlockState::Bitmap(_) => false,
                _ => {
                    self.state = if busy { BlockState::Busy } else { BlockState::Free };
                    true
                }
            };
        }
        if self.cidr.host_bits() != 6 {
            return false;
        }
        let r = cidr.prefix_len() - self.cidr.prefix_len();
        if r == 0 || r > 6 {
            return false;
        }
        let pos = self.cidr.offset_of(cidr.network()) as u8;
        match &mut self.state {
            BlockState::Bitmap(bm) => bm.set(pos, r, busy),
            BlockState::Free => {
                let mut bm = Bitmap::new(0);
                if bm.set(pos, r, busy) {
                    self.state = BlockState::Bitmap(bm);
                    true
                } else {
                    false
                }
            }
            BlockState::Busy => {
                let mut bm = Bitmap::new(u64::MAX);
                if bm.set(pos, r, busy) {
                    self.state = BlockState::Bitmap(bm);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn is_upper(&self) -> bool {
        self.cidr.is_upper()
    }

    fn slot_to_cidr(&self, pos: u8, r: u8) -> Cidr {
        Cidr::new(self.cidr.sub_ip(pos as u128), self.cidr.prefix_len() + r)
            .expect("slot position always yields a valid child prefix")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_allocates_uniform_block() {
        let mut b = Block::new(Cidr::parse("10.0.0.0/24").unwrap(), BlockState::Free);
        assert!(b.match_size(24));
        let cidr = b.alloc(24).unwrap();
        assert_eq!(cidr.to_string(), "10.0.0.0/24");
        assert_eq!(b.state, BlockState::Busy);
    }

    #[test]
    fn alloc_promotes_to_bitmap_at_boundary() {
        let mut b = Block::new(Cidr::parse("10.0.0.0/26").unwrap(), BlockState::Free);
        assert!(!b.can_split());
        let cidr = b.alloc(28).unwrap();
        assert_eq!(cidr.to_string(), "10.0.0.0/28");
        assert!(matches!(b.state, BlockState::Bitmap(_)));
    }

    #[test]
    fn set_promotes_free_block_to_bitmap() {
        let mut b = Block::new(Cidr::parse("10.0.0.64/26").unwrap(), BlockState::Free);
        let target = Cidr::parse("10.0.0.127/32").unwrap();
        assert!(b.set(&target, true));
        assert!(matches!(b.state, BlockState::Bitmap(_)));
    }
}
