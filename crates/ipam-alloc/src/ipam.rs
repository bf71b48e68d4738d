//! The allocator façade: owns the block list and exposes `Alloc`/`Busy`/
//! `Free`/`Contains`/state dump.

use std::collections::HashMap;
use std::fmt;

use ipam_cidr::IpRange;
use ipam_core::Cidr;

use crate::block::{Block, BlockId, BlockState};
use crate::bitmap::Bitmap;
use crate::error::{AllocError, Result};

struct Slot {
    block: Option<Block>,
}

/// A CIDR-based allocator over one address-family universe.
///
/// Holds no lock of its own — see the concurrency notes on the crate's
/// collaborators (`ipam-pool`) for how callers serialize access per pool.
pub struct Ipam {
    arena: Vec<Slot>,
    free_list: Vec<usize>,
    head: Option<BlockId>,
    round_robin: bool,
    cursor: HashMap<u8, Cidr>,
}

impl Ipam {
    fn empty() -> Self {
        Ipam {
            arena: Vec::new(),
            free_list: Vec::new(),
            head: None,
            round_robin: false,
            cursor: HashMap::new(),
        }
    }

    /// A single-block universe covering all of `cidr`.
    pub fn new(cidr: Cidr) -> Result<Self> {
        let mut ipam = Ipam::empty();
        ipam.append(Block::new(cidr, BlockState::Free));
        Ok(ipam)
    }

    /// `cidr` minus the given exclude ranges: busy-mark everything
    /// `Excludes(cidr, ranges)` covers, then drop any block left
    /// completely busy.
    pub fn with_excludes(cidr: Cidr, ranges: &[IpRange]) -> Result<Self> {
        let mut ipam = Ipam::new(cidr.clone())?;
        let excluded = ipam_cidr::excludes(&cidr, ranges)
            .map_err(|e| AllocError::InvalidRange(e.to_string()))?;
        for ex in &excluded {
            ipam.busy(ex);
        }
        ipam.prune_fully_busy();
        if ipam.head.is_none() {
            return Err(AllocError::UniverseEmpty);
        }
        Ok(ipam)
    }

    /// A universe built to exactly cover a set of inclusive ranges,
    /// promoting sub-64-host-bit pieces straight into bitmap leaves.
    pub fn from_ranges(ranges: &[IpRange]) -> Result<Self> {
        let cover =
            ipam_cidr::includes(ranges).map_err(|e| AllocError::InvalidRange(e.to_string()))?;
        if cover.is_empty() {
            return Err(AllocError::UniverseEmpty);
        }
        let bits = cover[0].bits();
        let leaf_prefix = bits - 6;

        let mut ipam = Ipam::empty();
        let mut open_leaf: Option<(Cidr, Bitmap)> = None;
        for c in cover {
            if c.host_bits() >= 6 {
                if let Some((leaf_cidr, bm)) = open_leaf.take() {
                    ipam.append(Block::new(leaf_cidr, BlockState::Bitmap(bm)));
                }
                ipam.append(Block::new(c, BlockState::Free));
                continue;
            }
            let parent = Cidr::new(c.first_ip(), leaf_prefix)
                .map_err(|e| AllocError::InvalidRange(e.to_string()))?;
            let r = c.prefix_len() - leaf_prefix;
            let pos = parent.offset_of(c.network()) as u8;
            match &mut open_leaf {
                Some((leaf_cidr, bm)) if *leaf_cidr == parent => {
                    bm.free(pos, r);
                }
                _ => {
                    if let Some((leaf_cidr, bm)) = open_leaf.take() {
                        ipam.append(Block::new(leaf_cidr, BlockState::Bitmap(bm)));
                    }
                    let mut bm = Bitmap::new(u64::MAX);
                    bm.free(pos, r);
                    open_leaf = Some((parent, bm));
                }
            }
        }
        if let Some((leaf_cidr, bm)) = open_leaf.take() {
            ipam.append(Block::new(leaf_cidr, BlockState::Bitmap(bm)));
        }
        if ipam.head.is_none() {
            return Err(AllocError::UniverseEmpty);
        }
        Ok(ipam)
    }

    pub fn bits(&self) -> u8 {
        let id = self.head.expect("a constructed Ipam always has at least one block");
        self.get(id).cidr.bits()
    }

    pub fn is_round_robin(&self) -> bool {
        self.round_robin
    }

    pub fn set_round_robin(&mut self, on: bool) {
        self.round_robin = on;
    }

    /// Round-robin cursor snapshot: `(prefix length, last-allocated CIDR)`
    /// pairs, one per prefix size that has been allocated from while
    /// round-robin was on.
    pub fn state(&self) -> Vec<(u8, Cidr)> {
        let mut v: Vec<(u8, Cidr)> = self.cursor.iter().map(|(k, c)| (*k, c.clone())).collect();
        v.sort_by_key(|(k, _)| *k);
        v
    }

    pub fn set_state(&mut self, entries: Vec<(u8, Cidr)>) {
        self.cursor = entries.into_iter().collect();
    }

    /// Best-fit allocation of a `/reqsize` block.
    pub fn alloc(&mut self, reqsize: u8) -> Option<Cidr> {
        let mut id = self.select_candidate(reqsize)?;
        while self.get(id).cidr.prefix_len() < reqsize && self.get(id).can_split() {
            self.split_block(id);
        }
        let cidr = self.get_mut(id).alloc(reqsize)?;
        self.join_upward(id);
        if self.round_robin {
            self.cursor.insert(reqsize, cidr.clone());
        }
        Some(cidr)
    }

    pub fn busy(&mut self, cidr: &Cidr) -> bool {
        self.set(cidr, true)
    }

    pub fn free(&mut self, cidr: &Cidr) -> bool {
        self.set(cidr, false)
    }

    /// True iff some block's CIDR fully covers `cidr` (regardless of its
    /// busy/free state — this only answers "is this address space part of
    /// the pool").
    pub fn contains(&self, cidr: &Cidr) -> bool {
        let Some(aligned) = self.align(cidr) else {
            return false;
        };
        self.iter_ids()
            .any(|id| self.get(id).cidr.contains_cidr(&aligned))
    }

    fn set(&mut self, cidr: &Cidr, busy: bool) -> bool {
        let Some(aligned) = self.align(cidr) else {
            return false;
        };
        let Some(mut id) = self.locate(&aligned) else {
            return false;
        };
        if self.get(id).cidr.prefix_len() > aligned.prefix_len() {
            return false;
        }
        loop {
            let block = self.get(id);
            if block.cidr.prefix_len() >= aligned.prefix_len() {
                break;
            }
            if block.cidr.host_bits() == 6 || !block.can_split() {
                break;
            }
            match self.split_block(id) {
                Some(upper_id) if self.get(upper_id).cidr.contains_cidr(&aligned) => {
                    id = upper_id;
                }
                Some(_) => {}
                None => break,
            }
        }
        let ok = self.get_mut(id).set(&aligned, busy);
        if ok {
            self.join_upward(id);
        }
        ok
    }

    fn select_candidate(&self, reqsize: u8) -> Option<BlockId> {
        let order = self.alloc_order(reqsize);
        let mut best: Option<BlockId> = None;
        for id in order {
            let block = self.get(id);
            if !block.can_alloc(reqsize) {
                continue;
            }
            if block.match_size(reqsize) {
                return Some(id);
            }
            best = match best {
                None => Some(id),
                Some(b) if block.cidr.prefix_len() > self.get(b).cidr.prefix_len() => Some(id),
                other => other,
            };
        }
        best
    }

    /// List order, rotated to start strictly after this size's round-robin
    /// cursor when round-robin is enabled.
    fn alloc_order(&self, reqsize: u8) -> Vec<BlockId> {
        let all: Vec<BlockId> = self.iter_ids().collect();
        if !self.round_robin {
            return all;
        }
        let Some(cursor_cidr) = self.cursor.get(&reqsize) else {
            return all;
        };
        let cursor_val = cursor_cidr.first_ip().to_u128();
        match all
            .iter()
            .position(|&id| self.get(id).cidr.first_ip().to_u128() > cursor_val)
        {
            Some(split_at) => {
                let mut rotated = all[split_at..].to_vec();
                rotated.extend_from_slice(&all[..split_at]);
                rotated
            }
            None => all,
        }
    }

    fn locate(&self, cidr: &Cidr) -> Option<BlockId> {
        self.iter_ids()
            .find(|&id| self.get(id).cidr.contains_ip(cidr.network()))
    }

    fn align(&self, cidr: &Cidr) -> Option<Cidr> {
        let bits = self.bits();
        if cidr.bits() == bits {
            return Some(cidr.clone());
        }
        if bits == 128 {
            Some(cidr.to16())
        } else {
            cidr.to4()
        }
    }

    fn join_upward(&mut self, id: BlockId) {
        let mut cur = id;
        while let Some(joined) = self.join_block(cur) {
            cur = joined;
        }
    }

    fn join_block(&mut self, id: BlockId) -> Option<BlockId> {
        self.normalize_bitmap(id);
        let (prefix_len, is_upper) = {
            let b = self.get(id);
            (b.cidr.prefix_len(), b.cidr.is_upper())
        };
        if prefix_len == 0 {
            return None;
        }
        let buddy_id = if is_upper {
            self.get(id).prev
        } else {
            self.get(id).next
        }?;
        self.normalize_bitmap(buddy_id);

        let self_parent = self.get(id).cidr.extend().ok()?;
        let buddy_parent = self.get(buddy_id).cidr.extend().ok()?;
        if self_parent != buddy_parent {
            return None;
        }
        let mergeable = matches!(
            (&self.get(id).state, &self.get(buddy_id).state),
            (BlockState::Free, BlockState::Free) | (BlockState::Busy, BlockState::Busy)
        );
        if !mergeable {
            return None;
        }
        let state = self.get(id).state.clone();
        let (lower_id, upper_id) = if is_upper { (buddy_id, id) } else { (id, buddy_id) };
        self.unlink(upper_id);
        self.free_slot(upper_id);
        let lower = self.get_mut(lower_id);
        lower.cidr = self_parent;
        lower.state = state;
        Some(lower_id)
    }

    fn normalize_bitmap(&mut self, id: BlockId) {
        let block = self.get_mut(id);
        if let BlockState::Bitmap(bm) = &block.state {
            if bm.is_empty() {
                block.state = BlockState::Free;
            } else if bm.is_full() {
                block.state = BlockState::Busy;
            }
        }
    }

    fn prune_fully_busy(&mut self) {
        let mut cur = self.head;
        while let Some(id) = cur {
            cur = self.get(id).next;
            if matches!(self.get(id).state, BlockState::Busy) {
                self.unlink_and_free(id);
            }
        }
    }

    fn split_block(&mut self, id: BlockId) -> Option<BlockId> {
        let block = self.get(id);
        if !block.can_split() {
            return None;
        }
        let (lower, upper) = block.cidr.split().ok()?;
        let state = block.state.clone();
        self.get_mut(id).cidr = lower;
        let upper_id = self.alloc_slot(Block::new(upper, state));
        self.link_after(id, upper_id);
        Some(upper_id)
    }

    fn append(&mut self, block: Block) -> BlockId {
        let id = self.alloc_slot(block);
        match self.tail() {
            Some(t) => self.link_after(t, id),
            None => self.head = Some(id),
        }
        id
    }

    fn tail(&self) -> Option<BlockId> {
        let mut cur = self.head?;
        while let Some(n) = self.get(cur).next {
            cur = n;
        }
        Some(cur)
    }

    fn link_after(&mut self, after: BlockId, new_id: BlockId) {
        let next = self.get(after).next;
        self.get_mut(after).next = Some(new_id);
        self.get_mut(new_id).prev = Some(after);
        self.get_mut(new_id).next = next;
        if let Some(n) = next {
            self.get_mut(n).prev = Some(new_id);
        }
    }

    fn unlink(&mut self, id: BlockId) {
        let (prev, next) = {
            let b = self.get(id);
            (b.prev, b.next)
        };
        match prev {
            Some(p) => self.get_mut(p).next = next,
            None => self.head = next,
        }
        if let Some(n) = next {
            self.get_mut(n).prev = prev;
        }
    }

    fn unlink_and_free(&mut self, id: BlockId) {
        self.unlink(id);
        self.free_slot(id);
    }

    fn alloc_slot(&mut self, block: Block) -> BlockId {
        if let Some(idx) = self.free_list.pop() {
            self.arena[idx] = Slot { block: Some(block) };
            BlockId(idx)
        } else {
            self.arena.push(Slot { block: Some(block) });
            BlockId(self.arena.len() - 1)
        }
    }

    fn free_slot(&mut self, id: BlockId) {
        self.arena[id.0].block = None;
        self.free_list.push(id.0);
    }

    fn get(&self, id: BlockId) -> &Block {
        self.arena[id.0].block.as_ref().expect("dangling BlockId")
    }

    fn get_mut(&mut self, id: BlockId) -> &mut Block {
        self.arena[id.0].block.as_mut().expect("dangling BlockId")
    }

    fn iter_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.head, move |&id| self.get(id).next)
    }
}

impl fmt::Display for Ipam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter_ids()
            .map(|id| {
                let b = self.get(id);
                match &b.state {
                    BlockState::Free => format!("{}[free]", b.cidr),
                    BlockState::Busy => format!("{}[busy]", b.cidr),
                    BlockState::Bitmap(bm) => format!("{}[{}]", b.cidr, bm),
                }
            })
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Cidr {
        Cidr::parse(s).unwrap()
    }

    #[test]
    fn scenario_1_complete_blocks() {
        let mut ipam = Ipam::new(cidr("10.0.0.0/8")).unwrap();
        assert_eq!(ipam.alloc(9).unwrap().to_string(), "10.0.0.0/9");
        assert_eq!(ipam.alloc(10).unwrap().to_string(), "10.128.0.0/10");
        assert_eq!(
            ipam.to_string(),
            "10.0.0.0/9[busy], 10.128.0.0/10[busy], 10.192.0.0/10[free]"
        );
    }

    #[test]
    fn scenario_2_free_collapses_to_single_block() {
        let mut ipam = Ipam::new(cidr("10.0.0.0/8")).unwrap();
        let a = ipam.alloc(9).unwrap();
        let b = ipam.alloc(10).unwrap();
        let c = ipam.alloc(12).unwrap();
        let d = ipam.alloc(11).unwrap();
        assert_eq!(c.to_string(), "10.192.0.0/12");
        assert_eq!(d.to_string(), "10.224.0.0/11");
        assert!(ipam.free(&a));
        assert!(ipam.free(&b));
        assert!(ipam.free(&c));
        assert!(ipam.free(&d));
        assert_eq!(ipam.to_string(), "10.0.0.0/8[free]");
    }

    #[test]
    fn scenario_3_bitmap_territory() {
        let mut ipam = Ipam::new(cidr("10.0.0.0/26")).unwrap();
        assert_eq!(ipam.alloc(28).unwrap().to_string(), "10.0.0.0/28");
        assert_eq!(ipam.alloc(30).unwrap().to_string(), "10.0.0.16/30");
        assert_eq!(ipam.alloc(28).unwrap().to_string(), "10.0.0.32/28");
        assert_eq!(
            ipam.to_string(),
            "10.0.0.0/26[00000000 00000000 11111111 11111111 00000000 00001111 11111111 11111111]"
        );
    }

    #[test]
    fn scenario_4_mixed_round_trip() {
        let mut ipam = Ipam::new(cidr("10.0.0.0/24")).unwrap();
        let a = ipam.alloc(32).unwrap();
        let b = ipam.alloc(25).unwrap();
        assert_eq!(a.to_string(), "10.0.0.0/32");
        assert_eq!(b.to_string(), "10.0.0.128/25");
        assert!(ipam.free(&a));
        assert!(ipam.free(&b));
        assert_eq!(ipam.to_string(), "10.0.0.0/24[free]");
    }

    #[test]
    fn scenario_5_excludes_around_a_kept_range() {
        // ranges is the space to keep available; Excludes(universe, ranges)
        // busy-marks everything outside it (the two masked ends).
        let ranges = vec![ipam_cidr::IpRange::parse("10.0.0.10-10.0.0.250").unwrap()];
        let ipam = Ipam::with_excludes(cidr("10.0.0.0/24"), &ranges).unwrap();
        assert_eq!(
            ipam.to_string(),
            "10.0.0.0/26[00000000 00000000 00000000 00000000 00000000 00000000 00000011 11111111], \
10.0.0.64/26[free], 10.0.0.128/26[free], \
10.0.0.192/26[11111000 00000000 00000000 00000000 00000000 00000000 00000000 00000000]"
        );
    }

    #[test]
    fn scenario_6_explicit_busy() {
        let mut ipam = Ipam::new(cidr("10.0.0.0/24")).unwrap();
        assert!(ipam.busy(&cidr("10.0.0.127/32")));
        assert_eq!(
            ipam.to_string(),
            "10.0.0.0/26[free], \
10.0.0.64/26[10000000 00000000 00000000 00000000 00000000 00000000 00000000 00000000], \
10.0.0.128/25[free]"
        );
    }

    #[test]
    fn busy_idempotence() {
        let mut ipam = Ipam::new(cidr("10.0.0.0/24")).unwrap();
        assert!(ipam.busy(&cidr("10.0.0.0/25")));
        assert!(!ipam.busy(&cidr("10.0.0.0/25")));
    }

    #[test]
    fn round_robin_biases_away_from_last_allocation() {
        let mut ipam = Ipam::new(cidr("10.0.0.0/24")).unwrap();
        ipam.set_round_robin(true);
        let a = ipam.alloc(26).unwrap();
        let b = ipam.alloc(26).unwrap();
        assert!(a.first_ip().to_u128() < b.first_ip().to_u128());
        assert_eq!(ipam.state(), vec![(26, b)]);
    }

    #[test]
    fn from_ranges_merges_adjacent_halves() {
        let ranges = vec![
            ipam_cidr::IpRange::parse("10.0.0.0/25").unwrap(),
            ipam_cidr::IpRange::parse("10.0.0.128/25").unwrap(),
        ];
        let ipam = Ipam::from_ranges(&ranges).unwrap();
        assert_eq!(ipam.to_string(), "10.0.0.0/24[free]");
    }

    #[test]
    fn contains_checks_universe_membership() {
        let ipam = Ipam::new(cidr("10.0.0.0/24")).unwrap();
        assert!(ipam.contains(&cidr("10.0.0.0/28")));
        assert!(!ipam.contains(&cidr("11.0.0.0/28")));
    }

    #[test]
    fn with_excludes_prunes_fully_busy_blocks() {
        // Keep only 0-127 available; the other half is busied, then
        // dropped entirely since it's completely busy.
        let ranges = vec![ipam_cidr::IpRange::parse("10.0.0.0-10.0.0.127").unwrap()];
        let ipam = Ipam::with_excludes(cidr("10.0.0.0/24"), &ranges).unwrap();
        assert_eq!(ipam.to_string(), "10.0.0.0/25[free]");
    }
}
