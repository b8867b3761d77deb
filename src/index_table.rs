//! The bucket index: an open-addressed array whose occupied entries are
//! threaded into per-home-bucket chains.
//!
//! Every occupied bucket points at one slot of the dense slot store and, via
//! [`Chain`], at the next bucket holding a key with the same home. The head
//! of a chain always sits in the chain's home bucket: when a key arrives at a
//! home bucket that is borrowed by a foreign chain, the foreign occupant is
//! kicked out to a free bucket first.

use alloc::vec::Vec;

use crate::error::Fallibility;
use crate::error::TryReserveError;
use crate::error::reserve_exact;

/// Smallest bucket count the index is ever allocated with.
pub(crate) const MIN_BUCKETS: usize = 4;

/// Largest bucket count addressable with 32-bit chain links.
pub(crate) const MAX_BUCKETS: usize = 1 << 31;

/// How many buckets past the hint are probed directly before falling back to
/// the occupancy bitmap scan.
const LINEAR_PROBE: usize = 8;

#[inline(always)]
pub(crate) fn hashtag(hash: u64) -> u32 {
    (hash >> 32) as u32
}

/// Link from one bucket to the next member of its chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Chain {
    /// The bucket holds nothing.
    Empty,
    /// The bucket is occupied and is the last member of its chain.
    End,
    /// The bucket is occupied and the chain continues at this bucket.
    Next(u32),
}

/// Position of an entry in the slot store together with the high half of its
/// hash. The low half is implied by the chain's home bucket, so comparing the
/// tag rejects most foreign candidates without touching the slot store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlotRef {
    pub(crate) slot: u32,
    pub(crate) tag: u32,
}

impl SlotRef {
    #[inline(always)]
    pub(crate) fn new(slot: usize, hash: u64) -> Self {
        debug_assert!(slot < MAX_BUCKETS);
        SlotRef {
            slot: slot as u32,
            tag: hashtag(hash),
        }
    }

    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        self.slot as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub(crate) chain: Chain,
    pub(crate) slot: SlotRef,
}

impl IndexEntry {
    const EMPTY: IndexEntry = IndexEntry {
        chain: Chain::Empty,
        slot: SlotRef { slot: 0, tag: 0 },
    };

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.chain == Chain::Empty
    }

    #[inline(always)]
    fn next(&self) -> Option<usize> {
        match self.chain {
            Chain::Next(next) => Some(next as usize),
            Chain::Empty | Chain::End => None,
        }
    }
}

/// Where a key that is not yet present will be threaded in.
///
/// Computed by [`IndexTable::probe`] and applied by [`IndexTable::place`].
/// Nothing is mutated between the two, so a probe that is never placed leaves
/// no trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Placement {
    /// The home bucket is free; the key becomes the head of a new chain.
    Claim(usize),
    /// The home chain exists; append a free bucket after `tail`.
    Append { tail: usize },
    /// The home bucket is borrowed by a member of the chain rooted at `root`.
    /// Relocate that member, then claim `bucket`.
    KickOut { bucket: usize, root: usize },
}

/// Result of looking a key up with the intent to insert it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Probe {
    Found(usize),
    Vacant(Placement),
}

#[derive(Clone, Default)]
pub(crate) struct IndexTable {
    entries: Vec<IndexEntry>,
    /// One bit per bucket, set while the bucket is occupied. Padding bits of a
    /// partial word are permanently set.
    occupied: Vec<u64>,
    mask: usize,
    /// Bitmap word the last fallback scan stopped at.
    cursor: usize,
}

impl IndexTable {
    /// Allocate an index with `buckets` empty buckets.
    ///
    /// `buckets` must be zero or a power of two no larger than
    /// [`MAX_BUCKETS`].
    pub(crate) fn try_new(buckets: usize, fallibility: Fallibility) -> Result<Self, TryReserveError> {
        if buckets == 0 {
            return Ok(Self::default());
        }
        debug_assert!(buckets.is_power_of_two());
        debug_assert!(buckets <= MAX_BUCKETS);

        let mut entries = Vec::new();
        reserve_exact(&mut entries, buckets, fallibility)?;
        entries.resize(buckets, IndexEntry::EMPTY);

        let words = buckets.div_ceil(64);
        let mut occupied = Vec::new();
        reserve_exact(&mut occupied, words, fallibility)?;
        occupied.resize(words, 0);

        let mut table = IndexTable {
            entries,
            occupied,
            mask: buckets - 1,
            cursor: 0,
        };
        table.seal_padding();
        Ok(table)
    }

    #[inline]
    fn seal_padding(&mut self) {
        let buckets = self.entries.len();
        if buckets % 64 != 0 {
            // Only tables smaller than one word have padding.
            self.occupied[0] |= !0u64 << buckets;
        }
    }

    #[inline(always)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub(crate) fn home(&self, hash: u64) -> usize {
        hash as usize & self.mask
    }

    #[cfg(any(test, feature = "stats"))]
    #[inline(always)]
    pub(crate) fn entry(&self, bucket: usize) -> &IndexEntry {
        &self.entries[bucket]
    }

    #[inline(always)]
    pub(crate) fn slot_of(&self, bucket: usize) -> usize {
        self.entries[bucket].slot.index()
    }

    #[cfg(test)]
    pub(crate) fn is_marked(&self, bucket: usize) -> bool {
        self.occupied[bucket / 64] & (1 << (bucket % 64)) != 0
    }

    #[cfg(test)]
    pub(crate) fn padding_sealed(&self) -> bool {
        let buckets = self.entries.len();
        buckets % 64 == 0 || self.occupied[0] & (!0u64 << buckets) == !0u64 << buckets
    }

    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn allocated_bytes(&self) -> usize {
        self.entries.capacity() * core::mem::size_of::<IndexEntry>()
            + self.occupied.capacity() * core::mem::size_of::<u64>()
    }

    /// Mark every bucket empty, keeping the allocation.
    pub(crate) fn clear(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        self.entries.fill(IndexEntry::EMPTY);
        self.occupied.fill(0);
        self.seal_padding();
        self.cursor = 0;
    }

    #[inline(always)]
    fn occupy(&mut self, bucket: usize, entry: IndexEntry) {
        debug_assert!(self.entries[bucket].is_empty());
        debug_assert!(!entry.is_empty());
        self.entries[bucket] = entry;
        self.occupied[bucket / 64] |= 1 << (bucket % 64);
    }

    #[inline(always)]
    fn release(&mut self, bucket: usize) {
        self.entries[bucket] = IndexEntry::EMPTY;
        self.occupied[bucket / 64] &= !(1 << (bucket % 64));
    }

    /// Point `bucket` at a different slot, keeping its tag and chain link.
    #[inline(always)]
    pub(crate) fn repoint(&mut self, bucket: usize, slot: usize) {
        debug_assert!(!self.entries[bucket].is_empty());
        self.entries[bucket].slot.slot = slot as u32;
    }

    /// Walk the home chain of `hash` and return the bucket whose slot
    /// satisfies `eq`.
    ///
    /// `eq` is only consulted for buckets whose tag matches.
    #[inline]
    pub(crate) fn find(&self, hash: u64, mut eq: impl FnMut(usize) -> bool) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }

        let mut bucket = self.home(hash);
        if self.entries[bucket].is_empty() {
            return None;
        }

        let tag = hashtag(hash);
        loop {
            let entry = &self.entries[bucket];
            if entry.slot.tag == tag && eq(entry.slot.index()) {
                return Some(bucket);
            }
            bucket = entry.next()?;
        }
    }

    /// Like [`find`](Self::find), but when the key is absent report where it
    /// would be threaded in.
    ///
    /// `hash_of` maps a slot to the full hash stored for it and is used to
    /// decide whether the occupant of the home bucket actually lives there.
    pub(crate) fn probe(
        &self,
        hash: u64,
        mut eq: impl FnMut(usize) -> bool,
        hash_of: impl Fn(usize) -> u64,
    ) -> Probe {
        debug_assert!(!self.entries.is_empty());

        let bucket = self.home(hash);
        let head = self.entries[bucket];
        if head.is_empty() {
            return Probe::Vacant(Placement::Claim(bucket));
        }

        let tag = hashtag(hash);
        if head.slot.tag == tag && eq(head.slot.index()) {
            return Probe::Found(bucket);
        }

        let root = self.home(hash_of(head.slot.index()));
        if root != bucket {
            // A chain head always lives in its home bucket, so no key homed
            // here exists yet.
            return Probe::Vacant(Placement::KickOut { bucket, root });
        }

        let mut tail = bucket;
        while let Some(next) = self.entries[tail].next() {
            tail = next;
            let entry = &self.entries[tail];
            if entry.slot.tag == tag && eq(entry.slot.index()) {
                return Probe::Found(tail);
            }
        }

        Probe::Vacant(Placement::Append { tail })
    }

    /// Thread a new entry in according to `placement`, returning the bucket it
    /// now occupies.
    pub(crate) fn place(&mut self, placement: Placement, slot: SlotRef) -> usize {
        let entry = IndexEntry {
            chain: Chain::End,
            slot,
        };
        match placement {
            Placement::Claim(bucket) => {
                self.occupy(bucket, entry);
                bucket
            }
            Placement::Append { tail } => {
                let bucket = self.find_empty_bucket(tail);
                self.entries[tail].chain = Chain::Next(bucket as u32);
                self.occupy(bucket, entry);
                bucket
            }
            Placement::KickOut { bucket, root } => {
                self.kick_out(root, bucket);
                self.occupy(bucket, entry);
                bucket
            }
        }
    }

    /// Thread in an entry whose key is known not to be present.
    pub(crate) fn place_unique(
        &mut self,
        hash: u64,
        slot: usize,
        hash_of: impl Fn(usize) -> u64,
    ) -> usize {
        let bucket = self.home(hash);
        let head = self.entries[bucket];
        let placement = if head.is_empty() {
            Placement::Claim(bucket)
        } else {
            let root = self.home(hash_of(head.slot.index()));
            if root != bucket {
                Placement::KickOut { bucket, root }
            } else {
                Placement::Append {
                    tail: self.find_last(bucket),
                }
            }
        };

        self.place(placement, SlotRef::new(slot, hash))
    }

    /// Move the occupant of `bucket`, a non-head member of the chain rooted at
    /// `root`, to a free bucket and leave `bucket` empty.
    ///
    /// ```text
    /// before: root -> .. -> prev -> bucket -> next
    /// after:  root -> .. -> prev -> moved  -> next
    /// ```
    fn kick_out(&mut self, root: usize, bucket: usize) {
        let displaced = self.entries[bucket];
        let prev = self.find_prev(root, bucket);
        let moved = self.find_empty_bucket(bucket);
        log::trace!("kick out bucket {bucket} (home {root}) to {moved}");

        self.occupy(moved, displaced);
        self.entries[prev].chain = Chain::Next(moved as u32);
        self.release(bucket);
    }

    /// Remove `bucket` from the chain rooted at `root`.
    ///
    /// When `bucket` is the head and the chain continues, the successor's slot
    /// is pulled into the head so the chain keeps its home, and the
    /// successor's bucket is freed instead.
    pub(crate) fn unlink(&mut self, bucket: usize, root: usize) {
        let next = self.entries[bucket].chain;
        if bucket == root {
            match next {
                Chain::Next(successor) => {
                    let successor = successor as usize;
                    self.entries[root] = self.entries[successor];
                    self.release(successor);
                }
                Chain::End => self.release(root),
                Chain::Empty => unreachable!("unlinking empty bucket {bucket}"),
            }
            return;
        }

        let prev = self.find_prev(root, bucket);
        self.entries[prev].chain = match next {
            Chain::Next(successor) => Chain::Next(successor),
            Chain::End | Chain::Empty => Chain::End,
        };
        self.release(bucket);
    }

    /// Bucket referencing `slot`, whose stored hash is `hash`.
    pub(crate) fn find_slot(&self, hash: u64, slot: usize) -> usize {
        let mut bucket = self.home(hash);
        loop {
            let entry = &self.entries[bucket];
            if !entry.is_empty() && entry.slot.index() == slot {
                return bucket;
            }
            match entry.next() {
                Some(next) => bucket = next,
                None => unreachable!("slot {slot} is not threaded through its home chain"),
            }
        }
    }

    fn find_last(&self, root: usize) -> usize {
        let mut bucket = root;
        while let Some(next) = self.entries[bucket].next() {
            bucket = next;
        }
        bucket
    }

    fn find_prev(&self, root: usize, bucket: usize) -> usize {
        let mut prev = root;
        loop {
            match self.entries[prev].next() {
                Some(next) if next == bucket => return prev,
                Some(next) => prev = next,
                None => unreachable!("bucket {bucket} is not part of the chain rooted at {root}"),
            }
        }
    }

    /// Find a free bucket, preferring the neighbourhood of `from`.
    ///
    /// The caller's load factor guarantees that at least one bucket is free.
    fn find_empty_bucket(&mut self, from: usize) -> usize {
        for offset in 1..=LINEAR_PROBE {
            let bucket = (from + offset) & self.mask;
            if self.entries[bucket].is_empty() {
                return bucket;
            }
        }

        let words = self.occupied.len();
        let mut word = self.cursor;
        for _ in 0..words {
            let free = !self.occupied[word];
            if free != 0 {
                self.cursor = word;
                return word * 64 + free.trailing_zeros() as usize;
            }
            word += 1;
            if word == words {
                word = 0;
            }
        }

        unreachable!("no free bucket among {}", self.entries.len())
    }

    /// Number of hops from `root` needed to reach each member of its chain,
    /// reported through `visit`.
    #[cfg(any(test, feature = "stats"))]
    pub(crate) fn walk_chain(&self, root: usize, mut visit: impl FnMut(usize, usize)) {
        let mut bucket = root;
        let mut hops = 0;
        loop {
            visit(bucket, hops);
            match self.entries[bucket].next() {
                Some(next) => {
                    bucket = next;
                    hops += 1;
                }
                None => return,
            }
        }
    }
}

impl core::fmt::Debug for IndexTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        use alloc::format;
        use alloc::string::String;

        let buckets = self
            .entries
            .iter()
            .map(|entry| match entry.chain {
                Chain::Empty => String::from(".."),
                Chain::End => format!("{}$", entry.slot.slot),
                Chain::Next(next) => format!("{}>{}", entry.slot.slot, next),
            })
            .collect::<Vec<_>>();

        f.debug_struct("IndexTable")
            .field("buckets", &buckets)
            .field("cursor", &self.cursor)
            .finish()
    }
}
