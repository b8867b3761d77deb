//! The raw table: a dense slot store addressed through a chained bucket
//! index.
//!
//! Values live contiguously in insertion order (modulo swap-with-last on
//! removal), so iteration is a plain slice walk. Lookups hash into the bucket
//! index, follow the home chain, and only touch the slot store for buckets
//! whose 32-bit tag matches.

use alloc::vec::Vec;
use core::fmt::Debug;
use core::iter::FusedIterator;

use crate::error::Fallibility;
use crate::error::TryReserveError;
use crate::error::reserve_exact;
use crate::index_table::IndexTable;
use crate::index_table::MAX_BUCKETS;
use crate::index_table::MIN_BUCKETS;
use crate::index_table::Placement;
use crate::index_table::Probe;
use crate::index_table::SlotRef;

/// Load factor a new table starts with.
pub const DEFAULT_MAX_LOAD_FACTOR: f32 = 0.8;

const MIN_LOAD_FACTOR: f32 = 0.2;
const MAX_LOAD_FACTOR: f32 = 0.999;

#[inline]
fn growth_limit(buckets: usize, max_load_factor: f32) -> usize {
    (buckets as f64 * max_load_factor as f64) as usize
}

/// Smallest power-of-two bucket count whose growth limit covers `elements`.
fn buckets_for(
    elements: usize,
    max_load_factor: f32,
    fallibility: Fallibility,
) -> Result<usize, TryReserveError> {
    if elements == 0 {
        return Ok(0);
    }

    let mut buckets = elements
        .checked_next_power_of_two()
        .ok_or_else(|| fallibility.capacity_overflow())?
        .max(MIN_BUCKETS);
    while growth_limit(buckets, max_load_factor) < elements {
        buckets = buckets
            .checked_mul(2)
            .ok_or_else(|| fallibility.capacity_overflow())?;
    }

    if buckets > MAX_BUCKETS {
        return Err(fallibility.capacity_overflow());
    }
    Ok(buckets)
}

#[inline(always)]
fn infallible<T>(result: Result<T, TryReserveError>) -> T {
    match result {
        Ok(value) => value,
        // Infallible reservations panic or abort instead of returning.
        Err(_) => unreachable!(),
    }
}

#[derive(Clone)]
pub(crate) struct Slot<V> {
    hash: u64,
    value: V,
}

/// Chain-length statistics for a populated table.
///
/// Only available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of elements currently in the table
    pub populated: usize,
    /// Number of elements the table holds before it rehashes
    pub capacity: usize,
    /// Number of buckets in the index
    pub bucket_count: usize,
    /// Number of distinct chains (home buckets with at least one key)
    pub chains: usize,
    /// Number of elements whose bucket is not their home bucket
    pub displaced: usize,
    /// Number of entries in the longest chain
    pub longest_chain: usize,
    /// Average number of entries per chain
    pub average_chain: f64,
    /// Load factor (populated / bucket_count)
    pub load_factor: f64,
    /// Total memory in bytes held by the index and slot store
    pub total_bytes: usize,
    /// Memory in bytes held by unused slot capacity
    pub wasted_bytes: usize,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the statistics to stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Chain Statistics ===");
        println!(
            "Population: {}/{} ({} buckets, {:.2}% load factor)",
            self.populated,
            self.capacity,
            self.bucket_count,
            self.load_factor * 100.0
        );
        println!(
            "Chains: {} (average {:.2} entries, longest {})",
            self.chains, self.average_chain, self.longest_chain
        );
        println!(
            "Displaced: {} entries outside their home bucket",
            self.displaced
        );
        println!("Total Allocated: {} bytes", self.total_bytes);
        println!(
            "Memory: {} bytes of unused slot capacity ({:.02}%)",
            self.wasted_bytes,
            if self.total_bytes == 0 {
                0.0
            } else {
                (self.wasted_bytes as f64 / self.total_bytes as f64) * 100.0
            }
        );
    }
}

/// Number of chain hops needed to reach each entry.
///
/// `bins()[n]` counts the entries found after following `n` links from their
/// home bucket. The last bin also collects everything further away.
///
/// Only available with the `stats` feature.
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHistogram {
    bins: Vec<usize>,
}

#[cfg(any(test, feature = "stats"))]
impl ChainHistogram {
    /// Number of bins in the histogram.
    pub const BINS: usize = 16;

    /// The per-distance entry counts.
    pub fn bins(&self) -> &[usize] {
        &self.bins
    }

    /// Total number of entries counted.
    pub fn total(&self) -> usize {
        self.bins.iter().sum()
    }

    /// Print a horizontal bar chart of the histogram to stdout.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        const PARTIAL: [char; 8] = [' ', '▏', '▎', '▍', '▌', '▋', '▊', '▉'];

        let max = self.bins.iter().copied().max().unwrap_or(0);
        if max == 0 {
            println!("chain histogram: empty");
            return;
        }

        let units_per_row = 60 * 8;
        println!("chain histogram ({} entries):", self.total());
        for (hops, &count) in self.bins.iter().enumerate() {
            let units = (count * units_per_row).div_ceil(max);
            let mut bar = "█".repeat(units / 8);
            if units % 8 != 0 {
                bar.push(PARTIAL[units % 8]);
            }

            let label = if hops + 1 == Self::BINS {
                alloc::format!("{hops:>2}+")
            } else {
                alloc::format!("{hops:>3}")
            };
            println!("{label} | {bar} ({count})");
        }
    }
}

/// A hash table using separate chaining threaded through an open-addressed
/// bucket index.
///
/// `HashTable<V>` stores values of type `V`. Like the raw tables of other
/// hashing crates it does not hash anything itself: every operation takes the
/// 64-bit hash of the key and an equality predicate.
///
/// ## Layout
///
/// - Values are stored densely with their hash, so iteration and clearing are
///   linear in the number of elements, not the number of buckets.
/// - The bucket index costs 16 bytes per bucket plus one bit of occupancy
///   bitmap. The index is kept at most [`max_load_factor`] full (0.8 by
///   default).
/// - Removing an element moves the last element into its place, so slot
///   positions (see [`find_index`]) are only stable until the next removal.
///
/// [`max_load_factor`]: HashTable::max_load_factor
/// [`find_index`]: HashTable::find_index
///
/// ## Example
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use chain_hash::hash_table::HashTable;
/// # use siphasher::sip::SipHasher;
/// #
/// # #[derive(Debug, PartialEq)]
/// # struct Person {
/// #     id: u64,
/// #     name: String,
/// # }
/// #
/// # fn hash_id(id: u64) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     id.hash(&mut hasher);
/// #     hasher.finish()
/// # }
///
/// let mut table = HashTable::with_capacity(100);
/// let hash = hash_id(123);
///
/// match table.entry(hash, |p: &Person| p.id == 123) {
///     chain_hash::hash_table::Entry::Vacant(entry) => {
///         entry.insert(Person {
///             id: 123,
///             name: "Alice".to_string(),
///         });
///     }
///     chain_hash::hash_table::Entry::Occupied(_) => {
///         println!("Person already exists");
///     }
/// }
///
/// assert_eq!(table.find(hash, |p| p.id == 123).unwrap().name, "Alice");
/// ```
pub struct HashTable<V> {
    index: IndexTable,
    slots: Vec<Slot<V>>,
    growth_limit: usize,
    max_load_factor: f32,
}

impl<V> Debug for HashTable<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.slots.is_empty() && self.index.bucket_count() == 0 {
            return f.write_str("HashTable { empty }");
        }

        let hashes = self
            .slots
            .iter()
            .map(|slot| alloc::format!("{:016X}", slot.hash))
            .collect::<Vec<_>>();

        f.debug_struct("HashTable")
            .field("len", &self.slots.len())
            .field("capacity", &self.growth_limit)
            .field("max_load_factor", &self.max_load_factor)
            .field("hashes", &hashes)
            .field("index", &self.index)
            .finish()
    }
}

impl<V: Clone> Clone for HashTable<V> {
    fn clone(&self) -> Self {
        let mut slots = Vec::with_capacity(self.growth_limit.max(self.slots.len()));
        slots.extend(self.slots.iter().cloned());

        HashTable {
            index: self.index.clone(),
            slots,
            growth_limit: self.growth_limit,
            max_load_factor: self.max_load_factor,
        }
    }
}

impl<V> Default for HashTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> HashTable<V> {
    /// Creates an empty table. Nothing is allocated until the first insertion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let table: HashTable<u32> = HashTable::new();
    /// assert_eq!(table.bucket_count(), 0);
    /// assert_eq!(table.capacity(), 0);
    /// ```
    pub fn new() -> Self {
        HashTable {
            index: IndexTable::default(),
            slots: Vec::new(),
            growth_limit: 0,
            max_load_factor: DEFAULT_MAX_LOAD_FACTOR,
        }
    }

    /// Creates a new hash table able to hold at least `capacity` elements
    /// without rehashing.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds what 32-bit bucket links can address.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// // Create a table that can hold at least 100 items without resizing
    /// let table: HashTable<String> = HashTable::with_capacity(100);
    /// assert!(table.capacity() >= 100);
    /// assert!(table.bucket_count().is_power_of_two());
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        infallible(Self::allocate(capacity, Fallibility::Infallible))
    }

    /// Fallible version of [`with_capacity`](Self::with_capacity).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::TryReserveError;
    /// # use chain_hash::hash_table::HashTable;
    /// let table: HashTable<u8> = HashTable::try_with_capacity(10).unwrap();
    /// assert!(table.capacity() >= 10);
    ///
    /// let err = HashTable::<u8>::try_with_capacity(usize::MAX).unwrap_err();
    /// assert_eq!(err, TryReserveError::CapacityOverflow);
    /// ```
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        Self::allocate(capacity, Fallibility::Fallible)
    }

    fn allocate(capacity: usize, fallibility: Fallibility) -> Result<Self, TryReserveError> {
        let mut table = Self::new();
        if capacity > 0 {
            let buckets = buckets_for(capacity, table.max_load_factor, fallibility)?;
            table.rehash_to(buckets, fallibility)?;
        }
        Ok(table)
    }

    /// Returns the number of elements in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the table contains no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the number of elements the table can hold before it has to
    /// rehash: `floor(bucket_count * max_load_factor)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let table: HashTable<u8> = HashTable::with_capacity(6);
    /// assert_eq!(table.bucket_count(), 8);
    /// assert_eq!(table.capacity(), 6);
    /// ```
    #[inline]
    pub fn capacity(&self) -> usize {
        self.growth_limit
    }

    /// Returns the number of buckets in the index. Always zero or a power of
    /// two.
    #[inline]
    pub fn bucket_count(&self) -> usize {
        self.index.bucket_count()
    }

    /// Returns `len / bucket_count`, or zero for an unallocated table.
    pub fn load_factor(&self) -> f32 {
        match self.bucket_count() {
            0 => 0.0,
            buckets => self.len() as f32 / buckets as f32,
        }
    }

    /// Returns the load factor above which the table grows.
    #[inline]
    pub fn max_load_factor(&self) -> f32 {
        self.max_load_factor
    }

    /// Sets the load factor above which the table grows.
    ///
    /// The value is clamped to `[0.2, 0.999]`; `NaN` is ignored. If the table
    /// already holds more elements than the new limit allows it is rehashed
    /// immediately.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table: HashTable<u8> = HashTable::with_capacity(6);
    /// table.set_max_load_factor(0.5);
    /// assert_eq!(table.max_load_factor(), 0.5);
    /// assert_eq!(table.capacity(), 4);
    ///
    /// table.set_max_load_factor(7.0);
    /// assert_eq!(table.max_load_factor(), 0.999);
    /// ```
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        if max_load_factor.is_nan() {
            return;
        }

        self.max_load_factor = max_load_factor.clamp(MIN_LOAD_FACTOR, MAX_LOAD_FACTOR);
        self.growth_limit = growth_limit(self.bucket_count(), self.max_load_factor);

        if self.len() > self.growth_limit {
            let buckets = infallible(buckets_for(
                self.len(),
                self.max_load_factor,
                Fallibility::Infallible,
            ));
            infallible(self.rehash_to(buckets, Fallibility::Infallible));
        } else if self.growth_limit > self.slots.capacity() {
            let additional = self.growth_limit - self.slots.len();
            infallible(reserve_exact(
                &mut self.slots,
                additional,
                Fallibility::Infallible,
            ));
        }
    }

    /// Returns an iterator over all values in the table, in slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// #
    /// # use chain_hash::hash_table::HashTable;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # fn hash_str(s: &str) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     s.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// #
    /// let mut table = HashTable::with_capacity(10);
    /// table.entry(hash_str("a"), |s: &String| s == "a").or_insert("a".to_string());
    /// table.entry(hash_str("b"), |s: &String| s == "b").or_insert("b".to_string());
    ///
    /// let values: Vec<&String> = table.iter().collect();
    /// assert_eq!(values, ["a", "b"]);
    /// ```
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            inner: self.slots.iter(),
        }
    }

    /// Returns an iterator yielding mutable references to all values.
    pub fn iter_mut(&mut self) -> IterMut<'_, V> {
        IterMut {
            inner: self.slots.iter_mut(),
        }
    }

    /// Removes every value from the table, returning them in slot order.
    ///
    /// The allocation is kept. Values not consumed by the iterator are
    /// dropped when it is.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table = HashTable::with_capacity(4);
    /// table.insert_unique(1, 'a');
    /// table.insert_unique(2, 'b');
    ///
    /// let drained: Vec<char> = table.drain().collect();
    /// assert_eq!(drained, ['a', 'b']);
    /// assert!(table.is_empty());
    /// assert!(table.capacity() >= 2);
    /// ```
    pub fn drain(&mut self) -> Drain<'_, V> {
        self.index.clear();
        Drain {
            inner: self.slots.drain(..),
        }
    }

    /// Removes all values, keeping the allocation.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
    }

    /// Rehashes into the smallest index that still holds every element and
    /// gives unused slot capacity back to the allocator. An empty table
    /// releases all of its storage.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table: HashTable<u32> = HashTable::with_capacity(1000);
    /// table.insert_unique(7, 7);
    /// table.shrink_to_fit();
    /// assert_eq!(table.bucket_count(), 4);
    ///
    /// table.clear();
    /// table.shrink_to_fit();
    /// assert_eq!(table.bucket_count(), 0);
    /// ```
    pub fn shrink_to_fit(&mut self) {
        if self.slots.is_empty() {
            log::debug!("shrink: releasing {} empty buckets", self.bucket_count());
            self.index = IndexTable::default();
            self.slots = Vec::new();
            self.growth_limit = 0;
            return;
        }

        let buckets = infallible(buckets_for(
            self.len(),
            self.max_load_factor,
            Fallibility::Infallible,
        ));
        if buckets < self.bucket_count() {
            log::debug!(
                "shrink: {} -> {} buckets for {} entries",
                self.bucket_count(),
                buckets,
                self.len()
            );
            infallible(self.rehash_to(buckets, Fallibility::Infallible));
        }
        self.slots.shrink_to(self.growth_limit);
    }

    /// Reserves room for at least `additional` more elements.
    ///
    /// # Panics
    ///
    /// Panics if the new capacity overflows the table's 32-bit indices.
    pub fn reserve(&mut self, additional: usize) {
        infallible(self.reserve_impl(additional, Fallibility::Infallible));
    }

    /// Fallible version of [`reserve`](Self::reserve). On error the table is
    /// unchanged.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table: HashTable<u64> = HashTable::new();
    /// table.try_reserve(100).unwrap();
    /// assert!(table.capacity() >= 100);
    ///
    /// assert!(table.try_reserve(usize::MAX).is_err());
    /// assert!(table.capacity() >= 100);
    /// ```
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.reserve_impl(additional, Fallibility::Fallible)
    }

    /// Rebuilds the index with at least `buckets` buckets.
    ///
    /// The request is rounded up to a power of two and to the bucket count
    /// the current elements need under the maximum load factor, so this can
    /// shrink the index as well as grow it but never below what `len`
    /// requires. A request matching the current bucket count does nothing.
    ///
    /// # Panics
    ///
    /// Panics if `buckets` exceeds the table's 32-bit addressing limit.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table: HashTable<u64> = HashTable::new();
    /// table.rehash(100);
    /// assert_eq!(table.bucket_count(), 128);
    ///
    /// table.insert_unique(7, 7);
    /// table.rehash(0);
    /// assert_eq!(table.bucket_count(), 4);
    /// assert_eq!(table.find(7, |&v| v == 7), Some(&7));
    /// ```
    pub fn rehash(&mut self, buckets: usize) {
        infallible(self.rehash_impl(buckets, Fallibility::Infallible));
    }

    /// Fallible version of [`rehash`](Self::rehash). On error the table is
    /// unchanged.
    pub fn try_rehash(&mut self, buckets: usize) -> Result<(), TryReserveError> {
        self.rehash_impl(buckets, Fallibility::Fallible)
    }

    fn rehash_impl(&mut self, buckets: usize, fallibility: Fallibility) -> Result<(), TryReserveError> {
        let requested = match buckets {
            0 => 0,
            buckets => buckets
                .checked_next_power_of_two()
                .ok_or_else(|| fallibility.capacity_overflow())?
                .max(MIN_BUCKETS),
        };
        if requested > MAX_BUCKETS {
            return Err(fallibility.capacity_overflow());
        }

        let buckets = requested.max(buckets_for(self.len(), self.max_load_factor, fallibility)?);
        if buckets == self.bucket_count() {
            return Ok(());
        }
        if buckets == 0 {
            self.index = IndexTable::default();
            self.growth_limit = 0;
            return Ok(());
        }
        self.rehash_to(buckets, fallibility)
    }

    fn reserve_impl(
        &mut self,
        additional: usize,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        let required = self
            .len()
            .checked_add(additional)
            .ok_or_else(|| fallibility.capacity_overflow())?;
        if required <= self.growth_limit {
            return Ok(());
        }

        let buckets = buckets_for(required, self.max_load_factor, fallibility)?;
        self.rehash_to(buckets, fallibility)
    }

    #[inline(always)]
    fn maybe_grow(&mut self, fallibility: Fallibility) -> Result<(), TryReserveError> {
        if self.slots.len() < self.growth_limit {
            return Ok(());
        }
        self.grow(fallibility)
    }

    #[cold]
    #[inline(never)]
    fn grow(&mut self, fallibility: Fallibility) -> Result<(), TryReserveError> {
        let buckets = buckets_for(self.len() + 1, self.max_load_factor, fallibility)?
            .max(self.bucket_count().saturating_mul(2));
        if buckets > MAX_BUCKETS {
            return Err(fallibility.capacity_overflow());
        }
        self.rehash_to(buckets, fallibility)
    }

    /// Rebuild the index with `buckets` buckets.
    ///
    /// All allocation happens before the live index is replaced, so an error
    /// leaves the table untouched.
    fn rehash_to(&mut self, buckets: usize, fallibility: Fallibility) -> Result<(), TryReserveError> {
        debug_assert!(growth_limit(buckets, self.max_load_factor) >= self.len());

        let mut index = IndexTable::try_new(buckets, fallibility)?;
        let limit = growth_limit(buckets, self.max_load_factor);
        if limit > self.slots.capacity() {
            let additional = limit - self.slots.len();
            reserve_exact(&mut self.slots, additional, fallibility)?;
        }

        let slots = &self.slots;
        let mut displaced = 0usize;
        for (position, slot) in slots.iter().enumerate() {
            let bucket = index.place_unique(slot.hash, position, |s| slots[s].hash);
            displaced += usize::from(bucket != index.home(slot.hash));
        }

        log::debug!(
            "rehash: {} -> {} buckets, {} entries, {} outside their home bucket",
            self.index.bucket_count(),
            buckets,
            self.slots.len(),
            displaced
        );

        self.index = index;
        self.growth_limit = limit;
        Ok(())
    }

    #[inline]
    fn find_bucket(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<usize> {
        let slots = &self.slots;
        self.index.find(hash, |slot| eq(&slots[slot].value))
    }

    /// Searches for a value matching `eq` among values stored with `hash`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// #
    /// # use chain_hash::hash_table::HashTable;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # fn hash_str(s: &str) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     s.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// #
    /// let mut table = HashTable::with_capacity(10);
    /// let hash = hash_str("key");
    /// table.entry(hash, |s: &String| s == "key").or_insert("key".to_string());
    ///
    /// assert_eq!(table.find(hash, |s| s == "key"), Some(&"key".to_string()));
    /// assert_eq!(table.find(hash_str("missing"), |s| s == "missing"), None);
    /// ```
    pub fn find(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&V> {
        let bucket = self.find_bucket(hash, eq)?;
        Some(&self.slots[self.index.slot_of(bucket)].value)
    }

    /// Mutable version of [`find`](Self::find).
    pub fn find_mut(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<&mut V> {
        let bucket = self.find_bucket(hash, eq)?;
        let slot = self.index.slot_of(bucket);
        Some(&mut self.slots[slot].value)
    }

    /// Returns the slot position of the matching value, usable with
    /// [`get_index`](Self::get_index) until the next removal.
    pub fn find_index(&self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<usize> {
        let bucket = self.find_bucket(hash, eq)?;
        Some(self.index.slot_of(bucket))
    }

    /// Returns the value stored at slot position `index`.
    #[inline]
    pub fn get_index(&self, index: usize) -> Option<&V> {
        self.slots.get(index).map(|slot| &slot.value)
    }

    /// Mutable version of [`get_index`](Self::get_index).
    #[inline]
    pub fn get_index_mut(&mut self, index: usize) -> Option<&mut V> {
        self.slots.get_mut(index).map(|slot| &mut slot.value)
    }

    /// Gets the entry for the value matching `eq`, growing the table first
    /// if it is at capacity.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// #
    /// # use chain_hash::hash_table::HashTable;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # fn hash_str(s: &str) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     s.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// #
    /// let mut table = HashTable::with_capacity(10);
    /// let hash = hash_str("hello");
    ///
    /// // Insert or update pattern
    /// match table.entry(hash, |s: &String| s == "hello") {
    ///     chain_hash::hash_table::Entry::Vacant(entry) => {
    ///         entry.insert("hello".to_string());
    ///     }
    ///     chain_hash::hash_table::Entry::Occupied(mut entry) => {
    ///         *entry.get_mut() = "updated".to_string();
    ///     }
    /// }
    ///
    /// // Or use the convenience method
    /// table
    ///     .entry(hash, |s: &String| s == "hello")
    ///     .or_insert("hello".to_string());
    /// assert_eq!(table.len(), 1);
    /// ```
    #[inline]
    pub fn entry(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Entry<'_, V> {
        infallible(self.entry_impl(hash, eq, Fallibility::Infallible))
    }

    /// Fallible version of [`entry`](Self::entry): if growing the table
    /// fails the error is returned and the table is unchanged.
    #[inline]
    pub fn try_entry(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
    ) -> Result<Entry<'_, V>, TryReserveError> {
        self.entry_impl(hash, eq, Fallibility::Fallible)
    }

    #[inline]
    fn entry_impl(
        &mut self,
        hash: u64,
        eq: impl Fn(&V) -> bool,
        fallibility: Fallibility,
    ) -> Result<Entry<'_, V>, TryReserveError> {
        self.maybe_grow(fallibility)?;

        let slots = &self.slots;
        let probe = self.index.probe(
            hash,
            |slot| eq(&slots[slot].value),
            |slot| slots[slot].hash,
        );

        Ok(match probe {
            Probe::Found(bucket) => Entry::Occupied(OccupiedEntry {
                table: self,
                bucket,
            }),
            Probe::Vacant(placement) => Entry::Vacant(VacantEntry {
                table: self,
                hash,
                placement,
            }),
        })
    }

    /// Inserts `value` without checking whether an equal value is already
    /// present, returning its slot position.
    ///
    /// Inserting a duplicate is not undefined behaviour, but which of the
    /// duplicates lookups find is unspecified.
    pub fn insert_unique(&mut self, hash: u64, value: V) -> usize {
        infallible(self.maybe_grow(Fallibility::Infallible));

        let position = self.slots.len();
        let slots = &self.slots;
        self.index
            .place_unique(hash, position, |slot| slots[slot].hash);
        self.slots.push(Slot { hash, value });
        position
    }

    /// Removes and returns the value matching `eq`.
    ///
    /// The last value in slot order is moved into the freed position.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table = HashTable::new();
    /// table.insert_unique(10, "ten");
    /// table.insert_unique(20, "twenty");
    ///
    /// assert_eq!(table.remove(10, |v| *v == "ten"), Some("ten"));
    /// assert_eq!(table.remove(10, |v| *v == "ten"), None);
    /// assert_eq!(table.get_index(0), Some(&"twenty"));
    /// ```
    pub fn remove(&mut self, hash: u64, eq: impl Fn(&V) -> bool) -> Option<V> {
        let bucket = self.find_bucket(hash, eq)?;
        Some(self.remove_bucket(bucket))
    }

    /// Removes and returns the value at slot position `index`.
    pub fn remove_index(&mut self, index: usize) -> Option<V> {
        let hash = self.slots.get(index)?.hash;
        let bucket = self.index.find_slot(hash, index);
        Some(self.remove_bucket(bucket))
    }

    fn remove_bucket(&mut self, bucket: usize) -> V {
        let slot = self.index.slot_of(bucket);
        let root = self.index.home(self.slots[slot].hash);
        self.index.unlink(bucket, root);

        let last = self.slots.len() - 1;
        if slot != last {
            let moved = self.index.find_slot(self.slots[last].hash, last);
            self.index.repoint(moved, slot);
        }
        self.slots.swap_remove(slot).value
    }

    /// Keeps only the values for which `f` returns `true`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table = HashTable::new();
    /// for n in 0..10u64 {
    ///     table.insert_unique(n, n);
    /// }
    /// table.retain(|n| *n % 3 == 0);
    /// assert_eq!(table.len(), 4);
    /// ```
    pub fn retain(&mut self, mut f: impl FnMut(&mut V) -> bool) {
        let mut position = 0;
        while position < self.slots.len() {
            if f(&mut self.slots[position].value) {
                position += 1;
            } else {
                self.remove_index(position);
            }
        }
    }

    /// Removes and yields the values for which `f` returns `true`.
    ///
    /// Values are only removed as the iterator is advanced; dropping it early
    /// leaves the remaining values in place.
    pub fn extract_if<F>(&mut self, f: F) -> ExtractIf<'_, V, F>
    where
        F: FnMut(&mut V) -> bool,
    {
        ExtractIf {
            table: self,
            position: 0,
            pred: f,
        }
    }

    /// Returns a cursor positioned on the first slot, for visiting values in
    /// slot order while removing some of them.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table = HashTable::new();
    /// for n in 0..6u64 {
    ///     table.insert_unique(n, n);
    /// }
    ///
    /// let mut cursor = table.cursor_mut();
    /// while let Some(&n) = cursor.get() {
    ///     if n % 2 == 0 {
    ///         cursor.remove();
    ///     } else {
    ///         cursor.move_next();
    ///     }
    /// }
    /// assert_eq!(table.len(), 3);
    /// ```
    pub fn cursor_mut(&mut self) -> CursorMut<'_, V> {
        CursorMut {
            table: self,
            position: 0,
        }
    }

    /// Counts, for every entry, how many chain links separate it from its
    /// home bucket.
    #[cfg(any(test, feature = "stats"))]
    pub fn chain_histogram(&self) -> ChainHistogram {
        let mut bins = alloc::vec![0usize; ChainHistogram::BINS];
        self.for_each_chain(|_, _, hops| {
            bins[hops.min(ChainHistogram::BINS - 1)] += 1;
        });
        ChainHistogram { bins }
    }

    /// Returns occupancy and chain-length statistics.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let mut chains = 0;
        let mut displaced = 0;
        let mut longest_chain = 0;
        self.for_each_chain(|root, bucket, hops| {
            if hops == 0 {
                chains += 1;
            }
            if bucket != root {
                displaced += 1;
            }
            longest_chain = longest_chain.max(hops + 1);
        });

        let slot_bytes = core::mem::size_of::<Slot<V>>();
        DebugStats {
            populated: self.len(),
            capacity: self.growth_limit,
            bucket_count: self.bucket_count(),
            chains,
            displaced,
            longest_chain,
            average_chain: if chains == 0 {
                0.0
            } else {
                self.len() as f64 / chains as f64
            },
            load_factor: self.load_factor() as f64,
            total_bytes: self.index.allocated_bytes() + self.slots.capacity() * slot_bytes,
            wasted_bytes: (self.slots.capacity() - self.slots.len()) * slot_bytes,
        }
    }

    /// Visit every entry as `(root, bucket, hops)`.
    #[cfg(any(test, feature = "stats"))]
    fn for_each_chain(&self, mut visit: impl FnMut(usize, usize, usize)) {
        for bucket in 0..self.bucket_count() {
            let entry = self.index.entry(bucket);
            if entry.is_empty() {
                continue;
            }
            let slot = &self.slots[entry.slot.index()];
            if self.index.home(slot.hash) == bucket {
                self.index
                    .walk_chain(bucket, |member, hops| visit(bucket, member, hops));
            }
        }
    }
}

impl<V> IntoIterator for HashTable<V> {
    type IntoIter = IntoIter<V>;
    type Item = V;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            inner: self.slots.into_iter(),
        }
    }
}

impl<'a, V> IntoIterator for &'a HashTable<V> {
    type IntoIter = Iter<'a, V>;
    type Item = &'a V;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, V> IntoIterator for &'a mut HashTable<V> {
    type IntoIter = IterMut<'a, V>;
    type Item = &'a mut V;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// A view into a single entry in the hash table, which may be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashTable`].
///
/// [`entry`]: HashTable::entry
///
/// # Examples
///
/// ```rust
/// # use core::hash::Hash;
/// # use core::hash::Hasher;
/// #
/// # use chain_hash::hash_table::Entry;
/// # use chain_hash::hash_table::HashTable;
/// # use siphasher::sip::SipHasher;
/// #
/// # fn hash_str(s: &str) -> u64 {
/// #     let mut hasher = SipHasher::new();
/// #     s.hash(&mut hasher);
/// #     hasher.finish()
/// # }
///
/// let mut table = HashTable::with_capacity(10);
/// let hash = hash_str("key");
///
/// match table.entry(hash, |s: &String| s == "key") {
///     Entry::Vacant(entry) => {
///         entry.insert("value".to_string());
///     }
///     Entry::Occupied(entry) => {
///         println!("Key already exists with value: {}", entry.get());
///     }
/// }
/// ```
pub enum Entry<'a, V> {
    /// A vacant entry - the key is not present in the table
    Vacant(VacantEntry<'a, V>),
    /// An occupied entry - the key is present in the table
    Occupied(OccupiedEntry<'a, V>),
}

impl<'a, V> Entry<'a, V> {
    /// Inserts `default` if the entry is vacant and returns a mutable
    /// reference to the value in the entry.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table = HashTable::new();
    /// *table.entry(5, |n: &(u32, u32)| n.0 == 5).or_insert((5, 0)) = (5, 1);
    /// assert_eq!(table.entry(5, |n| n.0 == 5).or_insert((5, 9)), &(5, 1));
    /// ```
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts a value computed from a closure if the entry is vacant and
    /// returns a mutable reference.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::Hash;
    /// # use core::hash::Hasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use chain_hash::hash_table::HashTable;
    /// #
    /// # fn hash_str(s: &str) -> u64 {
    /// #     let mut hasher = SipHasher::new();
    /// #     s.hash(&mut hasher);
    /// #     hasher.finish()
    /// # }
    /// #
    /// let mut table = HashTable::with_capacity(10);
    /// let hash = hash_str("key");
    ///
    /// let value = table
    ///     .entry(hash, |s: &String| s == "key")
    ///     .or_insert_with(|| "key".to_string());
    /// assert_eq!(value, "key");
    ///
    /// // The closure is not called for an occupied entry
    /// let existing = table
    ///     .entry(hash, |s: &String| s == "key")
    ///     .or_insert_with(|| panic!("Should not be called"));
    /// assert_eq!(existing, "key");
    /// ```
    pub fn or_insert_with(self, default: impl FnOnce() -> V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Applies `f` to an occupied entry's value and returns a reference to
    /// it. Returns `None` for a vacant entry without inserting anything.
    pub fn and_modify(self, f: impl FnOnce(&mut V)) -> Option<&'a mut V> {
        match self {
            Entry::Occupied(entry) => {
                let value = entry.into_mut();
                f(value);
                Some(value)
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Inserts `V::default()` if the entry is vacant and returns a mutable
    /// reference to the value in the entry.
    pub fn or_default(self) -> &'a mut V
    where
        V: Default,
    {
        self.or_insert_with(V::default)
    }

    /// Slot position of the entry. For a vacant entry this is the position
    /// the value will take when inserted.
    pub fn index(&self) -> usize {
        match self {
            Entry::Occupied(entry) => entry.index(),
            Entry::Vacant(entry) => entry.index(),
        }
    }
}

/// A view into a vacant entry in a [`HashTable`].
///
/// Creating one does not modify the table; the chain is only rewired when a
/// value is inserted.
pub struct VacantEntry<'a, V> {
    table: &'a mut HashTable<V>,
    hash: u64,
    placement: Placement,
}

impl<'a, V> VacantEntry<'a, V> {
    /// Inserts a value into the vacant entry and returns a mutable reference
    /// to it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::Entry;
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table = HashTable::with_capacity(10);
    ///
    /// match table.entry(42, |s: &String| s == "key") {
    ///     Entry::Vacant(entry) => {
    ///         let value_ref = entry.insert("key".to_string());
    ///         assert_eq!(value_ref, "key");
    ///     }
    ///     Entry::Occupied(_) => unreachable!("Entry should be vacant"),
    /// }
    /// ```
    pub fn insert(self, value: V) -> &'a mut V {
        let table = self.table;
        let position = table.slots.len();
        table
            .index
            .place(self.placement, SlotRef::new(position, self.hash));
        table.slots.push(Slot {
            hash: self.hash,
            value,
        });
        &mut table.slots[position].value
    }

    /// Slot position the value will take when inserted.
    pub fn index(&self) -> usize {
        self.table.slots.len()
    }
}

/// A view into an occupied entry in a [`HashTable`].
pub struct OccupiedEntry<'a, V> {
    table: &'a mut HashTable<V>,
    bucket: usize,
}

impl<'a, V> OccupiedEntry<'a, V> {
    /// Gets a reference to the value in the entry.
    pub fn get(&self) -> &V {
        &self.table.slots[self.index()].value
    }

    /// Gets a mutable reference to the value in the entry.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::hash_table::Entry;
    /// # use chain_hash::hash_table::HashTable;
    /// let mut table = HashTable::new();
    /// table.insert_unique(1, (1, 10));
    ///
    /// if let Entry::Occupied(mut entry) = table.entry(1, |v| v.0 == 1) {
    ///     entry.get_mut().1 += 5;
    /// }
    /// assert_eq!(table.find(1, |v| v.0 == 1), Some(&(1, 15)));
    /// ```
    pub fn get_mut(&mut self) -> &mut V {
        let slot = self.index();
        &mut self.table.slots[slot].value
    }

    /// Converts the entry into a mutable reference tied to the table's
    /// lifetime.
    pub fn into_mut(self) -> &'a mut V {
        let slot = self.index();
        let table = self.table;
        &mut table.slots[slot].value
    }

    /// Removes the value from the table and returns it.
    pub fn remove(self) -> V {
        self.table.remove_bucket(self.bucket)
    }

    /// Slot position of the value.
    pub fn index(&self) -> usize {
        self.table.index.slot_of(self.bucket)
    }
}

/// An iterator over the values of a [`HashTable`] in slot order.
///
/// This struct is created by the [`iter`] method on [`HashTable`].
///
/// [`iter`]: HashTable::iter
pub struct Iter<'a, V> {
    inner: core::slice::Iter<'a, Slot<V>>,
}

impl<V> Clone for Iter<'_, V> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| &slot.value)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for Iter<'_, V> {}
impl<V> FusedIterator for Iter<'_, V> {}

/// A mutable iterator over the values of a [`HashTable`].
pub struct IterMut<'a, V> {
    inner: core::slice::IterMut<'a, Slot<V>>,
}

impl<'a, V> Iterator for IterMut<'a, V> {
    type Item = &'a mut V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| &mut slot.value)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for IterMut<'_, V> {}
impl<V> FusedIterator for IterMut<'_, V> {}

/// An owning iterator over the values of a [`HashTable`].
pub struct IntoIter<V> {
    inner: alloc::vec::IntoIter<Slot<V>>,
}

impl<V> Iterator for IntoIter<V> {
    type Item = V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| slot.value)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for IntoIter<V> {}
impl<V> FusedIterator for IntoIter<V> {}

/// A draining iterator over the values in a [`HashTable`].
///
/// This struct is created by the [`drain`] method on [`HashTable`].
///
/// [`drain`]: HashTable::drain
pub struct Drain<'a, V> {
    inner: alloc::vec::Drain<'a, Slot<V>>,
}

impl<V> Iterator for Drain<'_, V> {
    type Item = V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|slot| slot.value)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<V> ExactSizeIterator for Drain<'_, V> {}
impl<V> FusedIterator for Drain<'_, V> {}

/// An iterator which removes and yields the values matching a predicate.
///
/// This struct is created by the [`extract_if`] method on [`HashTable`].
///
/// [`extract_if`]: HashTable::extract_if
pub struct ExtractIf<'a, V, F> {
    table: &'a mut HashTable<V>,
    position: usize,
    pred: F,
}

impl<V, F> Iterator for ExtractIf<'_, V, F>
where
    F: FnMut(&mut V) -> bool,
{
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        while self.position < self.table.len() {
            if (self.pred)(&mut self.table.slots[self.position].value) {
                // The last value moves into `position` and is examined next.
                return self.table.remove_index(self.position);
            }
            self.position += 1;
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.table.len() - self.position))
    }
}

impl<V, F> FusedIterator for ExtractIf<'_, V, F> where F: FnMut(&mut V) -> bool {}

/// A cursor over the slots of a [`HashTable`] that can remove the value it
/// points at.
///
/// Removing moves the last value into the cursor's position, so the cursor
/// stays where it is and next sees a value it has not visited yet.
pub struct CursorMut<'a, V> {
    table: &'a mut HashTable<V>,
    position: usize,
}

impl<V> CursorMut<'_, V> {
    /// Slot position the cursor points at. Equal to the table's length once
    /// every value has been visited.
    pub fn index(&self) -> usize {
        self.position
    }

    /// The value under the cursor, or `None` past the end.
    pub fn get(&self) -> Option<&V> {
        self.table.get_index(self.position)
    }

    /// Mutable version of [`get`](Self::get).
    pub fn get_mut(&mut self) -> Option<&mut V> {
        self.table.get_index_mut(self.position)
    }

    /// Advance to the next slot. Does nothing past the end.
    pub fn move_next(&mut self) {
        if self.position < self.table.len() {
            self.position += 1;
        }
    }

    /// Remove and return the value under the cursor.
    pub fn remove(&mut self) -> Option<V> {
        self.table.remove_index(self.position)
    }
}

#[cfg(test)]
impl<V> HashTable<V> {
    /// Panics unless every structural invariant of the table holds.
    pub(crate) fn assert_invariants(&self) {
        let buckets = self.bucket_count();
        assert!(buckets == 0 || buckets.is_power_of_two());
        assert!(buckets <= MAX_BUCKETS);
        assert!(self.len() <= self.growth_limit);
        assert_eq!(
            self.growth_limit,
            growth_limit(buckets, self.max_load_factor)
        );
        if buckets == 0 {
            assert!(self.slots.is_empty());
            return;
        }
        assert!(self.growth_limit < buckets);
        assert!(self.index.padding_sealed());

        let mut referenced = alloc::vec![false; self.len()];
        let mut occupied = 0;
        for bucket in 0..buckets {
            let entry = self.index.entry(bucket);
            assert_eq!(self.index.is_marked(bucket), !entry.is_empty(), "bitmap {bucket}");
            if entry.is_empty() {
                continue;
            }
            occupied += 1;

            let slot = entry.slot.index();
            assert!(slot < self.len(), "bucket {bucket} points past the slots");
            assert!(!referenced[slot], "slot {slot} referenced twice");
            referenced[slot] = true;

            let hash = self.slots[slot].hash;
            assert_eq!(entry.slot.tag, crate::index_table::hashtag(hash));

            let home = self.index.home(hash);
            assert!(
                !self.index.entry(home).is_empty(),
                "home {home} of bucket {bucket} is empty"
            );
            let head = self.index.slot_of(home);
            assert_eq!(
                self.index.home(self.slots[head].hash),
                home,
                "home {home} is borrowed by a foreign chain"
            );
            assert_eq!(self.index.find_slot(hash, slot), bucket);

            if home == bucket {
                let mut length = 0;
                self.index.walk_chain(bucket, |member, _| {
                    length += 1;
                    assert!(length <= self.len(), "chain at {bucket} cycles");
                    let member_slot = self.index.slot_of(member);
                    assert_eq!(self.index.home(self.slots[member_slot].hash), bucket);
                });
            }
        }

        assert_eq!(occupied, self.len());
        assert!(referenced.iter().all(|seen| *seen));
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec;
    use core::hash::Hasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::TryReserveError;

    struct HashState {
        k0: u64,
        k1: u64,
    }

    impl HashState {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k0: rng.try_next_u64().unwrap(),
                k1: rng.try_next_u64().unwrap(),
            }
        }

        fn build_hasher(&self) -> SipHasher {
            SipHasher::new_with_keys(self.k0, self.k1)
        }
    }

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct Item {
        key: u64,
        value: i32,
    }

    #[derive(Debug, PartialEq, Eq, Clone)]
    struct StringItem {
        key: String,
        value: i32,
    }

    fn hash_key(state: &HashState, key: u64) -> u64 {
        let mut h = state.build_hasher();
        h.write_u64(key);
        h.finish()
    }

    fn hash_string_key(state: &HashState, key: &str) -> u64 {
        let mut h = state.build_hasher();
        h.write(key.as_bytes());
        h.finish()
    }

    fn insert_item(table: &mut HashTable<Item>, hash: u64, key: u64, value: i32) {
        match table.entry(hash, |v| v.key == key) {
            Entry::Vacant(v) => {
                v.insert(Item { key, value });
            }
            Entry::Occupied(_) => panic!("{key} already present: {table:#?}"),
        }
    }

    #[test]
    fn insert_and_find() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..32u64 {
            let hash = hash_key(&state, k);
            match table.entry(hash, |v: &Item| v.key == k) {
                Entry::Vacant(v) => {
                    v.insert(Item {
                        key: k,
                        value: (k as i32) * 2,
                    });
                    assert_eq!(
                        table.find(hash, |v| v.key == k),
                        Some(&Item {
                            key: k,
                            value: (k as i32) * 2
                        }),
                        "{:#?}",
                        table
                    );
                }
                Entry::Occupied(_) => panic!("unexpected occupied on first insert: {:#?}", table),
            }
        }
        assert_eq!(table.len(), 32);
        table.assert_invariants();

        for k in 0..32u64 {
            let hash = hash_key(&state, k);
            assert_eq!(
                table.find(hash, |v| v.key == k),
                Some(&Item {
                    key: k,
                    value: (k as i32) * 2
                }),
                "{:#?}",
                table
            );
        }

        let miss_hash = hash_key(&state, 999);
        assert!(table.find(miss_hash, |v| v.key == 999).is_none());
    }

    #[test]
    fn duplicate_entry_is_occupied() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        let k = 42u64;
        let hash = hash_key(&state, k);

        insert_item(&mut table, hash, k, 7);

        match table.entry(hash, |v| v.key == k) {
            Entry::Occupied(mut occ) => {
                let prev_value = occ.get().value;
                *occ.get_mut() = Item { key: k, value: 11 };
                assert_eq!(prev_value, 7, "{:#?}", table);
            }
            Entry::Vacant(_) => panic!("should be occupied: {}#{:02X} in {:#?}", k, hash, table),
        }
        let found = table.find(hash, |v| v.key == k).unwrap();
        assert_eq!(found.value, 11);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_mut_and_modify() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..5u64 {
            insert_item(&mut table, hash_key(&state, k), k, 1);
        }

        for k in 0..5u64 {
            let hash = hash_key(&state, k);
            if let Some(v) = table.find_mut(hash, |v| v.key == k) {
                v.value += 9;
            }
        }
        for k in 0..5u64 {
            let hash = hash_key(&state, k);
            let v = table.find(hash, |v| v.key == k).unwrap();
            assert_eq!(v.value, 10);
        }
    }

    #[test]
    fn remove_items() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..8u64 {
            insert_item(&mut table, hash_key(&state, k), k, k as i32);
        }
        assert_eq!(table.len(), 8);
        for k in [0u64, 3, 7] {
            let hash = hash_key(&state, k);
            let removed = table.remove(hash, |v| v.key == k).expect("should remove");
            assert_eq!(removed.key, k);
            table.assert_invariants();
        }
        assert_eq!(table.len(), 5);

        let hash = hash_key(&state, 1000);
        assert!(table.remove(hash, |v| v.key == 1000).is_none());

        for k in [1u64, 2, 4, 5, 6] {
            assert!(table.find(hash_key(&state, k), |v| v.key == k).is_some());
        }
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn insert_many() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(0);
        for k in 0..100000u64 {
            insert_item(&mut table, hash_key(&state, k), k, k as i32);
        }
        assert_eq!(table.len(), 100000);
        assert!(table.bucket_count().is_power_of_two());
        assert!(table.load_factor() <= table.max_load_factor());
        table.assert_invariants();

        for k in (0..100000u64).step_by(7) {
            let hash = hash_key(&state, k);
            assert_eq!(table.find(hash, |v| v.key == k).unwrap().value, k as i32);
        }
    }

    #[test]
    fn colliding_hashes_share_a_chain() {
        let mut table: HashTable<Item> = HashTable::with_capacity(16);

        // Same home bucket, distinct tags.
        for k in 0..10u64 {
            insert_item(&mut table, (k << 32) | 3, k, k as i32);
            table.assert_invariants();
        }
        let stats = table.debug_stats();
        assert_eq!(stats.chains, 1);
        assert_eq!(stats.longest_chain, 10);
        assert_eq!(stats.displaced, 9);

        for k in 0..10u64 {
            assert_eq!(table.find((k << 32) | 3, |v| v.key == k).unwrap().value, k as i32);
        }
    }

    #[test]
    fn identical_hashes_rely_on_equality() {
        let mut table: HashTable<Item> = HashTable::with_capacity(16);
        for k in 0..12u64 {
            insert_item(&mut table, 0, k, k as i32);
        }
        table.assert_invariants();

        for k in 0..12u64 {
            assert_eq!(table.find(0, |v| v.key == k).unwrap().value, k as i32);
        }
        for k in (0..12u64).rev() {
            assert_eq!(table.remove(0, |v| v.key == k).unwrap().key, k);
            table.assert_invariants();
        }
        assert!(table.is_empty());
    }

    #[test]
    fn kick_out_keeps_home_invariant() {
        let mut table: HashTable<Item> = HashTable::with_capacity(12);
        assert_eq!(table.bucket_count(), 16);

        // A chain homed at 5 spills into 6 and 7.
        for k in 0..3u64 {
            insert_item(&mut table, ((k + 1) << 32) | 5, k, 0);
        }
        // Keys homed at 6 and 7 evict the borrowed buckets.
        insert_item(&mut table, (10 << 32) | 6, 10, 0);
        insert_item(&mut table, (11 << 32) | 7, 11, 0);
        table.assert_invariants();

        for (k, hash) in [
            (0, (1 << 32) | 5),
            (1, (2 << 32) | 5),
            (2, (3 << 32) | 5),
            (10, (10 << 32) | 6),
            (11, (11 << 32) | 7),
        ] {
            assert!(table.find(hash, |v| v.key == k).is_some(), "{k} missing: {table:#?}");
        }
    }

    #[test]
    fn vacant_entry_dropped_leaves_no_trace() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(8);
        for k in 0..4u64 {
            insert_item(&mut table, hash_key(&state, k), k, 0);
        }
        let before = alloc::format!("{table:?}");

        // Probing a missing key must not rewire any chain.
        let hash = hash_key(&state, 77);
        match table.entry(hash, |v| v.key == 77) {
            Entry::Vacant(v) => drop(v),
            Entry::Occupied(_) => unreachable!(),
        }

        assert_eq!(alloc::format!("{table:?}"), before);
        table.assert_invariants();
    }

    #[test]
    fn removal_compacts_slots() {
        let mut table: HashTable<u64> = HashTable::new();
        for n in 0..5u64 {
            assert_eq!(table.insert_unique(n, n), n as usize);
        }

        assert_eq!(table.remove(1, |v| *v == 1), Some(1));
        assert_eq!(table.iter().copied().collect::<Vec<_>>(), [0, 4, 2, 3]);
        assert_eq!(table.find_index(4, |v| *v == 4), Some(1));
        table.assert_invariants();

        assert_eq!(table.remove_index(3), Some(3));
        assert_eq!(table.remove_index(3), None);
        table.assert_invariants();
    }

    #[test]
    fn growth_doubles_at_capacity() {
        let mut table: HashTable<u64> = HashTable::with_capacity(3);
        assert_eq!(table.bucket_count(), 4);
        assert_eq!(table.capacity(), 3);

        for n in 0..3 {
            table.insert_unique(n, n);
        }
        assert_eq!(table.bucket_count(), 4);

        table.insert_unique(3, 3);
        assert_eq!(table.bucket_count(), 8);
        assert_eq!(table.capacity(), 6);
        table.assert_invariants();
    }

    #[test]
    fn capacity_zero_does_not_allocate() {
        let table: HashTable<Item> = HashTable::with_capacity(0);
        assert_eq!(table.bucket_count(), 0);
        assert_eq!(table.load_factor(), 0.0);
        assert!(table.find(0, |_| true).is_none());
        table.assert_invariants();
    }

    #[test]
    fn try_reserve_failure_leaves_table_unchanged() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(10);
        for k in 0..10u64 {
            insert_item(&mut table, hash_key(&state, k), k, 0);
        }
        let buckets = table.bucket_count();

        assert_eq!(
            table.try_reserve(usize::MAX),
            Err(TryReserveError::CapacityOverflow)
        );
        assert_eq!(
            table.try_reserve(MAX_BUCKETS),
            Err(TryReserveError::CapacityOverflow)
        );
        assert_eq!(table.bucket_count(), buckets);
        assert_eq!(table.len(), 10);
        table.assert_invariants();
    }

    #[test]
    fn rehash_to_requested_buckets() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..50u64 {
            insert_item(&mut table, hash_key(&state, k), k, k as i32);
        }

        for requested in [1000usize, 300, 64, 1, 0, 4096] {
            table.rehash(requested);
            assert!(table.bucket_count() >= requested);
            assert!(table.bucket_count().is_power_of_two());
            assert!(table.len() <= table.capacity());
            table.assert_invariants();
            for k in 0..50u64 {
                let found = table.find(hash_key(&state, k), |v| v.key == k);
                assert_eq!(found.map(|v| v.value), Some(k as i32));
            }
        }
        assert_eq!(table.bucket_count(), 4096);

        table.rehash(0);
        assert_eq!(table.bucket_count(), 64);
        table.assert_invariants();
    }

    #[test]
    fn try_rehash_overflow_leaves_table_unchanged() {
        let mut table: HashTable<u64> = HashTable::new();
        table.insert_unique(1, 1);
        let buckets = table.bucket_count();

        assert_eq!(
            table.try_rehash(MAX_BUCKETS + 1),
            Err(TryReserveError::CapacityOverflow)
        );
        assert_eq!(
            table.try_rehash(usize::MAX),
            Err(TryReserveError::CapacityOverflow)
        );
        assert_eq!(table.bucket_count(), buckets);
        table.assert_invariants();

        let mut empty: HashTable<u64> = HashTable::with_capacity(100);
        empty.rehash(0);
        assert_eq!(empty.bucket_count(), 0);
        assert_eq!(empty.capacity(), 0);
        empty.assert_invariants();
    }

    #[test]
    fn try_entry_grows() {
        let mut table: HashTable<u64> = HashTable::new();
        for n in 0..100u64 {
            match table.try_entry(n, |v| *v == n).unwrap() {
                Entry::Vacant(v) => {
                    v.insert(n);
                }
                Entry::Occupied(_) => unreachable!(),
            }
        }
        assert_eq!(table.len(), 100);
        table.assert_invariants();
    }

    #[test]
    fn load_factor_controls() {
        let mut table: HashTable<u64> = HashTable::with_capacity(100);
        assert_eq!(table.max_load_factor(), DEFAULT_MAX_LOAD_FACTOR);
        for n in 0..100u64 {
            table.insert_unique(n.wrapping_mul(0x9E37_79B9_7F4A_7C15), n);
        }

        table.set_max_load_factor(0.25);
        assert_eq!(table.max_load_factor(), 0.25);
        assert!(table.load_factor() <= 0.25);
        table.assert_invariants();

        table.set_max_load_factor(0.01);
        assert_eq!(table.max_load_factor(), MIN_LOAD_FACTOR);

        table.set_max_load_factor(f32::NAN);
        assert_eq!(table.max_load_factor(), MIN_LOAD_FACTOR);
        table.assert_invariants();
    }

    #[test]
    fn raising_max_load_factor_reserves_slots() {
        let mut table: HashTable<u64> = HashTable::with_capacity(6);
        for n in 0..6u64 {
            table.insert_unique(n, n);
        }
        assert_eq!(table.bucket_count(), 8);

        table.set_max_load_factor(0.999);
        assert_eq!(table.bucket_count(), 8);
        assert_eq!(table.capacity(), 7);
        assert!(table.slots.capacity() >= 7);

        table.insert_unique(6, 6);
        assert_eq!(table.bucket_count(), 8);
        table.assert_invariants();
    }

    #[test]
    fn shrink_to_fit_releases() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(1000);
        for k in 0..10u64 {
            insert_item(&mut table, hash_key(&state, k), k, 0);
        }
        table.shrink_to_fit();
        assert_eq!(table.bucket_count(), 16);
        table.assert_invariants();
        for k in 0..10u64 {
            assert!(table.find(hash_key(&state, k), |v| v.key == k).is_some());
        }

        table.clear();
        table.shrink_to_fit();
        assert_eq!(table.bucket_count(), 0);
        assert_eq!(table.capacity(), 0);
        table.assert_invariants();

        insert_item(&mut table, hash_key(&state, 1), 1, 1);
        assert_eq!(table.bucket_count(), MIN_BUCKETS);
    }

    #[test]
    fn retain_and_extract_if() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..50u64 {
            insert_item(&mut table, hash_key(&state, k), k, k as i32);
        }

        table.retain(|v| v.key % 2 == 0);
        assert_eq!(table.len(), 25);
        table.assert_invariants();

        let mut extracted: Vec<u64> = table.extract_if(|v| v.key % 10 == 0).map(|v| v.key).collect();
        extracted.sort_unstable();
        assert_eq!(extracted, [0, 10, 20, 30, 40]);
        assert_eq!(table.len(), 20);
        table.assert_invariants();

        for k in 0..50u64 {
            let present = table.find(hash_key(&state, k), |v| v.key == k).is_some();
            assert_eq!(present, k % 2 == 0 && k % 10 != 0);
        }
    }

    #[test]
    fn cursor_removal_visits_everything() {
        let mut table: HashTable<u64> = HashTable::new();
        for n in 0..20u64 {
            table.insert_unique(n * 31, n);
        }

        let mut seen = Vec::new();
        let mut cursor = table.cursor_mut();
        while let Some(&n) = cursor.get() {
            seen.push(n);
            if n % 3 == 0 {
                let position = cursor.index();
                assert_eq!(cursor.remove(), Some(n));
                assert_eq!(cursor.index(), position);
            } else {
                *cursor.get_mut().unwrap() += 100;
                cursor.move_next();
            }
        }
        cursor.move_next();
        assert_eq!(cursor.index(), 13);

        seen.sort_unstable();
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
        assert_eq!(table.len(), 13);
        assert!(table.iter().all(|n| *n >= 100));
        table.assert_invariants();
    }

    #[test]
    fn drain_and_into_iter() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..10u64 {
            insert_item(&mut table, hash_key(&state, k), k, 0);
        }
        let capacity = table.capacity();

        let mut keys: Vec<u64> = table.drain().map(|v| v.key).collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
        assert!(table.is_empty());
        assert_eq!(table.capacity(), capacity);
        table.assert_invariants();

        for k in 0..4u64 {
            insert_item(&mut table, hash_key(&state, k), k, 0);
        }
        {
            let mut drain = table.drain();
            drain.next();
        }
        assert!(table.is_empty());
        table.assert_invariants();

        for k in 0..4u64 {
            insert_item(&mut table, hash_key(&state, k), k, 0);
        }
        assert_eq!(table.into_iter().len(), 4);
    }

    #[test]
    fn iter_mut_updates_values() {
        let mut table: HashTable<Item> = HashTable::new();
        for k in 0..8u64 {
            insert_item(&mut table, k, k, 0);
        }
        for item in table.iter_mut() {
            item.value = item.key as i32 * 3;
        }
        for k in 0..8u64 {
            assert_eq!(table.find(k, |v| v.key == k).unwrap().value, k as i32 * 3);
        }
    }

    #[test]
    fn entry_helpers() {
        let mut table: HashTable<(u64, i32)> = HashTable::new();

        assert!(table.entry(1, |v| v.0 == 1).and_modify(|v| v.1 += 1).is_none());
        assert!(table.is_empty());

        let entry = table.entry(1, |v| v.0 == 1);
        assert_eq!(entry.index(), 0);
        entry.or_insert((1, 5));

        let value = table.entry(1, |v| v.0 == 1).and_modify(|v| v.1 += 1);
        assert_eq!(value, Some(&mut (1, 6)));

        let mut counts: HashTable<u32> = HashTable::new();
        *counts.entry(9, |_| true).or_default() += 2;
        assert_eq!(counts.find(9, |_| true), Some(&2));

        match table.entry(1, |v| v.0 == 1) {
            Entry::Occupied(entry) => assert_eq!(entry.remove(), (1, 6)),
            Entry::Vacant(_) => unreachable!(),
        }
        assert!(table.is_empty());
        table.assert_invariants();
    }

    #[test]
    fn test_clone() {
        let state = HashState::default();
        let mut original: HashTable<StringItem> = HashTable::with_capacity(10);

        let test_data = [
            ("hello", 1),
            ("world", 2),
            ("rust", 3),
            ("clone", 4),
            ("test", 5),
        ];

        for (key, value) in test_data.iter() {
            let hash = hash_string_key(&state, key);
            original
                .entry(hash, |v| v.key == *key)
                .or_insert(StringItem {
                    key: key.to_string(),
                    value: *value,
                });
        }

        let cloned = original.clone();
        cloned.assert_invariants();

        assert_eq!(original.len(), cloned.len());
        assert_eq!(cloned.len(), test_data.len());

        for (key, expected_value) in test_data.iter() {
            let hash = hash_string_key(&state, key);

            let original_item = original.find(hash, |v| v.key == *key).unwrap();
            assert_eq!(original_item.value, *expected_value);

            let cloned_item = cloned.find(hash, |v| v.key == *key).unwrap();
            assert_eq!(cloned_item.value, *expected_value);
            assert_eq!(cloned_item.key, *key);
        }

        let hash = hash_string_key(&state, "hello");
        if let Some(item) = original.find_mut(hash, |v| v.key == "hello") {
            item.value = 999;
        }

        let original_hello = original.find(hash, |v| v.key == "hello").unwrap();
        assert_eq!(original_hello.value, 999);

        let cloned_hello = cloned.find(hash, |v| v.key == "hello").unwrap();
        assert_eq!(cloned_hello.value, 1);
    }

    #[test]
    fn test_clone_empty_table() {
        let original: HashTable<Item> = HashTable::with_capacity(10);
        let cloned = original.clone();

        assert_eq!(original.len(), 0);
        assert_eq!(cloned.len(), 0);
        assert!(cloned.is_empty());
        assert_eq!(cloned.capacity(), original.capacity());
    }

    #[test]
    fn randomized_churn_keeps_invariants() {
        use rand::Rng;
        use rand::SeedableRng;
        use rand::rngs::SmallRng;

        let mut rng = SmallRng::seed_from_u64(0xC4A1_4A54);
        let mut table: HashTable<Item> = HashTable::new();
        let mut live = vec![false; 256];

        for round in 0..4000 {
            let key = rng.random_range(0..256u64);
            // A narrow hash range forces long chains and frequent kick-outs.
            let hash = (key << 32) | (key % 13);
            if rng.random_bool(0.6) {
                let inserted = match table.entry(hash, |v| v.key == key) {
                    Entry::Vacant(v) => {
                        v.insert(Item { key, value: round });
                        true
                    }
                    Entry::Occupied(_) => false,
                };
                assert_eq!(inserted, !live[key as usize]);
                live[key as usize] = true;
            } else {
                let removed = table.remove(hash, |v| v.key == key).is_some();
                assert_eq!(removed, live[key as usize]);
                live[key as usize] = false;
            }

            if round % 97 == 0 {
                table.assert_invariants();
            }
        }

        table.assert_invariants();
        assert_eq!(table.len(), live.iter().filter(|l| **l).count());
    }

    #[test]
    fn chain_histogram_counts_every_entry() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(1000);
        for k in 0..table.capacity() as u64 {
            insert_item(&mut table, hash_key(&state, k), k, 0);
        }

        let histogram = table.chain_histogram();
        assert_eq!(histogram.bins().len(), ChainHistogram::BINS);
        assert_eq!(histogram.total(), table.len());
        assert_eq!(histogram.bins()[0], table.debug_stats().chains);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    #[cfg(feature = "std")]
    fn histogram_output() {
        let state = HashState::default();
        let mut table: HashTable<Item> = HashTable::with_capacity(10000);
        for k in 0..table.capacity() as u64 {
            insert_item(&mut table, hash_key(&state, k), k, k as i32);
        }

        table.chain_histogram().print();
        table.debug_stats().print();
    }

    #[test]
    fn debug_output_mentions_len() {
        let empty: HashTable<u8> = HashTable::new();
        assert_eq!(alloc::format!("{empty:?}"), "HashTable { empty }");

        let mut table: HashTable<u8> = HashTable::new();
        table.insert_unique(1, 1);
        let rendered = alloc::format!("{table:?}");
        assert!(rendered.contains("len: 1"), "{rendered}");
    }
}
