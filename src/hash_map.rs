use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;
use core::ops::Index;

use crate::DefaultHashBuilder;
use crate::TryReserveError;
use crate::hash_table::Entry as TableEntry;
use crate::hash_table::HashTable;

/// A hash map backed by a chained [`HashTable`] of `(K, V)` pairs.
///
/// `HashMap<K, V, S>` stores key-value pairs where keys implement `Hash + Eq`
/// and uses a configurable hasher builder `S` to hash keys.
///
/// Entries are kept densely in slot order, so iteration touches only live
/// entries. Removing an entry moves the last entry into its slot, so the
/// iteration order is not insertion order once anything has been removed.
///
/// # Examples
///
/// ```rust
/// use chain_hash::HashMap;
///
/// let mut stock = HashMap::new();
/// stock.insert("apples", 3);
/// stock.insert("pears", 0);
///
/// // Never overwrites
/// let (_, inserted) = stock.try_emplace("apples", 10);
/// assert!(!inserted);
/// assert_eq!(stock["apples"], 3);
///
/// // Always overwrites
/// let (_, inserted) = stock.insert_or_assign("apples", 10);
/// assert!(!inserted);
/// assert_eq!(stock["apples"], 10);
///
/// assert_eq!(stock.erase("pears"), 1);
/// assert_eq!(stock.erase("pears"), 0);
/// ```
#[derive(Clone)]
pub struct HashMap<K, V, S = DefaultHashBuilder> {
    table: HashTable<(K, V)>,
    hash_builder: S,
}

impl<K, V, S> Debug for HashMap<K, V, S>
where
    K: Debug,
    V: Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V> HashMap<K, V, DefaultHashBuilder> {
    /// Creates an empty map using the default hasher builder. Nothing is
    /// allocated until the first insertion.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let map: HashMap<i32, String> = HashMap::new();
    /// assert!(map.is_empty());
    /// assert_eq!(map.bucket_count(), 0);
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }

    /// Creates a map that holds at least `capacity` entries without
    /// rehashing, using the default hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let map: HashMap<i32, String> = HashMap::with_capacity(100);
    /// assert!(map.capacity() >= 100);
    /// ```
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<K, V, S> HashMap<K, V, S> {
    /// Creates a new hash map with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use chain_hash::HashMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let map: HashMap<i32, String, _> = HashMap::with_hasher(SimpleHasher);
    /// assert!(map.is_empty());
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            table: HashTable::new(),
            hash_builder,
        }
    }

    /// Creates a new hash map with the specified capacity and hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// # use chain_hash::hash_policy::BuildIdentityHasher;
    /// let map: HashMap<u64, String, _> =
    ///     HashMap::with_capacity_and_hasher(100, BuildIdentityHasher::default());
    /// assert!(map.capacity() >= 100);
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            table: HashTable::with_capacity(capacity),
            hash_builder,
        }
    }

    /// Fallible version of
    /// [`with_capacity_and_hasher`](Self::with_capacity_and_hasher).
    pub fn try_with_capacity_and_hasher(
        capacity: usize,
        hash_builder: S,
    ) -> Result<Self, TryReserveError> {
        Ok(Self {
            table: HashTable::try_with_capacity(capacity)?,
            hash_builder,
        })
    }

    /// Returns the number of elements in the map.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the map contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of entries the map holds before it rehashes.
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Returns the number of buckets in the index.
    pub fn bucket_count(&self) -> usize {
        self.table.bucket_count()
    }

    /// Returns `len / bucket_count`, or zero for an unallocated map.
    pub fn load_factor(&self) -> f32 {
        self.table.load_factor()
    }

    /// Returns the load factor above which the map grows.
    pub fn max_load_factor(&self) -> f32 {
        self.table.max_load_factor()
    }

    /// Sets the load factor above which the map grows, clamped to
    /// `[0.2, 0.999]`. Rehashes immediately if the map is already fuller
    /// than that.
    pub fn set_max_load_factor(&mut self, max_load_factor: f32) {
        self.table.set_max_load_factor(max_load_factor);
    }

    /// Returns a reference to the map's hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }

    /// Removes all entries, keeping the allocation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut map = HashMap::new();
    /// map.insert(1, "a");
    /// map.clear();
    /// assert!(map.is_empty());
    /// assert!(map.capacity() > 0);
    /// ```
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Shrinks the index to the smallest size that holds the current entries.
    /// An empty map releases all of its storage.
    pub fn shrink_to_fit(&mut self) {
        self.table.shrink_to_fit();
    }

    /// Reserves room for at least `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        self.table.reserve(additional);
    }

    /// Fallible version of [`reserve`](Self::reserve). On error the map is
    /// unchanged.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.table.try_reserve(additional)
    }

    /// Rebuilds the index with at least `buckets` buckets, or as many as the
    /// current entries need if that is more. See [`HashTable::rehash`].
    pub fn rehash(&mut self, buckets: usize) {
        self.table.rehash(buckets);
    }

    /// Fallible version of [`rehash`](Self::rehash). On error the map is
    /// unchanged.
    pub fn try_rehash(&mut self, buckets: usize) -> Result<(), TryReserveError> {
        self.table.try_rehash(buckets)
    }

    /// Returns an iterator over the entries in slot order.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut map = HashMap::new();
    /// map.insert("a", 1);
    /// map.insert("b", 2);
    ///
    /// let mut pairs: Vec<_> = map.iter().collect();
    /// pairs.sort();
    /// assert_eq!(pairs, [(&"a", &1), (&"b", &2)]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Returns an iterator over the entries with mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            inner: self.table.iter_mut(),
        }
    }

    /// Returns an iterator over the keys.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    /// Returns an iterator over the values.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    /// Returns an iterator over mutable references to the values.
    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Consumes the map, yielding its keys.
    pub fn into_keys(self) -> IntoKeys<K, V> {
        IntoKeys {
            inner: self.into_iter(),
        }
    }

    /// Consumes the map, yielding its values.
    pub fn into_values(self) -> IntoValues<K, V> {
        IntoValues {
            inner: self.into_iter(),
        }
    }

    /// Removes every entry, yielding them as owned pairs. The allocation is
    /// kept.
    pub fn drain(&mut self) -> Drain<'_, K, V> {
        Drain {
            inner: self.table.drain(),
        }
    }

    /// Returns the entry stored at slot position `index`.
    ///
    /// Slot positions are dense (`0..len`) and stable until the next removal.
    pub fn get_index(&self, index: usize) -> Option<(&K, &V)> {
        self.table.get_index(index).map(|(k, v)| (k, v))
    }

    /// Returns the entry at slot position `index` with a mutable value.
    pub fn get_index_mut(&mut self, index: usize) -> Option<(&K, &mut V)> {
        self.table.get_index_mut(index).map(|(k, v)| (&*k, v))
    }

    /// Keeps only the entries for which `f` returns `true`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut map: HashMap<i32, i32> = (0..8).map(|x| (x, x * 10)).collect();
    /// map.retain(|&k, _| k % 2 == 0);
    /// assert_eq!(map.len(), 4);
    /// ```
    pub fn retain(&mut self, mut f: impl FnMut(&K, &mut V) -> bool) {
        self.table.retain(|(k, v)| f(k, v));
    }

    /// Removes and yields the entries for which `f` returns `true`.
    ///
    /// Entries are only removed as the iterator is advanced.
    pub fn extract_if<F>(&mut self, f: F) -> ExtractIf<'_, K, V, F>
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        ExtractIf {
            cursor: self.table.cursor_mut(),
            pred: f,
        }
    }

    /// Returns a cursor on the first slot that can remove the entry under it
    /// while iterating.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut map: HashMap<u32, u32> = (0..10).map(|x| (x, x)).collect();
    ///
    /// let mut cursor = map.cursor_mut();
    /// while let Some((_, &v)) = cursor.get() {
    ///     if v >= 5 {
    ///         cursor.remove();
    ///     } else {
    ///         cursor.move_next();
    ///     }
    /// }
    /// assert_eq!(map.len(), 5);
    /// ```
    pub fn cursor_mut(&mut self) -> CursorMut<'_, K, V> {
        CursorMut {
            inner: self.table.cursor_mut(),
        }
    }

    /// Returns chain-length statistics for the underlying table.
    #[cfg(feature = "stats")]
    pub fn debug_stats(&self) -> crate::hash_table::DebugStats {
        self.table.debug_stats()
    }

    /// Returns the chain-distance histogram of the underlying table.
    #[cfg(feature = "stats")]
    pub fn chain_histogram(&self) -> crate::hash_table::ChainHistogram {
        self.table.chain_histogram()
    }
}

impl<K, V, S> HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn find<Q>(&self, key: &Q) -> Option<&(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.table.is_empty() {
            return None;
        }
        let hash = self.hash_builder.hash_one(key);
        self.table.find(hash, |(k, _)| k.borrow() == key)
    }

    /// Inserts a key-value pair, returning the previous value if the key was
    /// present. The key itself is not updated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use core::hash::BuildHasher;
    /// # use siphasher::sip::SipHasher;
    /// #
    /// # use chain_hash::HashMap;
    /// #
    /// # struct SimpleHasher;
    /// # impl BuildHasher for SimpleHasher {
    /// #     type Hasher = SipHasher;
    /// #
    /// #     fn build_hasher(&self) -> Self::Hasher {
    /// #         SipHasher::new()
    /// #     }
    /// # }
    /// #
    /// let mut map = HashMap::with_hasher(SimpleHasher);
    /// assert_eq!(map.insert(37, "a"), None);
    /// assert_eq!(map.insert(37, "b"), Some("a"));
    /// assert_eq!(map.get(&37), Some(&"b"));
    /// ```
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let hash = self.hash_builder.hash_one(&key);
        match self.table.entry(hash, |(k, _)| k == &key) {
            TableEntry::Occupied(mut entry) => {
                let old_value = core::mem::replace(&mut entry.get_mut().1, value);
                Some(old_value)
            }
            TableEntry::Vacant(entry) => {
                entry.insert((key, value));
                None
            }
        }
    }

    /// Fallible version of [`insert`](Self::insert). If the map has to grow
    /// and cannot, the error is returned and the map is unchanged.
    pub fn try_insert(&mut self, key: K, value: V) -> Result<Option<V>, TryReserveError> {
        let hash = self.hash_builder.hash_one(&key);
        Ok(match self.table.try_entry(hash, |(k, _)| k == &key)? {
            TableEntry::Occupied(mut entry) => {
                Some(core::mem::replace(&mut entry.get_mut().1, value))
            }
            TableEntry::Vacant(entry) => {
                entry.insert((key, value));
                None
            }
        })
    }

    /// Inserts the pair only if `key` is absent. Returns the entry's slot
    /// position and whether an insertion happened; an existing value is left
    /// untouched and `value` is dropped.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut map = HashMap::new();
    /// let (slot, inserted) = map.try_emplace(1, "one");
    /// assert!(inserted);
    /// assert_eq!(map.get_index(slot), Some((&1, &"one")));
    ///
    /// assert_eq!(map.try_emplace(1, "uno"), (slot, false));
    /// assert_eq!(map[&1], "one");
    /// ```
    pub fn try_emplace(&mut self, key: K, value: V) -> (usize, bool) {
        let hash = self.hash_builder.hash_one(&key);
        match self.table.entry(hash, |(k, _)| k == &key) {
            TableEntry::Occupied(entry) => (entry.index(), false),
            TableEntry::Vacant(entry) => {
                let slot = entry.index();
                entry.insert((key, value));
                (slot, true)
            }
        }
    }

    /// Inserts the pair, overwriting the value of an existing entry. Returns
    /// the entry's slot position and whether the key was newly inserted.
    pub fn insert_or_assign(&mut self, key: K, value: V) -> (usize, bool) {
        let hash = self.hash_builder.hash_one(&key);
        match self.table.entry(hash, |(k, _)| k == &key) {
            TableEntry::Occupied(mut entry) => {
                entry.get_mut().1 = value;
                (entry.index(), false)
            }
            TableEntry::Vacant(entry) => {
                let slot = entry.index();
                entry.insert((key, value));
                (slot, true)
            }
        }
    }

    /// Returns the value for `key`, inserting `V::default()` first if the key
    /// is absent.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut words: HashMap<&str, usize> = HashMap::new();
    /// for word in "a b a c a".split(' ') {
    ///     *words.get_or_insert_default(word) += 1;
    /// }
    /// assert_eq!(words["a"], 3);
    /// ```
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.entry(key).or_default()
    }

    /// Returns a reference to the value corresponding to the key.
    ///
    /// The key may be any borrowed form of the map's key type, but `Hash` and
    /// `Eq` on the borrowed form must match those for the key type.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut map = HashMap::new();
    /// map.insert(String::from("one"), 1);
    /// assert_eq!(map.get("one"), Some(&1));
    /// assert_eq!(map.get("two"), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(|(_, v)| v)
    }

    /// Returns the stored key and value corresponding to `key`.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(|(k, v)| (k, v))
    }

    /// Returns a mutable reference to the value corresponding to the key.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.table.is_empty() {
            return None;
        }
        let hash = self.hash_builder.hash_one(key);
        self.table
            .find_mut(hash, |(k, _)| k.borrow() == key)
            .map(|(_, v)| v)
    }

    /// Returns `true` if the map contains a value for the specified key.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).is_some()
    }

    /// Removes a key from the map, returning its value if it was present.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove_entry(key).map(|(_, v)| v)
    }

    /// Removes a key from the map, returning the stored key and value.
    pub fn remove_entry<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.table.is_empty() {
            return None;
        }
        let hash = self.hash_builder.hash_one(key);
        self.table.remove(hash, |(k, _)| k.borrow() == key)
    }

    /// Removes a key from the map, returning how many entries were removed
    /// (0 or 1).
    pub fn erase<Q>(&mut self, key: &Q) -> usize
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        usize::from(self.remove_entry(key).is_some())
    }

    /// Gets the entry for `key` for in-place manipulation.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut letters = HashMap::new();
    /// for ch in "a short treatise on fungi".chars() {
    ///     letters.entry(ch).and_modify(|counter| *counter += 1).or_insert(1);
    /// }
    ///
    /// assert_eq!(letters[&'s'], 2);
    /// assert_eq!(letters[&'t'], 3);
    /// assert_eq!(letters.get(&'y'), None);
    /// ```
    pub fn entry(&mut self, key: K) -> Entry<'_, K, V> {
        let hash = self.hash_builder.hash_one(&key);
        match self.table.entry(hash, |(k, _)| k == &key) {
            TableEntry::Occupied(entry) => Entry::Occupied(OccupiedEntry { entry }),
            TableEntry::Vacant(entry) => Entry::Vacant(VacantEntry { entry, key }),
        }
    }

    /// Moves every entry of `other` whose key is absent from `self` into
    /// `self`. Entries whose key is already present stay in `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use chain_hash::HashMap;
    /// let mut a = HashMap::from([(1, "a1"), (2, "a2")]);
    /// let mut b = HashMap::from([(2, "b2"), (3, "b3")]);
    ///
    /// a.merge(&mut b);
    /// assert_eq!(a.len(), 3);
    /// assert_eq!(a[&2], "a2");
    /// assert_eq!(a[&3], "b3");
    /// assert_eq!(b.len(), 1);
    /// assert_eq!(b[&2], "b2");
    /// ```
    pub fn merge<S2>(&mut self, other: &mut HashMap<K, V, S2>) {
        let mut cursor = other.table.cursor_mut();
        while let Some((key, _)) = cursor.get() {
            let hash = self.hash_builder.hash_one(key);
            if self.table.find(hash, |(k, _)| k == key).is_some() {
                cursor.move_next();
                continue;
            }
            if let Some(pair) = cursor.remove() {
                self.table.insert_unique(hash, pair);
            }
        }
    }
}

impl<K, V, S> Default for HashMap<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> PartialEq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: PartialEq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(key, value)| other.get(key).is_some_and(|v| *value == *v))
    }
}

impl<K, V, S> Eq for HashMap<K, V, S>
where
    K: Hash + Eq,
    V: Eq,
    S: BuildHasher,
{
}

impl<K, Q, V, S> Index<&Q> for HashMap<K, V, S>
where
    K: Hash + Eq + Borrow<Q>,
    Q: Hash + Eq + ?Sized,
    S: BuildHasher,
{
    type Output = V;

    /// # Panics
    ///
    /// Panics if the key is not present.
    fn index(&self, key: &Q) -> &V {
        match self.get(key) {
            Some(value) => value,
            None => panic!("key not found in HashMap"),
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::default();
        map.extend(iter);
        map
    }
}

impl<K, V, S> Extend<(K, V)> for HashMap<K, V, S>
where
    K: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        let additional = if self.is_empty() {
            lower
        } else {
            lower.div_ceil(2)
        };
        self.reserve(additional);
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<'a, K, V, S> Extend<(&'a K, &'a V)> for HashMap<K, V, S>
where
    K: Hash + Eq + Copy,
    V: Copy,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = (&'a K, &'a V)>>(&mut self, iter: I) {
        self.extend(iter.into_iter().map(|(k, v)| (*k, *v)));
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for HashMap<K, V, DefaultHashBuilder>
where
    K: Hash + Eq,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V, S> IntoIterator for HashMap<K, V, S> {
    type IntoIter = IntoIter<K, V>;
    type Item = (K, V);

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            inner: self.table.into_iter(),
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a HashMap<K, V, S> {
    type IntoIter = Iter<'a, K, V>;
    type Item = (&'a K, &'a V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut HashMap<K, V, S> {
    type IntoIter = IterMut<'a, K, V>;
    type Item = (&'a K, &'a mut V);

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

/// A view into a single entry in the map, which may either be vacant or
/// occupied.
///
/// This enum is constructed from the [`entry`] method on [`HashMap`].
///
/// [`entry`]: HashMap::entry
pub enum Entry<'a, K, V> {
    /// A vacant entry.
    Vacant(VacantEntry<'a, K, V>),
    /// An occupied entry.
    Occupied(OccupiedEntry<'a, K, V>),
}

impl<'a, K, V> Entry<'a, K, V> {
    /// Inserts a default value if the entry is vacant and returns a mutable
    /// reference.
    pub fn or_insert(self, default: V) -> &'a mut V {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default),
        }
    }

    /// Inserts a value computed from a closure if the entry is vacant and
    /// returns a mutable reference.
    pub fn or_insert_with<F>(self, default: F) -> &'a mut V
    where
        F: FnOnce() -> V,
    {
        match self {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(default()),
        }
    }

    /// Provides in-place mutable access to an occupied entry before any
    /// potential inserts.
    pub fn and_modify<F>(self, f: F) -> Self
    where
        F: FnOnce(&mut V),
    {
        match self {
            Entry::Occupied(mut entry) => {
                f(entry.get_mut());
                Entry::Occupied(entry)
            }
            Entry::Vacant(entry) => Entry::Vacant(entry),
        }
    }

    /// Returns a reference to this entry's key.
    pub fn key(&self) -> &K {
        match self {
            Entry::Occupied(entry) => entry.key(),
            Entry::Vacant(entry) => entry.key(),
        }
    }

    /// Slot position of the entry, or the position it will take when a
    /// vacant entry is filled.
    pub fn index(&self) -> usize {
        match self {
            Entry::Occupied(entry) => entry.entry.index(),
            Entry::Vacant(entry) => entry.entry.index(),
        }
    }
}

impl<'a, K, V> Entry<'a, K, V>
where
    V: Default,
{
    /// Inserts the default value if the entry is vacant and returns a mutable
    /// reference.
    pub fn or_default(self) -> &'a mut V {
        self.or_insert_with(Default::default)
    }
}

/// A view into a vacant entry in the map.
pub struct VacantEntry<'a, K, V> {
    entry: crate::hash_table::VacantEntry<'a, (K, V)>,
    key: K,
}

impl<'a, K, V> VacantEntry<'a, K, V> {
    /// Gets a reference to the key that would be used when inserting a value.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Take ownership of the key.
    pub fn into_key(self) -> K {
        self.key
    }

    /// Inserts the value into the map and returns a mutable reference to it.
    pub fn insert(self, value: V) -> &'a mut V {
        &mut self.entry.insert((self.key, value)).1
    }
}

/// A view into an occupied entry in the map.
pub struct OccupiedEntry<'a, K, V> {
    entry: crate::hash_table::OccupiedEntry<'a, (K, V)>,
}

impl<'a, K, V> OccupiedEntry<'a, K, V> {
    /// Gets a reference to the key in the entry.
    pub fn key(&self) -> &K {
        &self.entry.get().0
    }

    /// Gets a reference to the value in the entry.
    pub fn get(&self) -> &V {
        &self.entry.get().1
    }

    /// Gets a mutable reference to the value in the entry.
    pub fn get_mut(&mut self) -> &mut V {
        &mut self.entry.get_mut().1
    }

    /// Converts the entry into a mutable reference to the value.
    pub fn into_mut(self) -> &'a mut V {
        &mut self.entry.into_mut().1
    }

    /// Inserts a value into the entry and returns the old value.
    pub fn insert(&mut self, value: V) -> V {
        core::mem::replace(&mut self.entry.get_mut().1, value)
    }

    /// Removes the entry from the map and returns the value.
    pub fn remove(self) -> V {
        self.entry.remove().1
    }

    /// Removes the entry from the map and returns the key and value.
    pub fn remove_entry(self) -> (K, V) {
        self.entry.remove()
    }
}

/// A cursor over the slots of a [`HashMap`] that can remove the entry under
/// it. Removal leaves the cursor in place; the slot then holds an entry not
/// yet visited.
///
/// This struct is created by the [`cursor_mut`] method on [`HashMap`].
///
/// [`cursor_mut`]: HashMap::cursor_mut
pub struct CursorMut<'a, K, V> {
    inner: crate::hash_table::CursorMut<'a, (K, V)>,
}

impl<K, V> CursorMut<'_, K, V> {
    /// Slot position of the cursor.
    pub fn index(&self) -> usize {
        self.inner.index()
    }

    /// The entry under the cursor, or `None` past the end.
    pub fn get(&self) -> Option<(&K, &V)> {
        self.inner.get().map(|(k, v)| (k, v))
    }

    /// The entry under the cursor with a mutable value.
    pub fn get_mut(&mut self) -> Option<(&K, &mut V)> {
        self.inner.get_mut().map(|(k, v)| (&*k, v))
    }

    /// Advance to the next slot.
    pub fn move_next(&mut self) {
        self.inner.move_next();
    }

    /// Remove and return the entry under the cursor.
    pub fn remove(&mut self) -> Option<(K, V)> {
        self.inner.remove()
    }
}

/// An iterator over the key-value pairs of a `HashMap`.
pub struct Iter<'a, K, V> {
    inner: crate::hash_table::Iter<'a, (K, V)>,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// A mutable iterator over the entries of a `HashMap`.
pub struct IterMut<'a, K, V> {
    inner: crate::hash_table::IterMut<'a, (K, V)>,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, v)| (&*k, v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// An iterator over the keys of a `HashMap`.
pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}

/// An iterator over the values of a `HashMap`.
pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}

/// A mutable iterator over the values of a `HashMap`.
pub struct ValuesMut<'a, K, V> {
    inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}

/// An owning iterator over the entries of a `HashMap`.
pub struct IntoIter<K, V> {
    inner: crate::hash_table::IntoIter<(K, V)>,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}
impl<K, V> FusedIterator for IntoIter<K, V> {}

/// An owning iterator over the keys of a `HashMap`.
pub struct IntoKeys<K, V> {
    inner: IntoIter<K, V>,
}

impl<K, V> Iterator for IntoKeys<K, V> {
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// An owning iterator over the values of a `HashMap`.
pub struct IntoValues<K, V> {
    inner: IntoIter<K, V>,
}

impl<K, V> Iterator for IntoValues<K, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// A draining iterator over the key-value pairs of a `HashMap`.
pub struct Drain<'a, K, V> {
    inner: crate::hash_table::Drain<'a, (K, V)>,
}

impl<K, V> Iterator for Drain<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// An iterator removing and yielding the entries that match a predicate.
///
/// This struct is created by the [`extract_if`] method on [`HashMap`].
///
/// [`extract_if`]: HashMap::extract_if
pub struct ExtractIf<'a, K, V, F> {
    cursor: crate::hash_table::CursorMut<'a, (K, V)>,
    pred: F,
}

impl<K, V, F> Iterator for ExtractIf<'_, K, V, F>
where
    F: FnMut(&K, &mut V) -> bool,
{
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((key, value)) = self.cursor.get_mut() {
            if (self.pred)(key, value) {
                return self.cursor.remove();
            }
            self.cursor.move_next();
        }
        None
    }
}

impl<K, V, F> FusedIterator for ExtractIf<'_, K, V, F> where F: FnMut(&K, &mut V) -> bool {}

#[cfg(test)]
mod tests {
    use core::hash::BuildHasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;
    use crate::hash_policy::BuildIdentityHasher;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            let mut rng = OsRng;
            Self {
                k1: rng.try_next_u64().unwrap_or(0),
                k2: rng.try_next_u64().unwrap_or(0),
            }
        }
    }

    #[test]
    fn test_new_and_with_hasher() {
        let map: HashMap<i32, String> = HashMap::new();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        assert_eq!(map.bucket_count(), 0);

        let map2 = HashMap::<i32, String, _>::with_hasher(SipHashBuilder::default());
        assert!(map2.is_empty());
        assert_eq!(map2.len(), 0);
    }

    #[test]
    fn test_with_capacity() {
        let map: HashMap<i32, String> = HashMap::with_capacity(100);
        assert!(map.capacity() >= 100);
        assert!(map.is_empty());

        let map2 =
            HashMap::<i32, String, _>::with_capacity_and_hasher(200, SipHashBuilder::default());
        assert!(map2.capacity() >= 200);
        assert!(map2.is_empty());

        assert_eq!(
            HashMap::<u8, u8, _>::try_with_capacity_and_hasher(usize::MAX, SipHashBuilder::default())
                .unwrap_err(),
            TryReserveError::CapacityOverflow
        );
    }

    #[test]
    fn test_rehash() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        for i in 0..200 {
            map.insert(i, i * 3);
        }

        map.rehash(5000);
        assert!(map.bucket_count() >= 5000);
        for i in 0..200 {
            assert_eq!(map.get(&i), Some(&(i * 3)));
        }

        map.rehash(1);
        assert!(map.capacity() >= 200);
        assert!(map.bucket_count() < 5000);
        for i in 0..200 {
            assert_eq!(map.get(&i), Some(&(i * 3)));
        }

        let buckets = map.bucket_count();
        assert_eq!(
            map.try_rehash(usize::MAX),
            Err(TryReserveError::CapacityOverflow)
        );
        assert_eq!(map.bucket_count(), buckets);
        assert_eq!(map.len(), 200);
    }

    #[test]
    fn test_insert_and_get() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());

        assert_eq!(map.insert(1, "hello".to_string()), None);
        assert_eq!(map.len(), 1);
        assert!(!map.is_empty());

        assert_eq!(map.get(&1), Some(&"hello".to_string()));
        assert_eq!(map.get(&2), None);

        assert_eq!(
            map.insert(1, "world".to_string()),
            Some("hello".to_string())
        );
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1), Some(&"world".to_string()));
        assert_eq!(map.get_key_value(&1), Some((&1, &"world".to_string())));
    }

    #[test]
    fn test_try_emplace_never_overwrites() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());

        let (slot, inserted) = map.try_emplace("k", 1);
        assert!(inserted);
        assert_eq!(slot, 0);

        let (again, inserted) = map.try_emplace("k", 2);
        assert!(!inserted);
        assert_eq!(again, slot);
        assert_eq!(map["k"], 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_insert_or_assign() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(0, 0);

        assert_eq!(map.insert_or_assign(1, 10), (1, true));
        assert_eq!(map.insert_or_assign(1, 11), (1, false));
        assert_eq!(map[&1], 11);
        assert_eq!(map.get_index(1), Some((&1, &11)));
    }

    #[test]
    fn test_try_insert() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        for i in 0..50 {
            assert_eq!(map.try_insert(i, i).unwrap(), None);
        }
        assert_eq!(map.try_insert(7, 70).unwrap(), Some(7));
        assert_eq!(map.len(), 50);
    }

    #[test]
    fn test_get_or_insert_default() {
        let mut map: HashMap<&str, Vec<u8>, SipHashBuilder> = HashMap::default();
        map.get_or_insert_default("a").push(1);
        map.get_or_insert_default("a").push(2);
        assert!(map.get_or_insert_default("b").is_empty());
        assert_eq!(map["a"], [1, 2]);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_get_mut() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "hello".to_string());

        if let Some(value) = map.get_mut(&1) {
            value.push_str(" world");
        }

        assert_eq!(map.get(&1), Some(&"hello world".to_string()));
        assert_eq!(map.get_mut(&2), None);
    }

    #[test]
    fn test_contains_key() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        assert!(!map.contains_key(&1));

        map.insert(1, "value".to_string());
        assert!(map.contains_key(&1));
        assert!(!map.contains_key(&2));
    }

    #[test]
    fn test_remove() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "hello".to_string());
        map.insert(2, "world".to_string());

        assert_eq!(map.remove(&1), Some("hello".to_string()));
        assert_eq!(map.len(), 1);
        assert!(!map.contains_key(&1));
        assert!(map.contains_key(&2));

        assert_eq!(map.remove(&1), None);
        assert_eq!(map.remove(&3), None);
    }

    #[test]
    fn test_erase_counts() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, ());
        assert_eq!(map.erase(&1), 1);
        assert_eq!(map.erase(&1), 0);
        assert_eq!(map.erase(&9), 0);
    }

    #[test]
    fn test_remove_entry() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "hello".to_string());

        assert_eq!(map.remove_entry(&1), Some((1, "hello".to_string())));
        assert_eq!(map.len(), 0);
        assert_eq!(map.remove_entry(&1), None);
    }

    #[test]
    fn test_borrowed_lookups() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert("hello".to_string(), 1);
        map.insert("world".to_string(), 2);

        assert_eq!(map.get("hello"), Some(&1));
        assert!(map.contains_key("world"));
        assert_eq!(map["world"], 2);
        assert_eq!(map.remove("hello"), Some(1));
        assert_eq!(map.get("hello"), None);
    }

    #[test]
    #[should_panic(expected = "key not found")]
    fn test_index_missing_key_panics() {
        let map: HashMap<u32, u32> = HashMap::new();
        let _value = map[&3];
    }

    #[test]
    fn test_clear() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "hello".to_string());
        map.insert(2, "world".to_string());

        assert_eq!(map.len(), 2);
        map.clear();
        assert_eq!(map.len(), 0);
        assert!(map.is_empty());
        assert!(!map.contains_key(&1));
        assert!(!map.contains_key(&2));
    }

    #[test]
    fn test_reserve() {
        let mut map = HashMap::<i32, String, _>::with_hasher(SipHashBuilder::default());
        let initial_capacity = map.capacity();

        map.reserve(1000);
        assert!(map.capacity() >= initial_capacity + 1000);

        assert!(map.try_reserve(usize::MAX).is_err());
        assert!(map.capacity() >= 1000);
    }

    #[test]
    fn test_load_factor_accessors() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        assert_eq!(map.load_factor(), 0.0);
        for i in 0..64 {
            map.insert(i, i);
        }
        assert!(map.load_factor() <= map.max_load_factor());

        map.set_max_load_factor(0.3);
        assert!(map.load_factor() <= 0.3);
        for i in 0..64 {
            assert_eq!(map[&i], i);
        }
    }

    #[test]
    fn test_shrink_to_fit() {
        let mut map = HashMap::with_capacity_and_hasher(1000, SipHashBuilder::default());
        map.insert(1, 1);
        map.shrink_to_fit();
        assert_eq!(map.bucket_count(), 4);
        assert_eq!(map[&1], 1);

        map.remove(&1);
        map.shrink_to_fit();
        assert_eq!(map.bucket_count(), 0);
    }

    #[test]
    fn test_entry_api() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());

        let value = map.entry(1).or_insert("hello".to_string());
        assert_eq!(value, &"hello".to_string());
        assert_eq!(map.len(), 1);

        let value = map.entry(1).or_insert("world".to_string());
        assert_eq!(value, &"hello".to_string());
        assert_eq!(map.len(), 1);

        map.entry(2).or_insert_with(|| "computed".to_string());
        assert_eq!(map.get(&2), Some(&"computed".to_string()));

        map.entry(1)
            .and_modify(|v| v.push_str(" world"))
            .or_insert("default".to_string());
        assert_eq!(map.get(&1), Some(&"hello world".to_string()));

        assert_eq!(map.entry(3).key(), &3);
        assert_eq!(map.entry(3).index(), 2);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_entry_or_default() {
        let mut map: HashMap<i32, Vec<i32>, SipHashBuilder> =
            HashMap::with_hasher(SipHashBuilder::default());

        map.entry(1).or_default().push(42);
        assert_eq!(map.get(&1), Some(&vec![42]));

        map.entry(1).or_default().push(24);
        assert_eq!(map.get(&1), Some(&vec![42, 24]));
    }

    #[test]
    fn test_occupied_entry() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "hello".to_string());

        match map.entry(1) {
            Entry::Occupied(mut entry) => {
                assert_eq!(entry.key(), &1);
                assert_eq!(entry.get(), &"hello".to_string());

                *entry.get_mut() = "world".to_string();
                assert_eq!(entry.get(), &"world".to_string());

                let old_value = entry.insert("new".to_string());
                assert_eq!(old_value, "world".to_string());
                assert_eq!(entry.get(), &"new".to_string());

                let (key, value) = entry.remove_entry();
                assert_eq!(key, 1);
                assert_eq!(value, "new".to_string());
            }
            Entry::Vacant(_) => panic!("Expected occupied entry"),
        }

        assert!(map.is_empty());
    }

    #[test]
    fn test_vacant_entry() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());

        match map.entry(1) {
            Entry::Vacant(entry) => {
                assert_eq!(entry.key(), &1);

                let value = entry.insert("hello".to_string());
                assert_eq!(value, &"hello".to_string());
            }
            Entry::Occupied(_) => panic!("Expected vacant entry"),
        }

        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&1), Some(&"hello".to_string()));

        match map.entry(2) {
            Entry::Vacant(entry) => assert_eq!(entry.into_key(), 2),
            Entry::Occupied(_) => panic!("Expected vacant entry"),
        }
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_iterators() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "one".to_string());
        map.insert(2, "two".to_string());
        map.insert(3, "three".to_string());

        let pairs: std::collections::HashMap<i32, String> =
            map.iter().map(|(k, v)| (*k, v.clone())).collect();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs.get(&1), Some(&"one".to_string()));
        assert_eq!(pairs.get(&2), Some(&"two".to_string()));
        assert_eq!(pairs.get(&3), Some(&"three".to_string()));

        let keys: std::collections::HashSet<i32> = map.keys().copied().collect();
        assert_eq!(keys.len(), 3);
        assert!(keys.contains(&1));
        assert!(keys.contains(&2));
        assert!(keys.contains(&3));

        let values: std::collections::HashSet<String> = map.values().cloned().collect();
        assert_eq!(values.len(), 3);
        assert!(values.contains("one"));
        assert!(values.contains("two"));
        assert!(values.contains("three"));

        for value in map.values_mut() {
            value.push('!');
        }
        for (_, value) in &mut map {
            value.push('?');
        }
        assert_eq!(map[&2], "two!?");
        assert_eq!(map.iter().len(), 3);

        let mut keys: Vec<i32> = map.clone().into_keys().collect();
        keys.sort_unstable();
        assert_eq!(keys, [1, 2, 3]);
        assert_eq!(map.into_values().count(), 3);
    }

    #[test]
    fn test_drain() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());
        map.insert(1, "one".to_string());
        map.insert(2, "two".to_string());
        map.insert(3, "three".to_string());

        let drained: std::collections::HashMap<i32, String> = map.drain().collect();
        assert_eq!(drained.len(), 3);
        assert!(map.is_empty());

        assert_eq!(drained.get(&1), Some(&"one".to_string()));
        assert_eq!(drained.get(&2), Some(&"two".to_string()));
        assert_eq!(drained.get(&3), Some(&"three".to_string()));
    }

    #[test]
    fn test_retain_and_extract_if() {
        let mut map: HashMap<i32, i32, SipHashBuilder> = (0..100).map(|i| (i, i * 2)).collect();

        map.retain(|k, v| {
            *v += 1;
            k % 2 == 0
        });
        assert_eq!(map.len(), 50);
        assert_eq!(map[&4], 9);

        let mut extracted: Vec<(i32, i32)> = map.extract_if(|k, _| k % 10 == 0).collect();
        extracted.sort_unstable();
        assert_eq!(extracted.len(), 10);
        assert_eq!(extracted[0], (0, 1));
        assert_eq!(map.len(), 40);
        assert!(map.keys().all(|k| k % 2 == 0 && k % 10 != 0));

        // Dropping the iterator early keeps the rest.
        let first = map.extract_if(|_, _| true).next();
        assert!(first.is_some());
        assert_eq!(map.len(), 39);
    }

    #[test]
    fn test_cursor_erase_while_iterating() {
        let mut map: HashMap<u32, u32> = (0..100).map(|i| (i, i)).collect();

        let mut visited = 0;
        let mut cursor = map.cursor_mut();
        while let Some((&k, _)) = cursor.get() {
            visited += 1;
            if k % 4 == 0 {
                assert_eq!(cursor.remove().map(|(k, _)| k), Some(k));
            } else {
                if let Some((_, v)) = cursor.get_mut() {
                    *v += 1000;
                }
                cursor.move_next();
            }
        }
        assert_eq!(visited, 100);
        assert_eq!(map.len(), 75);
        assert!(map.iter().all(|(k, v)| *v == k + 1000));
    }

    #[test]
    fn test_merge() {
        let mut a: HashMap<i32, &str, SipHashBuilder> = HashMap::default();
        let mut b: HashMap<i32, &str, BuildIdentityHasher> = HashMap::default();

        a.insert(1, "a1");
        a.insert(2, "a2");
        for (k, v) in [(2, "b2"), (3, "b3"), (4, "b4")] {
            b.insert(k, v);
        }

        a.merge(&mut b);
        assert_eq!(a.len(), 4);
        assert_eq!(a[&2], "a2");
        assert_eq!(a[&3], "b3");
        assert_eq!(a[&4], "b4");
        assert_eq!(b.len(), 1);
        assert_eq!(b[&2], "b2");

        let mut empty: HashMap<i32, &str, SipHashBuilder> = HashMap::default();
        empty.merge(&mut a);
        assert_eq!(empty.len(), 4);
        assert!(a.is_empty());
    }

    #[test]
    fn test_equality() {
        let a: HashMap<i32, i32> = (0..20).map(|i| (i, i)).collect();
        let mut b: HashMap<i32, i32> = (0..20).rev().map(|i| (i, i)).collect();
        assert_eq!(a, b);

        b.insert(3, 4);
        assert_ne!(a, b);
        b.insert(3, 3);
        b.insert(20, 20);
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_array_and_extend() {
        let mut map = HashMap::from([(1, 'a'), (2, 'b')]);
        map.extend([(3, 'c'), (1, 'z')]);
        map.extend([(&4, &'d')]);
        assert_eq!(map.len(), 4);
        assert_eq!(map[&1], 'z');
        assert_eq!(map[&4], 'd');
    }

    #[test]
    fn test_take_leaves_empty_map() {
        let mut map: HashMap<i32, i32> = (0..10).map(|i| (i, i)).collect();
        let taken = core::mem::take(&mut map);
        assert!(map.is_empty());
        assert_eq!(taken.len(), 10);
    }

    #[test]
    fn test_collision_handling() {
        let mut map = HashMap::with_hasher(SipHashBuilder::default());

        for i in 0..1000 {
            map.insert(i, i * 2);
        }

        assert_eq!(map.len(), 1000);

        for i in 0..1000 {
            assert_eq!(map.get(&i), Some(&(i * 2)));
        }

        for i in (0..1000).step_by(2) {
            assert_eq!(map.remove(&i), Some(i * 2));
        }

        assert_eq!(map.len(), 500);

        for i in (1..1000).step_by(2) {
            assert_eq!(map.get(&i), Some(&(i * 2)));
        }
    }

    #[test]
    fn test_identity_hasher_sequential_keys() {
        let mut map: HashMap<u64, u64, BuildIdentityHasher> = HashMap::default();
        for i in 0..10_000u64 {
            map.insert(i, i);
        }
        for i in 0..10_000u64 {
            assert_eq!(map[&i], i);
        }
        for i in (0..10_000u64).step_by(3) {
            assert_eq!(map.remove(&i), Some(i));
        }
        assert_eq!(map.len(), 10_000 - 3334);
    }

    #[test]
    fn test_default_trait() {
        let map: HashMap<i32, String, SipHashBuilder> = HashMap::default();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_debug_format() {
        let map = HashMap::from([(1, "one")]);
        assert_eq!(format!("{map:?}"), r#"{1: "one"}"#);
    }
}
