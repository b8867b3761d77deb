//! Cheap hashers for integer keys.
//!
//! Both hashers consume the key as a sequence of integer words. For a key
//! written with a single integer call, such as any primitive integer,
//! [`IdentityHasher`] yields the key with its upper half folded into its
//! lower half, and [`FibonacciHasher`] yields the folded 128-bit product of
//! the key and 2^64 / φ. Neither is resistant to adversarial input.
//!
//! ```rust
//! # use core::hash::BuildHasher;
//! use chain_hash::HashMap;
//! use chain_hash::hash_policy::BuildFibonacciHasher;
//! use chain_hash::hash_policy::BuildIdentityHasher;
//!
//! let mut ids: HashMap<u64, &str, BuildIdentityHasher> = HashMap::default();
//! ids.insert(7, "seven");
//! assert_eq!(BuildIdentityHasher::default().hash_one(7u64), 7);
//!
//! let mut spread: HashMap<u32, u32, BuildFibonacciHasher> = HashMap::default();
//! spread.insert(1, 1);
//! assert_eq!(spread[&1], 1);
//! ```

use core::hash::BuildHasherDefault;
use core::hash::Hasher;

/// 2^64 divided by the golden ratio.
const FIBONACCI: u64 = 11400714819323198485;

#[inline(always)]
fn fold(n: u64, bits: u32) -> u64 {
    n.wrapping_add(n >> (bits / 2))
}

#[inline(always)]
fn fibonacci(n: u64) -> u64 {
    let product = (n as u128).wrapping_mul(FIBONACCI as u128);
    ((product >> 64) as u64).wrapping_add(product as u64)
}

#[inline(always)]
fn for_each_word(bytes: &[u8], mut f: impl FnMut(u64)) {
    for chunk in bytes.chunks(8) {
        let mut word = [0u8; 8];
        word[..chunk.len()].copy_from_slice(chunk);
        f(u64::from_le_bytes(word));
    }
}

/// Hasher returning integer keys almost unchanged.
///
/// Suited to keys that are already well distributed, like sequential ids
/// probed in bulk. The table uses the low bits of a hash to pick a bucket and
/// the high 32 bits as a tag, so keys below 2^32 all share one tag and rely on
/// the equality check to tell them apart.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityHasher {
    hash: u64,
}

impl IdentityHasher {
    #[inline(always)]
    fn mix(&mut self, word: u64) {
        self.hash = self.hash.wrapping_mul(FIBONACCI).wrapping_add(word);
    }
}

impl Hasher for IdentityHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.hash
    }

    fn write(&mut self, bytes: &[u8]) {
        for_each_word(bytes, |word| self.mix(word));
    }

    #[inline]
    fn write_u8(&mut self, n: u8) {
        self.mix(fold(n as u64, u8::BITS));
    }

    #[inline]
    fn write_u16(&mut self, n: u16) {
        self.mix(fold(n as u64, u16::BITS));
    }

    #[inline]
    fn write_u32(&mut self, n: u32) {
        self.mix(fold(n as u64, u32::BITS));
    }

    #[inline]
    fn write_u64(&mut self, n: u64) {
        self.mix(fold(n, u64::BITS));
    }

    #[inline]
    fn write_usize(&mut self, n: usize) {
        self.mix(fold(n as u64, usize::BITS));
    }
}

/// [`BuildHasher`](core::hash::BuildHasher) for [`IdentityHasher`].
pub type BuildIdentityHasher = BuildHasherDefault<IdentityHasher>;

/// Multiplicative hasher spreading integer keys over all 64 bits.
#[derive(Clone, Copy, Debug, Default)]
pub struct FibonacciHasher {
    state: u64,
}

impl FibonacciHasher {
    #[inline(always)]
    fn mix(&mut self, word: u64) {
        self.state = fibonacci(self.state) ^ word;
    }
}

impl Hasher for FibonacciHasher {
    #[inline]
    fn finish(&self) -> u64 {
        fibonacci(self.state)
    }

    fn write(&mut self, bytes: &[u8]) {
        for_each_word(bytes, |word| self.mix(word));
    }

    #[inline]
    fn write_u8(&mut self, n: u8) {
        self.mix(n as u64);
    }

    #[inline]
    fn write_u16(&mut self, n: u16) {
        self.mix(n as u64);
    }

    #[inline]
    fn write_u32(&mut self, n: u32) {
        self.mix(n as u64);
    }

    #[inline]
    fn write_u64(&mut self, n: u64) {
        self.mix(n);
    }

    #[inline]
    fn write_usize(&mut self, n: usize) {
        self.mix(n as u64);
    }
}

/// [`BuildHasher`](core::hash::BuildHasher) for [`FibonacciHasher`].
pub type BuildFibonacciHasher = BuildHasherDefault<FibonacciHasher>;
