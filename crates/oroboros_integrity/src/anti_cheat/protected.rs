//! # Protected Values
//!
//! A value that never sits in memory as itself.
//!
//! ```text
//! masked   = bits(value) XOR key        (key re-drawn on every set)
//! checksum = C(bits(value), key)
//! ```
//!
//! A memory scanner looking for `1500` will not find it, and patching the
//! masked word without also forging the checksum is caught by `verify()`.
//! Detection never repairs: a corrupted value still reads back (wrongly).

use std::marker::PhantomData;

use rand::rngs::OsRng;
use rand::RngCore;

/// Types that can be stored in a [`ProtectedValue`].
pub trait Obfuscate: Copy {
    /// Raw 64-bit representation.
    fn to_bits(self) -> u64;
    /// Inverse of [`Self::to_bits`].
    fn from_bits(bits: u64) -> Self;
}

impl Obfuscate for i64 {
    #[allow(clippy::cast_sign_loss)]
    fn to_bits(self) -> u64 {
        self as u64
    }

    #[allow(clippy::cast_possible_wrap)]
    fn from_bits(bits: u64) -> Self {
        bits as i64
    }
}

impl Obfuscate for u64 {
    fn to_bits(self) -> u64 {
        self
    }

    fn from_bits(bits: u64) -> Self {
        bits
    }
}

impl Obfuscate for f64 {
    fn to_bits(self) -> u64 {
        f64::to_bits(self)
    }

    fn from_bits(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

/// Checksum scheme binding a value to its key.
///
/// Swap in a stronger scheme without touching callers.
pub trait Checksum {
    /// Computes the checksum of `value_bits` under `key`.
    fn checksum(&self, value_bits: u64, key: u64) -> u64;
}

/// Default checksum: SplitMix64 finalizer over value and rotated key.
#[derive(Clone, Copy, Debug, Default)]
pub struct MixChecksum;

impl Checksum for MixChecksum {
    fn checksum(&self, value_bits: u64, key: u64) -> u64 {
        let mut z = value_bits ^ key.rotate_left(29) ^ 0x9E37_79B9_7F4A_7C15;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

/// An obfuscated, tamper-evident value.
#[derive(Clone, Debug)]
pub struct ProtectedValue<T: Obfuscate, C: Checksum = MixChecksum> {
    masked: u64,
    key: u64,
    checksum: u64,
    scheme: C,
    _value: PhantomData<T>,
}

impl<T: Obfuscate> ProtectedValue<T, MixChecksum> {
    /// Protects `value` with the default checksum.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_checksum(value, MixChecksum)
    }
}

impl<T: Obfuscate, C: Checksum> ProtectedValue<T, C> {
    /// Protects `value` with an explicit checksum scheme.
    #[must_use]
    pub fn with_checksum(value: T, scheme: C) -> Self {
        let mut protected = Self {
            masked: 0,
            key: 0,
            checksum: 0,
            scheme,
            _value: PhantomData,
        };
        protected.set(value);
        protected
    }

    /// Reads the value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> T {
        T::from_bits(self.masked ^ self.key)
    }

    /// Stores a new value under a fresh key.
    pub fn set(&mut self, value: T) {
        let bits = value.to_bits();
        let key = fresh_key();
        self.key = key;
        self.masked = bits ^ key;
        self.checksum = self.scheme.checksum(bits, key);
    }

    /// Returns true if the stored words are consistent.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.scheme.checksum(self.masked ^ self.key, self.key) == self.checksum
    }

    /// Direct access to the masked word, standing in for a memory editor.
    #[cfg(test)]
    pub(crate) fn masked_word_mut(&mut self) -> &mut u64 {
        &mut self.masked
    }
}

impl<T: Obfuscate + Default> Default for ProtectedValue<T, MixChecksum> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

fn fresh_key() -> u64 {
    loop {
        let key = OsRng.next_u64();
        if key != 0 {
            return key;
        }
    }
}
