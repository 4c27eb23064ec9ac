//! Keyed permutation of bit positions.
//!
//! A [`Permutation`] is stored two ways at once: the array form (a bijection
//! on `{0..N-1}`, used for composition/inversion) and an ordered list of
//! [`Transposition`]s addressing bit positions *within one default chunk*,
//! used to actually rewrite chunk payloads. The two are built together by a
//! single Fisher–Yates draw, mirroring `original_source/src/Permutation.cpp`
//! bit-for-bit: a transposition is only recorded when the draw actually
//! moves an element (`newpos != pos`), and the draw stops two positions
//! short of the end (the last two elements are never themselves chosen as
//! the outer swap index, though either may still be swapped into).

use rand_core::RngCore;

use crate::{Error, Result};

/// A recorded bit swap within one default chunk: `(i/64, 63-(i%64))` and
/// `(j/64, 63-(j%64))` for the two global bit positions `i`, `j` that were
/// exchanged during the permutation draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transposition {
    /// Word index of the first bit.
    pub i_word: u32,
    /// Bit shift (from the LSB) of the first bit within its word.
    pub i_bit: u32,
    /// Word index of the second bit.
    pub j_word: u32,
    /// Bit shift (from the LSB) of the second bit within its word.
    pub j_bit: u32,
}

impl Transposition {
    fn new(i: u64, j: u64) -> Self {
        Transposition {
            i_word: (i / 64) as u32,
            i_bit: (63 - (i % 64)) as u32,
            j_word: (j / 64) as u32,
            j_bit: (63 - (j % 64)) as u32,
        }
    }

    #[inline]
    fn swap_in(&self, chunk: &mut [u64]) {
        let a = (chunk[self.i_word as usize] >> self.i_bit) & 1;
        let b = (chunk[self.j_word as usize] >> self.j_bit) & 1;
        if a != b {
            chunk[self.i_word as usize] ^= 1 << self.i_bit;
            chunk[self.j_word as usize] ^= 1 << self.j_bit;
        }
    }
}

/// A permutation of `{0..N-1}`, plus its transposition-list representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    array: Vec<u64>,
    transpositions: Vec<Transposition>,
}

impl Permutation {
    /// The identity permutation on `{0..len-1}`, with no transpositions.
    pub fn identity(len: u64) -> Self {
        Permutation {
            array: (0..len).collect(),
            transpositions: Vec::new(),
        }
    }

    /// Build a permutation from an explicit array and transposition list.
    ///
    /// `array` must be a bijection on `{0..array.len()-1}`; this is not
    /// validated here (callers are expected to come from [`Self::random_with_rng`],
    /// [`Self::compose`], [`Self::inverse`], or deserialization, all of
    /// which uphold it).
    pub fn from_parts(array: Vec<u64>, transpositions: Vec<Transposition>) -> Self {
        Permutation {
            array,
            transpositions,
        }
    }

    /// Draw a uniform random permutation of `{0..len-1}` via Fisher–Yates,
    /// recording the transposition list as the draw proceeds.
    pub fn random_with_rng<R: RngCore>(len: u64, rng: &mut R) -> Self {
        let mut array: Vec<u64> = (0..len).collect();
        let mut transpositions = Vec::new();

        if len >= 2 {
            for pos in 0..(len - 2) {
                let span = len - pos;
                let newpos = pos + (rng.next_u64() % span);
                array.swap(pos as usize, newpos as usize);
                if newpos != pos {
                    transpositions.push(Transposition::new(pos, newpos));
                }
            }
        }

        Permutation {
            array,
            transpositions,
        }
    }

    /// Draw a uniform random permutation of `{0..context.n()-1}` using the
    /// OS CSPRNG. Requires the `std_rng` feature (enabled by default).
    #[cfg(feature = "std_rng")]
    pub fn random(context: &crate::Context) -> Self {
        Self::random_with_rng(context.n(), &mut rand::rngs::OsRng)
    }

    /// Length of the underlying array (`N`).
    pub fn len(&self) -> u64 {
        self.array.len() as u64
    }

    /// `true` when this is a permutation of the empty set.
    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// The array representation, `array[i]` is the image of `i`.
    pub fn array(&self) -> &[u64] {
        &self.array
    }

    /// The recorded transposition list, in apply order.
    pub fn transpositions(&self) -> &[Transposition] {
        &self.transpositions
    }

    /// Apply this permutation's transpositions, in recorded order, to one
    /// default chunk (`chunk.len()` must equal the context's `L`).
    pub fn apply_to_chunk(&self, chunk: &mut [u64]) {
        for t in &self.transpositions {
            t.swap_in(chunk);
        }
    }

    /// Apply this permutation to each of `chunk_count` consecutive
    /// default-length chunks in `words` (`words.len() == chunk_count * l`).
    pub fn apply_to_chunks(&self, words: &mut [u64], l: u64) {
        let l = l as usize;
        for chunk in words.chunks_mut(l) {
            self.apply_to_chunk(chunk);
        }
    }

    /// Compose `self ∘ other`: apply `other` first, then `self`.
    ///
    /// The array is `result[i] = self[other[i]]`; the transposition list is
    /// `other`'s transpositions followed by `self`'s (matching
    /// `Permutation::operator+` in the original source, which plays the
    /// left operand's inversions after the right operand's).
    pub fn compose(&self, other: &Permutation) -> Result<Permutation> {
        if self.len() != other.len() {
            return Err(Error::InvalidArgument(
                "cannot compose permutations of different length",
            ));
        }
        let array = other.array.iter().map(|&i| self.array[i as usize]).collect();
        let mut transpositions = Vec::with_capacity(self.transpositions.len() + other.transpositions.len());
        transpositions.extend_from_slice(&other.transpositions);
        transpositions.extend_from_slice(&self.transpositions);
        Ok(Permutation {
            array,
            transpositions,
        })
    }

    /// The inverse permutation: the array inverse (found by linear scan, as
    /// in the original) and the transposition list reversed.
    pub fn inverse(&self) -> Permutation {
        let mut inv = vec![0u64; self.array.len()];
        for (i, &v) in self.array.iter().enumerate() {
            inv[v as usize] = i as u64;
        }
        let transpositions = self.transpositions.iter().rev().copied().collect();
        Permutation {
            array: inv,
            transpositions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn seeded(seed: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(seed)
    }

    #[test]
    fn identity_has_no_transpositions() {
        let id = Permutation::identity(128);
        assert!(id.transpositions().is_empty());
        assert_eq!(id.array(), &(0..128).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn random_array_is_a_bijection() {
        let mut rng = seeded(0xC0FFEE);
        let p = Permutation::random_with_rng(128, &mut rng);
        let mut seen = vec![false; 128];
        for &v in p.array() {
            assert!(!seen[v as usize], "permutation is not injective");
            seen[v as usize] = true;
        }
    }

    #[test]
    fn inverse_round_trips_the_array() {
        let mut rng = seeded(7);
        let p = Permutation::random_with_rng(64, &mut rng);
        let inv = p.inverse();
        let composed = p.compose(&inv).unwrap();
        assert_eq!(composed.array(), Permutation::identity(64).array());
    }

    #[test]
    fn compose_matches_array_composition_on_a_chunk() {
        let mut rng = seeded(42);
        let sigma = Permutation::random_with_rng(128, &mut rng);
        let pi = Permutation::random_with_rng(128, &mut rng);
        let composed = pi.compose(&sigma).unwrap();

        let mut bits = vec![0u64; 2];
        bits[0] = 0xABCDEF0123456789;
        bits[1] = 0x0F0F0F0F0F0F0F0F;

        let mut via_compose = bits.clone();
        composed.apply_to_chunk(&mut via_compose);

        let mut via_sequence = bits.clone();
        sigma.apply_to_chunk(&mut via_sequence);
        pi.apply_to_chunk(&mut via_sequence);

        assert_eq!(via_compose, via_sequence);
    }

    #[test]
    fn compose_rejects_length_mismatch() {
        let mut rng = seeded(1);
        let a = Permutation::random_with_rng(64, &mut rng);
        let b = Permutation::random_with_rng(32, &mut rng);
        assert!(a.compose(&b).is_err());
    }
}
