//! The secret key: `D` distinct positions in `{0..N-1}` plus their bitmask,
//! and the raw per-bit encryption/decryption arithmetic.

use std::collections::HashSet;
use std::sync::Arc;

use rand_core::RngCore;
use zeroize::Zeroize;

use crate::ccc::Ccc;
use crate::ciphertext::Ciphertext;
use crate::plaintext::Plaintext;
use crate::{Context, Error, Permutation, PolicyConfig, Result};

/// `D` distinct secret positions in `{0..N-1}` plus the precomputed
/// `L`-word bitmask with bits set exactly at those positions
/// (most-significant-bit-first within each word, matching the packing used
/// by [`Ccc`]).
#[derive(Debug, Clone)]
pub struct SecretKey {
    context: Arc<Context>,
    /// Sorted, distinct.
    positions: Vec<u64>,
    mask: Vec<u64>,
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.positions.zeroize();
        self.mask.zeroize();
    }
}

impl SecretKey {
    /// Sample `D` distinct positions in `{0..N-1}` uniformly without
    /// replacement (rejection sampling, as in the reference implementation)
    /// and build the corresponding mask.
    pub fn random_with_rng<R: RngCore>(context: Arc<Context>, rng: &mut R) -> Self {
        let n = context.n();
        let d = context.d() as usize;

        let mut seen = HashSet::with_capacity(d);
        while seen.len() < d {
            let candidate = rng.next_u64() % n;
            seen.insert(candidate);
        }
        let mut positions: Vec<u64> = seen.into_iter().collect();
        positions.sort_unstable();

        let mask = mask_from_positions(&positions, context.l() as usize);
        SecretKey {
            context,
            positions,
            mask,
        }
    }

    /// Sample a secret key using the OS CSPRNG. Requires the `std_rng`
    /// feature (enabled by default).
    #[cfg(feature = "std_rng")]
    pub fn random(context: Arc<Context>) -> Self {
        Self::random_with_rng(context, &mut rand::rngs::OsRng)
    }

    /// The context this key was drawn for.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// The sorted secret positions.
    pub fn positions(&self) -> &[u64] {
        &self.positions
    }

    /// The `L`-word bitmask with bits set at the secret positions.
    pub fn mask(&self) -> &[u64] {
        &self.mask
    }

    /// Encrypt one plaintext bit into a single default chunk, using `rng`
    /// to fill the non-secret positions (and, for `b=0`, the specific
    /// asymmetric construction described on [`Self::encrypt_raw_bit`]).
    pub fn encrypt_raw_with_rng<R: RngCore>(&self, bit: Plaintext, rng: &mut R) -> Vec<u64> {
        let raw_bits = self.encrypt_raw_bit(bit.value(), rng);
        pack_bits_be(&raw_bits, self.context.l() as usize)
    }

    /// Encrypt one plaintext bit, wrapping the resulting chunk in a
    /// [`Ciphertext`] over a freshly sampled word. Requires `std_rng`.
    #[cfg(feature = "std_rng")]
    pub fn encrypt(&self, bit: Plaintext, config: Arc<PolicyConfig>) -> Ciphertext {
        self.encrypt_with_rng(bit, config, &mut rand::rngs::OsRng)
    }

    /// Same as [`Self::encrypt`] but with an explicit RNG.
    pub fn encrypt_with_rng<R: RngCore>(
        &self,
        bit: Plaintext,
        config: Arc<PolicyConfig>,
        rng: &mut R,
    ) -> Ciphertext {
        let words = self.encrypt_raw_with_rng(bit, rng);
        let ccc = Ccc::from_words(Arc::clone(&self.context), 1, words)
            .expect("a single default chunk never exceeds max_ccc_size");
        Ciphertext::from_ccc(Arc::clone(&self.context), config, ccc)
    }

    /// The scheme's ciphertext distribution for one raw bit, as `N` loose
    /// `0`/`1` bytes (one per bit position, not yet packed into words).
    ///
    /// For `b = 1`: every secret position is set to `1`, every other
    /// position is uniform random.
    ///
    /// For `b = 0`: pick a uniform random secret position `p`. Fill every
    /// other position (secret or not) with a uniform random bit, tracking
    /// the running AND of the secret positions other than `p` as they are
    /// filled. If that AND is `1`, force position `p` to `0`; otherwise fill
    /// `p` randomly too. This asymmetric construction is load-bearing for
    /// bit-compatibility with existing ciphertexts and must not be
    /// "simplified" to a uniform fill.
    fn encrypt_raw_bit<R: RngCore>(&self, bit: u8, rng: &mut R) -> Vec<u8> {
        let n = self.context.n() as usize;
        let d = self.positions.len();
        let mut res = vec![0u8; n];

        if bit == 1 {
            for (i, slot) in res.iter_mut().enumerate() {
                *slot = if self.positions.binary_search(&(i as u64)).is_ok() {
                    1
                } else {
                    random_bit(rng)
                };
            }
        } else {
            let s_random = self.positions[(rng.next_u64() % d as u64) as usize];
            let mut v: u8 = 0;
            let mut v_set = false;

            for i in 0..n as u64 {
                if i == s_random {
                    continue;
                }
                let bit = random_bit(rng);
                res[i as usize] = bit;
                if self.positions.binary_search(&i).is_ok() {
                    if !v_set {
                        v = bit;
                        v_set = true;
                    } else {
                        v &= bit;
                    }
                }
            }

            res[s_random as usize] = if v == 1 { 0 } else { random_bit(rng) };
        }

        res
    }

    /// Decrypt one raw default chunk (`L` words): the AND over the chunk's
    /// secret-position bits, i.e. `all_of((chunk[w] & mask[w]) == mask[w])`.
    pub fn decrypt_raw_chunk(&self, chunk: &[u64]) -> u8 {
        let all_secret_bits_set = chunk
            .iter()
            .zip(self.mask.iter())
            .all(|(&w, &m)| (w & m) ^ m == 0);
        all_secret_bits_set as u8
    }

    /// Decrypt a ciphertext by walking its DAG (see [`Ciphertext::decrypt`]).
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Plaintext> {
        ciphertext.decrypt(self)
    }

    /// Apply a permutation to this key's mask in place, then recompute the
    /// sorted positions list from the new mask.
    pub fn apply_permutation_inplace(&mut self, perm: &Permutation) -> Result<()> {
        if perm.len() != self.context.n() {
            return Err(Error::InvalidArgument(
                "permutation length does not match context N",
            ));
        }
        let array = perm.array();
        let n = self.context.n();

        let mut current = vec![0u8; n as usize];
        for &p in &self.positions {
            current[p as usize] = 1;
        }

        let mut permuted = vec![0u8; n as usize];
        for i in 0..n as usize {
            permuted[i] = current[array[i] as usize];
        }

        self.positions = permuted
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| (b == 1).then_some(i as u64))
            .collect();
        self.mask = mask_from_positions(&self.positions, self.context.l() as usize);
        Ok(())
    }

    /// Apply a permutation to a copy of this key, leaving `self` untouched.
    pub fn apply_permutation(&self, perm: &Permutation) -> Result<SecretKey> {
        let mut copy = self.clone();
        copy.apply_permutation_inplace(perm)?;
        Ok(copy)
    }
}

fn random_bit<R: RngCore>(rng: &mut R) -> u8 {
    (rng.next_u64() & 1) as u8
}

fn mask_from_positions(positions: &[u64], l: usize) -> Vec<u64> {
    let mut mask = vec![0u64; l];
    for &p in positions {
        let word = (p / 64) as usize;
        let bit = 63 - (p % 64);
        mask[word] |= 1u64 << bit;
    }
    mask
}

/// Pack `n` loose `0`/`1` bytes into `ceil(n/64)` big-endian (MSB-first)
/// words: bit `k` of the chunk lives in word `k/64`, position `63-(k%64)`.
fn pack_bits_be(bits: &[u8], l: usize) -> Vec<u64> {
    let mut words = vec![0u64; l];
    for (k, &b) in bits.iter().enumerate() {
        if b & 1 == 1 {
            let word = k / 64;
            let shift = 63 - (k % 64);
            words[word] |= 1u64 << shift;
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn ctx() -> Arc<Context> {
        Arc::new(Context::new(128, 4).unwrap())
    }

    #[test]
    fn random_key_has_d_distinct_sorted_positions() {
        let context = ctx();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut rng);
        assert_eq!(sk.positions().len(), context.d() as usize);
        let mut sorted = sk.positions().to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), sk.positions().len());
        assert_eq!(sorted, sk.positions());
    }

    #[test]
    fn mask_has_exactly_d_bits_set() {
        let context = ctx();
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut rng);
        let set_bits: u32 = sk.mask().iter().map(|w| w.count_ones()).sum();
        assert_eq!(set_bits as u64, context.d());
    }

    #[test]
    fn round_trip_bit_one_and_zero() {
        let context = ctx();
        let mut rng = ChaCha8Rng::seed_from_u64(0x5EED);
        let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut rng);

        let chunk1 = sk.encrypt_raw_with_rng(Plaintext::new(1), &mut rng);
        assert_eq!(sk.decrypt_raw_chunk(&chunk1), 1);

        let chunk0 = sk.encrypt_raw_with_rng(Plaintext::new(0), &mut rng);
        assert_eq!(sk.decrypt_raw_chunk(&chunk0), 0);
    }

    #[test]
    fn permute_then_decrypt_matches_original_key() {
        let context = ctx();
        let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE);
        let sk = SecretKey::random_with_rng(Arc::clone(&context), &mut rng);
        let chunk = sk.encrypt_raw_with_rng(Plaintext::new(1), &mut rng);

        let perm = Permutation::random_with_rng(context.n(), &mut rng);
        let mut permuted_chunk = chunk.clone();
        perm.apply_to_chunk(&mut permuted_chunk);
        let permuted_key = sk.apply_permutation(&perm).unwrap();

        assert_eq!(permuted_key.decrypt_raw_chunk(&permuted_chunk), 1);
    }
}
