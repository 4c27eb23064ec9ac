//! Contiguous Ciphertext Chunk: `K` default-length chunks stored back to
//! back as one flat `[u64]` payload, plus the bit-parallel kernels that
//! operate on it.
//!
//! Grounded on `original_source/src/CCC.h`/`CCC.cpp`: a CCC is always a DAG
//! leaf (it never refers upstream), and every kernel below is a direct port
//! of the corresponding `CCC::chunk_*`/`CCC::*` pair, minus the AVX2/AVX-512
//! intrinsics (autovectorization is expected to find the same `AND`/`XOR`
//! loops) and minus the GPU branch (see [`crate::device`]).

use std::sync::Arc;

use crate::config::PolicyConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::permutation::Permutation;
use crate::threadpool::ThreadPool;

/// `K` default-length chunks of `context.l()` words each, flattened into one
/// `Vec<u64>` of length `k * context.l()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ccc {
    context: Arc<Context>,
    k: u64,
    words: Vec<u64>,
}

impl Ccc {
    /// Wrap an existing flat word buffer as a `k`-chunk CCC.
    ///
    /// Fails with [`Error::InconsistentState`] if `words.len() != k *
    /// context.l()`, and with [`Error::CapacityExceeded`] if `k` exceeds
    /// `config.max_ccc_size`.
    pub fn from_words(context: Arc<Context>, k: u64, words: Vec<u64>) -> Result<Self> {
        let expected = k * context.l();
        if words.len() as u64 != expected {
            return Err(Error::InconsistentState(
                "CCC word buffer length does not match deflen_count * L",
            ));
        }
        Ok(Ccc { context, k, words })
    }

    /// Same as [`Self::from_words`], additionally enforcing `max_ccc_size`.
    pub fn from_words_checked(
        context: Arc<Context>,
        k: u64,
        words: Vec<u64>,
        config: &PolicyConfig,
    ) -> Result<Self> {
        Self::check_capacity(k, config)?;
        Self::from_words(context, k, words)
    }

    /// The empty CCC (`k = 0`), used as the neutral element nowhere is
    /// materialized yet.
    pub fn empty(context: Arc<Context>) -> Self {
        Ccc {
            context,
            k: 0,
            words: Vec::new(),
        }
    }

    /// The shared scheme context.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Number of default-length chunks this CCC holds.
    pub fn k(&self) -> u64 {
        self.k
    }

    /// The flat word buffer, `k() * context().l()` words long.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    fn check_capacity(k: u64, config: &PolicyConfig) -> Result<()> {
        if k > config.max_ccc_size {
            return Err(Error::CapacityExceeded {
                deflen_count: k,
                limit: config.max_ccc_size,
            });
        }
        Ok(())
    }

    /// Concatenate two CCCs' chunks: the result holds `self.k() +
    /// other.k()` chunks, `self`'s first. Parallelized over output words
    /// above `config.add_mt_threshold`.
    ///
    /// Grounded on `CCC::add`/`CCC::chunk_add`.
    pub fn add(&self, other: &Ccc, config: &PolicyConfig) -> Result<Ccc> {
        if self.context != other.context {
            return Err(Error::InvalidArgument(
                "ccc add: operands belong to different contexts",
            ));
        }
        let k = self.k + other.k;
        Self::check_capacity(k, config)?;

        let l = self.context.l() as usize;
        let mut words = vec![0u64; (k as usize) * l];
        let split = self.words.len();
        let (fst, snd) = (&self.words, &other.words);

        ThreadPool::global().parallel_chunks_mut(&mut words, 1, config.add_mt_threshold, |start, slice| {
            for (i, w) in slice.iter_mut().enumerate() {
                let idx = start + i;
                *w = if idx < split { fst[idx] } else { snd[idx - split] };
            }
        });

        Ccc::from_words(Arc::clone(&self.context), k, words)
    }

    /// Outer product over chunks: chunk `i*snd.k()+j` of the result is
    /// `self`'s chunk `i` AND `other`'s chunk `j`, word by word. The result
    /// holds `self.k() * other.k()` chunks. Parallelized over output chunks
    /// above `config.mul_mt_threshold`.
    ///
    /// Grounded on `CCC::multiply`/`CCC::chunk_multiply`.
    pub fn multiply(&self, other: &Ccc, config: &PolicyConfig) -> Result<Ccc> {
        if self.context != other.context {
            return Err(Error::InvalidArgument(
                "ccc multiply: operands belong to different contexts",
            ));
        }
        let k = self.k * other.k;
        Self::check_capacity(k, config)?;

        let l = self.context.l() as usize;
        let snd_k = other.k as usize;
        let mut words = vec![0u64; (k as usize) * l];
        let (fst, snd) = (&self.words, &other.words);

        ThreadPool::global().parallel_chunks_mut(&mut words, l, config.mul_mt_threshold, |start_chunk, slice| {
            for (i, out_chunk) in slice.chunks_mut(l).enumerate() {
                let chunk_idx = start_chunk + i;
                let fst_base = (chunk_idx / snd_k) * l;
                let snd_base = (chunk_idx % snd_k) * l;
                for w in 0..l {
                    out_chunk[w] = fst[fst_base + w] & snd[snd_base + w];
                }
            }
        });

        Ccc::from_words(Arc::clone(&self.context), k, words)
    }

    /// Decrypt every chunk against `mask` (the secret key's bitmask) and XOR
    /// the per-chunk results together: chunk `i` decrypts to `1` exactly
    /// when every masked bit is set, i.e. `all_of((chunk[w] & mask[w]) ==
    /// mask[w])`. Parallelized over chunks above `config.dec_mt_threshold`.
    ///
    /// Grounded on `CCC::decrypt`/`CCC::chunk_decrypt`, minus the static
    /// decryption cache (kept one layer up, scoped to a single
    /// [`crate::Ciphertext::decrypt`] call instead of living for the
    /// process).
    pub fn decrypt(&self, mask: &[u64], config: &PolicyConfig) -> u8 {
        if self.k == 0 {
            return 0;
        }
        let l = self.context.l() as usize;
        let words = &self.words;
        let mut per_chunk = vec![0u8; self.k as usize];

        ThreadPool::global().parallel_chunks_mut(&mut per_chunk, 1, config.dec_mt_threshold, |start, slice| {
            for (i, slot) in slice.iter_mut().enumerate() {
                let chunk = &words[(start + i) * l..(start + i + 1) * l];
                let all_secret_bits_set = chunk
                    .iter()
                    .zip(mask.iter())
                    .all(|(&w, &m)| (w & m) ^ m == 0);
                *slot = all_secret_bits_set as u8;
            }
        });

        per_chunk.into_iter().fold(0u8, |acc, bit| acc ^ bit)
    }

    /// Permute every chunk in place, consuming `self`.
    ///
    /// Grounded on the `downstream_reference_count == 1` branch of
    /// `CCC::permute`: callers with sole ownership of this CCC (checked one
    /// layer up, against the owning node's reference count) should call
    /// this instead of [`Self::permuted`] to avoid the copy.
    pub fn permute_in_place(&mut self, perm: &Permutation, config: &PolicyConfig) -> Result<()> {
        if perm.len() != self.context.n() {
            return Err(Error::InvalidArgument(
                "permutation length does not match context N",
            ));
        }
        let l = self.context.l();
        ThreadPool::global().parallel_chunks_mut(
            &mut self.words,
            l as usize,
            config.perm_mt_threshold,
            |_, slice| perm.apply_to_chunks(slice, l),
        );
        Ok(())
    }

    /// Permute a fresh copy of `self`, leaving it untouched.
    ///
    /// Grounded on the `force_deep_copy` / shared-reference branch of
    /// `CCC::permute`.
    pub fn permuted(&self, perm: &Permutation, config: &PolicyConfig) -> Result<Ccc> {
        let mut copy = self.clone();
        copy.permute_in_place(perm, config)?;
        Ok(copy)
    }
}
