//! Normalization and multithreading policy knobs.
//!
//! The original certFHE sources (`OPValues` / `MTValues`) keep these as raw
//! global statics, mutated once at startup by an autoselect pass and
//! effectively read-only afterwards. This crate threads a [`PolicyConfig`]
//! value through every DAG construction site instead: every node sharing a
//! [`crate::Context`] also shares one `Arc<PolicyConfig>`, so a caller can
//! run several independently-configured graphs in one process without any
//! global mutable state.

/// Normalization aggressiveness and multithreading thresholds.
///
/// See the type-level docs for why this replaces the original's global
/// mutable flags. All fields default to the values the reference
/// implementation ships with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Upper `deflen_count` for a single CCC; materializing past this fails
    /// with [`crate::Error::CapacityExceeded`].
    pub max_ccc_size: u64,

    /// Upper `deflen_count` for attempting CADD fusion. Above this, the new
    /// CADD node keeps its two operands unmerged rather than paying for a
    /// (likely doomed) merge attempt.
    pub max_cadd_merge_size: u64,

    /// Upper `deflen_count` for attempting CMUL fusion/distribution.
    pub max_cmul_merge_size: u64,

    /// Force a CCC multiply when one operand has `deflen_count == 1`, even
    /// if the product would exceed `max_cmul_merge_size`.
    pub always_default_multiplication: bool,

    /// Cancel identical CADD children (`a ⊕ a = 0`) during upstream merging.
    pub remove_duplicates_onadd: bool,

    /// Collapse identical CMUL children (`a ∧ a = a`) during upstream
    /// merging.
    pub remove_duplicates_onmul: bool,

    /// Run upstream shortening after every recursive CADD fusion.
    pub shorten_on_recursive_cadd_merging: bool,

    /// Run upstream shortening after every recursive CMUL fusion.
    pub shorten_on_recursive_cmul_merging: bool,

    /// Memoize per-call decryption results across shared subgraphs.
    ///
    /// The memo is always scoped to a single `decrypt` call (see
    /// [`crate::Ciphertext::decrypt`]) regardless of this flag; disabling it
    /// only skips the lookup/insert, it never promotes the cache to a
    /// longer lifetime.
    pub decryption_cache: bool,

    /// Disable all fusion. Useful for benchmarking the unnormalized DAG or
    /// reproducing worst-case blow-up.
    pub no_merging: bool,

    /// Minimum `deflen_count` below which `CCC::add` runs single-threaded.
    pub add_mt_threshold: u64,
    /// Minimum `deflen_count` below which `CCC::multiply` runs single-threaded.
    pub mul_mt_threshold: u64,
    /// Minimum `deflen_count` below which `CCC::decrypt` runs single-threaded.
    pub dec_mt_threshold: u64,
    /// Minimum `deflen_count` below which `CCC::permute` runs single-threaded.
    pub perm_mt_threshold: u64,
    /// Minimum word count below which bulk chunk copies run single-threaded.
    pub cpy_mt_threshold: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            max_ccc_size: 2048,
            max_cadd_merge_size: 4096 * 4096,
            max_cmul_merge_size: 4096 * 4096 * 4096,
            always_default_multiplication: true,
            remove_duplicates_onadd: true,
            remove_duplicates_onmul: true,
            shorten_on_recursive_cadd_merging: true,
            shorten_on_recursive_cmul_merging: true,
            decryption_cache: true,
            no_merging: false,
            // Autoselection of these (`MTValues::*_autoselect`) is a
            // benchmarking concern and out of scope; these defaults are
            // sensible fixed points rather than calibrated per-machine.
            add_mt_threshold: 64,
            mul_mt_threshold: 64,
            dec_mt_threshold: 64,
            perm_mt_threshold: 64,
            cpy_mt_threshold: 64,
        }
    }
}
