//! Immutable scheme parameters shared by every node in a DAG.

use crate::{Error, Result};

/// Scheme parameters for one CertFHE instance: `N` (ciphertext bit length),
/// `D` (number of secret positions), the derived `S = N / (2D)`, and the
/// default-chunk length in 64-bit words `L = ceil(N / 64)`.
///
/// Equality is structural. Every node reachable from a [`crate::Ciphertext`]
/// shares one `Context`; operations between nodes built from unequal
/// contexts fail with [`Error::InvalidArgument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Context {
    n: u64,
    d: u64,
    s: u64,
    l: u64,
}

impl Context {
    /// Build a context from `(N, D)`.
    ///
    /// Fails with [`Error::InvalidArgument`] when `D == 0` or `N < 2*D`
    /// (the scheme requires `S = N/(2D) >= 1`).
    pub fn new(n: u64, d: u64) -> Result<Self> {
        if d == 0 {
            return Err(Error::InvalidArgument("D must be nonzero"));
        }
        if n < 2 * d {
            return Err(Error::InvalidArgument("N must be at least 2*D"));
        }
        let s = n / (2 * d);
        let l = n.div_ceil(u64::BITS as u64);
        Ok(Context { n, d, s, l })
    }

    /// Ciphertext bit length.
    pub fn n(&self) -> u64 {
        self.n
    }

    /// Number of secret positions.
    pub fn d(&self) -> u64 {
        self.d
    }

    /// `S = N / (2D)`.
    pub fn s(&self) -> u64 {
        self.s
    }

    /// Default-chunk length in 64-bit words, `L = ceil(N / 64)`.
    pub fn l(&self) -> u64 {
        self.l
    }
}
