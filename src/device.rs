//! GPU offload backend trait.
//!
//! `original_source/src/Nvidia_GPU_data.h`/the `CUDA_*` branches in `CCC.cpp`
//! run the same kernels on device buffers when compiled with GPU support.
//! Out of scope here (see crate-level Non-goals); this module exists so a
//! future backend has a seam to implement against without touching
//! [`crate::ccc`].

use crate::config::PolicyConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::permutation::Permutation;

/// An alternate execution target for the four CCC kernels. The default,
/// always-available implementation is [`Unsupported`], which rejects every
/// call; a real backend (CUDA, ROCm, wgpu, ...) would keep chunk payloads
/// resident on-device and only implement these five entry points.
pub trait DeviceBackend: Send + Sync {
    fn add(&self, context: &Context, config: &PolicyConfig, a: &[u64], b: &[u64]) -> Result<Vec<u64>>;

    fn multiply(&self, context: &Context, config: &PolicyConfig, a: &[u64], b: &[u64]) -> Result<Vec<u64>>;

    fn decrypt(&self, context: &Context, config: &PolicyConfig, words: &[u64], mask: &[u64]) -> Result<u8>;

    fn permute(
        &self,
        context: &Context,
        config: &PolicyConfig,
        words: &mut [u64],
        perm: &Permutation,
    ) -> Result<()>;

    /// Human-readable identification, for logging which backend is active.
    fn name(&self) -> &'static str;
}

/// The only backend this crate ships: every call fails. CCC kernels always
/// run on the host; nothing currently constructs or looks up a
/// `DeviceBackend` other than this placeholder.
pub struct Unsupported;

impl DeviceBackend for Unsupported {
    fn add(&self, _context: &Context, _config: &PolicyConfig, _a: &[u64], _b: &[u64]) -> Result<Vec<u64>> {
        Err(Error::InvalidArgument("no GPU backend is compiled into this build"))
    }

    fn multiply(&self, _context: &Context, _config: &PolicyConfig, _a: &[u64], _b: &[u64]) -> Result<Vec<u64>> {
        Err(Error::InvalidArgument("no GPU backend is compiled into this build"))
    }

    fn decrypt(&self, _context: &Context, _config: &PolicyConfig, _words: &[u64], _mask: &[u64]) -> Result<u8> {
        Err(Error::InvalidArgument("no GPU backend is compiled into this build"))
    }

    fn permute(
        &self,
        _context: &Context,
        _config: &PolicyConfig,
        _words: &mut [u64],
        _perm: &Permutation,
    ) -> Result<()> {
        Err(Error::InvalidArgument("no GPU backend is compiled into this build"))
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}
