//! **certfhe** - symmetric homomorphic encryption over the binary field.
//!
//! Ciphertexts are nodes of a lazy operation DAG (`CCC`/`CADD`/`CMUL`);
//! `+`/`*` normalize eagerly where cheap (pairwise fusion, distribution,
//! duplicate cancellation) and otherwise grow the graph, deferring the
//! bit-parallel work to [`Ciphertext::decrypt`].
//!
//! # Modules
//! | Module | Role |
//! |--------|------|
//! | [`context`]     | Scheme parameters (`N`, `D`, `S`, `L`) |
//! | [`secret_key`]   | Key sampling, raw bit encryption/decryption |
//! | [`permutation`]  | Keyed bit-position permutations |
//! | [`plaintext`]    | The one-bit plaintext domain |
//! | [`config`]       | Normalization/threading policy knobs |
//! | [`ccc`]          | Leaf chunk storage and its bit-parallel kernels |
//! | [`dag`]          | The CADD/CMUL fusion and distribution engine |
//! | [`concurrency`]  | Cross-ciphertext lock-sharing guard |
//! | [`ciphertext`]   | The public ciphertext handle |
//! | [`serialize`]    | Wire format for a shared-subgraph ciphertext batch |
//! | [`device`]       | Seam for an out-of-tree GPU backend |

pub mod ccc;
pub mod ciphertext;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod dag;
pub mod device;
pub mod error;
pub mod permutation;
pub mod plaintext;
pub mod secret_key;
pub mod serialize;
pub mod threadpool;

pub use ciphertext::Ciphertext;
pub use config::PolicyConfig;
pub use context::Context;
pub use error::{Error, Result};
pub use permutation::{Permutation, Transposition};
pub use plaintext::Plaintext;
pub use secret_key::SecretKey;
