//! The public ciphertext handle: a DAG node, the context/policy it was
//! built under, and the concurrency-guard membership that lets operations
//! involving it serialize correctly against every other ciphertext that
//! transitively shares a node with it.
//!
//! Grounded on `original_source/src/Ciphertext.h`/`.cpp`: `operator+`/`*`
//! lock both operands' guards, validate a shared [`Context`], take the
//! CCC-CCC fast path when possible, and otherwise build a CADD/CMUL DAG
//! node. The two operand guards are unioned only when the result actually
//! retains a shared node (anything but the fast path); `operator+=`/`*=`
//! simply overwrite the handle with whichever outcome `+`/`*` produced.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ccc::Ccc;
use crate::concurrency::{with_locked, with_locked_pair, ConcurrencyGuard};
use crate::config::PolicyConfig;
use crate::context::Context;
use crate::dag::{self, cadd, cmul, CNode, NodeKind, NodeRef};
use crate::error::{Error, Result};
use crate::permutation::Permutation;
use crate::plaintext::Plaintext;
use crate::secret_key::SecretKey;

/// A homomorphically-encrypted bit: a reference to one node of the lazy
/// operation DAG, the scheme parameters it was built under, the
/// normalization/threading policy in force, and this handle's membership in
/// the cross-ciphertext concurrency guard.
#[derive(Clone)]
pub struct Ciphertext {
    context: Arc<Context>,
    config: Arc<PolicyConfig>,
    node: NodeRef,
    guard: ConcurrencyGuard,
}

impl Ciphertext {
    /// Wrap a single materialized CCC as a ciphertext in a fresh
    /// concurrency-guard component.
    pub fn from_ccc(context: Arc<Context>, config: Arc<PolicyConfig>, ccc: Ccc) -> Self {
        Ciphertext {
            context,
            config,
            node: dag::leaf(ccc),
            guard: ConcurrencyGuard::new(),
        }
    }

    fn from_node(context: Arc<Context>, config: Arc<PolicyConfig>, node: NodeRef, guard: ConcurrencyGuard) -> Self {
        Ciphertext {
            context,
            config,
            node,
            guard,
        }
    }

    /// Reconstruct a handle around an already-built node and guard, e.g.
    /// while deserializing a batch (see [`crate::serialize`]).
    pub(crate) fn from_node_and_guard(
        context: Arc<Context>,
        config: Arc<PolicyConfig>,
        node: NodeRef,
        guard: ConcurrencyGuard,
    ) -> Self {
        Ciphertext::from_node(context, config, node, guard)
    }

    /// The scheme parameters this ciphertext was built under.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// The normalization/threading policy in force for this ciphertext.
    pub fn config(&self) -> &Arc<PolicyConfig> {
        &self.config
    }

    /// Number of default-length chunks this ciphertext's DAG node
    /// logically represents (sum for CADD, product for CMUL, direct count
    /// for CCC).
    pub fn deflen_count(&self) -> u64 {
        dag::deflen_of(&self.node)
    }

    fn check_same_context(&self, other: &Ciphertext) -> Result<()> {
        if self.context != other.context {
            return Err(Error::InvalidArgument(
                "ciphertext operation: operands drawn from different contexts",
            ));
        }
        Ok(())
    }

    /// `self + other`: CCC-CCC fast path if both operands are CCC and the
    /// sum stays within `max_ccc_size`, otherwise a normalized CADD node.
    ///
    /// The fast path shares no node with either operand, so it does not
    /// union the operands' concurrency-guard components (§4.8: "unions the
    /// result's root with the operand roots *iff* the result genuinely
    /// shares nodes with them"); every other outcome does.
    pub fn add(&self, other: &Ciphertext) -> Result<Ciphertext> {
        self.check_same_context(other)?;
        self.combine(other, true)
    }

    /// `self * other`: CCC-CCC fast path if both operands are CCC (subject
    /// to `max_ccc_size`/`always_default_multiplication`), otherwise a
    /// normalized CMUL node. Guard union follows the same genuinely-shares
    /// rule as [`Self::add`].
    pub fn multiply(&self, other: &Ciphertext) -> Result<Ciphertext> {
        self.check_same_context(other)?;
        self.combine(other, false)
    }

    fn combine(&self, other: &Ciphertext, is_add: bool) -> Result<Ciphertext> {
        let shares = would_share(&self.node, &other.node, &self.config, is_add);
        let (node, guard) = if shares {
            self.guard.union(&other.guard);
            let node = with_locked(&self.guard, || {
                build_pairwise(&self.node, &other.node, &self.context, &self.config, is_add)
            })?;
            (node, self.guard.clone())
        } else {
            let node = with_locked_pair(&self.guard, &other.guard, || {
                build_pairwise(&self.node, &other.node, &self.context, &self.config, is_add)
            })?;
            (node, ConcurrencyGuard::new())
        };
        Ok(Ciphertext::from_node(
            Arc::clone(&self.context),
            Arc::clone(&self.config),
            node,
            guard,
        ))
    }

    /// `self += other`, overwriting this handle's node with the sum's.
    pub fn add_assign(&mut self, other: &Ciphertext) -> Result<()> {
        *self = self.add(other)?;
        Ok(())
    }

    /// `self *= other`, overwriting this handle's node with the product's.
    pub fn multiply_assign(&mut self, other: &Ciphertext) -> Result<()> {
        *self = self.multiply(other)?;
        Ok(())
    }

    /// Decrypt by walking the DAG, XOR-ing/AND-ing children's decrypted
    /// values per node kind, memoized for the duration of this call only
    /// (see [`dag::decrypt`] for why the memo is never promoted to a
    /// longer-lived cache).
    pub fn decrypt(&self, secret_key: &SecretKey) -> Result<Plaintext> {
        if secret_key.context().as_ref() != self.context.as_ref() {
            return Err(Error::InvalidArgument(
                "decrypt: secret key drawn for a different context",
            ));
        }
        let mut memo = HashMap::new();
        let bit = with_locked(&self.guard, || {
            dag::decrypt(&self.node, secret_key.mask(), &self.config, &mut memo)
        });
        Ok(Plaintext::new(bit))
    }

    /// Permute this ciphertext's DAG, mutating the node in place when this
    /// is its sole owner and deep-copying otherwise.
    pub fn apply_permutation_inplace(&mut self, perm: &Permutation) -> Result<()> {
        if perm.len() != self.context.n() {
            return Err(Error::InvalidArgument(
                "permutation length does not match context N",
            ));
        }
        let context = Arc::clone(&self.context);
        let config = Arc::clone(&self.config);
        let node = with_locked(&self.guard, || {
            dag::permute(&self.node, perm, &context, &config, false)
        })?;
        self.node = node;
        Ok(())
    }

    /// Permute a fresh copy of this ciphertext, in a new concurrency-guard
    /// component (it shares no mutable state with the original once
    /// returned).
    pub fn apply_permutation(&self, perm: &Permutation) -> Result<Ciphertext> {
        if perm.len() != self.context.n() {
            return Err(Error::InvalidArgument(
                "permutation length does not match context N",
            ));
        }
        let node = with_locked(&self.guard, || {
            dag::permute(&self.node, perm, &self.context, &self.config, true)
        })?;
        Ok(Ciphertext::from_node(
            Arc::clone(&self.context),
            Arc::clone(&self.config),
            node,
            ConcurrencyGuard::new(),
        ))
    }

    /// A structurally independent deep copy: the returned ciphertext shares
    /// no DAG node and no concurrency-guard component with `self`.
    pub fn make_deep_copy(&self) -> Ciphertext {
        let node = deep_copy_node(&self.node);
        Ciphertext::from_node(
            Arc::clone(&self.context),
            Arc::clone(&self.config),
            node,
            ConcurrencyGuard::new(),
        )
    }

    pub(crate) fn node(&self) -> &NodeRef {
        &self.node
    }

    pub(crate) fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }
}

fn deep_copy_node(node: &NodeRef) -> NodeRef {
    let copy = match &*node.lock().expect("cnode mutex poisoned") {
        CNode::Ccc(ccc) => CNode::Ccc(ccc.clone()),
        CNode::Cadd(children) => CNode::Cadd(children.iter().map(deep_copy_node).collect()),
        CNode::Cmul(children) => CNode::Cmul(children.iter().map(deep_copy_node).collect()),
    };
    dag::wrap(copy)
}

/// `true` unless `a` and `b` are both CCC and the operation will actually
/// materialize a fresh, independent CCC (the only outcome that shares no
/// node with either operand). Mirrors the exact predicate
/// [`cadd::build`]/[`cmul::build`] use for their top-level CCC-CCC pair so
/// this can be decided before the guard lock is taken, per §4.8's ordering
/// (union happens before the operation runs, not after).
fn would_share(a: &NodeRef, b: &NodeRef, config: &PolicyConfig, is_add: bool) -> bool {
    if config.no_merging {
        return true;
    }
    if dag::kind_of(a) != NodeKind::Ccc || dag::kind_of(b) != NodeKind::Ccc {
        return true;
    }
    let ka = dag::deflen_of(a);
    let kb = dag::deflen_of(b);
    if is_add {
        ka + kb > config.max_ccc_size
    } else {
        let product = ka.saturating_mul(kb);
        let within_cap = product <= config.max_ccc_size;
        let forced = config.always_default_multiplication && (ka == 1 || kb == 1);
        !(within_cap || forced)
    }
}

/// Take the CCC-CCC fast path when both operands materialize and the
/// result stays under the relevant cap; otherwise build a normalized
/// CADD (`is_add = true`) or CMUL (`is_add = false`) node over the two
/// operands.
fn build_pairwise(
    a: &NodeRef,
    b: &NodeRef,
    context: &Arc<Context>,
    config: &PolicyConfig,
    is_add: bool,
) -> Result<NodeRef> {
    if is_add {
        cadd::build(vec![Arc::clone(a), Arc::clone(b)], context, config)
    } else {
        cmul::build(vec![Arc::clone(a), Arc::clone(b)], context, config)
    }
}
