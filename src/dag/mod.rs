//! The lazy ciphertext-operation DAG: a tagged sum type standing in for the
//! original's `CNODE`/`CCC`/`CADD`/`CMUL` inheritance chain, plus the
//! traversals (decrypt, permute) shared by every node kind.
//!
//! Grounded on `original_source/src/CNODE.h`: the original keeps a manual
//! `downstream_reference_count` per node and a `try_delete` that frees a
//! node only once that count hits zero. `Arc<Mutex<CNode>>` gives the same
//! shared-ownership/automatic-cleanup behavior for free; `Arc::strong_count
//! == 1` stands in for "this is the only reference, mutation in place is
//! safe" exactly where the original tests `downstream_reference_count ==
//! 1`. `Mutex` (rather than `RefCell`) is required because a [`crate::Ciphertext`]
//! must be `Send + Sync` to be usable across real OS threads under the
//! concurrency guard (§4.8).

pub mod cadd;
pub mod cmul;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::ccc::Ccc;
use crate::config::PolicyConfig;
use crate::context::Context;
use crate::error::Result;
use crate::permutation::Permutation;

/// A shared, lockable DAG node. Cloning a `NodeRef` is the Rust counterpart
/// of incrementing the original's `downstream_reference_count`.
pub type NodeRef = Arc<Mutex<CNode>>;

/// One node of the ciphertext-operation DAG.
///
/// `Ccc` is always a leaf (mirrors `CCC::upstream_merging` being a no-op).
/// `Cadd`/`Cmul` hold their children as a plain `Vec` instead of the
/// original's dummy-head intrusive linked list - the dummy head existed only
/// to keep C++ pointers stable across insertion, which a `Vec<NodeRef>`
/// doesn't need.
pub enum CNode {
    Ccc(Ccc),
    Cadd(Vec<NodeRef>),
    Cmul(Vec<NodeRef>),
}

/// Which of the three kinds a node currently is, without holding its lock
/// past the call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Ccc,
    Cadd,
    Cmul,
}

impl CNode {
    /// `K`: sum of children for CADD, product for CMUL (0 if empty - an
    /// empty CMUL is the absorbing-element encoding of 0, not the
    /// multiplicative identity), direct chunk count for CCC.
    pub fn deflen_count(&self) -> u64 {
        match self {
            CNode::Ccc(ccc) => ccc.k(),
            CNode::Cadd(children) => children.iter().map(deflen_of).sum(),
            CNode::Cmul(children) => {
                if children.is_empty() {
                    0
                } else {
                    children.iter().map(deflen_of).product()
                }
            }
        }
    }

    fn kind(&self) -> NodeKind {
        match self {
            CNode::Ccc(_) => NodeKind::Ccc,
            CNode::Cadd(_) => NodeKind::Cadd,
            CNode::Cmul(_) => NodeKind::Cmul,
        }
    }
}

/// Wrap a node in fresh shared ownership.
pub fn wrap(node: CNode) -> NodeRef {
    Arc::new(Mutex::new(node))
}

/// A CCC leaf, ready to wrap.
pub fn leaf(ccc: Ccc) -> NodeRef {
    wrap(CNode::Ccc(ccc))
}

fn lock(node: &NodeRef) -> std::sync::MutexGuard<'_, CNode> {
    node.lock().expect("cnode mutex poisoned")
}

/// `K` for a node behind a [`NodeRef`].
pub fn deflen_of(node: &NodeRef) -> u64 {
    lock(node).deflen_count()
}

/// `true` when `node`'s value is the scalar `0` (CADD with no children, or
/// CMUL reduced to the empty-children absorbing-element encoding).
pub fn is_zero(node: &NodeRef) -> bool {
    deflen_of(node) == 0
}

pub fn kind_of(node: &NodeRef) -> NodeKind {
    lock(node).kind()
}

/// `true` when `node` has exactly one strong reference - the Rust
/// counterpart of `downstream_reference_count == 1`: mutation of this node
/// in place is observable by nobody else.
pub fn is_sole_owner(node: &NodeRef) -> bool {
    Arc::strong_count(node) == 1
}

/// Build a CMUL node, collapsing to the empty-children encoding of `0` the
/// moment any child is itself `0` (the absorbing-element rule of §4.6 -
/// "the moment any child of a CMUL becomes 0, the CMUL clears its child
/// list and sets itself to 0").
pub fn cmul_with_absorption(children: Vec<NodeRef>) -> CNode {
    if children.iter().any(is_zero) {
        CNode::Cmul(Vec::new())
    } else {
        CNode::Cmul(children)
    }
}

/// Collapse a single-child CADD/CMUL chain to its child, recursively.
///
/// Grounded on `CNODE::upstream_shortening`: "if the node has exactly one
/// child, ask that child to shorten, then return the child as this node's
/// replacement." CCC is always already a leaf and shortens to itself.
pub fn shorten(node: NodeRef) -> NodeRef {
    let only_child = {
        let guard = lock(&node);
        match &*guard {
            CNode::Ccc(_) => None,
            CNode::Cadd(children) | CNode::Cmul(children) => {
                if children.len() == 1 {
                    Some(Arc::clone(&children[0]))
                } else {
                    None
                }
            }
        }
    };
    match only_child {
        Some(child) => shorten(child),
        None => node,
    }
}

/// Decrypt a node, memoizing per call by node identity (never across calls -
/// see `original_source`'s static `decryption_cached_values`, which this
/// crate deliberately does not reproduce; see [`crate::Ciphertext::decrypt`]).
pub fn decrypt(
    node: &NodeRef,
    mask: &[u64],
    config: &PolicyConfig,
    memo: &mut HashMap<usize, u8>,
) -> u8 {
    let key = Arc::as_ptr(node) as usize;
    if config.decryption_cache {
        if let Some(&cached) = memo.get(&key) {
            return cached;
        }
    }

    let result = match &*lock(node) {
        CNode::Ccc(ccc) => ccc.decrypt(mask, config),
        CNode::Cadd(children) => children
            .iter()
            .fold(0u8, |acc, child| acc ^ decrypt(child, mask, config, memo)),
        CNode::Cmul(children) => {
            if children.is_empty() {
                0
            } else {
                children
                    .iter()
                    .fold(1u8, |acc, child| acc & decrypt(child, mask, config, memo))
            }
        }
    };

    if config.decryption_cache {
        memo.insert(key, result);
    }
    result
}

/// Permute a node, recursively choosing in-place mutation or a deep copy at
/// every level based on [`is_sole_owner`] - the DAG counterpart of
/// `CCC::permute`'s `downstream_reference_count == 1` branch.
pub fn permute(
    node: &NodeRef,
    perm: &Permutation,
    context: &Arc<Context>,
    config: &PolicyConfig,
    force_deep_copy: bool,
) -> Result<NodeRef> {
    if is_sole_owner(node) && !force_deep_copy {
        {
            let mut guard = lock(node);
            match &mut *guard {
                CNode::Ccc(ccc) => ccc.permute_in_place(perm, config)?,
                CNode::Cadd(children) | CNode::Cmul(children) => {
                    for child in children.iter_mut() {
                        *child = permute(child, perm, context, config, false)?;
                    }
                }
            }
        }
        Ok(Arc::clone(node))
    } else {
        let copy = match &*lock(node) {
            CNode::Ccc(ccc) => CNode::Ccc(ccc.permuted(perm, config)?),
            CNode::Cadd(children) => CNode::Cadd(
                children
                    .iter()
                    .map(|child| permute(child, perm, context, config, false))
                    .collect::<Result<Vec<_>>>()?,
            ),
            CNode::Cmul(children) => cmul_with_absorption(
                children
                    .iter()
                    .map(|child| permute(child, perm, context, config, false))
                    .collect::<Result<Vec<_>>>()?,
            ),
        };
        Ok(wrap(copy))
    }
}

/// Scan `children` with two cursors (outer `i`, inner `j > i`), attempting
/// to fuse each pair via `try_fuse`. A successful fuse replaces slot `i` and
/// removes slot `j`, then the inner scan restarts from `i+1` so newly
/// adjacent pairs get a chance too; a fixed point is reached when a full
/// outer pass produces no fusions.
///
/// Shared between [`cadd`] and [`cmul`] - both run the same "two cursors,
/// fuse or advance" shape (`CADD::upstream_merging`/`CMUL::upstream_merging`
/// in the original), differing only in the fusion table.
pub(crate) fn fixed_point_merge(
    children: &mut Vec<NodeRef>,
    try_fuse: impl Fn(&NodeRef, &NodeRef) -> Result<Option<NodeRef>>,
) -> Result<()> {
    loop {
        let mut changed = false;
        let mut i = 0;
        while i < children.len() {
            let mut j = i + 1;
            while j < children.len() {
                if let Some(fused) = try_fuse(&children[i], &children[j])? {
                    children[i] = fused;
                    children.remove(j);
                    changed = true;
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
        if !changed {
            return Ok(());
        }
    }
}

/// Group `nodes` by `Arc` pointer identity and keep only those whose final
/// multiplicity is odd (`a ⊕ a = 0` cancels pairs). Used by CADD-CADD
/// merging's `remove_duplicates_onadd`.
pub(crate) fn keep_odd_multiplicity(nodes: Vec<NodeRef>) -> Vec<NodeRef> {
    let mut counts: Vec<(NodeRef, usize)> = Vec::new();
    for node in nodes {
        if let Some(entry) = counts
            .iter_mut()
            .find(|(existing, _)| Arc::ptr_eq(existing, &node))
        {
            entry.1 += 1;
        } else {
            counts.push((node, 1));
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| count % 2 == 1)
        .map(|(node, _)| node)
        .collect()
}

/// Deduplicate `nodes` by `Arc` pointer identity, keeping one copy of each
/// (`a ∧ a = a`). Used by CMUL-CMUL merging's `remove_duplicates_onmul`.
pub(crate) fn keep_one_copy(nodes: Vec<NodeRef>) -> Vec<NodeRef> {
    let mut seen: Vec<NodeRef> = Vec::new();
    for node in nodes {
        if !seen.iter().any(|existing| Arc::ptr_eq(existing, &node)) {
            seen.push(node);
        }
    }
    seen
}
