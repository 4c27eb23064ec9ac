//! CADD: a DAG node standing for the XOR of its children.
//!
//! Grounded on `original_source/src/CADD.h`/`CADD.cpp`: `upstream_merging`
//! fuses children pairwise per the table in this module's [`try_fuse`]; the
//! per-pair helpers below (`merge_cadd_cadd`, `merge_with_term`) are the
//! `__upstream_merging(CADD*, CADD*)` / `__upstream_merging(CADD*, X*)`
//! overloads collapsed into one tagged-match shape.

use std::sync::Arc;

use crate::config::PolicyConfig;
use crate::context::Context;
use crate::error::Result;

use super::{
    deflen_of, fixed_point_merge, is_sole_owner, is_zero, keep_odd_multiplicity, kind_of, leaf,
    shorten, wrap, CNode, NodeKind, NodeRef,
};

/// Build a fresh CADD over `children`, running `upstream_merging` (fusing
/// children pairwise to a fixed point) and then `upstream_shortening`
/// (collapsing a surviving single-child chain). This is the entry point
/// `Ciphertext::+` uses once it has decided not to take the CCC-CCC fast
/// path.
pub fn build(children: Vec<NodeRef>, context: &Arc<Context>, config: &PolicyConfig) -> Result<NodeRef> {
    let mut children = children;
    if !config.no_merging {
        fixed_point_merge(&mut children, |a, b| try_fuse(a, b, context, config))?;
    }
    let node = wrap(CNode::Cadd(children));
    if config.shorten_on_recursive_cadd_merging {
        Ok(shorten(node))
    } else {
        Ok(node)
    }
}

/// Attempt to fuse one pair of a CADD's children, per §4.5's table.
///
/// Checks the duplicate-child shortcut first: two children that are the
/// same shared node (by address, regardless of kind) cancel outright under
/// XOR (`a ⊕ a = 0`) when `remove_duplicates_onadd` is set, without paying
/// for whatever the kind-pair fusion table below would have done (e.g.
/// materializing a CCC concatenation of a chunk with itself instead of
/// recognizing it nets to nothing).
fn try_fuse(
    a: &NodeRef,
    b: &NodeRef,
    context: &Arc<Context>,
    config: &PolicyConfig,
) -> Result<Option<NodeRef>> {
    if config.remove_duplicates_onadd && Arc::ptr_eq(a, b) {
        return Ok(Some(wrap(CNode::Cadd(Vec::new()))));
    }
    match (kind_of(a), kind_of(b)) {
        (NodeKind::Ccc, NodeKind::Ccc) => fuse_ccc_pair(a, b, context, config),
        (NodeKind::Ccc, NodeKind::Cadd) | (NodeKind::Cmul, NodeKind::Cadd) => {
            merge_with_term(b, a, config)
        }
        (NodeKind::Cadd, NodeKind::Ccc) | (NodeKind::Cadd, NodeKind::Cmul) => {
            merge_with_term(a, b, config)
        }
        (NodeKind::Cadd, NodeKind::Cadd) => merge_cadd_cadd(a, b, config),
        // CCC+CMUL, CMUL+CCC, CMUL+CMUL: no-op, nothing to fuse.
        _ => Ok(None),
    }
}

fn fuse_ccc_pair(
    a: &NodeRef,
    b: &NodeRef,
    _context: &Arc<Context>,
    config: &PolicyConfig,
) -> Result<Option<NodeRef>> {
    let (ka, kb) = (deflen_of(a), deflen_of(b));
    if ka + kb > config.max_ccc_size {
        return Ok(None);
    }
    let guard_a = a.lock().expect("cnode mutex poisoned");
    let guard_b = b.lock().expect("cnode mutex poisoned");
    let (ccc_a, ccc_b) = match (&*guard_a, &*guard_b) {
        (CNode::Ccc(x), CNode::Ccc(y)) => (x, y),
        _ => unreachable!("fuse_ccc_pair called on non-CCC nodes"),
    };
    let summed = ccc_a.add(ccc_b, config)?;
    drop(guard_a);
    drop(guard_b);
    Ok(Some(leaf(summed)))
}

/// `merge(CADD a, X)`: append `term` (a CCC or CMUL) to `cadd`'s child
/// list, mutating in place if `cadd` is solely owned, otherwise copying
/// first. `a ⊕ 0` returns `a` (cloned); an empty `a` (the scalar `0`)
/// returns `term` (cloned).
fn merge_with_term(cadd: &NodeRef, term: &NodeRef, config: &PolicyConfig) -> Result<Option<NodeRef>> {
    if is_zero(term) {
        return Ok(Some(Arc::clone(cadd)));
    }
    if is_zero(cadd) {
        return Ok(Some(Arc::clone(term)));
    }

    let ka = deflen_of(cadd);
    let kb = deflen_of(term);
    if ka + kb > config.max_cadd_merge_size {
        return Ok(None);
    }

    if is_sole_owner(cadd) {
        let mut guard = cadd.lock().expect("cnode mutex poisoned");
        if let CNode::Cadd(children) = &mut *guard {
            children.push(Arc::clone(term));
        }
        drop(guard);
        Ok(Some(Arc::clone(cadd)))
    } else {
        let mut children = match &*cadd.lock().expect("cnode mutex poisoned") {
            CNode::Cadd(children) => children.clone(),
            _ => unreachable!("merge_with_term called with a non-CADD first argument"),
        };
        children.push(Arc::clone(term));
        Ok(Some(wrap(CNode::Cadd(children))))
    }
}

/// `merge(CADD a, CADD b)`: union the two child lists; with
/// `remove_duplicates_onadd`, cancel pairs of pointer-identical children
/// (`a ⊕ a = 0`) by keeping only odd final multiplicities.
fn merge_cadd_cadd(a: &NodeRef, b: &NodeRef, config: &PolicyConfig) -> Result<Option<NodeRef>> {
    let (ka, kb) = (deflen_of(a), deflen_of(b));
    if ka + kb > config.max_cadd_merge_size {
        return Ok(None);
    }

    let mut union: Vec<NodeRef> = match &*a.lock().expect("cnode mutex poisoned") {
        CNode::Cadd(children) => children.clone(),
        _ => unreachable!("merge_cadd_cadd called with a non-CADD argument"),
    };
    union.extend(match &*b.lock().expect("cnode mutex poisoned") {
        CNode::Cadd(children) => children.clone(),
        _ => unreachable!("merge_cadd_cadd called with a non-CADD argument"),
    });

    if config.remove_duplicates_onadd {
        union = keep_odd_multiplicity(union);
    }

    Ok(Some(wrap(CNode::Cadd(union))))
}
