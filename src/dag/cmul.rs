//! CMUL: a DAG node standing for the AND of its children.
//!
//! Grounded on `original_source/src/CMUL.h`/`CMUL.cpp`. Shares its overall
//! shape with [`super::cadd`] (pairwise fusion to a fixed point, then
//! shortening) but the fusion table additionally has to *distribute* a CADD
//! operand across a CMUL, per §4.6: `(Σ aᵢ) ∧ term = Σ (aᵢ ∧ term)`.

use std::sync::Arc;

use crate::config::PolicyConfig;
use crate::context::Context;
use crate::error::Result;

use super::cadd;
use super::{
    cmul_with_absorption, deflen_of, fixed_point_merge, is_sole_owner, is_zero,
    keep_one_copy, kind_of, leaf, shorten, wrap, CNode, NodeKind, NodeRef,
};

/// Build a fresh CMUL over `children`, running `upstream_merging` to a
/// fixed point and then `upstream_shortening`. Entry point for
/// `Ciphertext::*` once it has decided not to take the CCC-CCC fast path.
pub fn build(children: Vec<NodeRef>, context: &Arc<Context>, config: &PolicyConfig) -> Result<NodeRef> {
    let mut children = children;
    if !config.no_merging {
        fixed_point_merge(&mut children, |a, b| try_fuse(a, b, context, config))?;
    }
    let node = wrap(cmul_with_absorption(children));
    if config.shorten_on_recursive_cmul_merging {
        Ok(shorten(node))
    } else {
        Ok(node)
    }
}

fn try_fuse(
    a: &NodeRef,
    b: &NodeRef,
    context: &Arc<Context>,
    config: &PolicyConfig,
) -> Result<Option<NodeRef>> {
    match (kind_of(a), kind_of(b)) {
        (NodeKind::Ccc, NodeKind::Ccc) => fuse_ccc_pair(a, b, config),
        (NodeKind::Ccc, NodeKind::Cadd) => distribute(b, a, context, config),
        (NodeKind::Cadd, NodeKind::Ccc) => distribute(a, b, context, config),
        (NodeKind::Cadd, NodeKind::Cadd) => distribute(a, b, context, config),
        (NodeKind::Cadd, NodeKind::Cmul) => distribute(a, b, context, config),
        (NodeKind::Cmul, NodeKind::Cadd) => distribute(b, a, context, config),
        (NodeKind::Ccc, NodeKind::Cmul) | (NodeKind::Cmul, NodeKind::Ccc) => {
            let (cmul, ccc) = if kind_of(a) == NodeKind::Cmul { (a, b) } else { (b, a) };
            merge_with_term(cmul, ccc, config)
        }
        (NodeKind::Cmul, NodeKind::Cmul) => merge_cmul_cmul(a, b, config),
    }
}

fn fuse_ccc_pair(a: &NodeRef, b: &NodeRef, config: &PolicyConfig) -> Result<Option<NodeRef>> {
    let (ka, kb) = (deflen_of(a), deflen_of(b));
    let product = ka.saturating_mul(kb);
    let within_cap = product <= config.max_ccc_size;
    let forced_default = config.always_default_multiplication && (ka == 1 || kb == 1);
    if !within_cap && !forced_default {
        return Ok(None);
    }
    let guard_a = a.lock().expect("cnode mutex poisoned");
    let guard_b = b.lock().expect("cnode mutex poisoned");
    let (ccc_a, ccc_b) = match (&*guard_a, &*guard_b) {
        (CNode::Ccc(x), CNode::Ccc(y)) => (x, y),
        _ => unreachable!("fuse_ccc_pair called on non-CCC nodes"),
    };
    // `always_default_multiplication` forces the materialization even past
    // `max_ccc_size`; bypass the cap check inside `Ccc::multiply` itself by
    // constructing with a config whose cap is raised just for this call.
    let product_ccc = if within_cap {
        ccc_a.multiply(ccc_b, config)?
    } else {
        let mut uncapped = config.clone();
        uncapped.max_ccc_size = product;
        ccc_a.multiply(ccc_b, &uncapped)?
    };
    drop(guard_a);
    drop(guard_b);
    Ok(Some(leaf(product_ccc)))
}

/// `merge(CMUL a, X)` for `X` a CCC: append to `a`'s child list in place
/// when solely owned, else copy first. Zero propagates both ways: an empty
/// (zero) CMUL absorbs any term and a zero term collapses `a` to zero.
fn merge_with_term(cmul: &NodeRef, term: &NodeRef, config: &PolicyConfig) -> Result<Option<NodeRef>> {
    if is_zero(cmul) || is_zero(term) {
        return Ok(Some(wrap(CNode::Cmul(Vec::new()))));
    }

    let ka = deflen_of(cmul);
    let kb = deflen_of(term);
    if ka.saturating_mul(kb) > config.max_cmul_merge_size {
        return Ok(None);
    }

    if is_sole_owner(cmul) {
        let mut guard = cmul.lock().expect("cnode mutex poisoned");
        if let CNode::Cmul(children) = &mut *guard {
            children.push(Arc::clone(term));
        }
        drop(guard);
        Ok(Some(Arc::clone(cmul)))
    } else {
        let mut children = match &*cmul.lock().expect("cnode mutex poisoned") {
            CNode::Cmul(children) => children.clone(),
            _ => unreachable!("merge_with_term called with a non-CMUL first argument"),
        };
        children.push(Arc::clone(term));
        Ok(Some(wrap(CNode::Cmul(children))))
    }
}

/// `merge(CMUL a, CMUL b)`: union children; with `remove_duplicates_onmul`
/// keep one copy of each pointer-identical child (`a ∧ a = a`).
fn merge_cmul_cmul(a: &NodeRef, b: &NodeRef, config: &PolicyConfig) -> Result<Option<NodeRef>> {
    if is_zero(a) || is_zero(b) {
        return Ok(Some(wrap(CNode::Cmul(Vec::new()))));
    }

    let (ka, kb) = (deflen_of(a), deflen_of(b));
    if ka.saturating_mul(kb) > config.max_cmul_merge_size {
        return Ok(None);
    }

    let mut union: Vec<NodeRef> = match &*a.lock().expect("cnode mutex poisoned") {
        CNode::Cmul(children) => children.clone(),
        _ => unreachable!("merge_cmul_cmul called with a non-CMUL argument"),
    };
    union.extend(match &*b.lock().expect("cnode mutex poisoned") {
        CNode::Cmul(children) => children.clone(),
        _ => unreachable!("merge_cmul_cmul called with a non-CMUL argument"),
    });

    if config.remove_duplicates_onmul {
        union = keep_one_copy(union);
    }

    Ok(Some(wrap(CNode::Cmul(union))))
}

/// `distribute(CADD sum, T term)`: rewrite `(Σ sum_i) ∧ term` to `Σ (sum_i ∧
/// term)` as a fresh CADD of CMUL terms, each one run back through
/// [`build`] (so a term that is itself a CADD distributes again, and a
/// term-times-CCC pair that fits under the cap materializes immediately).
/// An empty sum distributes to `0`.
fn distribute(
    sum: &NodeRef,
    term: &NodeRef,
    context: &Arc<Context>,
    config: &PolicyConfig,
) -> Result<Option<NodeRef>> {
    let sum_children: Vec<NodeRef> = match &*sum.lock().expect("cnode mutex poisoned") {
        CNode::Cadd(children) => children.clone(),
        _ => unreachable!("distribute called with a non-CADD sum"),
    };

    if sum_children.is_empty() {
        return Ok(Some(wrap(CNode::Cadd(Vec::new()))));
    }

    let mut terms = Vec::with_capacity(sum_children.len());
    for summand in sum_children {
        terms.push(build(vec![summand, Arc::clone(term)], context, config)?);
    }

    Ok(Some(cadd::build(terms, context, config)?))
}
