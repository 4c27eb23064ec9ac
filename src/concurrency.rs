//! Cross-ciphertext concurrency guard: a disjoint-set forest that hands out
//! one lock per connected component of [`crate::Ciphertext`]s that
//! transitively share a DAG node.
//!
//! Grounded on `original_source/src/CNODE_disjoint_set.h`/`.cpp`: the
//! original links nodes with raw `parent`/`child`/`prev`/`next` pointers and
//! reclaims a node on removal by swapping its payload down to a leaf before
//! freeing it - a manual answer to "how do I free a node with no remaining
//! owner" that Rust gets for free from `Arc` reference counting. This crate
//! keeps the disjoint-set forest itself (up-tree with path compression and
//! union by rank, same as the original) but drops the down/sideways
//! pointers and the custom removal algorithm: a [`GuardNode`] with no
//! `Ciphertext` above it and no child pointing at it as parent is simply
//! deallocated when its last `Arc` drops.
//!
//! A single global mutex (`FOREST_MUTEX`, mirroring the original's static
//! `op_mutex`) serializes every find/union so that at most one thread is
//! ever walking or restructuring the forest at a time.

use std::sync::{Arc, Mutex, OnceLock};

struct GuardNode {
    parent: Option<NodeHandle>,
    rank: u32,
    lock: Arc<Mutex<()>>,
}

type NodeHandle = Arc<Mutex<GuardNode>>;

fn forest_mutex() -> &'static Mutex<()> {
    static FOREST_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    FOREST_MUTEX.get_or_init(|| Mutex::new(()))
}

/// One [`crate::Ciphertext`]'s membership in the disjoint-set forest.
///
/// Every freshly constructed `Ciphertext` starts in its own singleton
/// component; [`ConcurrencyGuard::union`] merges two components the moment
/// an operation makes their ciphertexts share a DAG node.
#[derive(Clone)]
pub struct ConcurrencyGuard {
    handle: NodeHandle,
}

impl ConcurrencyGuard {
    /// A fresh singleton component.
    pub fn new() -> Self {
        ConcurrencyGuard {
            handle: Arc::new(Mutex::new(GuardNode {
                parent: None,
                rank: 0,
                lock: Arc::new(Mutex::new(())),
            })),
        }
    }

    fn find_root(handle: &NodeHandle) -> NodeHandle {
        let parent = handle.lock().expect("guard node mutex poisoned").parent.clone();
        match parent {
            None => Arc::clone(handle),
            Some(parent) => {
                let root = Self::find_root(&parent);
                handle.lock().expect("guard node mutex poisoned").parent = Some(Arc::clone(&root));
                root
            }
        }
    }

    /// The `Mutex` guarding every ciphertext in this guard's current
    /// connected component. Callers lock it themselves; [`with_locked`] and
    /// [`with_locked_pair`] are the usual entry points.
    fn component_lock(&self) -> Arc<Mutex<()>> {
        let _op = forest_mutex().lock().expect("forest mutex poisoned");
        let root = Self::find_root(&self.handle);
        let lock = root.lock().expect("guard node mutex poisoned").lock.clone();
        lock
    }

    /// Merge `self`'s component with `other`'s (union by rank). A no-op if
    /// they're already the same component.
    pub fn union(&self, other: &ConcurrencyGuard) {
        let _op = forest_mutex().lock().expect("forest mutex poisoned");
        let ra = Self::find_root(&self.handle);
        let rb = Self::find_root(&other.handle);
        if Arc::ptr_eq(&ra, &rb) {
            return;
        }

        let rank_a = ra.lock().expect("guard node mutex poisoned").rank;
        let rank_b = rb.lock().expect("guard node mutex poisoned").rank;

        if rank_a < rank_b {
            ra.lock().expect("guard node mutex poisoned").parent = Some(rb);
        } else if rank_a > rank_b {
            rb.lock().expect("guard node mutex poisoned").parent = Some(ra);
        } else {
            rb.lock().expect("guard node mutex poisoned").parent = Some(Arc::clone(&ra));
            ra.lock().expect("guard node mutex poisoned").rank += 1;
        }
    }
}

/// A within-process, within-call identifier for `guard`'s current component
/// root: stable for the life of the forest structure, but meaningless
/// across serialization boundaries. Used only to group ciphertexts sharing
/// a component when writing a serialized batch (see [`crate::serialize`]).
pub(crate) fn root_identity(guard: &ConcurrencyGuard) -> usize {
    let _op = forest_mutex().lock().expect("forest mutex poisoned");
    Arc::as_ptr(&ConcurrencyGuard::find_root(&guard.handle)) as usize
}

/// `true` when `a` and `b` currently resolve to the same forest root.
/// Exposed crate-wide (rather than `pub(crate)`) only for tests elsewhere
/// in the crate that need to assert on guard-union behavior.
pub fn same_component(a: &ConcurrencyGuard, b: &ConcurrencyGuard) -> bool {
    root_identity(a) == root_identity(b)
}

impl Default for ConcurrencyGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `f` with `guard`'s component locked.
pub fn with_locked<R>(guard: &ConcurrencyGuard, f: impl FnOnce() -> R) -> R {
    let lock = guard.component_lock();
    let _held = lock.lock().expect("concurrency guard lock poisoned");
    f()
}

/// Run `f` with both `a`'s and `b`'s components locked, locking only once
/// when they're already the same component and otherwise acquiring both in
/// a fixed address order to avoid ABBA deadlocks between concurrent binary
/// operations.
pub fn with_locked_pair<R>(a: &ConcurrencyGuard, b: &ConcurrencyGuard, f: impl FnOnce() -> R) -> R {
    let la = a.component_lock();
    let lb = b.component_lock();

    if Arc::ptr_eq(&la, &lb) {
        let _held = la.lock().expect("concurrency guard lock poisoned");
        return f();
    }

    if (Arc::as_ptr(&la) as usize) < (Arc::as_ptr(&lb) as usize) {
        let _g1 = la.lock().expect("concurrency guard lock poisoned");
        let _g2 = lb.lock().expect("concurrency guard lock poisoned");
        f()
    } else {
        let _g2 = lb.lock().expect("concurrency guard lock poisoned");
        let _g1 = la.lock().expect("concurrency guard lock poisoned");
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_guards_are_distinct_components() {
        let a = ConcurrencyGuard::new();
        let b = ConcurrencyGuard::new();
        assert!(!Arc::ptr_eq(&a.component_lock(), &b.component_lock()));
    }

    #[test]
    fn union_merges_components() {
        let a = ConcurrencyGuard::new();
        let b = ConcurrencyGuard::new();
        a.union(&b);
        assert!(Arc::ptr_eq(&a.component_lock(), &b.component_lock()));
    }

    #[test]
    fn union_is_transitive_across_a_chain() {
        let a = ConcurrencyGuard::new();
        let b = ConcurrencyGuard::new();
        let c = ConcurrencyGuard::new();
        a.union(&b);
        b.union(&c);
        assert!(Arc::ptr_eq(&a.component_lock(), &c.component_lock()));
    }

    #[test]
    fn with_locked_pair_runs_once_on_shared_component() {
        let a = ConcurrencyGuard::new();
        let b = ConcurrencyGuard::new();
        a.union(&b);
        let ran = with_locked_pair(&a, &b, || 42);
        assert_eq!(ran, 42);
    }

    #[test]
    fn with_locked_pair_runs_on_distinct_components() {
        let a = ConcurrencyGuard::new();
        let b = ConcurrencyGuard::new();
        let ran = with_locked_pair(&a, &b, || 7);
        assert_eq!(ran, 7);
    }
}
