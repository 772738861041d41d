//! Committed and in-progress forests of one datastore.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use devstore_core::Value;

use crate::DatastoreKind;

/// Module name to module root content.
///
/// Roots are shared with `Arc`: duplicating a forest for a transaction
/// shares every tree, and the first write to a module through
/// [`Arc::make_mut`] gives the working side its own copy.
pub type Forest = BTreeMap<String, Arc<Value>>;

/// Owns the last-committed forest and, while a transaction is open, the
/// parallel working forest.
///
/// Locks are never held across calls. A poisoned lock is recovered, since
/// every mutation replaces whole module roots.
#[derive(Debug)]
pub struct DatastoreState {
    kind: DatastoreKind,
    committed: RwLock<Forest>,
    working: Mutex<Forest>,
    transaction_underway: AtomicBool,
}

impl DatastoreState {
    pub fn new(kind: DatastoreKind) -> Self {
        Self {
            kind,
            committed: RwLock::new(Forest::new()),
            working: Mutex::new(Forest::new()),
            transaction_underway: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> DatastoreKind {
        self.kind
    }

    /// Committed root of a module.
    pub fn get_root(&self, module: &str) -> Option<Arc<Value>> {
        self.committed_guard().get(module).cloned()
    }

    /// Replace (or with `None`, remove) the committed root of a module.
    pub fn set_root(&self, module: &str, root: Option<Arc<Value>>) {
        let mut committed = self
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match root {
            Some(root) => {
                committed.insert(module.to_string(), root);
            }
            None => {
                committed.remove(module);
            }
        }
    }

    /// Working root of a module.
    pub fn get_transaction_root(&self, module: &str) -> Option<Arc<Value>> {
        self.working().get(module).cloned()
    }

    /// Replace (or with `None`, remove) the working root of a module.
    pub fn set_transaction_root(&self, module: &str, root: Option<Arc<Value>>) {
        let mut working = self.working();
        match root {
            Some(root) => {
                working.insert(module.to_string(), root);
            }
            None => {
                working.remove(module);
            }
        }
    }

    /// Snapshot of the committed forest.
    pub fn committed(&self) -> Forest {
        self.committed_guard().clone()
    }

    /// Snapshot of the working forest.
    pub fn working_snapshot(&self) -> Forest {
        self.working().clone()
    }

    /// True iff nothing has ever been committed (or everything was deleted).
    pub fn is_empty(&self) -> bool {
        self.committed_guard().is_empty()
    }

    /// Seed the working forest with every committed root.
    pub fn duplicate_for_transaction(&self) {
        let committed = self.committed();
        *self.working() = committed;
    }

    /// Replace the committed forest with the working one, module by module.
    ///
    /// A module absent from the working forest was deleted. The working
    /// forest is left empty.
    pub fn commit_from_transaction(&self) {
        let mut working = self.working();
        let mut committed = self
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *committed = std::mem::take(&mut *working);
    }

    /// Drop the working forest.
    pub fn clear_transaction(&self) {
        self.working().clear();
    }

    /// True iff no module has a working root.
    pub fn nothing_in_transaction(&self) -> bool {
        self.working().is_empty()
    }

    pub fn is_transaction_underway(&self) -> bool {
        self.transaction_underway.load(Ordering::Acquire)
    }

    /// Take the single-writer flag. False if it is already taken.
    pub(crate) fn try_begin(&self) -> bool {
        self.transaction_underway
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.transaction_underway.store(false, Ordering::Release);
    }

    /// Exclusive access to the working forest.
    pub(crate) fn working(&self) -> MutexGuard<'_, Forest> {
        self.working.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn committed_guard(&self) -> RwLockReadGuard<'_, Forest> {
        self.committed.read().unwrap_or_else(PoisonError::into_inner)
    }
}
