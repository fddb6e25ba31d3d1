//! Staged in-memory transactions.
//!
//! Beginning a transaction takes an owned lock on the shared state and clones it.
//! Writes go to the clone; [`commit`] swaps it in. Dropping an [`InMemoryTx`]
//! releases the lock and discards the clone, which is exactly a rollback.
//!
//! Holding the lock for the whole unit of work serializes writers the same way row
//! locks taken by `SELECT ... FOR UPDATE` do.

use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Handle of an open in-memory unit of work.
#[derive(Debug)]
pub struct InMemoryTx<S> {
    guard: OwnedMutexGuard<S>,
    staged: S,
}

impl<S> InMemoryTx<S> {
    /// State as seen inside the transaction.
    #[must_use]
    pub const fn state(&self) -> &S {
        &self.staged
    }

    /// Mutable state inside the transaction.
    pub const fn state_mut(&mut self) -> &mut S {
        &mut self.staged
    }
}

/// Open a transaction over `shared`.
pub async fn begin<S: Clone>(shared: &Arc<Mutex<S>>) -> InMemoryTx<S> {
    let guard = Arc::clone(shared).lock_owned().await;
    let staged = guard.clone();
    InMemoryTx { guard, staged }
}

/// Apply the staged state.
pub fn commit<S>(tx: InMemoryTx<S>) {
    let InMemoryTx { mut guard, staged } = tx;
    *guard = staged;
}
