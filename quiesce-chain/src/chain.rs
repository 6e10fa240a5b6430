use crate::pending::PendingSend;
use quiesce_epoch::{EpochId, EpochManager, TermStatus};
use quiesce_net::{CollectiveOps, Transport};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A chain of causally-dependent sends: each step's `PendingSend` is held
/// back until the previous step's epoch has globally terminated. Holds only
/// `last_epoch` -- everything upstream of that has already fired and been
/// released by the manager.
pub struct DependentSendChain {
    last_epoch: EpochId,
    next_key: u64,
}

impl Default for DependentSendChain {
    fn default() -> Self {
        DependentSendChain::new()
    }
}

impl DependentSendChain {
    /// A fresh chain starts at the already-terminated sentinel, so the
    /// first `add` releases its `pending` as soon as the manager drains its
    /// ready queue, with no real predecessor to wait on.
    pub fn new() -> Self {
        DependentSendChain {
            last_epoch: EpochId::NO_EPOCH,
            next_key: 0,
        }
    }

    pub fn last_epoch(&self) -> EpochId {
        self.last_epoch
    }

    fn fresh_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    /// 1. link `new_epoch` as a child dependency of `last_epoch`, so the old
    ///    epoch cannot complete before the new one does;
    /// 2. register a unique action on `last_epoch` that releases `pending`
    ///    on termination;
    /// 3. advance `last_epoch` to `new_epoch`.
    pub fn add<T>(&mut self, manager: &mut EpochManager<T>, new_epoch: EpochId, pending: PendingSend)
    where
        T: Transport + CollectiveOps,
    {
        manager.add_dependency(self.last_epoch, new_epoch);
        let key = self.fresh_key();
        manager.add_action_unique(self.last_epoch, key, move || pending.release());
        self.last_epoch = new_epoch;
    }

    /// `mergeChainStep`: make `new_epoch` depend on *both* chains' current
    /// `last_epoch`, and release `pending` only once both have terminated
    /// (not after either one alone), then advance both chains.
    pub fn merge_chain_step<T>(a: &mut Self, b: &mut Self, manager: &mut EpochManager<T>, new_epoch: EpochId, pending: PendingSend)
    where
        T: Transport + CollectiveOps,
    {
        manager.add_dependency(a.last_epoch, new_epoch);
        manager.add_dependency(b.last_epoch, new_epoch);

        let remaining = Rc::new(Cell::new(2u8));
        let pending = Rc::new(RefCell::new(Some(pending)));

        let key_a = a.fresh_key();
        {
            let remaining = remaining.clone();
            let pending = pending.clone();
            manager.add_action_unique(a.last_epoch, key_a, move || {
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    if let Some(p) = pending.borrow_mut().take() {
                        p.release();
                    }
                }
            });
        }

        let key_b = b.fresh_key();
        manager.add_action_unique(b.last_epoch, key_b, move || {
            remaining.set(remaining.get() - 1);
            if remaining.get() == 0 {
                if let Some(p) = pending.borrow_mut().take() {
                    p.release();
                }
            }
        });

        a.last_epoch = new_epoch;
        b.last_epoch = new_epoch;
    }

    /// Reset to a fresh, already-terminated sentinel so the chain's prior
    /// tail can be garbage-collected by the manager.
    pub fn done<T>(&mut self, _manager: &mut EpochManager<T>)
    where
        T: Transport + CollectiveOps,
    {
        self.last_epoch = EpochId::NO_EPOCH;
    }

    pub fn is_terminated<T>(&self, manager: &EpochManager<T>) -> bool
    where
        T: Transport + CollectiveOps,
    {
        !matches!(manager.is_epoch_terminated(self.last_epoch), TermStatus::NotTerminated)
    }
}
