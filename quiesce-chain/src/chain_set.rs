use crate::chain::DependentSendChain;
use crate::pending::PendingSend;
use quiesce_epoch::{CoreError, EpochId, EpochManager};
use quiesce_net::{CollectiveOps, Transport};
use std::collections::BTreeMap;

/// How a `ChainSet` tracks the elements it's bound to when used as a
/// lifecycle-coupled index rather than a bare map: `Local` follows the
/// element wherever it currently lives, `Home` always tracks it on its home
/// node regardless of migration. Neither mode is exercised by the mock
/// single-node-per-rank harness here; `ChainSet` itself is agnostic to which
/// is chosen, the mode only documents caller intent.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainSetLayout {
    Local,
    Home,
}

/// A collection of `DependentSendChain`s keyed by an arbitrary, typically
/// per-element, key.
pub struct ChainSet<K> {
    layout: ChainSetLayout,
    chains: BTreeMap<K, DependentSendChain>,
}

impl<K: Ord + Clone> ChainSet<K> {
    pub fn new(layout: ChainSetLayout) -> Self {
        ChainSet {
            layout,
            chains: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> ChainSetLayout {
        self.layout
    }

    pub fn add_index(&mut self, key: K) -> Result<(), CoreError> {
        if self.chains.contains_key(&key) {
            return Err(CoreError::ChainSetMisuse {
                reason: "add_index called with a key already present".into(),
            });
        }
        self.chains.insert(key, DependentSendChain::new());
        Ok(())
    }

    pub fn remove_index<T>(&mut self, manager: &EpochManager<T>, key: &K) -> Result<(), CoreError>
    where
        T: Transport + CollectiveOps,
    {
        let chain = self.chains.get(key).ok_or_else(|| CoreError::ChainSetMisuse {
            reason: "remove_index called with a key not present".into(),
        })?;
        if !chain.is_terminated(manager) {
            return Err(CoreError::ChainSetMisuse {
                reason: "remove_index called on a chain that has not terminated".into(),
            });
        }
        self.chains.remove(key);
        Ok(())
    }

    /// For each key: a fresh rooted DS epoch (cheap, no collective
    /// barrier), `fn(key)` runs with it current on the epoch stack, then
    /// `finishedEpoch` closes it and the resulting `PendingSend` is handed
    /// to that key's chain.
    pub fn next_step<T>(&mut self, manager: &mut EpochManager<T>, label: Option<&str>, mut f: impl FnMut(&K) -> PendingSend) -> quiesce_base::Result<()>
    where
        T: Transport + CollectiveOps,
    {
        let keys: Vec<K> = self.chains.keys().cloned().collect();
        for key in keys {
            let new_epoch = manager.make_epoch_rooted(label, EpochId::NO_EPOCH, false);
            manager.push_epoch(new_epoch);
            let pending = f(&key);
            manager.pop_epoch(new_epoch);
            manager.finished_epoch(new_epoch)?;
            let chain = self.chains.get_mut(&key).expect("key collected from self.chains above");
            chain.add(manager, new_epoch, pending);
        }
        Ok(())
    }

    /// One shared collective epoch for every key, for steps that cross keys
    /// arbitrarily and can only be bounded by a global barrier.
    pub fn next_step_collective<T>(&mut self, manager: &mut EpochManager<T>, label: Option<&str>, mut f: impl FnMut(&K) -> PendingSend) -> quiesce_base::Result<()>
    where
        T: Transport + CollectiveOps,
    {
        let epoch = manager.make_epoch_collective(label, EpochId::NO_EPOCH);
        manager.push_epoch(epoch);
        let keys: Vec<K> = self.chains.keys().cloned().collect();
        let pendings: Vec<(K, PendingSend)> = keys.into_iter().map(|key| {
            let p = f(&key);
            (key, p)
        }).collect();
        manager.pop_epoch(epoch);
        manager.finished_epoch(epoch)?;
        for (key, pending) in pendings {
            let chain = self.chains.get_mut(&key).expect("key collected from self.chains above");
            chain.add(manager, epoch, pending);
        }
        Ok(())
    }

    /// Every key in `a` must be present in `b`, or this fails with
    /// `ChainSetMergeMismatch` before anything is mutated. Opens one
    /// collective epoch as the parent of a per-key rooted epoch, and merges
    /// each shared key's chain step via `DependentSendChain::merge_chain_step`.
    pub fn merge_step_collective<T>(
        label: Option<&str>,
        a: &mut ChainSet<K>,
        b: &mut ChainSet<K>,
        manager: &mut EpochManager<T>,
        mut f: impl FnMut(&K) -> PendingSend,
    ) -> Result<(), CoreError>
    where
        T: Transport + CollectiveOps,
    {
        let keys: Vec<K> = a.chains.keys().cloned().collect();
        for key in &keys {
            if !b.chains.contains_key(key) {
                return Err(CoreError::ChainSetMergeMismatch);
            }
        }

        let parent = manager.make_epoch_collective(label, EpochId::NO_EPOCH);
        for key in keys {
            let new_epoch = manager.make_epoch_rooted(label, parent, false);
            manager.push_epoch(new_epoch);
            let pending = f(&key);
            manager.pop_epoch(new_epoch);
            manager.finished_epoch(new_epoch).map_err(|e| CoreError::ChainSetMisuse {
                reason: format!("finished_epoch failed during merge_step_collective: {e:?}"),
            })?;
            let a_chain = a.chains.get_mut(&key).expect("key collected from a.chains above");
            let b_chain = b.chains.get_mut(&key).expect("key present per the prefix check above");
            DependentSendChain::merge_chain_step(a_chain, b_chain, manager, new_epoch, pending);
        }
        manager.finished_epoch(parent).map_err(|e| CoreError::ChainSetMisuse {
            reason: format!("finished_epoch failed during merge_step_collective: {e:?}"),
        })?;
        Ok(())
    }

    /// Break long-lived dependency cycles between simulation phases: call
    /// `done()` on every chain.
    pub fn phase_done<T>(&mut self, manager: &mut EpochManager<T>)
    where
        T: Transport + CollectiveOps,
    {
        for chain in self.chains.values_mut() {
            chain.done(manager);
        }
    }

    pub fn foreach(&self, mut f: impl FnMut(&K, &DependentSendChain)) {
        for (k, c) in &self.chains {
            f(k, c);
        }
    }

    pub fn get_set(&self) -> impl Iterator<Item = &K> {
        self.chains.keys()
    }
}
