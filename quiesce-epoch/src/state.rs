use crate::ds::DsState;
use crate::id::EpochId;
use crate::wave::WaveState;
use quiesce_net::NodeId;
use std::collections::{BTreeMap, BTreeSet};

/// A registered callback, fired exactly once when the epoch it's attached to
/// is declared globally terminated. `unique` actions are deduplicated by
/// `key` (see `addActionUnique`); plain actions always fire once per
/// registration.
pub struct DeferredAction {
    pub key: Option<u64>,
    pub action: Box<dyn FnOnce() + 'static>,
}

/// Which algorithm is tracking this epoch's quiescence.
pub enum Detector {
    Wave(WaveState),
    Ds(DsState),
}

impl Detector {
    pub fn as_wave_ref(&self) -> Option<&WaveState> {
        match self {
            Detector::Wave(w) => Some(w),
            Detector::Ds(_) => None,
        }
    }

    pub fn as_wave_mut(&mut self) -> Option<&mut WaveState> {
        match self {
            Detector::Wave(w) => Some(w),
            Detector::Ds(_) => None,
        }
    }

    pub fn as_ds_ref(&self) -> Option<&DsState> {
        match self {
            Detector::Ds(d) => Some(d),
            Detector::Wave(_) => None,
        }
    }

    pub fn as_ds_mut(&mut self) -> Option<&mut DsState> {
        match self {
            Detector::Ds(d) => Some(d),
            Detector::Wave(_) => None,
        }
    }

    pub fn detector_terminated(&self) -> bool {
        match self {
            Detector::Wave(w) => w.terminated,
            Detector::Ds(d) => d.terminated,
        }
    }
}

/// Everything the manager tracks about one live epoch on this node.
pub struct EpochState {
    pub id: EpochId,
    pub label: Option<String>,
    pub parent: EpochId,
    pub children: BTreeSet<EpochId>,
    /// The application has locally committed to not originating more work
    /// in this epoch (`finishedEpoch` was called here).
    pub ready: bool,
    /// The detector declared global termination and the termination
    /// broadcast has been observed. Whether every child has *also*
    /// terminated is a separate question the manager answers by walking
    /// `children` (a child absent from its state table has necessarily
    /// already been released, which only happens once it was itself fully
    /// terminated) rather than a cached flag here, since that walk needs
    /// the manager's full state table, not just this one epoch's.
    pub finished: bool,
    pub produced: BTreeMap<NodeId, u64>,
    pub consumed: BTreeMap<NodeId, u64>,
    pub deferred_actions: Vec<DeferredAction>,
    pub detector: Detector,
}

impl EpochState {
    pub fn new(id: EpochId, label: Option<String>, parent: EpochId, detector: Detector) -> Self {
        EpochState {
            id,
            label,
            parent,
            children: BTreeSet::new(),
            ready: false,
            finished: false,
            produced: BTreeMap::new(),
            consumed: BTreeMap::new(),
            deferred_actions: Vec::new(),
            detector,
        }
    }

    pub fn produced_total(&self) -> u64 {
        self.produced.values().sum()
    }

    pub fn consumed_total(&self) -> u64 {
        self.consumed.values().sum()
    }
}
