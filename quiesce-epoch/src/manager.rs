use crate::config::RuntimeConfig;
use crate::error::CoreError;
use crate::id::{Category, EpochId};
use crate::protocol::ControlMsg;
use crate::state::{DeferredAction, Detector, EpochState};
use crate::wave::WaveState;
use crate::ds::DsState;
use crate::window::EpochWindow;
use quiesce_net::{CollectiveOps, Envelope, NodeId, Transport};
use std::collections::{BTreeMap, VecDeque};

/// Result of handing a received envelope to [`EpochManager::deliver`].
pub enum Delivered {
    /// The envelope was internal control traffic (wave round, DS echo,
    /// termination broadcast) and has already been fully handled.
    Handled,
    /// Not control traffic: an application-level message, already consumed
    /// against its epoch. The caller is responsible for dispatching it to
    /// whatever application handler is registered for it.
    Application(Envelope, Vec<u8>),
}

/// Outcome of `isEpochTerminated` (§4.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TermStatus {
    NotTerminated,
    /// Live state says this epoch has terminated.
    Terminated,
    /// No live state remains, but the epoch window shows it already ran to
    /// completion and was released -- i.e. it's a stale/late reference.
    WindowTerminated,
}

/// The termination-detection core for one node. Owns all locally-tracked
/// epoch state and the transport it uses to exchange wave/DS control
/// traffic; application code drives it by calling `make_epoch_*`,
/// `push_epoch`/`pop_epoch`, `produce`/`consume` (or the message-layer
/// `*_to`/`*_from` variants) and `finished_epoch`, and by feeding inbound
/// envelopes through `deliver`.
pub struct EpochManager<T> {
    node: NodeId,
    config: RuntimeConfig,
    transport: T,
    states: BTreeMap<EpochId, EpochState>,
    window: EpochWindow,
    epoch_stack: Vec<EpochId>,
    rooted_generation: BTreeMap<Category, u32>,
    collective_generation: BTreeMap<Category, u32>,
    any_epoch_produced: u64,
    any_epoch_consumed: u64,
    /// Actions handed to `add_action`/`add_action_unique` for an epoch that
    /// was already terminated at registration time. Drained by the
    /// scheduler one per task step, per the §5 ordering guarantee that such
    /// actions run on the *next* step rather than synchronously inline.
    ready_queue: VecDeque<Box<dyn FnOnce()>>,
}

impl<T> EpochManager<T>
where
    T: Transport + CollectiveOps,
{
    pub fn new(node: NodeId, config: RuntimeConfig, transport: T) -> Self {
        let mut mgr = EpochManager {
            node,
            config,
            transport,
            states: BTreeMap::new(),
            window: EpochWindow::new(),
            epoch_stack: Vec::new(),
            rooted_generation: BTreeMap::new(),
            collective_generation: BTreeMap::new(),
            any_epoch_produced: 0,
            any_epoch_consumed: 0,
            ready_queue: VecDeque::new(),
        };
        mgr.runtime_startup();
        mgr
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Pin `AnyEpoch` open for the lifetime of the runtime. Called once from
    /// `new`; the matching `runtime_shutdown` call is the caller's
    /// responsibility at teardown.
    pub fn runtime_startup(&mut self) {
        self.any_epoch_produced += 1;
    }

    pub fn runtime_shutdown(&mut self) {
        self.any_epoch_consumed += 1;
    }

    // --- epoch creation -------------------------------------------------

    /// Create a collective epoch. Every node must call this in the same
    /// relative order with the same `parent`; the generation counter is
    /// advanced identically everywhere by call discipline, backed by a
    /// collective barrier (§4.2, §5).
    pub fn make_epoch_collective(&mut self, label: Option<&str>, parent: EpochId) -> EpochId {
        self.compact();
        self.transport.barrier();
        let gen = self.collective_generation.entry(Category::Wave).or_insert(0);
        *gen += 1;
        let id = EpochId::make_collective(Category::Wave, *gen);
        self.register_new_epoch(id, label, parent, Detector::Wave(WaveState::default()));
        id
    }

    /// Create a rooted epoch owned by this node. `use_ds` is the caller's
    /// preference; it is overridden to DS when this node already has more
    /// than `config.ds_backpressure_threshold` live rooted epochs (§5).
    pub fn make_epoch_rooted(&mut self, label: Option<&str>, parent: EpochId, use_ds: bool) -> EpochId {
        self.compact();
        let forced_ds = self.live_rooted_epochs() > self.config.ds_backpressure_threshold;
        let category = if use_ds || forced_ds { Category::Ds } else { Category::Wave };
        let gen = self.rooted_generation.entry(category).or_insert(0);
        *gen += 1;
        let id = EpochId::make_rooted(self.node, category, *gen);
        let detector = match category {
            Category::Ds => Detector::Ds(DsState::default()),
            _ => Detector::Wave(WaveState::default()),
        };
        self.register_new_epoch(id, label, parent, detector);
        id
    }

    fn register_new_epoch(&mut self, id: EpochId, label: Option<&str>, parent: EpochId, detector: Detector) {
        let state = EpochState::new(id, label.map(str::to_owned), parent, detector);
        self.states.insert(id, state);
        self.link_parent_child(parent, id);
    }

    /// Record `child` as a dependency of `parent`: `parent` cannot be fully
    /// released until `child` has also terminated (§4.4). A no-op if
    /// `parent` is `NoEpoch` or has already been released -- the latter is
    /// exactly the case `quiesce-chain`'s reset sentinel hits on its first
    /// `add`, and there is nothing left to link against.
    pub fn add_dependency(&mut self, parent: EpochId, child: EpochId) {
        self.link_parent_child(parent, child);
    }

    fn link_parent_child(&mut self, parent: EpochId, child: EpochId) {
        if parent == EpochId::NO_EPOCH {
            return;
        }
        if let Some(p) = self.states.get_mut(&parent) {
            p.children.insert(child);
        }
    }

    fn live_rooted_epochs(&self) -> usize {
        self.states.keys().filter(|&&id| id.is_rooted() && !self.is_fully_terminated(id)).count()
    }

    /// Whether `id`'s local detector has confirmed termination *and* every
    /// child linked under it is, recursively, also fully terminated. A
    /// child missing from `states` has necessarily already been released by
    /// `release_one`, which never runs before this was already true for it,
    /// so absence counts as terminated.
    fn is_fully_terminated(&self, id: EpochId) -> bool {
        match self.states.get(&id) {
            Some(state) => state.finished && self.children_fully_terminated(id),
            None => true,
        }
    }

    fn children_fully_terminated(&self, id: EpochId) -> bool {
        match self.states.get(&id) {
            Some(state) => state.children.iter().all(|&c| self.is_fully_terminated(c)),
            None => true,
        }
    }

    // --- current-epoch stack ---------------------------------------------

    pub fn push_epoch(&mut self, id: EpochId) {
        self.epoch_stack.push(id);
    }

    pub fn pop_epoch(&mut self, id: EpochId) {
        match self.epoch_stack.pop() {
            Some(top) if top == id => {}
            Some(top) => CoreError::invalid_epoch_use(
                id,
                None,
                format!("pop_epoch does not match top-of-stack {top:?}"),
            )
            .fatal(),
            None => CoreError::invalid_epoch_use(id, None, "pop_epoch called on an empty epoch stack").fatal(),
        }
    }

    pub fn current_epoch(&self) -> EpochId {
        self.epoch_stack.last().copied().unwrap_or(EpochId::NO_EPOCH)
    }

    // --- finishing --------------------------------------------------------

    /// Locally commit to never producing more work into `id`. Idempotent: a
    /// second call is a no-op (§4.4).
    pub fn finished_epoch(&mut self, id: EpochId) -> quiesce_base::Result<()> {
        if id == EpochId::NO_EPOCH || id == EpochId::ANY_EPOCH {
            return Ok(());
        }
        let already_ready = self.states.get(&id).map_or(true, |s| s.ready);
        if already_ready {
            return Ok(());
        }
        self.states.get_mut(&id).unwrap().ready = true;
        self.try_begin_termination_check(id)
    }

    /// If `id` is locally finished, give its detector a chance to notice
    /// global termination: check DS root quiescence, or launch a wave round.
    /// This is purely about this epoch's own produce/consume balance --
    /// nested children (§4.4) gate *release* (`compact`/`release_one`), not this check,
    /// so a chain step's callback isn't held hostage by its successor.
    fn try_begin_termination_check(&mut self, id: EpochId) -> quiesce_base::Result<()> {
        let Some(state) = self.states.get(&id) else {
            return Ok(());
        };
        if !state.ready {
            return Ok(());
        }
        match id.category() {
            Category::Ds => {
                if id.is_rooted() && id.creator() == self.node {
                    self.after_ds_update(id)?;
                }
                Ok(())
            }
            _ => {
                if Self::wave_root(id) == self.node {
                    let running = self
                        .states
                        .get(&id)
                        .and_then(|s| s.detector.as_wave_ref())
                        .map_or(false, |w| w.running);
                    if !running {
                        self.launch_wave_round(id)?;
                    }
                }
                Ok(())
            }
        }
    }

    fn wave_root(id: EpochId) -> NodeId {
        if id.is_rooted() {
            id.creator()
        } else {
            NodeId::new(0)
        }
    }

    // --- produce / consume --------------------------------------------------

    /// Convenience for local-only bookkeeping (the peer is this node
    /// itself). Real cross-node traffic should go through `send_payload` /
    /// `broadcast_payload`, which call `produce_to` for the right peer.
    pub fn produce(&mut self, id: EpochId, n: u64) -> quiesce_base::Result<()> {
        let node = self.node;
        self.produce_to(id, node, n)
    }

    pub fn consume(&mut self, id: EpochId, n: u64) -> quiesce_base::Result<()> {
        let node = self.node;
        self.consume_from(id, node, n)
    }

    /// Message-layer hook: call once per outgoing in-epoch message, with the
    /// actual destination. Fatal (`InvalidEpochUse`) if `id` was already
    /// finished locally -- producing into an epoch you've promised not to
    /// extend is a programmer error (§7).
    pub fn produce_to(&mut self, id: EpochId, dest: NodeId, n: u64) -> quiesce_base::Result<()> {
        if id == EpochId::NO_EPOCH {
            return Ok(());
        }
        if id == EpochId::ANY_EPOCH {
            self.any_epoch_produced += n;
            return Ok(());
        }
        if let Some(s) = self.states.get(&id) {
            if s.ready {
                return Err(CoreError::invalid_epoch_use(
                    id,
                    s.label.as_deref(),
                    "produce called after finishedEpoch",
                )
                .into());
            }
        }
        let is_ds = {
            let state = self.get_or_create_state(id);
            let first_to_dest = state.produced.get(&dest).copied().unwrap_or(0) == 0;
            *state.produced.entry(dest).or_insert(0) += n;
            match &mut state.detector {
                Detector::Wave(w) => {
                    w.produce(n);
                    false
                }
                Detector::Ds(d) => {
                    let is_new_child = first_to_dest && d.engager != Some(dest);
                    d.on_produce(dest, is_new_child);
                    true
                }
            }
        };
        if is_ds {
            self.after_ds_update(id)?;
        }
        Ok(())
    }

    /// Message-layer hook: call once per incoming in-epoch message, with the
    /// actual sender. Unlike `produce_to`, this is never rejected once the
    /// epoch is finished locally: messages already in flight when
    /// `finishedEpoch` was called still have to be consumed for the detector
    /// to balance.
    pub fn consume_from(&mut self, id: EpochId, src: NodeId, n: u64) -> quiesce_base::Result<()> {
        if id == EpochId::NO_EPOCH {
            return Ok(());
        }
        if id == EpochId::ANY_EPOCH {
            self.any_epoch_consumed += n;
            return Ok(());
        }
        let is_ds = {
            let state = self.get_or_create_state(id);
            *state.consumed.entry(src).or_insert(0) += n;
            match &mut state.detector {
                Detector::Wave(w) => {
                    w.consume(n);
                    false
                }
                Detector::Ds(d) => {
                    d.on_consume(src);
                    true
                }
            }
        };
        if is_ds {
            self.after_ds_update(id)?;
        }
        Ok(())
    }

    fn get_or_create_state(&mut self, id: EpochId) -> &mut EpochState {
        self.states.entry(id).or_insert_with(|| {
            let detector = match id.category() {
                Category::Ds => Detector::Ds(DsState::default()),
                _ => Detector::Wave(WaveState::default()),
            };
            EpochState::new(id, None, EpochId::NO_EPOCH, detector)
        })
    }

    // --- deferred actions ---------------------------------------------------

    pub fn add_action(&mut self, id: EpochId, action: impl FnOnce() + 'static) {
        self.add_action_inner(id, None, Box::new(action));
    }

    /// Like `add_action`, but deduplicated by `key`: a second registration
    /// with the same key against the same epoch is silently dropped rather
    /// than firing twice. Used by `quiesce-chain` to guard against a
    /// pending send being linked onto the same epoch more than once.
    pub fn add_action_unique(&mut self, id: EpochId, key: u64, action: impl FnOnce() + 'static) {
        self.add_action_inner(id, Some(key), Box::new(action));
    }

    fn add_action_inner(&mut self, id: EpochId, key: Option<u64>, action: Box<dyn FnOnce()>) {
        if !matches!(self.is_epoch_terminated(id), TermStatus::NotTerminated) {
            self.ready_queue.push_back(action);
            return;
        }
        let state = self.get_or_create_state(id);
        if let Some(k) = key {
            if state.deferred_actions.iter().any(|a| a.key == Some(k)) {
                return;
            }
        }
        state.deferred_actions.push(DeferredAction { key, action });
    }

    /// Pop one action that was registered against an already-terminated
    /// epoch. The scheduler runs at most one of these per task step.
    pub fn take_ready_action(&mut self) -> Option<Box<dyn FnOnce()>> {
        self.ready_queue.pop_front()
    }

    pub fn has_ready_actions(&self) -> bool {
        !self.ready_queue.is_empty()
    }

    pub fn is_epoch_terminated(&self, id: EpochId) -> TermStatus {
        if id == EpochId::NO_EPOCH {
            return TermStatus::Terminated;
        }
        if id == EpochId::ANY_EPOCH {
            return if self.any_epoch_produced == self.any_epoch_consumed {
                TermStatus::Terminated
            } else {
                TermStatus::NotTerminated
            };
        }
        if self.states.contains_key(&id) {
            if self.is_fully_terminated(id) {
                TermStatus::Terminated
            } else {
                TermStatus::NotTerminated
            }
        } else if self.window.contains(id) {
            TermStatus::WindowTerminated
        } else {
            TermStatus::NotTerminated
        }
    }

    // --- termination plumbing -----------------------------------------------

    /// Marks `id` finished and fires its deferred actions. Deliberately
    /// leaves the live state resident afterwards: `is_epoch_terminated` must
    /// keep answering `Terminated` from it, not fall through to the window,
    /// until some later `compact()` pass actually reclaims it (§4.6). Firing
    /// happens here, synchronously, the moment the detector converges --
    /// release is a wholly separate, lazy concern.
    fn declare_terminated(&mut self, id: EpochId) -> quiesce_base::Result<()> {
        let fired = {
            let state = match self.states.get_mut(&id) {
                Some(s) => s,
                None => return Ok(()),
            };
            if state.finished {
                return Ok(());
            }
            state.finished = true;
            match &mut state.detector {
                Detector::Wave(w) => w.terminated = true,
                Detector::Ds(d) => d.terminated = true,
            }
            std::mem::take(&mut state.deferred_actions)
        };
        for DeferredAction { action, .. } in fired {
            action();
        }
        Ok(())
    }

    /// Reclaims live state for every epoch that is currently releasable
    /// (§4.6): fully terminated, with every child also fully terminated.
    /// Release never happens inline with `declare_terminated` -- a just-
    /// terminated epoch keeps answering `Terminated` from its resident state
    /// indefinitely, until a caller runs a compaction pass such as this one.
    /// `make_epoch_rooted`/`make_epoch_collective` call this opportunistically
    /// before minting a new id in the same lane; a scheduler or harness may
    /// also call it at an idle point to bound memory use.
    pub fn compact(&mut self) {
        let ids: Vec<EpochId> = self.states.keys().copied().collect();
        let releasable: Vec<EpochId> = ids.into_iter().filter(|&id| self.is_fully_terminated(id)).collect();
        for id in releasable {
            self.release_one(id);
        }
    }

    /// Releases `id`'s live state if it is still present and releasable,
    /// folding it into the window, then recurses into its parent, since the
    /// parent may itself become releasable right now that one more of its
    /// children is gone. A child's release can only ever unblock its
    /// parent's *release*, never the parent's own detector declare, which
    /// `try_begin_termination_check` already ran independently.
    fn release_one(&mut self, id: EpochId) {
        let Some(state) = self.states.get(&id) else { return };
        if !(state.finished && self.children_fully_terminated(id)) {
            return;
        }
        let parent = self.states.get(&id).unwrap().parent;
        self.states.remove(&id);
        self.window.insert(id);
        if parent != EpochId::NO_EPOCH {
            if let Some(p) = self.states.get_mut(&parent) {
                p.children.remove(&id);
            }
            self.release_one(parent);
        }
    }

    fn after_ds_update(&mut self, id: EpochId) -> quiesce_base::Result<()> {
        let is_root = id.is_rooted() && id.creator() == self.node;
        let Some(state) = self.states.get(&id) else { return Ok(()) };
        let Some(d) = state.detector.as_ds_ref() else { return Ok(()) };
        let d = d.clone();
        let ready = state.ready;
        if is_root {
            if ready && d.root_quiescent() && !d.terminated {
                self.declare_ds_terminated(id)?;
            }
        } else if d.should_echo() {
            let engager = d
                .engager
                .expect("should_echo implies engaged, which always sets an engager");
            self.send_control(engager, id, ControlMsg::DsEcho)?;
            self.states
                .get_mut(&id)
                .unwrap()
                .detector
                .as_ds_mut()
                .unwrap()
                .disengage();
        }
        Ok(())
    }

    fn declare_ds_terminated(&mut self, id: EpochId) -> quiesce_base::Result<()> {
        self.broadcast_control(id, ControlMsg::Terminated)?;
        self.declare_terminated(id)
    }

    fn launch_wave_round(&mut self, id: EpochId) -> quiesce_base::Result<()> {
        let self_node = self.node;
        let round = {
            let state = self
                .states
                .get_mut(&id)
                .expect("launch_wave_round requires existing epoch state");
            let w = state
                .detector
                .as_wave_mut()
                .expect("launch_wave_round called on a non-wave epoch");
            w.begin_round(self_node);
            w.round
        };
        self.broadcast_control(id, ControlMsg::WaveRequest { round })?;
        self.check_wave_round(id)
    }

    fn check_wave_round(&mut self, id: EpochId) -> quiesce_base::Result<()> {
        let node_count = self.transport.node_count();
        let ready = self
            .states
            .get(&id)
            .and_then(|s| s.detector.as_wave_ref())
            .map_or(false, |w| w.all_reported(node_count));
        if !ready {
            return Ok(());
        }
        let matched = {
            let state = self.states.get_mut(&id).unwrap();
            let w = state.detector.as_wave_mut().unwrap();
            w.evaluate_round().0
        };
        if matched {
            self.on_wave_terminated(id)
        } else {
            self.launch_wave_round(id)
        }
    }

    fn on_wave_terminated(&mut self, id: EpochId) -> quiesce_base::Result<()> {
        self.broadcast_control(id, ControlMsg::Terminated)?;
        self.declare_terminated(id)
    }

    // --- message delivery ---------------------------------------------------

    fn send_control(&mut self, dest: NodeId, id: EpochId, msg: ControlMsg) -> quiesce_base::Result<()> {
        let envelope = Envelope::new(self.node, dest, id.to_bits()).internal();
        self.transport.send(envelope, msg.encode())
    }

    fn broadcast_control(&mut self, id: EpochId, msg: ControlMsg) -> quiesce_base::Result<()> {
        let envelope = Envelope::new(self.node, self.node, id.to_bits()).internal();
        self.transport.broadcast(envelope, msg.encode())
    }

    /// Send one application payload stamped with `id`, producing into it
    /// first. The pairing with `produce_to` is what makes this the one
    /// sanctioned way to originate in-epoch traffic.
    pub fn send_payload(&mut self, dest: NodeId, id: EpochId, payload: Vec<u8>) -> quiesce_base::Result<()> {
        self.produce_to(id, dest, 1)?;
        let envelope = Envelope::new(self.node, dest, id.to_bits());
        self.transport.send(envelope, payload)
    }

    /// Broadcast one application payload stamped with `id`. Equivalent to
    /// `node_count() - 1` calls to `produce_to` followed by one transport
    /// broadcast.
    pub fn broadcast_payload(&mut self, id: EpochId, payload: Vec<u8>) -> quiesce_base::Result<()> {
        let n = self.transport.node_count();
        for dst in 0..n {
            let dst = NodeId::new(dst as u32);
            if dst == self.node {
                continue;
            }
            self.produce_to(id, dst, 1)?;
        }
        let envelope = Envelope::new(self.node, self.node, id.to_bits()).broadcast();
        self.transport.broadcast(envelope, payload)
    }

    /// Hand a received envelope to the termination core. Drops it outright
    /// if it's a late/duplicate arrival for an already-windowed epoch (§4.6);
    /// otherwise either fully handles internal control traffic or consumes
    /// against the epoch and hands the envelope back for application
    /// dispatch.
    pub fn deliver(&mut self, envelope: Envelope, payload: Vec<u8>) -> quiesce_base::Result<Delivered> {
        let id = EpochId::from_bits(envelope.epoch_id);
        if id != EpochId::NO_EPOCH && id != EpochId::ANY_EPOCH && self.window.contains(id) {
            return Ok(Delivered::Handled);
        }
        if envelope.is_internal_termination_msg {
            let msg = ControlMsg::decode(&payload)?;
            self.handle_control(envelope.src, id, msg)?;
            Ok(Delivered::Handled)
        } else {
            self.consume_from(id, envelope.src, 1)?;
            Ok(Delivered::Application(envelope, payload))
        }
    }

    fn handle_control(&mut self, from: NodeId, id: EpochId, msg: ControlMsg) -> quiesce_base::Result<()> {
        match msg {
            ControlMsg::WaveRequest { round } => self.on_wave_request(id, from, round),
            ControlMsg::WaveReport { round, produced, consumed } => {
                self.on_wave_report(id, from, round, produced, consumed)
            }
            ControlMsg::Terminated => self.declare_terminated(id),
            ControlMsg::DsEcho => self.on_ds_echo(id, from),
        }
    }

    fn on_wave_request(&mut self, id: EpochId, from: NodeId, round: u32) -> quiesce_base::Result<()> {
        let (produced, consumed) = self
            .states
            .get(&id)
            .and_then(|s| s.detector.as_wave_ref())
            .map_or((0, 0), |w| (w.produced_total, w.consumed_total));
        self.send_control(from, id, ControlMsg::WaveReport { round, produced, consumed })
    }

    fn on_wave_report(
        &mut self,
        id: EpochId,
        from: NodeId,
        round: u32,
        produced: u64,
        consumed: u64,
    ) -> quiesce_base::Result<()> {
        let stale = self
            .states
            .get(&id)
            .and_then(|s| s.detector.as_wave_ref())
            .map_or(true, |w| w.round != round || !w.running);
        if stale {
            return Ok(());
        }
        if let Some(w) = self.states.get_mut(&id).and_then(|s| s.detector.as_wave_mut()) {
            w.record_report(from, produced, consumed);
        }
        self.check_wave_round(id)
    }

    fn on_ds_echo(&mut self, id: EpochId, from: NodeId) -> quiesce_base::Result<()> {
        if let Some(d) = self.states.get_mut(&id).and_then(|s| s.detector.as_ds_mut()) {
            d.on_echo(from);
        } else {
            return Ok(());
        }
        self.after_ds_update(id)
    }

    /// Snapshot of every live epoch's bookkeeping, for tests and debugging
    /// (§7 observability).
    pub fn dump_state(&self) -> Vec<String> {
        self.states
            .values()
            .map(|s| {
                format!(
                    "{:?} label={:?} ready={} finished={} children_done={} produced={} consumed={}",
                    s.id,
                    s.label,
                    s.ready,
                    s.finished,
                    self.children_fully_terminated(s.id),
                    s.produced_total(),
                    s.consumed_total(),
                )
            })
            .collect()
    }
}
