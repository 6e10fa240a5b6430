//! A multi-node test fixture: one `RuntimeContext` per simulated node, all
//! sharing one `InMemoryNetwork`, driven cooperatively from a single thread
//! (§5). This is the common driver the scenario tests in `quiesce-epoch` and
//! `quiesce-chain` hand-roll inline; `MultiNodeHarness` packages the same
//! pattern for reuse and for any future multi-node test.

use quiesce_epoch::{Delivered, EpochManager, RuntimeConfig};
use quiesce_net::mock::{InMemoryNetwork, NodeHandle};
use quiesce_net::{Envelope, NodeId};
use quiesce_sched::{QueueScheduler, RuntimeContext};

pub struct MultiNodeHarness {
    net: InMemoryNetwork,
    contexts: Vec<RuntimeContext<NodeHandle, QueueScheduler>>,
}

impl MultiNodeHarness {
    pub fn new(node_count: usize) -> Self {
        let net = InMemoryNetwork::new(node_count);
        let contexts = (0..node_count)
            .map(|n| {
                let node = NodeId::new(n as u32);
                let manager = EpochManager::new(node, RuntimeConfig::default(), net.handle(node));
                RuntimeContext::new(manager, QueueScheduler::new())
            })
            .collect();
        MultiNodeHarness { net, contexts }
    }

    pub fn node_count(&self) -> usize {
        self.contexts.len()
    }

    pub fn net(&self) -> &InMemoryNetwork {
        &self.net
    }

    pub fn manager(&self, node: NodeId) -> &EpochManager<NodeHandle> {
        self.contexts[node.as_u32() as usize].manager()
    }

    pub fn manager_mut(&mut self, node: NodeId) -> &mut EpochManager<NodeHandle> {
        self.contexts[node.as_u32() as usize].manager_mut()
    }

    pub fn context_mut(&mut self, node: NodeId) -> &mut RuntimeContext<NodeHandle, QueueScheduler> {
        &mut self.contexts[node.as_u32() as usize]
    }

    pub fn managers_mut(&mut self) -> impl Iterator<Item = &mut EpochManager<NodeHandle>> {
        self.contexts.iter_mut().map(|c| c.manager_mut())
    }

    /// Repeatedly drains every node's ready-queue and inbox until none of
    /// them have anything left to do. `on_app` is called for every delivered
    /// application-level envelope, with that node's manager borrowed
    /// mutably so the handler can reply in-line (e.g. `send_payload`) --
    /// this is why delivery is driven directly here rather than through
    /// each node's `Scheduler`: a work item queued on a `RuntimeContext`'s
    /// own scheduler can't soundly borrow that same context's manager back.
    pub fn pump(&mut self, mut on_app: impl FnMut(&mut EpochManager<NodeHandle>, NodeId, Envelope, Vec<u8>)) {
        loop {
            let mut progress = false;
            for n in 0..self.contexts.len() {
                let node = NodeId::new(n as u32);
                let manager = self.contexts[n].manager_mut();
                while let Some(action) = manager.take_ready_action() {
                    action();
                    progress = true;
                }
                while let Some((envelope, payload)) = self.net.try_recv(node) {
                    progress = true;
                    match manager.deliver(envelope, payload).expect("mock transport never produces malformed envelopes") {
                        Delivered::Handled => {}
                        Delivered::Application(envelope, payload) => on_app(manager, node, envelope, payload),
                    }
                }
            }
            if !progress {
                break;
            }
        }
    }

    pub fn all_idle(&self) -> bool {
        self.net.all_empty()
    }
}
