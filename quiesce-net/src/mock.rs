//! An in-memory stand-in for the active-message transport and collective
//! layer, used by the test harness and by this workspace's own tests. It
//! preserves the one guarantee the core actually relies on: messages from a
//! given source to a given destination are delivered in send order.

use crate::envelope::Envelope;
use crate::node::NodeId;
use crate::transport::{CollectiveOps, Transport};
use quiesce_base::Result;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct Bus {
    num_nodes: usize,
    // One inbox per destination node. Since all sends are appended in the
    // order the (single-threaded) test driver issues them, and nothing ever
    // reorders an inbox, the per-(src,dst) FIFO subsequence is preserved.
    inboxes: Vec<VecDeque<(Envelope, Vec<u8>)>>,
    barrier_epoch: u32,
}

impl Bus {
    fn new(num_nodes: usize) -> Self {
        Bus {
            num_nodes,
            inboxes: (0..num_nodes).map(|_| VecDeque::new()).collect(),
            barrier_epoch: 0,
        }
    }
}

/// Shared mock network reachable by every simulated node. Cheap to clone
/// (it's a handle), not `Send`/`Sync`: the whole point is that one thread
/// drives every node's `RuntimeContext` cooperatively, so no synchronization
/// is needed (see SPEC_FULL.md §5).
#[derive(Clone)]
pub struct InMemoryNetwork {
    bus: Rc<RefCell<Bus>>,
}

impl InMemoryNetwork {
    pub fn new(num_nodes: usize) -> Self {
        InMemoryNetwork {
            bus: Rc::new(RefCell::new(Bus::new(num_nodes))),
        }
    }

    pub fn node_count(&self) -> usize {
        self.bus.borrow().num_nodes
    }

    /// A `Transport` + `CollectiveOps` handle scoped to one node.
    pub fn handle(&self, node: NodeId) -> NodeHandle {
        NodeHandle {
            net: self.clone(),
            node,
        }
    }

    /// Pop the next message addressed to `node`, if any. Used by the test
    /// harness / scheduler to turn "mail in an inbox" into a runnable work
    /// item.
    pub fn try_recv(&self, node: NodeId) -> Option<(Envelope, Vec<u8>)> {
        self.bus.borrow_mut().inboxes[node.as_u32() as usize].pop_front()
    }

    pub fn is_empty(&self, node: NodeId) -> bool {
        self.bus.borrow().inboxes[node.as_u32() as usize].is_empty()
    }

    pub fn all_empty(&self) -> bool {
        self.bus.borrow().inboxes.iter().all(VecDeque::is_empty)
    }
}

/// One node's view of an [`InMemoryNetwork`].
pub struct NodeHandle {
    net: InMemoryNetwork,
    node: NodeId,
}

impl Transport for NodeHandle {
    fn local_node(&self) -> NodeId {
        self.node
    }

    fn node_count(&self) -> usize {
        self.net.node_count()
    }

    fn send(&mut self, envelope: Envelope, payload: Vec<u8>) -> Result<()> {
        let dst = envelope.dst.as_u32() as usize;
        self.net.bus.borrow_mut().inboxes[dst].push_back((envelope, payload));
        Ok(())
    }

    fn broadcast(&mut self, envelope: Envelope, payload: Vec<u8>) -> Result<()> {
        let n = self.net.node_count();
        for dst in 0..n {
            if dst as u32 == self.node.as_u32() {
                continue;
            }
            let mut env = envelope;
            env.dst = NodeId::new(dst as u32);
            env.is_broadcast = true;
            self.net.bus.borrow_mut().inboxes[dst].push_back((env, payload.clone()));
        }
        Ok(())
    }
}

impl CollectiveOps for NodeHandle {
    fn barrier(&mut self) {
        // All nodes call this in the same relative order from the single
        // test-driver thread, so a shared monotone counter is enough to
        // model the synchronization point without real message exchange.
        self.net.bus.borrow_mut().barrier_epoch += 1;
    }
}
