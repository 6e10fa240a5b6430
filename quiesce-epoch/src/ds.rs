use quiesce_net::NodeId;
use std::collections::BTreeSet;

/// Dijkstra-Scholten deficit counting for a rooted epoch's dynamically-formed
/// engagement tree. `deficit` is this node's own produced-minus-consumed
/// in-epoch message count, incremented on every outgoing message and
/// decremented on every incoming one. `awaiting_echo` is a separate, tree-
/// shaped overlay: it tracks peers this node engaged for the first time
/// (other than the peer that engaged *this* node) and has not yet received
/// an echo from. A node with `deficit == 0` and an empty `awaiting_echo`,
/// once engaged, can echo to whoever engaged it.
#[derive(Clone, Debug, Default)]
pub struct DsState {
    pub deficit: i64,
    /// The peer whose message first engaged this node in this epoch, if any.
    pub engager: Option<NodeId>,
    pub engaged: bool,
    /// Peers this node has sent a first in-epoch message to and has not yet
    /// received an echo back from. Tracked for diagnostics/invariant checks;
    /// the termination condition itself only needs `deficit == 0`.
    pub awaiting_echo: BTreeSet<NodeId>,
    pub terminated: bool,
}

impl DsState {
    /// Record an outgoing in-epoch message to `dest`. `is_new_child` is
    /// whether this message newly engages `dest` as this node's child in the
    /// tree: the first in-epoch message to `dest`, *and* `dest` is not the
    /// peer that engaged this node (replying to one's own engager is not a
    /// new engagement, and owes no echo). The caller works this out from its
    /// per-peer produced counts and this node's `engager`.
    pub fn on_produce(&mut self, dest: NodeId, is_new_child: bool) {
        self.deficit += 1;
        if is_new_child {
            self.awaiting_echo.insert(dest);
        }
    }

    /// Record an incoming in-epoch message from `src`. Engages this node if
    /// it wasn't already engaged.
    pub fn on_consume(&mut self, src: NodeId) {
        self.deficit -= 1;
        if !self.engaged {
            self.engaged = true;
            self.engager = Some(src);
        }
    }

    /// Record an echo from a child this node previously engaged. Only
    /// clears the tree-overlay bookkeeping; `deficit` already balances
    /// produce against consume independently of the echo protocol.
    pub fn on_echo(&mut self, from: NodeId) {
        self.awaiting_echo.remove(&from);
    }

    /// Whether this (non-root) node should now echo back to its engager:
    /// engaged, locally balanced, and every child it engaged has echoed.
    pub fn should_echo(&self) -> bool {
        self.engaged && self.deficit == 0 && self.awaiting_echo.is_empty()
    }

    /// Called after sending the echo: this node goes back to Unengaged and
    /// may be re-engaged by a later, unrelated first message.
    pub fn disengage(&mut self) {
        self.engaged = false;
        self.engager = None;
    }

    /// Root-only termination check: no outstanding deficit and nothing
    /// awaiting echo.
    pub fn root_quiescent(&self) -> bool {
        self.deficit == 0 && self.awaiting_echo.is_empty()
    }
}
