use crate::envelope::Envelope;
use crate::node::NodeId;
use quiesce_base::Result;

/// The narrow surface the termination core needs from the active-messaging
/// transport. Framing, handler dispatch and retry policy all live outside
/// this crate; this trait only has to get an envelope + payload to a peer
/// (or to every peer) in send order.
pub trait Transport {
    fn local_node(&self) -> NodeId;
    fn node_count(&self) -> usize;

    fn send(&mut self, envelope: Envelope, payload: Vec<u8>) -> Result<()>;

    /// Equivalent to `node_count() - 1` sends, one to every other node.
    fn broadcast(&mut self, envelope: Envelope, payload: Vec<u8>) -> Result<()>;
}

/// The narrow surface the termination core needs from the collective layer.
/// Only a barrier is required: it is used to agree on the next generation
/// counter when creating a collective epoch, and again during epoch-window
/// compaction. A full reduce/broadcast tree implementation is out of scope;
/// the wave detector performs its own snapshot aggregation over ordinary
/// `Transport` messages rather than through this trait (see DESIGN.md).
pub trait CollectiveOps {
    fn barrier(&mut self);
}
