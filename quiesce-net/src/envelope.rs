use crate::node::NodeId;
use quiesce_base::Result;
use serde::{Deserialize, Serialize};

/// The wire-level header carried by every active message. `epoch_id` is the
/// raw bit pattern of an `EpochId` (quiesce-net does not depend on
/// quiesce-epoch, so it is opaque here); `quiesce-epoch` reinterprets it.
///
/// These three fields must stay bit-exact across nodes: `is_internal_termination_msg`
/// lets the termination core recognize its own control traffic (echoes, wave
/// requests/reports, termination broadcasts) so it does not recursively
/// produce/consume on the epoch it is trying to quiesce.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub src: NodeId,
    pub dst: NodeId,
    pub epoch_id: u64,
    pub is_broadcast: bool,
    pub is_internal_termination_msg: bool,
}

impl Envelope {
    pub fn new(src: NodeId, dst: NodeId, epoch_id: u64) -> Self {
        Envelope {
            src,
            dst,
            epoch_id,
            is_broadcast: false,
            is_internal_termination_msg: false,
        }
    }

    pub fn internal(mut self) -> Self {
        self.is_internal_termination_msg = true;
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.is_broadcast = true;
        self
    }

    /// Bit-exact wire encoding shared by every node, same msgpack stack the
    /// rest of this workspace uses for its wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_msgpack() {
        let env = Envelope::new(NodeId::new(0), NodeId::new(3), 0xdead_beef)
            .broadcast()
            .internal();
        let bytes = env.encode().unwrap();
        let back = Envelope::decode(&bytes).unwrap();
        assert_eq!(env, back);
    }
}
