use serde::{Deserialize, Serialize};

/// Wire payload carried by envelopes with `is_internal_termination_msg` set.
/// These never produce/consume on the application epoch they ride along
/// with; `EpochManager::deliver` intercepts and dispatches them before any
/// application handler would ever see them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ControlMsg {
    /// Root asking every node to report its cumulative (produced, consumed)
    /// snapshot for the given wave round.
    WaveRequest { round: u32 },
    /// A node's reply to a `WaveRequest`.
    WaveReport { round: u32, produced: u64, consumed: u64 },
    /// Broadcast by whichever node declared an epoch terminated (root for
    /// rooted/wave epochs) to every other node.
    Terminated,
    /// A DS node reporting to its engager that its local subtree has gone
    /// quiescent.
    DsEcho,
}

impl ControlMsg {
    pub fn encode(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("ControlMsg always serializes")
    }

    pub fn decode(bytes: &[u8]) -> quiesce_base::Result<ControlMsg> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
