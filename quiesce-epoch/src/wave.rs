use quiesce_net::NodeId;
use std::collections::BTreeMap;

/// Mattern's four-counter termination detection, run collectively for a
/// single epoch. Every node keeps running totals of how many in-epoch
/// messages it has produced and consumed; the root periodically gathers a
/// snapshot of every node's totals and looks for two consecutive matched,
/// balanced snapshots.
#[derive(Clone, Debug, Default)]
pub struct WaveState {
    /// Cumulative count of in-epoch messages this node has sent (broadcasts
    /// count `n-1` times, per the message-layer hook contract).
    pub produced_total: u64,
    /// Cumulative count of in-epoch messages this node has received.
    pub consumed_total: u64,
    /// The wave round currently being gathered (root only; meaningless
    /// elsewhere but harmless to keep around).
    pub round: u32,
    /// Per-node reports collected for `round`, root only.
    pub reports: BTreeMap<NodeId, (u64, u64)>,
    /// The last *complete* wave's summed (produced, consumed), used to
    /// check for two consecutive matching snapshots.
    pub last_snapshot: Option<(u64, u64)>,
    pub running: bool,
    pub terminated: bool,
}

impl WaveState {
    pub fn produce(&mut self, n: u64) {
        self.produced_total += n;
    }

    pub fn consume(&mut self, n: u64) {
        self.consumed_total += n;
    }

    /// Root begins gathering a fresh round, starting from its own snapshot.
    pub fn begin_round(&mut self, self_node: NodeId) {
        self.round += 1;
        self.running = true;
        self.reports.clear();
        self.reports.insert(self_node, (self.produced_total, self.consumed_total));
    }

    pub fn record_report(&mut self, from: NodeId, produced: u64, consumed: u64) {
        self.reports.insert(from, (produced, consumed));
    }

    pub fn all_reported(&self, node_count: usize) -> bool {
        self.reports.len() == node_count
    }

    /// Sums the collected reports and checks Mattern's criterion: this
    /// round's (P, C) is balanced (P == C) and identical to the previous
    /// round's. Returns `Some((p, c))` with the summed snapshot either way,
    /// so the caller can decide whether to launch another round.
    pub fn evaluate_round(&mut self) -> (bool, (u64, u64)) {
        let p: u64 = self.reports.values().map(|(p, _)| *p).sum();
        let c: u64 = self.reports.values().map(|(_, c)| *c).sum();
        let snapshot = (p, c);
        let matched = p == c && self.last_snapshot == Some(snapshot);
        if matched {
            self.terminated = true;
            self.running = false;
        } else {
            self.last_snapshot = Some(snapshot);
        }
        (matched, snapshot)
    }
}
