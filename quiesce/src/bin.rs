//! Demo: a root broadcasts a handful of payloads into a collective epoch to
//! four simulated nodes and waits for every node to observe global
//! termination. Not a real deployment entry point -- a real binary would
//! wire `quiesce_net::Transport` to an actual network stack instead of the
//! in-memory mock; see SPEC_FULL.md §1/§6.

use quiesce_epoch::EpochId;
use quiesce_harness::MultiNodeHarness;
use quiesce_net::NodeId;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    const NODES: usize = 4;
    let mut harness = MultiNodeHarness::new(NODES);

    let mut epoch = EpochId::NO_EPOCH;
    for mgr in harness.managers_mut() {
        epoch = mgr.make_epoch_collective(Some("demo"), EpochId::NO_EPOCH);
    }
    tracing::info!(?epoch, "opened collective epoch");

    for payload in 0..5u8 {
        harness
            .manager_mut(NodeId::new(0))
            .broadcast_payload(epoch, vec![payload])
            .expect("broadcast from root");
    }

    harness.pump(|_mgr, node, _envelope, payload| {
        tracing::info!(%node, ?payload, "delivered application payload");
    });

    for mgr in harness.managers_mut() {
        mgr.finished_epoch(epoch).expect("finished_epoch");
    }
    harness.pump(|_, _, _, _| {});

    for n in 0..NODES {
        let node = NodeId::new(n as u32);
        tracing::info!(%node, status = ?harness.manager(node).is_epoch_terminated(epoch), "final status");
    }
}
