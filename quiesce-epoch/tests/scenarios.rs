//! End-to-end scenario tests driving several `EpochManager`s over a shared
//! `InMemoryNetwork`, one thread playing every node cooperatively (no
//! scheduler needed here -- that lives in `quiesce-sched`/`quiesce-harness`;
//! this crate's tests only need to pump messages to quiescence).

use quiesce_epoch::{Delivered, EpochId, EpochManager, RuntimeConfig};
use quiesce_net::mock::{InMemoryNetwork, NodeHandle};
use quiesce_net::{Envelope, NodeId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cell::Cell;
use std::rc::Rc;

fn managers(net: &InMemoryNetwork) -> Vec<EpochManager<NodeHandle>> {
    (0..net.node_count())
        .map(|i| EpochManager::new(NodeId::new(i as u32), RuntimeConfig::default(), net.handle(NodeId::new(i as u32))))
        .collect()
}

/// Drain every node's inbox until none makes progress, handing each
/// application-level delivery to `on_app` (internal control traffic is
/// already fully handled by `deliver` itself). `on_app` may itself call back
/// into the manager it's given (e.g. to forward or reply), and those sends
/// will be picked up by a later pass of this same loop.
fn pump(
    net: &InMemoryNetwork,
    mgrs: &mut [EpochManager<NodeHandle>],
    mut on_app: impl FnMut(&mut EpochManager<NodeHandle>, usize, Envelope, Vec<u8>),
) {
    loop {
        let mut progressed = false;
        for i in 0..mgrs.len() {
            let node = NodeId::new(i as u32);
            while let Some((env, payload)) = net.try_recv(node) {
                progressed = true;
                match mgrs[i].deliver(env, payload).unwrap() {
                    Delivered::Handled => {}
                    Delivered::Application(env, payload) => on_app(&mut mgrs[i], i, env, payload),
                }
            }
        }
        if !progressed {
            break;
        }
    }
}

#[test]
fn broadcast_quiescence() {
    let net = InMemoryNetwork::new(4);
    let mut mgrs = managers(&net);

    let mut e = EpochId::NO_EPOCH;
    for mgr in mgrs.iter_mut() {
        e = mgr.make_epoch_collective(Some("broadcast"), EpochId::NO_EPOCH);
    }

    let fired: Vec<Rc<Cell<u32>>> = (0..4).map(|_| Rc::new(Cell::new(0))).collect();
    for (i, mgr) in mgrs.iter_mut().enumerate() {
        let counter = fired[i].clone();
        mgr.add_action(e, move || counter.set(counter.get() + 1));
    }

    for _ in 0..5 {
        mgrs[0].broadcast_payload(e, vec![0xAB]).unwrap();
    }
    pump(&net, &mut mgrs, |_, _, _, _| {});

    for mgr in mgrs.iter() {
        mgr.finished_epoch(e).unwrap();
    }
    pump(&net, &mut mgrs, |_, _, _, _| {});

    for mgr in mgrs.iter() {
        assert_eq!(mgr.is_epoch_terminated(e), quiesce_epoch::TermStatus::Terminated);
    }
    for counter in &fired {
        assert_eq!(counter.get(), 1, "addAction callback must fire exactly once");
    }
}

#[test]
fn rooted_ds_routing() {
    let net = InMemoryNetwork::new(3);
    let mut mgrs = managers(&net);

    let r = mgrs[0].make_epoch_rooted(Some("R"), EpochId::NO_EPOCH, true);
    mgrs[0].send_payload(NodeId::new(1), r, vec![0]).unwrap();
    mgrs[0].finished_epoch(r).unwrap();

    let node1_hops = Cell::new(0u32);
    pump(&net, &mut mgrs, |mgr, idx, _env, payload| match idx {
        1 => {
            let n = node1_hops.get();
            node1_hops.set(n + 1);
            if n == 0 {
                mgr.send_payload(NodeId::new(2), r, payload).unwrap();
            } else {
                mgr.send_payload(NodeId::new(0), r, payload).unwrap();
            }
        }
        2 => mgr.send_payload(NodeId::new(1), r, payload).unwrap(),
        0 => {}
        _ => unreachable!(),
    });

    assert_eq!(node1_hops.get(), 2, "node 1 relays once forward and once back");
    for mgr in mgrs.iter() {
        assert_eq!(mgr.is_epoch_terminated(r), quiesce_epoch::TermStatus::Terminated);
    }
}

#[test]
fn nested_collective() {
    const N: usize = 4;
    let net = InMemoryNetwork::new(N);
    let mut mgrs = managers(&net);

    let mut p = EpochId::NO_EPOCH;
    for mgr in mgrs.iter_mut() {
        p = mgr.make_epoch_collective(Some("P"), EpochId::NO_EPOCH);
    }

    // Each node roots its own inner epoch as a child of P, and round-trips
    // three ping/pong exchanges with its ring neighbor.
    let mut c: Vec<EpochId> = Vec::with_capacity(N);
    for mgr in mgrs.iter_mut() {
        c.push(mgr.make_epoch_rooted(Some("C"), p, true));
    }

    const PING: u8 = 0;
    const PONG: u8 = 1;
    for _round in 0..3 {
        for i in 0..N {
            let neighbor = NodeId::new(((i + 1) % N) as u32);
            mgrs[i].send_payload(neighbor, c[i], vec![PING]).unwrap();
        }
        pump(&net, &mut mgrs, |mgr, idx, env, payload| {
            if payload == [PING] {
                mgr.send_payload(env.src, EpochId::from_bits(env.epoch_id), vec![PONG]).unwrap();
            } else {
                // PONG back to the root of its own C_idx; nothing further to do.
                let _ = idx;
            }
        });
    }

    for i in 0..N {
        mgrs[i].finished_epoch(c[i]).unwrap();
    }
    pump(&net, &mut mgrs, |_, _, _, _| {});

    for (i, mgr) in mgrs.iter().enumerate() {
        assert_eq!(
            mgr.is_epoch_terminated(c[i]),
            quiesce_epoch::TermStatus::Terminated,
            "inner epoch for node {i} must terminate before the outer one"
        );
    }

    for mgr in mgrs.iter_mut() {
        mgr.finished_epoch(p).unwrap();
    }
    pump(&net, &mut mgrs, |_, _, _, _| {});

    for mgr in mgrs.iter() {
        assert_eq!(mgr.is_epoch_terminated(p), quiesce_epoch::TermStatus::Terminated);
    }
}

#[test]
fn window_reuse_after_reset() {
    let net = InMemoryNetwork::new(1);
    let node = NodeId::new(0);

    let fired1 = Rc::new(Cell::new(0u32));
    let e1 = {
        let mut mgr = EpochManager::new(node, RuntimeConfig::default(), net.handle(node));
        let e1 = mgr.make_epoch_rooted(Some("E1"), EpochId::NO_EPOCH, true);
        let counter = fired1.clone();
        mgr.add_action(e1, move || counter.set(counter.get() + 1));
        mgr.finished_epoch(e1).unwrap();
        mgr.runtime_shutdown();
        e1
    };
    assert_eq!(fired1.get(), 1);

    let fired2 = Rc::new(Cell::new(0u32));
    let mut mgr2 = EpochManager::new(node, RuntimeConfig::default(), net.handle(node));
    let e2 = mgr2.make_epoch_rooted(Some("E2"), EpochId::NO_EPOCH, true);
    assert_eq!(e1.to_bits(), e2.to_bits(), "id bits are reused after reset");

    let counter = fired2.clone();
    mgr2.add_action(e2, move || counter.set(counter.get() + 1));
    mgr2.finished_epoch(e2).unwrap();

    assert_eq!(fired2.get(), 1);
    assert_eq!(fired1.get(), 1, "the stale E1 callback must not refire");
}

/// `declare_terminated` must not fold a just-terminated epoch's live state
/// into the window inline: `isEpochTerminated` has to be able to observe the
/// live `Terminated` arm, not just the window's stale-reference arm.
/// Reclaiming the state is a separate, lazy step -- here, triggered by
/// creating the next epoch -- and once it happens the epoch is still
/// reported as terminated, just via the other arm.
#[test]
fn terminated_epoch_stays_live_until_compaction() {
    let net = InMemoryNetwork::new(1);
    let node = NodeId::new(0);
    let mut mgr = EpochManager::new(node, RuntimeConfig::default(), net.handle(node));

    let r1 = mgr.make_epoch_rooted(Some("R1"), EpochId::NO_EPOCH, true);
    mgr.finished_epoch(r1).unwrap();
    assert_eq!(
        mgr.is_epoch_terminated(r1),
        quiesce_epoch::TermStatus::Terminated,
        "a just-terminated epoch must report the live Terminated arm, not fall through to the window"
    );

    // Creating another epoch opportunistically compacts whatever is already
    // releasable, folding r1 into the window.
    let _r2 = mgr.make_epoch_rooted(Some("R2"), EpochId::NO_EPOCH, true);
    assert_eq!(
        mgr.is_epoch_terminated(r1),
        quiesce_epoch::TermStatus::WindowTerminated,
        "once compacted, a released epoch still reads as terminated, just via the window arm"
    );
}

/// Random relay chains of varying length rooted at node 0: `root -> a -> b
/// -> ... -> root`. Each seed builds a fresh topology; asserts the relay
/// always quiesces (no deadlock) and terminates on every participant.
#[test]
fn random_relay_chains_quiesce() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let node_count = rng.gen_range(3..=6);
        let net = InMemoryNetwork::new(node_count);
        let mut mgrs = managers(&net);

        let mut others: Vec<u32> = (1..node_count as u32).collect();
        others.shuffle(&mut rng);
        let depth = rng.gen_range(1..=others.len());
        let chain: Vec<NodeId> = others[..depth].iter().map(|&n| NodeId::new(n)).collect();

        let r = mgrs[0].make_epoch_rooted(Some("relay"), EpochId::NO_EPOCH, true);
        let first = chain[0];
        mgrs[0].send_payload(first, r, vec![]).unwrap();
        mgrs[0].finished_epoch(r).unwrap();

        pump(&net, &mut mgrs, |mgr, idx, _env, payload| {
            if idx == 0 {
                return; // root sees the reply close the loop; nothing more to send
            }
            let pos = chain.iter().position(|n| n.as_u32() == idx as u32).unwrap();
            // Every hop but the last forwards along the chain; the last
            // hop replies to the root, closing the loop.
            let next = if pos + 1 < chain.len() { chain[pos + 1] } else { NodeId::new(0) };
            mgr.send_payload(next, r, payload).unwrap();
        });

        assert!(net.all_empty(), "relay must quiesce with no deadlock (seed {seed})");
        for mgr in mgrs.iter() {
            assert_eq!(
                mgr.is_epoch_terminated(r),
                quiesce_epoch::TermStatus::Terminated,
                "seed {seed} failed to terminate on node {:?}",
                mgr.node()
            );
        }
    }
}
