use quiesce_chain::{ChainSet, ChainSetLayout, DependentSendChain, PendingSend};
use quiesce_epoch::{EpochManager, RuntimeConfig};
use quiesce_net::mock::InMemoryNetwork;
use quiesce_net::NodeId;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

fn single_node_manager() -> EpochManager<quiesce_net::mock::NodeHandle> {
    let net = InMemoryNetwork::new(1);
    EpochManager::new(NodeId::new(0), RuntimeConfig::default(), net.handle(NodeId::new(0)))
}

/// Drain every action the manager has queued for out-of-band (scheduler)
/// execution -- i.e. those registered against an already-terminated epoch,
/// which fire on the next task step rather than synchronously inline.
fn drain_ready(manager: &mut EpochManager<quiesce_net::mock::NodeHandle>) {
    while let Some(action) = manager.take_ready_action() {
        action();
    }
}

#[test]
fn chain_order() {
    let mut manager = single_node_manager();
    let order = Rc::new(RefCell::new(Vec::new()));
    let mut chain = DependentSendChain::new();

    let mut step = |chain: &mut DependentSendChain, manager: &mut EpochManager<_>, n: u32| {
        let order = order.clone();
        let epoch = manager.make_epoch_rooted(Some("chain-step"), quiesce_epoch::EpochId::NO_EPOCH, true);
        let pending = PendingSend::new(epoch, move || order.borrow_mut().push(n));
        chain.add(manager, epoch, pending);
        epoch
    };

    let e1 = step(&mut chain, &mut manager, 1);
    let e2 = step(&mut chain, &mut manager, 2);
    let _e3 = step(&mut chain, &mut manager, 3);

    // Step 1's pending was registered against the already-terminated NO_EPOCH
    // sentinel, so it's sitting in the ready queue, not yet fired.
    assert!(order.borrow().is_empty());
    drain_ready(&mut manager);
    assert_eq!(*order.borrow(), vec![1]);

    // Step 2's pending only fires once epoch 1 (step 1's own epoch) has
    // terminated -- not epoch 1's *PendingSend* firing, which already
    // happened above; those are independent events.
    manager.finished_epoch(e1).unwrap();
    assert_eq!(*order.borrow(), vec![1, 2]);

    manager.finished_epoch(e2).unwrap();
    assert_eq!(*order.borrow(), vec![1, 2, 3]);
}

#[test]
fn chain_set_merge() {
    let mut manager = single_node_manager();
    let keys: Vec<u32> = (0..16).collect();

    let mut a = ChainSet::new(ChainSetLayout::Local);
    let mut b = ChainSet::new(ChainSetLayout::Home);
    for &k in &keys {
        a.add_index(k).unwrap();
        b.add_index(k).unwrap();
    }

    let a_factor = |k: u32| (k % 5 + 1) as u64;
    let b_factor = |k: u32| (k % 3 + 1) as u64;

    let accumulators: Vec<Rc<Cell<u64>>> = keys.iter().map(|_| Rc::new(Cell::new(1u64))).collect();

    ChainSet::merge_step_collective(Some("m"), &mut a, &mut b, &mut manager, |&k| {
        let acc = accumulators[k as usize].clone();
        let factor = a_factor(k) * b_factor(k);
        let epoch = quiesce_epoch::EpochId::NO_EPOCH; // unused by this PendingSend's action
        PendingSend::new(epoch, move || acc.set(acc.get() * factor))
    })
    .unwrap();

    drain_ready(&mut manager);

    for &k in &keys {
        let expected = a_factor(k) * b_factor(k);
        assert_eq!(accumulators[k as usize].get(), expected, "key {k} mismatched contribution product");
    }
}

#[test]
fn chain_set_merge_mismatch_on_missing_key() {
    let mut manager = single_node_manager();
    let mut a = ChainSet::new(ChainSetLayout::Local);
    let mut b = ChainSet::new(ChainSetLayout::Local);
    for k in 0..4u32 {
        a.add_index(k).unwrap();
        if k != 2 {
            b.add_index(k).unwrap();
        }
    }

    let result = ChainSet::merge_step_collective(Some("m"), &mut a, &mut b, &mut manager, |&k| {
        PendingSend::new(quiesce_epoch::EpochId::NO_EPOCH, move || {
            let _ = k;
        })
    });

    assert!(matches!(result, Err(quiesce_epoch::CoreError::ChainSetMergeMismatch)));
}
