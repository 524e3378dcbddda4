//! Tests for the bitnode engine

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
};

use super::*;
use bitnode_core::units::BITCOIN;

const GENESIS_TIME: u64 = 1_700_000_000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn addr(name: &str) -> Address {
    Address::new(format!("bitcoincash:{name}"), "").unwrap()
}

fn coinbase_to(owner: &str, amount: u64, id: &str) -> Transaction {
    Transaction::with_id(
        vec![Xput::new(Address::coinbase(), 0)],
        vec![Xput::new(addr(owner), amount)],
        id,
    )
    .unwrap()
}

fn spend(from: (&str, u64), to: (&str, u64), id: &str) -> Transaction {
    Transaction::with_id(
        vec![Xput::new(addr(from.0), from.1)],
        vec![Xput::new(addr(to.0), to.1)],
        id,
    )
    .unwrap()
}

/// Simple helper to start a node whose genesis pays 50 coins to "a".
fn node_with_genesis() -> (Node, Block) {
    init_logging();
    let mut genesis = Block::genesis();
    genesis
        .add_transaction(coinbase_to("a", 50 * BITCOIN, "genesis_tx"))
        .unwrap();
    genesis.set_timestamp(GENESIS_TIME);
    genesis
        .search_nonce(3, &CancellationToken::new())
        .unwrap();

    let node = Node::new(genesis.clone(), ConsensusParams::default()).unwrap();
    (node, genesis)
}

/// Build a child of `parent` holding `txs` and give it enough work for the node's chain.
fn mined_child(node: &Node, parent: &Block, txs: Vec<Transaction>) -> Block {
    let mut block = Block::child_of(parent);
    block.add_transactions(txs).unwrap();
    block.set_timestamp(parent.timestamp().unwrap_or(GENESIS_TIME) + 10);
    block
        .find_nonce(node.store(), node.params(), &CancellationToken::new())
        .unwrap();
    block
}

/// A child of `parent` whose hash misses the required difficulty.
fn weak_child(node: &Node, parent: &Block) -> Block {
    let mut block = Block::child_of(parent);
    let required = block.required_difficulty(node.store(), node.params()).unwrap();
    let mut nonce = 0;
    loop {
        block.set_nonce(nonce);
        if block.leading_zero_bits() < required {
            return block;
        }
        nonce += 1;
    }
}

struct FailingPropagator;

impl BlockPropagator for FailingPropagator {
    fn notify(&self, _block: &Block) -> Result<(), PropagationError> {
        Err(PropagationError("no peers".into()))
    }
}

#[test]
fn genesis_becomes_tip() {
    let (node, genesis) = node_with_genesis();

    assert_eq!(node.latest_block(), Some(&genesis));
    assert_eq!(node.tip(), Some(genesis.hash()));
    assert!(node.utxos().contains(&Xput::new(addr("a"), 50 * BITCOIN)));
}

#[test]
fn genesis_needs_no_parent() {
    let genesis = Block::genesis();
    let child = Block::child_of(&genesis);

    assert!(matches!(
        Node::new(child, ConsensusParams::default()),
        Err(NodeError::InvalidBlock {
            number: 2,
            reason: BlockRejection::UnknownParent(_),
            ..
        })
    ));
}

#[test]
fn empty_chain_is_refused() {
    assert!(matches!(
        Node::from_chain(Vec::new(), ConsensusParams::default()),
        Err(NodeError::EmptyChain)
    ));
}

#[test]
fn receive_valid_block() {
    let (mut node, genesis) = node_with_genesis();
    let block = mined_child(&node, &genesis, vec![coinbase_to("b", 25 * BITCOIN, "block2_coinbase")]);

    let hash = node.receive_block(block.clone()).unwrap();

    assert_eq!(hash, block.hash());
    assert_eq!(node.latest_block(), Some(&block));
    assert_eq!(node.height(), 2);
    assert!(node.utxos().contains(&Xput::new(addr("b"), 25 * BITCOIN)));
    assert_eq!(node.accumulated_difficulty(), 6);
}

#[test]
fn second_genesis_is_rejected() {
    let (mut node, genesis) = node_with_genesis();
    let mut other = Block::genesis();
    other.set_timestamp(GENESIS_TIME);

    let err = node.receive_block(other).unwrap_err();

    assert!(err.is_invalid_block());
    assert!(matches!(err.rejection(), Some(BlockRejection::ForkChoice { .. })));
    assert_eq!(node.latest_block(), Some(&genesis));
}

#[test]
fn insufficient_difficulty_is_rejected() {
    let (mut node, genesis) = node_with_genesis();
    let utxos_before = node.utxos().clone();
    let weak = weak_child(&node, &genesis);

    let err = node.receive_block(weak.clone()).unwrap_err();

    assert!(err.is_insufficient_difficulty());
    assert!(err.is_invalid_block());
    assert!(matches!(
        err,
        NodeError::InvalidBlock { number: 2, hash, .. } if hash == weak.hash()
    ));
    assert_eq!(node.tip(), Some(genesis.hash()));
    assert_eq!(node.utxos(), &utxos_before);
    assert!(node.block(&weak.hash()).is_none());
}

#[test]
fn validate_block_does_not_mutate() {
    let (node, genesis) = node_with_genesis();
    let block = mined_child(&node, &genesis, vec![]);

    assert!(node.validate_block(&block).is_ok());
    assert_eq!(node.tip(), Some(genesis.hash()));
    assert!(node.validate_block(&weak_child(&node, &genesis)).unwrap_err().is_insufficient_difficulty());
}

#[test]
fn block_spending_unknown_input_is_rejected() {
    let (mut node, genesis) = node_with_genesis();
    let block = mined_child(&node, &genesis, vec![spend(("z", 10), ("b", 10), "bogus")]);

    let err = node.receive_block(block).unwrap_err();

    assert!(matches!(
        err.rejection(),
        Some(BlockRejection::UnspendableInput { input, .. }) if *input == Xput::new(addr("z"), 10)
    ));
    assert!(!err.is_insufficient_difficulty());
    assert_eq!(node.height(), 1);
}

#[test]
fn block_spending_one_output_twice_is_rejected() {
    let (mut node, genesis) = node_with_genesis();
    let utxos_before = node.utxos().clone();
    let block = mined_child(
        &node,
        &genesis,
        vec![
            spend(("a", 50 * BITCOIN), ("b", 50 * BITCOIN), "d1"),
            spend(("a", 50 * BITCOIN), ("c", 50 * BITCOIN), "d2"),
        ],
    );

    let err = node.receive_block(block).unwrap_err();

    assert!(matches!(
        err.rejection(),
        Some(BlockRejection::UnspendableInput { input, .. }) if *input == Xput::new(addr("a"), 50 * BITCOIN)
    ));
    assert_eq!(node.tip(), Some(genesis.hash()));
    assert_eq!(node.utxos(), &utxos_before);
}

#[test]
fn side_block_spending_one_output_twice_is_not_retained() {
    let (mut node, genesis) = node_with_genesis();
    let tip = mined_child(&node, &genesis, vec![]);
    node.receive_block(tip).unwrap();
    let rival = mined_child(
        &node,
        &genesis,
        vec![
            spend(("a", 50 * BITCOIN), ("b", 50 * BITCOIN), "d1"),
            spend(("a", 50 * BITCOIN), ("c", 50 * BITCOIN), "d2"),
        ],
    );

    assert!(node.receive_block(rival.clone()).is_err());
    assert!(!node.store().contains(&rival.hash()));
}

#[test]
fn transaction_repeating_an_input_cannot_be_built() {
    let input = Xput::new(addr("a"), 50 * BITCOIN);

    assert_eq!(
        Transaction::with_id(
            vec![input.clone(), input.clone()],
            vec![Xput::new(addr("b"), 100 * BITCOIN)],
            "doubled",
        ),
        Err(TransactionError::DuplicateInput(input))
    );
}

#[test]
fn block_with_unknown_parent_is_rejected() {
    let (mut node, genesis) = node_with_genesis();
    let mut stranger = Block::genesis();
    stranger.set_nonce(99);
    let orphan = Block::child_of(&stranger);

    assert!(matches!(
        node.receive_block(orphan).unwrap_err().rejection(),
        Some(BlockRejection::UnknownParent(parent)) if *parent == stranger.hash()
    ));
    assert_eq!(node.tip(), Some(genesis.hash()));
}

#[test]
fn equal_weight_fork_is_rejected() {
    let (mut node, genesis) = node_with_genesis();
    let tip = mined_child(&node, &genesis, vec![coinbase_to("b", 25, "t")]);
    node.receive_block(tip.clone()).unwrap();

    let rival = mined_child(&node, &genesis, vec![coinbase_to("c", 25, "r")]);
    let err = node.receive_block(rival).unwrap_err();

    assert_eq!(
        err.rejection(),
        Some(&BlockRejection::ForkChoice {
            candidate: 6,
            current: 6
        })
    );
    assert_eq!(node.tip(), Some(tip.hash()));
    assert!(node.utxos().contains(&Xput::new(addr("b"), 25)));
    assert!(!node.utxos().contains(&Xput::new(addr("c"), 25)));
}

#[test]
fn resubmitting_the_tip_is_rejected() {
    let (mut node, genesis) = node_with_genesis();
    let tip = mined_child(&node, &genesis, vec![]);
    node.receive_block(tip.clone()).unwrap();
    let child = mined_child(&node, &tip, vec![]);
    node.receive_block(child.clone()).unwrap();

    assert!(node.receive_block(tip).is_err());
    assert_eq!(node.tip(), Some(child.hash()));
}

//          T  (discard)
//        /
//    G
//        \
//          R1  -  R2 (new tip)
#[test]
fn heavier_fork_reorganizes() {
    let (mut node, genesis) = node_with_genesis();
    let tip = mined_child(
        &node,
        &genesis,
        vec![spend(("a", 50 * BITCOIN), ("b", 49 * BITCOIN), "t")],
    );
    node.receive_block(tip).unwrap();

    let r1 = mined_child(&node, &genesis, vec![coinbase_to("c", 25, "r1")]);
    assert!(node.receive_block(r1.clone()).is_err());
    assert!(node.store().contains(&r1.hash()));

    let r2 = mined_child(
        &node,
        &r1,
        vec![spend(("a", 50 * BITCOIN), ("d", 50 * BITCOIN), "r2")],
    );
    node.receive_block(r2.clone()).unwrap();

    assert_eq!(node.tip(), Some(r2.hash()));
    assert_eq!(node.accumulated_difficulty(), 9);
    assert!(node.utxos().contains(&Xput::new(addr("d"), 50 * BITCOIN)));
    assert!(node.utxos().contains(&Xput::new(addr("c"), 25)));
    assert!(!node.utxos().contains(&Xput::new(addr("b"), 49 * BITCOIN)));
    assert_eq!(
        node.utxos(),
        &UtxoSet::replay(node.store(), &r2.hash()).unwrap()
    );
}

#[test]
fn mempool_double_spend_through_node() {
    let (mut node, _) = node_with_genesis();
    let first = spend(("a", 50 * BITCOIN), ("b", 49 * BITCOIN), "tx1");
    let second = spend(("a", 50 * BITCOIN), ("c", 40 * BITCOIN), "tx2");

    node.receive_transaction(first.clone()).unwrap();

    assert!(matches!(
        node.receive_transaction(second),
        Err(NodeError::Mempool(MempoolError::DoubleSpend { .. }))
    ));
    assert_eq!(node.unconfirmed_transactions().len(), 1);
    assert!(node.unconfirmed_transactions().contains(&first));
}

#[test]
fn overspending_transaction_is_refused_by_mempool() {
    let (mut node, _) = node_with_genesis();
    let tx = spend(("a", 50 * BITCOIN), ("b", 51 * BITCOIN), "greedy");

    assert!(matches!(
        node.receive_transaction(tx),
        Err(NodeError::Mempool(MempoolError::InsufficientInputs { .. }))
    ));
}

#[test]
fn coinbase_transactions_are_not_relayed() {
    let (mut node, _) = node_with_genesis();

    assert!(matches!(
        node.receive_transaction(coinbase_to("b", 50, "mint")),
        Err(NodeError::InvalidTransaction { .. })
    ));
}

#[test]
fn confirmed_transactions_leave_the_mempool() {
    let (mut node, _) = node_with_genesis();
    node.receive_transaction(spend(("a", 50 * BITCOIN), ("b", 49 * BITCOIN), "tx1"))
        .unwrap();

    node.mine_block(&CancellationToken::new()).unwrap();
    assert!(node.mempool().is_empty());

    // Nothing pending: the next block is empty but still valid.
    let empty = node.mine_block(&CancellationToken::new()).unwrap();
    assert_eq!(empty.number(), 3);
    assert!(empty.transactions().is_empty());
}

#[test]
fn block_received_from_elsewhere_prunes_conflicts() {
    let (mut node, genesis) = node_with_genesis();
    node.receive_transaction(spend(("a", 50 * BITCOIN), ("b", 49 * BITCOIN), "local"))
        .unwrap();

    let block = mined_child(
        &node,
        &genesis,
        vec![spend(("a", 50 * BITCOIN), ("c", 48 * BITCOIN), "remote")],
    );
    node.receive_block(block).unwrap();

    assert!(node.mempool().is_empty());
}

#[test]
fn mined_block_uses_node_clock() {
    let (node, _) = node_with_genesis();
    let clock = Arc::new(ManualClock::new(GENESIS_TIME + 42));
    let mut node = node.with_clock(clock.clone());

    let mined = node.mine_block(&CancellationToken::new()).unwrap();

    assert_eq!(mined.timestamp(), Some(GENESIS_TIME + 42));
}

#[test]
fn mined_blocks_are_propagated_once() {
    let (node, _) = node_with_genesis();
    let sink = Arc::new(MemoryPropagator::new());
    let mut node = node.with_propagator(sink.clone());

    let first = node.mine_block(&CancellationToken::new()).unwrap();
    let second = node.mine_block(&CancellationToken::new()).unwrap();

    assert_eq!(sink.sent(), vec![first.hash(), second.hash()]);
}

#[test]
fn rejected_blocks_are_not_propagated() {
    let (node, genesis) = node_with_genesis();
    let sink = Arc::new(MemoryPropagator::new());
    let mut node = node.with_propagator(sink.clone());
    let weak = weak_child(&node, &genesis);

    assert!(node.receive_block(weak).is_err());
    assert!(sink.sent().is_empty());
}

#[test]
fn propagation_failure_keeps_the_block() {
    let (node, _) = node_with_genesis();
    let mut node = node.with_propagator(Arc::new(FailingPropagator));

    let mined = node.mine_block(&CancellationToken::new()).unwrap();

    assert_eq!(node.tip(), Some(mined.hash()));
}

#[test]
fn cancelled_mining_changes_nothing() {
    let (mut node, genesis) = node_with_genesis();
    node.receive_transaction(spend(("a", 50 * BITCOIN), ("b", 49 * BITCOIN), "tx1"))
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(node.mine_block(&cancel), Err(NodeError::MiningCancelled));
    assert_eq!(node.tip(), Some(genesis.hash()));
    assert_eq!(node.mempool().len(), 1);
}

#[test]
fn from_chain_matches_incremental_state() {
    let (mut node, _) = node_with_genesis();
    node.receive_transaction(spend(("a", 50 * BITCOIN), ("b", 49 * BITCOIN), "tx1"))
        .unwrap();
    let mut chain = vec![node.latest_block().unwrap().clone()];
    chain.push(node.mine_block(&CancellationToken::new()).unwrap());
    node.receive_transaction(spend(("b", 49 * BITCOIN), ("c", 48 * BITCOIN), "tx2"))
        .unwrap();
    chain.push(node.mine_block(&CancellationToken::new()).unwrap());

    let rebuilt = Node::from_chain(chain, ConsensusParams::default()).unwrap();

    assert_eq!(rebuilt.tip(), node.tip());
    assert_eq!(rebuilt.utxos(), node.utxos());
    assert_eq!(rebuilt.accumulated_difficulty(), node.accumulated_difficulty());
}

#[test]
fn from_chain_validates_every_block() {
    let (node, genesis) = node_with_genesis();
    let weak = weak_child(&node, &genesis);

    assert!(matches!(
        Node::from_chain(vec![genesis, weak], ConsensusParams::default()),
        Err(e) if e.is_insufficient_difficulty()
    ));
}

#[test]
fn mining_follows_retargets() {
    init_logging();
    let params = ConsensusParams {
        adjustment_interval: 4,
        ..ConsensusParams::for_testing()
    };
    let mut genesis = Block::genesis();
    genesis.set_timestamp(GENESIS_TIME);
    let clock = Arc::new(ManualClock::new(GENESIS_TIME));
    let mut node = Node::new(genesis, params).unwrap().with_clock(clock.clone());

    // One second per block against a ten second target.
    for _ in 0..4 {
        clock.advance(1);
        node.mine_block(&CancellationToken::new()).unwrap();
    }

    let tip = node.tip().unwrap();
    let stored = node.store().get(&tip).unwrap();
    assert_eq!(stored.block.number(), 5);
    // Window #1..#4 took 3s of a desired 40s: clamped to a quarter, two bits harder.
    assert_eq!(stored.difficulty, 3);
    assert!(stored.block.leading_zero_bits() >= 3);
    for number in 2..5 {
        let hash = node.store().block_at_height(&tip, number).unwrap();
        assert_eq!(node.store().get(&hash).unwrap().difficulty, 1);
    }
    assert_eq!(node.accumulated_difficulty(), 1 + 1 + 1 + 1 + 3);
}

#[test]
fn stored_difficulties_match_a_full_chain_walk() {
    init_logging();
    let params = ConsensusParams {
        adjustment_interval: 3,
        ..ConsensusParams::for_testing()
    };
    let mut genesis = Block::genesis();
    genesis.set_timestamp(GENESIS_TIME);
    let clock = Arc::new(ManualClock::new(GENESIS_TIME));
    let mut node = Node::new(genesis, params.clone()).unwrap().with_clock(clock.clone());
    let mut chain = vec![node.latest_block().unwrap().clone()];
    for spacing in [1, 1, 1, 60, 60, 60, 1, 1] {
        clock.advance(spacing);
        chain.push(node.mine_block(&CancellationToken::new()).unwrap());
    }

    let rebuilt = Node::from_chain(chain.clone(), params.clone()).unwrap();

    for block in &chain {
        let stored = rebuilt.store().get(&block.hash()).unwrap();
        assert_eq!(
            stored.difficulty,
            block.required_difficulty(rebuilt.store(), &params).unwrap()
        );
    }
    let (candidate, required) = rebuilt.prepare_candidate().unwrap();
    assert_eq!(required, candidate.required_difficulty(rebuilt.store(), &params).unwrap());
    assert_eq!(rebuilt.accumulated_difficulty(), node.accumulated_difficulty());
}

#[test]
fn error_messages_name_the_block() {
    let (mut node, genesis) = node_with_genesis();
    let weak = weak_child(&node, &genesis);
    let message = node.receive_block(weak.clone()).unwrap_err().to_string();

    assert!(message.contains("invalid block 2"));
    assert!(message.contains(&weak.hash().to_string()));
    assert!(message.contains("leading zero bits"));
}

#[test]
fn shared_node_mines_and_receives() {
    let (node, _) = node_with_genesis();
    let shared = SharedNode::new(node);

    shared
        .receive_transaction(spend(("a", 50 * BITCOIN), ("b", 49 * BITCOIN), "tx1"))
        .unwrap();
    let mined = shared.mine_block(&CancellationToken::new()).unwrap();

    assert_eq!(shared.latest_block(), Some(mined));
    assert!(shared.with_node(|n| n.utxos().contains(&Xput::new(addr("b"), 49 * BITCOIN))));
    assert_eq!(shared.active_miners(), 0);
}

/// A clock that remembers whether a candidate was stamped.
#[derive(Default)]
struct StampingClock {
    stamps: AtomicUsize,
}

impl Clock for StampingClock {
    fn now_secs(&self) -> u64 {
        self.stamps.fetch_add(1, Ordering::SeqCst);
        GENESIS_TIME
    }
}

fn unminable_shared_node() -> SharedNode {
    unminable_node_with_clock(Arc::new(SystemClock))
}

fn unminable_node_with_clock(clock: Arc<dyn Clock>) -> SharedNode {
    init_logging();
    let params = ConsensusParams {
        base_difficulty: 255,
        ..ConsensusParams::default()
    };
    SharedNode::new(Node::new(Block::genesis(), params).unwrap().with_clock(clock))
}

#[test]
fn shared_mining_stops_on_cancel() {
    let shared = unminable_shared_node();
    let cancel = CancellationToken::new();
    let handle = {
        let shared = shared.clone();
        let cancel = cancel.clone();
        thread::spawn(move || shared.mine_block(&cancel))
    };

    while shared.active_miners() == 0 {
        thread::yield_now();
    }
    cancel.cancel();

    assert_eq!(handle.join().unwrap(), Err(NodeError::MiningCancelled));
    assert_eq!(shared.active_miners(), 0);
    assert_eq!(shared.with_node(Node::height), 1);
}

#[test]
fn shared_mining_stops_when_interrupted() {
    let shared = unminable_shared_node();
    let handle = {
        let shared = shared.clone();
        thread::spawn(move || shared.mine_block(&CancellationToken::new()))
    };

    while shared.active_miners() == 0 {
        thread::yield_now();
    }
    shared.interrupt_mining();

    assert_eq!(handle.join().unwrap(), Err(NodeError::MiningCancelled));
}

#[test]
fn shared_node_stays_usable_while_mining() {
    let shared = unminable_shared_node();
    let handle = {
        let shared = shared.clone();
        thread::spawn(move || shared.mine_block(&CancellationToken::new()))
    };

    while shared.active_miners() == 0 {
        thread::yield_now();
    }
    // The lock is free during the search.
    assert_eq!(shared.with_node(Node::height), 1);
    shared.interrupt_mining();

    assert!(handle.join().unwrap().is_err());
}

#[test]
fn shared_miner_is_registered_before_the_lock_is_released() {
    let clock = Arc::new(StampingClock::default());
    let shared = unminable_node_with_clock(clock.clone());
    let handle = {
        let shared = shared.clone();
        thread::spawn(move || shared.mine_block(&CancellationToken::new()))
    };

    // Whoever holds the node lock after the candidate was built must see its miner.
    loop {
        let (stamped, miners) = shared.with_node(|_| {
            (clock.stamps.load(Ordering::SeqCst), shared.active_miners())
        });
        if stamped > 0 {
            assert_eq!(miners, 1);
            break;
        }
        thread::yield_now();
    }
    shared.interrupt_mining();

    assert_eq!(handle.join().unwrap(), Err(NodeError::MiningCancelled));
}
