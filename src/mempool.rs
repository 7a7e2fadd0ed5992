//! The mempool and the committee election round built on top of it.
//!
//! A committee member whose pool is full enough broadcasts `QuorumReady`.
//! Once every other member has voted ready, mempools are reconciled by a
//! hash exchange (digest out, missing transactions fetched back), and when
//! `quorum_size - 1` reconciliation rounds have completed the node builds,
//! signs and proposes a candidate block.

use crate::client;
use crate::crypto;
use crate::ledger::{Address, Block, Chain, GetTip, InsertBlock, TipResult, Transaction, TxHash};
use crate::protocol::{ProposeBlock, Request, Response};
use crate::sortition::{self, NetworkParams};
use crate::view::{GetPeers, PeersResult, View};
use crate::Result;

use ed25519_dalek::Keypair;
use tracing::{debug, error, info, warn};

use actix::{Actor, Addr, AsyncContext, Context, Handler, MessageResult, ResponseFuture};
use actix_derive::{Message, MessageResponse};

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Pool size at which a committee member announces election readiness.
pub const BLOCK_TX_THRESHOLD: usize = 3;

/// How long a started election round may stall before its counters reset.
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Mempool {
    self_address: Address,
    params: NetworkParams,
    chain: Addr<Chain>,
    view: Addr<View>,
    keypair: Keypair,
    pool: HashMap<TxHash, Transaction>,
    quorum_ready_votes: usize,
    mempool_rounds: usize,
    /// Round generation, used to invalidate stale abort timers.
    round: u64,
}

impl Mempool {
    pub fn new(
        self_address: Address,
        params: NetworkParams,
        chain: Addr<Chain>,
        view: Addr<View>,
        keypair: Keypair,
    ) -> Self {
        Mempool {
            self_address,
            params,
            chain,
            view,
            keypair,
            pool: HashMap::new(),
            quorum_ready_votes: 0,
            mempool_rounds: 0,
            round: 0,
        }
    }

    fn arm_abort_timer(&self, ctx: &mut Context<Self>) {
        ctx.notify_later(AbortRound { round: self.round }, ROUND_TIMEOUT);
    }

    /// Sends this node's pool digest to every other committee member.
    fn start_hash_exchange(&mut self) {
        info!("all committee members ready; exchanging mempool digests");
        let hashes: Vec<TxHash> = self.pool.keys().cloned().collect();
        let digest = MempoolDigest { from: self.self_address.clone(), hashes };
        let chain = self.chain.clone();
        let params = self.params.clone();
        let self_address = self.self_address.clone();
        tokio::spawn(async move {
            match committee_for_tip(&chain, &params).await {
                Ok(committee) => {
                    let peers = sortition::committee_peers(&committee, &self_address);
                    let outcomes =
                        client::fanout(peers, Request::MempoolDigest(digest)).await;
                    for (peer, outcome) in outcomes {
                        match outcome {
                            Ok(Some(Response::MempoolDiff(missing))) => {
                                if missing.is_empty() {
                                    debug!("{} holds every offered transaction", peer);
                                } else {
                                    debug!("{} lacks {} transactions", peer, missing.len());
                                }
                            }
                            Ok(_) => warn!("unexpected digest reply from {}", peer),
                            Err(err) => warn!("digest to {} failed: {:?}", peer, err),
                        }
                    }
                }
                Err(err) => error!("failed to derive committee: {:?}", err),
            }
        });
    }

    /// Counts a completed reconciliation with one committee member and
    /// fires block construction after the last one.
    fn complete_round(&mut self, ctx: &mut Context<Self>) {
        self.mempool_rounds += 1;
        debug!("mempool rounds: {}", self.mempool_rounds);
        if self.mempool_rounds == 1 {
            self.arm_abort_timer(ctx);
        }
        if self.mempool_rounds == self.params.quorum_size - 1 {
            self.mempool_rounds = 0;
            self.round += 1;
            self.build_block(ctx);
        }
    }

    /// Snapshots the pool (a deep copy, taken while the actor holds the
    /// state) and hands it to block construction together with the tip.
    fn build_block(&mut self, ctx: &mut Context<Self>) {
        let transactions: BTreeMap<TxHash, Transaction> =
            self.pool.iter().map(|(hash, tx)| (hash.clone(), tx.clone())).collect();
        let chain = self.chain.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            match chain.send(GetTip).await {
                Ok(TipResult { tip, height }) => {
                    let _ = addr.send(FinalizeBlock { tip, height, transactions }).await;
                }
                Err(err) => error!("failed to read the chain tip: {:?}", err),
            }
        });
    }
}

async fn committee_for_tip(chain: &Addr<Chain>, params: &NetworkParams) -> Result<Vec<Address>> {
    let TipResult { tip, .. } = chain.send(GetTip).await?;
    sortition::derive_committee(&tip, 0, params)
}

impl Actor for Mempool {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("mempool started");
    }
}

/// Inserts a transaction (content-deduplicated), gossips it to the local
/// peers and, once the pool is full enough and this node sits in the
/// current committee, announces election readiness.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct SubmitTransaction {
    pub transaction: Transaction,
}

impl Handler<SubmitTransaction> for Mempool {
    type Result = ();

    fn handle(&mut self, msg: SubmitTransaction, _ctx: &mut Context<Self>) -> Self::Result {
        let hash = msg.transaction.hash();
        if self.pool.contains_key(&hash) {
            return;
        }
        self.pool.insert(hash.clone(), msg.transaction.clone());
        debug!("inserted {}; pool holds {} transactions", hash, self.pool.len());
        let full = self.pool.len() == BLOCK_TX_THRESHOLD;

        let view = self.view.clone();
        let chain = self.chain.clone();
        let params = self.params.clone();
        let self_address = self.self_address.clone();
        let transaction = msg.transaction;
        tokio::spawn(async move {
            match view.send(GetPeers).await {
                Ok(PeersResult { peers }) => {
                    let request =
                        Request::SubmitTransaction(SubmitTransaction { transaction });
                    client::fanout_oneway(peers, request).await;
                }
                Err(err) => error!("failed to snapshot peers: {:?}", err),
            }
            if full {
                match committee_for_tip(&chain, &params).await {
                    Ok(committee) => {
                        if committee.contains(&self_address) {
                            info!("pool is full and this node is in the committee");
                            let peers = sortition::committee_peers(&committee, &self_address);
                            client::fanout_oneway(peers, Request::QuorumReady).await;
                        }
                    }
                    Err(err) => error!("failed to derive committee: {:?}", err),
                }
            }
        });
    }
}

/// A committee member's readiness vote. When every other member has voted,
/// the hash exchange begins.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct ReceiveQuorumReady;

impl Handler<ReceiveQuorumReady> for Mempool {
    type Result = ();

    fn handle(&mut self, _msg: ReceiveQuorumReady, ctx: &mut Context<Self>) -> Self::Result {
        self.quorum_ready_votes += 1;
        debug!("quorum ready votes: {}", self.quorum_ready_votes);
        if self.quorum_ready_votes == 1 {
            self.arm_abort_timer(ctx);
        }
        if self.quorum_ready_votes == self.params.quorum_size - 1 {
            self.quorum_ready_votes = 0;
            self.start_hash_exchange();
        }
    }
}

/// Another member's pool digest. The reply lists the hashes this node
/// lacks; those are then fetched back from the digest's sender.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "MempoolDiffResult")]
pub struct MempoolDigest {
    pub from: Address,
    pub hashes: Vec<TxHash>,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct MempoolDiffResult {
    pub missing: Vec<TxHash>,
}

impl Handler<MempoolDigest> for Mempool {
    type Result = MessageResult<MempoolDigest>;

    fn handle(&mut self, msg: MempoolDigest, ctx: &mut Context<Self>) -> Self::Result {
        let missing: Vec<TxHash> =
            msg.hashes.iter().filter(|hash| !self.pool.contains_key(*hash)).cloned().collect();
        if missing.is_empty() {
            self.complete_round(ctx);
        } else {
            debug!("fetching {} missing transactions from {}", missing.len(), msg.from);
            let from = msg.from;
            let hashes = missing.clone();
            let addr = ctx.address();
            tokio::spawn(async move {
                let request = Request::FetchTransactions(FetchTransactions { hashes });
                match client::oneshot(&from, request).await {
                    Ok(Some(Response::Transactions(transactions))) => {
                        let _ = addr.send(AbsorbTransactions { transactions }).await;
                    }
                    Ok(_) => error!("{} aborted the transaction fetch", from),
                    Err(err) => warn!("fetch from {} failed: {:?}", from, err),
                }
            });
        }
        MessageResult(MempoolDiffResult { missing })
    }
}

/// Missing transactions returned by a reconciliation peer; completes the
/// round that requested them.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct AbsorbTransactions {
    pub transactions: Vec<Transaction>,
}

impl Handler<AbsorbTransactions> for Mempool {
    type Result = ();

    fn handle(&mut self, msg: AbsorbTransactions, ctx: &mut Context<Self>) -> Self::Result {
        for transaction in msg.transactions {
            self.pool.insert(transaction.hash(), transaction);
        }
        self.complete_round(ctx);
    }
}

/// A reconciliation peer asking for transactions by hash. Requesting a
/// hash this node does not hold violates the protocol: the exchange is
/// aborted (no reply) rather than answered partially.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "FetchResult")]
pub struct FetchTransactions {
    pub hashes: Vec<TxHash>,
}

#[derive(Debug, Clone, MessageResponse)]
pub struct FetchResult(pub Option<Vec<Transaction>>);

impl Handler<FetchTransactions> for Mempool {
    type Result = MessageResult<FetchTransactions>;

    fn handle(&mut self, msg: FetchTransactions, _ctx: &mut Context<Self>) -> Self::Result {
        let mut transactions = vec![];
        for hash in msg.hashes.iter() {
            match self.pool.get(hash) {
                Some(transaction) => transactions.push(transaction.clone()),
                None => {
                    error!("protocol violation: {} was requested but is not pooled", hash);
                    return MessageResult(FetchResult(None));
                }
            }
        }
        MessageResult(FetchResult(Some(transactions)))
    }
}

/// Internal: assembles and signs the candidate block once the tip snapshot
/// arrives, then distributes it to the committee.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
struct FinalizeBlock {
    tip: Block,
    height: u64,
    transactions: BTreeMap<TxHash, Transaction>,
}

impl Handler<FinalizeBlock> for Mempool {
    type Result = ();

    fn handle(&mut self, msg: FinalizeBlock, ctx: &mut Context<Self>) -> Self::Result {
        let prev_block_hash = match msg.tip.hash(0) {
            Ok(hash) => hash,
            Err(err) => {
                error!("failed to hash the tip: {:?}", err);
                return;
            }
        };
        let block = Block::new(msg.transactions, prev_block_hash, msg.height);
        info!("constructed candidate {}", block);
        match crypto::sign_block(&self.keypair, &block) {
            Ok(container) => {
                // The proposer's own candidate enters the election too
                ctx.notify(ProposeBlock { container: container.clone() });
                let chain = self.chain.clone();
                let params = self.params.clone();
                let self_address = self.self_address.clone();
                tokio::spawn(async move {
                    match committee_for_tip(&chain, &params).await {
                        Ok(committee) => {
                            let peers = sortition::committee_peers(&committee, &self_address);
                            client::fanout_oneway(peers, Request::ProposeBlock(ProposeBlock {
                                container,
                            }))
                            .await;
                        }
                        Err(err) => error!("failed to derive committee: {:?}", err),
                    }
                });
            }
            Err(err) => error!("failed to sign candidate block: {:?}", err),
        }
    }
}

impl Handler<ProposeBlock> for Mempool {
    type Result = ();

    fn handle(&mut self, msg: ProposeBlock, ctx: &mut Context<Self>) -> Self::Result {
        if !crypto::verify_block(&msg.container) {
            warn!("dropping candidate with an invalid signature");
            return;
        }
        let chain = self.chain.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            match chain.send(GetTip).await {
                Ok(TipResult { tip, height }) => {
                    let block = msg.container.block;
                    let expected_prev = match tip.hash(0) {
                        Ok(hash) => hash,
                        Err(err) => {
                            error!("failed to hash the tip: {:?}", err);
                            return;
                        }
                    };
                    // First valid candidate wins
                    if block.block_id == height && block.prev_block_hash == expected_prev {
                        let _ = addr.send(AcceptBlock { block }).await;
                    } else {
                        debug!("dropping candidate {}", block);
                    }
                }
                Err(err) => error!("failed to read the chain tip: {:?}", err),
            }
        });
    }
}

/// Internal: a candidate won the election; the round is over and the block
/// goes to the chain (which prunes and gossips it).
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
struct AcceptBlock {
    block: Block,
}

impl Handler<AcceptBlock> for Mempool {
    type Result = ();

    fn handle(&mut self, msg: AcceptBlock, _ctx: &mut Context<Self>) -> Self::Result {
        info!("accepted candidate {}", msg.block);
        self.quorum_ready_votes = 0;
        self.mempool_rounds = 0;
        self.round += 1;
        self.chain.do_send(InsertBlock { block: msg.block });
    }
}

/// Transactions consumed by an appended block leave the pool.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct PruneTransactions {
    pub hashes: Vec<TxHash>,
}

impl Handler<PruneTransactions> for Mempool {
    type Result = ();

    fn handle(&mut self, msg: PruneTransactions, _ctx: &mut Context<Self>) -> Self::Result {
        let before = self.pool.len();
        for hash in msg.hashes.iter() {
            self.pool.remove(hash);
        }
        debug!("pruned {} pooled transactions", before - self.pool.len());
    }
}

/// A started round stalled (an unreachable member, a lost fetch): reset
/// the counters so the node can participate in the next election.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct AbortRound {
    pub round: u64,
}

impl Handler<AbortRound> for Mempool {
    type Result = ();

    fn handle(&mut self, msg: AbortRound, _ctx: &mut Context<Self>) -> Self::Result {
        if msg.round == self.round && (self.quorum_ready_votes > 0 || self.mempool_rounds > 0) {
            warn!("election round stalled; resetting counters");
            self.quorum_ready_votes = 0;
            self.mempool_rounds = 0;
            self.round += 1;
        }
    }
}

/// Whether this node is a member of the committee derived from the tip.
#[derive(Debug, Clone, Message)]
#[rtype(result = "bool")]
pub struct InQuorum;

impl Handler<InQuorum> for Mempool {
    type Result = ResponseFuture<bool>;

    fn handle(&mut self, _msg: InQuorum, _ctx: &mut Context<Self>) -> Self::Result {
        let chain = self.chain.clone();
        let params = self.params.clone();
        let self_address = self.self_address.clone();
        Box::pin(async move {
            match committee_for_tip(&chain, &params).await {
                Ok(committee) => committee.contains(&self_address),
                Err(err) => {
                    error!("failed to derive committee: {:?}", err);
                    false
                }
            }
        })
    }
}

/// Snapshot of the pool contents.
#[derive(Debug, Clone, Message)]
#[rtype(result = "MempoolContents")]
pub struct GetMempool;

#[derive(Debug, Clone, MessageResponse)]
pub struct MempoolContents {
    pub pool: HashMap<TxHash, Transaction>,
}

impl Handler<GetMempool> for Mempool {
    type Result = MessageResult<GetMempool>;

    fn handle(&mut self, _msg: GetMempool, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(MempoolContents { pool: self.pool.clone() })
    }
}

/// Current election round counters.
#[derive(Debug, Clone, Message)]
#[rtype(result = "RoundState")]
pub struct GetRoundState;

#[derive(Debug, Clone, MessageResponse)]
pub struct RoundState {
    pub quorum_ready_votes: usize,
    pub mempool_rounds: usize,
}

impl Handler<GetRoundState> for Mempool {
    type Result = MessageResult<GetRoundState>;

    fn handle(&mut self, _msg: GetRoundState, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(RoundState {
            quorum_ready_votes: self.quorum_ready_votes,
            mempool_rounds: self.mempool_rounds,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn params(num_nodes: u16, quorum_size: usize) -> NetworkParams {
        NetworkParams {
            host: "localhost".to_owned(),
            num_nodes,
            quorum_size,
            starting_port: 8000,
        }
    }

    fn spawn(self_port: u16, params: NetworkParams) -> (Addr<Mempool>, Addr<Chain>) {
        let self_address = Address::new("localhost", self_port);
        let view = View::new(self_address.clone(), 8).start();
        let chain = Chain::new(view.clone()).start();
        let mut csprng = OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        let mempool =
            Mempool::new(self_address, params, chain.clone(), view, keypair).start();
        (mempool, chain)
    }

    #[actix_rt::test]
    async fn insertion_is_idempotent() {
        let (mempool, _chain) = spawn(8001, params(3, 3));
        let tx = Transaction::new(vec![1, 2, 3]);
        mempool.send(SubmitTransaction { transaction: tx.clone() }).await.unwrap();
        mempool.send(SubmitTransaction { transaction: tx.clone() }).await.unwrap();
        let MempoolContents { pool } = mempool.send(GetMempool).await.unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&tx.hash()), Some(&tx));
    }

    #[actix_rt::test]
    async fn fetching_an_unknown_hash_aborts_the_exchange() {
        let (mempool, _chain) = spawn(8001, params(3, 3));
        let tx = Transaction::new(vec![1, 2, 3]);
        mempool.send(SubmitTransaction { transaction: tx.clone() }).await.unwrap();

        let FetchResult(found) = mempool
            .send(FetchTransactions { hashes: vec![tx.hash()] })
            .await
            .unwrap();
        assert_eq!(found, Some(vec![tx.clone()]));

        let FetchResult(found) = mempool
            .send(FetchTransactions { hashes: vec![tx.hash(), "bogus".to_owned()] })
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[actix_rt::test]
    async fn digest_reply_lists_exactly_the_missing_hashes() {
        let (mempool, _chain) = spawn(8001, params(3, 3));
        let known = Transaction::new(vec![1]);
        mempool.send(SubmitTransaction { transaction: known.clone() }).await.unwrap();

        // The sender is unreachable so the triggered fetch just logs
        let from = Address::new("localhost", 1);
        let unknown_hash = Transaction::new(vec![2]).hash();
        let MempoolDiffResult { missing } = mempool
            .send(MempoolDigest { from, hashes: vec![known.hash(), unknown_hash.clone()] })
            .await
            .unwrap();
        assert_eq!(missing, vec![unknown_hash]);
    }

    #[actix_rt::test]
    async fn block_construction_fires_after_the_final_round() {
        // quorum_size 3: exactly two completed reconciliations build a block
        let (mempool, chain) = spawn(8001, params(3, 3));
        let from = Address::new("localhost", 1);

        mempool.send(MempoolDigest { from: from.clone(), hashes: vec![] }).await.unwrap();
        let TipResult { height, .. } = chain.send(GetTip).await.unwrap();
        assert_eq!(height, 1);
        let state = mempool.send(GetRoundState).await.unwrap();
        assert_eq!(state.mempool_rounds, 1);

        mempool.send(MempoolDigest { from, hashes: vec![] }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        let TipResult { tip, height } = chain.send(GetTip).await.unwrap();
        assert_eq!(height, 2);
        assert_eq!(tip.block_id, 1);
    }

    #[actix_rt::test]
    async fn aborting_a_stalled_round_resets_the_counters() {
        let (mempool, _chain) = spawn(8001, params(3, 3));
        mempool.send(ReceiveQuorumReady).await.unwrap();
        let state = mempool.send(GetRoundState).await.unwrap();
        assert_eq!(state.quorum_ready_votes, 1);

        mempool.send(AbortRound { round: 0 }).await.unwrap();
        let state = mempool.send(GetRoundState).await.unwrap();
        assert_eq!(state.quorum_ready_votes, 0);
        assert_eq!(state.mempool_rounds, 0);
    }

    #[actix_rt::test]
    async fn quorum_membership_follows_the_derived_committee() {
        // A single-node network always elects port 8000
        let (mempool, _chain) = spawn(8000, params(1, 3));
        assert!(mempool.send(InQuorum).await.unwrap());

        let (outsider, _chain) = spawn(9999, params(1, 3));
        assert!(!outsider.send(InQuorum).await.unwrap());
    }
}
