use super::block::Block;
use super::transaction::TxHash;
use crate::client;
use crate::mempool::PruneTransactions;
use crate::protocol::Request;
use crate::view::{GetPeers, PeersResult, View};

use tracing::{debug, error, info};

use actix::{Actor, Addr, Context, Handler, MessageResult, Recipient};
use actix_derive::{Message, MessageResponse};

use std::collections::BTreeMap;

/// The append-only chain of blocks, starting at genesis.
///
/// Blocks arriving ahead of the tip are buffered in `pending` and applied
/// once the intermediate blocks have landed.
pub struct Chain {
    blocks: Vec<Block>,
    pending: BTreeMap<u64, Block>,
    view: Addr<View>,
    pruner: Option<Recipient<PruneTransactions>>,
}

impl Chain {
    pub fn new(view: Addr<View>) -> Self {
        Chain { blocks: vec![Block::genesis()], pending: BTreeMap::new(), view, pruner: None }
    }

    /// Appends a block which is already known to be the expected successor,
    /// prunes its transactions from the mempool and gossips it onward.
    fn apply(&mut self, block: Block) {
        info!("appended {}", block);
        let hashes: Vec<TxHash> = block.transactions.keys().cloned().collect();
        if let Some(pruner) = &self.pruner {
            let _ = pruner.do_send(PruneTransactions { hashes });
        }
        self.blocks.push(block.clone());

        let view = self.view.clone();
        tokio::spawn(async move {
            match view.send(GetPeers).await {
                Ok(PeersResult { peers }) => {
                    client::fanout_oneway(peers, Request::InsertBlock(InsertBlock { block }))
                        .await;
                }
                Err(err) => error!("failed to snapshot peers: {:?}", err),
            }
        });
    }

    fn insert(&mut self, block: Block) {
        let height = self.blocks.len() as u64;
        if block.block_id == height {
            self.apply(block);
            // Backfill: drain consecutively numbered buffered successors
            loop {
                let next = self.blocks.len() as u64;
                match self.pending.remove(&next) {
                    Some(buffered) => self.apply(buffered),
                    None => break,
                }
            }
        } else if block.block_id > height {
            debug!("buffering {} ahead of height {}", block, height);
            self.pending.insert(block.block_id, block);
        } else {
            debug!("ignoring stale {}", block);
        }
    }
}

impl Actor for Chain {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("chain started at genesis");
    }
}

/// Offer a block to the chain. Only the expected successor is appended;
/// blocks further ahead are buffered and stale blocks are dropped.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct InsertBlock {
    pub block: Block,
}

impl Handler<InsertBlock> for Chain {
    type Result = ();

    fn handle(&mut self, msg: InsertBlock, _ctx: &mut Context<Self>) -> Self::Result {
        self.insert(msg.block);
    }
}

/// Snapshot of the chain tip, used for committee derivation and block
/// construction. `height` is the id the next block must carry.
#[derive(Debug, Clone, Message)]
#[rtype(result = "TipResult")]
pub struct GetTip;

#[derive(Debug, Clone, MessageResponse)]
pub struct TipResult {
    pub tip: Block,
    pub height: u64,
}

impl Handler<GetTip> for Chain {
    type Result = MessageResult<GetTip>;

    fn handle(&mut self, _msg: GetTip, _ctx: &mut Context<Self>) -> Self::Result {
        // The chain always contains at least the genesis block
        let tip = self.blocks.last().cloned().unwrap();
        MessageResult(TipResult { tip, height: self.blocks.len() as u64 })
    }
}

/// Registers the mempool recipient notified when block transactions are
/// applied. Wired once at startup.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SetPruner {
    pub pruner: Recipient<PruneTransactions>,
}

impl Handler<SetPruner> for Chain {
    type Result = ();

    fn handle(&mut self, msg: SetPruner, _ctx: &mut Context<Self>) -> Self::Result {
        self.pruner = Some(msg.pruner);
    }
}
