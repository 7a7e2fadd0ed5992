//! The node wire protocol.
//!
//! A connection carries exactly one request and at most one reply, then
//! closes. One-way kinds (`SubmitTransaction`, `QuorumReady`,
//! `ProposeBlock`) receive no reply at all.

use crate::crypto::BlockContainer;
use crate::ledger::{Address, InsertBlock, Transaction, TxHash};
use crate::mempool::{FetchTransactions, MempoolDigest, SubmitTransaction};
use crate::view::Handshake;

use actix_derive::{Message, MessageResponse};

#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "Option<Response>")]
pub enum Request {
    /// Peer admission handshake.
    Handshake(Handshake),
    /// Peer discovery.
    QueryPeers,
    /// Block propagation.
    InsertBlock(InsertBlock),
    /// Liveness probe.
    Ping,
    /// Transaction gossip (one-way).
    SubmitTransaction(SubmitTransaction),
    /// Reconciliation hash exchange.
    MempoolDigest(MempoolDigest),
    /// Missing-transaction fetch.
    FetchTransactions(FetchTransactions),
    /// Election round-ready vote (one-way).
    QuorumReady,
    /// Candidate block distribution (one-way).
    ProposeBlock(ProposeBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize, MessageResponse)]
pub enum Response {
    HandshakeAccepted(Address),
    HandshakeRejected(Address),
    Peers(Vec<Address>),
    Ack,
    /// Digest reply: the hashes the recipient lacks. Empty means the
    /// recipient already holds every offered transaction.
    MempoolDiff(Vec<TxHash>),
    Transactions(Vec<Transaction>),
    Unknown,
}

/// A signed candidate block sent to the committee for the election.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "()")]
pub struct ProposeBlock {
    pub container: BlockContainer,
}
