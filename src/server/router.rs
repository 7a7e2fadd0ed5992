use crate::ledger::{Address, Chain};
use crate::mempool::{FetchResult, Mempool, MempoolDiffResult, ReceiveQuorumReady};
use crate::protocol::{Request, Response};
use crate::view::{GetPeers, PeersResult, View};

use tracing::{debug, error};

use actix::{Actor, Addr, Context, Handler, ResponseFuture};

/// Routes each inbound request to the component owning the touched state.
pub struct Router {
    self_address: Address,
    view: Addr<View>,
    chain: Addr<Chain>,
    mempool: Addr<Mempool>,
}

impl Router {
    pub fn new(
        self_address: Address,
        view: Addr<View>,
        chain: Addr<Chain>,
        mempool: Addr<Mempool>,
    ) -> Self {
        Router { self_address, view, chain, mempool }
    }
}

impl Actor for Router {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("router started");
    }
}

impl Handler<Request> for Router {
    type Result = ResponseFuture<Option<Response>>;

    fn handle(&mut self, msg: Request, _ctx: &mut Context<Self>) -> Self::Result {
        let self_address = self.self_address.clone();
        let view = self.view.clone();
        let chain = self.chain.clone();
        let mempool = self.mempool.clone();
        Box::pin(async move {
            match msg {
                Request::Handshake(handshake) => {
                    debug!("{} requested a connection", handshake.from);
                    match view.send(handshake).await {
                        Ok(true) => Some(Response::HandshakeAccepted(self_address)),
                        Ok(false) => Some(Response::HandshakeRejected(self_address)),
                        Err(err) => {
                            error!("view unavailable: {:?}", err);
                            None
                        }
                    }
                }
                Request::QueryPeers => match view.send(GetPeers).await {
                    Ok(PeersResult { peers }) => Some(Response::Peers(peers)),
                    Err(err) => {
                        error!("view unavailable: {:?}", err);
                        None
                    }
                },
                Request::InsertBlock(insert) => match chain.send(insert).await {
                    Ok(()) => Some(Response::Ack),
                    Err(err) => {
                        error!("chain unavailable: {:?}", err);
                        None
                    }
                },
                Request::Ping => Some(Response::Ack),
                Request::SubmitTransaction(submit) => {
                    mempool.do_send(submit);
                    None
                }
                Request::MempoolDigest(digest) => match mempool.send(digest).await {
                    Ok(MempoolDiffResult { missing }) => Some(Response::MempoolDiff(missing)),
                    Err(err) => {
                        error!("mempool unavailable: {:?}", err);
                        None
                    }
                },
                Request::FetchTransactions(fetch) => match mempool.send(fetch).await {
                    Ok(FetchResult(Some(transactions))) => {
                        Some(Response::Transactions(transactions))
                    }
                    // Protocol violation: abort the exchange with no reply
                    Ok(FetchResult(None)) => None,
                    Err(err) => {
                        error!("mempool unavailable: {:?}", err);
                        None
                    }
                },
                Request::QuorumReady => {
                    mempool.do_send(ReceiveQuorumReady);
                    None
                }
                Request::ProposeBlock(propose) => {
                    mempool.do_send(propose);
                    None
                }
            }
        })
    }
}
