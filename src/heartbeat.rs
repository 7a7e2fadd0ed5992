//! Periodic liveness probing of the local peers.
//!
//! Every interval each peer is pinged over a fresh connection. Failures
//! are logged; eviction of a persistently unresponsive peer is a policy
//! knob (`evict_after`) and is disabled by default.

use crate::client;
use crate::ledger::Address;
use crate::protocol::{Request, Response};
use crate::view::{GetPeers, PeersResult, RemovePeer, View};

use tracing::{debug, error, info, warn};

use actix::{Actor, Addr, AsyncContext, Context, Handler};
use actix_derive::Message;

use std::collections::HashMap;
use std::time::Duration;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub struct Heartbeat {
    view: Addr<View>,
    /// Consecutive failures after which a peer is evicted; `None` disables
    /// eviction entirely.
    evict_after: Option<u32>,
    failures: HashMap<Address, u32>,
}

impl Heartbeat {
    pub fn new(view: Addr<View>, evict_after: Option<u32>) -> Self {
        Heartbeat { view, evict_after, failures: HashMap::new() }
    }
}

impl Actor for Heartbeat {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        info!("heartbeat monitor started");
        ctx.run_interval(HEARTBEAT_INTERVAL, |_act, ctx| {
            ctx.notify(Beat);
        });
    }
}

/// One probing pass over the current peer snapshot.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct Beat;

impl Handler<Beat> for Heartbeat {
    type Result = ();

    fn handle(&mut self, _msg: Beat, ctx: &mut Context<Self>) -> Self::Result {
        let view = self.view.clone();
        let addr = ctx.address();
        tokio::spawn(async move {
            let peers = match view.send(GetPeers).await {
                Ok(PeersResult { peers }) => peers,
                Err(err) => {
                    error!("failed to snapshot peers: {:?}", err);
                    return;
                }
            };
            let mut healthy = vec![];
            let mut failed = vec![];
            for (peer, outcome) in client::fanout(peers, Request::Ping).await {
                match outcome {
                    Ok(Some(Response::Ack)) => healthy.push(peer),
                    Ok(_) => {
                        debug!("unexpected ping reply from {}", peer);
                        failed.push(peer);
                    }
                    Err(err) => {
                        debug!("no ping reply from {}: {:?}", peer, err);
                        failed.push(peer);
                    }
                }
            }
            let _ = addr.send(BeatOutcome { healthy, failed }).await;
        });
    }
}

/// Results of a probing pass: per-peer failure counters are updated and
/// the eviction policy applied.
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct BeatOutcome {
    pub healthy: Vec<Address>,
    pub failed: Vec<Address>,
}

impl Handler<BeatOutcome> for Heartbeat {
    type Result = ();

    fn handle(&mut self, msg: BeatOutcome, _ctx: &mut Context<Self>) -> Self::Result {
        for peer in msg.healthy {
            self.failures.remove(&peer);
        }
        for peer in msg.failed {
            let count = self.failures.entry(peer.clone()).or_insert(0);
            *count += 1;
            warn!("peer {} failed its heartbeat ({} consecutive)", peer, count);
            if let Some(limit) = self.evict_after {
                if *count >= limit {
                    info!("evicting unresponsive peer {}", peer);
                    self.failures.remove(&peer);
                    self.view.do_send(RemovePeer { address: peer });
                }
            }
        }
    }
}
