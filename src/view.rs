//! The view holds the set of local peers this node gossips with.
//!
//! The set is bounded by `max_peers`; every fan-out works over a snapshot
//! obtained with [GetPeers] rather than the live set.

use crate::client;
use crate::ledger::Address;
use crate::protocol::{Request, Response};

use tracing::{debug, info};

use actix::{Actor, Addr, Context, Handler, MessageResult};
use actix_derive::{Message, MessageResponse};

use std::collections::HashSet;

pub struct View {
    self_address: Address,
    max_peers: usize,
    peers: HashSet<Address>,
}

impl View {
    pub fn new(self_address: Address, max_peers: usize) -> Self {
        View { self_address, max_peers, peers: HashSet::new() }
    }

    fn eligible(&self, address: &Address) -> bool {
        self.peers.len() < self.max_peers.saturating_sub(1)
            && *address != self.self_address
            && !self.peers.contains(address)
    }

    fn establish(&mut self, address: Address) {
        info!("added peer {}", address);
        self.peers.insert(address);
    }
}

impl Actor for View {
    type Context = Context<Self>;

    fn started(&mut self, _ctx: &mut Context<Self>) {
        debug!("view started");
    }
}

/// Peer admission request carried on the wire. Eligible requesters are
/// recorded as local peers as a side effect.
#[derive(Debug, Clone, Serialize, Deserialize, Message)]
#[rtype(result = "bool")]
pub struct Handshake {
    pub from: Address,
}

impl Handler<Handshake> for View {
    type Result = MessageResult<Handshake>;

    fn handle(&mut self, msg: Handshake, _ctx: &mut Context<Self>) -> Self::Result {
        let eligible = self.eligible(&msg.from);
        if eligible {
            self.establish(msg.from);
        }
        MessageResult(eligible)
    }
}

/// Capacity / self / duplicate check, optionally recording the peer.
#[derive(Debug, Clone, Message)]
#[rtype(result = "bool")]
pub struct EligibleConnection {
    pub address: Address,
    pub connect_if_eligible: bool,
}

impl Handler<EligibleConnection> for View {
    type Result = MessageResult<EligibleConnection>;

    fn handle(&mut self, msg: EligibleConnection, _ctx: &mut Context<Self>) -> Self::Result {
        let eligible = self.eligible(&msg.address);
        if eligible && msg.connect_if_eligible {
            self.establish(msg.address);
        }
        MessageResult(eligible)
    }
}

/// Unconditionally records a peer (used by the dialer once the remote has
/// accepted the handshake).
#[derive(Debug, Clone, Message)]
#[rtype(result = "()")]
pub struct EstablishPeer {
    pub address: Address,
}

impl Handler<EstablishPeer> for View {
    type Result = ();

    fn handle(&mut self, msg: EstablishPeer, _ctx: &mut Context<Self>) -> Self::Result {
        self.establish(msg.address);
    }
}

/// Snapshot of the current peer set.
#[derive(Debug, Clone, Message)]
#[rtype(result = "PeersResult")]
pub struct GetPeers;

#[derive(Debug, Clone, MessageResponse)]
pub struct PeersResult {
    pub peers: Vec<Address>,
}

impl Handler<GetPeers> for View {
    type Result = MessageResult<GetPeers>;

    fn handle(&mut self, _msg: GetPeers, _ctx: &mut Context<Self>) -> Self::Result {
        MessageResult(PeersResult { peers: self.peers.iter().cloned().collect() })
    }
}

/// Drops a peer from the set (heartbeat eviction policy).
#[derive(Debug, Clone, Message)]
#[rtype(result = "bool")]
pub struct RemovePeer {
    pub address: Address,
}

impl Handler<RemovePeer> for View {
    type Result = MessageResult<RemovePeer>;

    fn handle(&mut self, msg: RemovePeer, _ctx: &mut Context<Self>) -> Self::Result {
        let removed = self.peers.remove(&msg.address);
        if removed {
            info!("removed peer {}", msg.address);
        }
        MessageResult(removed)
    }
}

/// The startup dialer: walks the candidate list attempting handshakes
/// until enough peers are established or the list is exhausted. Dial
/// failures are logged and skipped.
pub async fn bootstrap(
    view: Addr<View>,
    self_address: Address,
    candidates: Vec<Address>,
    min_connections: usize,
) {
    let mut established = 0;
    for candidate in candidates {
        if established >= min_connections {
            break;
        }
        if candidate == self_address {
            continue;
        }
        let request = Request::Handshake(Handshake { from: self_address.clone() });
        match client::oneshot(&candidate, request).await {
            Ok(Some(Response::HandshakeAccepted(peer))) => {
                if view.send(EstablishPeer { address: peer }).await.is_ok() {
                    established += 1;
                }
            }
            Ok(Some(Response::HandshakeRejected(peer))) => {
                debug!("{} rejected the handshake", peer);
            }
            Ok(_) => debug!("unexpected handshake reply from {}", candidate),
            Err(err) => debug!("failed to reach {}: {:?}", candidate, err),
        }
    }
    info!("bootstrap finished with {} new peers", established);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(max_peers: usize) -> Addr<View> {
        View::new(Address::new("localhost", 8000), max_peers).start()
    }

    #[actix_rt::test]
    async fn rejects_self_and_duplicates() {
        let view = view(8);
        let peer = Address::new("localhost", 8001);

        let accepted = view.send(Handshake { from: peer.clone() }).await.unwrap();
        assert!(accepted);
        let accepted = view.send(Handshake { from: peer }).await.unwrap();
        assert!(!accepted);

        let own = Address::new("localhost", 8000);
        let accepted = view.send(Handshake { from: own }).await.unwrap();
        assert!(!accepted);
    }

    #[actix_rt::test]
    async fn capacity_is_bounded_below_max_peers() {
        let view = view(3);
        for port in 8001..8003u16 {
            view.send(EstablishPeer { address: Address::new("localhost", port) })
                .await
                .unwrap();
        }
        // Two peers recorded: no spare capacity under max_peers = 3
        let eligible = view
            .send(EligibleConnection {
                address: Address::new("localhost", 8005),
                connect_if_eligible: true,
            })
            .await
            .unwrap();
        assert!(!eligible);
        let PeersResult { peers } = view.send(GetPeers).await.unwrap();
        assert_eq!(peers.len(), 2);
    }

    #[actix_rt::test]
    async fn zero_capacity_rejects_every_peer() {
        let view = view(0);
        let accepted =
            view.send(Handshake { from: Address::new("localhost", 8001) }).await.unwrap();
        assert!(!accepted);
        let PeersResult { peers } = view.send(GetPeers).await.unwrap();
        assert!(peers.is_empty());
    }

    #[actix_rt::test]
    async fn removal_is_observable() {
        let view = view(8);
        let peer = Address::new("localhost", 8001);
        view.send(EstablishPeer { address: peer.clone() }).await.unwrap();
        assert!(view.send(RemovePeer { address: peer.clone() }).await.unwrap());
        assert!(!view.send(RemovePeer { address: peer }).await.unwrap());
    }
}
