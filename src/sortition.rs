//! Deterministic committee derivation (sortition).
//!
//! Every node derives the same committee from the same chain tip without
//! communication: the tip's hash seeds a reproducible generator which
//! draws committee ports from the configured network range.

use crate::ledger::{Address, Block};
use crate::Result;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Construction-time network shape, shared by every node in a deployment.
#[derive(Debug, Clone)]
pub struct NetworkParams {
    /// Host committee members are addressed on (single-host deployments).
    pub host: String,
    /// Total number of nodes in the network.
    pub num_nodes: u16,
    /// Number of committee members drawn per election.
    pub quorum_size: usize,
    /// First port of the contiguous port range nodes listen on.
    pub starting_port: u16,
}

/// Derives the committee for `block`. The result is an ordered multiset:
/// draws are independent and repeats are permitted, so callers must not
/// assume distinct members.
pub fn derive_committee(block: &Block, nonce: u64, params: &NetworkParams) -> Result<Vec<Address>> {
    let digest = block.digest(nonce)?;
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let seed = u64::from_be_bytes(prefix) % params.num_nodes as u64;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut committee = Vec::with_capacity(params.quorum_size);
    for _ in 0..params.quorum_size {
        let port = params.starting_port + rng.gen_range(0, params.num_nodes);
        committee.push(Address::new(&params.host, port));
    }
    Ok(committee)
}

/// The committee members other than `own`, deduplicated, in draw order.
pub fn committee_peers(committee: &[Address], own: &Address) -> Vec<Address> {
    let mut peers: Vec<Address> = vec![];
    for member in committee.iter() {
        if member != own && !peers.contains(member) {
            peers.push(member.clone());
        }
    }
    peers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(num_nodes: u16, quorum_size: usize, starting_port: u16) -> NetworkParams {
        NetworkParams { host: "localhost".to_owned(), num_nodes, quorum_size, starting_port }
    }

    #[test]
    fn derivation_is_deterministic() {
        let params = params(10, 5, 9000);
        let genesis = Block::genesis();
        let first = derive_committee(&genesis, 0, &params).unwrap();
        let second = derive_committee(&genesis, 0, &params).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }

    #[test]
    fn committee_ports_stay_in_range() {
        let params = params(10, 64, 9000);
        let genesis = Block::genesis();
        for member in derive_committee(&genesis, 0, &params).unwrap() {
            assert!(member.port >= 9000 && member.port < 9010);
        }
    }

    #[test]
    fn three_node_network_from_genesis() {
        let params = params(3, 3, 8000);
        let committee = derive_committee(&Block::genesis(), 0, &params).unwrap();
        assert_eq!(committee.len(), 3);
        for member in committee.iter() {
            assert!(member.port >= 8000 && member.port < 8003);
            assert_eq!(member.host, "localhost");
        }
    }

    #[test]
    fn single_node_network_always_elects_itself() {
        let params = params(1, 3, 8000);
        let committee = derive_committee(&Block::genesis(), 0, &params).unwrap();
        assert_eq!(committee, vec![
            Address::new("localhost", 8000),
            Address::new("localhost", 8000),
            Address::new("localhost", 8000),
        ]);
    }

    #[test]
    fn committee_peers_excludes_self_and_duplicates() {
        let own = Address::new("localhost", 8000);
        let committee = vec![
            Address::new("localhost", 8001),
            Address::new("localhost", 8000),
            Address::new("localhost", 8001),
            Address::new("localhost", 8002),
        ];
        let peers = committee_peers(&committee, &own);
        assert_eq!(peers, vec![
            Address::new("localhost", 8001),
            Address::new("localhost", 8002),
        ]);
    }
}
