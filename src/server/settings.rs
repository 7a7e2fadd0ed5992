use crate::ledger::Address;
use crate::sortition::NetworkParams;
use crate::{Error, Result};

/// Construction-time configuration. Nothing here is runtime-mutable.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Host this node binds and advertises.
    pub host: String,
    /// Listening port.
    pub port: u16,
    /// Upper bound on the local peer set.
    pub max_peers: usize,
    /// How many peers the startup dialer tries to establish.
    pub min_connections: usize,
    /// Total network size.
    pub num_nodes: u16,
    /// Committee size drawn per election.
    pub quorum_size: usize,
    /// First port of the network's contiguous port range.
    pub starting_port: u16,
    /// Bootstrap candidates, as `host:port` strings.
    pub bootstrap_peers: Vec<String>,
    /// Consecutive heartbeat failures before eviction; `None` disables it.
    pub evict_after: Option<u32>,
    /// Hex-encoded ed25519 keypair; generated and persisted when absent.
    pub keypair: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host: "localhost".to_owned(),
            port: 8000,
            max_peers: 8,
            min_connections: 3,
            num_nodes: 3,
            quorum_size: 3,
            starting_port: 8000,
            bootstrap_peers: vec![],
            evict_after: None,
            keypair: None,
        }
    }
}

impl Settings {
    pub fn self_address(&self) -> Address {
        Address::new(&self.host, self.port)
    }

    pub fn network_params(&self) -> NetworkParams {
        NetworkParams {
            host: self.host.clone(),
            num_nodes: self.num_nodes,
            quorum_size: self.quorum_size,
            starting_port: self.starting_port,
        }
    }

    pub fn bootstrap_addresses(&self) -> Result<Vec<Address>> {
        self.bootstrap_peers.iter().map(|peer| parse_address(peer)).collect()
    }
}

fn parse_address(s: &str) -> Result<Address> {
    let mut parts = s.rsplitn(2, ':');
    let port = parts.next().and_then(|p| p.parse::<u16>().ok());
    let host = parts.next();
    match (host, port) {
        (Some(host), Some(port)) if !host.is_empty() => Ok(Address::new(host, port)),
        _ => Err(Error::AddressParseError(s.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_pairs() {
        let settings = Settings {
            bootstrap_peers: vec!["localhost:8001".to_owned(), "10.0.0.2:9000".to_owned()],
            ..Settings::default()
        };
        let addresses = settings.bootstrap_addresses().unwrap();
        assert_eq!(addresses, vec![
            Address::new("localhost", 8001),
            Address::new("10.0.0.2", 9000),
        ]);
    }

    #[test]
    fn rejects_malformed_candidates() {
        let settings = Settings {
            bootstrap_peers: vec!["no-port".to_owned()],
            ..Settings::default()
        };
        assert!(settings.bootstrap_addresses().is_err());
    }
}
