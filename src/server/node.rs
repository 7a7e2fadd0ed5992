use super::router::Router;
use super::server::Server;
use super::settings::Settings;
use crate::heartbeat::Heartbeat;
use crate::ledger::{Address, Chain, SetPruner};
use crate::mempool::Mempool;
use crate::view::{self, View};
use crate::Result;

use actix::{Actor, Addr, Arbiter};
use ed25519_dalek::Keypair;
use rand::rngs::OsRng;
use tracing::info;

use std::io::{BufReader, Read, Write};
use std::time::Duration;

/// Delay between starting the dialer and starting the heartbeat monitor.
pub const BOOTSTRAP_WARMUP: Duration = Duration::from_secs(10);

/// Starts a node: the listener, the startup dialer and the heartbeat
/// monitor, all sharing one set of state actors.
pub fn run(settings: Settings) -> Result<()> {
    let self_address = settings.self_address();
    let params = settings.network_params();
    let candidates = settings.bootstrap_addresses()?;
    let keypair = read_or_generate_keypair(&self_address, settings.keypair.clone())?;
    let min_connections = settings.min_connections;
    let max_peers = settings.max_peers;
    let evict_after = settings.evict_after;

    info!("node starting on {}", self_address);

    let execution = async move {
        let view = View::new(self_address.clone(), max_peers).start();
        let chain = Chain::new(view.clone()).start();
        let mempool = Mempool::new(
            self_address.clone(),
            params,
            chain.clone(),
            view.clone(),
            keypair,
        )
        .start();
        chain.do_send(SetPruner { pruner: mempool.clone().recipient() });

        let listener_execution = {
            let router =
                Router::new(self_address.clone(), view.clone(), chain.clone(), mempool.clone())
                    .start();
            let server = Server::new(self_address.clone(), router);
            async move { server.listen().await.unwrap() }
        };

        let bootstrap_execution = {
            let view = view.clone();
            let self_address = self_address.clone();
            async move {
                let _heartbeat = bootstrap_and_monitor(
                    view,
                    self_address,
                    candidates,
                    min_connections,
                    BOOTSTRAP_WARMUP,
                    evict_after,
                )
                .await;
            }
        };

        let arbiter = Arbiter::new();
        arbiter.spawn(listener_execution);
        arbiter.spawn(bootstrap_execution);
    };

    let arbiter = Arbiter::new();
    arbiter.spawn(execution);

    Ok(())
}

/// Dials any configured bootstrap candidates, waits out the warm-up and
/// then starts the heartbeat monitor. Seed nodes (no candidates) skip
/// straight to monitoring the peers their listener admits.
async fn bootstrap_and_monitor(
    view: Addr<View>,
    self_address: Address,
    candidates: Vec<Address>,
    min_connections: usize,
    warmup: Duration,
    evict_after: Option<u32>,
) -> Addr<Heartbeat> {
    if !candidates.is_empty() {
        view::bootstrap(view.clone(), self_address, candidates, min_connections).await;
    }
    tokio::time::sleep(warmup).await;
    Heartbeat::new(view, evict_after).start()
}

/// Loads the node keypair from the settings, from a previous run, or
/// generates and persists a fresh one.
fn read_or_generate_keypair(self_address: &Address, keypair: Option<String>) -> Result<Keypair> {
    if let Some(keypair_hex) = keypair {
        let keypair_bytes = hex::decode(keypair_hex)?;
        return Ok(Keypair::from_bytes(&keypair_bytes)?);
    }
    let dir_path = format!("/tmp/quorum-node-{}", self_address.port);
    let keypair_path = format!("{}/node.keypair", dir_path);
    match std::fs::File::open(keypair_path.clone()) {
        Ok(file) => {
            let mut buf_reader = BufReader::new(file);
            let mut contents = String::new();
            buf_reader.read_to_string(&mut contents)?;
            let keypair_bytes = hex::decode(contents.trim())?;
            Ok(Keypair::from_bytes(&keypair_bytes)?)
        }
        Err(_) => {
            let mut csprng = OsRng {};
            let keypair = Keypair::generate(&mut csprng);
            std::fs::create_dir_all(&dir_path)?;
            let mut file = std::fs::File::create(keypair_path)?;
            file.write_all(hex::encode(keypair.to_bytes()).as_bytes())?;
            Ok(keypair)
        }
    }
}
