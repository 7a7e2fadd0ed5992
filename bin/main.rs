use tracing::info;
use tracing_subscriber;

use clap::{value_t, values_t, App, Arg};

use quorum_node::server::node;
use quorum_node::server::Settings;
use quorum_node::Result;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_level(false)
        .with_target(false)
        .without_time()
        .compact()
        .with_max_level(tracing::Level::INFO)
        .init();

    let matches = App::new("quorum-node")
        .version("0.1")
        .about("Runs a sortition-committee blockchain node")
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("HOST")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max-peers")
                .long("max-peers")
                .value_name("MAX_PEERS")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("min-connections")
                .long("min-connections")
                .value_name("MIN_CONNECTIONS")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("num-nodes")
                .long("num-nodes")
                .value_name("NUM_NODES")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("quorum-size")
                .long("quorum-size")
                .value_name("QUORUM_SIZE")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("starting-port")
                .long("starting-port")
                .value_name("STARTING_PORT")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bootstrap-peer")
                .short("b")
                .long("bootstrap-peer")
                .value_name("BOOTSTRAP_PEER")
                .multiple(true),
        )
        .arg(
            Arg::with_name("evict-after")
                .long("evict-after")
                .value_name("EVICT_AFTER")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("keypair")
                .long("keypair")
                .value_name("KEYPAIR")
                .takes_value(true)
                .required(false),
        )
        .get_matches();

    let defaults = Settings::default();
    let settings = Settings {
        host: value_t!(matches.value_of("host"), String).unwrap_or(defaults.host),
        port: value_t!(matches.value_of("port"), u16).unwrap_or(defaults.port),
        max_peers: value_t!(matches.value_of("max-peers"), usize).unwrap_or(defaults.max_peers),
        min_connections: value_t!(matches.value_of("min-connections"), usize)
            .unwrap_or(defaults.min_connections),
        num_nodes: value_t!(matches.value_of("num-nodes"), u16).unwrap_or(defaults.num_nodes),
        quorum_size: value_t!(matches.value_of("quorum-size"), usize)
            .unwrap_or(defaults.quorum_size),
        starting_port: value_t!(matches.value_of("starting-port"), u16)
            .unwrap_or(defaults.starting_port),
        bootstrap_peers: values_t!(matches.values_of("bootstrap-peer"), String)
            .unwrap_or(defaults.bootstrap_peers),
        evict_after: value_t!(matches.value_of("evict-after"), u32).ok(),
        keypair: matches.value_of("keypair").map(String::from),
    };

    let sys = actix::System::new();
    sys.block_on(async move {
        node::run(settings).unwrap();

        let sig = if cfg!(unix) {
            use futures::future::FutureExt;
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt()).unwrap();
            let mut sigterm = signal(SignalKind::terminate()).unwrap();

            futures::select! {
                _ = sigint.recv().fuse() => "SIGINT",
                _ = sigterm.recv().fuse() => "SIGTERM"
            }
        } else {
            tokio::signal::ctrl_c().await.unwrap();
            "Ctrl+C"
        };
        info!("Got {}, stopping...", sig);

        actix::System::current().stop();
    });
    sys.run().unwrap();

    Ok(())
}
