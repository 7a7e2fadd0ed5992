use super::router::Router;
use crate::channel::Channel;
use crate::ledger::Address;
use crate::protocol::{Request, Response};
use crate::Result;

use tracing::{debug, error, info};

use actix::Addr;

use tokio::net::TcpListener;

/// Accepts inbound connections and runs the single-shot protocol on each:
/// read one request, dispatch it, write the reply if there is one, close.
pub struct Server {
    /// The address this server binds to.
    address: Address,
    /// The address of the router.
    router: Addr<Router>,
}

impl Server {
    pub fn new(address: Address, router: Addr<Router>) -> Server {
        Server { address, router }
    }

    pub async fn listen(self) -> Result<()> {
        let listener = TcpListener::bind((self.address.host.as_str(), self.address.port)).await?;
        info!("listening on {}", self.address);
        loop {
            let router = self.router.clone();
            // Only the bind is fatal; a failed accept loses one
            // connection, not the listener
            let channel: Channel<Response, Request> = match Channel::accept(&listener).await {
                Ok(channel) => channel,
                Err(err) => {
                    error!("failed to accept a connection: {:?}", err);
                    continue;
                }
            };
            tokio::spawn(async move {
                let (mut sender, mut receiver) = channel.split();
                // A malformed or absent request fails only this handler
                let request = match receiver.recv().await {
                    Ok(Some(request)) => request,
                    Ok(None) => {
                        debug!("connection closed before a request arrived");
                        return;
                    }
                    Err(err) => {
                        debug!("failed to read a request: {:?}", err);
                        return;
                    }
                };
                let response = match router.send(request).await {
                    Ok(response) => response,
                    Err(err) => {
                        error!("router unavailable: {:?}", err);
                        return;
                    }
                };
                // One-way requests produce no reply at all
                if let Some(response) = response {
                    if let Err(err) = sender.send(response).await {
                        debug!("failed to write a response: {:?}", err);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client;
    use crate::ledger::Chain;
    use crate::mempool::Mempool;
    use crate::sortition::NetworkParams;
    use crate::view::View;

    use actix::Actor;
    use ed25519_dalek::Keypair;
    use rand::rngs::OsRng;
    use tokio::net::TcpStream;

    use std::time::Duration;

    fn server(port: u16) -> Server {
        let address = Address::new("127.0.0.1", port);
        let params = NetworkParams {
            host: "127.0.0.1".to_owned(),
            num_nodes: 3,
            quorum_size: 3,
            starting_port: port,
        };
        let view = View::new(address.clone(), 8).start();
        let chain = Chain::new(view.clone()).start();
        let mut csprng = OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        let mempool =
            Mempool::new(address.clone(), params, chain.clone(), view.clone(), keypair).start();
        let router = Router::new(address.clone(), view, chain, mempool).start();
        Server::new(address, router)
    }

    #[actix_rt::test]
    async fn binding_an_occupied_port_is_fatal() {
        let _occupant = TcpListener::bind(("127.0.0.1", 21500)).await.unwrap();
        assert!(server(21500).listen().await.is_err());
    }

    #[actix_rt::test]
    async fn keeps_serving_after_an_aborted_connection() {
        let address = Address::new("127.0.0.1", 21600);
        let server = server(21600);
        tokio::spawn(async move { server.listen().await.unwrap() });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // A peer that connects and hangs up without a request fails only
        // its own handler
        let aborted = TcpStream::connect(("127.0.0.1", 21600)).await.unwrap();
        drop(aborted);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let response = client::oneshot(&address, Request::Ping).await.unwrap();
        assert!(matches!(response, Some(Response::Ack)));
    }
}
