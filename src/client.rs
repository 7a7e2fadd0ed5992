//! Outbound peer exchanges: one fresh connection per request, with a
//! timeout on the whole exchange so an unresponsive peer can never stall
//! a caller indefinitely.

use crate::channel::Channel;
use crate::ledger::Address;
use crate::protocol::{Request, Response};
use crate::{Error, Result};

use tracing::{debug, error};

use std::time::Duration;
use tokio::time::timeout;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends a single request and waits for the reply.
pub async fn oneshot(address: &Address, request: Request) -> Result<Option<Response>> {
    match timeout(REQUEST_TIMEOUT, exchange(address, request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

async fn exchange(address: &Address, request: Request) -> Result<Option<Response>> {
    let channel: Channel<Request, Response> = Channel::connect(address).await?;
    let (mut sender, mut receiver) = channel.split();
    let () = sender.send(request).await?;
    let response = receiver.recv().await?;
    // ... the connection closes when the halves drop
    Ok(response)
}

/// Sends a single request without waiting for a reply.
pub async fn oneway(address: &Address, request: Request) -> Result<()> {
    match timeout(REQUEST_TIMEOUT, send_only(address, request)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout),
    }
}

async fn send_only(address: &Address, request: Request) -> Result<()> {
    let channel: Channel<Request, Response> = Channel::connect(address).await?;
    let (mut sender, _receiver) = channel.split();
    let () = sender.send(request).await?;
    Ok(())
}

/// Best-effort fan-out of a request to every address, collecting each
/// peer's outcome. A failure against one peer never aborts the rest.
pub async fn fanout(
    addresses: Vec<Address>,
    request: Request,
) -> Vec<(Address, Result<Option<Response>>)> {
    let mut client_futs = vec![];
    for address in addresses {
        let request = request.clone();
        client_futs.push(tokio::spawn(async move {
            let result = oneshot(&address, request).await;
            (address, result)
        }));
    }
    let mut outcomes = vec![];
    for fut in client_futs {
        match fut.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(_) => error!("error: joining client futures"),
        }
    }
    outcomes
}

/// Best-effort one-way fan-out. Send failures are logged and skipped.
pub async fn fanout_oneway(addresses: Vec<Address>, request: Request) {
    let mut client_futs = vec![];
    for address in addresses {
        let request = request.clone();
        client_futs.push(tokio::spawn(async move {
            if let Err(err) = oneway(&address, request).await {
                debug!("send to {} failed: {:?}", address, err);
            }
        }));
    }
    for fut in client_futs {
        if let Err(_) = fut.await {
            error!("error: joining client futures");
        }
    }
}
