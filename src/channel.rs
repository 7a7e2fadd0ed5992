//! A typed, length-delimited bincode channel used for every peer exchange.
//!
//! Each logical exchange opens a fresh connection, carries exactly one
//! request and at most one reply, then closes by dropping the halves.

use futures::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_serde::formats::*;
use tokio_serde::Framed;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::ledger::Address;

#[derive(Debug)]
pub enum Error<I, O>
where
    I: for<'de> Deserialize<'de> + Serialize,
    O: for<'de> Deserialize<'de> + Serialize,
{
    IO(std::io::Error),
    ReadError(<Reader<I, O> as futures::TryStream>::Error),
    WriteError(<Writer<I, O> as futures::Sink<I>>::Error),
}

pub type Reader<I, O> =
    Framed<FramedRead<OwnedReadHalf, LengthDelimitedCodec>, O, I, Bincode<O, I>>;

pub type Writer<I, O> =
    Framed<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>, O, I, Bincode<O, I>>;

pub struct Receiver<I, O> {
    reader: Reader<I, O>,
}

impl<I, O> Receiver<I, O>
where
    I: for<'de> Deserialize<'de> + Serialize,
    O: for<'de> Deserialize<'de> + Serialize,
    Reader<I, O>: TryStream<Ok = O> + Unpin,
{
    pub async fn recv(&mut self) -> Result<Option<O>, Error<I, O>> {
        Ok(self.reader.try_next().await.map_err(Error::ReadError)?)
    }
}

pub struct Sender<I, O> {
    writer: Writer<I, O>,
}

impl<I, O> Sender<I, O>
where
    I: for<'de> Deserialize<'de> + Serialize,
    O: for<'de> Deserialize<'de> + Serialize,
    Writer<I, O>: Sink<I> + Unpin,
{
    pub async fn send(&mut self, item: I) -> Result<(), Error<I, O>> {
        Ok(self.writer.send(item).await.map_err(Error::WriteError)?)
    }
}

/// A one-shot message channel sending `I` and receiving `O`.
pub struct Channel<I, O> {
    sender: Sender<I, O>,
    receiver: Receiver<I, O>,
}

impl<I, O> Channel<I, O>
where
    I: for<'de> Deserialize<'de> + Serialize,
    O: for<'de> Deserialize<'de> + Serialize,
{
    pub async fn connect(address: &Address) -> Result<Channel<I, O>, Error<I, O>> {
        let socket = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(Error::IO)?;
        Ok(Self::from_stream(socket))
    }

    pub async fn accept(listener: &TcpListener) -> Result<Channel<I, O>, Error<I, O>> {
        let (socket, _) = listener.accept().await.map_err(Error::IO)?;
        Ok(Self::from_stream(socket))
    }

    fn from_stream(socket: TcpStream) -> Channel<I, O> {
        let (read_half, write_half) = socket.into_split();

        let reader = FramedRead::new(read_half, LengthDelimitedCodec::new());
        let reader = Framed::new(reader, Bincode::default());

        let writer = FramedWrite::new(write_half, LengthDelimitedCodec::new());
        let writer = Framed::new(writer, Bincode::default());

        Channel { sender: Sender { writer }, receiver: Receiver { reader } }
    }

    pub fn split(self) -> (Sender<I, O>, Receiver<I, O>) {
        (self.sender, self.receiver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[actix_rt::test]
    async fn one_request_one_reply() {
        #[derive(Debug, PartialEq, Deserialize, Serialize)]
        pub struct Request(String);
        #[derive(Debug, PartialEq, Deserialize, Serialize)]
        pub struct Response(String);

        let server = tokio::spawn(async {
            let listener = TcpListener::bind(("127.0.0.1", 21000)).await.unwrap();
            let channel: Channel<Response, Request> =
                Channel::accept(&listener).await.expect("failed to accept connection");
            let (mut sender, mut receiver) = channel.split();

            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, Some(Request(String::from("ping"))));

            sender.send(Response(String::from("ack"))).await.unwrap();
        });

        let client = tokio::spawn(async {
            // Give the listener a moment to bind
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let address = Address::new("127.0.0.1", 21000);
            let channel: Channel<Request, Response> =
                Channel::connect(&address).await.expect("failed to connect");
            let (mut sender, mut receiver) = channel.split();

            sender.send(Request(String::from("ping"))).await.unwrap();

            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, Some(Response(String::from("ack"))));

            // The remote closes after its single reply
            let msg = receiver.recv().await.unwrap();
            assert_eq!(msg, None);
        });

        client.await.unwrap();
        server.await.unwrap();
    }
}
