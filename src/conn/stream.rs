// Copyright (c) 2017 Anatoly Ikorsky
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Framed transport of a connection.
//!
//! Wraps the TCP/Unix/TLS endpoint into a `Framed` driven by the envelope
//! codec. TLS and compression upgrades swap layers in place while the
//! codec's buffers and sequence state are preserved.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Framed, FramedParts};

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{DriverError, Error, Result};
use crate::opts::Opts;
use crate::proto::codec::{Compression, PacketCodec};

/// The transport under the envelope codec.
#[derive(Debug)]
pub(crate) enum Endpoint {
    Plain(TcpStream),
    Secure(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Socket(UnixStream),
}

impl Endpoint {
    fn is_secure(&self) -> bool {
        matches!(self, Endpoint::Secure(_))
    }

    /// Unix domain sockets are local, so they count as a secure transport
    /// for authentication purposes.
    fn is_trusted(&self) -> bool {
        match self {
            Endpoint::Plain(_) => false,
            Endpoint::Secure(_) => true,
            #[cfg(unix)]
            Endpoint::Socket(_) => true,
        }
    }
}

impl AsyncRead for Endpoint {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            Endpoint::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            Endpoint::Secure(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            #[cfg(unix)]
            Endpoint::Socket(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Endpoint {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            Endpoint::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            Endpoint::Secure(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            #[cfg(unix)]
            Endpoint::Socket(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Endpoint::Plain(stream) => Pin::new(stream).poll_flush(cx),
            Endpoint::Secure(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            #[cfg(unix)]
            Endpoint::Socket(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            Endpoint::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            Endpoint::Secure(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            #[cfg(unix)]
            Endpoint::Socket(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Packet-level view of the connection.
#[derive(Debug)]
pub(crate) struct NetStream {
    framed: Framed<Endpoint, PacketCodec>,
}

impl NetStream {
    /// Connects per `opts`: the Unix socket when configured, TCP otherwise.
    pub(crate) async fn connect(opts: &Opts) -> Result<NetStream> {
        #[cfg(unix)]
        if let Some(path) = opts.socket() {
            let stream = UnixStream::connect(path).await?;
            return Ok(NetStream::new(Endpoint::Socket(stream)));
        }

        let address = (opts.ip_or_hostname(), opts.tcp_port());
        let connect = TcpStream::connect(address);
        let mut stream = match opts.connect_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| DriverError::ConnectTimeout)??,
            None => connect.await?,
        };

        stream.set_nodelay(opts.tcp_nodelay())?;
        if opts.tcp_keepalive() {
            let std_stream = stream.into_std()?;
            socket2::SockRef::from(&std_stream).set_keepalive(true)?;
            stream = TcpStream::from_std(std_stream)?;
        }

        Ok(NetStream::new(Endpoint::Plain(stream)))
    }

    fn new(endpoint: Endpoint) -> NetStream {
        NetStream {
            framed: Framed::new(endpoint, PacketCodec::new()),
        }
    }

    pub(crate) fn is_secure(&self) -> bool {
        self.framed.get_ref().is_secure()
    }

    pub(crate) fn is_trusted(&self) -> bool {
        self.framed.get_ref().is_trusted()
    }

    pub(crate) fn codec_mut(&mut self) -> &mut PacketCodec {
        self.framed.codec_mut()
    }

    /// Resets the envelope sequence. Done at the start of every independent
    /// exchange, post-login and on compression upgrade.
    pub(crate) fn reset_seq_id(&mut self) {
        self.framed.codec_mut().reset_seq_id();
    }

    /// Inserts the compression layer (resets sequence counters).
    pub(crate) fn compress(&mut self, algorithm: Compression) {
        self.framed.codec_mut().compress(algorithm);
    }

    /// Reads the next assembled payload.
    pub(crate) async fn read_packet(&mut self) -> Result<Bytes> {
        match self.framed.next().await {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(err)) => Err(err.into()),
            None => Err(Error::Driver(DriverError::ConnectionClosed {
                expected: false,
            })),
        }
    }

    /// Writes one logical payload (split into envelopes as needed).
    pub(crate) async fn write_packet(&mut self, payload: Vec<u8>) -> Result<()> {
        self.framed.send(payload).await.map_err(Error::from)
    }

    /// Performs the TLS upgrade.
    ///
    /// Only a plain TCP endpoint can upgrade; the codec state (including the
    /// current sequence id) carries over, as the upgrade happens in the
    /// middle of the login burst.
    pub(crate) async fn make_secure(
        self,
        connector: &TlsConnector,
        server_name: rustls::pki_types::ServerName<'static>,
    ) -> Result<NetStream> {
        let parts = self.framed.into_parts();

        let tcp = match parts.io {
            Endpoint::Plain(tcp) => tcp,
            _ => {
                return Err(Error::Driver(DriverError::UnexpectedPacket {
                    context: "TLS upgrade on a non-TCP transport",
                }))
            }
        };

        let tls_stream = connector.connect(server_name, tcp).await?;

        let mut new_parts = FramedParts::new::<Vec<u8>>(
            Endpoint::Secure(Box::new(tls_stream)),
            parts.codec,
        );
        new_parts.read_buf = parts.read_buf;
        new_parts.write_buf = parts.write_buf;
        Ok(NetStream {
            framed: Framed::from_parts(new_parts),
        })
    }

    /// Closes the transport.
    pub(crate) async fn shutdown(&mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        self.framed.get_mut().shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn should_frame_written_payloads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let mut net = NetStream::new(Endpoint::Plain(stream));
            net.write_packet(b"\x03SELECT 1".to_vec()).await.unwrap();
            net
        });

        let (mut server, _) = listener.accept().await.unwrap();
        let mut buf = [0_u8; 13];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &[9, 0, 0, 0]);
        assert_eq!(&buf[4..], b"\x03SELECT 1");

        // server replies with an OK packet; sequence id continues the burst
        server
            .write_all(b"\x07\x00\x00\x01\x00\x01\x00\x02\x00\x00\x00")
            .await
            .unwrap();

        let mut net = client.await.unwrap();
        let payload = net.read_packet().await.unwrap();
        assert_eq!(&payload[..], b"\x00\x01\x00\x02\x00\x00\x00");
    }

    #[tokio::test]
    async fn closed_peer_should_surface_unexpected_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut net = NetStream::new(Endpoint::Plain(stream));

        let (server, _) = listener.accept().await.unwrap();
        drop(server);

        match net.read_packet().await {
            Err(Error::Driver(DriverError::ConnectionClosed { expected: false })) => (),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
