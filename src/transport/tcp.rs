//! TCP connect and accept.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use super::consume_connect_word;
use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::error::{GnutellaError, Result};

/// Open a TCP connection to a servent. The handshake runs on `initialize()`.
pub async fn connect<A: ToSocketAddrs>(addr: A, config: ConnectionConfig) -> Result<Connection<TcpStream>> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::debug!("Connected to {:?}", stream.peer_addr().ok());
    Ok(Connection::outgoing(stream, config))
}

/// Accepts inbound Gnutella connections.
pub struct GnutellaListener {
    listener: TcpListener,
    config: ConnectionConfig,
}

impl GnutellaListener {
    /// Bind to `addr`. Accepted connections use `config`.
    pub async fn bind<A: ToSocketAddrs>(addr: A, config: ConnectionConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and check its connect word.
    ///
    /// The returned connection still needs `initialize()`.
    pub async fn accept(&self) -> Result<(Connection<TcpStream>, SocketAddr)> {
        let (mut stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;

        let timeout = self.config.handshake_timeout();
        match tokio::time::timeout(timeout, consume_connect_word(&mut stream)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GnutellaError::BadHandshake(format!(
                    "No connect word from {} within {:?}",
                    peer, timeout
                )))
            }
        }
        tracing::debug!("Accepted Gnutella connection from {}", peer);
        Ok((Connection::incoming(stream, self.config.clone()), peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Message;

    #[tokio::test]
    async fn test_tcp_connect_and_accept() {
        let listener = GnutellaListener::bind("127.0.0.1:0", ConnectionConfig::default())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut conn, _peer) = listener.accept().await.unwrap();
            conn.initialize().await.unwrap();
            let message = conn.receive().await.unwrap();
            conn.close();
            message
        });

        let mut client = connect(addr, ConnectionConfig::default()).await.unwrap();
        client.initialize().await.unwrap();
        let query = Message::query(3, 0, "over tcp");
        client.send(query.clone()).await.unwrap();

        let got = server.await.unwrap();
        assert_eq!(got.guid(), query.guid());
        assert_eq!(got.payload(), query.payload());
    }
}
