//! Outbound connection establishment.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::net::TcpStream;

/// Opens connections for the pool.
///
/// Abstracted so the pool's accounting can be exercised without sockets.
pub trait Dialer: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Establish a new connection to `address`.
    fn dial(&self, address: &str) -> impl Future<Output = io::Result<Self::Conn>> + Send;

    /// Whether an idle connection can still carry a request.
    fn is_reusable(&self, _conn: &Self::Conn) -> bool {
        true
    }
}

/// Plain TCP dialer with a bounded connect timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Dialer for TcpDialer {
    type Conn = TcpStream;

    fn dial(&self, address: &str) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let address = address.to_string();
        let connect_timeout = self.connect_timeout;
        async move {
            let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&address))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", address, connect_timeout),
                    )
                })??;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
    }

    /// An idle HTTP connection must have nothing to read: EOF means the
    /// backend closed it, stray bytes mean the stream is out of sync.
    fn is_reusable(&self, conn: &TcpStream) -> bool {
        let mut probe = [0u8; 1];
        match conn.try_read(&mut probe) {
            Ok(_) => false,
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        }
    }
}
