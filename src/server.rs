//! TCP server for the chat service.
//!
//! Owns the listening socket, accepts connections, and spawns one handler
//! task per connection. Each handler reads raw payloads, persists them, and
//! acknowledges with a timestamp.

use crate::config::Config;
use crate::store::MessageStore;
use bytes::BytesMut;
use chrono::Local;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tracing::{debug, error, info, warn};

/// Server instance
pub struct Server {
    listener: TcpListener,
    store: MessageStore,
    buffer_size: usize,
}

impl Server {
    /// Bind the listening socket described by `config`.
    ///
    /// The socket gets SO_REUSEADDR so a restart is not blocked by lingering
    /// connections in TIME_WAIT, and the configured backlog depth. A bind
    /// failure is fatal to the process.
    pub fn bind(config: &Config, store: MessageStore) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .listen
            .parse()
            .map_err(|e| ServerError::Bind(config.listen.clone(), invalid_addr(e)))?;

        let std_listener = create_listener(addr, config.backlog)
            .map_err(|e| ServerError::Bind(config.listen.clone(), e))?;
        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Bind(config.listen.clone(), e))?;

        info!(address = %addr, backlog = config.backlog, "Server listening");

        Ok(Server {
            listener,
            store,
            buffer_size: config.buffer_size,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until interrupted.
    ///
    /// Ctrl-c stops the loop cleanly and drops the listener; handlers already
    /// running are left to finish on their own (peer disconnect or error).
    pub async fn run(self) -> Result<(), ServerError> {
        tokio::select! {
            res = self.accept_loop() => res,
            _ = signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                Ok(())
            }
        }
    }

    async fn accept_loop(&self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "Connection accepted");

                    let store = self.store.clone();
                    let buffer_size = self.buffer_size;

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, store, buffer_size).await {
                            debug!(peer = %addr, error = %e, "Connection error");
                        }
                    });
                }
                Err(e) => {
                    // The listening socket is assumed unusable after an
                    // accept failure; no retry.
                    error!(error = %e, "Failed to accept connection");
                    return Err(ServerError::Accept(e));
                }
            }
        }
    }
}

/// Handle a single client connection.
///
/// Each receive call's payload is treated as exactly one complete message;
/// there is no framing, so payloads split or coalesced by the transport are
/// mis-counted. This limitation is inherited from the wire protocol and left
/// as-is.
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    store: MessageStore,
    buffer_size: usize,
) -> std::io::Result<()> {
    let client_ip = addr.ip().to_string();
    let mut buffer = BytesMut::with_capacity(buffer_size);

    loop {
        // Never accumulate across reads: one receive, one message.
        buffer.clear();
        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            debug!(peer = %addr, "Client disconnected");
            return Ok(());
        }

        let mensaje = match std::str::from_utf8(&buffer) {
            Ok(s) => s.trim(),
            Err(e) => {
                warn!(peer = %addr, error = %e, "Ignoring payload with invalid encoding");
                continue;
            }
        };

        if mensaje.is_empty() {
            continue;
        }

        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        // Best-effort persistence: a write failure never withholds the
        // acknowledgment or closes the connection.
        match store.append(mensaje, &timestamp, &client_ip).await {
            Ok(id) => debug!(peer = %addr, id, timestamp = %timestamp, "Message stored"),
            Err(e) => error!(peer = %addr, error = %e, "Failed to store message"),
        }

        let respuesta = format!("Mensaje recibido: {}", timestamp);
        stream.write_all(respuesta.as_bytes()).await?;
    }
}

/// Create the std listener with SO_REUSEADDR and an explicit backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;

    Ok(socket.into())
}

fn invalid_addr(e: std::net::AddrParseError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
}

/// Server errors
#[derive(Debug)]
pub enum ServerError {
    /// Binding the listen address failed (startup-fatal)
    Bind(String, std::io::Error),
    /// Accepting a connection failed; the accept loop stops
    Accept(std::io::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind(addr, e) => write!(f, "Failed to bind '{}': {}", addr, e),
            ServerError::Accept(e) => write!(f, "Failed to accept connection: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;
    use std::time::Duration;

    const ACK_PREFIX: &str = "Mensaje recibido: ";

    async fn start_server() -> (SocketAddr, MessageStore) {
        let store = MessageStore::open_in_memory().await.unwrap();
        let config = Config {
            listen: "127.0.0.1:0".to_string(),
            ..Config::default()
        };

        let server = Server::bind(&config, store.clone()).unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        (addr, store)
    }

    async fn send_and_ack(stream: &mut TcpStream, payload: &str) -> String {
        stream.write_all(payload.as_bytes()).await.unwrap();
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "server closed the connection");
        String::from_utf8(buf[..n].to_vec()).unwrap()
    }

    fn assert_ack_format(reply: &str) {
        let timestamp = reply
            .strip_prefix(ACK_PREFIX)
            .unwrap_or_else(|| panic!("unexpected reply: {:?}", reply));
        assert!(
            NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%d %H:%M:%S").is_ok(),
            "bad timestamp: {:?}",
            timestamp
        );
    }

    #[tokio::test]
    async fn test_round_trip_stores_and_acknowledges() {
        let (addr, store) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let reply = send_and_ack(&mut stream, "hola").await;
        assert_ack_format(&reply);

        let rows = store.messages().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1, "hola");
        assert_eq!(rows[0].3, "127.0.0.1");
    }

    #[tokio::test]
    async fn test_content_is_trimmed() {
        let (addr, store) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let reply = send_and_ack(&mut stream, "  hola mundo \n").await;
        assert_ack_format(&reply);

        let rows = store.messages().await.unwrap();
        assert_eq!(rows[0].1, "hola mundo");
    }

    #[tokio::test]
    async fn test_whitespace_payload_produces_no_row_and_no_reply() {
        let (addr, store) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"   \n").await.unwrap();
        // Give the handler time to consume the payload as its own read.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.count().await.unwrap(), 0);

        // The connection is still usable and only the real message is stored.
        let reply = send_and_ack(&mut stream, "hola").await;
        assert_ack_format(&reply);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_payload_is_dropped() {
        let (addr, store) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&[0xff, 0xfe, 0xfd]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.count().await.unwrap(), 0);

        let reply = send_and_ack(&mut stream, "hola").await;
        assert_ack_format(&reply);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sentinel_is_stored_like_any_message() {
        let (addr, store) = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let reply = send_and_ack(&mut stream, "Éxito").await;
        assert_ack_format(&reply);

        let rows = store.messages().await.unwrap();
        assert_eq!(rows[0].1, "Éxito");
    }

    #[tokio::test]
    async fn test_client_disconnect_does_not_affect_other_connections() {
        let (addr, store) = start_server().await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        let mut second = TcpStream::connect(addr).await.unwrap();

        send_and_ack(&mut first, "uno").await;
        drop(first);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let reply = send_and_ack(&mut second, "dos").await;
        assert_ack_format(&reply);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_clients_get_distinct_ids() {
        let (addr, store) = start_server().await;
        let n = 10;

        let mut tasks = Vec::new();
        for client in 0..2 {
            tasks.push(tokio::spawn(async move {
                let mut stream = TcpStream::connect(addr).await.unwrap();
                for i in 0..n {
                    let reply = send_and_ack(&mut stream, &format!("msg {} {}", client, i)).await;
                    assert_ack_format(&reply);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let rows = store.messages().await.unwrap();
        assert_eq!(rows.len(), 2 * n);
        for pair in rows.windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
    }
}
