//! Interactive client session for the chat server.
//!
//! Connects once, relays operator-entered lines as raw payloads, prints each
//! acknowledgment, and ends locally after the sentinel word.

use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};

/// The word that ends the client's local loop. The server gives it no
/// special treatment and stores it like any other message.
const SENTINEL: &str = "éxito";

/// Reply buffer size; one receive call per sent message
const BUFFER_SIZE: usize = 4096;

/// A connected client session
pub struct Client {
    stream: TcpStream,
    peer: String,
}

impl Client {
    /// Connect to the server. Failure is terminal for the session; there is
    /// no retry.
    pub async fn connect(addr: &str) -> Result<Client, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ClientError::Connect(addr.to_string(), e))?;

        Ok(Client {
            stream,
            peer: addr.to_string(),
        })
    }

    /// Relay operator input until end-of-input, the sentinel word, a
    /// connection error, or a server-side close.
    pub async fn run(mut self) -> std::io::Result<()> {
        println!(
            "Conectado a {}. Escribe mensajes; para terminar escribe: {}",
            self.peer, SENTINEL
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut reply_buf = vec![0u8; BUFFER_SIZE];

        loop {
            print!("Mensaje: ");
            std::io::stdout().flush()?;

            let line = match lines.next_line().await? {
                Some(line) => line,
                None => {
                    println!();
                    info!("End of input, closing session");
                    return Ok(());
                }
            };

            // The server drops whitespace-only payloads without replying;
            // sending one would leave this loop stuck on the receive.
            if line.trim().is_empty() {
                continue;
            }

            self.stream.write_all(line.as_bytes()).await?;

            let n = self.stream.read(&mut reply_buf).await?;
            if n == 0 {
                info!("Server closed the connection");
                return Ok(());
            }

            match std::str::from_utf8(&reply_buf[..n]) {
                Ok(reply) => println!("Servidor: {}", reply),
                Err(e) => warn!(error = %e, "Reply with invalid encoding"),
            }

            if is_sentinel(&line) {
                info!("Sentinel entered, closing session");
                return Ok(());
            }
        }
    }
}

/// Whether an input line is the session-ending sentinel (trimmed,
/// case-insensitive).
fn is_sentinel(line: &str) -> bool {
    line.trim().to_lowercase() == SENTINEL
}

/// Client session errors
#[derive(Debug)]
pub enum ClientError {
    /// Connecting to the server failed (terminal, no retry)
    Connect(String, std::io::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Connect(addr, e) => {
                write!(f, "Failed to connect to '{}': {}", addr, e)
            }
        }
    }
}

impl std::error::Error for ClientError {}
