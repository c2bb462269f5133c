// src/broker/server.rs
//
// Ingest protocol, per frame:
//   client -> [u32 BE len][encoded LogEntry]
//   server -> "ACK <offset>\n" | "ERR <reason>\n"
use crate::codec::LogEntry;
use crate::storage::Log;
use crate::{Error, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as TokioMutex;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Frames announcing more than this many bytes close the connection.
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

pub struct Server {
    listener: TcpListener,
    log: Arc<TokioMutex<Log>>,
    config: ServerConfig,
}

// Handler for individual client connections
pub struct Handler {
    stream: TcpStream,
    peer: SocketAddr,
    log: Arc<TokioMutex<Log>>,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(addr: &str, log: Arc<TokioMutex<Log>>, config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        log::info!("Ingest server bound to {}", listener.local_addr()?);
        Ok(Server {
            listener,
            log,
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(&mut self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves. Connections already
    /// accepted keep running on their own tasks.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Ingest server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        log::info!("Accepted connection from {}", peer);
                        let mut handler =
                            Handler::new(stream, peer, Arc::clone(&self.log), self.config);
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_connection().await {
                                log::error!("Error handling connection from {}: {}", peer, e);
                            }
                            log::info!("Connection with {} closed", peer);
                        });
                    }
                    Err(e) => {
                        log::error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }
}

impl Handler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        log: Arc<TokioMutex<Log>>,
        config: ServerConfig,
    ) -> Self {
        Handler {
            stream,
            peer,
            log,
            config,
        }
    }

    pub async fn handle_connection(&mut self) -> Result<()> {
        loop {
            let len = match self.stream.read_u32().await {
                Ok(len) => len as usize,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            if len > self.config.max_frame_bytes {
                self.stream.write_all(b"ERR frame too large\n").await?;
                return Err(Error::FrameTooLarge {
                    len,
                    max: self.config.max_frame_bytes,
                });
            }

            let mut frame = vec![0u8; len];
            self.stream.read_exact(&mut frame).await?;

            let reply = self.ingest(frame).await?;
            self.stream.write_all(reply.as_bytes()).await?;
        }
    }

    // Validates and stores one frame; only I/O failures end the connection.
    async fn ingest(&self, frame: Vec<u8>) -> Result<String> {
        if let Err(e) = LogEntry::decode(&frame) {
            log::warn!("Rejected frame from {}: {}", self.peer, e);
            return Ok(format!("ERR {}\n", e));
        }
        match store(&self.log, frame).await {
            Ok(offset) => {
                log::debug!("Stored entry from {} at offset {}", self.peer, offset);
                Ok(format!("ACK {}\n", offset))
            }
            Err(Error::Io(e)) => Err(Error::Io(e)),
            Err(e) => {
                log::warn!("Could not store entry from {}: {}", self.peer, e);
                Ok(format!("ERR {}\n", e))
            }
        }
    }
}

/// Appends on the blocking pool. Segment writes, rolls and fsyncs are
/// synchronous file I/O and must not stall the runtime's worker threads.
async fn store(log: &Arc<TokioMutex<Log>>, frame: Vec<u8>) -> Result<u64> {
    let mut guard = Arc::clone(log).lock_owned().await;
    tokio::task::spawn_blocking(move || guard.append_encoded(&frame))
        .await
        .map_err(|e| Error::Internal(format!("append task failed: {}", e)))?
}
