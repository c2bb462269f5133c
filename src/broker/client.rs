// src/broker/client.rs
use crate::codec::LogEntry;
use crate::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Sends entries to an ingest server one frame at a time and waits for each reply.
pub struct Client {
    stream: BufReader<TcpStream>,
}

impl Client {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        log::debug!("Connected to ingest server {}", addr);
        Ok(Client {
            stream: BufReader::new(stream),
        })
    }

    /// Returns the offset the server stored the entry at.
    pub async fn send(&mut self, entry: &LogEntry) -> Result<u64> {
        let payload = entry.encode()?;
        self.send_encoded(&payload).await
    }

    pub async fn send_encoded(&mut self, payload: &[u8]) -> Result<u64> {
        let len = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge {
            len: payload.len(),
            max: u32::MAX as usize,
        })?;
        let writer = self.stream.get_mut();
        writer.write_u32(len).await?;
        writer.write_all(payload).await?;
        writer.flush().await?;

        let mut line = String::new();
        if self.stream.read_line(&mut line).await? == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed the connection",
            )));
        }
        parse_reply(line.trim_end())
    }
}

fn parse_reply(line: &str) -> Result<u64> {
    if let Some(offset) = line.strip_prefix("ACK ") {
        return offset
            .parse()
            .map_err(|_| Error::Internal(format!("malformed ACK from server: {:?}", line)));
    }
    if let Some(reason) = line.strip_prefix("ERR ") {
        return Err(Error::Rejected(reason.to_string()));
    }
    Err(Error::Internal(format!("unexpected reply from server: {:?}", line)))
}
