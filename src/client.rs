//! Async client for the controller's client protocol
//!
//! Moving file bytes to and from storage nodes is the caller's job; this
//! client only negotiates with the controller.

use crate::common::{validate_filename, ClientRequest, Error, Response, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ControllerClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    timeout: Duration,
}

impl ControllerClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Bound every wait for a controller reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn list(&mut self) -> Result<Vec<String>> {
        match self.request(&ClientRequest::List).await? {
            Response::List(files) => Ok(files),
            other => Err(unexpected(other)),
        }
    }

    /// Ask where to store `filename`; returns the node ports to send it to.
    pub async fn store_request(&mut self, filename: &str, size: u64) -> Result<Vec<u16>> {
        validate_filename(filename)?;
        let request = ClientRequest::Store {
            filename: filename.to_string(),
            size,
        };
        match self.request(&request).await? {
            Response::StoreTo(ports) => Ok(ports),
            other => Err(unexpected(other)),
        }
    }

    /// Wait until every node has acknowledged the pending store.
    pub async fn wait_store_complete(&mut self) -> Result<()> {
        match self.read_reply("STORE").await? {
            Response::StoreComplete => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Returns `(port, size)` of a node serving `filename`.
    pub async fn load(&mut self, filename: &str) -> Result<(u16, u64)> {
        validate_filename(filename)?;
        let request = ClientRequest::Load {
            filename: filename.to_string(),
        };
        self.load_from(&request).await
    }

    /// Like `load`, but never returns the node that served the last load.
    pub async fn reload(&mut self, filename: &str) -> Result<(u16, u64)> {
        validate_filename(filename)?;
        let request = ClientRequest::Reload {
            filename: filename.to_string(),
        };
        self.load_from(&request).await
    }

    /// `load` then `reload` on this connection. Returns the first port and
    /// the alternative the controller offers instead of it.
    pub async fn load_elsewhere(&mut self, filename: &str) -> Result<(u16, (u16, u64))> {
        let (first, _) = self.load(filename).await?;
        let other = self.reload(filename).await?;
        Ok((first, other))
    }

    /// Remove `filename` and wait for every replica to be deleted.
    pub async fn remove(&mut self, filename: &str) -> Result<()> {
        validate_filename(filename)?;
        let request = ClientRequest::Remove {
            filename: filename.to_string(),
        };
        match self.request(&request).await? {
            Response::RemoveComplete => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn load_from(&mut self, request: &ClientRequest) -> Result<(u16, u64)> {
        match self.request(request).await? {
            Response::LoadFrom { port, size } => Ok((port, size)),
            other => Err(unexpected(other)),
        }
    }

    async fn request(&mut self, request: &ClientRequest) -> Result<Response> {
        let line = format!("{}\n", request);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        self.read_reply(line.trim_end()).await
    }

    async fn read_reply(&mut self, context: &str) -> Result<Response> {
        let next = tokio::time::timeout(self.timeout, self.lines.next_line())
            .await
            .map_err(|_| Error::Timeout(format!("no reply to {}", context)))??;
        let line = next.ok_or_else(|| Error::ConnectionClosed("controller hung up".into()))?;

        match Response::parse(&line)? {
            Response::Error(code) => Err(Error::from_code(code, context)),
            response => Ok(response),
        }
    }
}

fn unexpected(response: Response) -> Error {
    Error::UnexpectedReply(response.to_string())
}
