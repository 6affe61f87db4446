//! Line protocol spoken between the controller, storage nodes and clients
//!
//! Every message is a single line of space-separated tokens. Filenames are
//! single tokens; the protocol has no quoting.
//!
//! ```text
//! node   -> controller   JOIN <port> | STORE_ACK <f> | REMOVE_ACK <f> | LIST <f>... | REBALANCE_COMPLETE
//! controller -> node     JOIN_ACK | REMOVE <f> | LIST | REBALANCE <n> [<f> <k> <target>...]* <m> [<f>]*
//! client -> controller   STORE <f> <size> | LOAD <f> | RELOAD <f> | REMOVE <f> | LIST
//! controller -> client   STORE_TO <port>... | STORE_COMPLETE | LOAD_FROM <port> <size>
//!                        | REMOVE_COMPLETE | LIST <f>... | ERROR_*
//! ```

use crate::common::{Error, Result};
use std::fmt;

pub const JOIN: &str = "JOIN";
pub const JOIN_ACK: &str = "JOIN_ACK";
pub const STORE: &str = "STORE";
pub const STORE_TO: &str = "STORE_TO";
pub const STORE_ACK: &str = "STORE_ACK";
pub const STORE_COMPLETE: &str = "STORE_COMPLETE";
pub const LOAD: &str = "LOAD";
pub const RELOAD: &str = "RELOAD";
pub const LOAD_FROM: &str = "LOAD_FROM";
pub const REMOVE: &str = "REMOVE";
pub const REMOVE_ACK: &str = "REMOVE_ACK";
pub const REMOVE_COMPLETE: &str = "REMOVE_COMPLETE";
pub const LIST: &str = "LIST";
pub const REBALANCE: &str = "REBALANCE";
pub const REBALANCE_COMPLETE: &str = "REBALANCE_COMPLETE";
pub const ERROR_DELETING_FILE: &str = "ERROR_DELETING_FILE";

/// Error tokens reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FileAlreadyExists,
    FileDoesNotExist,
    NotEnoughNodes,
    LoadFailed,
    MalformedCommand,
    UnknownCommand,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::FileAlreadyExists => "ERROR_FILE_ALREADY_EXISTS",
            ErrorCode::FileDoesNotExist => "ERROR_FILE_DOES_NOT_EXIST",
            ErrorCode::NotEnoughNodes => "ERROR_NOT_ENOUGH_DSTORES",
            ErrorCode::LoadFailed => "ERROR_LOAD",
            ErrorCode::MalformedCommand => "ERROR_MALFORMED_COMMAND",
            ErrorCode::UnknownCommand => "ERROR_UNKNOWN_COMMAND",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "ERROR_FILE_ALREADY_EXISTS" => Some(ErrorCode::FileAlreadyExists),
            "ERROR_FILE_DOES_NOT_EXIST" => Some(ErrorCode::FileDoesNotExist),
            "ERROR_NOT_ENOUGH_DSTORES" => Some(ErrorCode::NotEnoughNodes),
            "ERROR_LOAD" => Some(ErrorCode::LoadFailed),
            "ERROR_MALFORMED_COMMAND" => Some(ErrorCode::MalformedCommand),
            "ERROR_UNKNOWN_COMMAND" => Some(ErrorCode::UnknownCommand),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the advertised listen port if `line` is a node's join announcement.
pub fn parse_join(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(JOIN), Some(port)) => port.parse().ok(),
        _ => None,
    }
}

fn required<'a>(parts: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<String> {
    parts
        .next()
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedCommand(line.to_string()))
}

fn count<'a>(parts: &mut impl Iterator<Item = &'a str>, line: &str) -> Result<usize> {
    parts
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| Error::MalformedCommand(line.to_string()))
}

/// Requests a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Store { filename: String, size: u64 },
    Load { filename: String },
    Reload { filename: String },
    Remove { filename: String },
    List,
}

impl ClientRequest {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            return Err(Error::MalformedCommand("empty command".into()));
        };

        match keyword {
            STORE => {
                let filename = required(&mut parts, line)?;
                let size = parts
                    .next()
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| Error::MalformedCommand(line.to_string()))?;
                Ok(ClientRequest::Store { filename, size })
            }
            LOAD => Ok(ClientRequest::Load {
                filename: required(&mut parts, line)?,
            }),
            RELOAD => Ok(ClientRequest::Reload {
                filename: required(&mut parts, line)?,
            }),
            REMOVE => Ok(ClientRequest::Remove {
                filename: required(&mut parts, line)?,
            }),
            LIST => Ok(ClientRequest::List),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientRequest::Store { filename, size } => write!(f, "{} {} {}", STORE, filename, size),
            ClientRequest::Load { filename } => write!(f, "{} {}", LOAD, filename),
            ClientRequest::Reload { filename } => write!(f, "{} {}", RELOAD, filename),
            ClientRequest::Remove { filename } => write!(f, "{} {}", REMOVE, filename),
            ClientRequest::List => f.write_str(LIST),
        }
    }
}

/// Lines the controller writes back to clients and nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    JoinAck,
    StoreTo(Vec<u16>),
    StoreComplete,
    LoadFrom { port: u16, size: u64 },
    RemoveComplete,
    List(Vec<String>),
    Error(ErrorCode),
}

impl Response {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let keyword = parts.next().unwrap_or_default();
        let unexpected = || Error::UnexpectedReply(line.to_string());

        match keyword {
            JOIN_ACK => Ok(Response::JoinAck),
            STORE_TO => parts
                .map(|p| p.parse().map_err(|_| unexpected()))
                .collect::<Result<Vec<u16>>>()
                .map(Response::StoreTo),
            STORE_COMPLETE => Ok(Response::StoreComplete),
            LOAD_FROM => {
                let port = parts.next().and_then(|p| p.parse().ok()).ok_or_else(unexpected)?;
                let size = parts.next().and_then(|s| s.parse().ok()).ok_or_else(unexpected)?;
                Ok(Response::LoadFrom { port, size })
            }
            REMOVE_COMPLETE => Ok(Response::RemoveComplete),
            LIST => Ok(Response::List(parts.map(str::to_string).collect())),
            other => ErrorCode::parse(other)
                .map(Response::Error)
                .ok_or_else(unexpected),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::JoinAck => f.write_str(JOIN_ACK),
            Response::StoreTo(ports) => {
                f.write_str(STORE_TO)?;
                for port in ports {
                    write!(f, " {}", port)?;
                }
                Ok(())
            }
            Response::StoreComplete => f.write_str(STORE_COMPLETE),
            Response::LoadFrom { port, size } => write!(f, "{} {} {}", LOAD_FROM, port, size),
            Response::RemoveComplete => f.write_str(REMOVE_COMPLETE),
            Response::List(files) => {
                f.write_str(LIST)?;
                for file in files {
                    write!(f, " {}", file)?;
                }
                Ok(())
            }
            Response::Error(code) => f.write_str(code.as_str()),
        }
    }
}

/// Messages a joined node sends on its control connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeMessage {
    StoreAck(String),
    RemoveAck(String),
    /// The node had nothing to delete for a `REMOVE`.
    RemoveMissing(String),
    /// The node failed to delete its copy.
    RemoveFailed(String),
    List(Vec<String>),
    RebalanceComplete,
}

impl NodeMessage {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(keyword) = parts.next() else {
            return Err(Error::MalformedCommand("empty node message".into()));
        };

        match keyword {
            STORE_ACK => Ok(NodeMessage::StoreAck(required(&mut parts, line)?)),
            REMOVE_ACK => Ok(NodeMessage::RemoveAck(required(&mut parts, line)?)),
            "ERROR_FILE_DOES_NOT_EXIST" => {
                Ok(NodeMessage::RemoveMissing(required(&mut parts, line)?))
            }
            ERROR_DELETING_FILE => Ok(NodeMessage::RemoveFailed(required(&mut parts, line)?)),
            LIST => Ok(NodeMessage::List(parts.map(str::to_string).collect())),
            REBALANCE_COMPLETE => Ok(NodeMessage::RebalanceComplete),
            other => Err(Error::UnknownCommand(other.to_string())),
        }
    }
}

/// One file a node must push, with the endpoints to push it to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransfer {
    pub filename: String,
    pub targets: Vec<String>,
}

/// Commands the controller pushes to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    Remove(String),
    List,
    Rebalance {
        send: Vec<FileTransfer>,
        remove: Vec<String>,
    },
}

impl NodeCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(REMOVE) => Ok(NodeCommand::Remove(required(&mut parts, line)?)),
            Some(LIST) => Ok(NodeCommand::List),
            Some(REBALANCE) => {
                let mut send = Vec::new();
                for _ in 0..count(&mut parts, line)? {
                    let filename = required(&mut parts, line)?;
                    let targets = (0..count(&mut parts, line)?)
                        .map(|_| required(&mut parts, line))
                        .collect::<Result<Vec<_>>>()?;
                    send.push(FileTransfer { filename, targets });
                }
                let remove = (0..count(&mut parts, line)?)
                    .map(|_| required(&mut parts, line))
                    .collect::<Result<Vec<_>>>()?;
                Ok(NodeCommand::Rebalance { send, remove })
            }
            Some(other) => Err(Error::UnknownCommand(other.to_string())),
            None => Err(Error::MalformedCommand("empty command".into())),
        }
    }
}

impl fmt::Display for NodeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeCommand::Remove(name) => write!(f, "{} {}", REMOVE, name),
            NodeCommand::List => f.write_str(LIST),
            NodeCommand::Rebalance { send, remove } => {
                write!(f, "{} {}", REBALANCE, send.len())?;
                for transfer in send {
                    write!(f, " {} {}", transfer.filename, transfer.targets.len())?;
                    for target in &transfer.targets {
                        write!(f, " {}", target)?;
                    }
                }
                write!(f, " {}", remove.len())?;
                for name in remove {
                    write!(f, " {}", name)?;
                }
                Ok(())
            }
        }
    }
}
