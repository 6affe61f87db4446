//! Common utilities and types shared across minifs

pub mod config;
pub mod error;
pub mod protocol;
pub mod utils;

pub use config::ControllerConfig;
pub use error::{Error, Result};
pub use protocol::{ClientRequest, ErrorCode, FileTransfer, NodeCommand, NodeMessage, Response};
pub use utils::{format_bytes, ideal_bounds, validate_filename};
