//! # minifs
//!
//! Controller for a replicated file store. Storage nodes join the
//! controller and hold file bytes; clients ask the controller where to
//! store or load a file and then talk to the nodes directly.
//! - Each file is kept on R nodes
//! - Stores and removes complete once every involved node acknowledges
//! - A periodic rebalancer restores lost copies and purges orphans
//! - Plain-text line protocol over TCP
//!
//! ## Architecture
//!
//! ```text
//!          ┌──────────────────────────────┐
//!          │          Controller          │
//!          │  file index + node registry  │
//!          └──▲──────────▲─────────▲──────┘
//!  STORE/LOAD │     JOIN │         │ JOIN
//!   REMOVE    │   ACKs   │         │ ACKs
//!   ┌─────────┴┐   ┌─────┴────┐ ┌──┴───────┐
//!   │  Client  │──▶│  Node 1  │ │  Node 2  │ ...
//!   └──────────┘   └──────────┘ └──────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the controller
//! ```bash
//! minifs-controller serve --port 12345 --replicas 3 --timeout-ms 1000 --rebalance-period 30
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minifs --controller 127.0.0.1:12345 list
//! minifs --controller 127.0.0.1:12345 load my-file.txt
//! minifs --controller 127.0.0.1:12345 remove my-file.txt
//! ```

pub mod client;
pub mod common;
pub mod controller;

// Re-export commonly used types
pub use client::ControllerClient;
pub use common::{ControllerConfig as Config, Error, Result};
pub use controller::Controller;

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
