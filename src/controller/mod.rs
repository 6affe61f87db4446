//! Controller implementation
//!
//! The controller is responsible for:
//! - Tracking which storage nodes are joined
//! - The file index (filename → replicas and status)
//! - Store and remove orchestration with per-node acknowledgments
//! - Picking a replica to serve each load
//! - Periodic rebalancing back to R copies per file

pub mod index;
pub mod load;
pub mod outbox;
pub mod placement;
pub mod rebalance;
pub mod registry;
pub mod remove;
pub mod server;
pub mod state;
pub mod store;

pub use server::Controller;
pub use state::ControllerState;
