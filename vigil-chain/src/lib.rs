//! Typed read-only EVM access for the Vigil control plane.
//!
//! The chain gateway is the sole owner of the RPC connection pool. It
//! exposes agent snapshots, registry enumeration with hidden pagination,
//! and range-based event polling for creations and heartbeats.

#![warn(missing_docs, clippy::pedantic)]

mod bindings;
mod gateway;
mod rpc;

pub use gateway::{ChainEvents, ChainGateway, CreationEvent, DecisionRecord, HeartbeatEvent};
pub use rpc::{ChainConfig, RpcChainGateway};
