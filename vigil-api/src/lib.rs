//! HTTP query surface and WebSocket broadcast gateway.
//!
//! Every read tolerates a missing agent, a failed RPC, and a cold cache;
//! degraded responses are flagged `partial` rather than failing. The only
//! mutation paths are report acknowledgement and resolution.

#![warn(missing_docs, clippy::pedantic)]

mod envelope;
mod ratelimit;
mod routes;
mod state;
mod ws;

pub use envelope::{ApiError, Envelope, ErrorCode, Pagination};
pub use ratelimit::RateLimiter;
pub use routes::router;
pub use state::ApiState;
