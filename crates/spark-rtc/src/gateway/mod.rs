//! WebSocket client for the Spark server.
//!
//! One connection per participant carries queue requests (correlated by
//! id), queue change notifications and room signaling broadcasts. Sends a
//! hello first, keeps the socket alive with heartbeats, and reconnects with
//! exponential backoff, restoring channel and queue subscriptions.

mod client;
mod connection;
mod handler;
mod types;

#[cfg(test)]
mod tests;

pub use client::GatewayClient;
pub use types::GatewayEvent;
