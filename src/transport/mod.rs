//! # Transport Layer
//!
//! Moves datagrams between the socket and the circuit protocol.
//!
//! ## Components
//! - **UDP**: One socket serving many circuits, with a receiver task, a pool
//!   of dispatch workers and a maintenance tick for acks and resends
//!
//! ## Backpressure
//! The inbound queue is bounded by `TransportConfig::inbound_queue_capacity`;
//! when it is full the receiver waits instead of dropping decoded packets.

pub mod udp;

pub use udp::{InboundItem, Transport};
