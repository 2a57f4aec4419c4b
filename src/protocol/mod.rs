//! # Circuit Protocol
//!
//! Reliability and routing above the datagram codec.
//!
//! ## Components
//! - **Circuit**: Per-peer sequence archive, pending acks and unacked outbound packets
//! - **Dispatcher**: Handler registry keyed by packet name
//!
//! ## Circuit Lifecycle
//! ```text
//! reserve(code) ──► Unestablished ──UseCircuitCode(code)──► Active ──close/timeout──► Closed
//! ```
//!
//! ## Well-known Packets
//! - `UseCircuitCode` (block `CircuitCode`, field `Code: U32`) binds a reserved
//!   code to the sender's address
//! - `PacketAck` (block `Packets`, field `ID: U32`) acknowledges reliable sequences

pub mod circuit;
pub mod dispatcher;

pub use circuit::{Circuit, CircuitStatus, CircuitTable};
pub use dispatcher::Dispatcher;

pub const USE_CIRCUIT_CODE: &str = "UseCircuitCode";
pub const CIRCUIT_CODE_BLOCK: &str = "CircuitCode";
pub const CIRCUIT_CODE_FIELD: &str = "Code";

pub const PACKET_ACK: &str = "PacketAck";
pub const PACKET_ACK_BLOCK: &str = "Packets";
pub const PACKET_ACK_FIELD: &str = "ID";

/// Largest number of acks carried by one `PacketAck`
pub const MAX_ACKS_PER_PACKET: usize = 255;
