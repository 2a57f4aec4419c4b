//! # Error Types
//!
//! Error handling for the message template protocol and its circuit transport.
//!
//! This module defines every error variant that can occur from schema compilation
//! down to individual datagram decoding.
//!
//! ## Error Categories
//! - **Schema Errors**: Malformed template text; fatal at startup
//! - **Packet Errors**: Short buffers, bad length prefixes, unknown packet ids, field overflow
//! - **Circuit Errors**: Datagrams from unbound addresses, unknown circuit codes, closed circuits
//! - **Dedup Outcomes**: Duplicate sequence numbers (not a failure, only logged)
//! - **I/O and Configuration Errors**
//!
//! Only [`ProtocolError::SchemaCompile`] should prevent startup. Every per-datagram
//! error is isolated by the receive loop, logged, and the loop continues.
//!
//! ## Example Usage
//! ```rust
//! use message_template::error::{ProtocolError, Result};
//! use message_template::schema::compiler::compile;
//! use tracing::error;
//!
//! fn load(template: &str) -> Result<usize> {
//!     let catalogue = compile(template)?;
//!     Ok(catalogue.len())
//! }
//!
//! match load("{ Broken High 1 NotTrusted Unencoded") {
//!     Ok(count) => println!("{count} packets"),
//!     Err(e @ ProtocolError::SchemaCompile { .. }) => error!(error = %e, "Template rejected"),
//!     Err(e) => error!(error = %e, "Unexpected failure"),
//! }
//! ```

use crate::schema::Frequency;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DISPATCHER_WRITE_LOCK: &str = "Failed to acquire write lock on dispatcher";
    pub const ERR_DISPATCHER_READ_LOCK: &str = "Failed to acquire read lock on dispatcher";

    /// Circuit table errors
    pub const ERR_CIRCUIT_TABLE_LOCK: &str = "Failed to acquire lock on circuit table";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";

    /// Datagram decoding errors
    pub const ERR_SHORT_HEADER: &str = "Datagram shorter than its packet header";
    pub const ERR_ACK_TRAILER: &str = "Appended ack count exceeds datagram length";
    pub const ERR_ZERO_RUN: &str = "Zero-coded run is missing its count byte";
    pub const ERR_LOW_ID_SHORTCUT: &str = "Zero-coded low frequency id has an invalid run length";
    pub const ERR_TRAILING_BYTES: &str = "Unconsumed bytes after packet body";

    /// Transport errors
    pub const ERR_TRANSPORT_STOPPED: &str = "Transport has been shut down";
    pub const ERR_MISSING_ACK_SCHEMA: &str = "Catalogue has no PacketAck packet";
    pub const ERR_MISSING_CIRCUIT_SCHEMA: &str = "Catalogue has no UseCircuitCode packet";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Template error on line {line}: {reason}")]
    SchemaCompile { line: usize, reason: String },

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unknown packet: {frequency:?} id {id}")]
    UnknownPacket { frequency: Frequency, id: u16 },

    #[error("Unknown packet name: {0}")]
    UnknownPacketName(String),

    #[error("Duplicate sequence {sequence} (resent: {resent})")]
    DuplicateSequence { sequence: u32, resent: bool },

    #[error("Datagram from unknown circuit address {0}")]
    UnknownCircuit(SocketAddr),

    #[error("Unknown circuit code {0}")]
    UnknownCircuitCode(u32),

    #[error("Circuit is closed")]
    CircuitClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Shorthand for a malformed packet error built from a static message.
    pub(crate) fn malformed(msg: &str) -> Self {
        ProtocolError::MalformedPacket(msg.to_string())
    }

    /// True for every error the receive path treats as a malformed datagram.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedPacket(_) | ProtocolError::UnknownPacket { .. }
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
