//! # Message Template
//!
//! Schema-driven binary packet protocol with reliable UDP circuits.
//!
//! A textual message template is compiled once into an immutable
//! [`Catalogue`](schema::Catalogue). The catalogue drives a generic packet
//! codec, and a [`Transport`](transport::Transport) moves packets over UDP
//! with per-circuit dedup, acknowledgement and resend.
//!
//! ## Modules
//! - [`schema`]: Packet, block and field definitions plus the template compiler
//! - [`core`]: Field values, packets, headers, zero-coding aware datagram codec
//! - [`protocol`]: Circuits and the handler dispatcher
//! - [`transport`]: UDP socket, receiver, dispatch workers and maintenance
//! - [`config`]: TOML and environment configuration
//! - [`utils`]: Zero-coding, sequence archive, logging and metrics
//!
//! ## Example
//! ```rust,no_run
//! use message_template::config::NetworkConfig;
//! use message_template::schema::compiler::compile_file;
//! use message_template::transport::Transport;
//! use std::sync::Arc;
//!
//! # async fn run() -> message_template::error::Result<()> {
//! let catalogue = Arc::new(compile_file("message_template.msg")?);
//! let transport = Transport::bind(NetworkConfig::default(), catalogue).await?;
//!
//! transport.register_handler("ChatFromViewer", |packet, circuit| {
//!     tracing::info!(remote = %circuit.remote(), packet = %packet.name(), "Chat");
//!     Ok(())
//! })?;
//!
//! let code = transport.reserve_circuit()?;
//! tracing::info!(code, "Waiting for UseCircuitCode");
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod transport;
pub mod utils;

pub use crate::core::codec::{Datagram, MessageCodec};
pub use crate::core::packet::{Block, Packet};
pub use crate::core::value::FieldValue;
pub use crate::error::{ProtocolError, Result};
pub use crate::schema::Catalogue;
pub use crate::transport::Transport;
