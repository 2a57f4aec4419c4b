//! # Core Protocol Components
//!
//! Field values, packet instances, headers and the datagram codec.
//!
//! ## Components
//! - **Value**: Typed field values and their per-type wire rules
//! - **Packet**: Schema-driven body encode/decode
//! - **Header**: Flags, sequence, frequency id and appended acks
//! - **Codec**: Tokio codec for whole UDP datagrams, including zero-coding
//!
//! ## Wire Format
//! ```text
//! [Flags(1)] [Sequence(4)] [Reserved(1)] [Id(1|2|4)] [Body(N)] [Acks(4n)] [AckCount(1)]
//! ```
//!
//! ## Safety
//! - Every length prefix and instance count is checked before reading
//! - Zero-coded bodies are bounded by `MAX_EXPANDED_SIZE`
//! - Decoding never panics on malformed input

pub mod codec;
pub mod header;
pub mod packet;
pub mod value;
