//! # Message Template Schema
//!
//! Data definitions for packets, blocks and fields, as described by a message
//! template file. The schema carries no behavior of its own; it is the single
//! source of truth that both the packet encoder and decoder walk.
//!
//! ## Components
//! - **Compiler**: Parses template text into schema objects
//! - **Catalogue**: Immutable collection of compiled packets with frequency lookup tables
//!
//! ## Layout
//! ```text
//! PacketSchema (name, frequency, id, trusted, zerocoded)
//!   └─ BlockSchema (name, Single | Multiple(n) | Variable)
//!        └─ FieldSchema (name, type, count)
//! ```

pub mod catalogue;
pub mod compiler;

pub use catalogue::Catalogue;

use std::fmt;

/// Largest payload accepted by a `Variable` field with a one-byte length prefix
pub const MAX_VARIABLE_1: usize = 255;

/// Largest payload accepted by a `Variable` field with a two-byte length prefix
pub const MAX_VARIABLE_2: usize = 1100;

/// Frequency class of a packet. Determines how many header bytes encode its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    /// One id byte, ids 0-254
    High,
    /// `0xFF` then one id byte
    Medium,
    /// `0xFF 0xFF` then a big-endian u16 id
    Low,
    /// Low-frequency layout reserved for ids `0xFFFA..=0xFFFF`
    Fixed,
}

impl Frequency {
    /// Frequency used on the wire. `Fixed` packets travel with the Low header.
    pub fn wire(self) -> Self {
        match self {
            Frequency::Fixed => Frequency::Low,
            other => other,
        }
    }

    /// Length in bytes of a header carrying this frequency
    pub fn header_len(self) -> usize {
        match self.wire() {
            Frequency::High => 7,
            Frequency::Medium => 8,
            _ => 10,
        }
    }

    /// Parse a template frequency token
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "High" => Some(Frequency::High),
            "Medium" => Some(Frequency::Medium),
            "Low" => Some(Frequency::Low),
            "Fixed" => Some(Frequency::Fixed),
            _ => None,
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Frequency::High => "High",
            Frequency::Medium => "Medium",
            Frequency::Low => "Low",
            Frequency::Fixed => "Fixed",
        };
        f.write_str(name)
    }
}

/// Primitive type of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U16,
    U32,
    U64,
    S8,
    S16,
    S32,
    F32,
    F64,
    Uuid,
    Bool,
    Vector3,
    Vector3d,
    Vector4,
    Quaternion,
    IpAddr,
    IpPort,
    Fixed,
    Variable,
}

impl FieldType {
    /// Parse a template type token. Tokens are matched case-insensitively and
    /// accept both the legacy `LL`-prefixed spellings and the bare ones.
    pub fn from_token(token: &str) -> Option<Self> {
        let upper = token.to_ascii_uppercase();
        let bare = upper.strip_prefix("LL").unwrap_or(&upper);
        let ty = match bare {
            "U8" => FieldType::U8,
            "U16" => FieldType::U16,
            "U32" => FieldType::U32,
            "U64" => FieldType::U64,
            "S8" => FieldType::S8,
            "S16" => FieldType::S16,
            "S32" => FieldType::S32,
            "F32" => FieldType::F32,
            "F64" => FieldType::F64,
            "UUID" => FieldType::Uuid,
            "BOOL" => FieldType::Bool,
            "VECTOR3" => FieldType::Vector3,
            "VECTOR3D" => FieldType::Vector3d,
            "VECTOR4" => FieldType::Vector4,
            "QUATERNION" => FieldType::Quaternion,
            "IPADDR" => FieldType::IpAddr,
            "IPPORT" => FieldType::IpPort,
            "FIXED" => FieldType::Fixed,
            "VARIABLE" => FieldType::Variable,
            _ => return None,
        };
        Some(ty)
    }

    /// Wire size of a fixed-width type. `None` for `Fixed` and `Variable`,
    /// whose size depends on the field's count.
    pub fn wire_size(self) -> Option<usize> {
        let size = match self {
            FieldType::U8 | FieldType::S8 | FieldType::Bool => 1,
            FieldType::U16 | FieldType::S16 | FieldType::IpPort => 2,
            FieldType::U32 | FieldType::S32 | FieldType::F32 | FieldType::IpAddr => 4,
            FieldType::U64 | FieldType::F64 => 8,
            FieldType::Vector3 | FieldType::Quaternion => 12,
            FieldType::Uuid | FieldType::Vector4 => 16,
            FieldType::Vector3d => 24,
            FieldType::Fixed | FieldType::Variable => return None,
        };
        Some(size)
    }
}

/// A single field of a block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub field_type: FieldType,
    /// Exact byte length for `Fixed`; length-prefix selector for `Variable`
    /// (1 = one-byte prefix, anything else = two-byte prefix). Unused otherwise.
    pub count: usize,
}

impl FieldSchema {
    /// Width in bytes of the length prefix of a `Variable` field
    pub fn prefix_width(&self) -> usize {
        if self.count == 1 {
            1
        } else {
            2
        }
    }

    /// Largest payload accepted by a `Variable` field
    pub fn variable_cap(&self) -> usize {
        if self.count == 1 {
            MAX_VARIABLE_1
        } else {
            MAX_VARIABLE_2
        }
    }
}

/// How many times a block appears in a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repetition {
    /// Exactly once, no count on the wire
    Single,
    /// Exactly `n` times, no count on the wire
    Multiple(usize),
    /// 0-255 times, prefixed by a one-byte count
    Variable,
}

/// A named, ordered group of fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSchema {
    pub name: String,
    pub repetition: Repetition,
    pub fields: Vec<FieldSchema>,
}

impl BlockSchema {
    /// Position of a field by name
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Full description of one packet type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSchema {
    pub name: String,
    pub frequency: Frequency,
    pub id: u16,
    pub trusted: bool,
    pub zerocoded: bool,
    pub blocks: Vec<BlockSchema>,
}

impl PacketSchema {
    /// Position of a block by name
    pub fn block_index(&self, name: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.name == name)
    }

    /// The `(frequency, id)` pair under which this packet is found on the wire
    pub fn wire_key(&self) -> (Frequency, u16) {
        (self.frequency.wire(), self.id)
    }
}
