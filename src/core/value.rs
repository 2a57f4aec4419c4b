//! Typed field values and their wire encoding.
//!
//! Integers and floats are little-endian on the wire. `IpAddr` and `IpPort`
//! are the exceptions: both travel in network (big-endian) order.

use crate::error::{ProtocolError, Result};
use crate::schema::{FieldSchema, FieldType};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

/// Unit quaternion. Only `x`, `y` and `z` are transmitted; `w` is rebuilt on
/// decode and is never negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Rebuild a quaternion from its transmitted vector part
    pub fn from_xyz(x: f32, y: f32, z: f32) -> Self {
        let t = 1.0 - (x * x + y * y + z * z);
        let w = if t > 0.0 { t.sqrt() } else { 0.0 };
        Quaternion { x, y, z, w }
    }

    /// Vector part to transmit, negated when `w` is negative so the receiver's
    /// non-negative `w` describes the same rotation
    pub fn wire_xyz(&self) -> (f32, f32, f32) {
        if self.w < 0.0 {
            (-self.x, -self.y, -self.z)
        } else {
            (self.x, self.y, self.z)
        }
    }
}

/// One decoded field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    S8(i8),
    S16(i16),
    S32(i32),
    F32(f32),
    F64(f64),
    Uuid(Uuid),
    Bool(bool),
    Vector3(Vector3),
    Vector3d(Vector3d),
    Vector4(Vector4),
    Quaternion(Quaternion),
    IpAddr(Ipv4Addr),
    IpPort(u16),
    Fixed(Bytes),
    Variable(Bytes),
}

impl FieldValue {
    /// Zero value for a field: numeric zero, nil UUID, identity rotation,
    /// zero-filled `Fixed` data and empty `Variable` data.
    pub fn default_for(field: &FieldSchema) -> Self {
        match field.field_type {
            FieldType::U8 => FieldValue::U8(0),
            FieldType::U16 => FieldValue::U16(0),
            FieldType::U32 => FieldValue::U32(0),
            FieldType::U64 => FieldValue::U64(0),
            FieldType::S8 => FieldValue::S8(0),
            FieldType::S16 => FieldValue::S16(0),
            FieldType::S32 => FieldValue::S32(0),
            FieldType::F32 => FieldValue::F32(0.0),
            FieldType::F64 => FieldValue::F64(0.0),
            FieldType::Uuid => FieldValue::Uuid(Uuid::nil()),
            FieldType::Bool => FieldValue::Bool(false),
            FieldType::Vector3 => FieldValue::Vector3(Vector3::default()),
            FieldType::Vector3d => FieldValue::Vector3d(Vector3d::default()),
            FieldType::Vector4 => FieldValue::Vector4(Vector4::default()),
            FieldType::Quaternion => FieldValue::Quaternion(Quaternion::IDENTITY),
            FieldType::IpAddr => FieldValue::IpAddr(Ipv4Addr::UNSPECIFIED),
            FieldType::IpPort => FieldValue::IpPort(0),
            FieldType::Fixed => FieldValue::Fixed(Bytes::from(vec![0u8; field.count])),
            FieldType::Variable => FieldValue::Variable(Bytes::new()),
        }
    }

    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::U8(_) => FieldType::U8,
            FieldValue::U16(_) => FieldType::U16,
            FieldValue::U32(_) => FieldType::U32,
            FieldValue::U64(_) => FieldType::U64,
            FieldValue::S8(_) => FieldType::S8,
            FieldValue::S16(_) => FieldType::S16,
            FieldValue::S32(_) => FieldType::S32,
            FieldValue::F32(_) => FieldType::F32,
            FieldValue::F64(_) => FieldType::F64,
            FieldValue::Uuid(_) => FieldType::Uuid,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Vector3(_) => FieldType::Vector3,
            FieldValue::Vector3d(_) => FieldType::Vector3d,
            FieldValue::Vector4(_) => FieldType::Vector4,
            FieldValue::Quaternion(_) => FieldType::Quaternion,
            FieldValue::IpAddr(_) => FieldType::IpAddr,
            FieldValue::IpPort(_) => FieldType::IpPort,
            FieldValue::Fixed(_) => FieldType::Fixed,
            FieldValue::Variable(_) => FieldType::Variable,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            FieldValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Raw bytes of a `Fixed` or `Variable` value
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            FieldValue::Fixed(b) | FieldValue::Variable(b) => Some(b),
            _ => None,
        }
    }

    /// Write this value as `field` dictates.
    ///
    /// # Errors
    /// `MalformedPacket` when the value's type differs from the field's type,
    /// when `Fixed` data is not exactly `count` bytes, or when `Variable` data
    /// exceeds its cap.
    pub fn encode(&self, field: &FieldSchema, dst: &mut BytesMut) -> Result<()> {
        if self.field_type() != field.field_type {
            return Err(ProtocolError::MalformedPacket(format!(
                "Field {} expects {:?}, got {:?}",
                field.name,
                field.field_type,
                self.field_type()
            )));
        }

        match self {
            FieldValue::U8(v) => dst.put_u8(*v),
            FieldValue::U16(v) => dst.put_u16_le(*v),
            FieldValue::U32(v) => dst.put_u32_le(*v),
            FieldValue::U64(v) => dst.put_u64_le(*v),
            FieldValue::S8(v) => dst.put_i8(*v),
            FieldValue::S16(v) => dst.put_i16_le(*v),
            FieldValue::S32(v) => dst.put_i32_le(*v),
            FieldValue::F32(v) => dst.put_f32_le(*v),
            FieldValue::F64(v) => dst.put_f64_le(*v),
            FieldValue::Uuid(v) => dst.put_slice(v.as_bytes()),
            FieldValue::Bool(v) => dst.put_u8(u8::from(*v)),
            FieldValue::Vector3(v) => {
                dst.put_f32_le(v.x);
                dst.put_f32_le(v.y);
                dst.put_f32_le(v.z);
            }
            FieldValue::Vector3d(v) => {
                dst.put_f64_le(v.x);
                dst.put_f64_le(v.y);
                dst.put_f64_le(v.z);
            }
            FieldValue::Vector4(v) => {
                dst.put_f32_le(v.x);
                dst.put_f32_le(v.y);
                dst.put_f32_le(v.z);
                dst.put_f32_le(v.w);
            }
            FieldValue::Quaternion(q) => {
                let (x, y, z) = q.wire_xyz();
                dst.put_f32_le(x);
                dst.put_f32_le(y);
                dst.put_f32_le(z);
            }
            FieldValue::IpAddr(v) => dst.put_slice(&v.octets()),
            FieldValue::IpPort(v) => dst.put_u16(*v),
            FieldValue::Fixed(data) => {
                if data.len() != field.count {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "Fixed field {} holds {} bytes, expected {}",
                        field.name,
                        data.len(),
                        field.count
                    )));
                }
                dst.put_slice(data);
            }
            FieldValue::Variable(data) => {
                if data.len() > field.variable_cap() {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "Variable field {} holds {} bytes, limit is {}",
                        field.name,
                        data.len(),
                        field.variable_cap()
                    )));
                }
                if field.prefix_width() == 1 {
                    dst.put_u8(data.len() as u8);
                } else {
                    dst.put_u16_le(data.len() as u16);
                }
                dst.put_slice(data);
            }
        }
        Ok(())
    }

    /// Read one value of `field`'s type from the front of `src`.
    ///
    /// `Fixed` and `Variable` payloads share the underlying buffer of `src`.
    pub fn decode(field: &FieldSchema, src: &mut Bytes) -> Result<Self> {
        let value = match field.field_type {
            FieldType::Fixed => FieldValue::Fixed(take(field, src, field.count)?),
            FieldType::Variable => {
                let len = if field.prefix_width() == 1 {
                    need(field, src, 1)?;
                    src.get_u8() as usize
                } else {
                    need(field, src, 2)?;
                    src.get_u16_le() as usize
                };
                if len > field.variable_cap() {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "Variable field {} declares {} bytes, limit is {}",
                        field.name,
                        len,
                        field.variable_cap()
                    )));
                }
                FieldValue::Variable(take(field, src, len)?)
            }
            fixed_width => {
                // wire_size is Some for every type except Fixed and Variable
                need(field, src, fixed_width.wire_size().unwrap_or(0))?;
                decode_primitive(fixed_width, src)
            }
        };
        Ok(value)
    }
}

fn need(field: &FieldSchema, src: &Bytes, len: usize) -> Result<()> {
    if src.remaining() < len {
        return Err(ProtocolError::MalformedPacket(format!(
            "Field {} needs {} bytes, {} remain",
            field.name,
            len,
            src.remaining()
        )));
    }
    Ok(())
}

fn take(field: &FieldSchema, src: &mut Bytes, len: usize) -> Result<Bytes> {
    need(field, src, len)?;
    Ok(src.split_to(len))
}

/// Caller has already checked that enough bytes remain
fn decode_primitive(field_type: FieldType, src: &mut Bytes) -> FieldValue {
    match field_type {
        FieldType::U8 => FieldValue::U8(src.get_u8()),
        FieldType::U16 => FieldValue::U16(src.get_u16_le()),
        FieldType::U32 => FieldValue::U32(src.get_u32_le()),
        FieldType::U64 => FieldValue::U64(src.get_u64_le()),
        FieldType::S8 => FieldValue::S8(src.get_i8()),
        FieldType::S16 => FieldValue::S16(src.get_i16_le()),
        FieldType::S32 => FieldValue::S32(src.get_i32_le()),
        FieldType::F32 => FieldValue::F32(src.get_f32_le()),
        FieldType::F64 => FieldValue::F64(src.get_f64_le()),
        FieldType::Uuid => {
            let mut raw = [0u8; 16];
            src.copy_to_slice(&mut raw);
            FieldValue::Uuid(Uuid::from_bytes(raw))
        }
        FieldType::Bool => FieldValue::Bool(src.get_u8() != 0),
        FieldType::Vector3 => FieldValue::Vector3(Vector3 {
            x: src.get_f32_le(),
            y: src.get_f32_le(),
            z: src.get_f32_le(),
        }),
        FieldType::Vector3d => FieldValue::Vector3d(Vector3d {
            x: src.get_f64_le(),
            y: src.get_f64_le(),
            z: src.get_f64_le(),
        }),
        FieldType::Vector4 => FieldValue::Vector4(Vector4 {
            x: src.get_f32_le(),
            y: src.get_f32_le(),
            z: src.get_f32_le(),
            w: src.get_f32_le(),
        }),
        FieldType::Quaternion => {
            let x = src.get_f32_le();
            let y = src.get_f32_le();
            let z = src.get_f32_le();
            FieldValue::Quaternion(Quaternion::from_xyz(x, y, z))
        }
        FieldType::IpAddr => {
            let mut octets = [0u8; 4];
            src.copy_to_slice(&mut octets);
            FieldValue::IpAddr(Ipv4Addr::from(octets))
        }
        FieldType::IpPort => FieldValue::IpPort(src.get_u16()),
        FieldType::Fixed | FieldType::Variable => FieldValue::Variable(Bytes::new()),
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::U8(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::U32(v)
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Uuid(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}
