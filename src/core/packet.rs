//! Packet instances and the schema-driven body codec.
//!
//! A [`Packet`] holds one list of [`Block`] instances per block of its schema,
//! in schema order. Encoding and decoding walk the schema; there is no
//! per-packet generated code.

use super::value::FieldValue;
use crate::error::constants::ERR_TRAILING_BYTES;
use crate::error::{ProtocolError, Result};
use crate::schema::{BlockSchema, PacketSchema, Repetition};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::sync::Arc;

/// One instance of a block: a value per schema field, in field order
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub values: Vec<FieldValue>,
}

impl Block {
    /// Instance with every field at its default value
    pub fn new(schema: &BlockSchema) -> Self {
        Block {
            values: schema.fields.iter().map(FieldValue::default_for).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.values.get(index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    schema: Arc<PacketSchema>,
    blocks: Vec<Vec<Block>>,
}

impl Packet {
    /// Default instance: one block for `Single`, `n` for `Multiple(n)` and none
    /// for `Variable`
    pub fn new(schema: Arc<PacketSchema>) -> Self {
        let blocks = schema
            .blocks
            .iter()
            .map(|block| {
                let instances = match block.repetition {
                    Repetition::Single => 1,
                    Repetition::Multiple(n) => n,
                    Repetition::Variable => 0,
                };
                (0..instances).map(|_| Block::new(block)).collect()
            })
            .collect();
        Packet { schema, blocks }
    }

    /// Build a packet from explicit block instances. Counts and types are
    /// checked when the packet is encoded.
    pub fn from_blocks(schema: Arc<PacketSchema>, blocks: Vec<Vec<Block>>) -> Self {
        Packet { schema, blocks }
    }

    pub fn schema(&self) -> &Arc<PacketSchema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Instances of the named block
    pub fn blocks(&self, block: &str) -> Option<&[Block]> {
        let index = self.schema.block_index(block)?;
        self.blocks.get(index).map(Vec::as_slice)
    }

    /// All block instances, in schema order
    pub fn all_blocks(&self) -> &[Vec<Block>] {
        &self.blocks
    }

    pub fn field(&self, block: &str, instance: usize, field: &str) -> Option<&FieldValue> {
        let block_index = self.schema.block_index(block)?;
        let field_index = self.schema.blocks[block_index].field_index(field)?;
        self.blocks
            .get(block_index)?
            .get(instance)?
            .get(field_index)
    }

    /// Replace one field value.
    ///
    /// # Errors
    /// `MalformedPacket` if the block, instance or field does not exist, or if
    /// the value's type differs from the field's declared type.
    pub fn set_field(
        &mut self,
        block: &str,
        instance: usize,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<()> {
        let value = value.into();
        let block_index = self.block_index(block)?;
        let block_schema = &self.schema.blocks[block_index];
        let field_index = block_schema.field_index(field).ok_or_else(|| {
            ProtocolError::MalformedPacket(format!("{}.{} has no field {}", self.schema.name, block, field))
        })?;
        let expected = block_schema.fields[field_index].field_type;
        if value.field_type() != expected {
            return Err(ProtocolError::MalformedPacket(format!(
                "{block}.{field} expects {expected:?}, got {:?}",
                value.field_type()
            )));
        }

        let slot = self
            .blocks
            .get_mut(block_index)
            .and_then(|instances| instances.get_mut(instance))
            .and_then(|b| b.values.get_mut(field_index))
            .ok_or_else(|| {
                ProtocolError::MalformedPacket(format!("{block} has no instance {instance}"))
            })?;
        *slot = value;
        Ok(())
    }

    /// Append a default instance of the named block and return it
    pub fn push_block(&mut self, block: &str) -> Result<&mut Block> {
        let index = self.block_index(block)?;
        let fresh = Block::new(&self.schema.blocks[index]);
        let instances = self.blocks.get_mut(index).ok_or_else(|| {
            ProtocolError::MalformedPacket(format!("{} is missing block list {}", self.schema.name, block))
        })?;
        instances.push(fresh);
        instances
            .last_mut()
            .ok_or_else(|| ProtocolError::MalformedPacket(format!("{block} has no instances")))
    }

    fn block_index(&self, block: &str) -> Result<usize> {
        self.schema.block_index(block).ok_or_else(|| {
            ProtocolError::MalformedPacket(format!("{} has no block {}", self.schema.name, block))
        })
    }

    /// Write the body (everything after the header id) onto `dst`.
    ///
    /// # Errors
    /// `MalformedPacket` on a wrong instance count for `Single`/`Multiple`
    /// blocks, more than 255 `Variable` instances, or any field that does not
    /// fit its schema.
    pub fn encode_body(&self, dst: &mut BytesMut) -> Result<()> {
        if self.blocks.len() != self.schema.blocks.len() {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} has {} block lists, schema declares {}",
                self.schema.name,
                self.blocks.len(),
                self.schema.blocks.len()
            )));
        }

        for (schema, instances) in self.schema.blocks.iter().zip(&self.blocks) {
            match schema.repetition {
                Repetition::Variable => {
                    let count = u8::try_from(instances.len()).map_err(|_| {
                        ProtocolError::MalformedPacket(format!(
                            "Variable block {} has {} instances, limit is 255",
                            schema.name,
                            instances.len()
                        ))
                    })?;
                    dst.put_u8(count);
                }
                Repetition::Single => check_count(schema, instances.len(), 1)?,
                Repetition::Multiple(n) => check_count(schema, instances.len(), n)?,
            }

            for instance in instances {
                if instance.values.len() != schema.fields.len() {
                    return Err(ProtocolError::MalformedPacket(format!(
                        "Block {} instance has {} values, schema declares {}",
                        schema.name,
                        instance.values.len(),
                        schema.fields.len()
                    )));
                }
                for (field, value) in schema.fields.iter().zip(&instance.values) {
                    value.encode(field, dst)?;
                }
            }
        }
        Ok(())
    }

    /// Decode a body that has already been zero-expanded and stripped of its
    /// ack trailer. Every byte must be consumed.
    pub fn decode_body(schema: &Arc<PacketSchema>, mut src: Bytes) -> Result<Packet> {
        let mut blocks = Vec::with_capacity(schema.blocks.len());

        for block in &schema.blocks {
            let count = match block.repetition {
                Repetition::Single => 1,
                Repetition::Multiple(n) => n,
                Repetition::Variable => {
                    if !src.has_remaining() {
                        return Err(ProtocolError::MalformedPacket(format!(
                            "Missing instance count for block {}",
                            block.name
                        )));
                    }
                    src.get_u8() as usize
                }
            };

            let mut instances = Vec::with_capacity(count);
            for _ in 0..count {
                let values = block
                    .fields
                    .iter()
                    .map(|field| FieldValue::decode(field, &mut src))
                    .collect::<Result<Vec<_>>>()?;
                instances.push(Block { values });
            }
            blocks.push(instances);
        }

        if src.has_remaining() {
            return Err(ProtocolError::malformed(ERR_TRAILING_BYTES));
        }

        Ok(Packet {
            schema: Arc::clone(schema),
            blocks,
        })
    }
}

fn check_count(schema: &BlockSchema, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(ProtocolError::MalformedPacket(format!(
            "Block {} has {} instances, expected {}",
            schema.name, actual, expected
        )));
    }
    Ok(())
}
