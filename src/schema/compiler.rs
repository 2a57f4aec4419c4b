//! # Template Compiler
//!
//! Turns message template text into an immutable [`Catalogue`].
//!
//! ## Template Format
//! ```text
//! // comment
//! {
//!     UseCircuitCode Low 3 NotTrusted Unencoded
//!     {
//!         CircuitCode Single
//!         {   Code        U32     }
//!         {   SessionID   LLUUID  }
//!     }
//! }
//! ```
//!
//! Nesting is exactly three levels deep: packet, block, field. Packet header
//! tokens are `name frequency id trust encoding`; the id is decimal or
//! `0x`-prefixed hex. Block header tokens are `name Single|Multiple n|Variable`.
//! Field lines are `{ name TYPE [count] }`.
//!
//! Any error fails the whole compile; a partial catalogue is never returned.

use super::{BlockSchema, Catalogue, FieldSchema, FieldType, Frequency, PacketSchema, Repetition};
use crate::error::{ProtocolError, Result};
use std::path::Path;
use tracing::{debug, info, instrument};

/// Highest id a High or Medium packet may use; `0xFF` escapes to the next frequency.
const MAX_SHORT_ID: u32 = 0xFE;

/// Compile template text into a catalogue
#[instrument(skip(template), fields(bytes = template.len()))]
pub fn compile(template: &str) -> Result<Catalogue> {
    let mut parser = TemplateParser::default();
    for (index, line) in template.lines().enumerate() {
        parser.line(index + 1, line)?;
    }
    parser.finish()
}

/// Read and compile a template file
pub fn compile_file<P: AsRef<Path>>(path: P) -> Result<Catalogue> {
    let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ProtocolError::SchemaCompile {
        line: 0,
        reason: format!("Failed to read {}: {e}", path.as_ref().display()),
    })?;
    compile(&text)
}

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
enum Depth {
    #[default]
    Outside,
    Packet,
    Block,
}

#[derive(Default)]
struct TemplateParser {
    depth: Depth,
    /// Line that opened the innermost unterminated brace
    open_line: usize,
    packet: Option<PacketSchema>,
    /// Header line of the packet being parsed
    packet_line: usize,
    block: Option<BlockSchema>,
    catalogue: Catalogue,
}

fn fail<T>(line: usize, reason: impl Into<String>) -> Result<T> {
    Err(ProtocolError::SchemaCompile {
        line,
        reason: reason.into(),
    })
}

fn parse_number(token: &str) -> Option<u32> {
    match token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

impl TemplateParser {
    fn line(&mut self, number: usize, raw: &str) -> Result<()> {
        let text = raw.trim();
        if text.is_empty() || text.starts_with("//") {
            return Ok(());
        }

        match self.depth {
            Depth::Outside => {
                if text == "{" {
                    self.depth = Depth::Packet;
                    self.open_line = number;
                    Ok(())
                } else if text.starts_with("version") {
                    Ok(())
                } else {
                    fail(number, format!("unexpected text outside of a packet: '{text}'"))
                }
            }
            Depth::Packet => {
                if text == "{" {
                    if self.packet.is_none() {
                        return fail(number, "block opened before the packet header");
                    }
                    self.depth = Depth::Block;
                    self.open_line = number;
                    Ok(())
                } else if text == "}" {
                    let Some(packet) = self.packet.take() else {
                        return fail(number, "packet closed without a header");
                    };
                    debug!(packet = %packet.name, blocks = packet.blocks.len(), "Parsed packet");
                    let line = self.packet_line;
                    self.catalogue.insert(packet).map_err(|e| ProtocolError::SchemaCompile {
                        line,
                        reason: e.to_string(),
                    })?;
                    self.depth = Depth::Outside;
                    Ok(())
                } else if let Some(packet) = &self.packet {
                    fail(number, format!("unexpected text in packet {}: '{text}'", packet.name))
                } else {
                    self.packet_header(number, text)
                }
            }
            Depth::Block => {
                if text.starts_with('{') {
                    self.field(number, text)
                } else if text == "}" {
                    let Some(block) = self.block.take() else {
                        return fail(number, "block closed without a header");
                    };
                    if let Some(packet) = self.packet.as_mut() {
                        packet.blocks.push(block);
                    }
                    self.depth = Depth::Packet;
                    Ok(())
                } else if let Some(block) = &self.block {
                    fail(number, format!("unexpected text in block {}: '{text}'", block.name))
                } else {
                    self.block_header(number, text)
                }
            }
        }
    }

    fn packet_header(&mut self, number: usize, text: &str) -> Result<()> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() < 5 {
            return fail(
                number,
                format!("packet header needs name, frequency, id, trust and encoding: '{text}'"),
            );
        }

        let name = tokens[0];
        let Some(frequency) = Frequency::from_token(tokens[1]) else {
            return fail(number, format!("unknown frequency token '{}'", tokens[1]));
        };
        let Some(raw_id) = parse_number(tokens[2]) else {
            return fail(number, format!("malformed packet id '{}'", tokens[2]));
        };

        let id = match frequency {
            Frequency::Fixed => (raw_id & 0xFFFF) as u16,
            Frequency::Low => match u16::try_from(raw_id) {
                Ok(id) => id,
                Err(_) => return fail(number, format!("low frequency id {raw_id} exceeds 65535")),
            },
            Frequency::High | Frequency::Medium => {
                if raw_id > MAX_SHORT_ID {
                    return fail(
                        number,
                        format!("{frequency} frequency id {raw_id} exceeds {MAX_SHORT_ID}"),
                    );
                }
                raw_id as u16
            }
        };

        let trusted = match tokens[3] {
            "Trusted" => true,
            "NotTrusted" | "Untrusted" => false,
            other => return fail(number, format!("unknown trust token '{other}'")),
        };
        let zerocoded = match tokens[4] {
            "Zerocoded" => true,
            "Unencoded" => false,
            other => return fail(number, format!("unknown encoding token '{other}'")),
        };

        self.packet_line = number;
        self.packet = Some(PacketSchema {
            name: name.to_string(),
            frequency,
            id,
            trusted,
            zerocoded,
            blocks: Vec::new(),
        });
        Ok(())
    }

    fn block_header(&mut self, number: usize, text: &str) -> Result<()> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let (Some(name), Some(kind)) = (tokens.first(), tokens.get(1)) else {
            return fail(number, format!("block header needs a name and repetition: '{text}'"));
        };

        let repetition = match *kind {
            "Single" => Repetition::Single,
            "Variable" => Repetition::Variable,
            "Multiple" => {
                let count = tokens
                    .get(2)
                    .and_then(|t| parse_number(t))
                    .filter(|&n| n > 0);
                match count {
                    Some(n) => Repetition::Multiple(n as usize),
                    None => return fail(number, format!("block {name} needs a positive Multiple count")),
                }
            }
            other => return fail(number, format!("unknown block repetition '{other}'")),
        };

        self.block = Some(BlockSchema {
            name: name.to_string(),
            repetition,
            fields: Vec::new(),
        });
        Ok(())
    }

    fn field(&mut self, number: usize, text: &str) -> Result<()> {
        let Some(block) = self.block.as_mut() else {
            return fail(number, "field appears before its block header");
        };
        let Some(inner) = text
            .strip_prefix('{')
            .and_then(|rest| rest.trim_end().strip_suffix('}'))
        else {
            return fail(number, format!("field line missing closing brace: '{text}'"));
        };

        let tokens: Vec<&str> = inner.split_whitespace().collect();
        let (Some(name), Some(type_token)) = (tokens.first(), tokens.get(1)) else {
            return fail(number, format!("field needs a name and a type: '{text}'"));
        };
        let Some(field_type) = FieldType::from_token(type_token) else {
            return fail(number, format!("unknown type token '{type_token}'"));
        };

        let count = match tokens.get(2) {
            Some(token) => match parse_number(token) {
                Some(n) if n > 0 => n as usize,
                _ => return fail(number, format!("malformed field count '{token}'")),
            },
            None => 1,
        };

        block.fields.push(FieldSchema {
            name: name.to_string(),
            field_type,
            count,
        });
        Ok(())
    }

    fn finish(self) -> Result<Catalogue> {
        if self.depth != Depth::Outside {
            return fail(self.open_line, "missing closing brace");
        }

        let catalogue = self.catalogue;
        info!(packets = catalogue.len(), "Compiled message template");
        Ok(catalogue)
    }
}
