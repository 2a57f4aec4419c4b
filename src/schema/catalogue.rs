//! Immutable packet catalogue.
//!
//! Built once by the template compiler and shared by reference afterwards.
//! Packets are indexed three ways: by wire key in the High (256), Medium (256)
//! and Low (65536) tables, and by name.

use super::{Frequency, PacketSchema};
use crate::error::{ProtocolError, Result};
use std::collections::HashMap;
use std::sync::Arc;

const HIGH_TABLE_SIZE: usize = 256;
const MEDIUM_TABLE_SIZE: usize = 256;
const LOW_TABLE_SIZE: usize = 65536;

/// Compiled packet definitions with frequency-indexed lookup tables
#[derive(Debug)]
pub struct Catalogue {
    packets: Vec<Arc<PacketSchema>>,
    high: Box<[Option<Arc<PacketSchema>>]>,
    medium: Box<[Option<Arc<PacketSchema>>]>,
    low: Box<[Option<Arc<PacketSchema>>]>,
    by_name: HashMap<String, Arc<PacketSchema>>,
}

impl Default for Catalogue {
    fn default() -> Self {
        Catalogue {
            packets: Vec::new(),
            high: vec![None; HIGH_TABLE_SIZE].into_boxed_slice(),
            medium: vec![None; MEDIUM_TABLE_SIZE].into_boxed_slice(),
            low: vec![None; LOW_TABLE_SIZE].into_boxed_slice(),
            by_name: HashMap::new(),
        }
    }
}

impl Catalogue {
    /// Build a catalogue from a list of packet schemas.
    ///
    /// Fails if two packets share a wire key or a name, if a High/Medium
    /// id does not fit its table, or if a packet claims Low id 0.
    pub fn from_packets(packets: Vec<PacketSchema>) -> Result<Self> {
        let mut catalogue = Catalogue::default();
        for packet in packets {
            catalogue.insert(packet)?;
        }
        Ok(catalogue)
    }

    /// Add one packet. The catalogue is unchanged on error.
    pub(crate) fn insert(&mut self, packet: PacketSchema) -> Result<()> {
        let (frequency, id) = packet.wire_key();
        // a zero-coded 00 00 id cannot be told apart from the shortcut form
        if frequency == Frequency::Low && id == 0 {
            return Err(ProtocolError::ConfigError(format!(
                "Packet {} uses reserved Low id 0",
                packet.name
            )));
        }

        let table = match frequency {
            Frequency::High => &mut self.high,
            Frequency::Medium => &mut self.medium,
            _ => &mut self.low,
        };

        let slot = table.get_mut(id as usize).ok_or_else(|| {
            ProtocolError::ConfigError(format!(
                "Packet {} id {} does not fit the {} table",
                packet.name, id, frequency
            ))
        })?;

        if let Some(existing) = slot {
            return Err(ProtocolError::ConfigError(format!(
                "Packets {} and {} share {} id {}",
                existing.name, packet.name, frequency, id
            )));
        }

        if self.by_name.contains_key(&packet.name) {
            return Err(ProtocolError::ConfigError(format!(
                "Duplicate packet name {}",
                packet.name
            )));
        }

        let packet = Arc::new(packet);
        *slot = Some(Arc::clone(&packet));
        self.by_name.insert(packet.name.clone(), Arc::clone(&packet));
        self.packets.push(packet);
        Ok(())
    }

    /// Resolve a `(frequency, id)` pair. `Fixed` resolves through the Low table.
    pub fn lookup(&self, frequency: Frequency, id: u16) -> Option<&Arc<PacketSchema>> {
        let table = match frequency.wire() {
            Frequency::High => &self.high,
            Frequency::Medium => &self.medium,
            _ => &self.low,
        };
        table.get(id as usize).and_then(Option::as_ref)
    }

    /// Resolve a `(frequency, id)` pair or fail with [`ProtocolError::UnknownPacket`]
    pub fn require(&self, frequency: Frequency, id: u16) -> Result<&Arc<PacketSchema>> {
        self.lookup(frequency, id)
            .ok_or(ProtocolError::UnknownPacket { frequency, id })
    }

    /// Find a packet by name
    pub fn by_name(&self, name: &str) -> Option<&Arc<PacketSchema>> {
        self.by_name.get(name)
    }

    /// All packets in template order
    pub fn packets(&self) -> &[Arc<PacketSchema>] {
        &self.packets
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
