//! Per-peer circuit state and the circuit table.
//!
//! A circuit is `Unestablished` while its code is only reserved, `Active` once
//! bound to a remote address, and `Closed` after it is torn down. All mutable
//! reliability state of one circuit lives behind a single mutex so that
//! bookkeeping for consecutive datagrams is serialized. Different circuits
//! never share a lock.

use crate::config::CircuitConfig;
use crate::core::header::{Header, MSG_RESENT};
use crate::error::constants::{ERR_CIRCUIT_TABLE_LOCK, ERR_LOCK_POISONED};
use crate::error::{ProtocolError, Result};
use crate::utils::SequenceArchive;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

/// Pending inbound acks beyond which something is wrong with ack emission
const PENDING_ACK_ALARM: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Unestablished,
    Active,
    Closed,
}

/// A reliable packet awaiting acknowledgement
#[derive(Debug)]
struct Unacked {
    datagram: BytesMut,
    sent_at: Instant,
    resends: u32,
}

#[derive(Debug)]
struct CircuitState {
    next_sequence: u32,
    archive: SequenceArchive,
    pending_acks: Vec<u32>,
    unacked: HashMap<u32, Unacked>,
    last_received: Instant,
}

/// What the receive path learned from one inbound header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    /// Outbound sequences acknowledged by the header's appended acks
    pub acked: usize,
    /// Pending inbound acks reached the flush threshold
    pub flush_acks: bool,
}

/// Result of a resend pass
#[derive(Debug, Default)]
pub struct ResendBatch {
    /// Datagrams to retransmit, already flagged as resent
    pub resend: Vec<(u32, Bytes)>,
    /// Sequences dropped after exhausting their resends
    pub dropped: Vec<u32>,
}

#[derive(Debug)]
pub struct Circuit {
    code: u32,
    remote: SocketAddr,
    closed: AtomicBool,
    sequence_wrap: u32,
    max_pending_acks: usize,
    state: Mutex<CircuitState>,
}

impl Circuit {
    pub fn new(code: u32, remote: SocketAddr, config: &CircuitConfig) -> Self {
        Circuit {
            code,
            remote,
            closed: AtomicBool::new(false),
            sequence_wrap: config.sequence_wrap.max(1),
            max_pending_acks: config.max_pending_acks,
            state: Mutex::new(CircuitState {
                next_sequence: 0,
                archive: SequenceArchive::new(config.archive_size),
                pending_acks: Vec::new(),
                unacked: HashMap::new(),
                last_received: Instant::now(),
            }),
        }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn status(&self) -> CircuitStatus {
        if self.is_closed() {
            CircuitStatus::Closed
        } else {
            CircuitStatus::Active
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> Result<MutexGuard<'_, CircuitState>> {
        self.state
            .lock()
            .map_err(|_| ProtocolError::Custom(ERR_LOCK_POISONED.to_string()))
    }

    /// Mark the circuit closed and release its archive and ack sets.
    /// Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Ok(mut state) = self.lock() {
            state.archive.clear();
            state.pending_acks = Vec::new();
            state.unacked = HashMap::new();
        }
        true
    }

    /// Next outbound sequence number, in `1..=sequence_wrap`
    pub fn next_sequence(&self) -> Result<u32> {
        let mut state = self.lock()?;
        state.next_sequence = if state.next_sequence >= self.sequence_wrap {
            1
        } else {
            state.next_sequence + 1
        };
        Ok(state.next_sequence)
    }

    /// Inbound bookkeeping for one datagram: apply appended acks, queue an ack
    /// for a reliable sequence and check it against the archive.
    ///
    /// # Errors
    /// `DuplicateSequence` if a reliable sequence was already archived. The
    /// duplicate is still acked, since the peer evidently missed the first ack.
    pub fn receive(&self, header: &Header) -> Result<Receipt> {
        if self.is_closed() {
            return Err(ProtocolError::CircuitClosed);
        }
        let mut state = self.lock()?;
        state.last_received = Instant::now();

        let acked = header
            .acks
            .iter()
            .filter(|&&seq| state.unacked.remove(&seq).is_some())
            .count();

        if header.reliable {
            if !state.pending_acks.contains(&header.sequence) {
                state.pending_acks.push(header.sequence);
            }
            if state.pending_acks.len() > PENDING_ACK_ALARM {
                error!(
                    remote = %self.remote,
                    pending = state.pending_acks.len(),
                    "Too many pending acks"
                );
            }
            if !state.archive.insert(header.sequence) {
                return Err(ProtocolError::DuplicateSequence {
                    sequence: header.sequence,
                    resent: header.resent,
                });
            }
        }

        Ok(Receipt {
            acked,
            flush_acks: state.pending_acks.len() >= self.max_pending_acks,
        })
    }

    /// Remove acknowledged sequences from the unacked set. Returns how many
    /// were outstanding.
    pub fn acknowledge<I>(&self, sequences: I) -> Result<usize>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut state = self.lock()?;
        Ok(sequences
            .into_iter()
            .filter(|seq| state.unacked.remove(seq).is_some())
            .count())
    }

    /// Take up to `max` pending inbound acks, oldest first
    pub fn take_pending_acks(&self, max: usize) -> Result<Vec<u32>> {
        let mut state = self.lock()?;
        let n = state.pending_acks.len().min(max);
        Ok(state.pending_acks.drain(..n).collect())
    }

    /// Take every pending ack if there are some but fewer than `limit`;
    /// otherwise leave them for an explicit `PacketAck`
    pub fn take_appendable_acks(&self, limit: usize) -> Result<Vec<u32>> {
        let mut state = self.lock()?;
        let pending = state.pending_acks.len();
        if pending > 0 && pending < limit {
            Ok(std::mem::take(&mut state.pending_acks))
        } else {
            Ok(Vec::new())
        }
    }

    pub fn pending_ack_count(&self) -> usize {
        self.lock().map(|s| s.pending_acks.len()).unwrap_or(0)
    }

    /// Remember a reliable datagram until the peer acks it
    pub fn record_unacked(&self, sequence: u32, datagram: &[u8]) -> Result<()> {
        let mut state = self.lock()?;
        state.unacked.insert(
            sequence,
            Unacked {
                datagram: BytesMut::from(datagram),
                sent_at: Instant::now(),
                resends: 0,
            },
        );
        Ok(())
    }

    pub fn is_unacked(&self, sequence: u32) -> bool {
        self.lock()
            .map(|s| s.unacked.contains_key(&sequence))
            .unwrap_or(false)
    }

    pub fn unacked_count(&self) -> usize {
        self.lock().map(|s| s.unacked.len()).unwrap_or(0)
    }

    /// Collect unacked datagrams older than `timeout`. Each is flagged as
    /// resent and restamped; those already resent `max_resends` times are
    /// dropped instead.
    #[instrument(skip(self), fields(remote = %self.remote))]
    pub fn collect_resends(&self, timeout: Duration, max_resends: u32) -> Result<ResendBatch> {
        let mut state = self.lock()?;
        let now = Instant::now();
        let mut batch = ResendBatch::default();

        state.unacked.retain(|&sequence, entry| {
            if now.duration_since(entry.sent_at) < timeout {
                return true;
            }
            if entry.resends >= max_resends {
                batch.dropped.push(sequence);
                return false;
            }
            entry.resends += 1;
            entry.sent_at = now;
            if let Some(flags) = entry.datagram.first_mut() {
                *flags |= MSG_RESENT;
            }
            batch
                .resend
                .push((sequence, Bytes::copy_from_slice(&entry.datagram)));
            true
        });

        if !batch.resend.is_empty() || !batch.dropped.is_empty() {
            debug!(
                resend = batch.resend.len(),
                dropped = batch.dropped.len(),
                "Collected unacked packets"
            );
        }
        Ok(batch)
    }

    /// Time since the last datagram arrived on this circuit
    pub fn idle_for(&self) -> Duration {
        self.lock()
            .map(|s| s.last_received.elapsed())
            .unwrap_or_default()
    }

    /// Whether `sequence` is still in the inbound archive
    pub fn is_archived(&self, sequence: u32) -> bool {
        self.lock()
            .map(|s| s.archive.contains(sequence))
            .unwrap_or(false)
    }
}

/// Reserved circuit codes and active circuits keyed by remote address
#[derive(Debug, Default)]
pub struct CircuitTable {
    active: RwLock<HashMap<SocketAddr, Arc<Circuit>>>,
    reserved: Mutex<HashSet<u32>>,
}

impl CircuitTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn reserved(&self) -> Result<MutexGuard<'_, HashSet<u32>>> {
        self.reserved
            .lock()
            .map_err(|_| ProtocolError::Custom(ERR_CIRCUIT_TABLE_LOCK.to_string()))
    }

    /// Reserve a caller-chosen circuit code. Returns `false` if it was
    /// already reserved.
    pub fn reserve(&self, code: u32) -> Result<bool> {
        Ok(self.reserved()?.insert(code))
    }

    /// Reserve a fresh random nonzero circuit code
    pub fn reserve_random(&self) -> Result<u32> {
        let mut reserved = self.reserved()?;
        loop {
            let code = rand::random::<u32>();
            if code != 0 && reserved.insert(code) {
                return Ok(code);
            }
        }
    }

    /// Promote a reserved code to an active circuit bound to `remote`
    ///
    /// # Errors
    /// `UnknownCircuitCode` if `code` was never reserved.
    #[instrument(skip(self, config))]
    pub fn activate(
        &self,
        code: u32,
        remote: SocketAddr,
        config: &CircuitConfig,
    ) -> Result<Arc<Circuit>> {
        if !self.reserved()?.remove(&code) {
            return Err(ProtocolError::UnknownCircuitCode(code));
        }
        let circuit = self.bind(code, remote, config)?;
        info!(code, remote = %remote, "Circuit activated");
        Ok(circuit)
    }

    /// Bind an active circuit to `remote` without a reservation. Replaces
    /// any circuit previously bound to that address.
    pub fn bind(&self, code: u32, remote: SocketAddr, config: &CircuitConfig) -> Result<Arc<Circuit>> {
        let circuit = Arc::new(Circuit::new(code, remote, config));
        let previous = self
            .active
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_CIRCUIT_TABLE_LOCK.to_string()))?
            .insert(remote, Arc::clone(&circuit));
        if let Some(previous) = previous {
            previous.close();
        }
        Ok(circuit)
    }

    pub fn get(&self, remote: &SocketAddr) -> Result<Option<Arc<Circuit>>> {
        Ok(self
            .active
            .read()
            .map_err(|_| ProtocolError::Custom(ERR_CIRCUIT_TABLE_LOCK.to_string()))?
            .get(remote)
            .cloned())
    }

    /// Unbind and close the circuit at `remote`
    pub fn remove(&self, remote: &SocketAddr) -> Result<Option<Arc<Circuit>>> {
        let removed = self
            .active
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_CIRCUIT_TABLE_LOCK.to_string()))?
            .remove(remote);
        if let Some(circuit) = &removed {
            circuit.close();
        }
        Ok(removed)
    }

    /// Snapshot of all active circuits
    pub fn active(&self) -> Result<Vec<Arc<Circuit>>> {
        Ok(self
            .active
            .read()
            .map_err(|_| ProtocolError::Custom(ERR_CIRCUIT_TABLE_LOCK.to_string()))?
            .values()
            .cloned()
            .collect())
    }

    pub fn status(&self, code: u32) -> Result<CircuitStatus> {
        if self.reserved()?.contains(&code) {
            return Ok(CircuitStatus::Unestablished);
        }
        let active = self.active()?;
        Ok(if active.iter().any(|c| c.code() == code) {
            CircuitStatus::Active
        } else {
            CircuitStatus::Closed
        })
    }

    /// Close every circuit and forget all reservations
    pub fn clear(&self) -> Result<()> {
        let drained: Vec<_> = self
            .active
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_CIRCUIT_TABLE_LOCK.to_string()))?
            .drain()
            .collect();
        for (_, circuit) in drained {
            circuit.close();
        }
        self.reserved()?.clear();
        Ok(())
    }
}
