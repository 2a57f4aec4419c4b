//! UDP circuit transport.
//!
//! ## Tasks
//! - **Receiver**: reads datagrams, decodes them, resolves the circuit, runs
//!   dedup and ack bookkeeping, then enqueues onto a bounded inbound queue
//! - **Dispatch workers**: pull from the queue with a poll timeout and invoke
//!   handlers; packets from circuits closed meanwhile are skipped
//! - **Maintenance**: periodic ack flush, resend of unacked reliable packets
//!   and closing of inactive circuits
//!
//! Every per-datagram failure is logged and counted; none stops the receiver.

use crate::config::NetworkConfig;
use crate::core::codec::{Datagram, MessageCodec};
use crate::core::packet::Packet;
use crate::core::value::FieldValue;
use crate::error::constants::{
    ERR_LOCK_POISONED, ERR_MISSING_ACK_SCHEMA, ERR_MISSING_CIRCUIT_SCHEMA, ERR_TRANSPORT_STOPPED,
};
use crate::error::{ProtocolError, Result};
use crate::protocol::{
    Circuit, CircuitStatus, CircuitTable, Dispatcher, CIRCUIT_CODE_BLOCK, CIRCUIT_CODE_FIELD,
    MAX_ACKS_PER_PACKET, PACKET_ACK, PACKET_ACK_BLOCK, PACKET_ACK_FIELD, USE_CIRCUIT_CODE,
};
use crate::schema::{Catalogue, FieldType, PacketSchema};
use crate::utils::{Metrics, MetricsSnapshot};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Largest datagram the receiver accepts
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// A decoded packet waiting for dispatch
#[derive(Debug)]
pub struct InboundItem {
    pub circuit: Arc<Circuit>,
    pub packet: Packet,
}

struct Inner {
    socket: UdpSocket,
    codec: MessageCodec,
    circuits: CircuitTable,
    dispatcher: Dispatcher,
    metrics: Metrics,
    config: NetworkConfig,
    ack_schema: Arc<PacketSchema>,
    circuit_schema: Arc<PacketSchema>,
}

/// Reliable UDP transport serving many circuits from one socket
pub struct Transport {
    inner: Arc<Inner>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Look up a well-known packet and check that `block.field` is a `U32`
fn well_known(
    catalogue: &Catalogue,
    packet: &str,
    block: &str,
    field: &str,
    missing: &str,
) -> Result<Arc<PacketSchema>> {
    let schema = catalogue
        .by_name(packet)
        .ok_or_else(|| ProtocolError::ConfigError(missing.to_string()))?;
    let field_type = schema
        .block_index(block)
        .and_then(|b| {
            let block = &schema.blocks[b];
            block.field_index(field).map(|f| block.fields[f].field_type)
        });
    if field_type != Some(FieldType::U32) {
        return Err(ProtocolError::ConfigError(format!(
            "{packet} must declare block {block} with field {field} of type U32"
        )));
    }
    Ok(Arc::clone(schema))
}

impl Transport {
    /// Bind the socket from `config.transport.bind_address` and start the
    /// receiver, dispatch and maintenance tasks.
    ///
    /// # Errors
    /// `ConfigError` for an invalid configuration or a catalogue without
    /// `PacketAck`/`UseCircuitCode`; `Io` if the socket cannot be bound.
    #[instrument(skip(config, catalogue), fields(addr = %config.transport.bind_address))]
    pub async fn bind(config: NetworkConfig, catalogue: Arc<Catalogue>) -> Result<Self> {
        config.validate_strict()?;

        let ack_schema = well_known(
            &catalogue,
            PACKET_ACK,
            PACKET_ACK_BLOCK,
            PACKET_ACK_FIELD,
            ERR_MISSING_ACK_SCHEMA,
        )?;
        let circuit_schema = well_known(
            &catalogue,
            USE_CIRCUIT_CODE,
            CIRCUIT_CODE_BLOCK,
            CIRCUIT_CODE_FIELD,
            ERR_MISSING_CIRCUIT_SCHEMA,
        )?;

        let socket = UdpSocket::bind(&config.transport.bind_address).await?;
        info!(local = %socket.local_addr()?, packets = catalogue.len(), "Transport bound");

        let (queue_tx, queue_rx) = mpsc::channel(config.transport.inbound_queue_capacity);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            socket,
            codec: MessageCodec::with_mtu(catalogue, config.transport.mtu),
            circuits: CircuitTable::new(),
            dispatcher: Dispatcher::new(),
            metrics: Metrics::new(),
            config,
            ack_schema,
            circuit_schema,
        });

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(receive_loop(
            Arc::clone(&inner),
            queue_tx,
            shutdown.subscribe(),
        )));

        let queue_rx = Arc::new(tokio::sync::Mutex::new(queue_rx));
        for worker in 0..inner.config.transport.dispatch_workers {
            tasks.push(tokio::spawn(dispatch_loop(
                Arc::clone(&inner),
                Arc::clone(&queue_rx),
                shutdown.subscribe(),
                worker,
            )));
        }

        tasks.push(tokio::spawn(maintenance_loop(
            Arc::clone(&inner),
            shutdown.subscribe(),
        )));

        Ok(Transport {
            inner,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    pub fn catalogue(&self) -> &Arc<Catalogue> {
        self.inner.codec.catalogue()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// Default instance of the named packet
    pub fn packet(&self, name: &str) -> Result<Packet> {
        self.catalogue()
            .by_name(name)
            .map(|schema| Packet::new(Arc::clone(schema)))
            .ok_or_else(|| ProtocolError::UnknownPacketName(name.to_string()))
    }

    /// Register a handler for the named packet
    pub fn register_handler<F>(&self, packet: &str, handler: F) -> Result<()>
    where
        F: Fn(&Packet, &Arc<Circuit>) -> Result<()> + Send + Sync + 'static,
    {
        if self.catalogue().by_name(packet).is_none() {
            return Err(ProtocolError::UnknownPacketName(packet.to_string()));
        }
        self.inner.dispatcher.register(packet, handler)
    }

    /// Reserve a fresh random circuit code for an expected peer
    pub fn reserve_circuit(&self) -> Result<u32> {
        let code = self.inner.circuits.reserve_random()?;
        debug!(code, "Reserved circuit code");
        Ok(code)
    }

    /// Reserve a caller-chosen circuit code. Returns `false` if it was
    /// already reserved.
    pub fn reserve_circuit_code(&self, code: u32) -> Result<bool> {
        self.inner.circuits.reserve(code)
    }

    pub fn circuit_status(&self, code: u32) -> Result<CircuitStatus> {
        self.inner.circuits.status(code)
    }

    pub fn circuit(&self, remote: &SocketAddr) -> Result<Option<Arc<Circuit>>> {
        self.inner.circuits.get(remote)
    }

    pub fn circuits(&self) -> Result<Vec<Arc<Circuit>>> {
        self.inner.circuits.active()
    }

    /// Open a circuit to `remote` and announce it with a reliable
    /// `UseCircuitCode` carrying `code`
    #[instrument(skip(self))]
    pub async fn connect(&self, remote: SocketAddr, code: u32) -> Result<Arc<Circuit>> {
        let circuit = self
            .inner
            .circuits
            .bind(code, remote, &self.inner.config.circuit)?;

        let mut packet = Packet::new(Arc::clone(&self.inner.circuit_schema));
        packet.set_field(CIRCUIT_CODE_BLOCK, 0, CIRCUIT_CODE_FIELD, code)?;
        if let Err(e) = self.inner.send(&circuit, packet, true).await {
            self.inner.circuits.remove(&remote)?;
            warn!(code, remote = %remote, error = %e, "Circuit announcement failed");
            return Err(e);
        }

        info!(code, remote = %remote, "Circuit opened");
        Ok(circuit)
    }

    /// Encode and send `packet` on `circuit`. Reliable packets are kept until
    /// acked and resent by the maintenance task.
    ///
    /// Returns the sequence number used.
    pub async fn send(&self, circuit: &Arc<Circuit>, packet: Packet, reliable: bool) -> Result<u32> {
        if *self.shutdown.borrow() {
            return Err(ProtocolError::Custom(ERR_TRANSPORT_STOPPED.to_string()));
        }
        self.inner.send(circuit, packet, reliable).await
    }

    /// Send `packet` to every active circuit. Returns how many sends succeeded.
    pub async fn broadcast(&self, packet: &Packet, reliable: bool) -> Result<usize> {
        let mut sent = 0;
        for circuit in self.inner.circuits.active()? {
            match self.inner.send(&circuit, packet.clone(), reliable).await {
                Ok(_) => sent += 1,
                Err(e) => warn!(
                    remote = %circuit.remote(),
                    packet = %packet.name(),
                    error = %e,
                    "Broadcast send failed"
                ),
            }
        }
        Ok(sent)
    }

    /// Send all pending acks of `circuit` now
    pub async fn flush_acks(&self, circuit: &Arc<Circuit>) -> Result<usize> {
        self.inner.flush_acks(circuit).await
    }

    /// Unbind and close the circuit at `remote`. Packets already queued from
    /// it are not dispatched.
    pub fn close_circuit(&self, remote: &SocketAddr) -> Result<bool> {
        let removed = self.inner.circuits.remove(remote)?;
        if let Some(circuit) = &removed {
            info!(code = circuit.code(), remote = %remote, "Circuit closed");
        }
        Ok(removed.is_some())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stop all tasks and close every circuit
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let tasks: Vec<_> = {
            let mut guard = self
                .tasks
                .lock()
                .map_err(|_| ProtocolError::Custom(ERR_LOCK_POISONED.to_string()))?;
            guard.drain(..).collect()
        };

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Transport task failed");
            }
        }

        self.inner.circuits.clear()?;
        self.inner.metrics.log_snapshot();
        info!("Transport shut down");
        Ok(())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

impl Inner {
    async fn send(&self, circuit: &Arc<Circuit>, packet: Packet, reliable: bool) -> Result<u32> {
        if circuit.is_closed() {
            return Err(ProtocolError::CircuitClosed);
        }

        let is_ack = packet.name() == PACKET_ACK;
        let sequence = circuit.next_sequence()?;
        let mut datagram = Datagram::new(packet, sequence, reliable);
        if reliable && !is_ack {
            datagram.header.acks =
                circuit.take_appendable_acks(self.config.circuit.max_appended_acks)?;
        }

        let bytes = self.codec.clone().encode_datagram(datagram)?;
        if reliable {
            circuit.record_unacked(sequence, &bytes)?;
        }
        self.send_raw(circuit.remote(), &bytes).await?;
        trace!(sequence, reliable, remote = %circuit.remote(), "Sent packet");
        Ok(sequence)
    }

    async fn send_raw(&self, remote: SocketAddr, bytes: &[u8]) -> Result<()> {
        match self.socket.send_to(bytes, remote).await {
            Ok(written) => {
                self.metrics.datagram_sent(written as u64);
                Ok(())
            }
            Err(e) => {
                self.metrics.send_failed();
                Err(e.into())
            }
        }
    }

    /// Drain pending acks into as many `PacketAck` packets as needed
    async fn flush_acks(&self, circuit: &Arc<Circuit>) -> Result<usize> {
        let mut flushed = 0;
        loop {
            let acks = circuit.take_pending_acks(MAX_ACKS_PER_PACKET)?;
            if acks.is_empty() {
                break;
            }

            let mut packet = Packet::new(Arc::clone(&self.ack_schema));
            for (i, ack) in acks.iter().enumerate() {
                packet.push_block(PACKET_ACK_BLOCK)?;
                packet.set_field(PACKET_ACK_BLOCK, i, PACKET_ACK_FIELD, *ack)?;
            }
            self.send(circuit, packet, false).await?;
            flushed += acks.len();
        }
        if flushed > 0 {
            trace!(remote = %circuit.remote(), acks = flushed, "Flushed acks");
        }
        Ok(flushed)
    }

    /// Flush acks from the receive path. A failure is logged; the datagram
    /// that triggered the flush is still accepted.
    async fn flush_acks_or_warn(&self, circuit: &Arc<Circuit>) {
        if let Err(e) = self.flush_acks(circuit).await {
            warn!(remote = %circuit.remote(), error = %e, "Ack flush failed");
        }
    }

    /// Receive-path processing for one raw datagram. Returns the item to
    /// enqueue, or an error describing why it was dropped.
    async fn handle_datagram(&self, raw: &[u8], from: SocketAddr) -> Result<InboundItem> {
        let Datagram { header, packet } = self.codec.clone().decode_datagram(raw)?;

        let circuit = match self.circuits.get(&from)? {
            Some(circuit) => circuit,
            None if packet.name() == USE_CIRCUIT_CODE => {
                let code = packet
                    .field(CIRCUIT_CODE_BLOCK, 0, CIRCUIT_CODE_FIELD)
                    .and_then(FieldValue::as_u32)
                    .unwrap_or(0);
                self.circuits.activate(code, from, &self.config.circuit)?
            }
            None => return Err(ProtocolError::UnknownCircuit(from)),
        };

        let receipt = match circuit.receive(&header) {
            Ok(receipt) => receipt,
            Err(e @ ProtocolError::DuplicateSequence { .. }) => {
                // the duplicate was re-queued for ack; don't let it sit until the next tick
                if circuit.pending_ack_count() >= self.config.circuit.max_pending_acks {
                    self.flush_acks_or_warn(&circuit).await;
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let mut acked = receipt.acked;
        if packet.name() == PACKET_ACK {
            let ids = packet
                .blocks(PACKET_ACK_BLOCK)
                .unwrap_or_default()
                .iter()
                .filter_map(|block| block.get(0).and_then(FieldValue::as_u32));
            acked += circuit.acknowledge(ids)?;
        }
        if acked > 0 {
            self.metrics.acks_received(acked as u64);
        }

        if receipt.flush_acks {
            self.flush_acks_or_warn(&circuit).await;
        }

        trace!(
            packet = %packet.name(),
            sequence = header.sequence,
            remote = %from,
            "Accepted packet"
        );
        Ok(InboundItem { circuit, packet })
    }

    fn record_drop(&self, error: &ProtocolError, from: SocketAddr) {
        match error {
            ProtocolError::DuplicateSequence {
                sequence,
                resent: true,
            } => {
                self.metrics.duplicate(true);
                debug!(sequence, remote = %from, "Dropped resent duplicate");
            }
            ProtocolError::DuplicateSequence {
                sequence,
                resent: false,
            } => {
                self.metrics.duplicate(false);
                warn!(sequence, remote = %from, "Dropped unexpected duplicate");
            }
            ProtocolError::UnknownCircuit(_) => {
                self.metrics.unknown_circuit();
                warn!(remote = %from, "Datagram from unknown circuit");
            }
            ProtocolError::UnknownCircuitCode(code) => {
                self.metrics.unknown_circuit();
                warn!(code, remote = %from, "UseCircuitCode with unknown code");
            }
            e if e.is_malformed() => {
                self.metrics.malformed_datagram();
                warn!(remote = %from, error = %e, "Dropped malformed datagram");
            }
            e => error!(remote = %from, error = %e, "Failed to process datagram"),
        }
    }

    /// One maintenance pass. A failing circuit is logged and skipped; the
    /// rest are still served.
    async fn maintain(&self) -> Result<()> {
        for circuit in self.circuits.active()? {
            if let Err(e) = self.maintain_circuit(&circuit).await {
                warn!(
                    code = circuit.code(),
                    remote = %circuit.remote(),
                    error = %e,
                    "Circuit maintenance failed"
                );
            }
        }
        Ok(())
    }

    async fn maintain_circuit(&self, circuit: &Arc<Circuit>) -> Result<()> {
        let circuit_config = &self.config.circuit;
        if circuit.idle_for() > circuit_config.inactivity_timeout {
            if self.circuits.remove(&circuit.remote())?.is_some() {
                info!(
                    code = circuit.code(),
                    remote = %circuit.remote(),
                    "Closing inactive circuit"
                );
            }
            return Ok(());
        }

        if circuit.pending_ack_count() > 0 {
            self.flush_acks(circuit).await?;
        }

        let batch = circuit
            .collect_resends(circuit_config.resend_timeout, circuit_config.max_resend_count)?;
        for sequence in batch.dropped {
            self.metrics.resend_dropped();
            warn!(
                sequence,
                remote = %circuit.remote(),
                "Dropping packet after exhausting resends"
            );
        }
        for (sequence, bytes) in batch.resend {
            self.send_raw(circuit.remote(), &bytes).await?;
            self.metrics.resend_sent();
            debug!(sequence, remote = %circuit.remote(), "Resent unacked packet");
        }
        Ok(())
    }
}

#[instrument(skip_all)]
async fn receive_loop(
    inner: Arc<Inner>,
    queue: mpsc::Sender<InboundItem>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (len, from) = tokio::select! {
            _ = shutdown.changed() => break,
            received = inner.socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    // ICMP errors from earlier sends surface here on some platforms
                    debug!(error = %e, "Socket receive error");
                    continue;
                }
            },
        };
        inner.metrics.datagram_received(len as u64);

        let item = match inner.handle_datagram(&buf[..len], from).await {
            Ok(item) => item,
            Err(e) => {
                inner.record_drop(&e, from);
                continue;
            }
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            sent = queue.send(item) => if sent.is_err() {
                break;
            },
        }
    }
    debug!("Receiver stopped");
}

#[instrument(skip(inner, queue, shutdown))]
async fn dispatch_loop(
    inner: Arc<Inner>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<InboundItem>>>,
    shutdown: watch::Receiver<bool>,
    worker: usize,
) {
    let poll_interval = inner.config.transport.poll_interval;
    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = {
            let mut rx = queue.lock().await;
            tokio::time::timeout(poll_interval, rx.recv()).await
        };

        let item = match next {
            Err(_elapsed) => continue,
            Ok(None) => break,
            Ok(Some(item)) => item,
        };

        if item.circuit.is_closed() {
            inner.metrics.dropped_closed();
            debug!(packet = %item.packet.name(), "Skipped packet from closed circuit");
            continue;
        }

        match inner.dispatcher.dispatch(&item.packet, &item.circuit) {
            Ok(_) => inner.metrics.dispatched(),
            Err(e) => error!(packet = %item.packet.name(), error = %e, "Dispatch failed"),
        }
    }
    debug!("Dispatch worker stopped");
}

#[instrument(skip_all)]
async fn maintenance_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(inner.config.circuit.ack_flush_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(e) = inner.maintain().await {
                    error!(error = %e, "Circuit maintenance failed");
                }
            }
        }
    }
    debug!("Maintenance stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::core::header::Header;
    use crate::schema::compiler::compile;
    use crate::schema::Frequency;
    use std::time::Duration;

    const TEMPLATE: &str = r#"
{
    PacketAck Fixed 0xFFFFFFFB NotTrusted Unencoded
    {
        Packets Variable
        {   ID      U32 }
    }
}
{
    UseCircuitCode Low 3 NotTrusted Unencoded
    {
        CircuitCode Single
        {   Code    U32 }
    }
}
{
    AgentUpdate High 4 NotTrusted Unencoded
    {
        AgentData Single
        {   Flags   U32 }
    }
}
"#;

    fn catalogue() -> Arc<Catalogue> {
        Arc::new(compile(TEMPLATE).unwrap())
    }

    fn config() -> NetworkConfig {
        NetworkConfig::default_with_overrides(|c| {
            c.transport.bind_address = "127.0.0.1:0".to_string();
            c.circuit.max_pending_acks = 1;
            c.circuit.ack_flush_interval = Duration::from_secs(30);
        })
    }

    /// An IPv6 peer is unreachable from an IPv4 socket, so every send fails
    fn unreachable() -> SocketAddr {
        "[::1]:9".parse().unwrap()
    }

    fn reliable(sequence: u32) -> Header {
        let mut header = Header::new(Frequency::High, 4, sequence);
        header.reliable = true;
        header
    }

    #[tokio::test]
    async fn test_failed_ack_flush_still_accepts_datagram() {
        let transport = Transport::bind(config(), catalogue()).await.unwrap();
        let inner = &transport.inner;
        inner.circuits.bind(5, unreachable(), &inner.config.circuit).unwrap();

        let packet = transport.packet("AgentUpdate").unwrap();
        let raw = inner
            .codec
            .clone()
            .encode_datagram(Datagram::new(packet, 1, true))
            .unwrap();

        let item = inner.handle_datagram(&raw, unreachable()).await.unwrap();
        assert_eq!(item.packet.name(), "AgentUpdate");
        assert!(transport.metrics().send_failures >= 1);

        transport.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_maintenance_continues_past_failing_circuit() {
        let transport = Transport::bind(config(), catalogue()).await.unwrap();
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let good = transport.connect(peer_addr, 7).await.unwrap();
        let inner = &transport.inner;
        let bad = inner.circuits.bind(8, unreachable(), &inner.config.circuit).unwrap();

        // receive() only queues the acks; maintain() sends them
        good.receive(&reliable(11)).unwrap();
        bad.receive(&reliable(12)).unwrap();

        inner.maintain().await.unwrap();

        let mut codec = MessageCodec::new(catalogue());
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        let acked = loop {
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
                .await
                .expect("peer never received a PacketAck")
                .unwrap();
            let datagram = codec.decode_datagram(&buf[..len]).unwrap();
            if datagram.packet.name() == PACKET_ACK {
                break datagram.packet.field(PACKET_ACK_BLOCK, 0, PACKET_ACK_FIELD).cloned();
            }
        };

        assert_eq!(acked, Some(FieldValue::U32(11)));
        assert!(transport.metrics().send_failures >= 1);
        transport.shutdown().await.unwrap();
    }
}
