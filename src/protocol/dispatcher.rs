use crate::core::packet::Packet;
use crate::error::constants::{ERR_DISPATCHER_READ_LOCK, ERR_DISPATCHER_WRITE_LOCK};
use crate::error::{ProtocolError, Result};
use crate::protocol::circuit::Circuit;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{trace, warn};

type HandlerFn = dyn Fn(&Packet, &Arc<Circuit>) -> Result<()> + Send + Sync + 'static;

/// Packet dispatcher routing decoded packets to handlers by packet name.
/// Any number of handlers may be registered per name; they run in
/// registration order.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<Cow<'static, str>, Vec<Arc<HandlerFn>>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, packet: &str, handler: F) -> Result<()>
    where
        F: Fn(&Packet, &Arc<Circuit>) -> Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        handlers
            .entry(Cow::Owned(packet.to_string()))
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }

    /// Invoke every handler registered for the packet's name. A failing
    /// handler is logged and does not stop the others.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, packet: &Packet, circuit: &Arc<Circuit>) -> Result<usize> {
        // Clone out of the lock so handlers may register further handlers
        let targets: Vec<Arc<HandlerFn>> = {
            let handlers = self
                .handlers
                .read()
                .map_err(|_| ProtocolError::Custom(ERR_DISPATCHER_READ_LOCK.to_string()))?;
            match handlers.get(packet.name()) {
                Some(list) => list.clone(),
                None => {
                    trace!(packet = %packet.name(), "No handler registered");
                    return Ok(0);
                }
            }
        };

        for handler in &targets {
            if let Err(e) = handler(packet, circuit) {
                warn!(
                    packet = %packet.name(),
                    remote = %circuit.remote(),
                    error = %e,
                    "Packet handler failed"
                );
            }
        }
        Ok(targets.len())
    }

    pub fn handler_count(&self, packet: &str) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(packet).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}
