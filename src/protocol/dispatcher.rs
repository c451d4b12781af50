use crate::error::{constants, ProtocolError, Result};
use crate::layout::{PacketDescriptor, PacketKey, Record};
use crate::protocol::packets::Packet;
use crate::protocol::phase::Phase;
use crate::protocol::session::Session;
use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Handles one decoded packet.
pub trait PacketHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &mut PacketContext<'_>) -> Result<()>;
}

impl<F> PacketHandler for F
where
    F: Fn(&mut PacketContext<'_>) -> Result<()> + Send + Sync + 'static,
{
    fn handle(&self, ctx: &mut PacketContext<'_>) -> Result<()> {
        self(ctx)
    }
}

/// Per-call context handed to a handler: the packet and its connection.
pub struct PacketContext<'a> {
    pub packet: Record,
    pub descriptor: Arc<PacketDescriptor>,
    pub session: &'a mut Session,
}

impl<'a> PacketContext<'a> {
    pub fn new(packet: Record, descriptor: Arc<PacketDescriptor>, session: &'a mut Session) -> Self {
        Self {
            packet,
            descriptor,
            session,
        }
    }

    /// Convert the packet record into its typed form.
    pub fn take_packet<P: Packet>(&mut self) -> Result<P> {
        Ok(P::from_record(std::mem::take(&mut self.packet))?)
    }

    pub fn send<P: Packet>(&mut self, packet: &P) -> Result<()> {
        self.session.send(packet)
    }

    pub fn phase(&self) -> Phase {
        self.session.phase()
    }

    pub fn set_phase(&mut self, phase: Phase) -> Result<()> {
        self.session.set_phase(phase)
    }

    pub fn close(&mut self) {
        self.session.close();
    }
}

/// Immutable routing table from dispatch key to handler.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<PacketKey, Arc<dyn PacketHandler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.handlers.keys().collect();
        keys.sort();
        f.debug_struct("Dispatcher").field("handlers", &keys).finish()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn handles(&self, key: PacketKey) -> bool {
        self.handlers.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler bound to the context's packet.
    ///
    /// A packet with no handler is logged and dropped. A handler that returns
    /// an error or panics yields `ProtocolError::HandlerFailed`; the caller
    /// closes that connection only.
    pub fn dispatch(&self, ctx: &mut PacketContext<'_>) -> Result<()> {
        let key = ctx.descriptor.key();
        let Some(handler) = self.handlers.get(&key) else {
            warn!(
                session = %ctx.session.id(),
                packet = %ctx.descriptor.name,
                key = %key,
                "{}; packet dropped",
                constants::ERR_NO_HANDLER
            );
            return Ok(());
        };

        trace!(session = %ctx.session.id(), packet = %ctx.descriptor.name, "Dispatching");
        let packet = ctx.descriptor.name.clone();
        let reason = match catch_unwind(AssertUnwindSafe(|| handler.handle(ctx))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        error!(
            session = %ctx.session.id(),
            peer = ?ctx.session.peer(),
            packet = %packet,
            header = key.header,
            sub_header = ?key.sub_header,
            reason = %reason,
            "Packet handler failed"
        );
        Err(ProtocolError::HandlerFailed { packet, reason })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("handler panicked: {msg}")
    } else {
        constants::ERR_HANDLER_PANICKED.to_string()
    }
}

#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<PacketKey, Arc<dyn PacketHandler>>,
}

impl DispatcherBuilder {
    /// Bind a closure over the raw packet record.
    pub fn register<F>(self, key: PacketKey, handler: F) -> Self
    where
        F: Fn(&mut PacketContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register_handler(key, Arc::new(handler))
    }

    /// Bind a typed handler for `P`.
    pub fn on<P, F>(self, handler: F) -> Self
    where
        P: Packet + 'static,
        F: Fn(P, &mut PacketContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.register(P::key(), move |ctx: &mut PacketContext<'_>| {
            let packet = ctx.take_packet::<P>()?;
            handler(packet, ctx)
        })
    }

    /// Bind a handler object. A second binding for the same key is logged
    /// and ignored.
    pub fn register_handler(mut self, key: PacketKey, handler: Arc<dyn PacketHandler>) -> Self {
        match self.handlers.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(handler);
            }
            Entry::Occupied(_) => {
                warn!(key = %key, "Duplicate handler binding; first binding wins");
            }
        }
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}
