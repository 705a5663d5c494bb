//! Event dispatch to the host's handlers.
//!
//! Two channels exist: [`Channel::Ready`] fires from the transfer step for
//! every satisfied policy evaluation, and [`Channel::Available`] fires from
//! the host tick when a ready event happened since the previous tick. A
//! handler that fails disables its own channel for the rest of the engine's
//! life; the other channel keeps working.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::warn;

use crate::engine::Engine;
use crate::error::{Channel, Error, HandlerResult, Result};

/// Callback type for engine events.
pub type Handler = Arc<dyn Fn(&Engine) -> HandlerResult + Send + Sync>;

struct Slot {
    channel: Channel,
    handler: RwLock<Option<Handler>>,
    disabled: AtomicBool,
}

impl Slot {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            handler: RwLock::new(None),
            disabled: AtomicBool::new(false),
        }
    }

    fn set(&self, handler: Option<Handler>) -> Result<()> {
        if self.disabled.load(Ordering::Acquire) {
            return Err(Error::ChannelDisabled(self.channel));
        }
        *self.handler.write() = handler;
        Ok(())
    }

    fn clear(&self) -> Option<Handler> {
        self.handler.write().take()
    }

    fn is_armed(&self) -> bool {
        !self.disabled.load(Ordering::Acquire) && self.handler.read().is_some()
    }

    fn invoke(&self, engine: &Engine) -> Result<()> {
        // Clone out so no lock is held while user code runs.
        let handler = match self.handler.read().clone() {
            Some(h) => h,
            None => return Ok(()),
        };

        let reason = match panic::catch_unwind(AssertUnwindSafe(|| handler(engine))) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };

        self.disabled.store(true, Ordering::Release);
        *self.handler.write() = None;
        warn!(
            port = engine.port_name(),
            channel = %self.channel,
            "handler failed, disabling channel: {}",
            reason
        );
        Err(Error::HandlerFailure {
            channel: self.channel,
            reason,
        })
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Holds the two handler slots and the pending-ready flag.
pub(crate) struct Dispatcher {
    ready: Slot,
    available: Slot,
    pending: AtomicBool,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            ready: Slot::new(Channel::Ready),
            available: Slot::new(Channel::Available),
            pending: AtomicBool::new(false),
        }
    }

    fn slot(&self, channel: Channel) -> &Slot {
        match channel {
            Channel::Ready => &self.ready,
            Channel::Available => &self.available,
        }
    }

    pub(crate) fn set_handler(&self, channel: Channel, handler: Option<Handler>) -> Result<()> {
        self.slot(channel).set(handler)
    }

    /// True if a live handler is registered on the channel.
    pub(crate) fn is_armed(&self, channel: Channel) -> bool {
        self.slot(channel).is_armed()
    }

    /// Unregisters both handlers, disabled or not.
    ///
    /// The handlers are returned so the caller can drop them outside any
    /// engine lock; a handler may own the last strong engine handle.
    pub(crate) fn clear_handlers(&self) -> [Option<Handler>; 2] {
        [self.ready.clear(), self.available.clear()]
    }

    pub(crate) fn is_disabled(&self, channel: Channel) -> bool {
        self.slot(channel).disabled.load(Ordering::Acquire)
    }

    /// Records a ready event, then fires the on-ready handler.
    ///
    /// The flag is set before the handler runs, so a concurrent poll tick
    /// that observes the handler's effects also observes the flag.
    pub(crate) fn ready(&self, engine: &Engine) -> Result<()> {
        self.pending.store(true, Ordering::Release);
        self.ready.invoke(engine)
    }

    /// Fires the on-poll-available handler if a ready event is pending.
    ///
    /// The flag is cleared before the handler runs; ready events raised by
    /// the handler itself are reported on the next tick.
    pub(crate) fn poll_tick(&self, engine: &Engine) -> Result<bool> {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        self.available.invoke(engine)?;
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.store(false, Ordering::Release);
    }
}
