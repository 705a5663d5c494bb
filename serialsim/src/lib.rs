//! Simulated serial port for application testing.
//!
//! A background producer "receives" bytes at a configurable rate; the host
//! drains them through a thread-safe buffer using fixed-size chunks,
//! delimiter-terminated records, or single bytes, and gets notified through
//! registered handlers when a framing condition is met.
//!
//! - [`Engine`]: the port itself; owns both queues and the read API
//! - [`ByteQueue`]: the byte FIFO behind the raw intake queue and the
//!   consumer buffer
//! - [`BufferPolicy`]: when the consumer buffer counts as ready
//! - [`DataSource`]: what the producer generates ([`RandomDigits`] by default)
//! - [`EngineConfig`]: rate, initial policy and port name, loadable from YAML
//!
//! # Data flow
//!
//! ```text
//! producer thread ──append──▶ intake queue ──poll()/transfer──▶ buffer ──▶ read*()
//!                                                  │
//!                                                  └─▶ on-ready / on-poll-available
//! ```
//!
//! The host calls [`Engine::poll`] once per iteration of its own loop. Without
//! those calls bytes stay in the intake queue and no handler fires.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use giztoy_serialsim::{BufferPolicy, Engine, EngineConfig};
//!
//! let port = Engine::new(EngineConfig::default().policy(BufferPolicy::until(b'\n')));
//!
//! let records = Arc::new(AtomicUsize::new(0));
//! let seen = records.clone();
//! port.on_ready(move |port| {
//!     if port.read_string_until(b'\n').is_some() {
//!         seen.fetch_add(1, Ordering::SeqCst);
//!     }
//!     Ok(())
//! })
//! .unwrap();
//!
//! port.feed(b" 0.42\n 1.07\n");
//! port.poll();
//! assert_eq!(records.load(Ordering::SeqCst), 2);
//! ```
//!
//! # Handler failures
//!
//! A handler that returns an error or panics is logged and its channel is
//! disabled for the life of the engine. The engine and the other channel
//! keep working.
//!
//! # Lifetime
//!
//! Dropping the last [`Engine`] handle stops the producer. The engine owns
//! its handlers, so a handler that captures an `Engine` clone keeps the port
//! running until [`Engine::shutdown`]; capture a [`WeakEngine`] instead.

mod byte_queue;
mod config;
mod dispatcher;
mod engine;
mod error;
mod policy;
mod producer;
mod source;

pub use byte_queue::ByteQueue;
pub use config::{DEFAULT_INTERVAL, DEFAULT_PORT_NAME, EngineConfig, MIN_TICK, interval_for_rate};
pub use dispatcher::Handler;
pub use engine::{Engine, WeakEngine};
pub use error::{Channel, Error, HandlerResult, Result};
pub use policy::BufferPolicy;
pub use source::{DataSource, RandomDigits, Replay};


#[cfg(test)]
mod send_sync_tests {
    use super::*;

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
        assert_send_sync::<WeakEngine>();
        assert_send_sync::<ByteQueue>();
    }

    #[test]
    fn test_engine_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<Engine>();
    }
}
