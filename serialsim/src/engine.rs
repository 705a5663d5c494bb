//! The buffered byte-stream engine.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::byte_queue::ByteQueue;
use crate::config::EngineConfig;
use crate::dispatcher::{Dispatcher, Handler};
use crate::error::{Channel, Error, HandlerResult, Result};
use crate::policy::BufferPolicy;
use crate::producer::{Producer, SharedSource};
use crate::source::{DataSource, RandomDigits};

/// A simulated serial port.
///
/// Bytes flow producer → raw intake queue → (transfer step) → consumer
/// buffer → read API. The intake queue and the consumer buffer each sit
/// behind their own lock, so the producer and readers only meet during the
/// transfer step, which [`poll`](Self::poll) runs once per host tick.
///
/// `Engine` is a handle: clones share the same port. Dropping the last
/// handle stops the producer.
///
/// Registered handlers are owned by the engine. A handler that captures an
/// `Engine` clone keeps the port (and its producer) alive until
/// [`shutdown`](Self::shutdown) unregisters it. Use the `&Engine` argument
/// the handler receives, or capture a [`WeakEngine`], to avoid that.
///
/// # Reads never block
///
/// Every read reports "nothing" (`None` or `0`) on an empty buffer instead
/// of waiting for data.
///
/// # Example
///
/// ```
/// use giztoy_serialsim::{BufferPolicy, Engine, EngineConfig};
///
/// let port = Engine::new(EngineConfig::default().policy(BufferPolicy::until(b'\n')));
/// port.feed(b"12\n34");
/// port.poll();
///
/// assert_eq!(port.read_until(b'\n'), Some(b"12\n".to_vec()));
/// assert_eq!(port.read_until(b'\n'), None);
/// assert_eq!(port.available(), 2);
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

/// A non-owning handle to an [`Engine`], from [`Engine::downgrade`].
///
/// It does not keep the port alive, so handlers can hold one without
/// forming a cycle through the engine that owns them.
#[derive(Clone)]
pub struct WeakEngine {
    inner: Weak<EngineInner>,
}

impl WeakEngine {
    /// Returns the engine if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<Engine> {
        self.inner.upgrade().map(|inner| Engine { inner })
    }
}

impl fmt::Debug for WeakEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEngine")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

struct EngineInner {
    port_name: String,
    interval: Duration,
    intake: Arc<Mutex<ByteQueue>>,
    buffer: Mutex<BufferState>,
    dispatcher: Dispatcher,
    source: SharedSource,
    producer: Mutex<Option<Producer>>,
}

struct BufferState {
    queue: ByteQueue,
    policy: BufferPolicy,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("port_name", &self.inner.port_name)
            .field("interval", &self.inner.interval)
            .field("policy", &self.policy())
            .field("available", &self.available())
            .field("active", &self.active())
            .finish()
    }
}

impl Engine {
    /// Creates an engine without starting the producer.
    ///
    /// The default data source is [`RandomDigits`]. Call
    /// [`start`](Self::start) to begin producing, or [`feed`](Self::feed)
    /// bytes directly.
    pub fn new(config: EngineConfig) -> Self {
        let interval = config.interval();
        let source: Box<dyn DataSource> = Box::new(RandomDigits);

        Engine {
            inner: Arc::new(EngineInner {
                port_name: config.port_name,
                interval,
                intake: Arc::new(Mutex::new(ByteQueue::new())),
                buffer: Mutex::new(BufferState {
                    queue: ByteQueue::new(),
                    policy: config.policy,
                }),
                dispatcher: Dispatcher::new(),
                source: Arc::new(Mutex::new(source)),
                producer: Mutex::new(None),
            }),
        }
    }

    /// Creates an engine with the given data source and starts producing.
    pub fn spawn(config: EngineConfig, source: impl DataSource + 'static) -> Result<Self> {
        let engine = Self::new(config);
        engine.set_data_source(source);
        engine.start()?;
        Ok(engine)
    }

    /// Returns a handle that does not keep the engine alive.
    pub fn downgrade(&self) -> WeakEngine {
        WeakEngine {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Starts the producer thread.
    ///
    /// Fails with [`Error::AlreadyRunning`] if it is already running.
    pub fn start(&self) -> Result<()> {
        let mut producer = self.inner.producer.lock();
        if producer.as_ref().is_some_and(Producer::is_running) {
            return Err(Error::AlreadyRunning);
        }
        *producer = Some(Producer::spawn(
            self.inner.port_name.clone(),
            self.inner.interval,
            self.inner.source.clone(),
            self.inner.intake.clone(),
        )?);
        Ok(())
    }

    /// Stops the producer, unregisters both handlers and releases both
    /// queues.
    ///
    /// When this returns the producer thread has exited; nothing is appended
    /// afterwards unless [`start`](Self::start) or [`feed`](Self::feed) is
    /// called again. Disabled channels stay disabled.
    pub fn shutdown(&self) {
        let producer = self.inner.producer.lock().take();
        if let Some(mut producer) = producer {
            producer.stop();
        }
        let handlers = self.inner.dispatcher.clear_handlers();
        self.inner.intake.lock().release();
        self.inner.buffer.lock().queue.release();
        self.inner.dispatcher.clear_pending();
        debug!(port = %self.inner.port_name, "engine shut down");
        drop(handlers);
    }

    /// Returns true while the producer thread is running.
    pub fn active(&self) -> bool {
        self.inner
            .producer
            .lock()
            .as_ref()
            .is_some_and(Producer::is_running)
    }

    /// Returns the port name.
    pub fn port_name(&self) -> &str {
        &self.inner.port_name
    }

    /// Returns the producer interval.
    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Replaces the data source; a running producer uses it from its next
    /// firing on.
    pub fn set_data_source(&self, source: impl DataSource + 'static) {
        *self.inner.source.lock() = Box::new(source);
    }

    /// Appends bytes to the raw intake queue, as one producer firing would.
    pub fn feed(&self, bytes: &[u8]) {
        self.inner.intake.lock().append_slice(bytes);
    }

    /// Returns the number of bytes waiting in the raw intake queue.
    pub fn pending_intake(&self) -> usize {
        self.inner.intake.lock().len()
    }

    // ------------------------------------------------------------------
    // Policy and handlers
    // ------------------------------------------------------------------

    /// Returns the active buffering policy.
    pub fn policy(&self) -> BufferPolicy {
        self.inner.buffer.lock().policy
    }

    /// Sets the policy to "ready at `size` buffered bytes".
    pub fn buffer(&self, size: usize) {
        self.set_policy(BufferPolicy::size(size));
    }

    /// Sets the policy to "ready when `byte` is appended".
    pub fn buffer_until(&self, byte: u8) {
        self.set_policy(BufferPolicy::until(byte));
    }

    /// Replaces the buffering policy. Bytes already buffered are not
    /// re-evaluated.
    pub fn set_policy(&self, policy: BufferPolicy) {
        self.inner.buffer.lock().policy = policy;
        debug!(port = %self.inner.port_name, ?policy, "buffer policy changed");
    }

    /// Registers the on-ready handler.
    ///
    /// While it is registered the transfer step moves one byte at a time so
    /// every delimiter is seen. It runs on whichever thread calls
    /// [`poll`](Self::poll) or [`transfer`](Self::transfer), with no engine
    /// lock held.
    pub fn on_ready<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Engine) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(f);
        self.inner.dispatcher.set_handler(Channel::Ready, Some(handler))
    }

    /// Registers the on-poll-available handler, fired from [`poll`](Self::poll)
    /// when a ready event happened since the previous poll.
    pub fn on_available<F>(&self, f: F) -> Result<()>
    where
        F: Fn(&Engine) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(f);
        self.inner
            .dispatcher
            .set_handler(Channel::Available, Some(handler))
    }

    /// Unregisters the handler on `channel`.
    pub fn remove_handler(&self, channel: Channel) -> Result<()> {
        self.inner.dispatcher.set_handler(channel, None)
    }

    /// Returns true if `channel` was disabled by a handler failure.
    pub fn is_disabled(&self, channel: Channel) -> bool {
        self.inner.dispatcher.is_disabled(channel)
    }

    // ------------------------------------------------------------------
    // Host tick
    // ------------------------------------------------------------------

    /// Host tick entry point.
    ///
    /// First fires on-poll-available if a ready event is pending from an
    /// earlier transfer, then runs the transfer step. Returns the number of
    /// bytes transferred. Handler failures are logged and disable their
    /// channel; they never surface here.
    pub fn poll(&self) -> usize {
        let _ = self.inner.dispatcher.poll_tick(self);
        self.transfer()
    }

    /// Moves everything in the raw intake queue into the consumer buffer.
    ///
    /// Moves one byte per step while an on-ready handler is armed, otherwise
    /// the whole queued chunk at once. After each step the policy is
    /// evaluated and, if satisfied, the ready event is dispatched outside
    /// both locks. Each step pops and pushes under both locks (intake first),
    /// so concurrent transfers never reorder, lose or duplicate bytes.
    pub fn transfer(&self) -> usize {
        let mut moved = 0;

        loop {
            let per_byte = self.inner.dispatcher.is_armed(Channel::Ready);
            let ready = {
                let mut intake = self.inner.intake.lock();
                if intake.is_empty() {
                    break;
                }
                let mut buf = self.inner.buffer.lock();

                if per_byte {
                    if let Some(b) = intake.pop_front() {
                        buf.queue.append(b);
                        moved += 1;
                    }
                } else {
                    let chunk = intake.take_all();
                    buf.queue.append_slice(&chunk);
                    moved += chunk.len();
                }
                buf.policy.is_ready(buf.queue.len(), buf.queue.peek_back())
            };

            if ready {
                let _ = self.inner.dispatcher.ready(self);
            }
        }

        moved
    }

    // ------------------------------------------------------------------
    // Consumer API
    // ------------------------------------------------------------------

    /// Returns the number of bytes in the consumer buffer.
    pub fn available(&self) -> usize {
        self.inner.buffer.lock().queue.len()
    }

    /// Pops the oldest byte.
    pub fn read(&self) -> Option<u8> {
        self.inner.buffer.lock().queue.pop_front()
    }

    /// Pops the oldest byte as a Latin-1 character.
    pub fn read_char(&self) -> Option<char> {
        self.read().map(char::from)
    }

    /// Returns the newest byte and discards the whole buffer.
    pub fn last(&self) -> Option<u8> {
        let mut buf = self.inner.buffer.lock();
        let last = buf.queue.peek_back()?;
        buf.queue.clear();
        Some(last)
    }

    /// Like [`last`](Self::last), as a Latin-1 character.
    pub fn last_char(&self) -> Option<char> {
        self.last().map(char::from)
    }

    /// Drains the whole buffer. `None` if it is empty.
    pub fn read_bytes(&self) -> Option<Vec<u8>> {
        let mut buf = self.inner.buffer.lock();
        if buf.queue.is_empty() {
            return None;
        }
        Some(buf.queue.take_all())
    }

    /// Drains up to `max` bytes from the front. `None` if the buffer is
    /// empty.
    pub fn read_bytes_max(&self, max: usize) -> Option<Vec<u8>> {
        let mut buf = self.inner.buffer.lock();
        if buf.queue.is_empty() {
            return None;
        }
        let n = max.min(buf.queue.len());
        buf.queue.take_front(n).ok()
    }

    /// Drains up to `dest.len()` bytes into `dest` and returns the count.
    pub fn read_bytes_into(&self, dest: &mut [u8]) -> usize {
        self.inner.buffer.lock().queue.drain_into(dest)
    }

    /// Drains everything up to and including the first `delim`.
    ///
    /// Returns `None` both when the buffer is empty and when it holds no
    /// `delim`; in either case nothing is removed.
    pub fn read_until(&self, delim: u8) -> Option<Vec<u8>> {
        let mut buf = self.inner.buffer.lock();
        let idx = buf.queue.find(delim)?;
        buf.queue.take_front(idx + 1).ok()
    }

    /// Drains everything up to and including the first `delim` into `dest`.
    ///
    /// Returns `Ok(0)` if the buffer is empty or holds no `delim`. If the
    /// matched span does not fit, returns [`Error::Overflow`] and leaves the
    /// buffer untouched.
    pub fn read_until_into(&self, delim: u8, dest: &mut [u8]) -> Result<usize> {
        let mut buf = self.inner.buffer.lock();
        let Some(idx) = buf.queue.find(delim) else {
            return Ok(0);
        };

        let n = idx + 1;
        if n > dest.len() {
            warn!(
                port = %self.inner.port_name,
                "destination of {} bytes too small for {} bytes up to and including {:#04x}",
                dest.len(),
                n,
                delim
            );
            return Err(Error::Overflow {
                needed: n,
                capacity: dest.len(),
            });
        }

        buf.queue.take_front_into(&mut dest[..n])?;
        Ok(n)
    }

    /// Drains the whole buffer as a string, replacing invalid UTF-8.
    pub fn read_string(&self) -> Option<String> {
        self.read_bytes()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Drains through the first `delim` as a string, replacing invalid
    /// UTF-8.
    pub fn read_string_until(&self, delim: u8) -> Option<String> {
        self.read_until(delim)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Returns a copy of the consumer buffer without draining it.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.buffer.lock().queue.to_vec()
    }

    /// Empties the consumer buffer.
    pub fn clear(&self) {
        self.inner.buffer.lock().queue.clear();
    }

    /// Empties both queues and drops any pending ready event, so nothing is
    /// reported until new bytes arrive. The producer keeps running.
    pub fn stop(&self) {
        self.inner.intake.lock().clear();
        self.inner.buffer.lock().queue.clear();
        self.inner.dispatcher.clear_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(policy: BufferPolicy) -> Engine {
        Engine::new(EngineConfig::default().policy(policy))
    }

    #[test]
    fn test_transfer_bulk() {
        let e = engine(BufferPolicy::default());
        e.feed(b"hello");
        assert_eq!(e.pending_intake(), 5);
        assert_eq!(e.available(), 0);

        assert_eq!(e.transfer(), 5);
        assert_eq!(e.pending_intake(), 0);
        assert_eq!(e.available(), 5);
        assert_eq!(e.transfer(), 0);
    }

    #[test]
    fn test_read_and_read_char() {
        let e = engine(BufferPolicy::default());
        assert_eq!(e.read(), None);
        e.feed(&[0x41, 0xE9]);
        e.transfer();
        assert_eq!(e.read_char(), Some('A'));
        assert_eq!(e.read_char(), Some('é'));
        assert_eq!(e.read_char(), None);
    }

    #[test]
    fn test_last_discards_everything() {
        let e = engine(BufferPolicy::default());
        assert_eq!(e.last(), None);
        e.feed(b"abc");
        e.transfer();
        assert_eq!(e.last(), Some(b'c'));
        assert_eq!(e.available(), 0);

        e.feed(b"xy");
        e.transfer();
        assert_eq!(e.last_char(), Some('y'));
        assert_eq!(e.available(), 0);
    }

    #[test]
    fn test_read_bytes_family() {
        let e = engine(BufferPolicy::default());
        assert_eq!(e.read_bytes(), None);
        assert_eq!(e.read_bytes_max(4), None);
        assert_eq!(e.read_bytes_into(&mut [0u8; 4]), 0);

        e.feed(b"abcdef");
        e.transfer();
        assert_eq!(e.read_bytes_max(2), Some(b"ab".to_vec()));

        let mut dest = [0u8; 3];
        assert_eq!(e.read_bytes_into(&mut dest), 3);
        assert_eq!(&dest, b"cde");

        let mut dest = [0u8; 8];
        assert_eq!(e.read_bytes_into(&mut dest), 1);
        assert_eq!(dest[0], b'f');

        e.feed(b"xyz");
        e.transfer();
        assert_eq!(e.read_bytes_max(10), Some(b"xyz".to_vec()));

        e.feed(b"012");
        e.transfer();
        assert_eq!(e.read_bytes(), Some(b"012".to_vec()));
        assert_eq!(e.available(), 0);
    }

    #[test]
    fn test_read_until_into() {
        let e = engine(BufferPolicy::default());
        let mut dest = [0u8; 8];
        assert_eq!(e.read_until_into(b'\n', &mut dest).unwrap(), 0);

        e.feed(b"ab");
        e.transfer();
        assert_eq!(e.read_until_into(b'\n', &mut dest).unwrap(), 0);
        assert_eq!(e.available(), 2);

        e.feed(b"\ncd");
        e.transfer();
        assert_eq!(e.read_until_into(b'\n', &mut dest).unwrap(), 3);
        assert_eq!(&dest[..3], b"ab\n");
        assert_eq!(e.snapshot(), b"cd".to_vec());
    }

    #[test]
    fn test_strings() {
        let e = engine(BufferPolicy::default());
        assert_eq!(e.read_string(), None);
        e.feed(b" 1.25\n 0.50\n");
        e.transfer();
        assert_eq!(e.read_string_until(b'\n').as_deref(), Some(" 1.25\n"));
        assert_eq!(e.read_string().as_deref(), Some(" 0.50\n"));
    }

    #[test]
    fn test_policy_setters_are_exclusive() {
        let e = engine(BufferPolicy::default());
        e.buffer_until(b';');
        assert_eq!(e.policy(), BufferPolicy::until(b';'));
        e.buffer(8);
        assert_eq!(e.policy(), BufferPolicy::size(8));
    }

    #[test]
    fn test_start_twice_fails() {
        let e = Engine::new(EngineConfig::with_rate(1.0));
        e.start().unwrap();
        assert!(e.active());
        assert!(matches!(e.start(), Err(Error::AlreadyRunning)));
        e.shutdown();
        assert!(!e.active());
    }

    #[test]
    fn test_downgrade() {
        let e = engine(BufferPolicy::default());
        let weak = e.downgrade();
        assert!(weak.upgrade().is_some_and(|port| port.port_name() == "SimulationPort"));
        assert!(format!("{:?}", weak).contains("alive: true"));

        drop(e);
        assert!(weak.upgrade().is_none());
        assert!(format!("{:?}", weak).contains("alive: false"));
    }

    #[test]
    fn test_shutdown_unregisters_handlers() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let e = engine(BufferPolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let (ready, available) = (calls.clone(), calls.clone());
        e.on_ready(move |_| {
            ready.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        e.on_available(move |_| {
            available.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        e.shutdown();
        assert_eq!(Arc::strong_count(&calls), 1);

        e.feed(b"abc");
        e.poll();
        e.poll();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(e.available(), 3);

        // Unregistered, not disabled.
        e.on_ready(|_| Ok(())).unwrap();
    }

    #[test]
    fn test_debug_format() {
        let e = engine(BufferPolicy::default());
        let s = format!("{:?}", e);
        assert!(s.contains("SimulationPort"));
    }
}
