//! Background producer feeding the raw intake queue.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::byte_queue::ByteQueue;
use crate::error::{Error, Result};
use crate::source::DataSource;

/// Shared, swappable data source.
pub(crate) type SharedSource = Arc<Mutex<Box<dyn DataSource>>>;

struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the producer thread.
///
/// The thread fires once immediately, then every `interval`. Each firing
/// calls the data source once and appends its output to the intake queue
/// under the intake lock only. Dropping the handle stops the thread and
/// waits for it, so no append can happen after `stop` returns.
pub(crate) struct Producer {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Producer {
    pub(crate) fn spawn(
        port_name: String,
        interval: Duration,
        source: SharedSource,
        intake: Arc<Mutex<ByteQueue>>,
    ) -> Result<Self> {
        let signal = Arc::new(StopSignal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name(format!("serialsim-{}", port_name))
            .spawn(move || run(port_name, interval, source, intake, thread_signal))
            .map_err(Error::Spawn)?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Returns true while the thread is alive.
    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the thread to stop and joins it.
    pub(crate) fn stop(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
            self.signal.wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            // A panicking data source already ended the thread.
            let _ = handle.join();
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    port_name: String,
    interval: Duration,
    source: SharedSource,
    intake: Arc<Mutex<ByteQueue>>,
    signal: Arc<StopSignal>,
) {
    debug!(port = %port_name, ?interval, "producer started");
    let mut next = Instant::now();

    loop {
        {
            let mut stopped = signal.stopped.lock();
            while !*stopped && Instant::now() < next {
                signal.wake.wait_until(&mut stopped, next);
            }
            if *stopped {
                break;
            }
        }

        let data = source.lock().generate();
        let queued = {
            let mut q = intake.lock();
            q.append_slice(&data);
            q.len()
        };
        trace!(port = %port_name, generated = data.len(), queued, "producer tick");

        next += interval;
        let now = Instant::now();
        if next < now {
            // Fell behind (slow source); skip missed firings instead of bursting.
            next = now + interval;
        }
    }

    debug!(port = %port_name, "producer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Replay;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn shared(src: impl DataSource + 'static) -> SharedSource {
        let boxed: Box<dyn DataSource> = Box::new(src);
        Arc::new(Mutex::new(boxed))
    }

    fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_fires_immediately() {
        let intake = Arc::new(Mutex::new(ByteQueue::new()));
        let mut p = Producer::spawn(
            "test".to_string(),
            Duration::from_secs(60),
            shared(Replay::new(["hi"])),
            intake.clone(),
        )
        .unwrap();

        assert!(wait_for(Duration::from_secs(2), || intake.lock().len() == 2));
        assert!(p.is_running());
        p.stop();
        assert!(!p.is_running());
        assert_eq!(intake.lock().to_vec(), b"hi".to_vec());
    }

    #[test]
    fn test_periodic_firing() {
        let intake = Arc::new(Mutex::new(ByteQueue::new()));
        let mut p = Producer::spawn(
            "test".to_string(),
            Duration::from_millis(10),
            shared(|| vec![0xAAu8]),
            intake.clone(),
        )
        .unwrap();

        assert!(wait_for(Duration::from_secs(5), || intake.lock().len() >= 3));
        p.stop();
    }

    #[test]
    fn test_no_appends_after_stop() {
        let fired = Arc::new(AtomicUsize::new(0));
        let intake = Arc::new(Mutex::new(ByteQueue::new()));
        let counter = fired.clone();
        let mut p = Producer::spawn(
            "test".to_string(),
            Duration::from_millis(10),
            shared(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                vec![1u8, 2]
            }),
            intake.clone(),
        )
        .unwrap();

        assert!(wait_for(Duration::from_secs(5), || fired.load(Ordering::SeqCst) >= 2));
        p.stop();

        let len = intake.lock().len();
        assert_eq!(len, fired.load(Ordering::SeqCst) * 2);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(intake.lock().len(), len);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let intake = Arc::new(Mutex::new(ByteQueue::new()));
        let mut p = Producer::spawn(
            "test".to_string(),
            Duration::from_secs(60),
            shared(Replay::default()),
            intake,
        )
        .unwrap();
        p.stop();
        p.stop();
    }
}
