//! # Thread Isolate
//!
//! A [`Channel`] whose far end is a dedicated OS thread running a
//! [`BootstrapPayload`]. The thread owns its own wasmtime store and shares no
//! state with the caller: requests go in over one queue, responses and faults
//! come back over another.
//!
//! Disposal closes the request queue, which ends the thread's serve loop, and
//! bumps the engine epoch, which traps a call that is still running.

use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;

use tokio::sync::Notify;
use tokio::sync::mpsc;
use wasmtime::Engine;

use crate::bootstrap;
use crate::bootstrap::BootstrapPayload;
use crate::bootstrap::Port;
use crate::channel;
use crate::channel::Channel;
use crate::channel::ChannelEvent;

/// A channel to a payload running on its own thread.
pub struct ThreadChannel {
    requests: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent>>,
    closed: Notify,
    disposed: AtomicBool,
    engine: Engine,
}

impl ThreadChannel {
    /// Starts a thread named `name` serving `payload`.
    pub fn spawn(name: &str, payload: BootstrapPayload) -> channel::Result<Self> {
        let engine = bootstrap::engine(true).map_err(|e| channel::Error::Spawn(format!("{:#}", e)))?;
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let isolate_engine = engine.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut port = ThreadPort {
                    requests: request_rx,
                    events: event_tx.clone(),
                };
                let served = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    payload.serve(&isolate_engine, &mut port)
                }));
                if let Err(panic) = served {
                    let descriptor = bootstrap::describe_panic(panic.as_ref());
                    let _ = event_tx.send(ChannelEvent::Fault(format!("isolate crashed: {}", descriptor.message)));
                }
            })
            .map_err(|e| channel::Error::Spawn(e.to_string()))?;

        Ok(Self {
            requests: Mutex::new(Some(request_tx)),
            events: tokio::sync::Mutex::new(event_rx),
            closed: Notify::new(),
            disposed: AtomicBool::new(false),
            engine,
        })
    }
}

#[async_trait::async_trait]
impl Channel for ThreadChannel {
    fn send(&self, payload: &[u8]) -> channel::Result<()> {
        let requests = self
            .requests
            .lock()
            .map_err(|_| channel::Error::ConnectionLost("request queue poisoned".into()))?;
        let Some(requests) = requests.as_ref() else {
            return Err(channel::Error::Disposed);
        };
        requests
            .send(payload.to_vec())
            .map_err(|_| channel::Error::ConnectionLost("isolate thread has exited".into()))
    }

    async fn recv(&self) -> Option<ChannelEvent> {
        if self.disposed.load(Ordering::SeqCst) {
            return None;
        }
        let mut events = self.events.lock().await;
        tokio::select! {
            event = events.recv() => event,
            _ = self.closed.notified() => None,
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut requests) = self.requests.lock() {
            requests.take();
        }
        self.engine.increment_epoch();
        self.closed.notify_one();
    }
}

/// The isolate thread's end of the channel.
struct ThreadPort {
    requests: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl Port for ThreadPort {
    fn recv(&mut self) -> Option<Vec<u8>> {
        self.requests.blocking_recv()
    }

    fn post(&mut self, message: Vec<u8>) {
        // nobody is listening once the channel is disposed
        let _ = self.events.send(ChannelEvent::Message(message));
    }
}

impl Drop for ThreadChannel {
    fn drop(&mut self) {
        self.dispose();
    }
}
