//! Mock channels for testing.
//!
//! These are used internally by the test suite and are not part of the public API.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;
use tokio::sync::mpsc;

use isowire::Request;
use isowire::Response;

use crate::channel;
use crate::channel::Channel;
use crate::channel::ChannelEvent;

struct State {
    sent: Mutex<Vec<Vec<u8>>>,
    disposals: AtomicUsize,
    disposed: AtomicBool,
    fail_sends: AtomicBool,
    closed: Notify,
}

/// A channel whose far side is driven by hand through a [`Script`].
pub struct ScriptedChannel {
    state: Arc<State>,
    events: tokio::sync::Mutex<mpsc::UnboundedReceiver<ChannelEvent>>,
}

/// The test's end of a [`ScriptedChannel`]: plays the isolate.
#[derive(Clone)]
pub struct Script {
    state: Arc<State>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl ScriptedChannel {
    pub fn pair() -> (Self, Script) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(State {
            sent: Mutex::new(Vec::new()),
            disposals: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            closed: Notify::new(),
        });

        let channel = Self {
            state: state.clone(),
            events: tokio::sync::Mutex::new(rx),
        };
        (channel, Script { state, events: tx })
    }
}

#[async_trait::async_trait]
impl Channel for ScriptedChannel {
    fn send(&self, payload: &[u8]) -> channel::Result<()> {
        if self.state.disposed.load(Ordering::SeqCst) {
            return Err(channel::Error::Disposed);
        }
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(channel::Error::ConnectionLost("scripted send failure".into()));
        }
        self.state.sent.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn recv(&self) -> Option<ChannelEvent> {
        let mut rx = self.events.lock().await;
        tokio::select! {
            biased;
            event = rx.recv() => event,
            _ = self.state.closed.notified() => None,
        }
    }

    fn dispose(&self) {
        self.state.disposals.fetch_add(1, Ordering::SeqCst);
        self.state.disposed.store(true, Ordering::SeqCst);
        self.state.closed.notify_one();
    }
}

impl Script {
    /// Requests the dispatcher has posted so far.
    pub fn sent(&self) -> Vec<Request> {
        self.state
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|bytes| isowire::decode_request(bytes).unwrap())
            .collect()
    }

    pub fn deliver(&self, response: Response) {
        let bytes = isowire::encode_response(&response).unwrap();
        self.deliver_raw(bytes);
    }

    pub fn deliver_raw(&self, bytes: impl Into<Vec<u8>>) {
        let _ = self.events.send(ChannelEvent::Message(bytes.into()));
    }

    pub fn fault(&self, message: &str) {
        let _ = self.events.send(ChannelEvent::Fault(message.to_string()));
    }

    /// Makes the channel report itself closed, as if the isolate vanished.
    pub fn close(&self) {
        self.state.closed.notify_one();
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn disposals(&self) -> usize {
        self.state.disposals.load(Ordering::SeqCst)
    }
}
