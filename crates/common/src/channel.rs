//! Ordered signal channel between an event-stream producer and the supervisor
//!
//! A backend subscription pushes [`DeviceSignal`]s onto a bounded queue that
//! a single dispatch loop consumes, so signals are seen in emission order.
//! Replacing a subscription only replaces the producer side: dropping a
//! [`Subscription`] stops its producer task and nothing else.

use async_channel::{Receiver, Sender, bounded};
use tokio::task::JoinHandle;

/// Signals emitted by a device event stream
#[derive(Debug)]
pub enum DeviceSignal {
    /// A device became available
    Attach {
        /// Backend-assigned device identifier (serial)
        device_id: String,
    },

    /// A device went away
    Detach {
        /// Backend-assigned device identifier (serial)
        device_id: String,
    },

    /// The stream reported an error; it may or may not keep running
    Error(crate::Error),

    /// The stream terminated normally
    End,
}

/// Producer half, held by the backend's stream task
#[derive(Clone)]
pub struct SignalSender {
    tx: Sender<DeviceSignal>,
}

impl SignalSender {
    /// Push a signal onto the queue, waiting if it is full
    pub async fn send(&self, signal: DeviceSignal) -> crate::Result<()> {
        self.tx
            .send(signal)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Whether the consumer has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half, owned by a [`Subscription`]
pub struct SignalReceiver {
    rx: Receiver<DeviceSignal>,
}

impl SignalReceiver {
    /// Receive the next signal; `None` once every producer is gone
    pub async fn recv(&self) -> Option<DeviceSignal> {
        self.rx.recv().await.ok()
    }
}

/// Create the bounded signal queue
///
/// Returns (SignalSender for the producer, SignalReceiver for the consumer)
pub fn create_signal_channel() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = bounded(256);
    (SignalSender { tx }, SignalReceiver { rx })
}

/// A live event-stream subscription
///
/// Owns the consumer half and, optionally, the task producing into it.
/// Dropping the subscription aborts the producer.
pub struct Subscription {
    receiver: SignalReceiver,
    producer: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(receiver: SignalReceiver, producer: Option<JoinHandle<()>>) -> Self {
        Self { receiver, producer }
    }

    /// Receive the next signal from this subscription
    pub async fn recv(&self) -> Option<DeviceSignal> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}
