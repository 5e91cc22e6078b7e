//! Publish request queues drained by the client.
//!
//! Producers that do not own the client (other tasks, interrupt-driven
//! sensors) queue publishes here. The client takes at most one request per
//! steady-state tick and sends it as if [`MqttClient::publish`] had been
//! called.
//!
//! [`MqttClient::publish`]: crate::MqttClient::publish

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::{Deque, String, Vec};

use crate::error::MqttError;
use crate::packet::QoS;

/// One message waiting to be published.
///
/// Topic and payload are borrowed until the client sends them, so channel
/// producers usually queue `'static` data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishRequest<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> PublishRequest<'a> {
    pub const fn new(topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) -> Self {
        Self {
            topic,
            payload,
            qos,
            retain,
        }
    }
}

pub type PublishRequestChannel<'a, const DEPTH: usize> =
    Channel<CriticalSectionRawMutex, PublishRequest<'a>, DEPTH>;

pub type PublishRequestSender<'ch, 'a, const DEPTH: usize> =
    Sender<'ch, CriticalSectionRawMutex, PublishRequest<'a>, DEPTH>;

pub type PublishRequestReceiver<'ch, 'a, const DEPTH: usize> =
    Receiver<'ch, CriticalSectionRawMutex, PublishRequest<'a>, DEPTH>;

/// Producer side of a [`PublishRequestChannel`].
///
/// Cheap to copy; hand one to every task that publishes. Attach the
/// channel's receiver with [`MqttClient::attach_outbox`].
///
/// [`MqttClient::attach_outbox`]: crate::MqttClient::attach_outbox
#[derive(Clone, Copy)]
pub struct PublisherHandle<'ch, 'a, const DEPTH: usize> {
    sender: PublishRequestSender<'ch, 'a, DEPTH>,
}

impl<'ch, 'a, const DEPTH: usize> PublisherHandle<'ch, 'a, DEPTH> {
    pub fn new(sender: PublishRequestSender<'ch, 'a, DEPTH>) -> Self {
        Self { sender }
    }

    /// Queues a message, waiting for room in the channel.
    pub async fn publish(&self, topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) {
        self.sender
            .send(PublishRequest::new(topic, payload, qos, retain))
            .await;
    }

    /// Queues a message if the channel has room. Returns `false` otherwise.
    pub fn try_publish(&self, topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) -> bool {
        self.sender
            .try_send(PublishRequest::new(topic, payload, qos, retain))
            .is_ok()
    }
}

/// A queue the client can take publish requests from.
pub trait PublishSource {
    /// Hands the oldest queued request to `send`, if there is one.
    ///
    /// Returns `false` when the queue was empty.
    fn take_next(&mut self, send: &mut dyn FnMut(&PublishRequest<'_>)) -> bool;
}

impl<const DEPTH: usize> PublishSource for PublishRequestReceiver<'_, '_, DEPTH> {
    fn take_next(&mut self, send: &mut dyn FnMut(&PublishRequest<'_>)) -> bool {
        self.try_receive().map(|request| send(&request)).is_ok()
    }
}

#[derive(Debug, Clone)]
struct QueuedPublish<const TOPIC: usize, const PAYLOAD: usize> {
    topic: String<TOPIC>,
    payload: Vec<u8, PAYLOAD>,
    qos: QoS,
    retain: bool,
}

/// A FIFO outbox that copies each request into inline storage.
///
/// For single-threaded hosts: callers may publish from temporaries, and the
/// client sends them on a later tick.
pub struct BufferedOutbox<const CAPACITY: usize, const TOPIC: usize, const PAYLOAD: usize> {
    queue: Deque<QueuedPublish<TOPIC, PAYLOAD>, CAPACITY>,
}

impl<const CAPACITY: usize, const TOPIC: usize, const PAYLOAD: usize>
    BufferedOutbox<CAPACITY, TOPIC, PAYLOAD>
{
    pub const fn new() -> Self {
        Self {
            queue: Deque::new(),
        }
    }

    /// Copies a request to the back of the queue.
    ///
    /// Fails with [`MqttError::CapacityExceeded`] when the queue is full or
    /// the topic or payload does not fit its slot.
    pub fn push(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let queued = QueuedPublish {
            topic: String::try_from(topic).map_err(|_| MqttError::CapacityExceeded)?,
            payload: Vec::from_slice(payload).map_err(|_| MqttError::CapacityExceeded)?,
            qos,
            retain,
        };
        self.queue
            .push_back(queued)
            .map_err(|_| MqttError::CapacityExceeded)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drops every queued request.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl<const CAPACITY: usize, const TOPIC: usize, const PAYLOAD: usize> Default
    for BufferedOutbox<CAPACITY, TOPIC, PAYLOAD>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAPACITY: usize, const TOPIC: usize, const PAYLOAD: usize> PublishSource
    for BufferedOutbox<CAPACITY, TOPIC, PAYLOAD>
{
    fn take_next(&mut self, send: &mut dyn FnMut(&PublishRequest<'_>)) -> bool {
        match self.queue.pop_front() {
            Some(queued) => {
                send(&PublishRequest::new(
                    &queued.topic,
                    &queued.payload,
                    queued.qos,
                    queued.retain,
                ));
                true
            }
            None => false,
        }
    }
}
