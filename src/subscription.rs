//! Topic subscriptions and their single-slot mailboxes.

use heapless::{String, Vec};

use crate::error::MqttError;
use crate::packet::QoS;
use crate::util::topic_matches;

/// Maximum length for a single topic string.
pub const MAX_TOPIC_LEN: usize = 128;

/// Handler invoked with `(topic, payload)` when a subscription is dispatched.
pub type Callback<'a> = &'a mut dyn FnMut(&str, &[u8]);

/// A registered topic with the last message received on it.
///
/// `N` is the mailbox capacity; longer payloads are cut to fit.
pub struct Subscription<'a, const N: usize> {
    topic: String<MAX_TOPIC_LEN>,
    qos: QoS,
    callback: Callback<'a>,
    mailbox: Vec<u8, N>,
    pending: bool,
}

impl<const N: usize> Subscription<'_, N> {
    pub fn topic(&self) -> &str {
        self.topic.as_str()
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Whether a message has arrived and not yet been dispatched.
    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// The last payload received, pending or not.
    pub fn message(&self) -> &[u8] {
        &self.mailbox
    }
}

impl<const N: usize> core::fmt::Debug for Subscription<'_, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .field("pending", &self.pending)
            .field("len", &self.mailbox.len())
            .finish()
    }
}

/// Subscriptions in registration order.
///
/// Owns the topic strings (copies them on add). Holds at most `MAX`
/// subscriptions with `N`-byte mailboxes.
pub struct SubscriptionRegistry<'a, const N: usize, const MAX: usize> {
    subscriptions: Vec<Subscription<'a, N>, MAX>,
}

impl<const N: usize, const MAX: usize> Default for SubscriptionRegistry<'_, N, MAX> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, const N: usize, const MAX: usize> SubscriptionRegistry<'a, N, MAX> {
    pub const fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }

    /// Registers `topic` by copying the string.
    pub fn add(&mut self, topic: &str, qos: QoS, callback: Callback<'a>) -> Result<(), MqttError> {
        let mut owned = String::new();
        if owned.push_str(topic).is_err() {
            return Err(MqttError::CapacityExceeded);
        }

        let subscription = Subscription {
            topic: owned,
            qos,
            callback,
            mailbox: Vec::new(),
            pending: false,
        };
        self.subscriptions
            .push(subscription)
            .map_err(|_| MqttError::CapacityExceeded)
    }

    pub fn get(&self, index: usize) -> Option<&Subscription<'a, N>> {
        self.subscriptions.get(index)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Index of the first subscription whose topic equals `topic`, ignoring
    /// ASCII case.
    pub fn find(&self, topic: &[u8]) -> Option<usize> {
        self.subscriptions
            .iter()
            .position(|s| topic_matches(topic, s.topic.as_str()))
    }

    /// Stores `payload` in the mailbox of the subscription matching `topic`.
    ///
    /// An undispatched message is overwritten. Returns `false` when no
    /// subscription matches.
    pub fn deliver(&mut self, topic: &[u8], payload: &[u8]) -> bool {
        let Some(index) = self.find(topic) else {
            return false;
        };
        let subscription = &mut self.subscriptions[index];

        if subscription.pending {
            warn!(
                "message on {} overwritten before dispatch",
                subscription.topic.as_str()
            );
        }

        let len = payload.len().min(N);
        if len < payload.len() {
            warn!(
                "message on {} truncated from {} to {} bytes",
                subscription.topic.as_str(),
                payload.len(),
                len
            );
        }

        subscription.mailbox.clear();
        // cannot fail, `len` is within capacity
        let _ = subscription.mailbox.extend_from_slice(&payload[..len]);
        subscription.pending = true;
        true
    }

    /// Invokes the callback of the first pending subscription and clears its
    /// flag. Returns `false` when nothing was pending.
    pub fn dispatch(&mut self) -> bool {
        let Some(subscription) = self.subscriptions.iter_mut().find(|s| s.pending) else {
            return false;
        };
        subscription.pending = false;
        debug!("dispatching message on {}", subscription.topic.as_str());
        (subscription.callback)(subscription.topic.as_str(), subscription.mailbox.as_slice());
        true
    }
}
