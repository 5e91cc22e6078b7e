//! # MQTT Client
//!
//! The connection state machine. [`MqttClient::step`] performs exactly one
//! bounded unit of work for the current [`ConnectionStatus`] and returns; the
//! host calls it from its main loop. Every wait is a timestamp compared on a
//! later tick, so no call ever blocks.
//!
//! The lifecycle runs Wi-Fi association, socket connect, settle wait, CONNECT
//! and CONNACK, one SUBSCRIBE per tick, the birth message, one discovery per
//! tick, and then the steady state: keepalive pings, callback dispatch, queued
//! publishes and polling for inbound messages. Failures route back to the
//! appropriate reconnect state instead of being returned.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::config::{MqttOptions, ProtocolLevel};
use crate::error::{ConnectReturnCode, MqttError};
use crate::outbox::{PublishRequest, PublishSource};
use crate::packet::{
    ConnAck, Connect, DecodePacket, EncodePacket, Message, PacketIdGenerator, PacketType, PingReq,
    PubAck, Publish, QoS, SubAck, Subscribe,
};
use crate::reader::{PacketReader, ReadProgress};
use crate::status::ConnectionStatus;
use crate::subscription::{Callback, SubscriptionRegistry};
use crate::time::{Clock, Stopwatch};
use crate::transport::{LinkStatus, Station, Transport};

/// Largest slice handed to a single transport write.
const MAX_WRITE_CHUNK: usize = 250;

enum SendFailure {
    TimedOut,
    Rejected,
}

/// Pushes `frame` into the transport in chunks, giving up once `limit` has
/// passed since the first chunk.
fn send_frame<T: Transport, C: Clock>(
    transport: &mut T,
    clock: &C,
    frame: &[u8],
    limit: Duration,
) -> Result<(), SendFailure> {
    let started = Stopwatch::new(clock.now());
    let mut offset = 0;
    while offset < frame.len() {
        if started.exceeded(clock.now(), limit) {
            return Err(SendFailure::TimedOut);
        }
        let end = frame.len().min(offset + MAX_WRITE_CHUNK);
        let chunk = &frame[offset..end];
        match transport.write(chunk) {
            Ok(written) if written == chunk.len() => offset = end,
            Ok(written) => {
                debug!("short write: {} of {} bytes", written, chunk.len());
                return Err(SendFailure::Rejected);
            }
            Err(_) => {
                debug!("transport write failed");
                return Err(SendFailure::Rejected);
            }
        }
    }
    Ok(())
}

/// A non-blocking MQTT client driven one step at a time.
///
/// - `BUF`: size of the shared packet buffer and of each subscription mailbox.
/// - `SUBS`: maximum number of subscriptions.
/// - `DISCOVERIES`: maximum number of discovery messages.
///
/// # Example
///
/// ```ignore
/// let options = MqttOptions::new("home-ap", "hunter2", broker).with_client_id("porch");
/// let mut on_light = |_topic: &str, payload: &[u8]| light.set(payload == b"ON");
///
/// let mut client: MqttClient<'_, _, _, _> = MqttClient::new(wifi, socket, SystemClock, options);
/// client.set_birth("porch/status", b"online")?;
/// client.on_subscribe("porch/light/set", &mut on_light)?;
///
/// loop {
///     client.step();
///     if client.mqtt_is_connected() {
///         let _ = client.publish("porch/temp", b"21.5", QoS::AtMostOnce, false);
///     }
/// }
/// ```
pub struct MqttClient<
    'a,
    S,
    T,
    C,
    const BUF: usize = 512,
    const SUBS: usize = 8,
    const DISCOVERIES: usize = 8,
> where
    S: Station,
    T: Transport,
    C: Clock,
{
    station: S,
    transport: T,
    clock: C,
    options: MqttOptions<'a>,
    status: ConnectionStatus,

    buffer: [u8; BUF],
    reader: PacketReader,
    /// Length of the last complete frame left in `buffer` for the next state.
    frame_len: usize,
    packet_ids: PacketIdGenerator,

    subscriptions: SubscriptionRegistry<'a, BUF, SUBS>,
    birth: Option<Message<'a>>,
    will: Option<Message<'a>>,
    discoveries: Vec<Message<'a>, DISCOVERIES>,
    outbox: Option<&'a mut dyn PublishSource>,

    attempts: u32,
    subscription_index: usize,
    discovery_index: usize,
    /// Connect and settle waits.
    timer: Stopwatch,
    /// Outer deadline of an acknowledgment search, armed on its first tick.
    search: Option<Stopwatch>,
    /// Last time traffic to or from the broker was observed.
    last_con_verify: Stopwatch,
    /// Packet id of the QoS 1 publish waiting for its PUBACK.
    awaiting_ack: Option<u16>,
}

impl<'a, S, T, C, const BUF: usize, const SUBS: usize, const DISCOVERIES: usize>
    MqttClient<'a, S, T, C, BUF, SUBS, DISCOVERIES>
where
    S: Station,
    T: Transport,
    C: Clock,
{
    /// Creates a client in [`ConnectionStatus::Init`]. Nothing touches the
    /// radio or the socket until the first [`step`](Self::step).
    pub fn new(station: S, transport: T, clock: C, options: MqttOptions<'a>) -> Self {
        let now = clock.now();
        Self {
            station,
            transport,
            clock,
            options,
            status: ConnectionStatus::Init,
            buffer: [0; BUF],
            reader: PacketReader::new(),
            frame_len: 0,
            packet_ids: PacketIdGenerator::new(),
            subscriptions: SubscriptionRegistry::new(),
            birth: None,
            will: None,
            discoveries: Vec::new(),
            outbox: None,
            attempts: 0,
            subscription_index: 0,
            discovery_index: 0,
            timer: Stopwatch::new(now),
            search: None,
            last_con_verify: Stopwatch::new(now),
            awaiting_ack: None,
        }
    }

    /// The current position in the connection lifecycle.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// See [`ConnectionStatus::wifi_is_connected`].
    pub fn wifi_is_connected(&self) -> bool {
        self.status.wifi_is_connected()
    }

    /// See [`ConnectionStatus::mqtt_is_connected`].
    pub fn mqtt_is_connected(&self) -> bool {
        self.status.mqtt_is_connected()
    }

    /// See [`ConnectionStatus::mqtt_is_active`].
    pub fn mqtt_is_active(&self) -> bool {
        self.status.mqtt_is_active()
    }

    /// The options the client was created with.
    pub fn options(&self) -> &MqttOptions<'a> {
        &self.options
    }

    /// Registered subscriptions, in subscribe order.
    pub fn subscriptions(&self) -> &SubscriptionRegistry<'a, BUF, SUBS> {
        &self.subscriptions
    }

    /// The socket driver.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the socket driver. Closing or releasing the socket
    /// behind the client's back is noticed on a later tick.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Mutable access to the Wi-Fi driver.
    pub fn station_mut(&mut self) -> &mut S {
        &mut self.station
    }

    // --- Configuration ---

    fn ensure_configurable(&self, what: &str) -> Result<(), MqttError> {
        if self.status.mqtt_is_connected() {
            warn!("{} set after connecting, ignored", what);
            return Err(MqttError::AlreadyConnected);
        }
        Ok(())
    }

    /// Sets the message published (QoS 0, not retained) once subscriptions
    /// are in place.
    pub fn set_birth(&mut self, topic: &'a str, payload: &'a [u8]) -> Result<(), MqttError> {
        self.ensure_configurable("birth")?;
        self.birth = Some(Message::new(topic, payload, QoS::AtMostOnce, false));
        Ok(())
    }

    /// Sets the last-will message carried in the CONNECT packet.
    pub fn set_will(
        &mut self,
        topic: &'a str,
        payload: &'a [u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.ensure_configurable("will")?;
        self.will = Some(Message::new(topic, payload, qos, retain));
        Ok(())
    }

    /// Appends a discovery message, published after the birth message on
    /// every connect.
    ///
    /// Discoveries always go out at QoS 0; `qos` is kept on the stored
    /// message but not used for sending. `retain` is honoured.
    pub fn add_discovery(
        &mut self,
        topic: &'a str,
        payload: &'a [u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        self.ensure_configurable("discovery")?;
        self.discoveries
            .push(Message::new(topic, payload, qos, retain))
            .map_err(|_| MqttError::CapacityExceeded)
    }

    /// Subscribes to `topic` at QoS 0 on every connect.
    pub fn on_subscribe(&mut self, topic: &str, callback: Callback<'a>) -> Result<(), MqttError> {
        self.on_subscribe_qos(topic, QoS::AtMostOnce, callback)
    }

    /// Subscribes to `topic` at the requested QoS on every connect.
    pub fn on_subscribe_qos(
        &mut self,
        topic: &str,
        qos: QoS,
        callback: Callback<'a>,
    ) -> Result<(), MqttError> {
        self.ensure_configurable("subscription")?;
        if qos == QoS::ExactlyOnce {
            return Err(MqttError::UnsupportedQos);
        }
        self.subscriptions.add(topic, qos, callback)
    }

    /// Attaches a queue whose requests are published from the steady state,
    /// one per tick.
    pub fn attach_outbox(&mut self, outbox: &'a mut dyn PublishSource) {
        self.outbox = Some(outbox);
    }

    // --- Messaging ---

    /// Publishes a message now.
    ///
    /// Only allowed in the steady state. A QoS 1 publish leaves the client
    /// waiting for the PUBACK, during which further publishes are refused
    /// with [`MqttError::Busy`].
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        if !self.status.mqtt_is_connected() {
            return Err(MqttError::NotConnected);
        }
        if self.status.mqtt_is_active() {
            return Err(MqttError::Busy);
        }
        if qos == QoS::ExactlyOnce {
            return Err(MqttError::UnsupportedQos);
        }
        if self.status == ConnectionStatus::ReadingSubPacket {
            if self.reader.has_partial_data() {
                return Err(MqttError::Busy);
            }
            self.reader.reset();
        }
        info!("publishing to {}", topic);
        self.publish_now(topic, payload, qos, retain)
    }

    fn publish_now(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        if qos == QoS::ExactlyOnce {
            return Err(MqttError::UnsupportedQos);
        }
        if !self.transport.connected() {
            self.status = ConnectionStatus::MqttOffline;
            return Err(MqttError::NotConnected);
        }
        self.send_publish(topic, payload, qos, retain)?;
        if qos == QoS::AtLeastOnce {
            self.await_packet(ConnectionStatus::ReadingPubackPacket);
        } else {
            self.status = ConnectionStatus::Okay;
        }
        Ok(())
    }

    fn send_publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError> {
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            _ => Some(self.packet_ids.next_id()),
        };
        let publish = Publish {
            topic,
            payload,
            qos,
            retain,
            packet_id,
        };
        let len = publish.encode(&mut self.buffer)?;
        if !self.send_buffer(len) {
            return Err(MqttError::SendFailed);
        }
        if packet_id.is_some() {
            self.awaiting_ack = packet_id;
        }
        Ok(())
    }

    // --- Main loop ---

    /// Advances the state machine by one step.
    pub fn step(&mut self) {
        use ConnectionStatus::*;

        let now = self.clock.now();
        match self.status {
            Init | WifiOffline => self.wifi_setup(),
            WifiReady => self.wifi_connect(),
            WifiConnected | MqttDisconnected | MqttOffline => self.mqtt_connect(now),
            WifiClosingSocket => self.close_socket(false),
            MqttClosingSocket => self.close_socket(true),
            WifiErrors => {
                self.close_connection(false);
            }
            MqttErrors => {
                self.close_connection(true);
            }
            MqttConnecting => self.wait_on_connection(now),
            MqttConnectionWait => self.wait_after_connection(now),
            MqttConnectionSuccess | MqttMissingConack => self.connect_broker(),
            ReadingConackPacket => self.confirm_connect(now),
            MqttConnectionConfirmed | MqttSubscriptionFail | MqttSubscribing => {
                self.subscribe_next()
            }
            MqttSubscribed => self.announce(),
            MqttAnnounced | SendingDiscovery => self.send_discoveries(),
            ReadingSubPacket => self.look_for_sub_packet(now),
            ReadingSubackPacket | ReadingPubackPacket | ReadingPingPacket => {
                self.search_packet(now)
            }
            SubscriptionPacketRead => self.handle_subscription_packet(),
            MqttPublished => self.finish_publish(),
            Okay => self.steady_state(now),
        }
    }

    // --- Socket teardown ---

    fn reset_session(&mut self) {
        self.reader.reset();
        self.search = None;
        self.frame_len = 0;
        self.subscription_index = 0;
        self.discovery_index = 0;
        self.awaiting_ack = None;
    }

    /// Issues a close if a socket is held. Returns `true` when there was
    /// nothing to close.
    fn close_connection(&mut self, wifi_connected: bool) -> bool {
        self.reset_session();
        if self.transport.socket().is_some() {
            debug!("closing socket");
            self.transport.close();
            self.status = if wifi_connected {
                ConnectionStatus::MqttClosingSocket
            } else {
                ConnectionStatus::WifiClosingSocket
            };
            return false;
        }
        self.status = if wifi_connected {
            ConnectionStatus::MqttDisconnected
        } else {
            ConnectionStatus::Init
        };
        true
    }

    fn close_socket(&mut self, wifi_connected: bool) {
        if !self.transport.is_closed() {
            trace!("socket closing");
            return;
        }
        self.transport.release_socket();
        debug!("socket closed");
        self.status = if wifi_connected {
            ConnectionStatus::MqttDisconnected
        } else {
            ConnectionStatus::WifiOffline
        };
    }

    // --- Wi-Fi ---

    fn wifi_setup(&mut self) {
        if !self.close_connection(false) {
            return;
        }
        info!("connecting to Wi-Fi network {}", self.options.ssid);
        match self.station.begin(self.options.ssid, self.options.passphrase) {
            Ok(()) => {
                self.status = ConnectionStatus::WifiReady;
                self.attempts = 0;
            }
            Err(_) => warn!("Wi-Fi setup failed"),
        }
    }

    fn wifi_connect(&mut self) {
        self.attempts += 1;
        if self.attempts > self.options.limits.wifi_poll_ticks {
            warn!("Wi-Fi association timed out");
            self.status = ConnectionStatus::WifiErrors;
            self.attempts = 0;
            return;
        }
        match self.station.link_status() {
            LinkStatus::Connected => {
                info!("Wi-Fi connected");
                self.status = ConnectionStatus::WifiConnected;
                self.attempts = 0;
            }
            pending if pending.is_pending() => {}
            failure => {
                warn!("Wi-Fi connection failed: {:?}", failure);
                self.status = ConnectionStatus::WifiOffline;
            }
        }
    }

    // --- Socket connect ---

    fn mqtt_connect(&mut self, now: Instant) {
        if self.transport.socket().is_some() && !self.close_connection(true) {
            return;
        }
        if self.station.link_status() != LinkStatus::Connected {
            warn!("Wi-Fi link lost");
            self.status = ConnectionStatus::WifiErrors;
            return;
        }

        let Some(socket) = self.transport.acquire_socket() else {
            debug!("no socket available");
            self.status = ConnectionStatus::MqttOffline;
            return;
        };
        debug!("connecting on socket {}", socket.0);

        self.status = ConnectionStatus::MqttConnecting;
        if self
            .transport
            .connect(self.options.broker, self.options.port)
            .is_err()
        {
            warn!("could not start connection to broker");
            self.status = ConnectionStatus::MqttOffline;
            return;
        }
        self.timer.restart(now);
    }

    fn wait_on_connection(&mut self, now: Instant) {
        if self.transport.connected() {
            info!("connected to MQTT server");
            self.status = ConnectionStatus::MqttConnectionWait;
            self.timer.restart(now);
            return;
        }
        if self.timer.exceeded(now, self.options.timeouts.tcp_connect) {
            warn!("connection to MQTT server timed out");
            self.status = ConnectionStatus::MqttOffline;
        }
    }

    fn wait_after_connection(&mut self, now: Instant) {
        if self.timer.exceeded(now, self.options.timeouts.connection_settle) {
            self.status = ConnectionStatus::MqttConnectionSuccess;
            self.attempts = 0;
        }
    }

    // --- Broker handshake ---

    fn connect_broker(&mut self) {
        if self.attempts >= self.options.limits.connect_attempts || !self.transport.connected() {
            error!("broker handshake failed after {} attempts", self.attempts);
            self.status = ConnectionStatus::MqttErrors;
            self.attempts = 0;
            return;
        }
        self.attempts += 1;
        info!("connecting to broker, attempt {}", self.attempts);

        let connect = Connect {
            level: self.options.protocol_level,
            keep_alive: self.options.keep_alive_secs,
            client_id: self.options.client_id,
            will: self.will,
            username: self.options.username,
            password: self.options.password,
        };
        let len = match connect.encode(&mut self.buffer) {
            Ok(len) => len,
            Err(err) => {
                error!("cannot encode CONNECT: {:?}", err);
                self.status = ConnectionStatus::MqttErrors;
                return;
            }
        };
        if !self.send_buffer(len) {
            debug!("CONNECT not sent");
            return;
        }
        self.reader.reset();
        self.status = ConnectionStatus::ReadingConackPacket;
    }

    fn confirm_connect(&mut self, now: Instant) {
        let len = match self.read_frame(now) {
            ReadProgress::Pending => return,
            ReadProgress::Complete(len) => len,
            ReadProgress::TimedOut | ReadProgress::Malformed => {
                warn!("no CONNACK received");
                self.status = ConnectionStatus::MqttMissingConack;
                return;
            }
        };

        match ConnAck::decode(&self.buffer[..len]) {
            Ok(ack) => match ack.return_code {
                ConnectReturnCode::Accepted => {}
                ConnectReturnCode::UnacceptableProtocolVersion => {
                    warn!("broker reported unacceptable protocol version, continuing")
                }
                refused => {
                    warn!("broker refused connection: {:?}", refused);
                    self.status = ConnectionStatus::MqttMissingConack;
                    return;
                }
            },
            Err(err) => {
                warn!("invalid CONNACK: {:?}", err);
                self.status = ConnectionStatus::MqttMissingConack;
                return;
            }
        }

        info!("broker connection confirmed");
        self.attempts = 0;
        self.status = ConnectionStatus::MqttConnectionConfirmed;
    }

    // --- Subscriptions, birth, discoveries ---

    fn subscribe_next(&mut self) {
        if self.status == ConnectionStatus::MqttSubscribing {
            self.attempts = 0;
            self.subscription_index += 1;
        }
        if self.subscription_index >= self.subscriptions.len() {
            self.subscription_index = 0;
            self.attempts = 0;
            self.status = ConnectionStatus::MqttSubscribed;
            return;
        }

        if !self.transport.connected() || self.attempts >= self.options.limits.subscribe_attempts {
            error!("subscription failed, reconnecting");
            self.attempts = 0;
            self.subscription_index = 0;
            self.status = ConnectionStatus::MqttOffline;
            return;
        }
        self.attempts += 1;
        self.status = ConnectionStatus::MqttSubscribing;

        let Some(subscription) = self.subscriptions.get(self.subscription_index) else {
            return;
        };
        info!("subscribing to {}", subscription.topic());
        let subscribe = Subscribe {
            packet_id: self.packet_ids.next_id(),
            topic: subscription.topic(),
            qos: subscription.qos(),
        };
        let len = match subscribe.encode(&mut self.buffer) {
            Ok(len) => len,
            Err(err) => {
                error!("cannot encode SUBSCRIBE: {:?}", err);
                self.status = ConnectionStatus::MqttSubscriptionFail;
                return;
            }
        };
        if !self.send_buffer(len) {
            debug!("SUBSCRIBE not sent");
            if self.status == ConnectionStatus::MqttSubscribing {
                self.status = ConnectionStatus::MqttSubscriptionFail;
            }
            return;
        }
        self.await_packet(ConnectionStatus::ReadingSubackPacket);
    }

    fn announce(&mut self) {
        if let Some(birth) = self.birth {
            info!("announcing on {}", birth.topic);
            if let Err(err) = self.send_publish(birth.topic, birth.payload, QoS::AtMostOnce, false) {
                warn!("birth message failed: {:?}", err);
                if !self.transport.connected() {
                    self.status = ConnectionStatus::MqttOffline;
                }
                return;
            }
        }
        self.status = ConnectionStatus::MqttAnnounced;
    }

    fn send_discoveries(&mut self) {
        let Some(discovery) = self.discoveries.get(self.discovery_index).copied() else {
            info!("connection okay");
            self.discovery_index = 0;
            self.status = ConnectionStatus::Okay;
            return;
        };

        info!("sending discovery {}", discovery.topic);
        if discovery.qos != QoS::AtMostOnce {
            debug!("discovery {} sent at QoS 0", discovery.topic);
        }
        let sent = self.send_publish(
            discovery.topic,
            discovery.payload,
            QoS::AtMostOnce,
            discovery.retain,
        );
        if let Err(err) = sent {
            warn!("discovery failed: {:?}", err);
            if !self.transport.connected() {
                self.discovery_index = 0;
                self.status = ConnectionStatus::MqttOffline;
            }
            return;
        }
        self.status = ConnectionStatus::SendingDiscovery;
        self.discovery_index += 1;
    }

    // --- Steady state ---

    fn steady_state(&mut self, now: Instant) {
        if self
            .last_con_verify
            .exceeded(now, self.options.timeouts.verify_interval)
        {
            self.verify_connection();
            return;
        }
        if self.subscriptions.dispatch() {
            return;
        }
        if self.drain_outbox() {
            return;
        }
        self.reader.reset();
        self.status = ConnectionStatus::ReadingSubPacket;
    }

    fn verify_connection(&mut self) {
        debug!("verifying connection");
        let sent = match PingReq.encode(&mut self.buffer) {
            Ok(len) => self.send_buffer(len),
            Err(_) => false,
        };
        if !sent {
            self.status = ConnectionStatus::MqttErrors;
            return;
        }
        self.await_packet(ConnectionStatus::ReadingPingPacket);
    }

    /// Publishes one queued request. Returns `true` if one was taken.
    fn drain_outbox(&mut self) -> bool {
        let Some(outbox) = self.outbox.take() else {
            return false;
        };
        let taken = outbox.take_next(&mut |req: &PublishRequest<'_>| {
            debug!("publishing queued message to {}", req.topic);
            if let Err(err) = self.publish_now(req.topic, req.payload, req.qos, req.retain) {
                warn!("queued publish to {} failed: {:?}", req.topic, err);
            }
        });
        self.outbox = Some(outbox);
        taken
    }

    fn look_for_sub_packet(&mut self, now: Instant) {
        match self.read_frame(now) {
            ReadProgress::Pending => {}
            ReadProgress::Complete(len) => {
                self.frame_len = len;
                self.status = ConnectionStatus::SubscriptionPacketRead;
            }
            ReadProgress::TimedOut | ReadProgress::Malformed => {
                self.status = ConnectionStatus::Okay;
            }
        }
    }

    fn handle_subscription_packet(&mut self) {
        let len = core::mem::take(&mut self.frame_len);
        self.status = ConnectionStatus::Okay;
        if len < 3 {
            return;
        }
        if PacketType::from_header(self.buffer[0]) != Some(PacketType::Publish) {
            trace!("ignoring packet type {}", self.buffer[0] >> 4);
            return;
        }
        self.handle_inbound_publish(len);
    }

    /// Copies an inbound PUBLISH into its subscription's mailbox and
    /// acknowledges it when required.
    fn handle_inbound_publish(&mut self, len: usize) {
        let ack_id = {
            let publish = match Publish::decode(&self.buffer[..len]) {
                Ok(publish) => publish,
                Err(err) => {
                    debug!("dropping malformed PUBLISH: {:?}", err);
                    return;
                }
            };
            debug!("received message on {}", publish.topic);
            if !self
                .subscriptions
                .deliver(publish.topic.as_bytes(), publish.payload)
            {
                trace!("no subscription for {}", publish.topic);
                return;
            }
            match publish.qos {
                QoS::AtLeastOnce => publish.packet_id,
                _ => None,
            }
        };

        if let Some(packet_id) = ack_id {
            if self.options.protocol_level == ProtocolLevel::V3_1_1 {
                let mut ack = [0u8; 4];
                let sent = match (PubAck { packet_id }).encode(&mut ack) {
                    Ok(len) => self.send_slice(&ack[..len]),
                    Err(_) => false,
                };
                if !sent {
                    warn!("PUBACK for packet {} not sent", packet_id);
                }
            }
        }
    }

    // --- Acknowledgment search ---

    fn await_packet(&mut self, status: ConnectionStatus) {
        self.search = None;
        self.reader.reset();
        self.status = status;
    }

    fn search_packet(&mut self, now: Instant) {
        let started = *self.search.get_or_insert(Stopwatch::new(now));
        // A frame already under way is read to its end before giving up, so
        // its remaining bytes are never parsed as a new header.
        if started.exceeded(now, self.options.timeouts.packet_search)
            && !self.reader.has_partial_data()
        {
            self.search = None;
            self.reader.reset();
            self.status = match self.status {
                ConnectionStatus::ReadingSubackPacket => {
                    warn!("no SUBACK received");
                    ConnectionStatus::MqttSubscriptionFail
                }
                ConnectionStatus::ReadingPubackPacket => {
                    debug!("no PUBACK received");
                    self.frame_len = 0;
                    ConnectionStatus::MqttPublished
                }
                ConnectionStatus::ReadingPingPacket => {
                    error!("no PINGRESP received");
                    ConnectionStatus::MqttErrors
                }
                _ => ConnectionStatus::Okay,
            };
            return;
        }

        if let ReadProgress::Complete(len) = self.read_frame(now) {
            self.on_search_frame(len);
        }
    }

    fn on_search_frame(&mut self, len: usize) {
        let Some(kind) = PacketType::from_header(self.buffer[0]) else {
            debug!("unrecognized packet type {}", self.buffer[0] >> 4);
            return;
        };

        match (kind, self.status) {
            (PacketType::SubAck, ConnectionStatus::ReadingSubackPacket) => {
                match SubAck::decode(&self.buffer[..len]) {
                    Ok(ack) if ack.is_refused() => {
                        warn!("broker refused subscription {}", ack.packet_id)
                    }
                    Ok(ack) => debug!("subscription {} granted", ack.packet_id),
                    Err(err) => debug!("invalid SUBACK: {:?}", err),
                }
                self.search = None;
                self.status = ConnectionStatus::MqttSubscribing;
            }
            (PacketType::PubAck, ConnectionStatus::ReadingPubackPacket) => {
                self.frame_len = len;
                self.search = None;
                self.status = ConnectionStatus::MqttPublished;
            }
            (PacketType::PingResp, ConnectionStatus::ReadingPingPacket) => {
                trace!("PINGRESP received");
                self.search = None;
                self.status = ConnectionStatus::Okay;
            }
            // Application messages are never dropped while waiting for an ack.
            (PacketType::Publish, _) => self.handle_inbound_publish(len),
            (other, _) => debug!("ignoring unexpected packet type {}", other as u8),
        }
    }

    fn finish_publish(&mut self) {
        let expected = self.awaiting_ack.take();
        let len = core::mem::take(&mut self.frame_len);
        if len == 0 {
            debug!("publish treated as delivered without PUBACK");
        } else {
            match PubAck::decode(&self.buffer[..len]) {
                Ok(ack) if Some(ack.packet_id) == expected => {
                    trace!("publish {} acknowledged", ack.packet_id)
                }
                Ok(ack) => warn!(
                    "PUBACK for packet {} does not match {}",
                    ack.packet_id,
                    expected.unwrap_or(0)
                ),
                Err(err) => warn!("invalid PUBACK: {:?}", err),
            }
        }
        self.status = ConnectionStatus::Okay;
    }

    // --- I/O ---

    /// Advances the packet reader, recording broker activity on completion.
    fn read_frame(&mut self, now: Instant) -> ReadProgress {
        let progress = self.reader.poll(
            &mut self.buffer,
            &mut self.transport,
            now,
            self.options.timeouts.read_packet,
        );
        if let ReadProgress::Complete(len) = progress {
            trace!("read packet of {} bytes", len);
            self.last_con_verify.restart(now);
        }
        progress
    }

    fn send_buffer(&mut self, len: usize) -> bool {
        let result = send_frame(
            &mut self.transport,
            &self.clock,
            &self.buffer[..len],
            self.options.timeouts.send_packet,
        );
        self.sent(result)
    }

    fn send_slice(&mut self, frame: &[u8]) -> bool {
        let result = send_frame(
            &mut self.transport,
            &self.clock,
            frame,
            self.options.timeouts.send_packet,
        );
        self.sent(result)
    }

    fn sent(&mut self, result: Result<(), SendFailure>) -> bool {
        match result {
            Ok(()) => {
                self.last_con_verify.restart(self.clock.now());
                true
            }
            Err(SendFailure::TimedOut) => {
                if self.transport.connected() {
                    error!("send timed out");
                    self.status = ConnectionStatus::MqttErrors;
                } else {
                    warn!("send timed out, transport offline");
                    self.status = ConnectionStatus::MqttOffline;
                }
                false
            }
            Err(SendFailure::Rejected) => false,
        }
    }
}

impl<S, T, C, const BUF: usize, const SUBS: usize, const DISCOVERIES: usize> core::fmt::Debug
    for MqttClient<'_, S, T, C, BUF, SUBS, DISCOVERIES>
where
    S: Station,
    T: Transport,
    C: Clock,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MqttClient")
            .field("status", &self.status)
            .field("subscriptions", &self.subscriptions.len())
            .field("discoveries", &self.discoveries.len())
            .finish_non_exhaustive()
    }
}
