#![allow(dead_code)]

use std::cell::Cell;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};

use embassy_time::Instant;
use looped_mqtt::{
    Clock, ConnectionStatus, LinkStatus, MqttClient, MqttOptions, SocketHandle, Station, Transport,
};

pub const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
pub const PINGRESP: [u8; 2] = [0xD0, 0x00];

pub type TestClient<'a> = MqttClient<'a, MockStation, MockTransport, &'a ManualClock, 256, 4, 4>;

pub fn options() -> MqttOptions<'static> {
    MqttOptions::new("test-ap", "secret", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
        .with_client_id("test-device")
        .with_credentials("user", "pass")
}

/// A clock that only moves when told to.
#[derive(Default)]
pub struct ManualClock {
    millis: Cell<u64>,
}

impl ManualClock {
    pub fn advance(&self, millis: u64) {
        self.millis.set(self.millis.get() + millis);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.millis.get())
    }
}

pub struct MockStation {
    pub link: LinkStatus,
    pub begin_calls: usize,
}

impl Default for MockStation {
    fn default() -> Self {
        Self {
            link: LinkStatus::Connected,
            begin_calls: 0,
        }
    }
}

impl Station for MockStation {
    type Error = ();

    fn begin(&mut self, _ssid: &str, _passphrase: &str) -> Result<(), ()> {
        self.begin_calls += 1;
        Ok(())
    }

    fn link_status(&mut self) -> LinkStatus {
        self.link
    }
}

/// A scripted broker connection.
///
/// Every `write` is recorded as one frame. When the first byte of a written
/// frame carries a packet type that has a queued reply, the reply is made
/// readable.
pub struct MockTransport {
    pub socket: Option<SocketHandle>,
    pub sockets_available: bool,
    pub accept: bool,
    pub connected: bool,
    pub inbound: VecDeque<u8>,
    pub frames: Vec<Vec<u8>>,
    pub replies: Vec<(u8, Vec<u8>)>,
    pub close_calls: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            socket: None,
            sockets_available: true,
            accept: true,
            connected: false,
            inbound: VecDeque::new(),
            frames: Vec::new(),
            replies: Vec::new(),
            close_calls: 0,
        }
    }
}

impl MockTransport {
    /// Queues `reply` to be delivered after the next frame of `packet_type`.
    pub fn reply_to(&mut self, packet_type: u8, reply: &[u8]) {
        self.replies.push((packet_type, reply.to_vec()));
    }

    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Frames whose packet type matches `packet_type`.
    pub fn frames_of(&self, packet_type: u8) -> Vec<&Vec<u8>> {
        self.frames
            .iter()
            .filter(|f| f.first().map(|b| b >> 4) == Some(packet_type))
            .collect()
    }
}

impl Transport for MockTransport {
    type Error = ();

    fn socket(&self) -> Option<SocketHandle> {
        self.socket
    }

    fn acquire_socket(&mut self) -> Option<SocketHandle> {
        if !self.sockets_available {
            return None;
        }
        self.socket = Some(SocketHandle(1));
        self.socket
    }

    fn connect(&mut self, _addr: IpAddr, _port: u16) -> Result<(), ()> {
        self.connected = self.accept;
        Ok(())
    }

    fn connected(&mut self) -> bool {
        self.connected
    }

    fn available(&mut self) -> usize {
        self.inbound.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.inbound.pop_front()
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, ()> {
        if !self.connected {
            return Err(());
        }
        self.frames.push(buf.to_vec());
        if let Some(kind) = buf.first().map(|b| b >> 4) {
            if let Some(pos) = self.replies.iter().position(|(t, _)| *t == kind) {
                let (_, reply) = self.replies.remove(pos);
                self.inbound.extend(reply);
            }
        }
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.close_calls += 1;
        self.connected = false;
    }

    fn is_closed(&mut self) -> bool {
        !self.connected
    }

    fn release_socket(&mut self) {
        self.socket = None;
    }
}

/// Steps the client until it reports `target`, advancing the clock by
/// `tick_ms` before each step. Returns the number of steps taken.
pub fn run_until(
    client: &mut TestClient<'_>,
    clock: &ManualClock,
    target: ConnectionStatus,
    tick_ms: u64,
    max_steps: usize,
) -> Option<usize> {
    for n in 0..max_steps {
        if client.status() == target {
            return Some(n);
        }
        clock.advance(tick_ms);
        client.step();
    }
    (client.status() == target).then_some(max_steps)
}
