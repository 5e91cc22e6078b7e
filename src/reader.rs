//! Incremental packet reader.
//!
//! A packet arrives over many scheduler ticks. [`PacketReader`] keeps the
//! position inside the frame as explicit state and consumes at most one byte
//! per call, so the engine can return to the host loop between bytes and pick
//! up where it left off on the next tick.

use embassy_time::{Duration, Instant};

use crate::time::Stopwatch;
use crate::transport::Transport;

/// Largest remaining-length multiplier a valid field can reach.
const MAX_MULTIPLIER: usize = 128 * 128 * 128;

/// Outcome of one [`PacketReader::poll`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadProgress {
    /// More bytes are needed; call again on a later tick.
    Pending,
    /// A frame of this many bytes sits at the start of the buffer.
    Complete(usize),
    /// No byte arrived within the inactivity limit. The reader is idle again.
    TimedOut,
    /// The remaining-length field was invalid. The reader is idle again.
    Malformed,
}

/// Outcome of one primitive read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Fill {
    /// The ceiling was reached.
    Filled,
    /// Below the ceiling and still within the inactivity limit.
    Waiting,
    /// Below the ceiling and the inactivity limit elapsed.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadStep {
    Idle,
    FixedHeader,
    RemainingLength,
    Payload,
    Discard,
}

/// Resumable decoder for a single MQTT frame.
#[derive(Debug, Clone)]
pub struct PacketReader {
    step: ReadStep,
    /// Bytes of the current frame already in the buffer.
    len: usize,
    /// Buffer offset at which the current frame ends.
    ceiling: usize,
    remaining: usize,
    multiplier: usize,
    /// Bytes past the buffer's capacity still to be drained from the stream.
    discard: usize,
    last_byte: Stopwatch,
}

impl Default for PacketReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketReader {
    pub const fn new() -> Self {
        Self {
            step: ReadStep::Idle,
            len: 0,
            ceiling: 0,
            remaining: 0,
            multiplier: 1,
            discard: 0,
            last_byte: Stopwatch::new(Instant::from_ticks(0)),
        }
    }

    /// Whether no frame is in progress.
    pub fn is_idle(&self) -> bool {
        self.step == ReadStep::Idle
    }

    /// Whether a frame has been started and some of its bytes consumed.
    pub fn has_partial_data(&self) -> bool {
        !self.is_idle() && self.len > 0
    }

    /// Drops any frame in progress.
    pub fn reset(&mut self) {
        self.step = ReadStep::Idle;
        self.len = 0;
        self.ceiling = 0;
        self.remaining = 0;
        self.multiplier = 1;
        self.discard = 0;
    }

    /// Primitive read: appends at most one byte towards `ceiling`.
    ///
    /// The inactivity timer restarts on every byte. A ceiling at or below the
    /// bytes already held is filled immediately without touching the stream.
    pub fn fill<T: Transport>(
        &mut self,
        buf: &mut [u8],
        ceiling: usize,
        transport: &mut T,
        now: Instant,
        timeout: Duration,
    ) -> Fill {
        let ceiling = ceiling.min(buf.len());
        if self.len >= ceiling {
            return Fill::Filled;
        }
        match self.pull(transport, now, timeout) {
            Some(Ok(byte)) => {
                buf[self.len] = byte;
                self.len += 1;
                if self.len >= ceiling {
                    Fill::Filled
                } else {
                    Fill::Waiting
                }
            }
            Some(Err(())) => Fill::Expired,
            None => Fill::Waiting,
        }
    }

    /// Full-packet read: advances the current frame by at most one byte.
    ///
    /// The fixed header and remaining-length bytes are stored at the front of
    /// `buf`, followed by as much of the payload as fits. Payload bytes beyond
    /// the buffer are read and dropped so the stream stays aligned on frame
    /// boundaries.
    pub fn poll<T: Transport>(
        &mut self,
        buf: &mut [u8],
        transport: &mut T,
        now: Instant,
        timeout: Duration,
    ) -> ReadProgress {
        if self.step == ReadStep::Idle {
            self.reset();
            self.last_byte.restart(now);
            self.step = ReadStep::FixedHeader;
        }

        match self.step {
            ReadStep::Idle => ReadProgress::Pending,
            ReadStep::FixedHeader => match self.fill(buf, 1, transport, now, timeout) {
                Fill::Filled if self.len == 1 => {
                    trace!("packet header {}", buf[0]);
                    self.step = ReadStep::RemainingLength;
                    ReadProgress::Pending
                }
                Fill::Filled => {
                    // zero-sized buffer
                    self.reset();
                    ReadProgress::Malformed
                }
                Fill::Waiting => ReadProgress::Pending,
                Fill::Expired => self.expire(),
            },
            ReadStep::RemainingLength => {
                if self.len >= buf.len() {
                    self.reset();
                    return ReadProgress::Malformed;
                }
                match self.fill(buf, self.len + 1, transport, now, timeout) {
                    Fill::Filled => self.length_byte(buf),
                    Fill::Waiting => ReadProgress::Pending,
                    Fill::Expired => self.expire(),
                }
            }
            ReadStep::Payload => match self.fill(buf, self.ceiling, transport, now, timeout) {
                Fill::Filled if self.discard > 0 => {
                    self.step = ReadStep::Discard;
                    ReadProgress::Pending
                }
                Fill::Filled => self.finish(),
                Fill::Waiting => ReadProgress::Pending,
                Fill::Expired => self.expire(),
            },
            ReadStep::Discard => match self.pull(transport, now, timeout) {
                Some(Ok(_)) => {
                    self.discard -= 1;
                    if self.discard == 0 {
                        self.finish()
                    } else {
                        ReadProgress::Pending
                    }
                }
                Some(Err(())) => self.expire(),
                None => ReadProgress::Pending,
            },
        }
    }

    fn length_byte(&mut self, buf: &[u8]) -> ReadProgress {
        let byte = buf[self.len - 1];
        self.remaining += (byte & 0x7F) as usize * self.multiplier;
        if byte & 0x80 != 0 {
            self.multiplier *= 128;
            if self.multiplier > MAX_MULTIPLIER {
                error!("malformed remaining length");
                self.reset();
                return ReadProgress::Malformed;
            }
            return ReadProgress::Pending;
        }

        let capacity = buf.len() - self.len;
        if self.remaining > capacity {
            warn!(
                "inbound packet of {} bytes truncated to {}",
                self.remaining, capacity
            );
            self.discard = self.remaining - capacity;
            self.ceiling = buf.len();
        } else {
            self.ceiling = self.len + self.remaining;
        }
        self.step = ReadStep::Payload;

        if self.len >= self.ceiling && self.discard == 0 {
            self.finish()
        } else {
            ReadProgress::Pending
        }
    }

    fn finish(&mut self) -> ReadProgress {
        let len = self.len;
        self.reset();
        ReadProgress::Complete(len)
    }

    fn expire(&mut self) -> ReadProgress {
        debug!("packet read timed out after {} bytes", self.len);
        self.reset();
        ReadProgress::TimedOut
    }

    /// Takes one byte from the stream if one is waiting.
    ///
    /// Returns `None` while waiting and `Some(Err(()))` once the inactivity
    /// limit has passed since the last byte.
    fn pull<T: Transport>(
        &mut self,
        transport: &mut T,
        now: Instant,
        timeout: Duration,
    ) -> Option<Result<u8, ()>> {
        if transport.available() > 0 {
            if let Some(byte) = transport.read_byte() {
                self.last_byte.restart(now);
                return Some(Ok(byte));
            }
        }
        if self.last_byte.exceeded(now, timeout) {
            Some(Err(()))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::vec::Vec;

    use super::*;
    use crate::transport::SocketHandle;

    #[derive(Default)]
    struct Stream {
        inbound: VecDeque<u8>,
    }

    impl Stream {
        fn with(bytes: &[u8]) -> Self {
            Self {
                inbound: bytes.iter().copied().collect(),
            }
        }
    }

    impl Transport for Stream {
        type Error = ();

        fn socket(&self) -> Option<SocketHandle> {
            Some(SocketHandle(0))
        }
        fn acquire_socket(&mut self) -> Option<SocketHandle> {
            Some(SocketHandle(0))
        }
        fn connect(&mut self, _: core::net::IpAddr, _: u16) -> Result<(), ()> {
            Ok(())
        }
        fn connected(&mut self) -> bool {
            true
        }
        fn available(&mut self) -> usize {
            self.inbound.len()
        }
        fn read_byte(&mut self) -> Option<u8> {
            self.inbound.pop_front()
        }
        fn write(&mut self, buf: &[u8]) -> Result<usize, ()> {
            Ok(buf.len())
        }
        fn close(&mut self) {}
        fn is_closed(&mut self) -> bool {
            true
        }
        fn release_socket(&mut self) {}
    }

    const TIMEOUT: Duration = Duration::from_millis(1000);

    fn drive(reader: &mut PacketReader, buf: &mut [u8], stream: &mut Stream) -> ReadProgress {
        let now = Instant::from_millis(10);
        for _ in 0..1000 {
            match reader.poll(buf, stream, now, TIMEOUT) {
                ReadProgress::Pending => continue,
                done => return done,
            }
        }
        ReadProgress::Pending
    }

    #[test]
    fn reads_a_whole_frame() {
        let frame = [0x30, 0x05, 0x00, 0x01, b't', b'h', b'i'];
        let mut stream = Stream::with(&frame);
        let mut reader = PacketReader::new();
        let mut buf = [0u8; 32];
        assert_eq!(drive(&mut reader, &mut buf, &mut stream), ReadProgress::Complete(7));
        assert_eq!(&buf[..7], &frame);
        assert!(reader.is_idle());
    }

    #[test]
    fn zero_remaining_length_completes_after_header() {
        let mut stream = Stream::with(&[0xD0, 0x00, 0x20]);
        let mut reader = PacketReader::new();
        let mut buf = [0u8; 8];
        assert_eq!(drive(&mut reader, &mut buf, &mut stream), ReadProgress::Complete(2));
        assert_eq!(&buf[..2], &[0xD0, 0x00]);
        assert_eq!(stream.inbound.len(), 1);
    }

    #[test]
    fn resumes_across_ticks() {
        let mut stream = Stream::default();
        let mut reader = PacketReader::new();
        let mut buf = [0u8; 8];
        let now = Instant::from_millis(0);

        assert_eq!(reader.poll(&mut buf, &mut stream, now, TIMEOUT), ReadProgress::Pending);
        stream.inbound.push_back(0x40);
        assert_eq!(reader.poll(&mut buf, &mut stream, now, TIMEOUT), ReadProgress::Pending);
        assert!(reader.has_partial_data());
        stream.inbound.extend([0x02, 0x00]);
        assert_eq!(reader.poll(&mut buf, &mut stream, now, TIMEOUT), ReadProgress::Pending);
        assert_eq!(reader.poll(&mut buf, &mut stream, now, TIMEOUT), ReadProgress::Pending);
        stream.inbound.push_back(0x09);
        assert_eq!(
            reader.poll(&mut buf, &mut stream, now, TIMEOUT),
            ReadProgress::Complete(4)
        );
        assert_eq!(&buf[..4], &[0x40, 0x02, 0x00, 0x09]);
    }

    #[test]
    fn silent_stream_times_out_and_returns_to_idle() {
        let mut stream = Stream::default();
        let mut reader = PacketReader::new();
        let mut buf = [0u8; 8];

        let start = Instant::from_millis(5_000);
        assert_eq!(reader.poll(&mut buf, &mut stream, start, TIMEOUT), ReadProgress::Pending);
        assert!(!reader.is_idle());
        assert_eq!(
            reader.poll(&mut buf, &mut stream, Instant::from_millis(6_000), TIMEOUT),
            ReadProgress::Pending
        );
        assert_eq!(
            reader.poll(&mut buf, &mut stream, Instant::from_millis(6_001), TIMEOUT),
            ReadProgress::TimedOut
        );
        assert!(reader.is_idle());
    }

    #[test]
    fn stalled_payload_times_out_without_reporting_partial_data() {
        let mut stream = Stream::with(&[0x30, 0x0A, 0x00]);
        let mut reader = PacketReader::new();
        let mut buf = [0u8; 32];
        let now = Instant::from_millis(0);
        for _ in 0..3 {
            assert_eq!(reader.poll(&mut buf, &mut stream, now, TIMEOUT), ReadProgress::Pending);
        }
        assert_eq!(
            reader.poll(&mut buf, &mut stream, Instant::from_millis(1_001), TIMEOUT),
            ReadProgress::TimedOut
        );
        assert!(!reader.has_partial_data());
    }

    #[test]
    fn continuation_on_fourth_length_byte_is_malformed() {
        let mut stream = Stream::with(&[0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
        let mut reader = PacketReader::new();
        let mut buf = [0u8; 16];
        assert_eq!(drive(&mut reader, &mut buf, &mut stream), ReadProgress::Malformed);
        assert!(reader.is_idle());
    }

    #[test]
    fn oversized_payload_is_truncated_and_drained() {
        let mut frame = Vec::from([0x30u8, 20, 0x00, 0x01, b't']);
        frame.extend(core::iter::repeat_n(b'x', 17));
        frame.push(0xD0);
        let mut stream = Stream::with(&frame);
        let mut reader = PacketReader::new();
        let mut buf = [0u8; 10];

        assert_eq!(drive(&mut reader, &mut buf, &mut stream), ReadProgress::Complete(10));
        assert_eq!(&buf[..5], &[0x30, 20, 0x00, 0x01, b't']);
        assert!(buf[5..].iter().all(|&b| b == b'x'));
        // the next frame starts cleanly
        assert_eq!(stream.inbound.iter().copied().collect::<Vec<_>>(), [0xD0]);
    }

    #[test]
    fn zero_ceiling_fill_completes_immediately() {
        let mut stream = Stream::with(&[0x01]);
        let mut reader = PacketReader::new();
        let mut buf = [0u8; 4];
        assert_eq!(
            reader.fill(&mut buf, 0, &mut stream, Instant::from_millis(0), TIMEOUT),
            Fill::Filled
        );
        assert_eq!(stream.inbound.len(), 1);
    }
}
