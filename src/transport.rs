//! # Transport Abstraction
//!
//! The client never blocks, so the transport is described by non-blocking
//! primitives only: start a connection and poll for it, check how many bytes
//! are waiting, read one byte, write a slice. Association with the access
//! point is a separate [`Station`] capability.
//!
//! Both traits are implemented for `&mut T`, so the caller may keep ownership
//! of the driver and hand the client a borrow.

use core::net::IpAddr;

/// Identifier of a socket slot in the network co-processor's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SocketHandle(pub u8);

/// A non-blocking byte stream to the broker, backed by a pooled socket.
pub trait Transport {
    /// The error type returned by the transport.
    type Error: core::fmt::Debug;

    /// The socket currently held, if any.
    fn socket(&self) -> Option<SocketHandle>;

    /// Requests a free socket from the pool and holds it.
    ///
    /// Returns `None` when the pool is exhausted.
    fn acquire_socket(&mut self) -> Option<SocketHandle>;

    /// Starts connecting the held socket. Completion is observed through
    /// [`connected`](Transport::connected).
    fn connect(&mut self, addr: IpAddr, port: u16) -> Result<(), Self::Error>;

    /// Whether the stream is established.
    fn connected(&mut self) -> bool;

    /// Number of bytes that can be read without waiting.
    fn available(&mut self) -> usize;

    /// Reads one byte. Only meaningful when [`available`](Transport::available)
    /// is non-zero.
    fn read_byte(&mut self) -> Option<u8>;

    /// Writes as much of `buf` as the driver accepts, returning the count.
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;

    /// Issues a close on the held socket. The close completes asynchronously.
    fn close(&mut self);

    /// Whether the held socket has finished closing.
    fn is_closed(&mut self) -> bool;

    /// Returns the held socket to the pool and forgets it.
    fn release_socket(&mut self);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    type Error = T::Error;

    fn socket(&self) -> Option<SocketHandle> {
        (**self).socket()
    }

    fn acquire_socket(&mut self) -> Option<SocketHandle> {
        (**self).acquire_socket()
    }

    fn connect(&mut self, addr: IpAddr, port: u16) -> Result<(), Self::Error> {
        (**self).connect(addr, port)
    }

    fn connected(&mut self) -> bool {
        (**self).connected()
    }

    fn available(&mut self) -> usize {
        (**self).available()
    }

    fn read_byte(&mut self) -> Option<u8> {
        (**self).read_byte()
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        (**self).write(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_closed(&mut self) -> bool {
        (**self).is_closed()
    }

    fn release_socket(&mut self) {
        (**self).release_socket()
    }
}

/// Wi-Fi association state reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkStatus {
    Idle,
    NoSsidAvailable,
    ScanCompleted,
    Connected,
    ConnectFailed,
    ConnectionLost,
    ApFailed,
    Failure,
    /// A driver-specific code outside the table above.
    Other(i8),
}

impl LinkStatus {
    /// Statuses that mean "still associating, keep waiting".
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Idle | Self::NoSsidAvailable | Self::ScanCompleted)
    }
}

/// A Wi-Fi station interface.
pub trait Station {
    /// The error type returned by the radio driver.
    type Error: core::fmt::Debug;

    /// Starts association with the given network.
    fn begin(&mut self, ssid: &str, passphrase: &str) -> Result<(), Self::Error>;

    /// Polls the association state.
    fn link_status(&mut self) -> LinkStatus;
}

impl<S: Station + ?Sized> Station for &mut S {
    type Error = S::Error;

    fn begin(&mut self, ssid: &str, passphrase: &str) -> Result<(), Self::Error> {
        (**self).begin(ssid, passphrase)
    }

    fn link_status(&mut self) -> LinkStatus {
        (**self).link_status()
    }
}
