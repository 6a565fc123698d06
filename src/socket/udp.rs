use core::cmp::min;
use core::fmt;
#[cfg(feature = "async")]
use core::task::Waker;

use crate::iface::Context;
use crate::socket::PollAt;
#[cfg(feature = "async")]
use crate::socket::WakerRegistration;
use crate::storage::{DatagramBuffer, Empty};
use crate::wire::{IpEndpoint, IpProtocol, Ipv4Address, Ipv4Repr, UdpRepr, UDP_MAX_PAYLOAD_LEN};

/// A UDP packet ring buffer, keyed by the peer endpoint of each datagram.
pub type PacketBuffer<'a> = DatagramBuffer<'a, IpEndpoint>;

/// Error returned by [`Socket::bind`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BindError {
    InvalidState,
    Unaddressable,
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::InvalidState => write!(f, "invalid state"),
            BindError::Unaddressable => write!(f, "unaddressable"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BindError {}

/// Error returned by [`Socket::end_packet`] and [`Socket::send_slice`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    Unaddressable,
    BufferFull,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Unaddressable => write!(f, "unaddressable"),
            SendError::BufferFull => write!(f, "buffer full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SendError {}

/// A User Datagram Protocol socket.
///
/// Received datagrams are staged whole in the receive buffer and handed to the
/// application one at a time through [`parse_packet`], after which its octets
/// are read with [`read`] or [`read_slice`]. Outgoing datagrams are assembled
/// with [`begin_packet`], [`write`] and [`end_packet`].
///
/// [`parse_packet`]: #method.parse_packet
/// [`read`]: #method.read
/// [`read_slice`]: #method.read_slice
/// [`begin_packet`]: #method.begin_packet
/// [`write`]: #method.write
/// [`end_packet`]: #method.end_packet
#[derive(Debug)]
pub struct Socket<'a> {
    local_port: u16,
    rx_buffer: PacketBuffer<'a>,
    tx_buffer: PacketBuffer<'a>,
    /// Peer of the datagram currently being read.
    rx_remote: Option<IpEndpoint>,
    /// Peer of the datagram currently being written.
    tx_remote: Option<IpEndpoint>,
    rx_dropped: u32,
    hop_limit: u8,
    #[cfg(feature = "async")]
    rx_waker: WakerRegistration,
    #[cfg(feature = "async")]
    tx_waker: WakerRegistration,
}

impl<'a> Socket<'a> {
    /// Create an UDP socket with the given buffers.
    pub fn new(rx_buffer: PacketBuffer<'a>, tx_buffer: PacketBuffer<'a>) -> Socket<'a> {
        Socket {
            local_port: 0,
            rx_buffer,
            tx_buffer,
            rx_remote: None,
            tx_remote: None,
            rx_dropped: 0,
            hop_limit: 64,
            #[cfg(feature = "async")]
            rx_waker: WakerRegistration::new(),
            #[cfg(feature = "async")]
            tx_waker: WakerRegistration::new(),
        }
    }

    /// Register a waker for receive operations.
    ///
    /// The waker is woken when a datagram is staged in the receive buffer.
    #[cfg(feature = "async")]
    pub fn register_recv_waker(&mut self, waker: &Waker) {
        self.rx_waker.register(waker)
    }

    /// Register a waker for send operations.
    ///
    /// The waker is woken when a staged datagram leaves the transmit buffer.
    #[cfg(feature = "async")]
    pub fn register_send_waker(&mut self, waker: &Waker) {
        self.tx_waker.register(waker)
    }

    /// Return the bound local port, or 0 if the socket is closed.
    #[inline]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Check whether the socket is open.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.local_port != 0
    }

    /// Set the time-to-live value of outgoing datagrams.
    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.hop_limit = hop_limit;
    }

    /// Bind the socket to the given local port.
    ///
    /// Returns `Err(BindError::Unaddressable)` for port 0, and
    /// `Err(BindError::InvalidState)` if the socket is already bound.
    pub fn bind(&mut self, port: u16) -> Result<(), BindError> {
        if port == 0 {
            return Err(BindError::Unaddressable);
        }
        if self.is_open() {
            return Err(BindError::InvalidState);
        }

        self.local_port = port;

        #[cfg(feature = "async")]
        {
            self.rx_waker.wake_all();
            self.tx_waker.wake_all();
        }

        Ok(())
    }

    /// Close the socket, dropping every staged datagram.
    pub fn close(&mut self) {
        self.local_port = 0;
        self.rx_buffer.reset();
        self.tx_buffer.reset();
        self.rx_remote = None;
        self.tx_remote = None;

        #[cfg(feature = "async")]
        {
            self.rx_waker.wake_all();
            self.tx_waker.wake_all();
        }
    }

    /// Return the number of received datagrams dropped for lack of room.
    pub fn dropped_count(&self) -> u32 {
        self.rx_dropped
    }

    /// Make the next received datagram current, discarding whatever was
    /// left unread of the previous one, and return its length.
    ///
    /// Returns 0 when no datagram is waiting.
    pub fn parse_packet(&mut self) -> usize {
        match self.rx_buffer.begin_dequeue() {
            Ok((remote, size)) => {
                net_trace!(
                    "udp:{}:{}: receive {} buffered octets",
                    self.local_port,
                    remote,
                    size
                );
                self.rx_remote = Some(remote);
                size
            }
            Err(Empty) => {
                self.rx_remote = None;
                0
            }
        }
    }

    /// Return the number of unread octets of the current datagram.
    pub fn available(&self) -> usize {
        self.rx_buffer.remaining()
    }

    /// Read one octet of the current datagram.
    pub fn read(&mut self) -> Option<u8> {
        let mut octet = [0];
        match self.rx_buffer.dequeue_payload(&mut octet) {
            1 => Some(octet[0]),
            _ => None,
        }
    }

    /// Read octets of the current datagram into `data`.
    ///
    /// Returns `None` once the current datagram is exhausted.
    pub fn read_slice(&mut self, data: &mut [u8]) -> Option<usize> {
        if self.rx_buffer.remaining() == 0 {
            return None;
        }
        Some(self.rx_buffer.dequeue_payload(data))
    }

    /// Return the next octet of the current datagram without consuming it.
    pub fn peek(&self) -> Option<u8> {
        self.rx_buffer.peek_payload()
    }

    /// Drop the unread rest of the current datagram.
    pub fn flush(&mut self) {
        self.rx_buffer.discard_current();
    }

    /// Return the sender of the current datagram.
    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.rx_remote
    }

    /// Check whether a received datagram is waiting to be parsed.
    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    /// Start assembling a datagram for `remote`.
    ///
    /// A datagram still being assembled is dropped.
    pub fn begin_packet(&mut self, remote: IpEndpoint) -> Result<(), SendError> {
        if !self.is_open() || remote.port == 0 || remote.addr.is_unspecified() {
            return Err(SendError::Unaddressable);
        }
        self.tx_buffer.abort();
        self.tx_remote = Some(remote);
        Ok(())
    }

    /// Append octets to the datagram being assembled; return the amount appended.
    ///
    /// A datagram never grows past [`UDP_MAX_PAYLOAD_LEN`] octets.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.tx_remote.is_none() {
            return 0;
        }
        let room = UDP_MAX_PAYLOAD_LEN - self.tx_buffer.pending_len();
        self.tx_buffer.append(&data[..min(room, data.len())])
    }

    /// Queue the assembled datagram for transmission.
    pub fn end_packet(&mut self) -> Result<(), SendError> {
        let remote = self.tx_remote.take().ok_or(SendError::Unaddressable)?;
        self.tx_buffer
            .commit(remote)
            .map_err(|_| SendError::BufferFull)?;
        net_trace!(
            "udp:{}:{}: buffer to send {} octets",
            self.local_port,
            remote,
            self.tx_buffer.peek_front().map(|(_, size)| size).unwrap_or(0)
        );
        Ok(())
    }

    /// Queue a whole datagram for transmission to `remote`.
    pub fn send_slice(&mut self, data: &[u8], remote: IpEndpoint) -> Result<(), SendError> {
        if data.len() > UDP_MAX_PAYLOAD_LEN || !self.tx_buffer.can_enqueue(data.len()) {
            return Err(SendError::BufferFull);
        }
        self.begin_packet(remote)?;
        self.write(data);
        self.end_packet()
    }

    /// Check whether the transmit buffer has room for another datagram.
    pub fn can_send(&self) -> bool {
        self.tx_buffer.can_enqueue(0)
    }

    pub(crate) fn accepts(&self, cx: &mut Context, ip_repr: &Ipv4Repr, repr: &UdpRepr) -> bool {
        if !self.is_open() || repr.dst_port != self.local_port {
            return false;
        }
        match cx.ipv4_addr() {
            Some(addr) => ip_repr.dst_addr == addr || ip_repr.dst_addr.is_broadcast(),
            None => ip_repr.dst_addr.is_broadcast(),
        }
    }

    pub(crate) fn process(
        &mut self,
        _cx: &mut Context,
        ip_repr: &Ipv4Repr,
        repr: &UdpRepr,
        payload: &[u8],
    ) {
        let remote = IpEndpoint::new(ip_repr.src_addr, repr.src_port);

        if payload.len() > UDP_MAX_PAYLOAD_LEN || self.rx_buffer.enqueue_slice(remote, payload).is_err() {
            self.rx_dropped = self.rx_dropped.wrapping_add(1);
            net_debug!(
                "udp:{}:{}: dropped {} octets, receive buffer full",
                self.local_port,
                remote,
                payload.len()
            );
            return;
        }

        net_trace!(
            "udp:{}:{}: receiving {} octets",
            self.local_port,
            remote,
            payload.len()
        );

        #[cfg(feature = "async")]
        self.rx_waker.wake_all();
    }

    pub(crate) fn dispatch<F, E>(&mut self, cx: &mut Context, emit: F) -> Result<(), E>
    where
        F: FnOnce(&mut Context, (Ipv4Repr, UdpRepr, &[u8])) -> Result<(), E>,
    {
        let (remote, size) = match self.tx_buffer.peek_front() {
            Ok(front) => front,
            Err(Empty) => return Ok(()),
        };
        let src_addr = match cx.ipv4_addr() {
            Some(addr) => addr,
            None if remote.addr.is_broadcast() => Ipv4Address::UNSPECIFIED,
            None => {
                net_trace!("udp:{}: no address configured, holding datagram", self.local_port);
                return Ok(());
            }
        };

        let mut payload = [0u8; UDP_MAX_PAYLOAD_LEN];
        let size = self.tx_buffer.read_front(&mut payload[..min(size, UDP_MAX_PAYLOAD_LEN)]);

        net_trace!(
            "udp:{}:{}: sending {} octets",
            self.local_port,
            remote,
            size
        );

        let udp_repr = UdpRepr {
            src_port: self.local_port,
            dst_port: remote.port,
        };
        let ip_repr = Ipv4Repr {
            src_addr,
            dst_addr: remote.addr,
            next_header: IpProtocol::Udp,
            payload_len: udp_repr.header_len() + size,
            hop_limit: self.hop_limit,
        };

        emit(cx, (ip_repr, udp_repr, &payload[..size]))?;
        let consumed = self.tx_buffer.drop_front();
        debug_assert!(consumed.is_ok());

        #[cfg(feature = "async")]
        self.tx_waker.wake_all();

        Ok(())
    }

    pub(crate) fn poll_at(&self, _cx: &mut Context) -> PollAt {
        if self.tx_buffer.is_empty() {
            PollAt::Ingress
        } else {
            PollAt::Now
        }
    }
}
