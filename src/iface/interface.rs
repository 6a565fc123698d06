// Heads up! Before working on this file you should read the parts
// of RFC 1122 that discuss Ethernet, ARP and IP for any IPv4 work.

use core::fmt;

use super::neighbor::{Answer as NeighborAnswer, Cache as NeighborCache};
use super::socket_set::SocketSet;
use crate::phy::Device;
use crate::socket::{PollAt, Socket};
use crate::time::{Duration, Instant};
use crate::wire::{
    ArpOperation, ArpPacket, ArpRepr, DhcpPacket, DhcpRepr, DnsPacket, DnsRepr, EthernetAddress,
    EthernetFrame, EthernetProtocol, EthernetRepr, IpProtocol, Ipv4Address, Ipv4Packet, Ipv4Repr,
    UdpPacket, UdpRepr, ETHERNET_MAX_FRAME_LEN, UDP_HEADER_LEN,
};

macro_rules! check {
    ($e:expr) => {
        match $e {
            Ok(x) => x,
            Err(_) => {
                // concat!/stringify! doesn't work with defmt macros
                #[cfg(not(feature = "defmt"))]
                net_trace!(concat!("iface: malformed ", stringify!($e)));
                #[cfg(feature = "defmt")]
                net_trace!("iface: malformed");
                return Default::default();
            }
        }
    };
}

/// Configuration structure used for creating a network interface.
#[non_exhaustive]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// Set the Hardware address the interface will use.
    pub hardware_addr: EthernetAddress,
}

impl Config {
    pub fn new(hardware_addr: EthernetAddress) -> Self {
        Config { hardware_addr }
    }
}

/// IPv4 configuration of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct Ipv4Config {
    address: Ipv4Address,
    subnet_mask: Ipv4Address,
    gateway: Option<Ipv4Address>,
}

/// A network interface.
///
/// The network interface logically owns a number of other data structures; to avoid
/// a dependency on heap allocation, it instead owns a `BorrowMut<[T]>`, which can be
/// a `&mut [T]`, or `Vec<T>` if a heap is available.
#[derive(Debug)]
pub struct Interface {
    inner: InterfaceInner,
    rx_buffer: [u8; ETHERNET_MAX_FRAME_LEN],
    tx_buffer: [u8; ETHERNET_MAX_FRAME_LEN],
}

/// The device independent part of an Ethernet network interface.
///
/// Separating the device from the data required for processing and dispatching makes
/// it possible to borrow them independently. For example, the tx and rx tokens borrow
/// the `device` mutably until they're used, which makes it impossible to call other
/// methods on the `Interface` in this time (since its `device` field is borrowed
/// exclusively). However, it is still possible to call methods on its `inner` field.
///
/// Sockets see it as [`Context`](type.Context.html).
#[derive(Debug)]
pub struct InterfaceInner {
    now: Instant,
    hardware_addr: EthernetAddress,
    ipv4: Option<Ipv4Config>,
    neighbor_cache: NeighborCache,
    mtu: usize,
}

/// Error of dispatching one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum DispatchError {
    /// The device refused the frame.
    Exhausted,
    /// The next hop has no known hardware address yet; a request was made.
    NeighborPending(Ipv4Address),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DispatchError::Exhausted => write!(f, "device exhausted"),
            DispatchError::NeighborPending(addr) => write!(f, "neighbor {} pending", addr),
        }
    }
}

/// A packet a socket asked to send.
#[derive(Debug)]
pub(crate) enum Packet<'p> {
    Udp((Ipv4Repr, UdpRepr, &'p [u8])),
    Dhcpv4((Ipv4Repr, UdpRepr, DhcpRepr<'p>)),
    Dns((Ipv4Repr, UdpRepr, DnsRepr<'p>)),
}

impl<'p> Packet<'p> {
    fn ip_repr(&self) -> &Ipv4Repr {
        match self {
            Packet::Udp((ip_repr, _, _)) => ip_repr,
            Packet::Dhcpv4((ip_repr, _, _)) => ip_repr,
            Packet::Dns((ip_repr, _, _)) => ip_repr,
        }
    }

    fn udp_repr(&self) -> &UdpRepr {
        match self {
            Packet::Udp((_, udp_repr, _)) => udp_repr,
            Packet::Dhcpv4((_, udp_repr, _)) => udp_repr,
            Packet::Dns((_, udp_repr, _)) => udp_repr,
        }
    }

    /// Write the UDP payload; `buffer` is exactly as long as announced.
    fn emit_payload(&self, buffer: &mut [u8]) {
        match self {
            Packet::Udp((_, _, payload)) => buffer.copy_from_slice(payload),
            Packet::Dhcpv4((_, _, dhcp_repr)) => {
                let mut packet = DhcpPacket::new_unchecked(buffer);
                if dhcp_repr.emit(&mut packet).is_err() {
                    net_debug!("iface: DHCP options do not fit");
                }
            }
            Packet::Dns((_, _, dns_repr)) => {
                let mut packet = DnsPacket::new_unchecked(buffer);
                dns_repr.emit(&mut packet);
            }
        }
    }
}

impl Interface {
    /// Create a network interface using the previously provided configuration.
    ///
    /// The interface starts without an IPv4 address; it accepts DHCP
    /// replies until one is configured.
    pub fn new<D>(config: Config, device: &mut D, now: Instant) -> Self
    where
        D: Device + ?Sized,
    {
        let caps = device.capabilities();
        let mut inner = InterfaceInner::new(config.hardware_addr);
        inner.now = now;
        inner.mtu = caps.max_transmission_unit.min(ETHERNET_MAX_FRAME_LEN);

        Interface {
            inner,
            rx_buffer: [0; ETHERNET_MAX_FRAME_LEN],
            tx_buffer: [0; ETHERNET_MAX_FRAME_LEN],
        }
    }

    /// Get the socket context.
    ///
    /// The context is needed for some socket methods.
    pub fn context(&mut self) -> &mut InterfaceInner {
        &mut self.inner
    }

    /// Get the hardware address of the interface.
    pub fn hardware_addr(&self) -> EthernetAddress {
        self.inner.hardware_addr
    }

    /// Set the hardware address of the interface.
    ///
    /// # Panics
    /// This function panics if the address is not unicast.
    pub fn set_hardware_addr(&mut self, addr: EthernetAddress) {
        InterfaceInner::check_hardware_addr(&addr);
        self.inner.hardware_addr = addr;
        self.inner.neighbor_cache.flush();
    }

    /// Get the configured IPv4 address, if any.
    pub fn ipv4_addr(&self) -> Option<Ipv4Address> {
        self.inner.ipv4_addr()
    }

    pub fn subnet_mask(&self) -> Option<Ipv4Address> {
        self.inner.subnet_mask()
    }

    pub fn gateway(&self) -> Option<Ipv4Address> {
        self.inner.gateway()
    }

    /// Configure the IPv4 address, subnet mask and default gateway.
    pub fn set_ipv4_config(
        &mut self,
        address: Ipv4Address,
        subnet_mask: Ipv4Address,
        gateway: Option<Ipv4Address>,
    ) {
        self.inner.set_ipv4_config(address, subnet_mask, gateway)
    }

    /// Drop the IPv4 configuration.
    pub fn clear_ipv4_config(&mut self) {
        self.inner.clear_ipv4_config()
    }

    /// Transmit packets queued in the given sockets, and receive packets queued
    /// in the device.
    ///
    /// This function returns a boolean value indicating whether any packets were
    /// processed or emitted, and thus, whether the readiness of any socket might
    /// have changed.
    pub fn poll<D>(&mut self, timestamp: Instant, device: &mut D, sockets: &mut SocketSet<'_>) -> bool
    where
        D: Device + ?Sized,
    {
        self.inner.now = timestamp;

        let mut readiness_may_have_changed = false;

        loop {
            let processed_any = self.socket_ingress(device, sockets);
            let emitted_any = self.socket_egress(device, sockets);

            if processed_any || emitted_any {
                readiness_may_have_changed = true;
            } else {
                break;
            }
        }

        readiness_may_have_changed
    }

    /// Return a _soft deadline_ for calling [poll] the next time.
    /// The [Instant] returned is the time at which you should call [poll] next.
    /// It is harmless (but wastes energy) to call it before the [Instant], and
    /// potentially harmful (impacting quality of service) to call it after the
    /// [Instant]
    ///
    /// [poll]: #method.poll
    /// [Instant]: struct.Instant.html
    pub fn poll_at(&mut self, timestamp: Instant, sockets: &SocketSet<'_>) -> Option<Instant> {
        self.inner.now = timestamp;

        let inner = &mut self.inner;

        sockets
            .items()
            .filter_map(move |item| {
                let socket_poll_at = item.socket.poll_at(inner);
                match item
                    .meta
                    .poll_at(socket_poll_at, |ip_addr| inner.has_neighbor(&ip_addr))
                {
                    PollAt::Ingress => None,
                    PollAt::Time(instant) => Some(instant),
                    PollAt::Now => Some(Instant::ZERO),
                }
            })
            .min()
    }

    /// Return an _advisory wait time_ for calling [poll] the next time.
    /// The [Duration] returned is the time left to wait before calling [poll] next.
    /// It is harmless (but wastes energy) to call it before the [Duration] has passed,
    /// and potentially harmful (impacting quality of service) to call it after the
    /// [Duration] has passed.
    ///
    /// [poll]: #method.poll
    /// [Duration]: struct.Duration.html
    pub fn poll_delay(&mut self, timestamp: Instant, sockets: &SocketSet<'_>) -> Option<Duration> {
        match self.poll_at(timestamp, sockets) {
            Some(poll_at) if timestamp < poll_at => Some(poll_at - timestamp),
            Some(_) => Some(Duration::ZERO),
            _ => None,
        }
    }

    fn socket_ingress<D>(&mut self, device: &mut D, sockets: &mut SocketSet<'_>) -> bool
    where
        D: Device + ?Sized,
    {
        let Interface {
            inner,
            rx_buffer,
            tx_buffer,
        } = self;

        let mut processed_any = false;
        while let Some(len) = device.receive(&mut rx_buffer[..]) {
            processed_any = true;
            let frame = &rx_buffer[..len.min(ETHERNET_MAX_FRAME_LEN)];

            if let Some((dst_addr, arp_repr)) = inner.process_ethernet(sockets, frame) {
                if let Err(err) = inner.dispatch_arp(device, tx_buffer, dst_addr, &arp_repr) {
                    net_debug!("Failed to send response: {}", err);
                }
            }
        }
        processed_any
    }

    fn socket_egress<D>(&mut self, device: &mut D, sockets: &mut SocketSet<'_>) -> bool
    where
        D: Device + ?Sized,
    {
        let Interface {
            inner, tx_buffer, ..
        } = self;
        let now = inner.now;

        let mut emitted_any = false;
        for item in sockets.items_mut() {
            if let Some(neighbor) = item.meta.neighbor_timed_out(now) {
                match &mut item.socket {
                    Socket::Dns(socket) => socket.arp_timeout(now),
                    _ => net_debug!("{}: still no route to {}", item.meta.handle, neighbor),
                }
            }

            if !item
                .meta
                .egress_permitted(now, |ip_addr| inner.has_neighbor(&ip_addr))
            {
                continue;
            }

            let mut emitted = false;
            let mut respond =
                |inner: &mut InterfaceInner, packet: Packet| -> Result<(), DispatchError> {
                    inner.dispatch_ip(device, tx_buffer, packet)?;
                    emitted = true;
                    Ok(())
                };

            let result = match &mut item.socket {
                Socket::Udp(socket) => {
                    socket.dispatch(inner, |inner, packet| respond(inner, Packet::Udp(packet)))
                }
                Socket::Dhcpv4(socket) => {
                    socket.dispatch(inner, |inner, packet| respond(inner, Packet::Dhcpv4(packet)))
                }
                Socket::Dns(socket) => {
                    socket.dispatch(inner, |inner, packet| respond(inner, Packet::Dns(packet)))
                }
            };

            match result {
                Err(DispatchError::Exhausted) => break, // Device buffer full.
                Err(DispatchError::NeighborPending(neighbor)) => {
                    // If we've just started waiting for a neighbor, or have
                    // just retried, silence the socket for a while.
                    item.meta.neighbor_missing(now, neighbor);
                }
                Ok(()) => {}
            }
            emitted_any |= emitted;
        }
        emitted_any
    }
}

impl InterfaceInner {
    /// Create a context for the interface with the given hardware address.
    pub(crate) fn new(hardware_addr: EthernetAddress) -> Self {
        InterfaceInner {
            now: Instant::ZERO,
            hardware_addr,
            ipv4: None,
            neighbor_cache: NeighborCache::new(),
            mtu: ETHERNET_MAX_FRAME_LEN,
        }
    }

    #[allow(unused)] // unused depending on which sockets are enabled
    pub(crate) fn set_now(&mut self, now: Instant) {
        self.now = now
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn hardware_addr(&self) -> EthernetAddress {
        self.hardware_addr
    }

    /// Get the configured IPv4 address, if any.
    pub fn ipv4_addr(&self) -> Option<Ipv4Address> {
        self.ipv4.map(|config| config.address)
    }

    pub fn subnet_mask(&self) -> Option<Ipv4Address> {
        self.ipv4.map(|config| config.subnet_mask)
    }

    pub fn gateway(&self) -> Option<Ipv4Address> {
        self.ipv4.and_then(|config| config.gateway)
    }

    pub(crate) fn set_ipv4_config(
        &mut self,
        address: Ipv4Address,
        subnet_mask: Ipv4Address,
        gateway: Option<Ipv4Address>,
    ) {
        net_debug!(
            "iface: address {} mask {} gateway {:?}",
            address,
            subnet_mask,
            gateway
        );
        self.ipv4 = Some(Ipv4Config {
            address,
            subnet_mask,
            gateway,
        });
    }

    pub(crate) fn clear_ipv4_config(&mut self) {
        if self.ipv4.take().is_some() {
            net_debug!("iface: address removed");
        }
        self.neighbor_cache.flush();
    }

    fn check_hardware_addr(addr: &EthernetAddress) {
        if !addr.is_unicast() {
            panic!("Hardware address {} is not unicast", addr)
        }
    }

    /// Check whether `addr` is the limited broadcast or our subnet's broadcast address.
    pub(crate) fn is_broadcast(&self, addr: &Ipv4Address) -> bool {
        if addr.is_broadcast() {
            return true;
        }
        match self.ipv4 {
            Some(config) => {
                let host_mask = !config.subnet_mask.to_bits();
                host_mask != 0
                    && addr.same_subnet(&config.address, &config.subnet_mask)
                    && addr.to_bits() & host_mask == host_mask
            }
            None => false,
        }
    }

    /// Return the next hop toward `addr`.
    fn route(&self, addr: &Ipv4Address) -> Option<Ipv4Address> {
        let config = self.ipv4?;
        if addr.same_subnet(&config.address, &config.subnet_mask) {
            Some(*addr)
        } else {
            config.gateway
        }
    }

    pub(crate) fn has_neighbor(&self, addr: &Ipv4Address) -> bool {
        if self.is_broadcast(addr) {
            return true;
        }
        match self.route(addr) {
            Some(next_hop) => self.neighbor_cache.lookup(&next_hop, self.now).found(),
            None => false,
        }
    }

    /// Process one received frame; return an ARP reply to send, if any.
    pub(crate) fn process_ethernet(
        &mut self,
        sockets: &mut SocketSet<'_>,
        frame: &[u8],
    ) -> Option<(EthernetAddress, ArpRepr)> {
        let eth_frame = check!(EthernetFrame::new_checked(frame));

        // Ignore any packets not directed to our hardware address or any of the multicast groups.
        if !eth_frame.dst_addr().is_broadcast() && eth_frame.dst_addr() != self.hardware_addr {
            return None;
        }

        match eth_frame.ethertype() {
            EthernetProtocol::Arp => self.process_arp(eth_frame.payload()),
            EthernetProtocol::Ipv4 => {
                self.process_ipv4(sockets, eth_frame.src_addr(), eth_frame.payload());
                None
            }
            // Drop all other traffic.
            _ => None,
        }
    }

    fn process_arp(&mut self, payload: &[u8]) -> Option<(EthernetAddress, ArpRepr)> {
        let arp_packet = check!(ArpPacket::new_checked(payload));
        let arp_repr = check!(ArpRepr::parse(&arp_packet));

        let our_addr = self.ipv4_addr()?;

        // Only process ARP packets for us.
        if arp_repr.target_protocol_addr != our_addr {
            return None;
        }

        // Only process REQUEST and RESPONSE.
        if let ArpOperation::Unknown(_) = arp_repr.operation {
            net_debug!("arp: unknown operation code");
            return None;
        }

        // Discard packets with non-unicast source addresses.
        if !arp_repr.source_protocol_addr.is_unicast()
            || !arp_repr.source_hardware_addr.is_unicast()
        {
            net_debug!("arp: non-unicast source address");
            return None;
        }

        self.neighbor_cache.fill(
            arp_repr.source_protocol_addr,
            arp_repr.source_hardware_addr,
            self.now,
        );

        if arp_repr.operation == ArpOperation::Request {
            Some((
                arp_repr.source_hardware_addr,
                ArpRepr {
                    operation: ArpOperation::Reply,
                    source_hardware_addr: self.hardware_addr,
                    source_protocol_addr: our_addr,
                    target_hardware_addr: arp_repr.source_hardware_addr,
                    target_protocol_addr: arp_repr.source_protocol_addr,
                },
            ))
        } else {
            None
        }
    }

    fn process_ipv4(
        &mut self,
        sockets: &mut SocketSet<'_>,
        src_hardware_addr: EthernetAddress,
        payload: &[u8],
    ) {
        let ipv4_packet = check!(Ipv4Packet::new_checked(payload));
        let ip_repr = check!(Ipv4Repr::parse(&ipv4_packet));

        if ip_repr.next_header != IpProtocol::Udp {
            net_trace!("iface: ignoring {} packet", ip_repr.next_header);
            return;
        }

        let udp_packet = check!(UdpPacket::new_checked(ipv4_packet.payload()));
        let udp_repr = check!(UdpRepr::parse(
            &udp_packet,
            &ip_repr.src_addr,
            &ip_repr.dst_addr
        ));
        let udp_payload = udp_packet.payload();

        // Replies to DHCP are taken before an address is configured.
        let for_us = match self.ipv4_addr() {
            Some(addr) => ip_repr.dst_addr == addr || self.is_broadcast(&ip_repr.dst_addr),
            None => false,
        };

        for item in sockets.items_mut() {
            match &mut item.socket {
                Socket::Dhcpv4(socket) => {
                    socket.process(self, &ip_repr, src_hardware_addr, &udp_repr, udp_payload)
                }
                Socket::Dns(socket) if for_us => {
                    socket.process(self, &ip_repr, &udp_repr, udp_payload)
                }
                Socket::Udp(socket) if socket.accepts(self, &ip_repr, &udp_repr) => {
                    socket.process(self, &ip_repr, &udp_repr, udp_payload)
                }
                _ => {}
            }
        }
    }

    /// Resolve the hardware address for `dst_addr`, sending a request if needed.
    fn lookup_hardware_addr<D>(
        &mut self,
        device: &mut D,
        tx_buffer: &mut [u8],
        dst_addr: &Ipv4Address,
    ) -> Result<Option<EthernetAddress>, DispatchError>
    where
        D: Device + ?Sized,
    {
        if self.is_broadcast(dst_addr) {
            return Ok(Some(EthernetAddress::BROADCAST));
        }

        let (next_hop, src_addr) = match (self.route(dst_addr), self.ipv4_addr()) {
            (Some(next_hop), Some(src_addr)) => (next_hop, src_addr),
            _ => {
                net_debug!("iface: no route to {}", dst_addr);
                return Ok(None);
            }
        };

        match self.neighbor_cache.lookup(&next_hop, self.now) {
            NeighborAnswer::Found(hardware_addr) => return Ok(Some(hardware_addr)),
            NeighborAnswer::RateLimited => return Err(DispatchError::NeighborPending(next_hop)),
            NeighborAnswer::NotFound => {}
        }

        net_debug!(
            "address {} not in neighbor cache, sending ARP request",
            next_hop
        );
        let arp_repr = ArpRepr {
            operation: ArpOperation::Request,
            source_hardware_addr: self.hardware_addr,
            source_protocol_addr: src_addr,
            target_hardware_addr: EthernetAddress([0; 6]),
            target_protocol_addr: next_hop,
        };
        self.dispatch_arp(device, tx_buffer, EthernetAddress::BROADCAST, &arp_repr)?;
        self.neighbor_cache.limit_rate(self.now);

        Err(DispatchError::NeighborPending(next_hop))
    }

    fn dispatch_arp<D>(
        &mut self,
        device: &mut D,
        tx_buffer: &mut [u8],
        dst_hardware_addr: EthernetAddress,
        arp_repr: &ArpRepr,
    ) -> Result<(), DispatchError>
    where
        D: Device + ?Sized,
    {
        let eth_repr = EthernetRepr {
            src_addr: self.hardware_addr,
            dst_addr: dst_hardware_addr,
            ethertype: EthernetProtocol::Arp,
        };
        let total_len = eth_repr.buffer_len() + arp_repr.buffer_len();
        let frame_buffer = &mut tx_buffer[..total_len];

        let mut frame = EthernetFrame::new_unchecked(&mut *frame_buffer);
        eth_repr.emit(&mut frame);
        arp_repr.emit(&mut ArpPacket::new_unchecked(frame.payload_mut()));

        device
            .transmit(frame_buffer)
            .map_err(|_| DispatchError::Exhausted)
    }

    pub(crate) fn dispatch_ip<D>(
        &mut self,
        device: &mut D,
        tx_buffer: &mut [u8],
        packet: Packet,
    ) -> Result<(), DispatchError>
    where
        D: Device + ?Sized,
    {
        let ip_repr = *packet.ip_repr();
        let udp_repr = *packet.udp_repr();

        let dst_hardware_addr =
            match self.lookup_hardware_addr(device, tx_buffer, &ip_repr.dst_addr)? {
                Some(addr) => addr,
                None => return Ok(()),
            };

        let eth_repr = EthernetRepr {
            src_addr: self.hardware_addr,
            dst_addr: dst_hardware_addr,
            ethertype: EthernetProtocol::Ipv4,
        };
        let total_len = eth_repr.buffer_len() + ip_repr.buffer_len() + ip_repr.payload_len;
        if total_len > self.mtu {
            net_debug!("iface: dropping {} octet frame, over the MTU", total_len);
            return Ok(());
        }
        let frame_buffer = &mut tx_buffer[..total_len];

        let mut frame = EthernetFrame::new_unchecked(&mut *frame_buffer);
        eth_repr.emit(&mut frame);

        let mut ip_packet = Ipv4Packet::new_unchecked(frame.payload_mut());
        ip_repr.emit(&mut ip_packet);

        let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
        udp_repr.emit(
            &mut udp_packet,
            &ip_repr.src_addr,
            &ip_repr.dst_addr,
            ip_repr.payload_len - UDP_HEADER_LEN,
            |buffer| packet.emit_payload(buffer),
        );

        net_trace!("iface: sending {} {}", ip_repr, udp_repr);
        device
            .transmit(frame_buffer)
            .map_err(|_| DispatchError::Exhausted)
    }
}

#[cfg(test)]
mod test {
    use std::collections::VecDeque;
    use std::vec::Vec;

    use super::*;
    use crate::iface::SocketStorage;
    use crate::phy::{self, DeviceCapabilities};
    use crate::socket::{dns, udp};
    use crate::storage::DEFAULT_PAYLOAD_CAPACITY;
    use crate::wire::IpEndpoint;

    const MY_MAC: EthernetAddress = EthernetAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
    const PEER_MAC: EthernetAddress = EthernetAddress([0x52, 0x54, 0x00, 0x00, 0x00, 0x02]);
    const MY_IP: Ipv4Address = Ipv4Address([192, 168, 1, 50]);
    const PEER_IP: Ipv4Address = Ipv4Address([192, 168, 1, 2]);
    const GATEWAY: Ipv4Address = Ipv4Address([192, 168, 1, 1]);
    const MASK: Ipv4Address = Ipv4Address([255, 255, 255, 0]);

    #[derive(Default)]
    struct Loopback {
        rx: VecDeque<Vec<u8>>,
        tx: Vec<Vec<u8>>,
    }

    impl Device for Loopback {
        fn receive(&mut self, buffer: &mut [u8]) -> Option<usize> {
            let frame = self.rx.pop_front()?;
            buffer[..frame.len()].copy_from_slice(&frame);
            Some(frame.len())
        }

        fn transmit(&mut self, frame: &[u8]) -> Result<(), phy::Error> {
            self.tx.push(frame.to_vec());
            Ok(())
        }

        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities::default()
        }
    }

    fn create() -> (Interface, Loopback) {
        let mut device = Loopback::default();
        let mut iface = Interface::new(Config::new(MY_MAC), &mut device, Instant::ZERO);
        iface.set_ipv4_config(MY_IP, MASK, Some(GATEWAY));
        (iface, device)
    }

    fn arp_frame(operation: ArpOperation, target_hardware_addr: EthernetAddress) -> Vec<u8> {
        let arp_repr = ArpRepr {
            operation,
            source_hardware_addr: PEER_MAC,
            source_protocol_addr: PEER_IP,
            target_hardware_addr,
            target_protocol_addr: MY_IP,
        };
        let eth_repr = EthernetRepr {
            src_addr: PEER_MAC,
            dst_addr: EthernetAddress::BROADCAST,
            ethertype: EthernetProtocol::Arp,
        };
        let mut bytes = vec![0; eth_repr.buffer_len() + arp_repr.buffer_len()];
        let mut frame = EthernetFrame::new_unchecked(&mut bytes[..]);
        eth_repr.emit(&mut frame);
        arp_repr.emit(&mut ArpPacket::new_unchecked(frame.payload_mut()));
        bytes
    }

    fn udp_frame(dst_addr: Ipv4Address, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let udp_repr = UdpRepr {
            src_port: 4000,
            dst_port,
        };
        let ip_repr = Ipv4Repr {
            src_addr: PEER_IP,
            dst_addr,
            next_header: IpProtocol::Udp,
            payload_len: UDP_HEADER_LEN + payload.len(),
            hop_limit: 64,
        };
        let eth_repr = EthernetRepr {
            src_addr: PEER_MAC,
            dst_addr: MY_MAC,
            ethertype: EthernetProtocol::Ipv4,
        };
        let mut bytes = vec![0; 14 + 20 + ip_repr.payload_len];
        let mut frame = EthernetFrame::new_unchecked(&mut bytes[..]);
        eth_repr.emit(&mut frame);
        let mut ip_packet = Ipv4Packet::new_unchecked(frame.payload_mut());
        ip_repr.emit(&mut ip_packet);
        let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
        udp_repr.emit(
            &mut udp_packet,
            &PEER_IP,
            &dst_addr,
            payload.len(),
            |buf| buf.copy_from_slice(payload),
        );
        bytes
    }

    fn udp_buffer() -> udp::PacketBuffer<'static> {
        let unspecified = IpEndpoint::new(Ipv4Address::UNSPECIFIED, 0);
        udp::PacketBuffer::new(
            vec![unspecified; 4],
            vec![0; 8],
            vec![0; DEFAULT_PAYLOAD_CAPACITY],
        )
    }

    #[test]
    fn test_answer_arp_request() {
        let (mut iface, mut device) = create();
        let mut sockets = SocketSet::new(vec![]);

        device.rx.push_back(arp_frame(ArpOperation::Request, EthernetAddress([0; 6])));
        assert!(iface.poll(Instant::ZERO, &mut device, &mut sockets));

        assert_eq!(device.tx.len(), 1);
        let frame = EthernetFrame::new_checked(&device.tx[0][..]).unwrap();
        assert_eq!(frame.dst_addr(), PEER_MAC);
        let reply = ArpRepr::parse(&ArpPacket::new_checked(frame.payload()).unwrap()).unwrap();
        assert_eq!(reply.operation, ArpOperation::Reply);
        assert_eq!(reply.source_hardware_addr, MY_MAC);
        assert_eq!(reply.source_protocol_addr, MY_IP);
        assert_eq!(reply.target_protocol_addr, PEER_IP);

        // the requester was learned
        assert!(iface.context().has_neighbor(&PEER_IP));
    }

    #[test]
    fn test_arp_for_other_host_ignored() {
        let mut device = Loopback::default();
        let mut iface = Interface::new(Config::new(MY_MAC), &mut device, Instant::ZERO);
        iface.set_ipv4_config(Ipv4Address::new(192, 168, 1, 99), MASK, None);
        let mut sockets = SocketSet::new(vec![]);

        device.rx.push_back(arp_frame(ArpOperation::Request, EthernetAddress([0; 6])));
        iface.poll(Instant::ZERO, &mut device, &mut sockets);
        assert!(device.tx.is_empty());
    }

    #[test]
    fn test_udp_ingress_and_egress_through_arp() {
        let (mut iface, mut device) = create();
        let mut sockets = SocketSet::new(vec![]);
        let mut socket = udp::Socket::new(udp_buffer(), udp_buffer());
        socket.bind(5000).unwrap();
        let handle = sockets.add(socket);

        device.rx.push_back(udp_frame(MY_IP, 5000, b"hello"));
        device.rx.push_back(udp_frame(Ipv4Address::new(192, 168, 1, 77), 5000, b"other"));
        device.rx.push_back(udp_frame(MY_IP, 5001, b"wrong port"));
        iface.poll(Instant::ZERO, &mut device, &mut sockets);

        let socket = sockets.get_mut::<udp::Socket>(handle);
        assert_eq!(socket.parse_packet(), 5);
        assert_eq!(socket.remote_endpoint(), Some(IpEndpoint::new(PEER_IP, 4000)));
        assert_eq!(socket.parse_packet(), 0);

        socket
            .send_slice(b"world", IpEndpoint::new(PEER_IP, 4000))
            .unwrap();
        iface.poll(Instant::ZERO, &mut device, &mut sockets);

        // an ARP request goes out first, and the datagram waits
        assert_eq!(device.tx.len(), 1);
        let frame = EthernetFrame::new_checked(&device.tx[0][..]).unwrap();
        assert_eq!(frame.ethertype(), EthernetProtocol::Arp);
        assert_eq!(
            iface.poll_at(Instant::ZERO, &sockets),
            Some(Instant::from_millis(1000))
        );

        device.rx.push_back(arp_frame(ArpOperation::Reply, MY_MAC));
        iface.poll(Instant::from_millis(10), &mut device, &mut sockets);
        assert_eq!(device.tx.len(), 2);

        let frame = EthernetFrame::new_checked(&device.tx[1][..]).unwrap();
        assert_eq!(frame.dst_addr(), PEER_MAC);
        let ip_packet = Ipv4Packet::new_checked(frame.payload()).unwrap();
        let ip_repr = Ipv4Repr::parse(&ip_packet).unwrap();
        assert_eq!((ip_repr.src_addr, ip_repr.dst_addr), (MY_IP, PEER_IP));
        let udp_packet = UdpPacket::new_checked(ip_packet.payload()).unwrap();
        assert!(UdpRepr::parse(&udp_packet, &MY_IP, &PEER_IP).is_ok());
        assert_eq!(udp_packet.payload(), b"world");
        assert_eq!(iface.poll_at(Instant::from_millis(10), &sockets), None);
    }

    #[test]
    fn test_off_link_goes_through_gateway() {
        let (mut iface, _) = create();
        let cx = iface.context();
        assert_eq!(cx.route(&Ipv4Address::new(8, 8, 8, 8)), Some(GATEWAY));
        assert_eq!(cx.route(&PEER_IP), Some(PEER_IP));
        assert!(cx.is_broadcast(&Ipv4Address::new(192, 168, 1, 255)));
        assert!(cx.is_broadcast(&Ipv4Address::BROADCAST));
        assert!(!cx.is_broadcast(&PEER_IP));
    }

    #[test]
    fn test_dns_arp_timeout() {
        let (mut iface, mut device) = create();
        let mut sockets = SocketSet::new(vec![]);
        let mut socket = dns::Socket::new(&[Ipv4Address::new(8, 8, 8, 8)]);
        socket.set_retry_config(dns::RetryConfig {
            send_timeout: Duration::from_secs(10),
            retries: 0,
            ..dns::RetryConfig::default()
        });
        socket.start_query("example.com").unwrap();
        let handle = sockets.add(socket);

        for millis in (0..=3000).step_by(500) {
            iface.poll(Instant::from_millis(millis), &mut device, &mut sockets);
        }

        // gateway queried once per second, then the lookup gives up
        let arp_requests = device
            .tx
            .iter()
            .filter(|frame| {
                let frame = EthernetFrame::new_checked(&frame[..]).unwrap();
                frame.ethertype() == EthernetProtocol::Arp
            })
            .count();
        assert_eq!(arp_requests, 3);
        assert_eq!(
            sockets.get_mut::<dns::Socket>(handle).get_query_result(),
            Err(dns::GetQueryResultError::Failed(dns::Error::Timeout))
        );
    }

    #[test]
    fn test_storage_is_borrowable() {
        let mut storage = [SocketStorage::EMPTY];
        let sockets = SocketSet::new(&mut storage[..]);
        let (mut iface, _) = create();
        assert_eq!(iface.poll_delay(Instant::ZERO, &sockets), None);
    }
}
