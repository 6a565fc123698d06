/*! The blocking convenience layer.

An [`EthernetSession`] owns a device, a clock, an [`Interface`] and a socket set
holding one DHCP client and one DNS resolver. It offers the calls an Arduino-style
sketch expects: [`begin`], [`maintain`], [`resolve`] and the address getters.
Every call that waits takes a [`Timeout`].

```rust,no_run
# #[cfg(all(feature = "phy-raw_socket", target_os = "linux"))]
# fn main() -> Result<(), Box<dyn std::error::Error>> {
use rxnet::iface::SocketStorage;
use rxnet::phy::{RawSocket, StdClock};
use rxnet::wire::EthernetAddress;
use rxnet::{EthernetSession, Timeout};

let device = RawSocket::new("eth0")?;
let mut storage = [SocketStorage::EMPTY, SocketStorage::EMPTY];
let mut session = EthernetSession::new(device, StdClock, &mut storage[..]);

session.begin(EthernetAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]), Timeout::Forever)?;
let address = session.resolve("example.com", Timeout::Millis(5_000))?;
println!("{} is at {}", "example.com", address);
# Ok(())
# }
# #[cfg(not(all(feature = "phy-raw_socket", target_os = "linux")))]
# fn main() {}
```

[`begin`]: struct.EthernetSession.html#method.begin
[`maintain`]: struct.EthernetSession.html#method.maintain
[`resolve`]: struct.EthernetSession.html#method.resolve
*/

use core::fmt;

use managed::ManagedSlice;

use crate::iface::{Config, Interface, SocketHandle, SocketSet, SocketStorage};
use crate::phy::{Clock, Device};
use crate::socket::dhcpv4::{self, Failure, Lease};
use crate::socket::dns::{self, GetQueryResultError, StartQueryError};
use crate::socket::udp;
use crate::time::{Duration, Instant};
use crate::wire::{EthernetAddress, Ipv4Address};

/// How long to wait after a failed renewal before trying again.
const RENEW_RETRY_INTERVAL: Duration = Duration::from_secs(60);

/// Bound of a blocking call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Wait until the operation completes. DHCP and DNS carry their own
    /// deadlines, so this always returns.
    Forever,
    /// Poll the interface once, then return.
    Poll,
    /// Do not poll; only report an outcome that is already there.
    NonBlocking,
    /// Wait at most this many milliseconds.
    Millis(u64),
}

/// Error returned by the session calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The operation is still running; call again to keep waiting.
    WouldBlock,
    /// The `Timeout::Millis` bound passed first; the operation keeps running.
    TimedOut,
    Dhcp(Failure),
    Dns(dns::Error),
    /// The host name cannot be encoded as a DNS name.
    InvalidName,
    /// The socket storage is full.
    NoSocketSpace,
    Bind(udp::BindError),
}

impl Error {
    /// The value the Arduino API would return for this error.
    pub fn code(&self) -> i32 {
        match self {
            Error::Dns(err) => err.code(),
            Error::TimedOut => dns::Error::Timeout.code(),
            _ => 0,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::WouldBlock => write!(f, "operation would block"),
            Error::TimedOut => write!(f, "operation timed out"),
            Error::Dhcp(failure) => write!(f, "DHCP: {failure}"),
            Error::Dns(err) => write!(f, "DNS: {err}"),
            Error::InvalidName => write!(f, "invalid host name"),
            Error::NoSocketSpace => write!(f, "no room for another socket"),
            Error::Bind(err) => write!(f, "bind: {err}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Outcome of [`EthernetSession::maintain`], numbered like `Ethernet.maintain()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MaintainStatus {
    Nothing = 0,
    RenewFailed = 1,
    RenewSuccess = 2,
    RebindFailed = 3,
    RebindSuccess = 4,
}

impl MaintainStatus {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

/// Latest thing the DHCP socket reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DhcpOutcome {
    Configured,
    Deconfigured,
    Failed(Failure),
}

/// Lease maintenance started by `maintain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Renewal {
    Idle,
    Renewing,
    Rebinding,
}

/// A network session on one Ethernet device.
#[derive(Debug)]
pub struct EthernetSession<'a, D, C>
where
    D: Device,
    C: Clock,
{
    device: D,
    clock: C,
    iface: Interface,
    sockets: SocketSet<'a>,
    dhcp_handle: SocketHandle,
    dns_handle: SocketHandle,
    dhcp_outcome: Option<DhcpOutcome>,
    /// The address comes from DHCP and is reacquired when lost.
    autoconfigure: bool,
    renewal: Renewal,
    renew_retry_at: Option<Instant>,
}

impl<'a, D, C> EthernetSession<'a, D, C>
where
    D: Device,
    C: Clock,
{
    /// Create a session using the given socket storage.
    ///
    /// Two slots hold the DHCP and DNS sockets; the rest are for
    /// [`add_udp_socket`](#method.add_udp_socket).
    ///
    /// # Panics
    /// This function panics if the storage is fixed-size and has fewer than two slots.
    pub fn new<S>(mut device: D, clock: C, storage: S) -> Self
    where
        S: Into<ManagedSlice<'a, SocketStorage<'a>>>,
    {
        let now = clock.now();
        let iface = Interface::new(Config::new(EthernetAddress::default()), &mut device, now);
        let mut sockets = SocketSet::new(storage);
        let dhcp_handle = sockets.add(dhcpv4::Socket::new());
        let dns_handle = sockets.add(dns::Socket::new(&[]));

        EthernetSession {
            device,
            clock,
            iface,
            sockets,
            dhcp_handle,
            dns_handle,
            dhcp_outcome: None,
            autoconfigure: false,
            renewal: Renewal::Idle,
            renew_retry_at: None,
        }
    }

    /// Acquire an address through DHCP.
    ///
    /// Calling it again with the same hardware address while the exchange is
    /// running keeps waiting on that exchange.
    ///
    /// # Panics
    /// This function panics if `hardware_addr` is not unicast.
    pub fn begin(&mut self, hardware_addr: EthernetAddress, timeout: Timeout) -> Result<(), Error> {
        let busy = self.dhcp().is_busy();
        if !busy || self.iface.hardware_addr() != hardware_addr {
            net_debug!("session: begin with {}", hardware_addr);
            self.iface.set_hardware_addr(hardware_addr);
            self.iface.clear_ipv4_config();
            self.dhcp_mut().start();
            self.dhcp_outcome = None;
            self.autoconfigure = true;
            self.renewal = Renewal::Idle;
            self.renew_retry_at = None;
        }

        self.block_on(timeout, |session| match session.dhcp_outcome.take() {
            Some(DhcpOutcome::Configured) => Some(Ok(())),
            Some(DhcpOutcome::Failed(failure)) => Some(Err(Error::Dhcp(failure))),
            Some(DhcpOutcome::Deconfigured) | None => None,
        })
    }

    /// Configure a fixed address.
    ///
    /// Missing values default the way `Ethernet.begin(mac, ip)` does: the DNS
    /// server and the gateway are the `.1` host of the subnet, and the mask is
    /// `255.255.255.0`.
    ///
    /// # Panics
    /// This function panics if `hardware_addr` is not unicast.
    pub fn begin_static(
        &mut self,
        hardware_addr: EthernetAddress,
        address: Ipv4Address,
        dns_server: Option<Ipv4Address>,
        gateway: Option<Ipv4Address>,
        subnet_mask: Option<Ipv4Address>,
    ) {
        let mut first_host = address;
        first_host.0[3] = 1;

        self.stop();
        self.iface.set_hardware_addr(hardware_addr);
        self.iface.set_ipv4_config(
            address,
            subnet_mask.unwrap_or(Ipv4Address::new(255, 255, 255, 0)),
            Some(gateway.unwrap_or(first_host)),
        );
        let dns_server = dns_server.unwrap_or(first_host);
        self.dns_mut().update_servers(&[dns_server]);
    }

    /// Drop the address and stop the DHCP client.
    pub fn stop(&mut self) {
        let dhcp = self.dhcp_mut();
        dhcp.reset();
        while dhcp.poll().is_some() {}

        self.dns_mut().cancel_query();
        self.dns_mut().update_servers(&[]);
        self.iface.clear_ipv4_config();
        self.dhcp_outcome = None;
        self.autoconfigure = false;
        self.renewal = Renewal::Idle;
        self.renew_retry_at = None;
    }

    /// Keep the DHCP lease alive.
    ///
    /// Call it regularly. Past T1 a renewal is started, past T2 a rebind; the
    /// outcome is reported by a later call. A lost lease is reacquired from
    /// scratch and reported as a rebind.
    pub fn maintain(&mut self) -> MaintainStatus {
        self.poll();
        let now = self.clock.now();

        let status = match (self.dhcp_outcome.take(), self.renewal) {
            (Some(DhcpOutcome::Configured), Renewal::Renewing) => MaintainStatus::RenewSuccess,
            (Some(DhcpOutcome::Configured), Renewal::Rebinding) => MaintainStatus::RebindSuccess,
            (Some(DhcpOutcome::Failed(_)), Renewal::Renewing) => MaintainStatus::RenewFailed,
            (Some(DhcpOutcome::Failed(_)), Renewal::Rebinding) => MaintainStatus::RebindFailed,
            (Some(DhcpOutcome::Deconfigured), _) if self.autoconfigure => {
                MaintainStatus::RebindFailed
            }
            _ => MaintainStatus::Nothing,
        };
        match status {
            MaintainStatus::Nothing => {}
            MaintainStatus::RenewSuccess | MaintainStatus::RebindSuccess => {
                self.renewal = Renewal::Idle;
                self.renew_retry_at = None;
            }
            MaintainStatus::RenewFailed | MaintainStatus::RebindFailed => {
                net_debug!("session: lease maintenance failed, retrying in {}", RENEW_RETRY_INTERVAL);
                self.renewal = Renewal::Idle;
                self.renew_retry_at = Some(now + RENEW_RETRY_INTERVAL);
            }
        }

        if self.autoconfigure
            && self.renewal == Renewal::Idle
            && self.renew_retry_at.map_or(true, |at| now >= at)
        {
            self.start_maintenance(now);
        }

        status
    }

    fn start_maintenance(&mut self, now: Instant) {
        let (renew_at, rebind_at) = match self.dhcp().lease() {
            Some(lease) => (lease.renew_at(), lease.rebind_at()),
            None if self.dhcp().is_busy() => return,
            None => {
                net_debug!("session: no lease, rediscovering");
                self.dhcp_mut().start();
                self.renewal = Renewal::Rebinding;
                return;
            }
        };
        if rebind_at.map_or(false, |at| now >= at) {
            if self.dhcp_mut().rebind() {
                self.renewal = Renewal::Rebinding;
            }
        } else if renew_at.map_or(false, |at| now >= at) && self.dhcp_mut().renew() {
            self.renewal = Renewal::Renewing;
        }
    }

    /// Resolve `host` to an IPv4 address.
    ///
    /// Dotted-quad strings are parsed without a query.
    pub fn resolve(&mut self, host: &str, timeout: Timeout) -> Result<Ipv4Address, Error> {
        if let Some(address) = Ipv4Address::parse_dotted(host) {
            return Ok(address);
        }

        let name = host.strip_suffix('.').unwrap_or(host);
        let resolver = self.dns_mut();
        let in_flight = resolver.state() != dns::State::UnreceivedRequest;
        match resolver.get_query_result() {
            Ok(resolved) if resolved.name.as_str() == name => return Ok(resolved.address),
            Err(GetQueryResultError::Failed(err)) if resolver.query_name() == name => {
                return Err(Error::Dns(err))
            }
            Err(GetQueryResultError::Pending) if resolver.query_name() == name => {}
            _ => {
                if in_flight {
                    resolver.cancel_query();
                }
                resolver.start_query(host).map_err(|err| match err {
                    StartQueryError::InvalidServer => Error::Dns(dns::Error::InvalidServer),
                    StartQueryError::InvalidName => Error::InvalidName,
                    StartQueryError::Busy => Error::WouldBlock,
                })?;
            }
        }

        self.block_on(timeout, |session| {
            match session.dns_mut().get_query_result() {
                Ok(resolved) => Some(Ok(resolved.address)),
                Err(GetQueryResultError::Failed(err)) => Some(Err(Error::Dns(err))),
                Err(GetQueryResultError::Pending) => None,
                Err(GetQueryResultError::Idle) => Some(Err(Error::Dns(dns::Error::InvalidResponse))),
            }
        })
    }

    /// Bind a UDP socket to `port` and add it to the session.
    ///
    /// Receive payload storage is usually
    /// [`DEFAULT_PAYLOAD_CAPACITY`](crate::storage::DEFAULT_PAYLOAD_CAPACITY) octets.
    pub fn add_udp_socket(
        &mut self,
        port: u16,
        rx_buffer: udp::PacketBuffer<'a>,
        tx_buffer: udp::PacketBuffer<'a>,
    ) -> Result<SocketHandle, Error> {
        let mut socket = udp::Socket::new(rx_buffer, tx_buffer);
        socket.bind(port).map_err(Error::Bind)?;
        if !self.sockets.has_vacancy() {
            return Err(Error::NoSocketSpace);
        }
        Ok(self.sockets.add(socket))
    }

    /// Get a UDP socket added with [`add_udp_socket`](#method.add_udp_socket).
    ///
    /// # Panics
    /// This function panics if the handle does not refer to a UDP socket.
    pub fn udp_socket(&mut self, handle: SocketHandle) -> &mut udp::Socket<'a> {
        self.sockets.get_mut::<udp::Socket>(handle)
    }

    /// Close and remove a UDP socket.
    pub fn remove_udp_socket(&mut self, handle: SocketHandle) {
        self.udp_socket(handle).close();
        self.sockets.remove(handle);
    }

    /// Move frames between the device and the sockets, and apply DHCP changes.
    ///
    /// Returns whether anything was received or sent.
    pub fn poll(&mut self) -> bool {
        let now = self.clock.now();
        let changed = self.iface.poll(now, &mut self.device, &mut self.sockets);
        self.process_dhcp_events();
        changed
    }

    /// Return how long the session may sleep before it needs polling.
    pub fn poll_delay(&mut self) -> Option<Duration> {
        let now = self.clock.now();
        self.iface.poll_delay(now, &self.sockets)
    }

    fn process_dhcp_events(&mut self) {
        loop {
            let (outcome, dns_servers) = match self.sockets.get_mut::<dhcpv4::Socket>(self.dhcp_handle).poll() {
                None => break,
                Some(dhcpv4::Event::Configured(lease)) => {
                    net_debug!("session: configured {}", lease.address);
                    self.iface
                        .set_ipv4_config(lease.address, lease.subnet_mask, lease.gateway);
                    (DhcpOutcome::Configured, Some(lease.dns_servers.clone()))
                }
                Some(dhcpv4::Event::Deconfigured) => {
                    net_debug!("session: deconfigured");
                    self.iface.clear_ipv4_config();
                    (DhcpOutcome::Deconfigured, Some(heapless::Vec::new()))
                }
                Some(dhcpv4::Event::Failed(failure)) => {
                    net_debug!("session: DHCP failed: {}", failure);
                    (DhcpOutcome::Failed(failure), None)
                }
            };

            if let Some(servers) = dns_servers {
                self.dns_mut().update_servers(&servers);
            }

            // A failure outranks the deconfiguration that may follow it.
            self.dhcp_outcome = match (self.dhcp_outcome, outcome) {
                (Some(DhcpOutcome::Failed(failure)), DhcpOutcome::Deconfigured) => {
                    Some(DhcpOutcome::Failed(failure))
                }
                (_, outcome) => Some(outcome),
            };
        }
    }

    fn block_on<T, F>(&mut self, timeout: Timeout, mut ready: F) -> Result<T, Error>
    where
        F: FnMut(&mut Self) -> Option<Result<T, Error>>,
    {
        let started_at = self.clock.now();
        loop {
            if timeout != Timeout::NonBlocking {
                self.poll();
            }
            if let Some(result) = ready(self) {
                return result;
            }
            match timeout {
                Timeout::Forever => {}
                Timeout::Poll | Timeout::NonBlocking => return Err(Error::WouldBlock),
                Timeout::Millis(millis) => {
                    if self.clock.now() >= started_at + Duration::from_millis(millis) {
                        return Err(Error::TimedOut);
                    }
                }
            }
        }
    }

    /// The address in use, or `0.0.0.0`.
    pub fn local_ip(&self) -> Ipv4Address {
        self.iface.ipv4_addr().unwrap_or(Ipv4Address::UNSPECIFIED)
    }

    pub fn subnet_mask(&self) -> Ipv4Address {
        self.iface.subnet_mask().unwrap_or(Ipv4Address::UNSPECIFIED)
    }

    pub fn gateway_ip(&self) -> Ipv4Address {
        self.iface.gateway().unwrap_or(Ipv4Address::UNSPECIFIED)
    }

    /// The primary DNS server, or `0.0.0.0`.
    pub fn dns_server_ip(&self) -> Ipv4Address {
        self.dns()
            .servers()
            .first()
            .copied()
            .unwrap_or(Ipv4Address::UNSPECIFIED)
    }

    pub fn hardware_addr(&self) -> EthernetAddress {
        self.iface.hardware_addr()
    }

    /// The DHCP lease, if the address came from one.
    pub fn lease(&self) -> Option<&Lease> {
        self.dhcp().lease()
    }

    /// Set the DHCP transaction configuration used by the next `begin`.
    pub fn set_dhcp_config(&mut self, config: dhcpv4::Config) {
        self.dhcp_mut().set_config(config)
    }

    pub fn set_dns_retry_config(&mut self, config: dns::RetryConfig) {
        self.dns_mut().set_retry_config(config)
    }

    /// Get the resolver, e.g. to inspect its state.
    pub fn dns(&self) -> &dns::Socket {
        self.sockets.get::<dns::Socket>(self.dns_handle)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn interface(&self) -> &Interface {
        &self.iface
    }

    fn dns_mut(&mut self) -> &mut dns::Socket {
        self.sockets.get_mut::<dns::Socket>(self.dns_handle)
    }

    fn dhcp(&self) -> &dhcpv4::Socket {
        self.sockets.get::<dhcpv4::Socket>(self.dhcp_handle)
    }

    fn dhcp_mut(&mut self) -> &mut dhcpv4::Socket {
        self.sockets.get_mut::<dhcpv4::Socket>(self.dhcp_handle)
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;
    use std::vec::Vec;

    use super::*;
    use crate::phy::{self, DeviceCapabilities};
    use crate::socket::dhcpv4::Phase;
    use crate::storage::DEFAULT_PAYLOAD_CAPACITY;
    use crate::wire::{
        ArpOperation, ArpPacket, ArpRepr, DhcpMessageType, DhcpPacket, DhcpRepr, DnsPacket,
        EthernetFrame, EthernetProtocol, EthernetRepr, IpEndpoint, IpProtocol, Ipv4Packet,
        Ipv4Repr, UdpPacket, UdpRepr, DHCP_CLIENT_PORT, DHCP_SERVER_PORT, UDP_HEADER_LEN,
    };

    const MY_MAC: EthernetAddress = EthernetAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
    const SERVER_MAC: EthernetAddress = EthernetAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
    const SERVER_IP: Ipv4Address = Ipv4Address([192, 168, 1, 1]);
    const OFFERED_IP: Ipv4Address = Ipv4Address([192, 168, 1, 50]);
    const MASK: Ipv4Address = Ipv4Address([255, 255, 255, 0]);

    // example.com CNAME www.example.com, www.example.com A 93.184.216.34
    const DNS_ANSWERS: &[u8] = &[
        0xc0, 0x0c, 0x00, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x3c, 0x00, 0x06, 0x03, b'w', b'w',
        b'w', 0xc0, 0x0c, 0xc0, 0x29, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x3c, 0x00, 0x04,
        93, 184, 216, 34,
    ];

    /// Milliseconds since boot; every reading moves it on by 10 ms.
    #[derive(Debug, Clone, Default)]
    struct TestClock(Rc<Cell<i64>>);

    impl TestClock {
        fn advance(&self, duration: Duration) {
            self.0.set(self.0.get() + duration.total_millis() as i64);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            let millis = self.0.get() + 10;
            self.0.set(millis);
            Instant::from_millis(millis)
        }
    }

    /// A link with a DHCP server and a DNS server on 192.168.1.1.
    #[derive(Debug, Default)]
    struct Network {
        rx: VecDeque<Vec<u8>>,
        dhcp_server: bool,
        dns_server: bool,
        transmitted: usize,
    }

    impl Device for Network {
        fn receive(&mut self, buffer: &mut [u8]) -> Option<usize> {
            let frame = self.rx.pop_front()?;
            buffer[..frame.len()].copy_from_slice(&frame);
            Some(frame.len())
        }

        fn transmit(&mut self, frame: &[u8]) -> Result<(), phy::Error> {
            self.transmitted += 1;
            self.respond(frame);
            Ok(())
        }

        fn capabilities(&self) -> DeviceCapabilities {
            DeviceCapabilities::default()
        }
    }

    impl Network {
        fn respond(&mut self, frame: &[u8]) {
            let frame = EthernetFrame::new_checked(frame).unwrap();
            match frame.ethertype() {
                EthernetProtocol::Arp => {
                    let request =
                        ArpRepr::parse(&ArpPacket::new_checked(frame.payload()).unwrap()).unwrap();
                    if request.operation == ArpOperation::Request
                        && request.target_protocol_addr == SERVER_IP
                    {
                        self.rx.push_back(arp_reply(&request));
                    }
                }
                EthernetProtocol::Ipv4 => {
                    let ip_packet = Ipv4Packet::new_checked(frame.payload()).unwrap();
                    let ip_repr = Ipv4Repr::parse(&ip_packet).unwrap();
                    let udp_packet = UdpPacket::new_checked(ip_packet.payload()).unwrap();
                    let udp_repr =
                        UdpRepr::parse(&udp_packet, &ip_repr.src_addr, &ip_repr.dst_addr).unwrap();
                    match udp_repr.dst_port {
                        DHCP_SERVER_PORT if self.dhcp_server => {
                            self.answer_dhcp(udp_packet.payload())
                        }
                        53 if self.dns_server => {
                            self.answer_dns(udp_repr.src_port, udp_packet.payload())
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        fn answer_dhcp(&mut self, payload: &[u8]) {
            let request = DhcpRepr::parse(&DhcpPacket::new_checked(payload).unwrap()).unwrap();
            let message_type = match request.message_type {
                DhcpMessageType::Discover => DhcpMessageType::Offer,
                DhcpMessageType::Request => DhcpMessageType::Ack,
                _ => return,
            };
            let mut dns_servers = heapless::Vec::new();
            dns_servers.push(SERVER_IP).unwrap();
            let reply = DhcpRepr {
                message_type,
                transaction_id: request.transaction_id,
                secs: 0,
                client_hardware_address: request.client_hardware_address,
                client_ip: request.client_ip,
                your_ip: OFFERED_IP,
                server_ip: SERVER_IP,
                relay_agent_ip: Ipv4Address::UNSPECIFIED,
                broadcast: true,
                requested_ip: None,
                client_identifier: None,
                server_identifier: Some(SERVER_IP),
                parameter_request_list: None,
                max_size: None,
                subnet_mask: Some(MASK),
                router: Some(SERVER_IP),
                dns_servers: Some(dns_servers),
                domain_name: Some("example.lan"),
                lease_duration: Some(86400),
                renew_duration: None,
                rebind_duration: None,
            };
            let mut bytes = vec![0; reply.buffer_len()];
            reply
                .emit(&mut DhcpPacket::new_unchecked(&mut bytes[..]))
                .unwrap();
            self.rx.push_back(udp_frame(
                DHCP_SERVER_PORT,
                Ipv4Address::BROADCAST,
                DHCP_CLIENT_PORT,
                &bytes,
            ));
        }

        fn answer_dns(&mut self, client_port: u16, payload: &[u8]) {
            let query = DnsPacket::new_checked(payload).unwrap();
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&query.transaction_id().to_be_bytes());
            bytes.extend_from_slice(&[0x81, 0x80, 0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]);
            bytes.extend_from_slice(b"\x07example\x03com\x00\x00\x01\x00\x01");
            bytes.extend_from_slice(DNS_ANSWERS);
            self.rx
                .push_back(udp_frame(53, OFFERED_IP, client_port, &bytes));
        }
    }

    fn arp_reply(request: &ArpRepr) -> Vec<u8> {
        let reply = ArpRepr {
            operation: ArpOperation::Reply,
            source_hardware_addr: SERVER_MAC,
            source_protocol_addr: SERVER_IP,
            target_hardware_addr: request.source_hardware_addr,
            target_protocol_addr: request.source_protocol_addr,
        };
        let eth_repr = EthernetRepr {
            src_addr: SERVER_MAC,
            dst_addr: request.source_hardware_addr,
            ethertype: EthernetProtocol::Arp,
        };
        let mut bytes = vec![0; eth_repr.buffer_len() + reply.buffer_len()];
        let mut frame = EthernetFrame::new_unchecked(&mut bytes[..]);
        eth_repr.emit(&mut frame);
        reply.emit(&mut ArpPacket::new_unchecked(frame.payload_mut()));
        bytes
    }

    fn udp_frame(src_port: u16, dst_addr: Ipv4Address, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let udp_repr = UdpRepr { src_port, dst_port };
        let ip_repr = Ipv4Repr {
            src_addr: SERVER_IP,
            dst_addr,
            next_header: IpProtocol::Udp,
            payload_len: UDP_HEADER_LEN + payload.len(),
            hop_limit: 64,
        };
        let eth_repr = EthernetRepr {
            src_addr: SERVER_MAC,
            dst_addr: MY_MAC,
            ethertype: EthernetProtocol::Ipv4,
        };
        let mut bytes = vec![0; eth_repr.buffer_len() + ip_repr.buffer_len() + ip_repr.payload_len];
        let mut frame = EthernetFrame::new_unchecked(&mut bytes[..]);
        eth_repr.emit(&mut frame);
        let mut ip_packet = Ipv4Packet::new_unchecked(frame.payload_mut());
        ip_repr.emit(&mut ip_packet);
        let mut udp_packet = UdpPacket::new_unchecked(ip_packet.payload_mut());
        udp_repr.emit(
            &mut udp_packet,
            &SERVER_IP,
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

    fn session(
        dhcp_server: bool,
        dns_server: bool,
    ) -> (EthernetSession<'static, Network, TestClock>, TestClock) {
        let network = Network {
            dhcp_server,
            dns_server,
            ..Network::default()
        };
        let clock = TestClock::default();
        (EthernetSession::new(network, clock.clone(), vec![]), clock)
    }

    #[test]
    fn test_begin() {
        let (mut session, _) = session(true, true);
        assert_eq!(session.begin(MY_MAC, Timeout::Forever), Ok(()));

        assert_eq!(session.local_ip(), OFFERED_IP);
        assert_eq!(session.subnet_mask(), MASK);
        assert_eq!(session.gateway_ip(), SERVER_IP);
        assert_eq!(session.dns_server_ip(), SERVER_IP);
        assert_eq!(session.hardware_addr(), MY_MAC);

        let lease = session.lease().unwrap();
        assert_eq!(lease.address, OFFERED_IP);
        assert_eq!(lease.lease_duration, 86400);
        assert_eq!(lease.renewal_time, 43200);
        assert_eq!(lease.rebinding_time, 75600);
        assert_eq!(lease.server_hardware_addr, SERVER_MAC);
        assert_eq!(lease.domain_name.as_str(), "example.lan");

        assert_eq!(session.maintain(), MaintainStatus::Nothing);
    }

    #[test]
    fn test_begin_silent_server() {
        let (mut session, _) = session(false, false);
        let err = session.begin(MY_MAC, Timeout::Forever).unwrap_err();
        assert_eq!(err, Error::Dhcp(Failure::Timeout(Phase::Discover)));
        assert_eq!(err.code(), 0);

        assert_eq!(session.local_ip(), Ipv4Address::UNSPECIFIED);
        assert_eq!(session.subnet_mask(), Ipv4Address::UNSPECIFIED);
        assert_eq!(session.gateway_ip(), Ipv4Address::UNSPECIFIED);
        assert_eq!(session.dns_server_ip(), Ipv4Address::UNSPECIFIED);
        assert!(session.lease().is_none());
    }

    #[test]
    fn test_begin_bounded() {
        let (mut session, _) = session(false, false);
        assert_eq!(
            session.begin(MY_MAC, Timeout::Millis(500)),
            Err(Error::TimedOut)
        );
        // the exchange is still running
        assert_eq!(session.device().transmitted, 1);
        assert_eq!(session.begin(MY_MAC, Timeout::Poll), Err(Error::WouldBlock));
        assert_eq!(session.device().transmitted, 1);
    }

    #[test]
    fn test_begin_non_blocking() {
        let (mut session, _) = session(true, true);
        assert_eq!(
            session.begin(MY_MAC, Timeout::NonBlocking),
            Err(Error::WouldBlock)
        );
        assert_eq!(session.device().transmitted, 0);

        // a single poll runs the whole exchange against a prompt server
        assert_eq!(session.begin(MY_MAC, Timeout::Poll), Ok(()));
        assert_eq!(session.device().transmitted, 2);
        assert_eq!(session.local_ip(), OFFERED_IP);
    }

    #[test]
    fn test_resolve() {
        let (mut session, _) = session(true, true);
        session.begin(MY_MAC, Timeout::Forever).unwrap();

        assert_eq!(
            session.resolve("example.com", Timeout::Forever),
            Ok(Ipv4Address::new(93, 184, 216, 34))
        );
        assert_eq!(session.dns().state(), dns::State::UnreceivedRequest);
        assert_eq!(session.dns().query_name(), "example.com");
    }

    #[test]
    fn test_resolve_without_answer() {
        let (mut session, _) = session(true, false);
        session.begin(MY_MAC, Timeout::Forever).unwrap();

        let err = session.resolve("example.com", Timeout::Forever).unwrap_err();
        assert_eq!(err, Error::Dns(dns::Error::Timeout));
        assert_eq!(err.code(), -1);
        assert_eq!(session.dns().state(), dns::State::UnreceivedRequest);
    }

    #[test]
    fn test_resolve_dotted_quad() {
        let (mut session, _) = session(false, false);
        assert_eq!(
            session.resolve("10.0.0.1", Timeout::NonBlocking),
            Ok(Ipv4Address::new(10, 0, 0, 1))
        );

        // no server configured
        let err = session.resolve("example.com", Timeout::Forever).unwrap_err();
        assert_eq!(err, Error::Dns(dns::Error::InvalidServer));
        assert_eq!(err.code(), -2);
        assert_eq!(session.device().transmitted, 0);
    }

    #[test]
    fn test_begin_static() {
        let (mut session, _) = session(false, false);
        session.begin_static(MY_MAC, Ipv4Address::new(10, 1, 2, 3), None, None, None);

        assert_eq!(session.local_ip(), Ipv4Address::new(10, 1, 2, 3));
        assert_eq!(session.gateway_ip(), Ipv4Address::new(10, 1, 2, 1));
        assert_eq!(session.dns_server_ip(), Ipv4Address::new(10, 1, 2, 1));
        assert_eq!(session.subnet_mask(), MASK);
        assert!(session.lease().is_none());
        assert_eq!(session.maintain(), MaintainStatus::Nothing);
        assert_eq!(session.local_ip(), Ipv4Address::new(10, 1, 2, 3));

        session.stop();
        assert_eq!(session.local_ip(), Ipv4Address::UNSPECIFIED);
        assert_eq!(session.dns_server_ip(), Ipv4Address::UNSPECIFIED);
    }

    #[test]
    fn test_maintain_renews() {
        let (mut session, clock) = session(true, true);
        session.begin(MY_MAC, Timeout::Forever).unwrap();

        clock.advance(Duration::from_secs(43_200));
        assert_eq!(session.maintain(), MaintainStatus::Nothing);
        let status = session.maintain();
        assert_eq!(status, MaintainStatus::RenewSuccess);
        assert_eq!(status.code(), 2);

        assert!(session.lease().unwrap().acquired_at >= Instant::from_secs(43_200));
        assert_eq!(session.maintain(), MaintainStatus::Nothing);
    }

    #[test]
    fn test_maintain_renew_fails() {
        let (mut session, clock) = session(true, true);
        session.begin(MY_MAC, Timeout::Forever).unwrap();
        session.device_mut().dhcp_server = false;

        clock.advance(Duration::from_secs(43_200));
        let status = (0..1000)
            .map(|_| session.maintain())
            .find(|status| *status != MaintainStatus::Nothing);
        assert_eq!(status, Some(MaintainStatus::RenewFailed));

        // the lease is kept until it expires
        assert_eq!(session.local_ip(), OFFERED_IP);
        assert!(session.lease().is_some());
    }

    #[test]
    fn test_maintain_rebinds() {
        let (mut session, clock) = session(true, true);
        session.begin(MY_MAC, Timeout::Forever).unwrap();

        clock.advance(Duration::from_secs(75_600));
        assert_eq!(session.maintain(), MaintainStatus::Nothing);
        assert_eq!(session.maintain(), MaintainStatus::RebindSuccess);
    }

    #[test]
    fn test_udp_sockets() {
        let mut storage = [
            SocketStorage::EMPTY,
            SocketStorage::EMPTY,
            SocketStorage::EMPTY,
        ];
        let network = Network {
            dhcp_server: true,
            ..Network::default()
        };
        let mut session = EthernetSession::new(network, TestClock::default(), &mut storage[..]);
        session.begin(MY_MAC, Timeout::Forever).unwrap();

        assert_eq!(
            session.add_udp_socket(0, udp_buffer(), udp_buffer()),
            Err(Error::Bind(udp::BindError::Unaddressable))
        );
        let handle = session
            .add_udp_socket(7000, udp_buffer(), udp_buffer())
            .unwrap();
        assert_eq!(
            session.add_udp_socket(7001, udp_buffer(), udp_buffer()),
            Err(Error::NoSocketSpace)
        );

        session
            .device_mut()
            .rx
            .push_back(udp_frame(4000, OFFERED_IP, 7000, b"hello"));
        assert!(session.poll());

        let socket = session.udp_socket(handle);
        assert_eq!(socket.parse_packet(), 5);
        assert_eq!(socket.remote_endpoint(), Some(IpEndpoint::new(SERVER_IP, 4000)));
        let mut data = [0; 8];
        assert_eq!(socket.read_slice(&mut data), Some(5));
        assert_eq!(&data[..5], b"hello");

        session.remove_udp_socket(handle);
        assert!(session
            .add_udp_socket(7001, udp_buffer(), udp_buffer())
            .is_ok());
    }
}
