use core::fmt;
#[cfg(feature = "async")]
use core::task::Waker;

use heapless::{String, Vec};

use crate::iface::Context;
use crate::time::{Duration, Instant};
use crate::wire::dhcpv4::field as dhcpv4_field;
use crate::wire::{
    DhcpMessageType, DhcpPacket, DhcpRepr, EthernetAddress, IpProtocol, Ipv4Address, Ipv4Repr,
    UdpRepr, DHCP_CLIENT_PORT, DHCP_MAX_DNS_SERVER_COUNT, DHCP_SERVER_PORT, UDP_HEADER_LEN,
};

#[cfg(feature = "async")]
use super::WakerRegistration;

use super::PollAt;

/// Transaction ID used unless configured otherwise.
pub const DEFAULT_TRANSACTION_ID: u32 = 0x1234_5678;

/// Longest domain name kept in a [`Lease`]; longer names are truncated.
pub const MAX_DOMAIN_NAME_LEN: usize = 64;

/// Lease and timer value meaning "forever".
pub const INFINITE_LEASE: u32 = 0xffff_ffff;

const PARAMETER_REQUEST_LIST: &[u8] = &[
    dhcpv4_field::OPT_SUBNET_MASK,
    dhcpv4_field::OPT_ROUTER,
    dhcpv4_field::OPT_DOMAIN_NAME_SERVER,
    dhcpv4_field::OPT_DOMAIN_NAME,
    dhcpv4_field::OPT_IP_LEASE_TIME,
    dhcpv4_field::OPT_RENEWAL_TIME_VALUE,
    dhcpv4_field::OPT_REBINDING_TIME_VALUE,
];

/// IPv4 configuration granted by a DHCP server.
#[derive(Debug, Eq, PartialEq, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Lease {
    /// Assigned address.
    pub address: Ipv4Address,
    pub subnet_mask: Ipv4Address,
    /// Router address, also known as default gateway.
    pub gateway: Option<Ipv4Address>,
    pub dns_servers: Vec<Ipv4Address, DHCP_MAX_DNS_SERVER_COUNT>,
    /// Domain name, truncated to [`MAX_DOMAIN_NAME_LEN`] octets.
    pub domain_name: String<MAX_DOMAIN_NAME_LEN>,
    /// Lease duration in seconds; [`INFINITE_LEASE`] means forever.
    pub lease_duration: u32,
    /// T1, in seconds after acquisition.
    pub renewal_time: u32,
    /// T2, in seconds after acquisition.
    pub rebinding_time: u32,
    pub server_identifier: Ipv4Address,
    pub server_hardware_addr: EthernetAddress,
    pub acquired_at: Instant,
}

impl Lease {
    fn deadline(&self, secs: u32) -> Option<Instant> {
        if secs == INFINITE_LEASE {
            None
        } else {
            Some(self.acquired_at + Duration::from_secs(secs as u64))
        }
    }

    /// Instant at which the lease should be renewed, if it ever needs to.
    pub fn renew_at(&self) -> Option<Instant> {
        self.deadline(self.renewal_time)
    }

    /// Instant at which the lease should be rebound, if it ever needs to.
    pub fn rebind_at(&self) -> Option<Instant> {
        self.deadline(self.rebinding_time)
    }

    /// Instant at which the lease expires, if it ever does.
    pub fn expires_at(&self) -> Option<Instant> {
        self.deadline(self.lease_duration)
    }
}

/// Step of the exchange that a failure happened in.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Discover,
    Request,
    Renew,
    Rebind,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Discover => write!(f, "discover"),
            Phase::Request => write!(f, "request"),
            Phase::Renew => write!(f, "renew"),
            Phase::Rebind => write!(f, "rebind"),
        }
    }
}

/// Reason an exchange failed.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Failure {
    /// No acceptable reply arrived before the step deadline.
    Timeout(Phase),
    /// The server refused the request.
    Nak,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Timeout(phase) => write!(f, "timed out during {phase}"),
            Failure::Nak => write!(f, "request refused by server"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Failure {}

/// Transaction configuration.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    /// xid of every message sent, and expected in every reply.
    pub transaction_id: u32,
    /// How long to wait for the reply of each step. There is no retry.
    pub step_timeout: Duration,
    /// Value of the max message size option.
    pub max_message_size: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transaction_id: DEFAULT_TRANSACTION_ID,
            step_timeout: Duration::from_secs(3),
            max_message_size: 1500,
        }
    }
}

/// Return value for the `Socket::poll` function
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event<'a> {
    /// Configuration has been lost (for example, the lease has expired)
    Deconfigured,
    /// Configuration has been newly acquired, or renewed.
    Configured(&'a Lease),
    /// An exchange failed. A renewal failure keeps the current lease.
    Failed(Failure),
}

/// Outstanding step: `deadline` is `None` until the message has been sent.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct Step {
    started_at: Option<Instant>,
    deadline: Option<Instant>,
}

impl Step {
    const fn new() -> Self {
        Step {
            started_at: None,
            deadline: None,
        }
    }

    fn secs(&self, now: Instant) -> u16 {
        match self.started_at {
            Some(started_at) => (now - started_at).secs().min(u16::MAX as u64) as u16,
            None => 0,
        }
    }
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct RequestState {
    step: Step,
    offered_ip: Ipv4Address,
    server_identifier: Ipv4Address,
    server_hardware_addr: EthernetAddress,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
struct RenewState {
    step: Step,
    lease: Lease,
    rebinding: bool,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum ClientState {
    /// Not configured, nothing outstanding.
    Idle,
    /// Broadcasting DISCOVER, waiting for an OFFER.
    Discovering(Step),
    /// Requesting the offered address, waiting for an ACK.
    Requesting(RequestState),
    /// Holding a lease.
    Bound(Lease),
    /// Holding a lease and asking to extend it.
    Renewing(RenewState),
}

/// DHCP client socket.
///
/// The socket acquires an IPv4 configuration with a single
/// DISCOVER / OFFER / REQUEST / ACK exchange, each step bounded by
/// `Config::step_timeout`. You must query the outcome with `.poll()` after
/// every call to `Interface::poll()`, and apply the configuration to the
/// `Interface`.
#[derive(Debug)]
pub struct Socket {
    state: ClientState,
    config: Config,
    /// Set to true on config/state change, cleared back to false by the `poll` function.
    config_changed: bool,
    failure: Option<Failure>,
    pub(crate) server_port: u16,
    pub(crate) client_port: u16,
    #[cfg(feature = "async")]
    waker: WakerRegistration,
}

impl Default for Socket {
    fn default() -> Self {
        Self::new()
    }
}

impl Socket {
    /// Create an idle DHCPv4 socket.
    pub fn new() -> Self {
        Socket {
            state: ClientState::Idle,
            config: Config::default(),
            config_changed: false,
            failure: None,
            server_port: DHCP_SERVER_PORT,
            client_port: DHCP_CLIENT_PORT,
            #[cfg(feature = "async")]
            waker: WakerRegistration::new(),
        }
    }

    /// Set the transaction configuration.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Set the server/client port
    pub fn set_ports(&mut self, server_port: u16, client_port: u16) {
        self.server_port = server_port;
        self.client_port = client_port;
    }

    /// Start acquiring a lease, dropping the current one if any.
    pub fn start(&mut self) {
        net_trace!("DHCP start");
        self.drop_lease();
        self.failure = None;
        self.state = ClientState::Discovering(Step::new());
    }

    /// Ask the server that granted the lease to extend it.
    ///
    /// Returns `false` unless a lease is held and no exchange is outstanding.
    pub fn renew(&mut self) -> bool {
        self.begin_renew(false)
    }

    /// Ask any server to extend the lease.
    ///
    /// Returns `false` unless a lease is held and no exchange is outstanding.
    pub fn rebind(&mut self) -> bool {
        self.begin_renew(true)
    }

    fn begin_renew(&mut self, rebinding: bool) -> bool {
        let lease = match core::mem::replace(&mut self.state, ClientState::Idle) {
            ClientState::Bound(lease) => lease,
            other => {
                self.state = other;
                return false;
            }
        };
        self.state = ClientState::Renewing(RenewState {
            step: Step::new(),
            lease,
            rebinding,
        });
        true
    }

    /// Reset state and return to idle, dropping the lease.
    pub fn reset(&mut self) {
        net_trace!("DHCP reset");
        self.drop_lease();
        self.state = ClientState::Idle;
    }

    fn drop_lease(&mut self) {
        if let ClientState::Bound(_) | ClientState::Renewing(_) = &self.state {
            self.config_changed();
        }
    }

    /// Return the current lease, if any.
    pub fn lease(&self) -> Option<&Lease> {
        match &self.state {
            ClientState::Bound(lease) => Some(lease),
            ClientState::Renewing(state) => Some(&state.lease),
            _ => None,
        }
    }

    /// Check whether an exchange is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            ClientState::Discovering(_) | ClientState::Requesting(_) | ClientState::Renewing(_)
        )
    }

    pub(crate) fn poll_at(&self, _cx: &mut Context) -> PollAt {
        let step = match &self.state {
            ClientState::Idle => return PollAt::Ingress,
            ClientState::Bound(lease) => {
                return match lease.expires_at() {
                    Some(t) => PollAt::Time(t),
                    None => PollAt::Ingress,
                }
            }
            ClientState::Discovering(step) => step,
            ClientState::Requesting(state) => &state.step,
            ClientState::Renewing(state) => &state.step,
        };
        match step.deadline {
            Some(t) => PollAt::Time(t),
            None => PollAt::Now,
        }
    }

    pub(crate) fn process(
        &mut self,
        cx: &mut Context,
        ip_repr: &Ipv4Repr,
        src_hardware_addr: EthernetAddress,
        repr: &UdpRepr,
        payload: &[u8],
    ) {
        let src_ip = ip_repr.src_addr;

        // This is enforced in interface.rs.
        if repr.src_port != self.server_port || repr.dst_port != self.client_port {
            return;
        }

        let dhcp_packet = match DhcpPacket::new_checked(payload) {
            Ok(dhcp_packet) => dhcp_packet,
            Err(e) => {
                net_debug!("DHCP invalid pkt from {}: {:?}", src_ip, e);
                return;
            }
        };
        let dhcp_repr = match DhcpRepr::parse(&dhcp_packet) {
            Ok(dhcp_repr) => dhcp_repr,
            Err(e) => {
                net_debug!("DHCP error parsing pkt from {}: {:?}", src_ip, e);
                return;
            }
        };

        if dhcp_repr.client_hardware_address != cx.hardware_addr() {
            return;
        }
        if dhcp_repr.transaction_id != self.config.transaction_id {
            return;
        }

        net_debug!(
            "DHCP recv {} from {}: yiaddr={}",
            dhcp_repr.message_type,
            src_ip,
            dhcp_repr.your_ip
        );

        let now = cx.now();
        match (&mut self.state, dhcp_repr.message_type) {
            (ClientState::Discovering(step), DhcpMessageType::Offer) if step.deadline.is_some() => {
                if !dhcp_repr.your_ip.is_unicast() {
                    net_debug!("DHCP ignoring OFFER because your_ip is not unicast");
                    return;
                }
                let server_identifier = match dhcp_repr.server_identifier {
                    Some(server_identifier) if server_identifier.is_unicast() => server_identifier,
                    _ => {
                        net_debug!("DHCP ignoring OFFER because of missing server identifier");
                        return;
                    }
                };

                self.state = ClientState::Requesting(RequestState {
                    step: Step {
                        started_at: step.started_at,
                        deadline: None,
                    },
                    offered_ip: dhcp_repr.your_ip,
                    server_identifier,
                    server_hardware_addr: src_hardware_addr,
                });
            }
            (ClientState::Requesting(state), DhcpMessageType::Ack) if state.step.deadline.is_some() => {
                if let Some(lease) = Self::parse_ack(
                    now,
                    &dhcp_repr,
                    state.server_identifier,
                    state.server_hardware_addr,
                ) {
                    net_debug!("DHCP bound to {}", lease.address);
                    self.state = ClientState::Bound(lease);
                    self.config_changed();
                }
            }
            (ClientState::Renewing(state), DhcpMessageType::Ack) if state.step.deadline.is_some() => {
                let server_identifier = dhcp_repr
                    .server_identifier
                    .unwrap_or(state.lease.server_identifier);
                if let Some(lease) =
                    Self::parse_ack(now, &dhcp_repr, server_identifier, src_hardware_addr)
                {
                    net_debug!("DHCP lease on {} extended", lease.address);
                    self.state = ClientState::Bound(lease);
                    self.config_changed();
                }
            }
            (ClientState::Requesting(state), DhcpMessageType::Nak) if state.step.deadline.is_some() => {
                net_debug!("DHCP request refused");
                self.state = ClientState::Idle;
                self.fail(Failure::Nak);
            }
            (ClientState::Renewing(state), DhcpMessageType::Nak) if state.step.deadline.is_some() => {
                net_debug!("DHCP renewal refused, dropping lease");
                self.state = ClientState::Idle;
                self.config_changed();
                self.fail(Failure::Nak);
            }
            _ => {
                net_debug!(
                    "DHCP ignoring {}: unexpected in current state",
                    dhcp_repr.message_type
                );
            }
        }
    }

    fn parse_ack(
        now: Instant,
        dhcp_repr: &DhcpRepr,
        server_identifier: Ipv4Address,
        server_hardware_addr: EthernetAddress,
    ) -> Option<Lease> {
        let subnet_mask = match dhcp_repr.subnet_mask {
            Some(subnet_mask) => subnet_mask,
            None => {
                net_debug!("DHCP ignoring ACK because of missing subnet mask");
                return None;
            }
        };

        if !dhcp_repr.your_ip.is_unicast() {
            net_debug!("DHCP ignoring ACK because your_ip is not unicast");
            return None;
        }

        let lease_duration = dhcp_repr.lease_duration.unwrap_or(INFINITE_LEASE);
        let (default_t1, default_t2) = if lease_duration == INFINITE_LEASE {
            (INFINITE_LEASE, INFINITE_LEASE)
        } else {
            let lease = lease_duration as u64;
            ((lease / 2) as u32, (lease * 7 / 8) as u32)
        };

        let mut dns_servers = Vec::new();
        if let Some(servers) = &dhcp_repr.dns_servers {
            for server in servers.iter().filter(|s| s.is_unicast()) {
                dns_servers.push(*server).ok();
            }
        }

        let mut domain_name = String::new();
        for c in dhcp_repr.domain_name.unwrap_or("").chars() {
            if domain_name.push(c).is_err() {
                break;
            }
        }

        Some(Lease {
            address: dhcp_repr.your_ip,
            subnet_mask,
            gateway: dhcp_repr.router.filter(|r| r.is_unicast()),
            dns_servers,
            domain_name,
            lease_duration,
            renewal_time: dhcp_repr.renew_duration.unwrap_or(default_t1),
            rebinding_time: dhcp_repr.rebind_duration.unwrap_or(default_t2),
            server_identifier,
            server_hardware_addr,
            acquired_at: now,
        })
    }

    fn fail(&mut self, failure: Failure) {
        self.failure = Some(failure);
        #[cfg(feature = "async")]
        self.waker.wake_all();
    }

    pub(crate) fn dispatch<F, E>(&mut self, cx: &mut Context, emit: F) -> Result<(), E>
    where
        F: FnOnce(&mut Context, (Ipv4Repr, UdpRepr, DhcpRepr)) -> Result<(), E>,
    {
        let now = cx.now();
        let ethernet_addr = cx.hardware_addr();

        let mut dhcp_repr = DhcpRepr {
            message_type: DhcpMessageType::Discover,
            transaction_id: self.config.transaction_id,
            secs: 0,
            client_hardware_address: ethernet_addr,
            client_ip: Ipv4Address::UNSPECIFIED,
            your_ip: Ipv4Address::UNSPECIFIED,
            server_ip: Ipv4Address::UNSPECIFIED,
            relay_agent_ip: Ipv4Address::UNSPECIFIED,
            broadcast: true,
            requested_ip: None,
            client_identifier: Some(ethernet_addr),
            server_identifier: None,
            parameter_request_list: Some(PARAMETER_REQUEST_LIST),
            max_size: Some(self.config.max_message_size),
            subnet_mask: None,
            router: None,
            dns_servers: None,
            domain_name: None,
            lease_duration: None,
            renew_duration: None,
            rebind_duration: None,
        };

        let udp_repr = UdpRepr {
            src_port: self.client_port,
            dst_port: self.server_port,
        };

        let mut ipv4_repr = Ipv4Repr {
            src_addr: Ipv4Address::UNSPECIFIED,
            dst_addr: Ipv4Address::BROADCAST,
            next_header: IpProtocol::Udp,
            payload_len: 0, // filled right before emit
            hop_limit: 64,
        };

        let step_timeout = self.config.step_timeout;
        let (step, phase) = match &mut self.state {
            ClientState::Idle => return Ok(()),
            ClientState::Bound(lease) => {
                if lease.expires_at().map_or(false, |t| t <= now) {
                    net_debug!("DHCP lease expired");
                    self.reset();
                }
                return Ok(());
            }
            ClientState::Discovering(step) => {
                dhcp_repr.secs = step.secs(now);
                (step, Phase::Discover)
            }
            ClientState::Requesting(state) => {
                dhcp_repr.message_type = DhcpMessageType::Request;
                dhcp_repr.secs = state.step.secs(now);
                dhcp_repr.requested_ip = Some(state.offered_ip);
                dhcp_repr.server_identifier = Some(state.server_identifier);
                (&mut state.step, Phase::Request)
            }
            ClientState::Renewing(state) => {
                if state.lease.expires_at().map_or(false, |t| t <= now) {
                    net_debug!("DHCP lease expired while renewing");
                    self.reset();
                    return Ok(());
                }
                dhcp_repr.message_type = DhcpMessageType::Request;
                dhcp_repr.secs = state.step.secs(now);
                dhcp_repr.client_ip = state.lease.address;
                dhcp_repr.broadcast = false;
                ipv4_repr.src_addr = state.lease.address;
                let phase = if state.rebinding {
                    Phase::Rebind
                } else {
                    Phase::Renew
                };
                (&mut state.step, phase)
            }
        };

        match step.deadline {
            Some(deadline) if now < deadline => Ok(()),
            Some(_) => {
                net_debug!("DHCP {} timed out", phase);
                self.step_timed_out(phase);
                Ok(())
            }
            None => {
                net_debug!(
                    "DHCP send {} to {}",
                    dhcp_repr.message_type,
                    ipv4_repr.dst_addr
                );
                ipv4_repr.payload_len = UDP_HEADER_LEN + dhcp_repr.buffer_len();
                emit(cx, (ipv4_repr, udp_repr, dhcp_repr))?;

                // Only update state after successfully sending.
                if step.started_at.is_none() {
                    step.started_at = Some(now);
                }
                step.deadline = Some(now + step_timeout);
                Ok(())
            }
        }
    }

    fn step_timed_out(&mut self, phase: Phase) {
        match core::mem::replace(&mut self.state, ClientState::Idle) {
            // A failed renewal keeps the lease until it expires.
            ClientState::Renewing(state) => self.state = ClientState::Bound(state.lease),
            _ => self.state = ClientState::Idle,
        }
        self.fail(Failure::Timeout(phase));
    }

    /// Query the socket for configuration changes and failures.
    ///
    /// A failure is reported first; the "configuration changed" flag is
    /// reported on the following call.
    pub fn poll(&mut self) -> Option<Event<'_>> {
        if let Some(failure) = self.failure.take() {
            return Some(Event::Failed(failure));
        }
        if !self.config_changed {
            return None;
        }
        self.config_changed = false;
        match &self.state {
            ClientState::Bound(lease) => Some(Event::Configured(lease)),
            _ => Some(Event::Deconfigured),
        }
    }

    /// This function _must_ be called when the configuration provided to the
    /// interface, by this DHCP socket, changes. It will update the `config_changed` field
    /// so that a subsequent call to `poll` will yield an event, and wake a possible waker.
    pub(crate) fn config_changed(&mut self) {
        self.config_changed = true;
        #[cfg(feature = "async")]
        self.waker.wake_all();
    }

    /// Register a waker.
    ///
    /// The waker is woken on state changes that might affect the return value
    /// of `poll` method calls.
    ///
    /// Notes:
    ///
    /// - Only one waker can be registered at a time. If another waker was previously registered,
    ///   it is overwritten and will no longer be woken.
    /// - The Waker is woken only once. Once woken, you must register it again to receive more wakes.
    #[cfg(feature = "async")]
    pub fn register_waker(&mut self, waker: &Waker) {
        self.waker.register(waker)
    }

    /// Adds another waker.
    #[cfg(feature = "async")]
    pub fn add_waker(&mut self, waker: &Waker) {
        self.waker.add(waker)
    }

    /// Clears all the wakers that were assigned to this socket
    #[cfg(feature = "async")]
    pub fn clear_waker(&mut self) {
        self.waker.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::vec::Vec as StdVec;

    const MY_MAC: EthernetAddress = EthernetAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
    const SERVER_MAC: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    const SERVER_IP: Ipv4Address = Ipv4Address([192, 168, 1, 1]);
    const MY_IP: Ipv4Address = Ipv4Address([192, 168, 1, 50]);
    const MASK_24: Ipv4Address = Ipv4Address([255, 255, 255, 0]);
    const DNS_IP: Ipv4Address = Ipv4Address([8, 8, 8, 8]);

    fn context(now_millis: i64) -> Context {
        let mut cx = Context::new(MY_MAC);
        cx.set_now(Instant::from_millis(now_millis));
        cx
    }

    fn server_repr(message_type: DhcpMessageType) -> DhcpRepr<'static> {
        let mut dns_servers = Vec::new();
        dns_servers.push(DNS_IP).unwrap();
        DhcpRepr {
            message_type,
            transaction_id: DEFAULT_TRANSACTION_ID,
            secs: 0,
            client_hardware_address: MY_MAC,
            client_ip: Ipv4Address::UNSPECIFIED,
            your_ip: MY_IP,
            server_ip: SERVER_IP,
            relay_agent_ip: Ipv4Address::UNSPECIFIED,
            broadcast: true,
            requested_ip: None,
            client_identifier: None,
            server_identifier: Some(SERVER_IP),
            parameter_request_list: None,
            max_size: None,
            subnet_mask: Some(MASK_24),
            router: Some(SERVER_IP),
            dns_servers: Some(dns_servers),
            domain_name: Some("example.lan"),
            lease_duration: Some(86400),
            renew_duration: None,
            rebind_duration: None,
        }
    }

    fn emit_reply(repr: &DhcpRepr) -> StdVec<u8> {
        let mut bytes = vec![0; repr.buffer_len()];
        repr.emit(&mut DhcpPacket::new_unchecked(&mut bytes[..]))
            .unwrap();
        bytes
    }

    fn recv(socket: &mut Socket, cx: &mut Context, repr: &DhcpRepr) {
        let ip_repr = Ipv4Repr {
            src_addr: SERVER_IP,
            dst_addr: Ipv4Address::BROADCAST,
            next_header: IpProtocol::Udp,
            payload_len: 0,
            hop_limit: 64,
        };
        let udp_repr = UdpRepr {
            src_port: DHCP_SERVER_PORT,
            dst_port: DHCP_CLIENT_PORT,
        };
        let bytes = emit_reply(repr);
        socket.process(cx, &ip_repr, SERVER_MAC, &udp_repr, &bytes);
    }

    /// Dispatch once and return what was sent, if anything.
    fn send(socket: &mut Socket, cx: &mut Context) -> Option<(Ipv4Repr, DhcpMessageType, DhcpRepr<'static>)> {
        let mut sent = None;
        socket
            .dispatch(cx, |_, (ip_repr, _udp_repr, dhcp_repr)| {
                sent = Some((ip_repr, dhcp_repr.message_type, dhcp_repr.requested_ip, dhcp_repr.server_identifier, dhcp_repr.client_ip));
                Ok::<(), ()>(())
            })
            .unwrap();
        sent.map(|(ip_repr, message_type, requested_ip, server_identifier, client_ip)| {
            let mut repr = server_repr(message_type);
            repr.requested_ip = requested_ip;
            repr.server_identifier = server_identifier;
            repr.client_ip = client_ip;
            (ip_repr, message_type, repr)
        })
    }

    fn bound_socket(cx: &mut Context) -> Socket {
        let mut socket = Socket::new();
        socket.start();
        send(&mut socket, cx).unwrap();
        recv(&mut socket, cx, &server_repr(DhcpMessageType::Offer));
        send(&mut socket, cx).unwrap();
        recv(&mut socket, cx, &server_repr(DhcpMessageType::Ack));
        socket
    }

    #[test]
    fn test_idle_sends_nothing() {
        let mut cx = context(0);
        let mut socket = Socket::new();
        assert!(send(&mut socket, &mut cx).is_none());
        assert_eq!(socket.poll(), None);
        assert_eq!(socket.poll_at(&mut cx), PollAt::Ingress);
    }

    #[test]
    fn test_discover_contents() {
        let mut cx = context(0);
        let mut socket = Socket::new();
        socket.start();
        assert_eq!(socket.poll_at(&mut cx), PollAt::Now);

        let mut bytes = StdVec::new();
        socket
            .dispatch(&mut cx, |_, (ip_repr, udp_repr, dhcp_repr)| {
                assert_eq!(ip_repr.src_addr, Ipv4Address::UNSPECIFIED);
                assert_eq!(ip_repr.dst_addr, Ipv4Address::BROADCAST);
                assert_eq!(udp_repr.src_port, 68);
                assert_eq!(udp_repr.dst_port, 67);
                assert_eq!(ip_repr.payload_len, 8 + dhcp_repr.buffer_len());
                bytes = emit_reply(&dhcp_repr);
                Ok::<(), ()>(())
            })
            .unwrap();

        let packet = DhcpPacket::new_checked(&bytes[..]).unwrap();
        let repr = DhcpRepr::parse(&packet).unwrap();
        assert_eq!(bytes.len(), 300);
        assert_eq!(repr.message_type, DhcpMessageType::Discover);
        assert_eq!(repr.transaction_id, 0x12345678);
        assert_eq!(repr.client_hardware_address, MY_MAC);
        assert_eq!(repr.client_identifier, Some(MY_MAC));
        assert!(repr.broadcast);
        assert_eq!(repr.parameter_request_list, Some(&[1, 3, 6, 15, 51, 58, 59][..]));
        assert_eq!(repr.max_size, Some(1500));

        // one message per step
        assert!(send(&mut socket, &mut cx).is_none());
        assert_eq!(
            socket.poll_at(&mut cx),
            PollAt::Time(Instant::from_millis(3000))
        );
    }

    #[test]
    fn test_full_exchange() {
        let mut cx = context(0);
        let mut socket = Socket::new();
        socket.start();
        let (_, message_type, _) = send(&mut socket, &mut cx).unwrap();
        assert_eq!(message_type, DhcpMessageType::Discover);

        cx.set_now(Instant::from_millis(1500));
        recv(&mut socket, &mut cx, &server_repr(DhcpMessageType::Offer));
        let (ip_repr, message_type, repr) = send(&mut socket, &mut cx).unwrap();
        assert_eq!(message_type, DhcpMessageType::Request);
        assert_eq!(ip_repr.dst_addr, Ipv4Address::BROADCAST);
        assert_eq!(repr.requested_ip, Some(MY_IP));
        assert_eq!(repr.server_identifier, Some(SERVER_IP));

        cx.set_now(Instant::from_millis(2000));
        recv(&mut socket, &mut cx, &server_repr(DhcpMessageType::Ack));

        let lease = match socket.poll() {
            Some(Event::Configured(lease)) => lease.clone(),
            other => panic!("unexpected event {other:?}"),
        };
        assert_eq!(lease.address, MY_IP);
        assert_eq!(lease.subnet_mask, MASK_24);
        assert_eq!(lease.gateway, Some(SERVER_IP));
        assert_eq!(&lease.dns_servers[..], &[DNS_IP]);
        assert_eq!(lease.domain_name.as_str(), "example.lan");
        assert_eq!(lease.lease_duration, 86400);
        assert_eq!(lease.renewal_time, 43200);
        assert_eq!(lease.rebinding_time, 75600);
        assert_eq!(lease.server_identifier, SERVER_IP);
        assert_eq!(lease.server_hardware_addr, SERVER_MAC);
        assert_eq!(lease.acquired_at, Instant::from_millis(2000));
        assert_eq!(
            lease.renew_at(),
            Some(Instant::from_millis(2000) + Duration::from_secs(43200))
        );
        assert_eq!(socket.poll(), None);
        assert!(!socket.is_busy());
    }

    #[test]
    fn test_ignores_foreign_replies() {
        let mut cx = context(0);
        let mut socket = Socket::new();
        socket.start();
        send(&mut socket, &mut cx).unwrap();

        let mut offer = server_repr(DhcpMessageType::Offer);
        offer.transaction_id = 0xdeadbeef;
        recv(&mut socket, &mut cx, &offer);

        let mut offer = server_repr(DhcpMessageType::Offer);
        offer.client_hardware_address = SERVER_MAC;
        recv(&mut socket, &mut cx, &offer);

        // an ACK is not what we are waiting for
        recv(&mut socket, &mut cx, &server_repr(DhcpMessageType::Ack));

        assert!(send(&mut socket, &mut cx).is_none());
        assert_eq!(socket.poll(), None);
        assert!(socket.lease().is_none());
    }

    #[test]
    fn test_ack_without_subnet_mask_is_ignored() {
        let mut cx = context(0);
        let mut socket = Socket::new();
        socket.start();
        send(&mut socket, &mut cx).unwrap();
        recv(&mut socket, &mut cx, &server_repr(DhcpMessageType::Offer));
        send(&mut socket, &mut cx).unwrap();

        let mut ack = server_repr(DhcpMessageType::Ack);
        ack.subnet_mask = None;
        recv(&mut socket, &mut cx, &ack);
        assert_eq!(socket.poll(), None);
        assert!(socket.is_busy());

        recv(&mut socket, &mut cx, &server_repr(DhcpMessageType::Ack));
        assert!(matches!(socket.poll(), Some(Event::Configured(_))));
    }

    #[test]
    fn test_discover_timeout() {
        let mut cx = context(0);
        let mut socket = Socket::new();
        socket.start();
        send(&mut socket, &mut cx).unwrap();

        cx.set_now(Instant::from_millis(2999));
        assert!(send(&mut socket, &mut cx).is_none());
        assert_eq!(socket.poll(), None);

        cx.set_now(Instant::from_millis(3000));
        assert!(send(&mut socket, &mut cx).is_none());
        assert_eq!(
            socket.poll(),
            Some(Event::Failed(Failure::Timeout(Phase::Discover)))
        );
        assert_eq!(socket.poll(), None);
        assert!(!socket.is_busy());
        assert!(socket.lease().is_none());

        // no retry
        cx.set_now(Instant::from_millis(10000));
        assert!(send(&mut socket, &mut cx).is_none());
    }

    #[test]
    fn test_nak_fails_request() {
        let mut cx = context(0);
        let mut socket = Socket::new();
        socket.start();
        send(&mut socket, &mut cx).unwrap();
        recv(&mut socket, &mut cx, &server_repr(DhcpMessageType::Offer));
        send(&mut socket, &mut cx).unwrap();

        let mut nak = server_repr(DhcpMessageType::Nak);
        nak.your_ip = Ipv4Address::UNSPECIFIED;
        recv(&mut socket, &mut cx, &nak);
        assert_eq!(socket.poll(), Some(Event::Failed(Failure::Nak)));
        assert!(!socket.is_busy());
    }

    #[test]
    fn test_renew_success() {
        let mut cx = context(0);
        let mut socket = bound_socket(&mut cx);
        assert!(matches!(socket.poll(), Some(Event::Configured(_))));

        cx.set_now(Instant::from_secs(43200));
        assert!(socket.renew());
        assert!(!socket.renew());
        let (ip_repr, message_type, repr) = send(&mut socket, &mut cx).unwrap();
        assert_eq!(message_type, DhcpMessageType::Request);
        assert_eq!(ip_repr.src_addr, MY_IP);
        assert_eq!(repr.client_ip, MY_IP);
        assert_eq!(repr.requested_ip, None);

        let mut ack = server_repr(DhcpMessageType::Ack);
        ack.client_ip = MY_IP;
        recv(&mut socket, &mut cx, &ack);
        match socket.poll() {
            Some(Event::Configured(lease)) => {
                assert_eq!(lease.acquired_at, Instant::from_secs(43200))
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_rebind_timeout_keeps_lease() {
        let mut cx = context(0);
        let mut socket = bound_socket(&mut cx);
        socket.poll();

        assert!(socket.rebind());
        send(&mut socket, &mut cx).unwrap();
        cx.set_now(Instant::from_secs(3));
        send(&mut socket, &mut cx);
        assert_eq!(
            socket.poll(),
            Some(Event::Failed(Failure::Timeout(Phase::Rebind)))
        );
        assert_eq!(socket.poll(), None);
        assert_eq!(socket.lease().map(|l| l.address), Some(MY_IP));
    }

    #[test]
    fn test_lease_expiry_deconfigures() {
        let mut cx = context(0);
        let mut socket = bound_socket(&mut cx);
        socket.poll();
        assert_eq!(
            socket.poll_at(&mut cx),
            PollAt::Time(Instant::from_secs(86400))
        );

        cx.set_now(Instant::from_secs(86400));
        assert!(send(&mut socket, &mut cx).is_none());
        assert_eq!(socket.poll(), Some(Event::Deconfigured));
        assert!(socket.lease().is_none());
    }

    #[test]
    fn test_infinite_lease() {
        let mut ack = server_repr(DhcpMessageType::Ack);
        ack.lease_duration = Some(INFINITE_LEASE);
        let lease = Socket::parse_ack(Instant::ZERO, &ack, SERVER_IP, SERVER_MAC).unwrap();
        assert_eq!(lease.renew_at(), None);
        assert_eq!(lease.expires_at(), None);
    }

    #[test]
    fn test_explicit_timers() {
        let mut ack = server_repr(DhcpMessageType::Ack);
        ack.renew_duration = Some(100);
        ack.rebind_duration = Some(200);
        let lease = Socket::parse_ack(Instant::ZERO, &ack, SERVER_IP, SERVER_MAC).unwrap();
        assert_eq!(lease.renewal_time, 100);
        assert_eq!(lease.rebinding_time, 200);
    }
}
