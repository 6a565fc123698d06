use core::fmt;
#[cfg(feature = "async")]
use core::task::Waker;

use heapless::{String, Vec};

use crate::iface::Context;
use crate::time::{Duration, Instant};
use crate::wire::dns::{self, Flags, Opcode, Question, Rcode, Record, RecordData, MAX_NAME_LEN};
use crate::wire::{
    DnsPacket, DnsQueryType, DnsRepr, IpProtocol, Ipv4Address, Ipv4Repr, UdpRepr, UDP_HEADER_LEN,
};

#[cfg(feature = "async")]
use super::WakerRegistration;

use super::PollAt;

/// Local port queries are sent from unless configured otherwise.
pub const DEFAULT_LOCAL_PORT: u16 = 49152;

/// Most DNS servers a resolver fails over between.
pub const MAX_SERVER_COUNT: usize = 2;

/// Failure of a query, numbered like the Ethernet library's `DNSClient` results.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No server answered within the retry budget.
    Timeout,
    /// No usable server is configured.
    InvalidServer,
    /// The answer did not fit in one datagram.
    Truncated,
    /// The answer was an error, or carried no address.
    InvalidResponse,
}

impl Error {
    /// Result code as returned by the Ethernet library (`-1` to `-4`).
    pub const fn code(&self) -> i32 {
        match self {
            Error::Timeout => -1,
            Error::InvalidServer => -2,
            Error::Truncated => -3,
            Error::InvalidResponse => -4,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => write!(f, "timed out"),
            Error::InvalidServer => write!(f, "invalid server"),
            Error::Truncated => write!(f, "truncated response"),
            Error::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Error returned by [`Socket::start_query`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StartQueryError {
    /// A query is already in flight.
    Busy,
    /// The name cannot be encoded.
    InvalidName,
    /// No server is configured.
    InvalidServer,
}

impl fmt::Display for StartQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartQueryError::Busy => write!(f, "query in progress"),
            StartQueryError::InvalidName => write!(f, "invalid name"),
            StartQueryError::InvalidServer => write!(f, "no server configured"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for StartQueryError {}

/// Error returned by [`Socket::get_query_result`]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GetQueryResultError {
    /// No query was started, or its result was already taken.
    Idle,
    /// The query is still in flight.
    Pending,
    /// The query failed.
    Failed(Error),
}

impl fmt::Display for GetQueryResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GetQueryResultError::Idle => write!(f, "no query"),
            GetQueryResultError::Pending => write!(f, "query pending"),
            GetQueryResultError::Failed(e) => write!(f, "query failed: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for GetQueryResultError {}

/// Outcome of a successful query.
#[derive(Debug, PartialEq, Eq, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Resolved {
    /// Name that was queried.
    pub name: String<MAX_NAME_LEN>,
    /// Owner of the address record, after following aliases.
    pub canonical_name: String<MAX_NAME_LEN>,
    pub address: Ipv4Address,
}

/// Timeout and retry configuration.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RetryConfig {
    /// How long a query may wait to leave, e.g. for address resolution.
    pub send_timeout: Duration,
    /// How long to wait for the answer once the query left.
    pub receive_timeout: Duration,
    /// Extra attempts on the same server before failing over.
    pub retries: u8,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(3),
            receive_timeout: Duration::from_secs(3),
            retries: 1,
        }
    }
}

/// Resolver state.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    /// Waiting for a query.
    UnreceivedRequest,
    /// A query was accepted.
    Init,
    /// Ready to send to the selected server.
    StartSending,
    /// The query is waiting to leave.
    SendingRequestWait,
    /// The query left; waiting for the answer.
    ReceivingRequestWait,
    /// An answer arrived; delivered on the next poll.
    Finish,
    /// The attempt is being abandoned.
    Cancelling,
    /// Waiting for the abandoned attempt to be torn down.
    CancellingWait,
    /// The attempt is torn down; retry, fail over or give up.
    Cancelled,
}

/// Input of the resolver state machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// The application asked for a query.
    ReceivedRequest { has_secondary: bool },
    /// The socket is being polled; `timed_out` when the current deadline passed.
    Periodic { timed_out: bool },
    SendComplete,
    ReceiveComplete,
    CancelComplete,
    /// The server (or gateway) address could not be resolved on the link.
    SendArpTimeout,
}

/// Side effect requested by a transition.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    None,
    /// Queue the query for the selected server and arm the send deadline.
    SendQuery,
    /// Arm the receive deadline.
    AwaitResponse,
    /// Stop waiting for the current attempt.
    CancelTransfer,
    /// Hand the recorded outcome to the application.
    Deliver,
    /// Give up with the given error.
    Fail(Error),
}

/// Which configured server the machine is talking to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Server {
    Primary,
    Secondary,
}

impl Server {
    const fn index(&self) -> usize {
        match self {
            Server::Primary => 0,
            Server::Secondary => 1,
        }
    }
}

/// The resolver state machine.
///
/// [`step`](#method.step) is pure: the socket feeds it events and performs the
/// returned actions.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Machine {
    pub state: State,
    pub server: Server,
    /// Attempts made on the current server, minus one.
    pub attempt: u8,
    pub has_secondary: bool,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine {
    pub const fn new() -> Self {
        Machine {
            state: State::UnreceivedRequest,
            server: Server::Primary,
            attempt: 0,
            has_secondary: false,
        }
    }

    const fn with_state(self, state: State) -> Self {
        Machine { state, ..self }
    }

    /// Compute the next machine and the action to perform.
    ///
    /// Pairs that make no sense leave the machine unchanged.
    pub fn step(self, event: Event, config: &RetryConfig) -> (Machine, Action) {
        use self::Event as E;
        use self::State as S;

        match (self.state, event) {
            (S::UnreceivedRequest, E::ReceivedRequest { has_secondary }) => (
                Machine {
                    state: S::Init,
                    server: Server::Primary,
                    attempt: 0,
                    has_secondary,
                },
                Action::None,
            ),
            (S::Init, E::Periodic { .. }) => (self.with_state(S::StartSending), Action::None),
            (S::StartSending, E::Periodic { .. }) => {
                (self.with_state(S::SendingRequestWait), Action::SendQuery)
            }
            (S::SendingRequestWait, E::SendComplete) => {
                (self.with_state(S::ReceivingRequestWait), Action::AwaitResponse)
            }
            (S::SendingRequestWait, E::SendArpTimeout)
            | (S::SendingRequestWait, E::Periodic { timed_out: true })
            | (S::ReceivingRequestWait, E::Periodic { timed_out: true }) => {
                (self.with_state(S::Cancelling), Action::None)
            }
            (S::SendingRequestWait, E::Periodic { timed_out: false })
            | (S::ReceivingRequestWait, E::Periodic { timed_out: false }) => (self, Action::None),
            (S::ReceivingRequestWait, E::ReceiveComplete) => {
                (self.with_state(S::Finish), Action::None)
            }
            (S::Finish, E::Periodic { .. }) => {
                (self.with_state(S::UnreceivedRequest), Action::Deliver)
            }
            (S::Cancelling, E::Periodic { .. }) => {
                (self.with_state(S::CancellingWait), Action::CancelTransfer)
            }
            (S::CancellingWait, E::CancelComplete) => (self.with_state(S::Cancelled), Action::None),
            (S::Cancelled, E::Periodic { .. }) => {
                if self.attempt < config.retries {
                    let machine = Machine {
                        state: S::StartSending,
                        attempt: self.attempt + 1,
                        ..self
                    };
                    (machine, Action::None)
                } else if self.server == Server::Primary && self.has_secondary {
                    let machine = Machine {
                        state: S::StartSending,
                        server: Server::Secondary,
                        attempt: 0,
                        ..self
                    };
                    (machine, Action::None)
                } else {
                    (Machine::new(), Action::Fail(Error::Timeout))
                }
            }
            (S::UnreceivedRequest, E::Periodic { .. }) => (self, Action::None),
            (state, event) => {
                net_debug!("dns: ignoring {:?} in state {:?}", event, state);
                (self, Action::None)
            }
        }
    }
}

/// A DNS resolver socket.
///
/// One A-record query is in flight at a time. Start it with
/// [`start_query`](#method.start_query), keep polling the interface, and
/// collect the outcome with [`get_query_result`](#method.get_query_result).
#[derive(Debug)]
pub struct Socket {
    machine: Machine,
    config: RetryConfig,
    servers: Vec<Ipv4Address, MAX_SERVER_COUNT>,
    local_port: u16,
    query_id: u16,
    name: String<MAX_NAME_LEN>,
    encoded_name: Vec<u8, MAX_NAME_LEN>,
    deadline: Option<Instant>,
    /// Outcome of the answered attempt, until delivered.
    outcome: Option<Result<Resolved, Error>>,
    /// Delivered outcome, until taken.
    result: Option<Result<Resolved, Error>>,
    hop_limit: u8,
    #[cfg(feature = "async")]
    waker: WakerRegistration,
}

impl Default for Socket {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl Socket {
    /// Create a DNS socket using the given servers, primary first.
    ///
    /// Servers past [`MAX_SERVER_COUNT`] and non-unicast addresses are ignored.
    pub fn new(servers: &[Ipv4Address]) -> Socket {
        let mut socket = Socket {
            machine: Machine::new(),
            config: RetryConfig::default(),
            servers: Vec::new(),
            local_port: DEFAULT_LOCAL_PORT,
            query_id: 0,
            name: String::new(),
            encoded_name: Vec::new(),
            deadline: None,
            outcome: None,
            result: None,
            hop_limit: 64,
            #[cfg(feature = "async")]
            waker: WakerRegistration::new(),
        };
        socket.update_servers(servers);
        socket
    }

    /// Replace the server list. A query in flight keeps its attempt going.
    pub fn update_servers(&mut self, servers: &[Ipv4Address]) {
        self.servers.clear();
        for server in servers.iter().filter(|s| s.is_unicast()) {
            if self.servers.push(*server).is_err() {
                net_debug!("dns: too many servers, ignoring {}", server);
            }
        }
    }

    pub fn servers(&self) -> &[Ipv4Address] {
        &self.servers
    }

    pub fn set_retry_config(&mut self, config: RetryConfig) {
        self.config = config;
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.config
    }

    /// Set the local port queries are sent from.
    pub fn set_local_port(&mut self, port: u16) {
        self.local_port = port;
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Return the resolver state.
    pub fn state(&self) -> State {
        self.machine.state
    }

    /// Return the ID of the latest query.
    pub fn query_id(&self) -> u16 {
        self.query_id
    }

    /// Return the name of the latest query, without a trailing dot.
    pub fn query_name(&self) -> &str {
        self.name.as_str()
    }

    /// Start resolving `name` to an IPv4 address.
    ///
    /// A result of a previous query that was never taken is dropped.
    pub fn start_query(&mut self, name: &str) -> Result<(), StartQueryError> {
        if self.machine.state != State::UnreceivedRequest {
            return Err(StartQueryError::Busy);
        }
        if self.servers.is_empty() {
            return Err(StartQueryError::InvalidServer);
        }
        let encoded_name = dns::encode_name(name).map_err(|_| StartQueryError::InvalidName)?;

        self.name.clear();
        self.name
            .push_str(name.strip_suffix('.').unwrap_or(name))
            .map_err(|_| StartQueryError::InvalidName)?;
        self.encoded_name = encoded_name;
        self.query_id = self.query_id.wrapping_add(1);
        self.outcome = None;
        self.result = None;
        self.deadline = None;

        net_debug!("dns: query #{} for {}", self.query_id, self.name.as_str());

        let has_secondary = self.servers.len() > 1;
        self.feed(Instant::ZERO, Event::ReceivedRequest { has_secondary });
        Ok(())
    }

    /// Take the result of the query.
    pub fn get_query_result(&mut self) -> Result<Resolved, GetQueryResultError> {
        match self.result.take() {
            Some(Ok(resolved)) => Ok(resolved),
            Some(Err(e)) => Err(GetQueryResultError::Failed(e)),
            None if self.machine.state == State::UnreceivedRequest => {
                Err(GetQueryResultError::Idle)
            }
            None => Err(GetQueryResultError::Pending),
        }
    }

    /// Abandon the query in flight, if any.
    pub fn cancel_query(&mut self) {
        net_trace!("dns: cancel query #{}", self.query_id);
        self.machine = Machine::new();
        self.deadline = None;
        self.outcome = None;
        self.result = None;
    }

    /// Register a waker, woken when the query completes.
    #[cfg(feature = "async")]
    pub fn register_query_waker(&mut self, waker: &Waker) {
        self.waker.register(waker);
    }

    fn current_server(&self) -> Option<Ipv4Address> {
        self.servers.get(self.machine.server.index()).copied()
    }

    fn feed(&mut self, now: Instant, event: Event) {
        let (machine, action) = self.machine.step(event, &self.config);
        if machine.state != self.machine.state {
            net_trace!("dns: {:?} -> {:?}", self.machine.state, machine.state);
        }
        self.machine = machine;

        match action {
            Action::None => {}
            Action::SendQuery => self.deadline = Some(now + self.config.send_timeout),
            Action::AwaitResponse => self.deadline = Some(now + self.config.receive_timeout),
            Action::CancelTransfer => {
                self.deadline = None;
                self.outcome = None;
                self.feed(now, Event::CancelComplete);
            }
            Action::Deliver => {
                self.deadline = None;
                self.result = Some(self.outcome.take().unwrap_or(Err(Error::InvalidResponse)));
                #[cfg(feature = "async")]
                self.waker.wake_all();
            }
            Action::Fail(e) => {
                net_debug!("dns: query #{} failed: {}", self.query_id, e);
                self.deadline = None;
                self.result = Some(Err(e));
                #[cfg(feature = "async")]
                self.waker.wake_all();
            }
        }
    }

    /// The query could not leave because the next hop never answered ARP.
    pub(crate) fn arp_timeout(&mut self, now: Instant) {
        if self.machine.state == State::SendingRequestWait {
            net_debug!("dns: address resolution timed out");
            self.feed(now, Event::SendArpTimeout);
        }
    }

    pub(crate) fn accepts(&self, ip_repr: &Ipv4Repr, repr: &UdpRepr) -> bool {
        self.machine.state == State::ReceivingRequestWait
            && repr.dst_port == self.local_port
            && repr.src_port == dns::SERVER_PORT
            && Some(ip_repr.src_addr) == self.current_server()
    }

    pub(crate) fn process(
        &mut self,
        cx: &mut Context,
        ip_repr: &Ipv4Repr,
        repr: &UdpRepr,
        payload: &[u8],
    ) {
        if !self.accepts(ip_repr, repr) {
            return;
        }

        let packet = match DnsPacket::new_checked(payload) {
            Ok(packet) => packet,
            Err(_) => {
                net_debug!("dns: invalid pkt from {}", ip_repr.src_addr);
                return;
            }
        };
        if packet.transaction_id() != self.query_id {
            net_debug!(
                "dns: ignoring answer with id {}, expected {}",
                packet.transaction_id(),
                self.query_id
            );
            return;
        }
        if !packet.flags().contains(Flags::RESPONSE) {
            return;
        }

        let outcome = self.parse_answer(&packet);
        if let Err(e) = &outcome {
            net_debug!("dns: answer to query #{} rejected: {}", self.query_id, e);
        }
        self.outcome = Some(outcome);
        self.feed(cx.now(), Event::ReceiveComplete);
    }

    fn parse_answer(&self, packet: &DnsPacket<&[u8]>) -> Result<Resolved, Error> {
        if packet.opcode() != Opcode::Query {
            return Err(Error::InvalidResponse);
        }
        if packet.flags().contains(Flags::TRUNCATED) {
            return Err(Error::Truncated);
        }
        if packet.rcode() != Rcode::NoError {
            return Err(Error::InvalidResponse);
        }

        let message = packet.message();
        let mut offset = packet.questions_offset();
        for _ in 0..packet.question_count() {
            let (next, _) = Question::parse(message, offset).map_err(|_| Error::InvalidResponse)?;
            offset = next;
        }

        for _ in 0..packet.answer_record_count() {
            let (next, record): (usize, Record) =
                Record::parse(message, offset).map_err(|_| Error::InvalidResponse)?;
            offset = next;

            match record.data {
                RecordData::A(address) => {
                    let mut canonical_name = String::new();
                    record
                        .name
                        .expand(&mut canonical_name)
                        .map_err(|_| Error::InvalidResponse)?;
                    return Ok(Resolved {
                        name: self.name.clone(),
                        canonical_name,
                        address,
                    });
                }
                RecordData::Cname(_) => net_trace!("dns: skipping CNAME record"),
                RecordData::Other(type_, _) => net_trace!("dns: skipping {:?} record", type_),
            }
        }

        Err(Error::InvalidResponse)
    }

    pub(crate) fn dispatch<F, E>(&mut self, cx: &mut Context, emit: F) -> Result<(), E>
    where
        F: FnOnce(&mut Context, (Ipv4Repr, UdpRepr, DnsRepr)) -> Result<(), E>,
    {
        let now = cx.now();

        let timed_out = self.deadline.map_or(false, |deadline| now >= deadline);
        if timed_out
            && matches!(
                self.machine.state,
                State::SendingRequestWait | State::ReceivingRequestWait
            )
        {
            net_debug!("dns: query #{} timed out", self.query_id);
            self.feed(now, Event::Periodic { timed_out: true });
        }

        // Walk through the states that only wait for a poll.
        while matches!(
            self.machine.state,
            State::Init | State::StartSending | State::Finish | State::Cancelling | State::Cancelled
        ) {
            self.feed(now, Event::Periodic { timed_out: false });
        }

        match self.machine.state {
            State::SendingRequestWait => {
                let server = match self.current_server() {
                    Some(server) => server,
                    None => {
                        // The server list shrank under the query.
                        self.feed(now, Event::SendArpTimeout);
                        return Ok(());
                    }
                };

                let dns_repr = DnsRepr {
                    transaction_id: self.query_id,
                    opcode: Opcode::Query,
                    flags: Flags::RECURSION_DESIRED,
                    name: &self.encoded_name,
                    query_type: DnsQueryType::A,
                };
                let udp_repr = UdpRepr {
                    src_port: self.local_port,
                    dst_port: dns::SERVER_PORT,
                };
                let src_addr = match cx.ipv4_addr() {
                    Some(addr) => addr,
                    None => return Ok(()),
                };
                let ip_repr = Ipv4Repr {
                    src_addr,
                    dst_addr: server,
                    next_header: IpProtocol::Udp,
                    payload_len: UDP_HEADER_LEN + dns_repr.buffer_len(),
                    hop_limit: self.hop_limit,
                };

                net_trace!("dns: sending query #{} to {}", self.query_id, server);
                emit(cx, (ip_repr, udp_repr, dns_repr))?;
                self.feed(now, Event::SendComplete);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn poll_at(&self, _cx: &mut Context) -> PollAt {
        match self.machine.state {
            State::UnreceivedRequest | State::CancellingWait => PollAt::Ingress,
            State::SendingRequestWait => PollAt::Now,
            State::ReceivingRequestWait => match self.deadline {
                Some(deadline) => PollAt::Time(deadline),
                None => PollAt::Now,
            },
            State::Init
            | State::StartSending
            | State::Finish
            | State::Cancelling
            | State::Cancelled => PollAt::Now,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::wire::EthernetAddress;
    use std::vec::Vec as StdVec;

    const MY_IP: Ipv4Address = Ipv4Address([192, 168, 1, 50]);
    const PRIMARY: Ipv4Address = Ipv4Address([192, 168, 1, 1]);
    const SECONDARY: Ipv4Address = Ipv4Address([8, 8, 8, 8]);

    fn context(now_millis: i64) -> Context {
        let mut cx = Context::new(EthernetAddress([0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]));
        cx.set_ipv4_config(MY_IP, Ipv4Address::new(255, 255, 255, 0), Some(PRIMARY));
        cx.set_now(Instant::from_millis(now_millis));
        cx
    }

    /// Dispatch once; return the server and query ID sent to, if any.
    fn send(socket: &mut Socket, cx: &mut Context) -> Option<(Ipv4Address, u16)> {
        let mut sent = None;
        socket
            .dispatch(cx, |_, (ip_repr, udp_repr, dns_repr)| {
                assert_eq!(udp_repr.dst_port, 53);
                assert_eq!(ip_repr.src_addr, MY_IP);
                sent = Some((ip_repr.dst_addr, dns_repr.transaction_id));
                Ok::<(), ()>(())
            })
            .unwrap();
        sent
    }

    fn answer(id: u16, flags: u16, answers: &[&[u8]]) -> StdVec<u8> {
        let mut bytes = StdVec::new();
        bytes.extend_from_slice(&id.to_be_bytes());
        bytes.extend_from_slice(&flags.to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x01]);
        bytes.extend_from_slice(&(answers.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        // question at 12: example.com A IN
        bytes.extend_from_slice(b"\x07example\x03com\x00\x00\x01\x00\x01");
        for answer in answers {
            bytes.extend_from_slice(answer);
        }
        bytes
    }

    // example.com CNAME www.example.com (www label at 41, then pointer to 12)
    const CNAME_RECORD: &[u8] = &[
        0xc0, 0x0c, 0x00, 0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x3c, 0x00, 0x06, 0x03, b'w', b'w',
        b'w', 0xc0, 0x0c,
    ];
    // www.example.com A 93.184.216.34
    const A_RECORD: &[u8] = &[
        0xc0, 0x29, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x3c, 0x00, 0x04, 93, 184, 216, 34,
    ];

    fn recv(socket: &mut Socket, cx: &mut Context, from: Ipv4Address, bytes: &[u8]) {
        let ip_repr = Ipv4Repr {
            src_addr: from,
            dst_addr: MY_IP,
            next_header: IpProtocol::Udp,
            payload_len: 8 + bytes.len(),
            hop_limit: 64,
        };
        let udp_repr = UdpRepr {
            src_port: 53,
            dst_port: DEFAULT_LOCAL_PORT,
        };
        socket.process(cx, &ip_repr, &udp_repr, bytes);
    }

    #[test]
    fn test_machine_happy_path() {
        let config = RetryConfig::default();
        let machine = Machine::new();
        let (machine, action) = machine.step(Event::ReceivedRequest { has_secondary: false }, &config);
        assert_eq!((machine.state, action), (State::Init, Action::None));
        let (machine, _) = machine.step(Event::Periodic { timed_out: false }, &config);
        assert_eq!(machine.state, State::StartSending);
        let (machine, action) = machine.step(Event::Periodic { timed_out: false }, &config);
        assert_eq!((machine.state, action), (State::SendingRequestWait, Action::SendQuery));
        let (machine, action) = machine.step(Event::SendComplete, &config);
        assert_eq!(
            (machine.state, action),
            (State::ReceivingRequestWait, Action::AwaitResponse)
        );
        let (machine, _) = machine.step(Event::ReceiveComplete, &config);
        assert_eq!(machine.state, State::Finish);
        let (machine, action) = machine.step(Event::Periodic { timed_out: false }, &config);
        assert_eq!((machine.state, action), (State::UnreceivedRequest, Action::Deliver));
    }

    #[test]
    fn test_machine_unexpected_event_keeps_state() {
        let config = RetryConfig::default();
        let machine = Machine::new().with_state(State::ReceivingRequestWait);
        assert_eq!(
            machine.step(Event::SendComplete, &config),
            (machine, Action::None)
        );
        let machine = Machine::new();
        assert_eq!(
            machine.step(Event::CancelComplete, &config),
            (machine, Action::None)
        );
    }

    #[test]
    fn test_machine_retry_then_failover_then_timeout() {
        let config = RetryConfig {
            retries: 1,
            ..RetryConfig::default()
        };
        let cancel = |machine: Machine| {
            let (machine, _) = machine.step(Event::Periodic { timed_out: true }, &config);
            assert_eq!(machine.state, State::Cancelling);
            let (machine, action) = machine.step(Event::Periodic { timed_out: false }, &config);
            assert_eq!((machine.state, action), (State::CancellingWait, Action::CancelTransfer));
            let (machine, _) = machine.step(Event::CancelComplete, &config);
            assert_eq!(machine.state, State::Cancelled);
            machine.step(Event::Periodic { timed_out: false }, &config)
        };

        let machine = Machine {
            state: State::ReceivingRequestWait,
            server: Server::Primary,
            attempt: 0,
            has_secondary: true,
        };
        let (machine, action) = cancel(machine);
        assert_eq!(action, Action::None);
        assert_eq!((machine.state, machine.server, machine.attempt), (State::StartSending, Server::Primary, 1));

        let (machine, action) = cancel(machine.with_state(State::SendingRequestWait));
        assert_eq!(action, Action::None);
        assert_eq!((machine.state, machine.server, machine.attempt), (State::StartSending, Server::Secondary, 0));

        let (machine, _) = cancel(machine.with_state(State::ReceivingRequestWait));
        assert_eq!((machine.server, machine.attempt), (Server::Secondary, 1));

        let (machine, action) = cancel(machine.with_state(State::ReceivingRequestWait));
        assert_eq!(machine.state, State::UnreceivedRequest);
        assert_eq!(action, Action::Fail(Error::Timeout));
    }

    #[test]
    fn test_machine_arp_timeout_cancels() {
        let config = RetryConfig::default();
        let machine = Machine::new().with_state(State::SendingRequestWait);
        let (machine, _) = machine.step(Event::SendArpTimeout, &config);
        assert_eq!(machine.state, State::Cancelling);
    }

    #[test]
    fn test_start_query_errors() {
        let mut socket = Socket::new(&[]);
        assert_eq!(socket.start_query("example.com"), Err(StartQueryError::InvalidServer));
        socket.update_servers(&[PRIMARY]);
        assert_eq!(socket.start_query("bad..name"), Err(StartQueryError::InvalidName));
        assert_eq!(socket.start_query("example.com"), Ok(()));
        assert_eq!(socket.start_query("example.com"), Err(StartQueryError::Busy));
        assert_eq!(socket.get_query_result(), Err(GetQueryResultError::Pending));
    }

    #[test]
    fn test_resolve_through_cname() {
        let mut cx = context(0);
        let mut socket = Socket::new(&[PRIMARY]);
        assert_eq!(socket.get_query_result(), Err(GetQueryResultError::Idle));
        socket.start_query("example.com").unwrap();

        assert_eq!(send(&mut socket, &mut cx), Some((PRIMARY, 1)));
        assert_eq!(socket.state(), State::ReceivingRequestWait);
        assert_eq!(
            socket.poll_at(&mut cx),
            PollAt::Time(Instant::from_millis(3000))
        );

        let bytes = answer(1, 0x8180, &[CNAME_RECORD, A_RECORD]);
        recv(&mut socket, &mut cx, PRIMARY, &bytes);
        assert_eq!(socket.state(), State::Finish);
        assert_eq!(socket.get_query_result(), Err(GetQueryResultError::Pending));

        assert_eq!(send(&mut socket, &mut cx), None);
        assert_eq!(socket.state(), State::UnreceivedRequest);
        let resolved = socket.get_query_result().unwrap();
        assert_eq!(resolved.name.as_str(), "example.com");
        assert_eq!(resolved.canonical_name.as_str(), "www.example.com");
        assert_eq!(resolved.address, Ipv4Address::new(93, 184, 216, 34));
        assert_eq!(socket.get_query_result(), Err(GetQueryResultError::Idle));
    }

    #[test]
    fn test_foreign_answers_ignored() {
        let mut cx = context(0);
        let mut socket = Socket::new(&[PRIMARY]);
        socket.start_query("example.com").unwrap();
        send(&mut socket, &mut cx);

        // wrong id, wrong server, not a response
        recv(&mut socket, &mut cx, PRIMARY, &answer(2, 0x8180, &[A_RECORD]));
        recv(&mut socket, &mut cx, SECONDARY, &answer(1, 0x8180, &[A_RECORD]));
        recv(&mut socket, &mut cx, PRIMARY, &answer(1, 0x0100, &[A_RECORD]));
        assert_eq!(socket.state(), State::ReceivingRequestWait);
    }

    #[test]
    fn test_error_answers() {
        let cases: [(u16, &[&[u8]], Error); 3] = [
            (0x8380, &[A_RECORD], Error::Truncated),
            (0x8183, &[], Error::InvalidResponse),
            (0x8180, &[CNAME_RECORD], Error::InvalidResponse),
        ];
        for (flags, answers, error) in cases {
            let mut cx = context(0);
            let mut socket = Socket::new(&[PRIMARY]);
            socket.start_query("example.com").unwrap();
            send(&mut socket, &mut cx);
            recv(&mut socket, &mut cx, PRIMARY, &answer(1, flags, answers));
            send(&mut socket, &mut cx);
            assert_eq!(
                socket.get_query_result(),
                Err(GetQueryResultError::Failed(error))
            );
            assert!(error.code() < 0);
        }
    }

    #[test]
    fn test_timeout_retries_and_fails_over() {
        let mut cx = context(0);
        let mut socket = Socket::new(&[PRIMARY, SECONDARY]);
        socket.start_query("example.com").unwrap();

        let mut sent = StdVec::new();
        for millis in (0..20_000).step_by(500) {
            cx.set_now(Instant::from_millis(millis));
            if let Some((server, _)) = send(&mut socket, &mut cx) {
                sent.push((millis, server));
            }
        }
        assert_eq!(
            sent,
            [
                (0, PRIMARY),
                (3000, PRIMARY),
                (6000, SECONDARY),
                (9000, SECONDARY)
            ]
        );
        assert_eq!(
            socket.get_query_result(),
            Err(GetQueryResultError::Failed(Error::Timeout))
        );
        assert_eq!(socket.state(), State::UnreceivedRequest);
    }

    #[test]
    fn test_query_id_increments_and_wraps() {
        let mut cx = context(0);
        let mut socket = Socket::new(&[PRIMARY]);
        socket.query_id = u16::MAX;
        socket.start_query("example.com").unwrap();
        assert_eq!(send(&mut socket, &mut cx), Some((PRIMARY, 0)));
        socket.cancel_query();
        socket.start_query("example.com").unwrap();
        assert_eq!(send(&mut socket, &mut cx), Some((PRIMARY, 1)));
    }

    #[test]
    fn test_arp_timeout_moves_on() {
        let mut cx = context(0);
        let mut socket = Socket::new(&[PRIMARY]);
        socket.set_retry_config(RetryConfig {
            retries: 0,
            ..RetryConfig::default()
        });
        socket.start_query("example.com").unwrap();
        assert_eq!(
            socket
                .dispatch(&mut cx, |_, _| Err::<(), ()>(())),
            Err(())
        );
        assert_eq!(socket.state(), State::SendingRequestWait);

        socket.arp_timeout(Instant::from_millis(100));
        assert_eq!(socket.state(), State::Cancelling);
        send(&mut socket, &mut cx);
        assert_eq!(
            socket.get_query_result(),
            Err(GetQueryResultError::Failed(Error::Timeout))
        );
    }
}
