use super::neighbor::Cache as NeighborCache;
use super::SocketHandle;
use crate::socket::PollAt;
use crate::time::Instant;
use crate::wire::Ipv4Address;

/// Neighbor dependency.
///
/// This enum tracks whether the socket should be polled based on the neighbor
/// it is going to send packets to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum NeighborState {
    /// Socket can be polled immediately.
    #[default]
    Active,
    /// Socket should not be polled until either `silent_until` passes or
    /// `neighbor` appears in the neighbor cache.
    Waiting {
        neighbor: Ipv4Address,
        silent_until: Instant,
        give_up_at: Instant,
    },
}

/// Network socket metadata.
///
/// This includes things that only external (to the socket, that is) code
/// is interested in, but which are more conveniently stored inside the socket
/// itself.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) struct Meta {
    /// Handle of this socket within its enclosing `SocketSet`.
    /// Mainly useful for debug output.
    pub(crate) handle: SocketHandle,
    /// See [NeighborState](struct.NeighborState.html).
    pub(crate) neighbor_state: NeighborState,
}

impl Meta {
    pub(crate) fn poll_at<F>(&self, socket_poll_at: PollAt, has_neighbor: F) -> PollAt
    where
        F: Fn(Ipv4Address) -> bool,
    {
        match self.neighbor_state {
            NeighborState::Active => socket_poll_at,
            NeighborState::Waiting { neighbor, .. } if has_neighbor(neighbor) => socket_poll_at,
            NeighborState::Waiting {
                silent_until,
                give_up_at,
                ..
            } => PollAt::Time(silent_until.min(give_up_at)),
        }
    }

    pub(crate) fn egress_permitted<F>(&mut self, timestamp: Instant, has_neighbor: F) -> bool
    where
        F: Fn(Ipv4Address) -> bool,
    {
        match self.neighbor_state {
            NeighborState::Active => true,
            NeighborState::Waiting {
                neighbor,
                silent_until,
                ..
            } => {
                if has_neighbor(neighbor) {
                    net_trace!(
                        "{}: neighbor {} discovered, unsilencing",
                        self.handle,
                        neighbor
                    );
                    self.neighbor_state = NeighborState::Active;
                    true
                } else if timestamp >= silent_until {
                    net_trace!(
                        "{}: neighbor {} silence timer expired, rediscovering",
                        self.handle,
                        neighbor
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    pub(crate) fn neighbor_missing(&mut self, timestamp: Instant, neighbor: Ipv4Address) {
        net_trace!(
            "{}: neighbor {} missing, silencing until t+{}",
            self.handle,
            neighbor,
            NeighborCache::SILENT_TIME
        );
        let give_up_at = match self.neighbor_state {
            NeighborState::Waiting {
                neighbor: waiting_for,
                give_up_at,
                ..
            } if waiting_for == neighbor => give_up_at,
            _ => timestamp + NeighborCache::LOOKUP_TIMEOUT,
        };
        self.neighbor_state = NeighborState::Waiting {
            neighbor,
            silent_until: timestamp + NeighborCache::SILENT_TIME,
            give_up_at,
        };
    }

    /// Return the neighbor the socket gave up waiting for, if the lookup timed out.
    pub(crate) fn neighbor_timed_out(&mut self, timestamp: Instant) -> Option<Ipv4Address> {
        match self.neighbor_state {
            NeighborState::Waiting {
                neighbor,
                give_up_at,
                ..
            } if timestamp >= give_up_at => {
                net_debug!("{}: neighbor {} never answered", self.handle, neighbor);
                self.neighbor_state = NeighborState::Active;
                Some(neighbor)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const NEIGHBOR: Ipv4Address = Ipv4Address([192, 168, 1, 1]);

    #[test]
    fn test_silence_and_give_up() {
        let mut meta = Meta::default();
        assert!(meta.egress_permitted(Instant::ZERO, |_| false));

        meta.neighbor_missing(Instant::ZERO, NEIGHBOR);
        assert_eq!(
            meta.poll_at(PollAt::Now, |_| false),
            PollAt::Time(Instant::from_millis(1000))
        );
        assert_eq!(meta.poll_at(PollAt::Now, |_| true), PollAt::Now);
        assert!(!meta.egress_permitted(Instant::from_millis(500), |_| false));
        assert!(meta.egress_permitted(Instant::from_millis(1000), |_| false));

        // a repeated miss keeps the original deadline
        meta.neighbor_missing(Instant::from_millis(2500), NEIGHBOR);
        assert_eq!(
            meta.poll_at(PollAt::Now, |_| false),
            PollAt::Time(Instant::from_millis(3000))
        );
        assert_eq!(meta.neighbor_timed_out(Instant::from_millis(2999)), None);
        assert_eq!(
            meta.neighbor_timed_out(Instant::from_millis(3000)),
            Some(NEIGHBOR)
        );
        assert!(meta.egress_permitted(Instant::from_millis(3000), |_| false));
    }

    #[test]
    fn test_neighbor_found() {
        let mut meta = Meta::default();
        meta.neighbor_missing(Instant::ZERO, NEIGHBOR);
        assert!(meta.egress_permitted(Instant::from_millis(10), |addr| addr == NEIGHBOR));
        assert_eq!(meta.neighbor_timed_out(Instant::from_secs(10)), None);
    }
}
