// Heads up! Before working on this file you should read, at least,
// the parts of RFC 826 that describe the packet reception algorithm.

use heapless::LinearMap;

use crate::time::{Duration, Instant};
use crate::wire::{EthernetAddress, Ipv4Address};

/// Number of neighbors remembered at once.
pub const CACHE_SIZE: usize = 8;

/// A cached neighbor.
///
/// A neighbor mapping translates from a protocol address to a hardware address,
/// and contains the timestamp past which the mapping should be discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Neighbor {
    hardware_addr: EthernetAddress,
    expires_at: Instant,
}

/// An answer to a neighbor cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum Answer {
    /// The neighbor address is in the cache and not expired.
    Found(EthernetAddress),
    /// The neighbor address is not in the cache, or has expired.
    NotFound,
    /// The neighbor address is not in the cache, or has expired,
    /// and a lookup has been made recently.
    RateLimited,
}

impl Answer {
    /// Returns whether a valid address was found.
    pub(crate) fn found(&self) -> bool {
        match self {
            Answer::Found(_) => true,
            _ => false,
        }
    }
}

/// A neighbor cache backed by a fixed-size map.
///
/// Entries live for [`ENTRY_LIFETIME`](#associatedconstant.ENTRY_LIFETIME);
/// when the cache is full, the entry closest to expiry makes room.
#[derive(Debug)]
pub struct Cache {
    storage: LinearMap<Ipv4Address, Neighbor, CACHE_SIZE>,
    silent_until: Instant,
}

impl Cache {
    /// Minimum delay between discovery requests.
    pub(crate) const SILENT_TIME: Duration = Duration::from_millis(1_000);

    /// Neighbor entry lifetime.
    pub(crate) const ENTRY_LIFETIME: Duration = Duration::from_millis(60_000);

    /// How long a packet waits for its next hop before the lookup fails.
    pub(crate) const LOOKUP_TIMEOUT: Duration = Duration::from_millis(3_000);

    /// Create a cache.
    pub fn new() -> Self {
        Self {
            storage: LinearMap::new(),
            silent_until: Instant::from_millis_const(0),
        }
    }

    pub fn fill(
        &mut self,
        protocol_addr: Ipv4Address,
        hardware_addr: EthernetAddress,
        timestamp: Instant,
    ) {
        debug_assert!(protocol_addr.is_unicast());
        debug_assert!(hardware_addr.is_unicast());

        let neighbor = Neighbor {
            expires_at: timestamp + Self::ENTRY_LIFETIME,
            hardware_addr,
        };
        match self.storage.insert(protocol_addr, neighbor) {
            Ok(Some(old_neighbor)) => {
                if old_neighbor.hardware_addr != hardware_addr {
                    net_trace!(
                        "replaced {} => {} (was {})",
                        protocol_addr,
                        hardware_addr,
                        old_neighbor.hardware_addr
                    );
                }
            }
            Ok(None) => {
                net_trace!("filled {} => {} (was empty)", protocol_addr, hardware_addr);
            }
            Err((protocol_addr, neighbor)) => {
                // If we're going down this branch, it means the cache is full, and we need to evict an entry.
                let old_protocol_addr = *self
                    .storage
                    .iter()
                    .min_by_key(|(_, neighbor)| neighbor.expires_at)
                    .map(|(addr, _)| addr)
                    .unwrap_or(&protocol_addr);

                let _old_neighbor = self.storage.remove(&old_protocol_addr);
                if self.storage.insert(protocol_addr, neighbor).is_ok() {
                    net_trace!(
                        "filled {} => {} (evicted {})",
                        protocol_addr,
                        hardware_addr,
                        old_protocol_addr
                    );
                }
            }
        }
    }

    pub(crate) fn lookup(&self, protocol_addr: &Ipv4Address, timestamp: Instant) -> Answer {
        if let Some(&Neighbor {
            expires_at,
            hardware_addr,
        }) = self.storage.get(protocol_addr)
        {
            if timestamp < expires_at {
                return Answer::Found(hardware_addr);
            }
        }

        if timestamp < self.silent_until {
            Answer::RateLimited
        } else {
            Answer::NotFound
        }
    }

    pub(crate) fn limit_rate(&mut self, timestamp: Instant) {
        self.silent_until = timestamp + Self::SILENT_TIME;
    }

    pub(crate) fn flush(&mut self) {
        self.storage.clear()
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const HADDR_A: EthernetAddress = EthernetAddress([0, 0, 0, 0, 0, 1]);
    const HADDR_B: EthernetAddress = EthernetAddress([0, 0, 0, 0, 0, 2]);

    fn addr(last: u8) -> Ipv4Address {
        Ipv4Address::new(192, 168, 1, last)
    }

    #[test]
    fn test_fill() {
        let mut cache = Cache::new();

        assert!(!cache.lookup(&addr(1), Instant::ZERO).found());
        cache.fill(addr(1), HADDR_A, Instant::ZERO);
        assert_eq!(cache.lookup(&addr(1), Instant::ZERO), Answer::Found(HADDR_A));
        assert!(!cache.lookup(&addr(2), Instant::ZERO).found());
        assert!(!cache
            .lookup(&addr(1), Instant::ZERO + Cache::ENTRY_LIFETIME * 2)
            .found());
    }

    #[test]
    fn test_expire() {
        let mut cache = Cache::new();

        cache.fill(addr(1), HADDR_A, Instant::ZERO);
        assert_eq!(
            cache.lookup(&addr(1), Instant::from_secs(59)),
            Answer::Found(HADDR_A)
        );
        assert_eq!(cache.lookup(&addr(1), Instant::from_secs(60)), Answer::NotFound);
    }

    #[test]
    fn test_replace() {
        let mut cache = Cache::new();

        cache.fill(addr(1), HADDR_A, Instant::ZERO);
        cache.fill(addr(1), HADDR_B, Instant::ZERO);
        assert_eq!(cache.lookup(&addr(1), Instant::ZERO), Answer::Found(HADDR_B));
    }

    #[test]
    fn test_evict() {
        let mut cache = Cache::new();

        for i in 0..CACHE_SIZE as u8 {
            cache.fill(addr(i + 1), HADDR_A, Instant::from_millis(100 + i as i64));
        }
        // the oldest entry goes first
        cache.fill(addr(200), HADDR_B, Instant::from_millis(1000));
        assert_eq!(
            cache.lookup(&addr(200), Instant::from_millis(1000)),
            Answer::Found(HADDR_B)
        );
        assert!(!cache.lookup(&addr(1), Instant::from_millis(1000)).found());
        assert!(cache.lookup(&addr(2), Instant::from_millis(1000)).found());
    }

    #[test]
    fn test_hush() {
        let mut cache = Cache::new();

        assert_eq!(cache.lookup(&addr(1), Instant::ZERO), Answer::NotFound);

        cache.limit_rate(Instant::ZERO);
        assert_eq!(
            cache.lookup(&addr(1), Instant::from_millis(100)),
            Answer::RateLimited
        );
        assert_eq!(
            cache.lookup(&addr(1), Instant::from_millis(2000)),
            Answer::NotFound
        );
    }

    #[test]
    fn test_flush() {
        let mut cache = Cache::new();

        cache.fill(addr(1), HADDR_A, Instant::ZERO);
        cache.flush();
        assert!(!cache.lookup(&addr(1), Instant::ZERO).found());
    }
}
