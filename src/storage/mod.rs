/*! Specialized containers.

The `storage` module provides the fixed-capacity rings that the sockets stage
their data in. Both kinds of ring work on top of a [`ManagedSlice`], so they
can be backed by a static array on a board without a heap, or by a `Vec` on a
host.

[`ManagedSlice`]: managed::ManagedSlice
*/

use core::fmt;

mod datagram_buffer;
mod ring_buffer;

pub use self::datagram_buffer::DatagramBuffer;
pub use self::ring_buffer::RingBuffer;

/// Default capacity of a UDP socket's payload ring, in octets.
pub const DEFAULT_PAYLOAD_CAPACITY: usize = 1024;

/// Error returned when enqueuing into a full buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Full;

impl fmt::Display for Full {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "buffer full")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Full {}

/// Error returned when dequeuing from an empty buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Empty;

impl fmt::Display for Empty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "buffer empty")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Empty {}
