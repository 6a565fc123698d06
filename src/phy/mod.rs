/*! Access to networking hardware.

The `phy` module provides an interface for sending and receiving raw Ethernet
frames, and a source of time.

A board support crate implements [Device] for its MAC (usually a DMA
descriptor ring) and [Clock] for its tick counter. On a Linux host,
[RawSocket] stands in for the MAC.

# Examples

An implementation of [Device] for a driver that exposes one frame at a time:

```rust
use rxnet::phy::{self, Device, DeviceCapabilities};

struct StubDevice {
    rx_frame: [u8; 1514],
    rx_len: Option<usize>,
}

impl Device for StubDevice {
    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize> {
        let len = self.rx_len.take()?;
        buffer[..len].copy_from_slice(&self.rx_frame[..len]);
        Some(len)
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), phy::Error> {
        let _ = frame; // hand the frame to the MAC here
        Ok(())
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }
}
```
*/

use core::fmt;

use crate::time::{Duration, Instant};
use crate::wire::ETHERNET_MAX_FRAME_LEN;

#[cfg(all(feature = "phy-raw_socket", target_os = "linux"))]
#[allow(unsafe_code)]
mod raw_socket;

#[cfg(all(feature = "phy-raw_socket", target_os = "linux"))]
pub use self::raw_socket::RawSocket;

/// The device could not transmit a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Error;

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "phy::Error")
    }
}

/// A description of device capabilities.
///
/// Checksums are always computed in software, unless the `ignore_checksums`
/// feature turns them off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub struct DeviceCapabilities {
    /// Maximum frame size, Ethernet header included and FCS excluded.
    ///
    /// The interface never hands `transmit` a longer frame, and never offers
    /// `receive` a shorter buffer.
    pub max_transmission_unit: usize,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        DeviceCapabilities {
            max_transmission_unit: ETHERNET_MAX_FRAME_LEN,
        }
    }
}

/// An Ethernet device.
///
/// Frames are exchanged whole: the interface owns the buffers and the device
/// copies in and out of them.
pub trait Device {
    /// Copy the next received frame into `buffer` and return its length.
    ///
    /// Returns `None` when no frame is pending. Frames longer than `buffer`
    /// are dropped by the device.
    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize>;

    /// Transmit one Ethernet frame, header included and FCS excluded.
    fn transmit(&mut self, frame: &[u8]) -> Result<(), Error>;

    /// Get a description of device capabilities.
    fn capabilities(&self) -> DeviceCapabilities;
}

/// A source of monotonic time.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// A clock backed by a free-running tick counter.
///
/// `read` returns the current counter value; every tick lasts `tick`.
#[derive(Debug, Clone, Copy)]
pub struct TickClock<F> {
    read: F,
    tick: Duration,
}

impl<F: Fn() -> u64> TickClock<F> {
    pub const fn new(read: F, tick: Duration) -> Self {
        TickClock { read, tick }
    }
}

impl<F: Fn() -> u64> Clock for TickClock<F> {
    fn now(&self) -> Instant {
        Instant::from_ticks((self.read)(), self.tick)
    }
}

/// The host's system clock.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
