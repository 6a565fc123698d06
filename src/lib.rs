#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

//! The _rxnet_ library is a polled, heap-free network layer for bare-metal
//! Ethernet boards. It acquires an IPv4 configuration through DHCP, resolves
//! host names through DNS and stages UDP datagrams for applications that read
//! them at their own pace.
//!
//! # Table of contents
//! The namespace is organized the same way a small TCP/IP stack is:
//!
//!  * [`wire`] parses and emits Ethernet, ARP, IPv4, UDP, DHCPv4 and DNS
//!    packets, without any state;
//!  * [`storage`] provides the fixed-capacity rings everything else buffers into;
//!  * [`socket`] contains the DHCP client, the DNS resolver and the UDP socket
//!    state machines, which never perform I/O themselves;
//!  * [`iface`] moves frames between a [`phy::Device`] and a set of sockets;
//!  * [`session`] bundles all of the above behind the blocking
//!    `begin`/`maintain`/`resolve` calls firmware usually wants.
//!
//! Time never comes from a global: every poll takes an [`time::Instant`],
//! usually read from a [`phy::Clock`] backed by a hardware tick counter.

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(all(feature = "log", feature = "defmt"))]
compile_error!("You must enable at most one of the following features: defmt, log");

#[macro_use]
mod macros;

pub mod iface;
pub mod phy;
pub mod session;
pub mod socket;
pub mod storage;
pub mod time;
pub mod wire;

pub use session::{EthernetSession, MaintainStatus, Timeout};
