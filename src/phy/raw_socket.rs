use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::phy::{self, Device, DeviceCapabilities};
use crate::wire::ETHERNET_MAX_FRAME_LEN;

const ETH_P_ALL: u16 = 0x0003;
const SIOCGIFINDEX: libc::c_ulong = 0x8933;
const IFNAMSIZ: usize = libc::IF_NAMESIZE;

#[repr(C)]
#[derive(Debug)]
#[allow(non_camel_case_types)]
struct ifreq {
    ifr_name: [libc::c_char; IFNAMSIZ],
    ifr_data: libc::c_int, /* ifr_ifindex or ifr_mtu */
    _pad: [u8; 20],
}

fn ifreq_for(name: &str) -> io::Result<ifreq> {
    let mut ifreq = ifreq {
        ifr_name: [0; IFNAMSIZ],
        ifr_data: 0,
        _pad: [0; 20],
    };
    if name.len() >= IFNAMSIZ {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    for (i, byte) in name.as_bytes().iter().enumerate() {
        ifreq.ifr_name[i] = *byte as libc::c_char
    }
    Ok(ifreq)
}

/// A socket that captures or transmits the complete frame, on Linux.
///
/// Opening it needs `CAP_NET_RAW`.
#[derive(Debug)]
pub struct RawSocket {
    fd: libc::c_int,
    mtu: usize,
}

impl AsRawFd for RawSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl RawSocket {
    /// Creates a raw socket, bound to the interface called `name`.
    ///
    /// The socket is non-blocking; [receive](#method.receive) returns `None`
    /// when nothing is pending.
    pub fn new(name: &str) -> io::Result<RawSocket> {
        let mut ifreq = ifreq_for(name)?;

        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK,
                ETH_P_ALL.to_be() as i32,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        let socket = RawSocket {
            fd,
            mtu: ETHERNET_MAX_FRAME_LEN,
        };

        let res = unsafe {
            libc::ioctl(
                socket.fd,
                SIOCGIFINDEX as _,
                &mut ifreq as *mut ifreq,
            )
        };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }

        let sockaddr = libc::sockaddr_ll {
            sll_family: libc::AF_PACKET as u16,
            sll_protocol: ETH_P_ALL.to_be(),
            sll_ifindex: ifreq.ifr_data,
            sll_hatype: 1,
            sll_pkttype: 0,
            sll_halen: 6,
            sll_addr: [0; 8],
        };
        let res = unsafe {
            libc::bind(
                socket.fd,
                &sockaddr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }

        net_debug!("raw socket bound to {} (index {})", name, ifreq.ifr_data);
        Ok(socket)
    }

    /// Block until a frame is pending, or `timeout` passes.
    pub fn wait(&self, timeout: Option<crate::time::Duration>) -> io::Result<()> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout = match timeout {
            Some(duration) => duration.total_millis().min(i32::MAX as u64) as libc::c_int,
            None => -1,
        };
        let res = unsafe { libc::poll(&mut pollfd, 1, timeout) };
        if res == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for RawSocket {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl Device for RawSocket {
    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize> {
        let len = unsafe {
            libc::recv(
                self.fd,
                buffer.as_mut_ptr() as *mut libc::c_void,
                buffer.len(),
                0,
            )
        };
        if len == -1 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                net_debug!("raw socket: recv failed: {}", err);
            }
            return None;
        }
        Some(len as usize)
    }

    fn transmit(&mut self, frame: &[u8]) -> Result<(), phy::Error> {
        let len = unsafe {
            libc::send(
                self.fd,
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
            )
        };
        if len == -1 {
            net_debug!("raw socket: send failed: {}", io::Error::last_os_error());
            return Err(phy::Error);
        }
        Ok(())
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = self.mtu;
        caps
    }
}
