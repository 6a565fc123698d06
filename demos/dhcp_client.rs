mod utils;

use log::{error, info, warn};

use rxnet::iface::SocketStorage;
use rxnet::phy::{RawSocket, StdClock};
use rxnet::session::Error;
use rxnet::{EthernetSession, MaintainStatus, Timeout};

fn main() {
    utils::setup_logging("");

    let (mut opts, mut free) = utils::create_options();
    utils::add_raw_socket_options(&mut opts, &mut free);

    let mut matches = utils::parse_options(&opts, free);
    let (device, hardware_addr) = utils::parse_raw_socket_options(&mut matches);

    let mut storage = [SocketStorage::EMPTY; 2];
    let mut session = EthernetSession::new(device, StdClock, &mut storage[..]);

    loop {
        match session.begin(hardware_addr, Timeout::Poll) {
            Ok(()) => break,
            Err(Error::WouldBlock) => utils::wait(&mut session),
            Err(err) => warn!("DHCP failed: {}, retrying", err),
        }
    }
    print_config(&session);

    loop {
        match session.maintain() {
            MaintainStatus::Nothing => {}
            status @ (MaintainStatus::RenewSuccess | MaintainStatus::RebindSuccess) => {
                info!("{:?}", status);
                print_config(&session);
            }
            status => error!("{:?}", status),
        }
        utils::wait(&mut session);
    }
}

fn print_config(session: &EthernetSession<'_, RawSocket, StdClock>) {
    info!("IP address:      {}", session.local_ip());
    info!("Subnet mask:     {}", session.subnet_mask());
    info!("Default gateway: {}", session.gateway_ip());
    info!("DNS server:      {}", session.dns_server_ip());
    if let Some(lease) = session.lease() {
        if !lease.domain_name.is_empty() {
            info!("Domain name:     {}", lease.domain_name);
        }
        info!("Lease time:      {} s", lease.lease_duration);
    }
}
