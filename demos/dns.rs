mod utils;

use log::{error, info};

use rxnet::iface::SocketStorage;
use rxnet::phy::StdClock;
use rxnet::session::Error;
use rxnet::{EthernetSession, Timeout};

fn main() {
    utils::setup_logging("warn");

    let (mut opts, mut free) = utils::create_options();
    utils::add_raw_socket_options(&mut opts, &mut free);
    free.push("NAME");

    let mut matches = utils::parse_options(&opts, free);
    let (device, hardware_addr) = utils::parse_raw_socket_options(&mut matches);
    let name = matches.free[0].clone();

    let mut storage = [SocketStorage::EMPTY; 2];
    let mut session = EthernetSession::new(device, StdClock, &mut storage[..]);

    loop {
        match session.begin(hardware_addr, Timeout::Poll) {
            Ok(()) => break,
            Err(Error::WouldBlock) => utils::wait(&mut session),
            Err(err) => {
                error!("DHCP failed: {}", err);
                return;
            }
        }
    }
    info!("configured {} via DNS server {}", session.local_ip(), session.dns_server_ip());

    loop {
        match session.resolve(&name, Timeout::Poll) {
            Ok(address) => {
                println!("{name}: {address}");
                break;
            }
            Err(Error::WouldBlock) => utils::wait(&mut session),
            Err(err) => {
                println!("{name}: {err} ({})", err.code());
                break;
            }
        }
    }
}
