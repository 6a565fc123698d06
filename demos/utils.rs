#![allow(dead_code)]

use std::cmp;
use std::env;
use std::io::Write;
use std::process;

use env_logger::Builder;
use getopts::{Matches, Options};
use log::{Level, LevelFilter};

use rxnet::phy::{Clock, RawSocket};
use rxnet::time::{Duration, Instant};
use rxnet::wire::EthernetAddress;
use rxnet::EthernetSession;

/// Upper bound on one wait, so the session gets to run lease maintenance.
const MAX_WAIT: Duration = Duration::from_secs(1);

pub fn setup_logging_with_clock<F>(filter: &str, since_startup: F)
where
    F: Fn() -> Instant + Send + Sync + 'static,
{
    Builder::new()
        .format(move |buf, record| {
            let elapsed = since_startup();
            let timestamp = format!("[{elapsed}]");
            if record.target().starts_with("rxnet::") {
                writeln!(
                    buf,
                    "\x1b[0m{} ({}): {}\x1b[0m",
                    timestamp,
                    record.target().replace("rxnet::", ""),
                    record.args()
                )
            } else if record.level() == Level::Trace {
                let message = format!("{}", record.args());
                writeln!(
                    buf,
                    "\x1b[37m{} {}\x1b[0m",
                    timestamp,
                    message.replace('\n', "\n             ")
                )
            } else {
                writeln!(
                    buf,
                    "\x1b[32m{} ({}): {}\x1b[0m",
                    timestamp,
                    record.target(),
                    record.args()
                )
            }
        })
        .filter(None, LevelFilter::Trace)
        .parse_filters(filter)
        .parse_env("RUST_LOG")
        .init();
}

pub fn setup_logging(filter: &str) {
    setup_logging_with_clock(filter, Instant::now)
}

pub fn create_options() -> (Options, Vec<&'static str>) {
    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    (opts, Vec::new())
}

pub fn parse_options(options: &Options, free: Vec<&str>) -> Matches {
    match options.parse(env::args().skip(1)) {
        Err(err) => {
            println!("{err}");
            process::exit(1)
        }
        Ok(matches) => {
            if matches.opt_present("h") || matches.free.len() != free.len() {
                let brief = format!(
                    "Usage: {} [OPTION]... {}",
                    env::args().next().unwrap(),
                    free.join(" ")
                );
                print!("{}", options.usage(&brief));
                process::exit((matches.free.len() != free.len()) as _);
            }
            matches
        }
    }
}

pub fn add_raw_socket_options(opts: &mut Options, free: &mut Vec<&str>) {
    opts.optopt(
        "",
        "mac",
        "hardware address to use (default 02:00:00:00:00:01)",
        "ADDRESS",
    );
    free.push("INTERFACE");
}

pub fn parse_raw_socket_options(matches: &mut Matches) -> (RawSocket, EthernetAddress) {
    let hardware_addr = match matches.opt_str("mac") {
        Some(mac) => parse_mac(&mac).unwrap_or_else(|| {
            println!("invalid hardware address {mac:?}");
            process::exit(1)
        }),
        None => EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]),
    };
    let interface = matches.free.remove(0);
    let device = RawSocket::new(&interface).unwrap();
    (device, hardware_addr)
}

fn parse_mac(text: &str) -> Option<EthernetAddress> {
    let mut octets = [0u8; 6];
    let mut parts = text.split(|c| c == ':' || c == '-');
    for octet in octets.iter_mut() {
        *octet = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    match parts.next() {
        Some(_) => None,
        None => Some(EthernetAddress(octets)),
    }
}

/// Sleep until the session has work to do or a frame arrives.
pub fn wait<C: Clock>(session: &mut EthernetSession<'_, RawSocket, C>) {
    let delay = session
        .poll_delay()
        .map_or(MAX_WAIT, |delay| cmp::min(delay, MAX_WAIT));
    session.device().wait(Some(delay)).unwrap();
}
