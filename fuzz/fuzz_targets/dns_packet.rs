#![no_main]
use libfuzzer_sys::fuzz_target;
use rxnet::wire::{DnsPacket, DnsRepr};

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = DnsPacket::new_checked(data) {
        if let Ok(repr) = DnsRepr::parse(&packet) {
            let mut bytes = vec![0; repr.buffer_len()];
            repr.emit(&mut DnsPacket::new_unchecked(&mut bytes[..]));
        }
    }
});
