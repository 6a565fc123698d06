#![no_main]
use libfuzzer_sys::fuzz_target;
use rxnet::wire::{DhcpPacket, DhcpRepr};

fuzz_target!(|data: &[u8]| {
    let _ = (|| {
        let packet = DhcpPacket::new_checked(data)?;
        let repr = DhcpRepr::parse(&packet)?;
        let mut bytes = vec![0; repr.buffer_len()];
        let mut packet = DhcpPacket::new_unchecked(&mut bytes[..]);
        repr.emit(&mut packet)?;
        Ok::<_, rxnet::wire::Error>(())
    })();
});
