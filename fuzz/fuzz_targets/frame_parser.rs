#![no_main]
use libfuzzer_sys::fuzz_target;
use rxnet::wire::*;

fuzz_target!(|data: &[u8]| {
    let _ = (|| -> Result<()> {
        let frame = EthernetFrame::new_checked(data)?;
        let _ = EthernetRepr::parse(&frame)?;
        match frame.ethertype() {
            EthernetProtocol::Arp => {
                ArpRepr::parse(&ArpPacket::new_checked(frame.payload())?)?;
            }
            EthernetProtocol::Ipv4 => {
                let packet = Ipv4Packet::new_checked(frame.payload())?;
                let ip_repr = Ipv4Repr::parse(&packet)?;
                if ip_repr.next_header == IpProtocol::Udp {
                    let udp = UdpPacket::new_checked(packet.payload())?;
                    UdpRepr::parse(&udp, &ip_repr.src_addr, &ip_repr.dst_addr)?;
                    match udp.src_port() {
                        DHCP_SERVER_PORT => {
                            DhcpRepr::parse(&DhcpPacket::new_checked(udp.payload())?)?;
                        }
                        53 => {
                            DnsRepr::parse(&DnsPacket::new_checked(udp.payload())?)?;
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        Ok(())
    })();
});
